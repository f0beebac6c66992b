//! Resident in-process grid provider.

use super::{CellGrid, GridBounds, GridError, Position, Symbol};

/// A grid whose whole managed volume lives in memory.
///
/// Every cell starts out as [`Symbol::EMPTY`].
#[derive(Debug, Clone)]
pub struct MemoryGrid {
    bounds: GridBounds,
    cells: Vec<Symbol>,
}

impl MemoryGrid {
    pub fn new(bounds: GridBounds) -> Self {
        Self {
            bounds,
            cells: vec![Symbol::EMPTY; bounds.total_cells()],
        }
    }

    /// Number of cells currently holding a non-empty symbol.
    pub fn occupied_cells(&self) -> usize {
        self.cells.iter().filter(|s| !s.is_empty()).count()
    }

    fn index(&self, pos: Position) -> Result<usize, GridError> {
        self.bounds
            .offset_of(pos)
            .ok_or(GridError::OutOfRegion(pos))
    }
}

impl CellGrid for MemoryGrid {
    fn bounds(&self) -> GridBounds {
        self.bounds
    }

    fn get_cell(&self, pos: Position) -> Result<Symbol, GridError> {
        let idx = self.index(pos)?;
        Ok(self.cells[idx])
    }

    fn set_cell(&mut self, pos: Position, symbol: Symbol) -> Result<(), GridError> {
        let idx = self.index(pos)?;
        self.cells[idx] = symbol;
        Ok(())
    }

    fn is_within_managed_region(&self, pos: Position) -> bool {
        self.bounds.contains(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> MemoryGrid {
        MemoryGrid::new(GridBounds::new(Position::new(0, 0, 0), Position::new(3, 1, 3)))
    }

    #[test]
    fn test_starts_empty() {
        let grid = small_grid();
        assert_eq!(grid.occupied_cells(), 0);
        assert_eq!(grid.get_cell(Position::new(3, 1, 3)), Ok(Symbol::EMPTY));
    }

    #[test]
    fn test_set_get() {
        let mut grid = small_grid();
        let pos = Position::new(1, 1, 2);
        grid.set_cell(pos, Symbol::from_value(9)).unwrap();
        assert_eq!(grid.get_cell(pos), Ok(Symbol::from_value(9)));
        assert_eq!(grid.occupied_cells(), 1);
    }

    #[test]
    fn test_out_of_region_is_error() {
        let mut grid = small_grid();
        let outside = Position::new(4, 0, 0);
        assert!(!grid.is_within_managed_region(outside));
        assert_eq!(grid.get_cell(outside), Err(GridError::OutOfRegion(outside)));
        assert_eq!(
            grid.set_cell(outside, Symbol::from_value(1)),
            Err(GridError::OutOfRegion(outside))
        );
    }
}
