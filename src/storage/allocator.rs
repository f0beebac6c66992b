//! Spatial Space Allocator
//!
//! Finds a run of `n` consecutive EMPTY cells inside the grid bounds.
//!
//! ## Scan Order
//!
//! Cells are visited in raster order (x, then z, then y), so a run can wrap
//! from the end of one row into the next row, and from the last row of a
//! layer into the next layer:
//!
//! ```text
//!   layer y=0              layer y=1
//!   z=0 [. . . . A A]      z=0 [A A . . . .]
//!   z=1 [A A A A A A]  ──> z=1 [. . . . . .]
//! ```
//!
//! ## Cursor
//!
//! The allocator remembers where the last run ended and resumes from there.
//! When the scan reaches the end of the volume it makes one pass from the
//! origin back up to the cursor, which is how cells freed behind the cursor
//! get reused. There is no free list and no compaction.

use crate::grid::{CellGrid, GridBounds, GridError, Position};
use std::ops::Range;
use tracing::{debug, trace, warn};

/// Location of a stored value: first cell plus run length in symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub start: Position,
    pub len: usize,
}

impl Address {
    pub fn new(start: Position, len: usize) -> Self {
        Self { start, len }
    }

    /// Raster offsets covered by this run, or `None` if any cell falls
    /// outside `bounds`.
    pub fn offsets(&self, bounds: &GridBounds) -> Option<Range<usize>> {
        let first = bounds.offset_of(self.start)?;
        let end = first.checked_add(self.len)?;
        (end <= bounds.total_cells()).then_some(first..end)
    }

    /// True if the two runs share at least one cell.
    pub fn overlaps(&self, other: &Address, bounds: &GridBounds) -> bool {
        match (self.offsets(bounds), other.offsets(bounds)) {
            (Some(a), Some(b)) => a.start < b.end && b.start < a.end,
            _ => false,
        }
    }
}

/// First-fit allocator with a rolling cursor.
#[derive(Debug, Clone)]
pub struct SpaceAllocator {
    bounds: GridBounds,
    /// Raster offset where the next scan starts
    cursor: usize,
}

impl SpaceAllocator {
    /// Creates an allocator whose cursor sits at the volume origin.
    pub fn new(bounds: GridBounds) -> Self {
        Self { bounds, cursor: 0 }
    }

    pub fn bounds(&self) -> GridBounds {
        self.bounds
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor back to the volume origin.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Finds the first run of `n` empty cells at or after the cursor,
    /// wrapping once to the origin.
    ///
    /// Returns `Ok(None)` when no run fits anywhere in the volume.
    pub fn find_space(
        &mut self,
        grid: &dyn CellGrid,
        n: usize,
    ) -> Result<Option<Address>, GridError> {
        let total = self.bounds.total_cells();

        if n == 0 {
            let start = self
                .bounds
                .position_at(self.cursor)
                .unwrap_or(self.bounds.min);
            return Ok(Some(Address::new(start, 0)));
        }
        if n > total {
            warn!(needed = n, total = total, "Run is larger than the whole grid");
            return Ok(None);
        }

        let last_start = total - n;
        debug!(
            needed = n,
            cursor = self.cursor,
            min = %self.bounds.min,
            max = %self.bounds.max,
            "Finding space"
        );

        let mut found = self.scan(grid, self.cursor, last_start, n)?;
        if found.is_none() && self.cursor > 0 {
            trace!(cursor = self.cursor, "Wrapping scan to the origin");
            let limit = (self.cursor - 1).min(last_start);
            found = self.scan(grid, 0, limit, n)?;
        }

        match found {
            Some(offset) => {
                self.cursor = offset + n;
                let start = self
                    .bounds
                    .position_at(offset)
                    .ok_or_else(|| GridError::Unavailable(format!("offset {} out of bounds", offset)))?;
                debug!(start = %start, needed = n, "Found space");
                Ok(Some(Address::new(start, n)))
            }
            None => {
                warn!(needed = n, "No run of empty cells found");
                Ok(None)
            }
        }
    }

    /// First-fit scan over candidate starts `from..=limit`.
    fn scan(
        &self,
        grid: &dyn CellGrid,
        from: usize,
        limit: usize,
        n: usize,
    ) -> Result<Option<usize>, GridError> {
        let mut candidate = from;

        'outer: while candidate <= limit {
            for offset in candidate..candidate + n {
                if !self.is_free(grid, offset)? {
                    // No run containing this cell can fit
                    candidate = offset + 1;
                    continue 'outer;
                }
            }
            return Ok(Some(candidate));
        }

        Ok(None)
    }

    fn is_free(&self, grid: &dyn CellGrid, offset: usize) -> Result<bool, GridError> {
        let Some(pos) = self.bounds.position_at(offset) else {
            return Ok(false);
        };
        if !grid.is_within_managed_region(pos) {
            return Ok(false);
        }
        Ok(grid.get_cell(pos)?.is_empty())
    }
}
