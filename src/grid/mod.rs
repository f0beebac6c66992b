//! Cell Grid Module
//!
//! The grid is the persistence medium of gridkv: a bounded 3D volume of
//! integer-addressed cells, each holding exactly one [`Symbol`]. The storage
//! engine never owns the cells; it talks to a [`CellGrid`] provider.
//!
//! ## Addressing
//!
//! Cells are visited in raster order: `x` fastest, then `z`, then `y`.
//! A run of cells may cross row (`z`) and layer (`y`) boundaries.
//!
//! ```text
//!          y (layers)
//!          │   z (rows)
//!          │  ╱
//!          │ ╱
//!          │╱_______ x (fastest)
//!
//!   offset = ((y - min.y) * depth + (z - min.z)) * width + (x - min.x)
//! ```
//!
//! ## Modules
//!
//! - `memory`: resident in-process grid provider
//! - `guard`: region protection listener

pub mod guard;
pub mod memory;

pub use guard::{GuardDecision, RegionGuard};
pub use memory::MemoryGrid;

use std::fmt;
use thiserror::Error;

/// Width and depth of one chunk column, in cells.
pub const CHUNK_SIZE: i32 = 16;

/// One cell state.
///
/// `Symbol::EMPTY` is the unwritten sentinel. Palette values are stored
/// shifted by one so that the sentinel can never collide with a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Symbol(u16);

impl Symbol {
    /// The "unwritten" cell state.
    pub const EMPTY: Symbol = Symbol(0);

    /// Returns the symbol representing palette value `value`.
    #[inline]
    pub const fn from_value(value: u8) -> Self {
        Symbol(value as u16 + 1)
    }

    /// Builds a symbol from its raw cell state.
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Symbol(raw)
    }

    /// Returns the raw cell state.
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Returns the palette value carried by this symbol, if any.
    #[inline]
    pub fn value(self) -> Option<u8> {
        self.0.checked_sub(1).and_then(|v| u8::try_from(v).ok())
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self == Symbol::EMPTY
    }
}

/// A 3D integer cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Inclusive bounds of the grid volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridBounds {
    pub min: Position,
    pub max: Position,
}

impl GridBounds {
    /// Creates bounds spanning the two corners (in any order).
    pub fn new(a: Position, b: Position) -> Self {
        Self {
            min: Position::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Position::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Creates bounds covering the chunk columns `start..=end` on x/z and the
    /// layers `min_y..=max_y`.
    pub fn from_chunks(
        start_x: i32,
        start_z: i32,
        end_x: i32,
        end_z: i32,
        min_y: i32,
        max_y: i32,
    ) -> Self {
        Self::new(
            Position::new(start_x * CHUNK_SIZE, min_y, start_z * CHUNK_SIZE),
            Position::new(
                (end_x + 1) * CHUNK_SIZE - 1,
                max_y,
                (end_z + 1) * CHUNK_SIZE - 1,
            ),
        )
    }

    #[inline]
    pub fn width(&self) -> usize {
        (self.max.x as i64 - self.min.x as i64 + 1) as usize
    }

    #[inline]
    pub fn height(&self) -> usize {
        (self.max.y as i64 - self.min.y as i64 + 1) as usize
    }

    #[inline]
    pub fn depth(&self) -> usize {
        (self.max.z as i64 - self.min.z as i64 + 1) as usize
    }

    /// Number of cells in the volume.
    pub fn total_cells(&self) -> usize {
        self.width() * self.height() * self.depth()
    }

    /// Number of 16x16 chunk columns the volume touches.
    pub fn chunk_count(&self) -> usize {
        let xs = (self.max.x >> 4) as i64 - (self.min.x >> 4) as i64 + 1;
        let zs = (self.max.z >> 4) as i64 - (self.min.z >> 4) as i64 + 1;
        (xs * zs) as usize
    }

    pub fn contains(&self, pos: Position) -> bool {
        (self.min.x..=self.max.x).contains(&pos.x)
            && (self.min.y..=self.max.y).contains(&pos.y)
            && (self.min.z..=self.max.z).contains(&pos.z)
    }

    /// Raster offset of `pos`, or `None` if it lies outside the bounds.
    pub fn offset_of(&self, pos: Position) -> Option<usize> {
        if !self.contains(pos) {
            return None;
        }
        let dx = (pos.x as i64 - self.min.x as i64) as usize;
        let dy = (pos.y as i64 - self.min.y as i64) as usize;
        let dz = (pos.z as i64 - self.min.z as i64) as usize;
        Some((dy * self.depth() + dz) * self.width() + dx)
    }

    /// Position at raster offset `offset`, or `None` past the last cell.
    pub fn position_at(&self, offset: usize) -> Option<Position> {
        if offset >= self.total_cells() {
            return None;
        }
        let dx = offset % self.width();
        let row = offset / self.width();
        let dz = row % self.depth();
        let dy = row / self.depth();
        Some(Position::new(
            (self.min.x as i64 + dx as i64) as i32,
            (self.min.y as i64 + dy as i64) as i32,
            (self.min.z as i64 + dz as i64) as i32,
        ))
    }
}

/// Errors reported by a grid provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("position {0} is outside the managed region")]
    OutOfRegion(Position),

    #[error("grid region unavailable: {0}")]
    Unavailable(String),
}

/// Contract every grid provider implements.
///
/// Providers keep the managed volume available for the lifetime of the engine
/// and report out-of-region access as an error rather than panicking.
pub trait CellGrid: Send {
    /// Declared bounds of the volume the engine may use.
    fn bounds(&self) -> GridBounds;

    fn get_cell(&self, pos: Position) -> Result<Symbol, GridError>;

    fn set_cell(&mut self, pos: Position, symbol: Symbol) -> Result<(), GridError>;

    /// True only inside the declared, provider-loaded sub-volume.
    fn is_within_managed_region(&self, pos: Position) -> bool;

    /// Number of chunk columns the provider keeps loaded for the engine.
    fn loaded_chunks(&self) -> usize {
        self.bounds().chunk_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_sentinel() {
        assert!(Symbol::EMPTY.is_empty());
        assert_eq!(Symbol::EMPTY.value(), None);
        assert_eq!(Symbol::from_value(0).value(), Some(0));
        assert_eq!(Symbol::from_value(255).value(), Some(255));
        assert!(!Symbol::from_value(0).is_empty());
        assert_eq!(Symbol::from_raw(300).value(), None);
    }

    #[test]
    fn test_from_chunks() {
        let bounds = GridBounds::from_chunks(0, 0, 3, 3, 5, 250);
        assert_eq!(bounds.min, Position::new(0, 5, 0));
        assert_eq!(bounds.max, Position::new(63, 250, 63));
        assert_eq!(bounds.total_cells(), 64 * 64 * 246);
        assert_eq!(bounds.chunk_count(), 16);
    }

    #[test]
    fn test_raster_order() {
        let bounds = GridBounds::new(Position::new(-2, 0, 10), Position::new(1, 2, 11));

        // x first
        assert_eq!(bounds.position_at(0), Some(Position::new(-2, 0, 10)));
        assert_eq!(bounds.position_at(3), Some(Position::new(1, 0, 10)));
        // then z
        assert_eq!(bounds.position_at(4), Some(Position::new(-2, 0, 11)));
        // then y
        assert_eq!(bounds.position_at(8), Some(Position::new(-2, 1, 10)));
        assert_eq!(bounds.position_at(bounds.total_cells()), None);

        for offset in 0..bounds.total_cells() {
            let pos = bounds.position_at(offset).unwrap();
            assert_eq!(bounds.offset_of(pos), Some(offset));
        }
        assert_eq!(bounds.offset_of(Position::new(2, 0, 10)), None);
    }

    #[test]
    fn test_negative_chunks() {
        let bounds = GridBounds::from_chunks(-1, -1, 0, 0, 0, 0);
        assert_eq!(bounds.min, Position::new(-16, 0, -16));
        assert_eq!(bounds.max, Position::new(15, 0, 15));
        assert_eq!(bounds.chunk_count(), 4);
    }
}
