//! Byte ↔ Symbol Codec
//!
//! Converts raw value bytes into the symbol sequence written to the grid and
//! back. Two palettes are supported:
//!
//! ```text
//! simple    (16 symbols, 4 bits/symbol):   0xA7 ──> [sym(0xA), sym(0x7)]
//! optimized (256 symbols, 8 bits/symbol):  0xA7 ──> [sym(0xA7)]
//! ```
//!
//! With compression enabled the bytes are first packed into a size-prefixed
//! LZ4 block, which carries everything needed to unpack it again.
//!
//! Decoding is total over whatever the grid holds: a symbol that is not part
//! of the palette (including the EMPTY sentinel) decodes as palette entry 0.

use crate::error::{StoreError, StoreResult};
use crate::grid::Symbol;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Upper bound on the uncompressed size declared by a stored LZ4 block.
pub const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// The set of symbols a codec writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Palette {
    /// 16 symbols, two per byte (high nibble first)
    #[serde(rename = "simple")]
    Nibble,
    /// 256 symbols, one per byte
    #[serde(rename = "optimized")]
    Byte,
}

impl Palette {
    /// Number of distinct symbols in the palette.
    pub const fn size(self) -> usize {
        match self {
            Palette::Nibble => 16,
            Palette::Byte => 256,
        }
    }

    pub const fn symbols_per_byte(self) -> usize {
        match self {
            Palette::Nibble => 2,
            Palette::Byte => 1,
        }
    }
}

/// Stateless symbol codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolCodec {
    palette: Palette,
    compression: bool,
}

impl SymbolCodec {
    pub fn new(palette: Palette, compression: bool) -> Self {
        Self {
            palette,
            compression,
        }
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    /// Bytes that are actually mapped to symbols.
    fn pack<'a>(&self, data: &'a [u8]) -> Cow<'a, [u8]> {
        if self.compression {
            Cow::Owned(lz4_flex::compress_prepend_size(data))
        } else {
            Cow::Borrowed(data)
        }
    }

    fn unpack(&self, data: Vec<u8>) -> StoreResult<Bytes> {
        if !self.compression {
            return Ok(Bytes::from(data));
        }

        let declared = data
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
            .ok_or_else(|| StoreError::Format("compressed stream is truncated".to_string()))?;
        if declared > MAX_DECOMPRESSED_SIZE {
            return Err(StoreError::Format(format!(
                "compressed stream declares {} bytes (max: {})",
                declared, MAX_DECOMPRESSED_SIZE
            )));
        }

        lz4_flex::decompress_size_prepended(&data)
            .map(Bytes::from)
            .map_err(|e| StoreError::Format(format!("corrupt compressed stream: {}", e)))
    }

    /// Encodes `data` into grid symbols.
    pub fn encode(&self, data: &[u8]) -> Vec<Symbol> {
        let packed = self.pack(data);
        let mut symbols = Vec::with_capacity(packed.len() * self.palette.symbols_per_byte());

        match self.palette {
            Palette::Nibble => {
                for &b in packed.iter() {
                    symbols.push(Symbol::from_value(b >> 4));
                    symbols.push(Symbol::from_value(b & 0x0F));
                }
            }
            Palette::Byte => {
                symbols.extend(packed.iter().map(|&b| Symbol::from_value(b)));
            }
        }

        symbols
    }

    /// Decodes a symbol sequence read from the grid.
    pub fn decode(&self, symbols: &[Symbol]) -> StoreResult<Bytes> {
        let raw = match self.palette {
            Palette::Nibble => {
                if symbols.len() % 2 != 0 {
                    return Err(StoreError::Format(format!(
                        "symbol sequence must have an even length, got {}",
                        symbols.len()
                    )));
                }
                symbols
                    .chunks_exact(2)
                    .map(|pair| (self.value_of(pair[0]) << 4) | self.value_of(pair[1]))
                    .collect::<Vec<u8>>()
            }
            Palette::Byte => symbols.iter().map(|&s| self.value_of(s)).collect(),
        };

        self.unpack(raw)
    }

    /// Exact number of symbols [`encode`](Self::encode) produces for `data`.
    pub fn blocks_needed(&self, data: &[u8]) -> usize {
        self.pack(data).len() * self.palette.symbols_per_byte()
    }

    /// Palette value of `symbol`, substituting entry 0 for anything foreign.
    #[inline]
    fn value_of(&self, symbol: Symbol) -> u8 {
        match symbol.value() {
            Some(v) if (v as usize) < self.palette.size() => v,
            _ => 0,
        }
    }
}
