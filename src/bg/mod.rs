//! # Background Tiles
//!
//! Types shared by the character compressor and the bitmap import: flip modes, screen entries,
//! per-tile working state and the character bank.

pub mod compress;
pub mod import;

use serde::{Deserialize, Serialize};

use crate::color::Rgba32;
use crate::error::{ConvertError, Result, Truncated};

pub use compress::{compress_to_blocks, setup_tiles, MatchContext};
pub use import::{BgImportConfig, BgImportInput, BgImportPipeline, BgImportResult, ScreenMode};

/// How a stored character is mirrored to produce the displayed tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlipMode {
    #[default]
    None,
    Horizontal,
    Vertical,
    Both,
}

impl FlipMode {
    /// Enumeration order used when searching, earlier wins ties.
    pub const ALL: [FlipMode; 4] = [
        FlipMode::None,
        FlipMode::Horizontal,
        FlipMode::Vertical,
        FlipMode::Both,
    ];

    pub fn bits(self) -> u16 {
        match self {
            FlipMode::None => 0,
            FlipMode::Horizontal => 1,
            FlipMode::Vertical => 2,
            FlipMode::Both => 3,
        }
    }

    pub fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => FlipMode::None,
            1 => FlipMode::Horizontal,
            2 => FlipMode::Vertical,
            _ => FlipMode::Both,
        }
    }

    pub fn flips_x(self) -> bool {
        self.bits() & 1 != 0
    }

    pub fn flips_y(self) -> bool {
        self.bits() & 2 != 0
    }

    /// Applying `self` then `other` equals applying the result once.
    pub fn compose(self, other: FlipMode) -> FlipMode {
        FlipMode::from_bits(self.bits() ^ other.bits())
    }

    /// Position in the unflipped `dim`x`dim` block that lands on position `i` after the flip.
    #[inline]
    pub fn source_index(self, i: usize, dim: usize) -> usize {
        let mut x = i % dim;
        let mut y = i / dim;
        if self.flips_x() {
            x = dim - 1 - x;
        }
        if self.flips_y() {
            y = dim - 1 - y;
        }
        y * dim + x
    }

    pub fn apply<T: Copy>(self, block: &[T], dim: usize) -> Vec<T> {
        (0..block.len()).map(|i| block[self.source_index(i, dim)]).collect()
    }
}

/// One 16-bit background screen entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenEntry {
    pub char_index: u16,
    pub flip: FlipMode,
    pub palette: u8,
}

impl ScreenEntry {
    pub fn from_u16(val: u16) -> Self {
        ScreenEntry {
            char_index: val & 0x3FF,
            flip: FlipMode::from_bits((val >> 10) & 3),
            palette: ((val >> 12) & 0xF) as u8,
        }
    }

    pub fn to_u16(self) -> u16 {
        (self.char_index & 0x3FF) | self.flip.bits() << 10 | ((self.palette as u16) & 0xF) << 12
    }
}

/// Working state for one block during an import.
#[derive(Debug, Clone, Default)]
pub struct BgTile {
    pub dim: usize,
    pub px: Vec<Rgba32>,
    pub indices: Vec<u8>,
    pub palette: usize,
    pub flip: FlipMode,
    /// Index of the tile whose character this one reuses. Equal to its own index for masters.
    pub master: usize,
    /// How many tiles (itself included) a master stands for.
    pub n_represents: usize,
}

impl BgTile {
    pub fn is_master(&self, index: usize) -> bool {
        self.master == index
    }
}

/// Cut a `width`x`height` image into `dim`x`dim` blocks in row-major scan order.
///
/// Both dimensions must be non-zero multiples of `dim`.
pub fn split_blocks(pixels: &[Rgba32], width: usize, height: usize, dim: usize) -> Result<Vec<BgTile>> {
    if dim == 0 || width == 0 || height == 0 || width % dim != 0 || height % dim != 0 {
        return Err(ConvertError::InvalidDimensions {
            width,
            height,
            reason: "dimensions must be non-zero multiples of the block size",
        });
    }
    if pixels.len() != width * height {
        return Err(ConvertError::BufferMismatch {
            len: pixels.len(),
            expected: width * height,
        });
    }

    let tiles_x = width / dim;
    let tiles_y = height / dim;
    let mut tiles = Vec::with_capacity(tiles_x * tiles_y);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let index = tiles.len();
            tiles.push(BgTile {
                dim,
                px: crate::palette::extract_tile(pixels, width, tx, ty, dim),
                indices: vec![0; dim * dim],
                master: index,
                n_represents: 1,
                ..Default::default()
            });
        }
    }
    Ok(tiles)
}

/// Stored characters, each `dim * dim` palette indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockBank {
    pub dim: usize,
    pub characters: Vec<Vec<u8>>,
}

impl BlockBank {
    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

/// Where one source block ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockRef {
    /// Scan-order index of the representative source block.
    pub master: usize,
    /// Slot in the bank.
    pub char_index: usize,
    pub palette: usize,
    pub flip: FlipMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockCompression {
    pub bank: BlockBank,
    pub refs: Vec<BlockRef>,
    pub truncated: Option<Truncated>,
}
