//! # 4x4 Compressed Textures
//!
//! Every 4x4 block stores 2 bits per texel in a 32-bit word plus a 16-bit index word. The index
//! word's top two bits pick how the block's 4-colour sub-palette is derived from the shared
//! palette bank; the low 14 bits give the run's position in the bank in units of two colours.
//!
//! The encoder reduces each block to an explicit and an interpolated candidate, keeps the
//! cheaper one (interpolated on ties, as it uses fewer bank colours) and shares identical runs
//! in the bank. Once the bank budget is spent, blocks fall back to the best run already stored.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::binary_utils::{push_u16_le, push_u32_le};
use crate::color::{
    alpha, expand_555, interpolate_555, reduce_to_555, yuv_distance, Rgb555, Rgba32,
    ALPHA_THRESHOLD,
};
use crate::error::{ConvertError, Result, Truncated};
use crate::palette::{closest_color_index, dither_to_palette};
use crate::progress::ProgressState;
use crate::reduction::{BalanceParams, ReductionContext, ALPHA_ERROR_SCALE};

/// Largest bank the 14-bit base field can address.
pub const MAX_BANK_COLORS: usize = 0x4000 * 2;

const BLOCK: usize = 4;

/// Cost of showing a transparent pixel as a colour or the other way around.
const ALPHA_PENALTY: u64 = (ALPHA_ERROR_SCALE as u64 * 255) * (ALPHA_ERROR_SCALE as u64 * 255);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockMode {
    /// Three stored colours, slot 3 transparent.
    Explicit3,
    /// Two stored endpoints and their midpoint, slot 3 transparent.
    Interpolated3,
    /// Four stored colours.
    Explicit4,
    /// Two stored endpoints and the 3/8 and 5/8 blends.
    Interpolated4,
}

impl BlockMode {
    pub fn bits(self) -> u16 {
        match self {
            BlockMode::Explicit3 => 0x0000,
            BlockMode::Interpolated3 => 0x4000,
            BlockMode::Explicit4 => 0x8000,
            BlockMode::Interpolated4 => 0xC000,
        }
    }

    pub fn from_index_word(word: u16) -> Self {
        match word & 0xC000 {
            0x0000 => BlockMode::Explicit3,
            0x4000 => BlockMode::Interpolated3,
            0x8000 => BlockMode::Explicit4,
            _ => BlockMode::Interpolated4,
        }
    }

    /// Bank colours the mode reads.
    pub fn stored_colors(self) -> usize {
        match self {
            BlockMode::Explicit3 => 3,
            BlockMode::Explicit4 => 4,
            BlockMode::Interpolated3 | BlockMode::Interpolated4 => 2,
        }
    }

    pub fn has_transparent(self) -> bool {
        matches!(self, BlockMode::Explicit3 | BlockMode::Interpolated3)
    }
}

/// The four colours a block sees. `None` is the transparent slot. Reads past the end of the
/// bank yield black.
pub(crate) fn sub_palette(mode: BlockMode, bank: &[Rgb555], base: usize) -> [Option<Rgb555>; 4] {
    let get = |k: usize| bank.get(base + k).copied().unwrap_or(0);
    let (c0, c1) = (get(0), get(1));
    match mode {
        BlockMode::Explicit3 => [Some(c0), Some(c1), Some(get(2)), None],
        BlockMode::Interpolated3 => [Some(c0), Some(c1), Some(interpolate_555(c0, c1, 1, 2)), None],
        BlockMode::Explicit4 => [Some(c0), Some(c1), Some(get(2)), Some(get(3))],
        BlockMode::Interpolated4 => [
            Some(c0),
            Some(c1),
            Some(interpolate_555(c0, c1, 3, 8)),
            Some(interpolate_555(c0, c1, 5, 8)),
        ],
    }
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Tex4x4Options {
    /// Bank budget in colours.
    pub max_palette_colors: usize,
    /// Error diffusion strength inside each block, 0 to disable.
    pub diffuse: f32,
    pub balance: BalanceParams,
}

impl Default for Tex4x4Options {
    fn default() -> Self {
        Self {
            max_palette_colors: MAX_BANK_COLORS,
            diffuse: 0.0,
            balance: BalanceParams::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tex4x4 {
    /// One little-endian 32-bit word per block.
    pub texels: Vec<u8>,
    /// One little-endian 16-bit index word per block.
    pub index_data: Vec<u8>,
    pub palette: Vec<Rgb555>,
    pub truncated: Option<Truncated>,
}

struct Candidate {
    mode: BlockMode,
    colors: Vec<Rgb555>,
    error: u64,
}

fn block_error(px: &[Rgba32], palette: &[Option<Rgb555>; 4]) -> u64 {
    let colors: Vec<Rgba32> = palette.iter().flatten().map(|&c| expand_555(c)).collect();
    let has_transparent = palette.iter().any(Option::is_none);
    px.iter()
        .map(|&p| {
            if alpha(p) < ALPHA_THRESHOLD {
                if has_transparent {
                    0
                } else {
                    ALPHA_PENALTY
                }
            } else {
                colors
                    .iter()
                    .map(|&c| yuv_distance(p, c) as u64)
                    .min()
                    .unwrap_or(ALPHA_PENALTY)
            }
        })
        .sum()
}

fn texel_indices(px: &[Rgba32], palette: &[Option<Rgb555>; 4], diffuse: f32) -> [u8; 16] {
    let colors: Vec<Rgba32> = palette.iter().flatten().map(|&c| expand_555(c)).collect();
    let transparent = palette.iter().position(Option::is_none);
    let dithered = if diffuse > 0.0 {
        Some(dither_to_palette(px, BLOCK, BLOCK, &colors, diffuse))
    } else {
        None
    };

    let mut out = [0u8; 16];
    for (i, &p) in px.iter().enumerate() {
        out[i] = match (transparent, alpha(p) < ALPHA_THRESHOLD) {
            (Some(t), true) => t as u8,
            _ => match &dithered {
                Some(d) => d[i],
                None => closest_color_index(p, &colors) as u8,
            },
        };
    }
    out
}

/// Find `colors` stored at an even offset of the bank. First match wins.
fn find_run(bank: &[Rgb555], colors: &[Rgb555]) -> Option<usize> {
    (0..bank.len())
        .step_by(2)
        .take_while(|&base| base + colors.len() <= bank.len())
        .find(|&base| bank[base..base + colors.len()] == *colors)
}

struct BlockEncoder {
    ctx3: ReductionContext,
    ctx4: ReductionContext,
    bank: Vec<Rgb555>,
    max_colors: usize,
    /// Runs turned away once the budget was spent. Each counts towards `overflow` once.
    refused: HashSet<Vec<Rgb555>>,
    overflow: usize,
}

impl BlockEncoder {
    fn reduce_block(&mut self, opaque: &[Rgba32], n: usize) -> Vec<Rgb555> {
        let ctx = if n == 3 { &mut self.ctx3 } else { &mut self.ctx4 };
        ctx.reset_histogram();
        ctx.compute_histogram(opaque);
        let k = ctx.histogram().len().min(n);
        let mut colors: Vec<Rgb555> = Vec::with_capacity(n);
        for &c in &ctx.optimize_palette()[..k] {
            let c = reduce_to_555(c);
            if !colors.contains(&c) {
                colors.push(c);
            }
        }
        colors
    }

    fn candidates(&mut self, px: &[Rgba32]) -> Option<(Candidate, Candidate)> {
        let opaque: Vec<Rgba32> = px
            .iter()
            .copied()
            .filter(|&p| alpha(p) >= ALPHA_THRESHOLD)
            .collect();
        if opaque.is_empty() {
            return None;
        }
        let has_transparent = opaque.len() < px.len();
        let n = if has_transparent { 3 } else { 4 };
        let colors = self.reduce_block(&opaque, n);

        let mut explicit = colors.clone();
        while explicit.len() < n {
            explicit.push(*explicit.last().unwrap_or(&0));
        }
        let explicit_mode = if has_transparent {
            BlockMode::Explicit3
        } else {
            BlockMode::Explicit4
        };

        // Endpoints: the most distant pair of the reduced colours.
        let mut endpoints = (colors[0], colors[0]);
        let mut widest = -1i64;
        for (a, &ca) in colors.iter().enumerate() {
            for &cb in &colors[a + 1..] {
                let d = yuv_distance(expand_555(ca), expand_555(cb));
                if d > widest {
                    widest = d;
                    endpoints = (ca, cb);
                }
            }
        }
        let interp_mode = if has_transparent {
            BlockMode::Interpolated3
        } else {
            BlockMode::Interpolated4
        };
        let interp = vec![endpoints.0, endpoints.1];

        let explicit_error = block_error(px, &sub_palette(explicit_mode, &explicit, 0));
        let interp_error = block_error(px, &sub_palette(interp_mode, &interp, 0));
        Some((
            Candidate {
                mode: explicit_mode,
                colors: explicit,
                error: explicit_error,
            },
            Candidate {
                mode: interp_mode,
                colors: interp,
                error: interp_error,
            },
        ))
    }

    /// Place a run in the bank, reusing an identical one. `None` when the budget is spent.
    fn place(&mut self, colors: &[Rgb555]) -> Option<usize> {
        if let Some(base) = find_run(&self.bank, colors) {
            return Some(base);
        }
        let needed = colors.len().next_multiple_of(2);
        if self.bank.len() + needed > self.max_colors {
            if self.refused.insert(colors.to_vec()) {
                self.overflow += needed;
            }
            return None;
        }
        let base = self.bank.len();
        self.bank.extend_from_slice(colors);
        self.bank.resize(base + needed, 0);
        Some(base)
    }

    /// Best `(mode, base)` among runs already in the bank.
    fn best_existing(&self, px: &[Rgba32], has_transparent: bool) -> (BlockMode, usize) {
        let modes: &[BlockMode] = if has_transparent {
            &[BlockMode::Explicit3, BlockMode::Interpolated3]
        } else {
            &[
                BlockMode::Explicit4,
                BlockMode::Interpolated4,
                BlockMode::Explicit3,
                BlockMode::Interpolated3,
            ]
        };
        let mut best = (BlockMode::Interpolated3, 0);
        let mut best_error = u64::MAX;
        for base in (0..self.bank.len()).step_by(2) {
            for &mode in modes {
                if base + mode.stored_colors() > self.bank.len() {
                    continue;
                }
                let err = block_error(px, &sub_palette(mode, &self.bank, base));
                if err < best_error {
                    best_error = err;
                    best = (mode, base);
                }
            }
        }
        best
    }

    fn encode_block(&mut self, px: &[Rgba32], diffuse: f32) -> ([u8; 16], BlockMode, usize) {
        let Some((explicit, interp)) = self.candidates(px) else {
            // Fully transparent: any run will do, every texel takes the transparent slot.
            let base = if self.bank.len() >= 2 {
                0
            } else {
                self.place(&[0, 0]).unwrap_or(0)
            };
            return ([3; 16], BlockMode::Interpolated3, base);
        };

        let chosen = if interp.error <= explicit.error {
            interp
        } else {
            explicit
        };
        let (mode, base) = match self.place(&chosen.colors) {
            Some(base) => (chosen.mode, base),
            None => self.best_existing(px, chosen.mode.has_transparent()),
        };
        let palette = sub_palette(mode, &self.bank, base);
        (texel_indices(px, &palette, diffuse), mode, base)
    }
}

/// Compress a `width`x`height` image (multiples of 4) into 4x4 blocks.
pub fn encode_4x4(
    pixels: &[Rgba32],
    width: usize,
    height: usize,
    options: &Tex4x4Options,
    progress: &ProgressState,
) -> Result<Tex4x4> {
    if width == 0 || height == 0 || width % BLOCK != 0 || height % BLOCK != 0 {
        return Err(ConvertError::InvalidDimensions {
            width,
            height,
            reason: "4x4 textures need dimensions that are multiples of 4",
        });
    }
    if pixels.len() != width * height {
        return Err(ConvertError::BufferMismatch {
            len: pixels.len(),
            expected: width * height,
        });
    }

    let max_colors = options.max_palette_colors.clamp(4, MAX_BANK_COLORS) & !1;
    let mut encoder = BlockEncoder {
        ctx3: ReductionContext::new(&options.balance, 3),
        ctx4: ReductionContext::new(&options.balance, 4),
        bank: Vec::new(),
        max_colors,
        refused: HashSet::new(),
        overflow: 0,
    };

    let blocks_x = width / BLOCK;
    let blocks_y = height / BLOCK;
    info!("compressing {} 4x4 blocks, bank limit {}", blocks_x * blocks_y, max_colors);
    progress.set_max(blocks_x * blocks_y);

    let mut texels = Vec::with_capacity(blocks_x * blocks_y * 4);
    let mut index_data = Vec::with_capacity(blocks_x * blocks_y * 2);
    let mut px = [0u32; 16];
    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            progress.check_cancel()?;
            for row in 0..BLOCK {
                let start = (by * BLOCK + row) * width + bx * BLOCK;
                px[row * BLOCK..(row + 1) * BLOCK].copy_from_slice(&pixels[start..start + BLOCK]);
            }

            let (indices, mode, base) = encoder.encode_block(&px, options.diffuse);
            let mut word = 0u32;
            for (i, &index) in indices.iter().enumerate() {
                word |= (index as u32 & 3) << (2 * i);
            }
            push_u32_le(&mut texels, word);
            push_u16_le(&mut index_data, mode.bits() | ((base >> 1) as u16 & 0x3FFF));
            progress.advance(1);
        }
    }

    let truncated = (encoder.overflow > 0).then(|| Truncated {
        requested: encoder.bank.len() + encoder.overflow,
        actual: encoder.bank.len(),
    });
    if let Some(t) = truncated {
        warn!(
            "4x4 palette budget exceeded: {} colours wanted, {} stored",
            t.requested, t.actual
        );
    }
    debug!("4x4 bank holds {} colours", encoder.bank.len());

    Ok(Tex4x4 {
        texels,
        index_data,
        palette: encoder.bank,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::pack;

    #[test]
    fn sub_palette_modes() {
        let bank = [0x0000, 0x7FFF, 0x001F, 0x7C00];
        assert_eq!(
            sub_palette(BlockMode::Explicit3, &bank, 0),
            [Some(0), Some(0x7FFF), Some(0x001F), None]
        );
        let grey = 15 | 15 << 5 | 15 << 10;
        assert_eq!(sub_palette(BlockMode::Interpolated3, &bank, 0)[2], Some(grey));
        assert_eq!(sub_palette(BlockMode::Explicit4, &bank, 0)[3], Some(0x7C00));
        let p = sub_palette(BlockMode::Interpolated4, &bank, 0);
        assert_eq!(p[2], Some(11 | 11 << 5 | 11 << 10));
        assert_eq!(p[3], Some(19 | 19 << 5 | 19 << 10));
    }

    #[test]
    fn index_word_mode_round_trip() {
        for mode in [
            BlockMode::Explicit3,
            BlockMode::Interpolated3,
            BlockMode::Explicit4,
            BlockMode::Interpolated4,
        ] {
            assert_eq!(BlockMode::from_index_word(mode.bits() | 0x1234), mode);
        }
    }

    #[test]
    fn solid_block_shares_one_run() {
        let progress = ProgressState::new();
        let red = pack(255, 0, 0, 255);
        let tex = encode_4x4(&vec![red; 8 * 8], 8, 8, &Tex4x4Options::default(), &progress).unwrap();
        assert_eq!(tex.texels.len(), 16);
        assert_eq!(tex.index_data.len(), 8);
        assert_eq!(tex.palette, vec![0x001F, 0x001F]);
        for word in tex.index_data.chunks_exact(2) {
            let w = u16::from_le_bytes([word[0], word[1]]);
            assert_eq!(BlockMode::from_index_word(w), BlockMode::Interpolated4);
            assert_eq!(w & 0x3FFF, 0);
        }
        assert!(tex.truncated.is_none());
        assert_eq!(progress.current(), 4);
    }

    #[test]
    fn transparent_pixels_use_slot_three() {
        let progress = ProgressState::new();
        let mut px = vec![pack(0, 0, 255, 255); 16];
        px[5] = 0;
        let tex = encode_4x4(&px, 4, 4, &Tex4x4Options::default(), &progress).unwrap();
        let word = u32::from_le_bytes([tex.texels[0], tex.texels[1], tex.texels[2], tex.texels[3]]);
        assert_eq!((word >> 10) & 3, 3);
        let index = u16::from_le_bytes([tex.index_data[0], tex.index_data[1]]);
        assert!(BlockMode::from_index_word(index).has_transparent());
    }

    #[test]
    fn four_colour_block_is_exact() {
        let progress = ProgressState::new();
        let colors = [
            pack(255, 0, 0, 255),
            pack(0, 255, 0, 255),
            pack(0, 0, 255, 255),
            pack(255, 255, 255, 255),
        ];
        let px: Vec<Rgba32> = (0..16).map(|i| colors[i % 4]).collect();
        let tex = encode_4x4(&px, 4, 4, &Tex4x4Options::default(), &progress).unwrap();
        let index = u16::from_le_bytes([tex.index_data[0], tex.index_data[1]]);
        assert_eq!(BlockMode::from_index_word(index), BlockMode::Explicit4);
        assert_eq!(tex.palette.len(), 4);
        let palette = sub_palette(BlockMode::Explicit4, &tex.palette, 0);
        let word = u32::from_le_bytes([tex.texels[0], tex.texels[1], tex.texels[2], tex.texels[3]]);
        for (i, &p) in px.iter().enumerate() {
            let slot = (word >> (2 * i)) & 3;
            assert_eq!(palette[slot as usize], Some(reduce_to_555(p)));
        }
    }

    #[test]
    fn repeated_refusals_count_once() {
        let progress = ProgressState::new();
        let shades = [
            pack(255, 0, 0, 255),
            pack(0, 255, 0, 255),
            pack(0, 0, 255, 255),
            pack(0, 0, 255, 255),
        ];
        let mut px = vec![0u32; 16 * 4];
        for y in 0..4 {
            for x in 0..16 {
                px[y * 16 + x] = shades[x / 4];
            }
        }
        let options = Tex4x4Options {
            max_palette_colors: 4,
            ..Default::default()
        };
        let tex = encode_4x4(&px, 16, 4, &options, &progress).unwrap();
        // Red and green take a two-colour run each; blue is turned away twice but wants one run.
        assert_eq!(
            tex.truncated,
            Some(Truncated {
                requested: 6,
                actual: 4
            })
        );
    }

    #[test]
    fn budget_overflow_falls_back_and_reports() {
        let progress = ProgressState::new();
        // Four solid blocks of different colours, room for two runs.
        let shades = [
            pack(255, 0, 0, 255),
            pack(0, 255, 0, 255),
            pack(0, 0, 255, 255),
            pack(250, 0, 0, 255),
        ];
        let mut px = vec![0u32; 16 * 4];
        for y in 0..4 {
            for x in 0..16 {
                px[y * 16 + x] = shades[x / 4];
            }
        }
        let options = Tex4x4Options {
            max_palette_colors: 4,
            ..Default::default()
        };
        let tex = encode_4x4(&px, 16, 4, &options, &progress).unwrap();
        assert_eq!(tex.palette.len(), 4);
        let t = tex.truncated.unwrap();
        assert_eq!(t.actual, 4);
        assert!(t.requested > 4);
        // The last block falls back onto the red run.
        let last = u16::from_le_bytes([tex.index_data[6], tex.index_data[7]]);
        assert_eq!(last & 0x3FFF, 0);
    }

    #[test]
    fn rejects_non_multiple_of_four() {
        let progress = ProgressState::new();
        assert!(matches!(
            encode_4x4(&[0; 6 * 4], 6, 4, &Tex4x4Options::default(), &progress),
            Err(ConvertError::InvalidDimensions { .. })
        ));
    }
}
