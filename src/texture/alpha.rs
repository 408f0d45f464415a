//! Alpha + index hybrid formats (A3I5 and A5I3).

use crate::color::{blue, green, pack, red, Rgba32};
use crate::error::{ConvertError, Result};
use crate::palette::dither::diffuse;

/// Index bits for a format with `levels` alpha levels, or an error for anything but 8 and 32.
pub fn index_bits(levels: usize) -> Result<u32> {
    match levels {
        8 => Ok(5),
        32 => Ok(3),
        other => Err(ConvertError::InvalidAlphaLevels(other)),
    }
}

/// Alpha of level `level` out of `levels`, rounded to nearest.
pub fn alpha_for_level(level: usize, levels: usize) -> u8 {
    if levels < 2 {
        return 255;
    }
    ((level * 510 + levels - 1) / (2 * levels - 2)).min(255) as u8
}

/// Nearest level for an 8-bit alpha.
pub fn level_for_alpha(alpha: u8, levels: usize) -> usize {
    if levels < 2 {
        return 0;
    }
    (alpha as usize * (levels - 1) + 127) / 255
}

/// Pack palette indices with alpha. Each alpha is snapped to its nearest level.
pub fn encode_alpha_indexed(indices: &[u8], alphas: &[u8], levels: usize) -> Result<Vec<u8>> {
    let shift = index_bits(levels)?;
    if indices.len() != alphas.len() {
        return Err(ConvertError::BufferMismatch {
            len: alphas.len(),
            expected: indices.len(),
        });
    }
    let mask = (1u8 << shift) - 1;
    Ok(indices
        .iter()
        .zip(alphas)
        .map(|(&index, &a)| (index & mask) | (level_for_alpha(a, levels) as u8) << shift)
        .collect())
}

/// Split packed texels back into `(index, level)` pairs.
pub fn decode_alpha_indexed(data: &[u8], levels: usize) -> Result<Vec<(u8, usize)>> {
    let shift = index_bits(levels)?;
    let mask = (1u8 << shift) - 1;
    Ok(data
        .iter()
        .map(|&b| (b & mask, (b >> shift) as usize))
        .collect())
}

/// Snap every alpha to a level value, optionally diffusing the rounding error.
pub fn dither_alpha_levels(
    alphas: &[u8],
    width: usize,
    height: usize,
    levels: usize,
    diffuse_amount: f32,
) -> Vec<u8> {
    // Carry alpha in the top byte of a working pixel so the shared kernel can spread it.
    let mut work: Vec<Rgba32> = alphas.iter().map(|&a| pack(0, 0, 0, a)).collect();
    let mut out = Vec::with_capacity(alphas.len());
    for i in 0..work.len() {
        let a = (work[i] >> 24) as u8;
        let snapped = alpha_for_level(level_for_alpha(a, levels), levels);
        out.push(snapped);
        let error = a as i32 - snapped as i32;
        if diffuse_amount > 0.0 && error != 0 {
            diffuse(&mut work, i, width, height, [0, 0, 0, error], diffuse_amount);
        }
    }
    out
}

/// 256-entry palette repeating `base` once per alpha level, for viewing A3I5/A5I3 texels as
/// plain 8-bit indices.
pub fn alpha_palette(base: &[Rgba32], levels: usize) -> Result<Vec<Rgba32>> {
    index_bits(levels)?;
    let per_level = 256 / levels;
    let mut palette = vec![0u32; 256];
    for level in 0..levels {
        let a = alpha_for_level(level, levels);
        for (j, &c) in base.iter().take(per_level).enumerate() {
            palette[level * per_level + j] = pack(red(c), green(c), blue(c), a);
        }
    }
    Ok(palette)
}
