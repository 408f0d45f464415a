//! # DS Colour Conversion
//!
//! The hardware stores 5 bits per channel. Expansion maps every 5-bit level onto one of 32 fixed
//! 8-bit targets and reduction rounds an 8-bit value to the nearest of those targets (ties go
//! up), so `reduce_to_555(expand_555(c)) == c` for every RGB555 value.

use super::{alpha, blue, green, red, Rgb555, Rgba32};

const fn build_expand_table() -> [u8; 32] {
    let mut table = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        table[i] = ((i * 255 + 15) / 31) as u8;
        i += 1;
    }
    table
}

const fn build_reduce_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = ((i * 31 + 127) / 255) as u8;
        i += 1;
    }
    table
}

static EXPAND: [u8; 32] = build_expand_table();
static REDUCE: [u8; 256] = build_reduce_table();

#[inline]
fn r5(c: Rgb555) -> usize {
    (c & 0x1F) as usize
}

#[inline]
fn g5(c: Rgb555) -> usize {
    ((c >> 5) & 0x1F) as usize
}

#[inline]
fn b5(c: Rgb555) -> usize {
    ((c >> 10) & 0x1F) as usize
}

/// Expand an RGB555 colour to an opaque RGBA8888 colour.
pub fn expand_555(c: Rgb555) -> Rgba32 {
    EXPAND[r5(c)] as u32
        | (EXPAND[g5(c)] as u32) << 8
        | (EXPAND[b5(c)] as u32) << 16
        | 0xFF00_0000
}

/// Reduce an RGBA8888 colour to RGB555, rounding each channel to the nearest level.
pub fn reduce_to_555(c: Rgba32) -> Rgb555 {
    let r = REDUCE[red(c) as usize] as u16;
    let g = REDUCE[green(c) as usize] as u16;
    let b = REDUCE[blue(c) as usize] as u16;
    r | g << 5 | b << 10
}

/// Snap an RGBA8888 colour to the closest colour the hardware can show. Alpha is kept.
pub fn round_to_555(c: Rgba32) -> Rgba32 {
    (expand_555(reduce_to_555(c)) & 0xFF_FFFF) | (alpha(c) as u32) << 24
}

/// Blend two RGB555 colours channel by channel: `(c1 * (den - num) + c2 * num) / den`, truncated.
pub fn interpolate_555(c1: Rgb555, c2: Rgb555, num: u32, den: u32) -> Rgb555 {
    let mix = |a: usize, b: usize| ((a as u32 * (den - num) + b as u32 * num) / den) as u16;
    mix(r5(c1), r5(c2)) | mix(g5(c1), g5(c2)) << 5 | mix(b5(c1), b5(c2)) << 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_hits_fixed_levels() {
        assert_eq!(EXPAND[0], 0);
        assert_eq!(EXPAND[1], 8);
        assert_eq!(EXPAND[3], 25);
        assert_eq!(EXPAND[16], 132);
        assert_eq!(EXPAND[31], 255);
    }

    #[test]
    fn reduction_rounds_instead_of_truncating() {
        // 7 >> 3 would be 0, but 7 is closer to level 1 (8).
        assert_eq!(REDUCE[7], 1);
        assert_eq!(REDUCE[4], 0);
        // 29 sits exactly between 25 and 33; ties round up.
        assert_eq!(REDUCE[29], 4);
        assert_eq!(REDUCE[255], 31);
    }

    #[test]
    fn magenta_round_trips() {
        assert_eq!(reduce_to_555(0xFF00FF), 0x7C1F);
        assert_eq!(expand_555(0x7C1F) & 0xFF_FFFF, 0xFF00FF);
    }

    #[test]
    fn interpolation_truncates() {
        let black = 0;
        let white = 0x7FFF;
        assert_eq!(interpolate_555(black, white, 1, 2), 15 | 15 << 5 | 15 << 10);
        assert_eq!(interpolate_555(black, white, 3, 8), 11 | 11 << 5 | 11 << 10);
        assert_eq!(interpolate_555(black, white, 5, 8), 19 | 19 << 5 | 19 << 10);
    }

    #[test]
    fn round_keeps_alpha() {
        let c = round_to_555(0x8007_0707);
        assert_eq!(c >> 24, 0x80);
        assert_eq!(c & 0xFF, 8);
    }
}
