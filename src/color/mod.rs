//! # Colour Representations
//!
//! Colours travel through the converter in two shapes: 32-bit RGBA8888 words (R in the low byte,
//! A in the high byte) for source pixels and working palettes, and 15-bit RGB555 words for the
//! hardware palette storage.

pub mod ds;
pub mod yiq;

pub use ds::{expand_555, interpolate_555, reduce_to_555, round_to_555};
pub use yiq::{rgb_to_yiq, rgb_to_yuv, yiq_to_rgb, yuv_distance, Yiq};

/// RGBA8888, R in bits 0-7, A in bits 24-31.
pub type Rgba32 = u32;

/// DS native RGB555, R in bits 0-4.
pub type Rgb555 = u16;

/// Reserved colour written to index 0 of palettes with a transparent slot.
pub const TRANSPARENT_MAGIC: Rgba32 = 0xFF00FF;

/// Pixels with an alpha below this are treated as transparent.
pub const ALPHA_THRESHOLD: u8 = 128;

#[inline]
pub fn red(c: Rgba32) -> u8 {
    (c & 0xFF) as u8
}

#[inline]
pub fn green(c: Rgba32) -> u8 {
    ((c >> 8) & 0xFF) as u8
}

#[inline]
pub fn blue(c: Rgba32) -> u8 {
    ((c >> 16) & 0xFF) as u8
}

#[inline]
pub fn alpha(c: Rgba32) -> u8 {
    (c >> 24) as u8
}

#[inline]
pub fn pack(r: u8, g: u8, b: u8, a: u8) -> Rgba32 {
    r as u32 | (g as u32) << 8 | (b as u32) << 16 | (a as u32) << 24
}

/// Compare the colour channels only.
#[inline]
pub fn same_rgb(a: Rgba32, b: Rgba32) -> bool {
    (a & 0xFF_FFFF) == (b & 0xFF_FFFF)
}

#[inline]
pub fn is_opaque(c: Rgba32) -> bool {
    alpha(c) >= ALPHA_THRESHOLD
}
