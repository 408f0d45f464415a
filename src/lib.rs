//! Palette quantisation and tile/texture encoding for Nintendo DS graphics.
//!
//! Images come in as RGBA8888 words (red in the low byte) and leave as RGB555 palettes, packed
//! characters and screens for backgrounds, or texel data in one of the seven texture formats.

pub mod bg;
pub mod binary_utils;
pub mod color;
pub mod error;
pub mod palette;
pub mod progress;
pub mod reduction;
pub mod texture;

pub use bg::{compress_to_blocks, BgImportConfig, BgImportInput, BgImportPipeline, BgImportResult, FlipMode};
pub use error::{ConvertError, Result, Truncated};
pub use palette::{create_palette, dither_to_palette, quantize_to_palette};
pub use progress::{ConversionTask, ProgressState, Stage};
pub use reduction::BalanceParams;
pub use texture::{
    alpha::encode_alpha_indexed, convert_texture, encode_4x4, indexed::encode_indexed,
    render_texture, TextureConfig, TextureFormat,
};
