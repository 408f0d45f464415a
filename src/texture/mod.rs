//! # Texture Formats
//!
//! The seven DS texture formats, the heuristics that pick one for an image, and the
//! per-format encoders. [`convert::convert_texture`] ties them together and
//! [`render::render_texture`] decodes any result back to RGBA.

pub mod alpha;
pub mod convert;
pub mod direct;
pub mod indexed;
pub mod render;
pub mod tex4x4;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::color::{Rgb555, Rgba32};
use crate::error::{ConvertError, Result};
use crate::palette::{count_colors, is_translucent};

pub use convert::{convert_texture, ConvertedTexture, TextureConfig};
pub use render::render_texture;
pub use tex4x4::{encode_4x4, Tex4x4, Tex4x4Options};

const MIN_DIMENSION: usize = 8;
const MAX_DIMENSION: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFormat {
    A3i5,
    Palette4,
    Palette16,
    Palette256,
    Tex4x4,
    A5i3,
    Direct,
}

impl TextureFormat {
    pub const ALL: [TextureFormat; 7] = [
        TextureFormat::A3i5,
        TextureFormat::Palette4,
        TextureFormat::Palette16,
        TextureFormat::Palette256,
        TextureFormat::Tex4x4,
        TextureFormat::A5i3,
        TextureFormat::Direct,
    ];

    /// Hardware format number, as stored in TEXIMAGE_PARAM.
    pub fn id(self) -> u32 {
        match self {
            TextureFormat::A3i5 => 1,
            TextureFormat::Palette4 => 2,
            TextureFormat::Palette16 => 3,
            TextureFormat::Palette256 => 4,
            TextureFormat::Tex4x4 => 5,
            TextureFormat::A5i3 => 6,
            TextureFormat::Direct => 7,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.id() == id)
    }

    pub fn bits_per_pixel(self) -> u8 {
        match self {
            TextureFormat::Palette4 | TextureFormat::Tex4x4 => 2,
            TextureFormat::Palette16 => 4,
            TextureFormat::A3i5 | TextureFormat::Palette256 | TextureFormat::A5i3 => 8,
            TextureFormat::Direct => 16,
        }
    }

    /// Palette size a fresh conversion uses. 0 for formats without a fixed palette.
    pub fn default_palette_size(self) -> usize {
        match self {
            TextureFormat::A3i5 => 32,
            TextureFormat::Palette4 => 4,
            TextureFormat::Palette16 => 16,
            TextureFormat::Palette256 => 256,
            TextureFormat::A5i3 => 8,
            TextureFormat::Tex4x4 | TextureFormat::Direct => 0,
        }
    }

    pub fn alpha_levels(self) -> Option<usize> {
        match self {
            TextureFormat::A3i5 => Some(8),
            TextureFormat::A5i3 => Some(32),
            _ => None,
        }
    }

    pub fn is_paletted(self) -> bool {
        self != TextureFormat::Direct
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TextureFormat::A3i5 => "a3i5",
            TextureFormat::Palette4 => "palette4",
            TextureFormat::Palette16 => "palette16",
            TextureFormat::Palette256 => "palette256",
            TextureFormat::Tex4x4 => "tex4x4",
            TextureFormat::A5i3 => "a5i3",
            TextureFormat::Direct => "direct",
        }
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextureFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == lower)
            .ok_or_else(|| format!("unknown texture format '{}'", s))
    }
}

/// A converted texture ready to upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Texture {
    pub format: TextureFormat,
    pub width: usize,
    pub height: usize,
    /// Palette entry 0 is shown as transparent.
    pub color0_transparent: bool,
    pub texels: Vec<u8>,
    /// 4x4 index words. Empty for other formats.
    pub index_data: Vec<u8>,
    pub palette: Vec<Rgb555>,
    pub palette_name: Option<String>,
}

impl Texture {
    /// TEXIMAGE_PARAM bits describing this texture. The VRAM offset and wrap bits are left clear.
    pub fn tex_image_param(&self) -> u32 {
        let size_bits = |n: usize| n.trailing_zeros().saturating_sub(3);
        (self.format.id() << 26)
            | (size_bits(self.width) << 20)
            | (size_bits(self.height) << 23)
            | (u32::from(self.color0_transparent) << 29)
    }

    pub fn texel_vram_size(&self) -> usize {
        self.width * self.height * self.format.bits_per_pixel() as usize / 8
    }

    pub fn index_vram_size(&self) -> usize {
        if self.format == TextureFormat::Tex4x4 {
            self.width * self.height / 8
        } else {
            0
        }
    }

    pub fn palette_vram_size(&self) -> usize {
        self.palette.len() * 2
    }
}

/// Texture sides must be powers of two between 8 and 1024.
pub fn validate_dimensions(width: usize, height: usize) -> Result<()> {
    let ok = |n: usize| n.is_power_of_two() && (MIN_DIMENSION..=MAX_DIMENSION).contains(&n);
    if ok(width) && ok(height) {
        Ok(())
    } else {
        Err(ConvertError::InvalidDimensions {
            width,
            height,
            reason: "texture sides must be powers of two between 8 and 1024",
        })
    }
}

/// Pick a format that suits the image's colour count and transparency.
pub fn guess_format(pixels: &[Rgba32], width: usize, height: usize) -> TextureFormat {
    let area = width * height;
    let fallback = if width == 1024 && height == 1024 {
        TextureFormat::Palette256
    } else {
        TextureFormat::Tex4x4
    };

    let n_colors = count_colors(pixels);
    if is_translucent(pixels) {
        return if n_colors < 16 {
            TextureFormat::A5i3
        } else {
            TextureFormat::A3i5
        };
    }
    if n_colors <= 4 {
        return TextureFormat::Palette4;
    }

    let pixels_per_color = 2 * area / n_colors;
    if pixels_per_color >= 3 && area < 1024 * 512 {
        TextureFormat::Tex4x4
    } else if n_colors < 32 {
        TextureFormat::Palette16
    } else {
        fallback
    }
}

/// 4x4 palette budget for a texture of the given size.
pub fn choose_color_count(width: usize, height: usize) -> usize {
    let area = width * height;
    let count = if area < 256 * 256 {
        let c = (8.0 * (area as f64).sqrt()) as usize;
        c.next_multiple_of(16)
    } else {
        (256.0 * ((area as f64).log2() - 10.0)) as usize
    };
    count.min(tex4x4::MAX_BANK_COLORS)
}

/// Palette name for a texture file: up to 12 characters of the stem plus `_pl`.
pub fn palette_name(file_name: &str) -> String {
    let stem: String = file_name
        .chars()
        .take_while(|&c| c != '.')
        .take(12)
        .collect();
    format!("{}_pl", stem)
}
