//! # Texture Conversion
//!
//! Turns an RGBA image into a [`Texture`] of the requested (or guessed) format.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::alpha::{dither_alpha_levels, encode_alpha_indexed};
use super::direct::encode_direct;
use super::indexed::encode_indexed;
use super::tex4x4::{encode_4x4, Tex4x4Options, MAX_BANK_COLORS};
use super::{choose_color_count, guess_format, validate_dimensions, Texture, TextureFormat};
use crate::color::{alpha, expand_555, reduce_to_555, Rgb555, Rgba32, ALPHA_THRESHOLD};
use crate::error::{ConvertError, Result, Truncated};
use crate::palette::{create_palette, dither_to_palette};
use crate::progress::{ProgressState, Stage};
use crate::reduction::BalanceParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    /// `None` picks a format from the image content.
    pub format: Option<TextureFormat>,
    pub dither: bool,
    pub diffuse: f32,
    /// Diffuse alpha rounding error in the A3I5 and A5I3 formats.
    pub dither_alpha: bool,
    /// Palette size override. Capped at the format's maximum.
    pub palette_size: Option<usize>,
    /// Use these colours instead of building a palette.
    pub fixed_palette: Option<Vec<Rgb555>>,
    /// Cap the 4x4 palette bank at `palette_size`, or at a size derived from the dimensions.
    pub limit_palette: bool,
    /// `None` makes colour 0 transparent only when the image has transparent pixels.
    pub color0_transparent: Option<bool>,
    pub palette_name: Option<String>,
    pub balance: BalanceParams,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            format: None,
            dither: false,
            diffuse: 1.0,
            dither_alpha: false,
            palette_size: None,
            fixed_palette: None,
            limit_palette: false,
            color0_transparent: None,
            palette_name: None,
            balance: BalanceParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertedTexture {
    pub texture: Texture,
    pub truncated: Option<Truncated>,
}

struct Converter<'a> {
    pixels: &'a [Rgba32],
    width: usize,
    height: usize,
    config: &'a TextureConfig,
    progress: &'a ProgressState,
}

impl Converter<'_> {
    fn diffuse(&self) -> f32 {
        if self.config.dither {
            self.config.diffuse
        } else {
            0.0
        }
    }

    /// Requested palette size capped at the format's maximum. A reserved transparent slot
    /// raises the minimum so one colour is left for the image.
    fn palette_size(&self, format: TextureFormat, reserve: bool) -> usize {
        let max = format.default_palette_size();
        let min = (1 + usize::from(reserve)).min(max);
        self.config.palette_size.unwrap_or(max).clamp(min, max)
    }

    /// The fixed palette when one was given, otherwise one built from `pixels`.
    fn build_palette(&self, pixels: &[Rgba32], size: usize, reserve: bool) -> Result<Vec<Rgba32>> {
        self.progress.set_stage(Stage::Histogram);
        if let Some(fixed) = &self.config.fixed_palette {
            if fixed.len() > size {
                return Err(ConvertError::PaletteTooLarge {
                    len: fixed.len(),
                    max: size,
                });
            }
            return Ok(fixed.iter().map(|&c| expand_555(c)).collect());
        }
        self.progress.set_stage(Stage::PaletteOptimize);
        Ok(create_palette(pixels, size, reserve, &self.config.balance))
    }

    fn indexed(&self, format: TextureFormat) -> Result<(Texture, Option<Truncated>)> {
        let color0_transparent = self
            .config
            .color0_transparent
            .unwrap_or_else(|| self.pixels.iter().any(|&p| alpha(p) < ALPHA_THRESHOLD));
        let palette = self.build_palette(
            self.pixels,
            self.palette_size(format, color0_transparent),
            color0_transparent,
        )?;
        let skip = usize::from(color0_transparent);
        if palette.len() <= skip {
            return Err(ConvertError::EmptyPalette);
        }
        self.progress.check_cancel()?;

        self.progress.set_stage(Stage::PerBlockMatch);
        let indices: Vec<u8> = dither_to_palette(
            self.pixels,
            self.width,
            self.height,
            &palette[skip..],
            self.diffuse(),
        )
        .into_iter()
        .zip(self.pixels)
        .map(|(index, &p)| {
            if skip == 1 && alpha(p) < ALPHA_THRESHOLD {
                0
            } else {
                index + skip as u8
            }
        })
        .collect();

        self.progress.set_stage(Stage::Encode);
        let texels = encode_indexed(&indices, self.width, self.height, format.bits_per_pixel())?;
        Ok((
            self.texture(format, color0_transparent, texels, Vec::new(), to_555(&palette)),
            None,
        ))
    }

    fn alpha_indexed(&self, format: TextureFormat, levels: usize) -> Result<(Texture, Option<Truncated>)> {
        // Colour and alpha are stored apart, so the palette only sees visible pixels made opaque.
        let forced: Vec<Rgba32> = self
            .pixels
            .iter()
            .map(|&p| if alpha(p) > 0 { p | 0xFF00_0000 } else { p })
            .collect();
        let palette = self.build_palette(&forced, self.palette_size(format, false), false)?;
        if palette.is_empty() {
            return Err(ConvertError::EmptyPalette);
        }
        self.progress.check_cancel()?;

        self.progress.set_stage(Stage::PerBlockMatch);
        let indices = dither_to_palette(&forced, self.width, self.height, &palette, self.diffuse());
        let raw_alpha: Vec<u8> = self.pixels.iter().map(|&p| alpha(p)).collect();
        let alphas = if self.config.dither_alpha {
            dither_alpha_levels(&raw_alpha, self.width, self.height, levels, self.config.diffuse)
        } else {
            raw_alpha
        };

        self.progress.set_stage(Stage::Encode);
        let texels = encode_alpha_indexed(&indices, &alphas, levels)?;
        Ok((
            self.texture(format, false, texels, Vec::new(), to_555(&palette)),
            None,
        ))
    }

    fn compressed(&self) -> Result<(Texture, Option<Truncated>)> {
        let max_palette_colors = if self.config.limit_palette {
            self.config
                .palette_size
                .unwrap_or_else(|| choose_color_count(self.width, self.height))
        } else {
            MAX_BANK_COLORS
        };
        let options = Tex4x4Options {
            max_palette_colors,
            diffuse: self.diffuse(),
            balance: self.config.balance,
        };
        self.progress.set_stage(Stage::PerBlockMatch);
        let tex = encode_4x4(self.pixels, self.width, self.height, &options, self.progress)?;
        self.progress.set_stage(Stage::Encode);
        Ok((
            self.texture(TextureFormat::Tex4x4, false, tex.texels, tex.index_data, tex.palette),
            tex.truncated,
        ))
    }

    fn texture(
        &self,
        format: TextureFormat,
        color0_transparent: bool,
        texels: Vec<u8>,
        index_data: Vec<u8>,
        palette: Vec<Rgb555>,
    ) -> Texture {
        let palette_name = (!palette.is_empty()).then(|| {
            self.config
                .palette_name
                .clone()
                .unwrap_or_else(|| super::palette_name("texture"))
        });
        Texture {
            format,
            width: self.width,
            height: self.height,
            color0_transparent,
            texels,
            index_data,
            palette,
            palette_name,
        }
    }
}

fn to_555(palette: &[Rgba32]) -> Vec<Rgb555> {
    palette.iter().map(|&c| reduce_to_555(c)).collect()
}

/// Convert `pixels` to a DS texture.
pub fn convert_texture(
    pixels: &[Rgba32],
    width: usize,
    height: usize,
    config: &TextureConfig,
    progress: &ProgressState,
) -> Result<ConvertedTexture> {
    validate_dimensions(width, height)?;
    if pixels.len() != width * height {
        return Err(ConvertError::BufferMismatch {
            len: pixels.len(),
            expected: width * height,
        });
    }
    progress.set_stage(Stage::Init);

    let format = config
        .format
        .unwrap_or_else(|| guess_format(pixels, width, height));
    info!("converting {}x{} texture as {}", width, height, format);

    let converter = Converter {
        pixels,
        width,
        height,
        config,
        progress,
    };
    let (texture, truncated) = match format {
        TextureFormat::Direct => {
            progress.set_stage(Stage::Encode);
            let texels = encode_direct(pixels, width, height, converter.diffuse());
            (converter.texture(format, false, texels, Vec::new(), Vec::new()), None)
        }
        TextureFormat::Tex4x4 => converter.compressed()?,
        TextureFormat::A3i5 | TextureFormat::A5i3 => {
            converter.alpha_indexed(format, format.alpha_levels().unwrap_or(8))?
        }
        TextureFormat::Palette4 | TextureFormat::Palette16 | TextureFormat::Palette256 => {
            converter.indexed(format)?
        }
    };

    debug!(
        "texture: {} texel bytes, {} palette colours",
        texture.texels.len(),
        texture.palette.len()
    );
    progress.set_stage(Stage::Done);
    Ok(ConvertedTexture { texture, truncated })
}
