//! Decodes converted textures back to RGBA8888 for previews and round-trip checks.

use std::io::Cursor;

use super::alpha::{alpha_for_level, decode_alpha_indexed};
use super::direct::decode_direct;
use super::indexed::decode_indexed;
use super::tex4x4::{sub_palette, BlockMode};
use super::{Texture, TextureFormat};
use crate::binary_utils::{read_u16_le, read_u32_le};
use crate::color::{blue, expand_555, green, pack, red, Rgba32};
use crate::error::Result;

pub fn render_texture(texture: &Texture) -> Result<Vec<Rgba32>> {
    let (w, h) = (texture.width, texture.height);
    let palette: Vec<Rgba32> = texture.palette.iter().map(|&c| expand_555(c)).collect();
    let lookup = |index: usize| palette.get(index).copied().unwrap_or(0xFF00_0000);

    match texture.format {
        TextureFormat::Direct => Ok(decode_direct(&texture.texels)),
        TextureFormat::Palette4 | TextureFormat::Palette16 | TextureFormat::Palette256 => {
            let indices = decode_indexed(&texture.texels, w, h, texture.format.bits_per_pixel())?;
            Ok(indices
                .into_iter()
                .map(|index| {
                    if index == 0 && texture.color0_transparent {
                        0
                    } else {
                        lookup(index as usize)
                    }
                })
                .collect())
        }
        TextureFormat::A3i5 | TextureFormat::A5i3 => {
            let levels = texture.format.alpha_levels().unwrap_or(8);
            let texels = decode_alpha_indexed(&texture.texels, levels)?;
            Ok(texels
                .into_iter()
                .map(|(index, level)| {
                    let c = lookup(index as usize);
                    pack(red(c), green(c), blue(c), alpha_for_level(level, levels))
                })
                .collect())
        }
        TextureFormat::Tex4x4 => render_4x4(texture),
    }
}

fn render_4x4(texture: &Texture) -> Result<Vec<Rgba32>> {
    let (w, h) = (texture.width, texture.height);
    let mut out = vec![0u32; w * h];
    let mut texels = Cursor::new(texture.texels.as_slice());
    let mut index = Cursor::new(texture.index_data.as_slice());

    for by in 0..h / 4 {
        for bx in 0..w / 4 {
            let word = read_u32_le(&mut texels)?;
            let index_word = read_u16_le(&mut index)?;
            let mode = BlockMode::from_index_word(index_word);
            let base = (index_word & 0x3FFF) as usize * 2;
            let colors = sub_palette(mode, &texture.palette, base);

            for i in 0..16 {
                let slot = (word >> (2 * i)) & 3;
                let (x, y) = (bx * 4 + i % 4, by * 4 + i / 4);
                out[y * w + x] = colors[slot as usize].map_or(0, expand_555);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;

    fn texture(format: TextureFormat, texels: Vec<u8>, palette: Vec<u16>) -> Texture {
        Texture {
            format,
            width: 8,
            height: 8,
            color0_transparent: false,
            texels,
            index_data: Vec::new(),
            palette,
            palette_name: None,
        }
    }

    #[test]
    fn palette16_with_transparent_zero() {
        let mut tex = texture(TextureFormat::Palette16, vec![0x10; 32], vec![0x7FFF, 0x001F]);
        tex.color0_transparent = true;
        let px = render_texture(&tex).unwrap();
        assert_eq!(px[0], 0);
        assert_eq!(px[1], 0xFF00_00FF);
    }

    #[test]
    fn a3i5_expands_alpha() {
        let tex = texture(TextureFormat::A3i5, vec![0xE1; 64], vec![0, 0x7C00]);
        let px = render_texture(&tex).unwrap();
        assert!(px.iter().all(|&p| p == 0xFFFF_0000));
    }

    #[test]
    fn tex4x4_reads_modes() {
        let mut tex = texture(TextureFormat::Tex4x4, Vec::new(), vec![0x001F, 0x03E0, 0x7C00, 0]);
        // Four blocks: every texel uses slot 1, except block 0 which uses slot 3.
        for block in 0..4 {
            let word: u32 = if block == 0 { 0xFFFF_FFFF } else { 0x5555_5555 };
            tex.texels.extend_from_slice(&word.to_le_bytes());
            tex.index_data.extend_from_slice(&0u16.to_le_bytes());
        }
        let px = render_texture(&tex).unwrap();
        assert_eq!(px[0], 0);
        assert_eq!(px[4], 0xFF00_FF00);
    }

    #[test]
    fn short_4x4_data_is_malformed() {
        let tex = texture(TextureFormat::Tex4x4, vec![0; 4], vec![0; 2]);
        assert!(matches!(render_texture(&tex), Err(ConvertError::Malformed(_))));
    }
}
