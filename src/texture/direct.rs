//! 16-bit direct colour texels: RGB555 with bit 15 marking opaque pixels.

use crate::binary_utils::push_u16_le;
use crate::color::{alpha, expand_555, reduce_to_555, round_to_555, Rgba32, ALPHA_THRESHOLD};
use crate::palette::dither::{channel_error, diffuse};

const OPAQUE_BIT: u16 = 0x8000;

/// Encode pixels, diffusing the 555 rounding error of opaque pixels when `diffuse_amount > 0`.
pub fn encode_direct(pixels: &[Rgba32], width: usize, height: usize, diffuse_amount: f32) -> Vec<u8> {
    let mut work = pixels.to_vec();
    let mut out = Vec::with_capacity(pixels.len() * 2);
    for i in 0..work.len() {
        let p = work[i];
        if alpha(p) < ALPHA_THRESHOLD {
            push_u16_le(&mut out, 0);
            continue;
        }
        push_u16_le(&mut out, reduce_to_555(p) | OPAQUE_BIT);
        if diffuse_amount > 0.0 {
            let mut error = channel_error(p, round_to_555(p));
            error[3] = 0;
            if error != [0; 4] {
                diffuse(&mut work, i, width, height, error, diffuse_amount);
            }
        }
    }
    out
}

pub fn decode_direct(data: &[u8]) -> Vec<Rgba32> {
    data.chunks_exact(2)
        .map(|pair| {
            let c = u16::from_le_bytes([pair[0], pair[1]]);
            if c & OPAQUE_BIT != 0 {
                expand_555(c & 0x7FFF)
            } else {
                0
            }
        })
        .collect()
}
