//! Linear paletted texel layouts. Rows are packed low bit-group first and padded to a whole
//! byte, so a 3-pixel row at 2 bits per pixel still takes one byte.

use crate::error::{ConvertError, Result};

fn check_depth(depth: u8) -> Result<()> {
    match depth {
        2 | 4 | 8 => Ok(()),
        other => Err(ConvertError::InvalidDepth(other)),
    }
}

/// Bytes one packed row takes.
pub fn row_bytes(width: usize, depth: u8) -> usize {
    (width * depth as usize).div_ceil(8)
}

pub fn encode_indexed(indices: &[u8], width: usize, height: usize, depth: u8) -> Result<Vec<u8>> {
    check_depth(depth)?;
    if indices.len() != width * height {
        return Err(ConvertError::BufferMismatch {
            len: indices.len(),
            expected: width * height,
        });
    }

    let depth = depth as usize;
    let mask = ((1u16 << depth) - 1) as u8;
    let stride = row_bytes(width, depth as u8);
    let mut out = vec![0u8; stride * height];
    for y in 0..height {
        let row = &mut out[y * stride..(y + 1) * stride];
        for x in 0..width {
            let bit = x * depth;
            row[bit / 8] |= (indices[y * width + x] & mask) << (bit % 8);
        }
    }
    Ok(out)
}

pub fn decode_indexed(data: &[u8], width: usize, height: usize, depth: u8) -> Result<Vec<u8>> {
    check_depth(depth)?;
    let stride = row_bytes(width, depth);
    if data.len() < stride * height {
        return Err(ConvertError::BufferMismatch {
            len: data.len(),
            expected: stride * height,
        });
    }

    let depth = depth as usize;
    let mask = ((1u16 << depth) - 1) as u8;
    let mut indices = Vec::with_capacity(width * height);
    for y in 0..height {
        let row = &data[y * stride..(y + 1) * stride];
        for x in 0..width {
            let bit = x * depth;
            indices.push((row[bit / 8] >> (bit % 8)) & mask);
        }
    }
    Ok(indices)
}
