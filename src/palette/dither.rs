//! Floyd-Steinberg error diffusion onto a fixed palette.

use super::matcher::closest_color_index;
use crate::color::{alpha, blue, green, red, Rgba32, ALPHA_THRESHOLD};

/// Kernel as `(dx, dy, sixteenths)`.
const KERNEL: [(isize, usize, f32); 4] = [(1, 0, 7.0), (-1, 1, 3.0), (0, 1, 5.0), (1, 1, 1.0)];

/// Per-channel error `[r, g, b, a]` of a pixel against the colour it was mapped to.
pub(crate) type ChannelError = [i32; 4];

pub(crate) fn channel_error(source: Rgba32, chosen: Rgba32) -> ChannelError {
    [
        red(source) as i32 - red(chosen) as i32,
        green(source) as i32 - green(chosen) as i32,
        blue(source) as i32 - blue(chosen) as i32,
        alpha(source) as i32 - alpha(chosen) as i32,
    ]
}

/// Spread `error` from pixel `i` onto its unvisited neighbours, scaled by `amount`.
///
/// Each channel saturates to `0..=255` after the addition.
pub(crate) fn diffuse(
    work: &mut [Rgba32],
    i: usize,
    width: usize,
    height: usize,
    error: ChannelError,
    amount: f32,
) {
    let x = i % width;
    let y = i / width;

    for &(dx, dy, weight) in &KERNEL {
        let nx = x as isize + dx;
        let ny = y + dy;
        if nx < 0 || nx as usize >= width || ny >= height {
            continue;
        }
        let n = ny * width + nx as usize;
        let target = work[n];

        let mut out = 0u32;
        for (channel, &e) in error.iter().enumerate() {
            let shift = channel * 8;
            let current = ((target >> shift) & 0xFF) as f32;
            let v = (current + e as f32 * weight * amount / 16.0) as i32;
            out |= (v.clamp(0, 255) as u32) << shift;
        }
        work[n] = out;
    }
}

/// Map every pixel to a palette index, diffusing the error of opaque pixels.
///
/// Alpha error travels with the colour error, so a translucent pixel can push its neighbours
/// under the alpha threshold. `diffuse` scales the kernel (0 disables dithering). Pixels below
/// the alpha threshold still get an index and still absorb error from their neighbours, but
/// never pass their own on.
pub fn dither_to_palette(
    pixels: &[Rgba32],
    width: usize,
    height: usize,
    palette: &[Rgba32],
    diffuse_amount: f32,
) -> Vec<u8> {
    let mut work = pixels.to_vec();
    let mut indices = vec![0u8; work.len()];

    for i in 0..work.len().min(width * height) {
        let p = work[i];
        let index = closest_color_index(p, palette);
        indices[i] = index as u8;

        if diffuse_amount <= 0.0 || alpha(p) < ALPHA_THRESHOLD || palette.is_empty() {
            continue;
        }
        let error = channel_error(p, palette[index]);
        if error != [0; 4] {
            diffuse(&mut work, i, width, height, error, diffuse_amount);
        }
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::pack;

    #[test]
    fn diffusion_saturates() {
        let mut work = vec![pack(250, 5, 0, 255), pack(250, 5, 0, 255)];
        diffuse(&mut work, 0, 2, 1, [160, -160, 0, 0], 1.0);
        assert_eq!(work[1], pack(255, 0, 0, 255));
    }

    #[test]
    fn diffusion_respects_edges() {
        // Bottom-right pixel has no unvisited neighbours.
        let mut work = vec![pack(10, 10, 10, 255); 4];
        diffuse(&mut work, 3, 2, 2, [100, 100, 100, 0], 1.0);
        assert!(work.iter().all(|&p| p == pack(10, 10, 10, 255)));
    }

    #[test]
    fn grey_dithers_between_black_and_white() {
        let palette = [pack(0, 0, 0, 255), pack(255, 255, 255, 255)];
        let px = vec![pack(128, 128, 128, 255); 64];
        let indices = dither_to_palette(&px, 8, 8, &palette, 1.0);
        let whites = indices.iter().filter(|&&i| i == 1).count();
        assert!(whites > 16 && whites < 48, "{whites}");

        let flat = dither_to_palette(&px, 8, 8, &palette, 0.0);
        assert!(flat.iter().all(|&i| i == flat[0]));
    }

    #[test]
    fn alpha_error_is_diffused() {
        let palette = [pack(0, 0, 0, 255), pack(255, 255, 255, 255)];
        // The first pixel drags the second under the threshold, so the second keeps its grey
        // error to itself and the third stays black.
        let px = vec![pack(0, 0, 0, 130), pack(100, 100, 100, 170), pack(100, 100, 100, 255)];
        assert_eq!(dither_to_palette(&px, 3, 1, &palette, 1.0), vec![0, 0, 0]);

        let opaque = vec![pack(0, 0, 0, 255), pack(100, 100, 100, 255), pack(100, 100, 100, 255)];
        assert_eq!(dither_to_palette(&opaque, 3, 1, &palette, 1.0), vec![0, 0, 1]);
    }

    #[test]
    fn transparent_pixels_do_not_spread_error() {
        let palette = [pack(0, 0, 0, 255), pack(255, 255, 255, 255)];
        // The transparent grey would push its right neighbour to white if it diffused.
        let px = vec![pack(120, 120, 120, 0), pack(100, 100, 100, 255)];
        let indices = dither_to_palette(&px, 2, 1, &palette, 1.0);
        assert_eq!(indices, vec![0, 0]);
    }
}
