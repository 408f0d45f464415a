//! Nearest-colour search under the `4*dy² + du² + dv²` metric.

use crate::color::{blue, green, red, rgb_to_yuv, same_rgb, yuv_distance, Rgba32};

/// Index of the palette entry closest to `color`.
///
/// An exact 24-bit match always wins, first occurrence first. Otherwise the entry with the
/// smallest weighted YUV distance is returned, the earliest one on ties. An empty palette
/// yields 0.
pub fn closest_color_index(color: Rgba32, palette: &[Rgba32]) -> usize {
    if let Some(exact) = palette.iter().position(|&entry| same_rgb(entry, color)) {
        return exact;
    }

    let mut best = 0;
    let mut best_distance = i64::MAX;
    for (i, &entry) in palette.iter().enumerate() {
        let d = yuv_distance(color, entry);
        if d < best_distance {
            best_distance = d;
            best = i;
        }
    }
    best
}

/// Total matcher distance of every pixel at or above `alpha_threshold` to its closest entry.
///
/// Returns `max_error` as soon as the running total reaches it. A `max_error` of 0 means no bound.
pub fn compute_palette_error(
    px: &[Rgba32],
    palette: &[Rgba32],
    alpha_threshold: u8,
    max_error: u64,
) -> u64 {
    let max_error = if max_error == 0 { u64::MAX } else { max_error };
    if palette.is_empty() {
        return max_error;
    }

    let mut error: u64 = 0;
    for &p in px {
        if ((p >> 24) as u8) < alpha_threshold {
            continue;
        }
        let chosen = palette[closest_color_index(p, palette)];
        let (dy, du, dv) = rgb_to_yuv(
            red(chosen) as i32 - red(p) as i32,
            green(chosen) as i32 - green(p) as i32,
            blue(chosen) as i32 - blue(p) as i32,
        );

        error = error.saturating_add(4 * (dy * dy) as u64);
        if error >= max_error {
            return max_error;
        }
        error = error.saturating_add((du * du + dv * dv) as u64);
        if error >= max_error {
            return max_error;
        }
    }
    error
}
