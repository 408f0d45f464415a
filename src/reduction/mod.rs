//! # Reduction Context
//!
//! Per-conversion bundle of perceptual weights and histogram state. Every palette build, palette
//! choice and character match in a conversion goes through the same context so that the whole
//! run agrees on what "closest" means.

pub mod histogram;
pub mod median_cut;

use serde::{Deserialize, Serialize};

use crate::color::{rgb_to_yiq, Rgba32, Yiq, ALPHA_THRESHOLD};

pub use histogram::{HistEntry, Histogram};

/// Exponent of the luma remap curve.
const LUMA_GAMMA: f64 = 1.27;

/// Scale applied to alpha differences when they enter a block error.
pub const ALPHA_ERROR_SCALE: f64 = 40.0;

/// Slider positions used to weight luma against chroma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceParams {
    /// 0 favours luma accuracy, 255 favours chroma accuracy.
    pub balance: u8,
    /// 0 favours the I (orange/blue) axis, 255 the Q (purple/green) axis.
    pub color_balance: u8,
    /// Give saturated colours extra histogram weight.
    pub enhance_colors: bool,
}

impl Default for BalanceParams {
    fn default() -> Self {
        Self {
            balance: 128,
            color_balance: 128,
            enhance_colors: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReductionContext {
    pub n_colors: usize,
    pub alpha_threshold: u8,
    y_weight: f64,
    i_weight: f64,
    q_weight: f64,
    enhance_colors: bool,
    luma_table: Box<[f64; 256]>,
    histogram: Histogram,
    palette: Vec<Rgba32>,
}

impl ReductionContext {
    pub fn new(balance: &BalanceParams, n_colors: usize) -> Self {
        // Sliders span 0..=255 and map onto a 0..=40 weight range.
        let b = balance.balance as f64 * 40.0 / 255.0;
        let c = balance.color_balance as f64 * 40.0 / 255.0;

        let mut luma_table = Box::new([0.0f64; 256]);
        for (i, entry) in luma_table.iter_mut().enumerate() {
            *entry = (i as f64 / 255.0).powf(LUMA_GAMMA) * 255.0;
        }

        Self {
            n_colors,
            alpha_threshold: ALPHA_THRESHOLD,
            y_weight: (60.0 - b) / 40.0,
            i_weight: (40.0 - c) / 40.0,
            q_weight: c / 40.0,
            enhance_colors: balance.enhance_colors,
            luma_table,
            histogram: Histogram::default(),
            palette: Vec::new(),
        }
    }

    pub fn y_weight(&self) -> f64 {
        self.y_weight
    }

    pub fn i_weight(&self) -> f64 {
        self.i_weight
    }

    pub fn q_weight(&self) -> f64 {
        self.q_weight
    }

    pub fn luma(&self, y: i32) -> f64 {
        self.luma_table[y.clamp(0, 255) as usize]
    }

    /// The space median cut and k-means work in.
    pub fn weighted_coords(&self, yiq: &Yiq) -> [f64; 3] {
        [
            self.y_weight * self.luma(yiq.y),
            self.i_weight * yiq.i as f64,
            self.q_weight * yiq.q as f64,
        ]
    }

    /// Weighted squared colour distance, alpha excluded.
    pub fn yiq_distance(&self, a: &Yiq, b: &Yiq) -> f64 {
        let dy = self.y_weight * (self.luma(a.y) - self.luma(b.y));
        let di = self.i_weight * (a.i - b.i) as f64;
        let dq = self.q_weight * (a.q - b.q) as f64;
        dy * dy + di * di + dq * dq
    }

    /// Index of the closest entry under [`Self::yiq_distance`], first wins on ties.
    pub fn closest_yiq(&self, yiq: &Yiq, palette: &[Yiq]) -> usize {
        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (i, entry) in palette.iter().enumerate() {
            let d = self.yiq_distance(yiq, entry);
            if d < best_distance {
                best_distance = d;
                best = i;
            }
        }
        best
    }

    /// Sum of weighted distances from each opaque pixel to its closest palette entry.
    ///
    /// Stops and returns `max_error` as soon as the running sum reaches it.
    pub fn palette_error(
        &self,
        px: &[Rgba32],
        palette: &[Rgba32],
        alpha_threshold: u8,
        max_error: f64,
    ) -> f64 {
        if palette.is_empty() {
            return max_error;
        }
        let pal_yiq: Vec<Yiq> = palette.iter().map(|&c| rgb_to_yiq(c)).collect();

        let mut error = 0.0;
        for &p in px {
            if ((p >> 24) as u8) < alpha_threshold {
                continue;
            }
            let yiq = rgb_to_yiq(p);
            let best = self.closest_yiq(&yiq, &pal_yiq);
            error += self.yiq_distance(&yiq, &pal_yiq[best]);
            if error >= max_error {
                return max_error;
            }
        }
        error
    }

    /// Accumulate a pixel block into the histogram.
    pub fn compute_histogram(&mut self, px: &[Rgba32]) {
        let threshold = self.alpha_threshold;
        let enhance = self.enhance_colors;
        for &p in px {
            if ((p >> 24) as u8) < threshold {
                continue;
            }
            self.histogram.add(p, enhance);
        }
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn reset_histogram(&mut self) {
        self.histogram.clear();
    }

    /// Build a palette of exactly `n_colors` entries from the accumulated histogram.
    ///
    /// Slots the data cannot fill are left as opaque black.
    pub fn optimize_palette(&mut self) -> &[Rgba32] {
        let entries = self.histogram.flatten();
        let mut palette = median_cut::reduce(self, &entries, self.n_colors);
        palette.resize(self.n_colors, 0xFF00_0000);
        self.palette = palette;
        &self.palette
    }

    /// Result of the last [`Self::optimize_palette`] call.
    pub fn palette(&self) -> &[Rgba32] {
        &self.palette
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::pack;

    #[test]
    fn default_weights_are_balanced() {
        let ctx = ReductionContext::new(&BalanceParams::default(), 16);
        assert!(ctx.y_weight > ctx.i_weight);
        assert!((ctx.i_weight - ctx.q_weight).abs() < 0.01);
    }

    #[test]
    fn luma_table_is_monotonic_and_anchored() {
        let ctx = ReductionContext::new(&BalanceParams::default(), 16);
        assert_eq!(ctx.luma(0), 0.0);
        assert!((ctx.luma(255) - 255.0).abs() < 1e-9);
        for y in 1..256 {
            assert!(ctx.luma(y) > ctx.luma(y - 1));
        }
        // The curve pulls mid tones down.
        assert!(ctx.luma(128) < 128.0);
    }

    #[test]
    fn palette_error_skips_transparent_pixels() {
        let ctx = ReductionContext::new(&BalanceParams::default(), 2);
        let px = [pack(255, 255, 255, 0); 16];
        let palette = [pack(0, 0, 0, 255)];
        assert_eq!(ctx.palette_error(&px, &palette, 128, f64::INFINITY), 0.0);
    }

    #[test]
    fn palette_error_stops_at_max() {
        let ctx = ReductionContext::new(&BalanceParams::default(), 2);
        let px = [pack(255, 255, 255, 255); 16];
        let palette = [pack(0, 0, 0, 255)];
        assert_eq!(ctx.palette_error(&px, &palette, 128, 10.0), 10.0);
    }

    #[test]
    fn optimize_pads_to_requested_size() {
        let mut ctx = ReductionContext::new(&BalanceParams::default(), 8);
        ctx.compute_histogram(&[pack(255, 0, 0, 255), pack(0, 0, 255, 255)]);
        let palette = ctx.optimize_palette().to_vec();
        assert_eq!(palette.len(), 8);
        assert!(palette.contains(&pack(255, 0, 0, 255)));
        assert!(palette.contains(&pack(0, 0, 255, 255)));
    }
}
