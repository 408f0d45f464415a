//! Luma/chroma transforms used by every error metric in the crate.

use super::{alpha, blue, green, pack, red, Rgba32};

/// Integer YIQ with alpha carried alongside. `y` is in `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Yiq {
    pub y: i32,
    pub i: i32,
    pub q: i32,
    pub a: i32,
}

pub fn rgb_to_yiq(c: Rgba32) -> Yiq {
    let r = red(c) as f64;
    let g = green(c) as f64;
    let b = blue(c) as f64;

    let y = 0.29900 * r + 0.58700 * g + 0.11400 * b;
    let i = 0.59600 * r - 0.27400 * g - 0.32200 * b;
    let q = 0.21100 * r - 0.52300 * g + 0.31200 * b;

    Yiq {
        y: (y.round() as i32).clamp(0, 255),
        i: i.round() as i32,
        q: q.round() as i32,
        a: alpha(c) as i32,
    }
}

/// Inverse transform from (possibly fractional) YIQ, clamped to valid channels.
pub fn yiq_to_rgb(y: f64, i: f64, q: f64, a: f64) -> Rgba32 {
    let r = y + 0.95617 * i + 0.62143 * q;
    let g = y - 0.27269 * i - 0.64681 * q;
    let b = y - 1.10374 * i + 1.70062 * q;

    let to_u8 = |v: f64| v.round().clamp(0.0, 255.0) as u8;
    pack(to_u8(r), to_u8(g), to_u8(b), to_u8(a))
}

/// YUV of a channel difference. Each component truncates toward zero.
#[inline]
pub fn rgb_to_yuv(dr: i32, dg: i32, db: i32) -> (i32, i32, i32) {
    let (r, g, b) = (dr as f64, dg as f64, db as f64);
    let y = (0.2990 * r + 0.5870 * g + 0.1140 * b) as i32;
    let u = (-0.1684 * r - 0.3316 * g + 0.5000 * b) as i32;
    let v = (0.5000 * r - 0.4187 * g - 0.0813 * b) as i32;
    (y, u, v)
}

/// `4*dy² + du² + dv²` between two colours. Alpha is ignored.
#[inline]
pub fn yuv_distance(a: Rgba32, b: Rgba32) -> i64 {
    let dr = red(b) as i32 - red(a) as i32;
    let dg = green(b) as i32 - green(a) as i32;
    let db = blue(b) as i32 - blue(a) as i32;
    let (y, u, v) = rgb_to_yuv(dr, dg, db);
    4 * (y as i64 * y as i64) + u as i64 * u as i64 + v as i64 * v as i64
}
