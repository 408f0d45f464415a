//! # Palette Generation
//!
//! Builds hardware palettes from true-colour pixels: a single palette for a whole image, or a
//! set of palettes partitioned across 8x8 tiles for backgrounds. Nearest-colour search and
//! dithering live in the submodules.

pub mod dither;
pub mod matcher;

use std::collections::HashSet;

use tracing::debug;

use crate::color::{alpha, blue, green, red, rgb_to_yiq, Rgba32, ALPHA_THRESHOLD, TRANSPARENT_MAGIC};
use crate::error::Result;
use crate::progress::ProgressState;
use crate::reduction::{BalanceParams, ReductionContext};

pub use dither::dither_to_palette;
pub use matcher::{closest_color_index, compute_palette_error};

const TILE_PIXELS: usize = 64;
const REASSIGN_PASSES: usize = 2;
const PAD_COLOR: Rgba32 = 0xFF00_0000;

/// Build a palette of exactly `target_size` entries.
///
/// With `reserve_transparent`, entry 0 is [`TRANSPARENT_MAGIC`] and the remaining
/// `target_size - 1` entries come from the image.
pub fn create_palette(
    pixels: &[Rgba32],
    target_size: usize,
    reserve_transparent: bool,
    balance: &BalanceParams,
) -> Vec<Rgba32> {
    if target_size == 0 {
        return Vec::new();
    }
    let reserved = usize::from(reserve_transparent);
    let mut ctx = ReductionContext::new(balance, target_size - reserved);
    ctx.compute_histogram(pixels);
    debug!(
        "palette: {} distinct colours for {} slots",
        ctx.histogram().len(),
        target_size - reserved
    );

    let mut palette = Vec::with_capacity(target_size);
    if reserve_transparent {
        palette.push(TRANSPARENT_MAGIC);
    }
    palette.extend_from_slice(ctx.optimize_palette());
    palette
}

/// Entry point name used by callers that think in terms of quantisation.
pub fn quantize_to_palette(
    pixels: &[Rgba32],
    target_colors: usize,
    reserve_transparent: bool,
    balance: &BalanceParams,
) -> Vec<Rgba32> {
    create_palette(pixels, target_colors, reserve_transparent, balance)
}

/// Sort key for [`sort_by_lightness`].
pub fn lightness_key(c: Rgba32) -> i32 {
    red(c) as i32 * 299 + green(c) as i32 * 587 + blue(c) as i32 * 114
}

/// Ascending by lightness. Equal keys keep their order.
pub fn sort_by_lightness(palette: &mut [Rgba32]) {
    palette.sort_by_key(|&c| lightness_key(c));
}

/// Copy the `dim`x`dim` tile at `(tx, ty)` out of a `width`-wide image.
pub(crate) fn extract_tile(pixels: &[Rgba32], width: usize, tx: usize, ty: usize, dim: usize) -> Vec<Rgba32> {
    let mut tile = Vec::with_capacity(dim * dim);
    for row in 0..dim {
        let start = (ty * dim + row) * width + tx * dim;
        tile.extend_from_slice(&pixels[start..start + dim]);
    }
    tile
}

/// Build `n_palettes` palettes of `palette_size` entries for a tiled image.
///
/// Tiles are grouped by recursively splitting their mean colours, then regrouped by palette
/// error. Each palette is sorted by lightness after the reserved entry. A group that ends up
/// with no tiles keeps the palette it had before.
#[allow(clippy::too_many_arguments)]
pub fn create_multiple_palettes(
    pixels: &[Rgba32],
    width: usize,
    tiles_x: usize,
    tiles_y: usize,
    n_palettes: usize,
    palette_size: usize,
    reserve_transparent: bool,
    balance: &BalanceParams,
    progress: &ProgressState,
) -> Result<Vec<Vec<Rgba32>>> {
    if n_palettes == 0 || palette_size == 0 {
        return Ok(Vec::new());
    }
    let reserved = usize::from(reserve_transparent);
    let n_content = palette_size - reserved;
    let mut ctx = ReductionContext::new(balance, n_content);

    let tiles: Vec<Vec<Rgba32>> = (0..tiles_y)
        .flat_map(|ty| (0..tiles_x).map(move |tx| (tx, ty)))
        .map(|(tx, ty)| extract_tile(pixels, width, tx, ty, 8))
        .collect();

    let mut groups = partition_by_mean(&ctx, &tiles, n_palettes);
    let mut palettes = vec![vec![PAD_COLOR; n_content]; n_palettes];
    rebuild_palettes(&mut ctx, &tiles, &groups, &mut palettes);

    for _ in 0..REASSIGN_PASSES {
        progress.check_cancel()?;
        for group in groups.iter_mut() {
            group.clear();
        }
        for (t, tile) in tiles.iter().enumerate() {
            if tile.iter().all(|&p| alpha(p) < ALPHA_THRESHOLD) {
                continue;
            }
            let mut best = 0;
            let mut best_error = f64::INFINITY;
            for (p, palette) in palettes.iter().enumerate() {
                let err = ctx.palette_error(tile, palette, ALPHA_THRESHOLD, best_error);
                if err < best_error {
                    best_error = err;
                    best = p;
                }
            }
            groups[best].push(t);
        }
        rebuild_palettes(&mut ctx, &tiles, &groups, &mut palettes);
    }

    debug!(
        "palettes: {} tiles over {} groups ({:?})",
        tiles.len(),
        n_palettes,
        groups.iter().map(Vec::len).collect::<Vec<_>>()
    );

    Ok(palettes
        .into_iter()
        .map(|mut content| {
            sort_by_lightness(&mut content);
            let mut palette = Vec::with_capacity(palette_size);
            if reserve_transparent {
                palette.push(TRANSPARENT_MAGIC);
            }
            palette.extend(content);
            palette
        })
        .collect())
}

fn rebuild_palettes(
    ctx: &mut ReductionContext,
    tiles: &[Vec<Rgba32>],
    groups: &[Vec<usize>],
    palettes: &mut [Vec<Rgba32>],
) {
    for (group, palette) in groups.iter().zip(palettes.iter_mut()) {
        ctx.reset_histogram();
        for &t in group {
            ctx.compute_histogram(&tiles[t]);
        }
        if ctx.histogram().is_empty() {
            continue;
        }
        *palette = ctx.optimize_palette().to_vec();
    }
}

/// Initial grouping: split the set of tile mean colours along its widest weighted axis until
/// there are `n` groups or nothing left to split. Fully transparent tiles join no group.
fn partition_by_mean(ctx: &ReductionContext, tiles: &[Vec<Rgba32>], n: usize) -> Vec<Vec<usize>> {
    let coords: Vec<Option<[f64; 3]>> = tiles
        .iter()
        .map(|tile| {
            let mean = average_color(tile);
            (mean != 0).then(|| ctx.weighted_coords(&rgb_to_yiq(mean)))
        })
        .collect();

    let mut groups: Vec<Vec<usize>> = vec![(0..tiles.len()).filter(|&t| coords[t].is_some()).collect()];

    let spread = |group: &[usize]| -> (usize, f64) {
        let mut best = (0, 0.0);
        for axis in 0..3 {
            let values = group.iter().filter_map(|&t| coords[t].map(|c| c[axis]));
            let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
            if hi - lo > best.1 {
                best = (axis, hi - lo);
            }
        }
        best
    };

    while groups.len() < n {
        let Some((target, axis)) = groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.len() >= 2)
            .map(|(i, g)| {
                let (axis, range) = spread(g);
                (i, axis, range * g.len() as f64)
            })
            .filter(|&(_, _, score)| score > 0.0)
            .max_by(|a, b| a.2.total_cmp(&b.2))
            .map(|(i, axis, _)| (i, axis))
        else {
            break;
        };

        let mut group = std::mem::take(&mut groups[target]);
        group.sort_by(|&a, &b| {
            let ca = coords[a].map_or(0.0, |c| c[axis]);
            let cb = coords[b].map_or(0.0, |c| c[axis]);
            ca.total_cmp(&cb)
        });
        let upper = group.split_off(group.len() / 2);
        groups[target] = group;
        groups.push(upper);
    }

    groups.resize(n, Vec::new());
    groups
}

/// Number of distinct opaque colours, plus one if any pixel is fully transparent.
pub fn count_colors(pixels: &[Rgba32]) -> usize {
    let mut seen = HashSet::new();
    let mut has_transparent = false;
    for &p in pixels {
        if alpha(p) == 0 {
            has_transparent = true;
        } else {
            seen.insert(p & 0xFF_FFFF);
        }
    }
    seen.len() + usize::from(has_transparent)
}

/// Alpha-weighted mean colour, returned opaque. 0 when every pixel is fully transparent.
pub fn average_color(pixels: &[Rgba32]) -> Rgba32 {
    let (mut tr, mut tg, mut tb, mut ta) = (0u64, 0u64, 0u64, 0u64);
    for &c in pixels {
        let a = alpha(c) as u64;
        if a == 0 {
            continue;
        }
        ta += a;
        tr += red(c) as u64 * a;
        tg += green(c) as u64 * a;
        tb += blue(c) as u64 * a;
    }
    if ta == 0 {
        return 0;
    }
    let r = (tr / ta).min(255) as u32;
    let g = (tg / ta).min(255) as u32;
    let b = (tb / ta).min(255) as u32;
    r | g << 8 | b << 16 | 0xFF00_0000
}

/// Whether any pixel is partially transparent (alpha in `5..=250`).
pub fn is_translucent(pixels: &[Rgba32]) -> bool {
    pixels.iter().any(|&p| (5..=250).contains(&alpha(p)))
}
