//! # Character Compression
//!
//! Palette choice per tile, flip-aware deduplication of the quantised tiles and, when a bank is
//! already populated, best-fit matching against its characters.

use std::{collections::HashMap, hash::BuildHasherDefault};

use tracing::{debug, info, warn};
use twox_hash::XxHash64;

use super::{BgTile, BlockBank, BlockCompression, BlockRef, FlipMode};
use crate::color::{rgb_to_yiq, Rgba32, Yiq, ALPHA_THRESHOLD};
use crate::error::{ConvertError, Result, Truncated};
use crate::palette::dither_to_palette;
use crate::progress::ProgressState;
use crate::reduction::{BalanceParams, ReductionContext, ALPHA_ERROR_SCALE};

type IndexMap = HashMap<Vec<u8>, usize, BuildHasherDefault<XxHash64>>;

/// Everything tile matching needs to agree on: weights, the full sub-palettes and which slice of
/// each sub-palette holds generated colours.
pub struct MatchContext<'a> {
    reduction: ReductionContext,
    palettes: Vec<Vec<Rgba32>>,
    palettes_yiq: Vec<Vec<Yiq>>,
    offset: usize,
    size: usize,
    progress: &'a ProgressState,
}

impl<'a> MatchContext<'a> {
    /// `palettes` are whole sub-palettes (16 or 256 colours). Colours `offset..offset + size`
    /// are the usable ones; when `offset` is 0 the first of them is reserved for transparency,
    /// and `size` grows to keep at least one colour after it.
    pub fn new(
        balance: &BalanceParams,
        palettes: Vec<Vec<Rgba32>>,
        offset: usize,
        size: usize,
        progress: &'a ProgressState,
    ) -> Self {
        let palettes_yiq = palettes
            .iter()
            .map(|p| p.iter().map(|&c| rgb_to_yiq(c)).collect())
            .collect();
        let reserved = usize::from(offset == 0);
        let size = size.max(reserved + 1);
        Self {
            reduction: ReductionContext::new(balance, size - reserved),
            palettes,
            palettes_yiq,
            offset,
            size,
            progress,
        }
    }

    pub fn n_palettes(&self) -> usize {
        self.palettes.len()
    }

    /// First index that holds a generated colour.
    pub fn first_index(&self) -> usize {
        self.offset + usize::from(self.offset == 0)
    }

    /// The generated colours of sub-palette `p`.
    pub fn content(&self, p: usize) -> &[Rgba32] {
        let palette = &self.palettes[p];
        let end = (self.offset + self.size).min(palette.len());
        let start = self.first_index().min(end);
        &palette[start..end]
    }

    pub fn progress(&self) -> &ProgressState {
        self.progress
    }

    /// Weighted YIQ error of showing `character` (flipped by `flip`) with sub-palette `p` in
    /// place of `px`. Returns `max_error` once the running total reaches it.
    ///
    /// Index 0 counts as fully transparent. A transparent character pixel over a source pixel
    /// below the alpha threshold costs nothing.
    pub fn char_error(&self, px: &[Rgba32], p: usize, character: &[u8], flip: FlipMode, max_error: f64) -> f64 {
        let dim = (character.len() as f64).sqrt() as usize;
        let pal = &self.palettes_yiq[p];
        let ctx = &self.reduction;

        let mut error = 0.0;
        for (i, &index) in character.iter().enumerate() {
            let yiq = rgb_to_yiq(px[flip.source_index(i, dim)]);
            let matched_alpha = if index > 0 { 255 } else { 0 };
            if matched_alpha == 0 && yiq.a < ALPHA_THRESHOLD as i32 {
                continue;
            }
            let matched = pal.get(index as usize).copied().unwrap_or_default();

            let dy = ctx.y_weight() * (ctx.luma(yiq.y) - ctx.luma(matched.y));
            let di = ctx.i_weight() * (yiq.i - matched.i) as f64;
            let dq = ctx.q_weight() * (yiq.q - matched.q) as f64;
            let da = ALPHA_ERROR_SCALE * (yiq.a - matched_alpha) as f64;

            error += dy * dy + da * da;
            if error >= max_error {
                return max_error;
            }
            error += di * di + dq * dq;
            if error >= max_error {
                return max_error;
            }
        }
        error
    }

    /// Lowest [`Self::char_error`] over the four flips. A perfect fit returns immediately;
    /// otherwise the earliest flip wins ties.
    pub fn best_char_error(&self, px: &[Rgba32], p: usize, character: &[u8], max_error: f64) -> (f64, FlipMode) {
        let mut best = (f64::INFINITY, FlipMode::None);
        for flip in FlipMode::ALL {
            let err = self.char_error(px, p, character, flip, max_error);
            if err == 0.0 {
                return (0.0, flip);
            }
            if err < best.0 {
                best = (err, flip);
            }
        }
        best
    }

    /// Sub-palette with the least error for `px`, earliest on ties.
    pub fn best_palette(&self, px: &[Rgba32]) -> usize {
        let mut best = 0;
        let mut least = f64::INFINITY;
        for p in 0..self.palettes.len() {
            let err = self
                .reduction
                .palette_error(px, self.content(p), ALPHA_THRESHOLD, least);
            if err < least {
                least = err;
                best = p;
            }
        }
        best
    }

    /// Quantise `px` against sub-palette `p`. Transparent pixels get index 0, as does every
    /// pixel when the sub-palette is too short to hold any generated colour.
    pub fn quantize(&self, px: &[Rgba32], dim: usize, p: usize, diffuse: f32) -> Vec<u8> {
        let content = self.content(p);
        if content.is_empty() {
            return vec![0; px.len()];
        }
        let first = self.first_index();
        let dithered = dither_to_palette(px, dim, dim, content, diffuse);
        px.iter()
            .zip(dithered)
            .map(|(&c, index)| {
                if ((c >> 24) as u8) < ALPHA_THRESHOLD {
                    0
                } else {
                    (index as usize + first) as u8
                }
            })
            .collect()
    }
}

/// Choose a palette for every tile and quantise it. Advances progress by one per tile.
pub fn setup_tiles(tiles: &mut [BgTile], ctx: &MatchContext, dither: bool, diffuse: f32) -> Result<()> {
    let amount = if dither { diffuse } else { 0.0 };
    for tile in tiles.iter_mut() {
        ctx.progress.check_cancel()?;
        tile.palette = ctx.best_palette(&tile.px);
        tile.indices = ctx.quantize(&tile.px, tile.dim, tile.palette, amount);
        ctx.progress.advance(1);
    }
    Ok(())
}

/// Reduce quantised tiles to a character bank of at most `max_blocks` characters.
///
/// With `match_existing`, no characters are created: every tile takes the (character, palette,
/// flip) of least error from the given bank, enumerated character first, then palette, then
/// flip. Without it, tiles whose indices are identical under some flip share the character of
/// the first such tile in scan order. If more characters remain than the budget allows, the
/// cheapest masters are folded into earlier ones and the overflow is reported as
/// [`Truncated`].
pub fn compress_to_blocks(
    tiles: &mut [BgTile],
    max_blocks: usize,
    match_existing: Option<&BlockBank>,
    ctx: &MatchContext,
) -> Result<BlockCompression> {
    match match_existing {
        Some(bank) => match_bank(tiles, bank, ctx),
        None => compress_new(tiles, max_blocks.max(1), ctx),
    }
}

fn match_bank(tiles: &mut [BgTile], bank: &BlockBank, ctx: &MatchContext) -> Result<BlockCompression> {
    if bank.is_empty() {
        return Err(ConvertError::MissingInput("characters"));
    }
    info!("matching {} tiles against {} existing characters", tiles.len(), bank.len());
    let mut refs = Vec::with_capacity(tiles.len());

    for (t, tile) in tiles.iter_mut().enumerate() {
        ctx.progress.check_cancel()?;
        let mut chosen = (0, 0, FlipMode::None);
        let mut min_error = f64::INFINITY;
        for (j, character) in bank.characters.iter().enumerate() {
            for p in 0..ctx.n_palettes() {
                let (err, flip) = ctx.best_char_error(&tile.px, p, character, min_error);
                if err < min_error {
                    min_error = err;
                    chosen = (j, p, flip);
                }
            }
        }

        let (char_index, palette, flip) = chosen;
        tile.master = t;
        tile.palette = palette;
        tile.flip = flip;
        if let Some(character) = bank.characters.get(char_index) {
            tile.indices = flip.apply(character, tile.dim);
        }
        refs.push(BlockRef {
            master: t,
            char_index,
            palette,
            flip,
        });
        ctx.progress.advance(1);
    }

    Ok(BlockCompression {
        bank: bank.clone(),
        refs,
        truncated: None,
    })
}

fn compress_new(tiles: &mut [BgTile], max_blocks: usize, ctx: &MatchContext) -> Result<BlockCompression> {
    let dim = tiles.first().map_or(8, |t| t.dim);

    // Masters by their stored indices.
    let mut seen = IndexMap::default();
    for t in 0..tiles.len() {
        ctx.progress.check_cancel()?;
        let found = FlipMode::ALL
            .iter()
            .filter_map(|&flip| {
                let key = flip.apply(&tiles[t].indices, dim);
                seen.get(&key).map(|&m| (m, flip))
            })
            .min_by_key(|&(m, _)| m);

        match found {
            Some((m, flip)) => {
                tiles[t].master = m;
                tiles[t].flip = flip;
                tiles[t].n_represents = 0;
                tiles[m].n_represents += 1;
            }
            None => {
                tiles[t].master = t;
                tiles[t].flip = FlipMode::None;
                tiles[t].n_represents = 1;
                seen.insert(tiles[t].indices.clone(), t);
            }
        }
        ctx.progress.advance(1);
    }

    let n_masters = seen.len();
    debug!("{} tiles deduplicated to {} characters", tiles.len(), n_masters);

    let truncated = if n_masters > max_blocks {
        warn!(
            "{} characters needed but only {} allowed; merging the closest",
            n_masters, max_blocks
        );
        merge_masters(tiles, n_masters - max_blocks, ctx)?;
        Some(Truncated {
            requested: n_masters,
            actual: max_blocks,
        })
    } else {
        None
    };

    let mut slots = vec![usize::MAX; tiles.len()];
    let mut characters = Vec::new();
    for (t, tile) in tiles.iter().enumerate() {
        if tile.is_master(t) {
            slots[t] = characters.len();
            characters.push(tile.indices.clone());
        }
    }

    let refs = tiles
        .iter()
        .map(|tile| BlockRef {
            master: tile.master,
            char_index: slots[tile.master],
            palette: tile.palette,
            flip: tile.flip,
        })
        .collect();

    Ok(BlockCompression {
        bank: BlockBank { dim, characters },
        refs,
        truncated,
    })
}

/// Fold `count` masters into earlier masters, cheapest first.
///
/// Each master after the first is scored by its best fit among the masters before it. Chains
/// are resolved afterwards so every tile points at a surviving master with the composed flip.
fn merge_masters(tiles: &mut [BgTile], count: usize, ctx: &MatchContext) -> Result<()> {
    let masters: Vec<usize> = (0..tiles.len()).filter(|&t| tiles[t].is_master(t)).collect();

    let mut candidates = Vec::with_capacity(masters.len());
    for (k, &m) in masters.iter().enumerate().skip(1) {
        ctx.progress.check_cancel()?;
        let tile = &tiles[m];
        let mut best = (f64::INFINITY, masters[0], FlipMode::None);
        for &target in &masters[..k] {
            let (err, flip) = ctx.best_char_error(&tile.px, tile.palette, &tiles[target].indices, best.0);
            if err < best.0 {
                best = (err, target, flip);
            }
        }
        candidates.push((best.0, m, best.1, best.2));
    }
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    for &(_, m, target, flip) in candidates.iter().take(count) {
        tiles[m].master = target;
        tiles[m].flip = flip;
    }

    // Targets are always earlier, so one forward pass resolves every chain.
    for t in 0..tiles.len() {
        let m = tiles[t].master;
        if m == t {
            continue;
        }
        let parent = tiles[m].master;
        if parent != m {
            tiles[t].master = parent;
            tiles[t].flip = tiles[t].flip.compose(tiles[m].flip);
        }
    }

    for t in 0..tiles.len() {
        tiles[t].n_represents = 0;
    }
    for t in 0..tiles.len() {
        let m = tiles[t].master;
        tiles[m].n_represents += 1;
    }
    Ok(())
}
