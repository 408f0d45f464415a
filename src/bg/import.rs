//! # Background Bitmap Import
//!
//! Converts a true-colour bitmap into background palette, character and screen data, optionally
//! merging into assets that already exist. Stages run in a fixed order and report through
//! [`ProgressState`]:
//!
//! `Init → Histogram → PaletteOptimize → PerBlockMatch → Deduplicate → Encode → Done`

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    compress_to_blocks, setup_tiles, split_blocks, BgTile, BlockBank, FlipMode, MatchContext,
    ScreenEntry,
};
use crate::binary_utils::{push_u16_le, read_u16_array};
use crate::color::{expand_555, reduce_to_555, Rgb555, Rgba32, TRANSPARENT_MAGIC};
use crate::error::{ConvertError, Result, Truncated};
use crate::palette::{create_multiple_palettes, sort_by_lightness};
use crate::progress::{ProgressState, Stage};
use crate::reduction::{BalanceParams, ReductionContext};
use crate::texture::indexed::{decode_indexed, encode_indexed};

const TILE: usize = 8;
const MAX_PALETTES: usize = 16;
const MAX_CHARACTERS: usize = 1024;

/// What happens to the screen during an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenMode {
    /// Generate screen entries from scratch.
    #[default]
    Rewrite,
    /// Keep each entry's character index, choose palette (and flip) per tile.
    KeepCharacters,
    /// Leave the screen untouched and regenerate characters through it.
    KeepScreen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BgImportConfig {
    /// Character depth, 4 or 8.
    pub bits: u8,
    pub n_palettes: usize,
    /// First palette number written to the screen.
    pub palette_base: usize,
    /// Colours used per palette, counted from `palette_offset`.
    pub palette_size: usize,
    pub palette_offset: usize,
    pub new_palettes: bool,
    pub new_characters: bool,
    pub screen_mode: ScreenMode,
    /// First character slot written.
    pub char_base: usize,
    pub max_chars: usize,
    /// Screen tile where the bitmap's top-left corner lands.
    pub origin_x: usize,
    pub origin_y: usize,
    pub dither: bool,
    pub diffuse: f32,
    pub balance: BalanceParams,
}

impl Default for BgImportConfig {
    fn default() -> Self {
        Self {
            bits: 4,
            n_palettes: 1,
            palette_base: 0,
            palette_size: 16,
            palette_offset: 0,
            new_palettes: true,
            new_characters: true,
            screen_mode: ScreenMode::Rewrite,
            char_base: 0,
            max_chars: MAX_CHARACTERS,
            origin_x: 0,
            origin_y: 0,
            dither: false,
            diffuse: 1.0,
            balance: BalanceParams::default(),
        }
    }
}

/// A background screen: `tiles_x * tiles_y` entries in row-major order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScreenLayout {
    pub tiles_x: usize,
    pub tiles_y: usize,
    pub entries: Vec<ScreenEntry>,
}

impl ScreenLayout {
    pub fn new(tiles_x: usize, tiles_y: usize) -> Self {
        Self {
            tiles_x,
            tiles_y,
            entries: vec![ScreenEntry::default(); tiles_x * tiles_y],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Option<ScreenEntry> {
        if x < self.tiles_x && y < self.tiles_y {
            self.entries.get(y * self.tiles_x + x).copied()
        } else {
            None
        }
    }

    pub fn set(&mut self, x: usize, y: usize, entry: ScreenEntry) {
        if x < self.tiles_x && y < self.tiles_y {
            self.entries[y * self.tiles_x + x] = entry;
        }
    }

    pub fn from_bytes(data: &[u8], tiles_x: usize, tiles_y: usize) -> Result<Self> {
        let raw = read_u16_array(data, tiles_x * tiles_y)?;
        Ok(Self {
            tiles_x,
            tiles_y,
            entries: raw.into_iter().map(ScreenEntry::from_u16).collect(),
        })
    }
}

/// Decoded inputs for one import. Existing assets are only needed by the modes that reuse them.
#[derive(Debug, Clone, Default)]
pub struct BgImportInput {
    pub pixels: Vec<Rgba32>,
    pub width: usize,
    pub height: usize,
    pub existing_palette: Option<Vec<Rgb555>>,
    pub existing_characters: Option<BlockBank>,
    pub existing_screen: Option<ScreenLayout>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BgImportResult {
    pub bits: u8,
    pub palette: Vec<Rgb555>,
    pub characters: BlockBank,
    pub screen: ScreenLayout,
    pub tiles_x: usize,
    pub tiles_y: usize,
    /// Characters produced or rewritten by this import.
    pub characters_written: usize,
    pub truncated: Option<Truncated>,
}

impl BgImportResult {
    pub fn encode_palette(&self) -> Vec<u8> {
        encode_palette(&self.palette)
    }

    pub fn encode_characters(&self) -> Result<Vec<u8>> {
        encode_characters(&self.characters, self.bits)
    }

    pub fn encode_screen(&self) -> Vec<u8> {
        encode_screen(&self.screen)
    }

    /// Compose the whole screen back into pixels, `screen.tiles_x * 8` wide. Index 0 and
    /// characters missing from the bank come out transparent.
    pub fn render(&self) -> Vec<Rgba32> {
        let stride = if self.bits == 4 { 16 } else { 256 };
        let width = self.screen.tiles_x * TILE;
        let mut out = vec![0; width * self.screen.tiles_y * TILE];
        for (n, entry) in self.screen.entries.iter().enumerate() {
            let Some(character) = self.characters.characters.get(entry.char_index as usize) else {
                continue;
            };
            let (tx, ty) = (n % self.screen.tiles_x, n / self.screen.tiles_x);
            for (i, &index) in entry.flip.apply(character, TILE).iter().enumerate() {
                if index == 0 {
                    continue;
                }
                let c = self
                    .palette
                    .get(entry.palette as usize * stride + index as usize)
                    .copied()
                    .unwrap_or(0);
                out[(ty * TILE + i / TILE) * width + tx * TILE + i % TILE] = expand_555(c);
            }
        }
        out
    }
}

pub fn encode_palette(palette: &[Rgb555]) -> Vec<u8> {
    let mut out = Vec::with_capacity(palette.len() * 2);
    for &c in palette {
        push_u16_le(&mut out, c);
    }
    out
}

pub fn decode_palette(data: &[u8]) -> Result<Vec<Rgb555>> {
    Ok(read_u16_array(data, data.len() / 2)?)
}

pub fn encode_characters(bank: &BlockBank, bits: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for character in &bank.characters {
        out.extend(encode_indexed(character, bank.dim, bank.dim, bits)?);
    }
    Ok(out)
}

/// Split packed 8x8 characters back into index blocks. A trailing partial character is dropped.
pub fn decode_characters(data: &[u8], bits: u8) -> Result<BlockBank> {
    let size = TILE * TILE * bits as usize / 8;
    if size == 0 {
        return Err(ConvertError::InvalidDepth(bits));
    }
    let characters = data
        .chunks_exact(size)
        .map(|chunk| decode_indexed(chunk, TILE, TILE, bits))
        .collect::<Result<Vec<_>>>()?;
    Ok(BlockBank {
        dim: TILE,
        characters,
    })
}

pub fn encode_screen(screen: &ScreenLayout) -> Vec<u8> {
    let mut out = Vec::with_capacity(screen.entries.len() * 2);
    for e in &screen.entries {
        push_u16_le(&mut out, e.to_u16());
    }
    out
}

/// Clamped geometry of one run.
struct Layout {
    stride: usize,
    offset: usize,
    size: usize,
    base: usize,
    n_palettes: usize,
    char_base: usize,
    max_chars: usize,
    tiles_x: usize,
    tiles_y: usize,
}

pub struct BgImportPipeline<'a> {
    config: BgImportConfig,
    input: BgImportInput,
    progress: &'a ProgressState,
}

impl<'a> BgImportPipeline<'a> {
    pub fn new(config: BgImportConfig, input: BgImportInput, progress: &'a ProgressState) -> Self {
        Self {
            config,
            input,
            progress,
        }
    }

    pub fn run(mut self) -> Result<BgImportResult> {
        self.progress.set_stage(Stage::Init);
        let layout = self.validate()?;
        info!(
            "importing {}x{} bitmap as {} tiles ({:?})",
            self.input.width,
            self.input.height,
            layout.tiles_x * layout.tiles_y,
            self.config.screen_mode
        );

        let mut tiles = split_blocks(&self.input.pixels, self.input.width, self.input.height, TILE)?;
        let n_tiles = tiles.len();
        let two_pass = self.config.screen_mode == ScreenMode::Rewrite && self.config.new_characters;
        self.progress
            .set_max(if two_pass { n_tiles * 2 } else { n_tiles });

        let mut screen = match self.input.existing_screen.take() {
            Some(screen) => screen,
            None => ScreenLayout::new(
                self.config.origin_x + layout.tiles_x,
                self.config.origin_y + layout.tiles_y,
            ),
        };

        let full = self.build_palettes(&layout, &tiles, &screen)?;
        let sub_palettes: Vec<Vec<Rgba32>> = (0..layout.n_palettes)
            .map(|p| {
                let start = (layout.base + p) * layout.stride;
                full[start..start + layout.stride].to_vec()
            })
            .collect();
        let ctx = MatchContext::new(
            &self.config.balance,
            sub_palettes,
            layout.offset,
            layout.size,
            self.progress,
        );

        let mut bank = self.input.existing_characters.take().unwrap_or(BlockBank {
            dim: TILE,
            characters: Vec::new(),
        });

        self.progress.set_stage(Stage::PerBlockMatch);
        let mut truncated = None;
        let (ox, oy) = (self.config.origin_x, self.config.origin_y);
        let characters_written = match (self.config.screen_mode, self.config.new_characters) {
            (ScreenMode::Rewrite, true) => {
                setup_tiles(&mut tiles, &ctx, self.config.dither, self.config.diffuse)?;
                self.progress.set_stage(Stage::Deduplicate);
                let out = compress_to_blocks(&mut tiles, layout.max_chars, None, &ctx)?;
                truncated = out.truncated;

                for (slot, character) in out.bank.characters.iter().enumerate() {
                    store_character(&mut bank, layout.char_base + slot, character.clone());
                }
                for (t, r) in out.refs.iter().enumerate() {
                    screen.set(
                        ox + t % layout.tiles_x,
                        oy + t / layout.tiles_x,
                        ScreenEntry {
                            char_index: (layout.char_base + r.char_index) as u16,
                            flip: r.flip,
                            palette: (layout.base + r.palette) as u8,
                        },
                    );
                }
                out.bank.len()
            }
            (ScreenMode::Rewrite, false) => {
                let out = compress_to_blocks(&mut tiles, layout.max_chars, Some(&bank), &ctx)?;
                for (t, r) in out.refs.iter().enumerate() {
                    screen.set(
                        ox + t % layout.tiles_x,
                        oy + t / layout.tiles_x,
                        ScreenEntry {
                            char_index: r.char_index as u16,
                            flip: r.flip,
                            palette: (layout.base + r.palette) as u8,
                        },
                    );
                }
                0
            }
            (ScreenMode::KeepCharacters, new_characters) => {
                self.fit_to_screen_characters(&tiles, &layout, &ctx, &mut screen, &mut bank, new_characters)?
            }
            (ScreenMode::KeepScreen, new_characters) => {
                if new_characters {
                    self.redraw_through_screen(&tiles, &layout, &ctx, &screen, &mut bank)?
                } else {
                    // Only the palettes change; every tile is already placed.
                    self.progress.advance(n_tiles);
                    0
                }
            }
        };

        self.progress.set_stage(Stage::Encode);
        let palette: Vec<Rgb555> = full.iter().map(|&c| reduce_to_555(c)).collect();
        debug!(
            "encoded {} colours, {} characters, {} screen entries",
            palette.len(),
            bank.len(),
            screen.entries.len()
        );
        if let Some(t) = truncated {
            warn!(
                "character budget exceeded: {} needed, {} stored",
                t.requested, t.actual
            );
        }

        self.progress.set_stage(Stage::Done);
        Ok(BgImportResult {
            bits: self.config.bits,
            palette,
            characters: bank,
            screen,
            tiles_x: layout.tiles_x,
            tiles_y: layout.tiles_y,
            characters_written,
            truncated,
        })
    }

    fn validate(&self) -> Result<Layout> {
        let cfg = &self.config;
        let input = &self.input;
        let stride = match cfg.bits {
            4 => 16,
            8 => 256,
            other => return Err(ConvertError::InvalidDepth(other)),
        };
        if input.width == 0 || input.height == 0 || input.width % TILE != 0 || input.height % TILE != 0 {
            return Err(ConvertError::InvalidDimensions {
                width: input.width,
                height: input.height,
                reason: "background bitmaps must be non-zero multiples of 8",
            });
        }
        if input.pixels.len() != input.width * input.height {
            return Err(ConvertError::BufferMismatch {
                len: input.pixels.len(),
                expected: input.width * input.height,
            });
        }

        let needs_screen = cfg.screen_mode != ScreenMode::Rewrite;
        if needs_screen && input.existing_screen.is_none() {
            return Err(ConvertError::MissingInput("screen"));
        }
        if cfg.screen_mode == ScreenMode::Rewrite && !cfg.new_characters && input.existing_characters.is_none() {
            return Err(ConvertError::MissingInput("characters"));
        }
        if cfg.screen_mode == ScreenMode::KeepCharacters
            && !cfg.new_characters
            && input.existing_characters.is_none()
        {
            return Err(ConvertError::MissingInput("characters"));
        }
        if !cfg.new_palettes && input.existing_palette.is_none() {
            return Err(ConvertError::MissingInput("palette"));
        }

        let offset = cfg.palette_offset.min(stride - 1);
        // Offset 0 reserves the transparent slot, which leaves at least one colour for content.
        let min_size = 1 + usize::from(offset == 0);
        let size = cfg.palette_size.min(stride - offset).max(min_size);
        let (base, n_palettes) = if cfg.screen_mode == ScreenMode::KeepScreen {
            let n = if cfg.bits == 4 {
                input
                    .existing_palette
                    .as_ref()
                    .map_or(MAX_PALETTES, |p| (p.len() / 16).clamp(1, MAX_PALETTES))
            } else {
                1
            };
            (0, n)
        } else {
            let base = cfg.palette_base.min(MAX_PALETTES - 1);
            (base, cfg.n_palettes.clamp(1, MAX_PALETTES - base))
        };
        let char_base = cfg.char_base.min(MAX_CHARACTERS - 1);
        let max_chars = cfg.max_chars.clamp(1, MAX_CHARACTERS - char_base);

        Ok(Layout {
            stride,
            offset,
            size,
            base,
            n_palettes,
            char_base,
            max_chars,
            tiles_x: input.width / TILE,
            tiles_y: input.height / TILE,
        })
    }

    /// The full palette (all sub-palettes) the run works with, generated where requested.
    fn build_palettes(&self, layout: &Layout, tiles: &[BgTile], screen: &ScreenLayout) -> Result<Vec<Rgba32>> {
        let total = ((layout.base + layout.n_palettes) * layout.stride)
            .max(self.input.existing_palette.as_ref().map_or(0, Vec::len));
        let mut full: Vec<Rgba32> = vec![0; total];
        if let Some(existing) = &self.input.existing_palette {
            for (dst, &c) in full.iter_mut().zip(existing) {
                *dst = expand_555(c);
            }
        }
        if !self.config.new_palettes {
            return Ok(full);
        }

        let reserve = layout.offset == 0;
        let first = layout.offset + usize::from(reserve);
        let n_content = layout.size - usize::from(reserve);

        if self.config.screen_mode != ScreenMode::KeepScreen {
            self.progress.set_stage(Stage::Histogram);
            let palettes = create_multiple_palettes(
                &self.input.pixels,
                self.input.width,
                layout.tiles_x,
                layout.tiles_y,
                layout.n_palettes,
                layout.size,
                reserve,
                &self.config.balance,
                self.progress,
            )?;
            self.progress.set_stage(Stage::PaletteOptimize);
            for (p, palette) in palettes.iter().enumerate() {
                let start = (layout.base + p) * layout.stride + layout.offset;
                full[start..start + palette.len()].copy_from_slice(palette);
            }
            return Ok(full);
        }

        // The screen already partitions tiles between palettes; rebuild each palette from the
        // tiles that use it and keep the ones no tile uses.
        self.progress.set_stage(Stage::Histogram);
        let mut ctx = ReductionContext::new(&self.config.balance, n_content);
        for p in 0..layout.n_palettes {
            self.progress.check_cancel()?;
            let mut used = 0;
            for (t, tile) in tiles.iter().enumerate() {
                let entry = screen.get(
                    self.config.origin_x + t % layout.tiles_x,
                    self.config.origin_y + t / layout.tiles_x,
                );
                if entry.map(|e| e.palette as usize) != Some(p) {
                    continue;
                }
                used += 1;
                ctx.compute_histogram(&tile.px);
            }
            if used == 0 {
                continue;
            }

            self.progress.set_stage(Stage::PaletteOptimize);
            let mut content = ctx.optimize_palette().to_vec();
            sort_by_lightness(&mut content);
            let start = p * layout.stride;
            full[start + first..start + first + n_content].copy_from_slice(&content);
            if reserve {
                full[start] = TRANSPARENT_MAGIC;
            }
            ctx.reset_histogram();
            debug!("palette {} rebuilt from {} tiles", p, used);
        }
        Ok(full)
    }

    /// Keep each screen entry's character; pick its palette, and either rewrite the character
    /// or pick the flip that fits the existing one best.
    fn fit_to_screen_characters(
        &self,
        tiles: &[BgTile],
        layout: &Layout,
        ctx: &MatchContext,
        screen: &mut ScreenLayout,
        bank: &mut BlockBank,
        new_characters: bool,
    ) -> Result<usize> {
        let mut written = 0;
        for (t, tile) in tiles.iter().enumerate() {
            self.progress.check_cancel()?;
            let x = self.config.origin_x + t % layout.tiles_x;
            let y = self.config.origin_y + t / layout.tiles_x;
            let Some(entry) = screen.get(x, y) else {
                self.progress.advance(1);
                continue;
            };
            let char_index = entry.char_index as usize;

            let updated = if new_characters {
                let p = ctx.best_palette(&tile.px);
                let amount = if self.config.dither { self.config.diffuse } else { 0.0 };
                store_character(bank, char_index, ctx.quantize(&tile.px, TILE, p, amount));
                written += 1;
                ScreenEntry {
                    char_index: entry.char_index,
                    flip: FlipMode::None,
                    palette: (layout.base + p) as u8,
                }
            } else {
                let Some(character) = bank.characters.get(char_index) else {
                    self.progress.advance(1);
                    continue;
                };
                let mut chosen = (0, FlipMode::None);
                let mut min_error = f64::INFINITY;
                for p in 0..ctx.n_palettes() {
                    let (err, flip) = ctx.best_char_error(&tile.px, p, character, min_error);
                    if err < min_error {
                        min_error = err;
                        chosen = (p, flip);
                    }
                }
                ScreenEntry {
                    char_index: entry.char_index,
                    flip: chosen.1,
                    palette: (layout.base + chosen.0) as u8,
                }
            };
            screen.set(x, y, updated);
            self.progress.advance(1);
        }
        Ok(written)
    }

    /// Regenerate the characters referenced by the screen, honouring each entry's palette and
    /// flip.
    fn redraw_through_screen(
        &self,
        tiles: &[BgTile],
        layout: &Layout,
        ctx: &MatchContext,
        screen: &ScreenLayout,
        bank: &mut BlockBank,
    ) -> Result<usize> {
        let amount = if self.config.dither { self.config.diffuse } else { 0.0 };
        let mut written = 0;
        for (t, tile) in tiles.iter().enumerate() {
            self.progress.check_cancel()?;
            let entry = screen.get(
                self.config.origin_x + t % layout.tiles_x,
                self.config.origin_y + t / layout.tiles_x,
            );
            if let Some(entry) = entry {
                let last = ctx.n_palettes() - 1;
                let p = entry.palette as usize;
                if p > last {
                    warn!(
                        "screen entry {} uses palette {} but only {} are loaded; using palette {}",
                        t,
                        p,
                        last + 1,
                        last
                    );
                }
                let p = p.min(last);
                let indices = ctx.quantize(&tile.px, TILE, p, amount);
                store_character(bank, entry.char_index as usize, entry.flip.apply(&indices, TILE));
                written += 1;
            }
            self.progress.advance(1);
        }
        Ok(written)
    }
}

fn store_character(bank: &mut BlockBank, slot: usize, character: Vec<u8>) {
    if bank.characters.len() <= slot {
        bank.characters.resize(slot + 1, vec![0; bank.dim * bank.dim]);
    }
    bank.characters[slot] = character;
}
