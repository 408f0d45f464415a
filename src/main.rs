use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use image::{Rgba, RgbaImage};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nitro_convert::{
    bg::{
        import::{decode_characters, decode_palette, encode_palette, ScreenLayout},
        BgImportConfig, BgImportInput, BgImportPipeline, ScreenMode,
    },
    color::{reduce_to_555, Rgba32},
    palette::{average_color, count_colors, quantize_to_palette},
    progress::{write_progress, ConversionTask},
    reduction::BalanceParams,
    texture::{convert_texture, palette_name, render_texture, TextureConfig, TextureFormat},
    ConvertError, ProgressState,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Usage(String),
}

#[derive(Parser)]
#[command(name = "nitro_convert")]
#[command(about = "Convert PNG images to Nintendo DS palettes, backgrounds and textures")]
struct Cli {
    /// Write JSON progress snapshots to this file while converting
    #[arg(long, global = true)]
    progress_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a single palette from an image
    Palette {
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Number of palette entries
        #[arg(short, long, default_value_t = 16)]
        colors: usize,

        /// Keep entry 0 free for transparency
        #[arg(long)]
        reserve_transparent: bool,

        #[command(flatten)]
        balance: BalanceArgs,
    },
    /// Convert an image to background palette, characters and screen
    Bg {
        input: PathBuf,

        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// JSON file with import settings; flags override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Character depth (4 or 8)
        #[arg(long)]
        bits: Option<u8>,

        /// Number of palettes to generate
        #[arg(long)]
        palettes: Option<usize>,

        /// Character budget
        #[arg(long)]
        max_chars: Option<usize>,

        #[arg(long, value_enum)]
        screen_mode: Option<ScreenModeArg>,

        /// Existing palette to match against (raw RGB555 words)
        #[arg(long)]
        palette_in: Option<PathBuf>,

        /// Existing characters to match against
        #[arg(long)]
        chr_in: Option<PathBuf>,

        /// Existing screen to keep
        #[arg(long)]
        scr_in: Option<PathBuf>,

        /// Width of the existing screen in tiles
        #[arg(long, default_value_t = 32)]
        screen_width: usize,

        #[arg(long)]
        dither: bool,

        /// Also write a preview PNG
        #[arg(long)]
        preview: bool,

        #[command(flatten)]
        balance: BalanceArgs,
    },
    /// Convert an image to a texture
    Texture {
        input: PathBuf,

        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        /// Texture format, or "auto" to pick one from the image
        #[arg(short, long, default_value = "auto")]
        format: String,

        #[arg(long)]
        dither: bool,

        #[arg(long)]
        dither_alpha: bool,

        /// Palette size (4x4: bank budget when --limit-palette is set)
        #[arg(long)]
        palette_size: Option<usize>,

        /// Cap the 4x4 palette bank
        #[arg(long)]
        limit_palette: bool,

        /// Also write a preview PNG
        #[arg(long)]
        preview: bool,

        #[command(flatten)]
        balance: BalanceArgs,
    },
}

#[derive(Args, Clone, Copy)]
struct BalanceArgs {
    /// Luma (0) versus chroma (255) accuracy
    #[arg(long)]
    balance: Option<u8>,

    /// I axis (0) versus Q axis (255) accuracy
    #[arg(long)]
    color_balance: Option<u8>,

    #[arg(long)]
    enhance_colors: bool,
}

impl BalanceArgs {
    fn apply(self, params: &mut BalanceParams) {
        if let Some(b) = self.balance {
            params.balance = b;
        }
        if let Some(c) = self.color_balance {
            params.color_balance = c;
        }
        params.enhance_colors |= self.enhance_colors;
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ScreenModeArg {
    Rewrite,
    KeepCharacters,
    KeepScreen,
}

impl From<ScreenModeArg> for ScreenMode {
    fn from(arg: ScreenModeArg) -> Self {
        match arg {
            ScreenModeArg::Rewrite => ScreenMode::Rewrite,
            ScreenModeArg::KeepCharacters => ScreenMode::KeepCharacters,
            ScreenModeArg::KeepScreen => ScreenMode::KeepScreen,
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let progress_file = cli.progress_file;
    match cli.command {
        Commands::Palette {
            input,
            output,
            colors,
            reserve_transparent,
            balance,
        } => {
            let mut params = BalanceParams::default();
            balance.apply(&mut params);
            run_palette(&input, &output, colors, reserve_transparent, &params)
        }
        Commands::Bg {
            input,
            output,
            config,
            bits,
            palettes,
            max_chars,
            screen_mode,
            palette_in,
            chr_in,
            scr_in,
            screen_width,
            dither,
            preview,
            balance,
        } => {
            let mut cfg: BgImportConfig = load_config(config.as_deref())?;
            if let Some(bits) = bits {
                cfg.bits = bits;
            }
            if let Some(n) = palettes {
                cfg.n_palettes = n;
            }
            if let Some(n) = max_chars {
                cfg.max_chars = n;
            }
            if let Some(mode) = screen_mode {
                cfg.screen_mode = mode.into();
            }
            cfg.dither |= dither;
            balance.apply(&mut cfg.balance);

            let (pixels, width, height) = load_image(&input)?;
            let mut bg_input = BgImportInput {
                pixels,
                width,
                height,
                ..Default::default()
            };
            if let Some(path) = palette_in {
                bg_input.existing_palette = Some(decode_palette(&fs::read(path)?)?);
                cfg.new_palettes = false;
            }
            if let Some(path) = chr_in {
                bg_input.existing_characters = Some(decode_characters(&fs::read(path)?, cfg.bits)?);
                cfg.new_characters = false;
            }
            if let Some(path) = scr_in {
                if screen_width == 0 {
                    return Err(CliError::Usage("--screen-width must be non-zero".into()));
                }
                let data = fs::read(path)?;
                let tiles_y = data.len() / 2 / screen_width;
                bg_input.existing_screen = Some(ScreenLayout::from_bytes(&data, screen_width, tiles_y)?);
            }
            run_bg(&input, &output, cfg, bg_input, preview, progress_file.as_deref())
        }
        Commands::Texture {
            input,
            output,
            config,
            format,
            dither,
            dither_alpha,
            palette_size,
            limit_palette,
            preview,
            balance,
        } => {
            let mut cfg: TextureConfig = load_config(config.as_deref())?;
            if format != "auto" {
                cfg.format = Some(format.parse::<TextureFormat>().map_err(CliError::Usage)?);
            }
            cfg.dither |= dither;
            cfg.dither_alpha |= dither_alpha;
            cfg.limit_palette |= limit_palette;
            if palette_size.is_some() {
                cfg.palette_size = palette_size;
            }
            if cfg.palette_name.is_none() {
                cfg.palette_name = Some(palette_name(&file_name(&input)));
            }
            balance.apply(&mut cfg.balance);
            run_texture(&input, &output, cfg, preview, progress_file.as_deref())
        }
    }
}

fn run_palette(
    input: &Path,
    output: &Path,
    colors: usize,
    reserve_transparent: bool,
    balance: &BalanceParams,
) -> Result<(), CliError> {
    let (pixels, _, _) = load_image(input)?;
    let palette = quantize_to_palette(&pixels, colors, reserve_transparent, balance);
    let words: Vec<u16> = palette.iter().map(|&c| reduce_to_555(c)).collect();

    fs::create_dir_all(output)?;
    let stem = file_stem(input);
    fs::write(output.join(format!("{}.nclr.bin", stem)), encode_palette(&words))?;
    write_json(
        &output.join(format!("{}.palette.json", stem)),
        &json!({
            "name": palette_name(&file_name(input)),
            "colors": words.iter().map(|w| format!("{:04X}", w)).collect::<Vec<_>>(),
            "source_colors": count_colors(&pixels),
            "average_color": format!("{:06X}", average_color(&pixels) & 0xFF_FFFF),
        }),
    )?;
    info!("wrote {} colour palette for {}", words.len(), input.display());
    Ok(())
}

fn run_bg(
    input: &Path,
    output: &Path,
    config: BgImportConfig,
    bg_input: BgImportInput,
    preview: bool,
    progress_file: Option<&Path>,
) -> Result<(), CliError> {
    let result = run_task(progress_file, move |progress| {
        BgImportPipeline::new(config, bg_input, progress).run()
    })?;

    fs::create_dir_all(output)?;
    let stem = file_stem(input);
    fs::write(output.join(format!("{}.pal.bin", stem)), result.encode_palette())?;
    fs::write(output.join(format!("{}.chr.bin", stem)), result.encode_characters()?)?;
    fs::write(output.join(format!("{}.scr.bin", stem)), result.encode_screen())?;
    write_json(
        &output.join(format!("{}.bg.json", stem)),
        &json!({
            "bits": result.bits,
            "tiles_x": result.tiles_x,
            "tiles_y": result.tiles_y,
            "characters": result.characters.len(),
            "characters_written": result.characters_written,
            "palette_colors": result.palette.len(),
            "truncated": result.truncated,
        }),
    )?;

    if preview {
        let width = result.screen.tiles_x * 8;
        let height = result.screen.tiles_y * 8;
        save_png(&to_image(&result.render(), width, height), &output.join(format!("{}.preview.png", stem)))?;
    }
    info!(
        "wrote {} characters and a {}x{} screen for {}",
        result.characters.len(),
        result.screen.tiles_x,
        result.screen.tiles_y,
        input.display()
    );
    Ok(())
}

fn run_texture(
    input: &Path,
    output: &Path,
    config: TextureConfig,
    preview: bool,
    progress_file: Option<&Path>,
) -> Result<(), CliError> {
    let (pixels, width, height) = load_image(input)?;
    let converted = run_task(progress_file, move |progress| {
        convert_texture(&pixels, width, height, &config, progress)
    })?;
    let texture = &converted.texture;

    fs::create_dir_all(output)?;
    let stem = file_stem(input);
    fs::write(output.join(format!("{}.tex.bin", stem)), &texture.texels)?;
    if !texture.index_data.is_empty() {
        fs::write(output.join(format!("{}.idx.bin", stem)), &texture.index_data)?;
    }
    if !texture.palette.is_empty() {
        fs::write(output.join(format!("{}.pal.bin", stem)), encode_palette(&texture.palette))?;
    }
    write_json(
        &output.join(format!("{}.texture.json", stem)),
        &json!({
            "format": texture.format,
            "width": texture.width,
            "height": texture.height,
            "color0_transparent": texture.color0_transparent,
            "tex_image_param": format!("{:08X}", texture.tex_image_param()),
            "texel_bytes": texture.texel_vram_size(),
            "index_bytes": texture.index_vram_size(),
            "palette_bytes": texture.palette_vram_size(),
            "palette_name": texture.palette_name,
            "truncated": converted.truncated,
        }),
    )?;

    if preview {
        let rendered = render_texture(texture)?;
        save_png(&to_image(&rendered, width, height), &output.join(format!("{}.preview.png", stem)))?;
    }
    info!("wrote {} texture for {}", texture.format, input.display());
    Ok(())
}

/// Run a conversion on a worker thread, mirroring its progress into `progress_file`.
fn run_task<T, F>(progress_file: Option<&Path>, work: F) -> Result<T, CliError>
where
    T: Send + 'static,
    F: FnOnce(&ProgressState) -> nitro_convert::Result<T> + Send + 'static,
{
    let task = ConversionTask::spawn(work);
    while !task.is_finished() {
        if let Some(path) = progress_file {
            let p = task.progress();
            write_progress(path, p.current(), p.max(), p.stage().as_str(), "running");
        }
        thread::sleep(POLL_INTERVAL);
    }

    let (current, max) = (task.progress().current(), task.progress().max());
    let result = task.join();
    if let Some(path) = progress_file {
        let status = if result.is_ok() { "done" } else { "failed" };
        write_progress(path, current, max, "done", status);
    }
    Ok(result?)
}

fn load_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T, CliError> {
    match path {
        Some(path) => {
            let file = File::open(path)?;
            Ok(serde_json::from_reader(io::BufReader::new(file))?)
        }
        None => Ok(T::default()),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CliError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

fn load_image(path: &Path) -> Result<(Vec<Rgba32>, usize, usize), CliError> {
    let image = image::open(path)?.to_rgba8();
    let (width, height) = image.dimensions();
    let pixels = image
        .pixels()
        .map(|p| u32::from_le_bytes(p.0))
        .collect();
    Ok((pixels, width as usize, height as usize))
}

fn to_image(pixels: &[Rgba32], width: usize, height: usize) -> RgbaImage {
    RgbaImage::from_fn(width as u32, height as u32, |x, y| {
        let c = pixels
            .get(y as usize * width + x as usize)
            .copied()
            .unwrap_or(0);
        Rgba(c.to_le_bytes())
    })
}

fn save_png(image: &RgbaImage, path: &Path) -> Result<(), CliError> {
    let temp_path = path.with_extension("temp.png");
    image.save(&temp_path)?;

    let mut options = oxipng::Options::from_preset(2);
    options.bit_depth_reduction = true;
    options.interlace = None;

    match oxipng::optimize(
        &oxipng::InFile::Path(temp_path.clone()),
        &oxipng::OutFile::Path {
            path: Some(path.to_path_buf()),
            preserve_attrs: false,
        },
        &options,
    ) {
        Ok(_) => {
            let _ = fs::remove_file(temp_path);
        }
        Err(e) => {
            fs::rename(&temp_path, path)?;
            warn!(
                "oxipng optimisation failed for {}: {}. File saved unoptimised.",
                path.display(),
                e
            );
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}
