use nitro_convert::bg::import::{decode_characters, decode_palette, ScreenLayout};
use nitro_convert::bg::{BlockBank, FlipMode, ScreenEntry, ScreenMode};
use nitro_convert::color::{expand_555, pack, Rgba32};
use nitro_convert::{
    BgImportConfig, BgImportInput, BgImportPipeline, ConversionTask, ConvertError, ProgressState,
    Stage,
};

fn halves(width: usize, height: usize, left: Rgba32, right: Rgba32) -> Vec<Rgba32> {
    (0..width * height)
        .map(|i| if i % width < width / 2 { left } else { right })
        .collect()
}

fn grey_words() -> Vec<u16> {
    (0..16u16).map(|i| i * 2 | (i * 2) << 5 | (i * 2) << 10).collect()
}

#[test]
fn two_palettes_split_by_colour() {
    let progress = ProgressState::new();
    let input = BgImportInput {
        pixels: halves(32, 8, pack(255, 0, 0, 255), pack(0, 0, 255, 255)),
        width: 32,
        height: 8,
        ..Default::default()
    };
    let config = BgImportConfig {
        n_palettes: 2,
        ..Default::default()
    };
    let result = BgImportPipeline::new(config, input, &progress).run().unwrap();

    assert_eq!(result.palette.len(), 32);
    let left = result.screen.entries[0];
    let right = result.screen.entries[3];
    assert_ne!(left.palette, right.palette);
    assert!(result.palette[left.palette as usize * 16..][..16].contains(&0x001F));
    assert!(result.palette[right.palette as usize * 16..][..16].contains(&0x7C00));
}

#[test]
fn palette_base_and_char_base_offset_the_output() {
    let progress = ProgressState::new();
    let input = BgImportInput {
        pixels: halves(16, 8, pack(0, 255, 0, 255), pack(255, 255, 255, 255)),
        width: 16,
        height: 8,
        ..Default::default()
    };
    let config = BgImportConfig {
        palette_base: 2,
        char_base: 10,
        ..Default::default()
    };
    let result = BgImportPipeline::new(config, input, &progress).run().unwrap();

    assert_eq!(result.palette.len(), 48);
    assert!(result.screen.entries.iter().all(|e| e.palette == 2));
    assert_eq!(result.screen.entries[0].char_index, 10);
    assert_eq!(result.screen.entries[1].char_index, 11);
    assert_eq!(result.characters.len(), 12);
    assert_eq!(result.characters_written, 2);
}

#[test]
fn existing_characters_are_matched_not_rewritten() {
    let progress = ProgressState::new();
    let bank = BlockBank {
        dim: 8,
        characters: vec![vec![1; 64], vec![15; 64]],
    };
    let input = BgImportInput {
        pixels: halves(16, 8, expand_555(grey_words()[15]), expand_555(grey_words()[1])),
        width: 16,
        height: 8,
        existing_palette: Some(grey_words()),
        existing_characters: Some(bank.clone()),
        ..Default::default()
    };
    let config = BgImportConfig {
        new_palettes: false,
        new_characters: false,
        ..Default::default()
    };
    let result = BgImportPipeline::new(config, input, &progress).run().unwrap();

    assert_eq!(result.characters, bank);
    assert_eq!(result.characters_written, 0);
    assert_eq!(result.palette, grey_words());
    assert_eq!(result.screen.entries[0].char_index, 1);
    assert_eq!(result.screen.entries[1].char_index, 0);
}

#[test]
fn keep_screen_redraws_through_each_entry() {
    let progress = ProgressState::new();
    let mut screen = ScreenLayout::new(2, 1);
    screen.set(0, 0, ScreenEntry { char_index: 3, flip: FlipMode::None, palette: 0 });
    screen.set(1, 0, ScreenEntry { char_index: 5, flip: FlipMode::Horizontal, palette: 0 });

    // Bright on the left half of each tile.
    let pixels: Vec<Rgba32> = (0..16 * 8)
        .map(|i| if i % 8 < 4 { pack(255, 255, 255, 255) } else { pack(0, 0, 0, 255) })
        .collect();
    let input = BgImportInput {
        pixels: pixels.clone(),
        width: 16,
        height: 8,
        existing_screen: Some(screen.clone()),
        ..Default::default()
    };
    let config = BgImportConfig {
        screen_mode: ScreenMode::KeepScreen,
        ..Default::default()
    };
    let result = BgImportPipeline::new(config, input, &progress).run().unwrap();

    assert_eq!(result.screen, screen);
    assert_eq!(result.characters_written, 2);
    // The flipped entry stores the mirrored character.
    let plain = &result.characters.characters[3];
    let mirrored = &result.characters.characters[5];
    assert_eq!(&FlipMode::Horizontal.apply(plain, 8), mirrored);
    assert_eq!(result.render(), pixels);
}

#[test]
fn keep_screen_without_new_characters_finishes_progress() {
    let progress = ProgressState::new();
    let mut screen = ScreenLayout::new(2, 1);
    screen.set(0, 0, ScreenEntry { char_index: 0, flip: FlipMode::None, palette: 0 });
    screen.set(1, 0, ScreenEntry { char_index: 1, flip: FlipMode::None, palette: 0 });
    let input = BgImportInput {
        pixels: halves(16, 8, pack(255, 0, 0, 255), pack(0, 0, 255, 255)),
        width: 16,
        height: 8,
        existing_screen: Some(screen.clone()),
        ..Default::default()
    };
    let config = BgImportConfig {
        screen_mode: ScreenMode::KeepScreen,
        new_characters: false,
        ..Default::default()
    };
    let result = BgImportPipeline::new(config, input, &progress).run().unwrap();

    assert_eq!(result.characters_written, 0);
    assert_eq!(result.screen, screen);
    assert_eq!(progress.stage(), Stage::Done);
    assert_eq!(progress.max(), 2);
    assert_eq!(progress.current(), progress.max());
}

#[test]
fn keep_screen_entry_past_the_loaded_palettes_uses_the_last() {
    let progress = ProgressState::new();
    let mut screen = ScreenLayout::new(1, 1);
    screen.set(0, 0, ScreenEntry { char_index: 2, flip: FlipMode::None, palette: 9 });
    let pixels = vec![expand_555(grey_words()[15]); 64];
    let input = BgImportInput {
        pixels: pixels.clone(),
        width: 8,
        height: 8,
        existing_palette: Some(grey_words()),
        existing_screen: Some(screen.clone()),
        ..Default::default()
    };
    let config = BgImportConfig {
        screen_mode: ScreenMode::KeepScreen,
        new_palettes: false,
        ..Default::default()
    };
    let result = BgImportPipeline::new(config, input, &progress).run().unwrap();

    assert_eq!(result.screen, screen);
    assert_eq!(result.characters_written, 1);
    assert_eq!(result.characters.characters[2], vec![15; 64]);
}

#[test]
fn keep_characters_picks_palette_per_tile() {
    let progress = ProgressState::new();
    let mut screen = ScreenLayout::new(2, 1);
    screen.set(0, 0, ScreenEntry { char_index: 0, flip: FlipMode::None, palette: 0 });
    screen.set(1, 0, ScreenEntry { char_index: 7, flip: FlipMode::Both, palette: 0 });
    let input = BgImportInput {
        pixels: halves(16, 8, pack(255, 0, 0, 255), pack(0, 255, 0, 255)),
        width: 16,
        height: 8,
        existing_screen: Some(screen),
        ..Default::default()
    };
    let config = BgImportConfig {
        screen_mode: ScreenMode::KeepCharacters,
        n_palettes: 2,
        ..Default::default()
    };
    let result = BgImportPipeline::new(config, input, &progress).run().unwrap();

    let (a, b) = (result.screen.entries[0], result.screen.entries[1]);
    assert_eq!(a.char_index, 0);
    assert_eq!(b.char_index, 7);
    assert_eq!(b.flip, FlipMode::None);
    assert_ne!(a.palette, b.palette);
    assert_eq!(result.characters.len(), 8);
}

#[test]
fn encoded_outputs_decode_back() {
    let progress = ProgressState::new();
    let input = BgImportInput {
        pixels: halves(16, 16, pack(255, 128, 0, 255), pack(0, 128, 255, 255)),
        width: 16,
        height: 16,
        ..Default::default()
    };
    let result = BgImportPipeline::new(BgImportConfig::default(), input, &progress)
        .run()
        .unwrap();

    let palette = decode_palette(&result.encode_palette()).unwrap();
    assert_eq!(palette, result.palette);
    let bank = decode_characters(&result.encode_characters().unwrap(), 4).unwrap();
    assert_eq!(bank, result.characters);
    let screen = ScreenLayout::from_bytes(&result.encode_screen(), 2, 2).unwrap();
    assert_eq!(screen, result.screen);
}

#[test]
fn eight_bit_characters_use_one_large_palette() {
    let progress = ProgressState::new();
    let pixels: Vec<Rgba32> = (0..16 * 16u32)
        .map(|i| pack((i % 16 * 16) as u8, (i / 16 * 16) as u8, 128, 255))
        .collect();
    let input = BgImportInput {
        pixels,
        width: 16,
        height: 16,
        ..Default::default()
    };
    let config = BgImportConfig {
        bits: 8,
        palette_size: 256,
        ..Default::default()
    };
    let result = BgImportPipeline::new(config, input, &progress).run().unwrap();
    assert_eq!(result.palette.len(), 256);
    assert_eq!(result.encode_characters().unwrap().len(), result.characters.len() * 64);
}

#[test]
fn cancelled_task_stops_with_error() {
    let task = ConversionTask::spawn(|progress| {
        progress.cancel();
        let input = BgImportInput {
            pixels: vec![pack(1, 2, 3, 255); 64 * 64],
            width: 64,
            height: 64,
            ..Default::default()
        };
        BgImportPipeline::new(BgImportConfig::default(), input, progress).run()
    });
    assert!(matches!(task.join(), Err(ConvertError::Cancelled)));
}

#[test]
fn worker_progress_reaches_done() {
    let task = ConversionTask::spawn(|progress| {
        let input = BgImportInput {
            pixels: halves(32, 32, pack(20, 40, 60, 255), pack(200, 180, 160, 255)),
            width: 32,
            height: 32,
            ..Default::default()
        };
        BgImportPipeline::new(BgImportConfig::default(), input, progress).run()
    });
    while !task.is_finished() {
        std::thread::yield_now();
    }
    assert_eq!(task.progress().stage(), Stage::Done);
    assert_eq!(task.progress().current(), task.progress().max());
    assert!(task.join().is_ok());
}
