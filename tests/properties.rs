use nitro_convert::bg::{compress_to_blocks, setup_tiles, split_blocks, FlipMode, MatchContext};
use nitro_convert::color::{expand_555, pack, reduce_to_555, Rgba32, TRANSPARENT_MAGIC};
use nitro_convert::palette::{closest_color_index, create_palette, dither_to_palette};
use nitro_convert::texture::indexed::{decode_indexed, encode_indexed};
use nitro_convert::{BalanceParams, ProgressState};
use rstest::rstest;

fn sixteen_colours() -> Vec<Rgba32> {
    vec![
        pack(0, 0, 0, 255),
        pack(255, 255, 255, 255),
        pack(0, 255, 0, 255),
        pack(0, 0, 255, 255),
        pack(255, 255, 0, 255),
        pack(255, 0, 0, 255),
        pack(0, 255, 255, 255),
        pack(255, 0, 255, 255),
        pack(128, 128, 128, 255),
        pack(64, 0, 0, 255),
        pack(0, 64, 0, 255),
        pack(0, 0, 64, 255),
        pack(200, 100, 50, 255),
        pack(50, 100, 200, 255),
        pack(100, 200, 50, 255),
        pack(30, 30, 30, 255),
    ]
}

fn grey_palette() -> Vec<Rgba32> {
    let mut p = vec![TRANSPARENT_MAGIC];
    p.extend((1..16).map(|i| pack(i * 17, i * 17, i * 17, 255)));
    p
}

#[test]
fn every_555_colour_survives_expand_and_reduce() {
    for c in 0..0x8000u16 {
        assert_eq!(reduce_to_555(expand_555(c)), c, "colour {c:04X}");
    }
}

#[test]
fn exact_colours_match_their_own_index() {
    let palette = sixteen_colours();
    for (i, &c) in palette.iter().enumerate() {
        assert_eq!(closest_color_index(c, &palette), i);
    }
    // Alpha does not take part in an exact match.
    assert_eq!(closest_color_index(pack(255, 0, 0, 10), &palette), 5);
}

#[test]
fn undithered_output_is_nearest_colour() {
    let palette = sixteen_colours();
    let pixels: Vec<Rgba32> = (0..64u32)
        .map(|i| pack((i * 37 % 256) as u8, (i * 91 % 256) as u8, (i * 13 % 256) as u8, 255))
        .collect();
    let indices = dither_to_palette(&pixels, 8, 8, &palette, 0.0);
    for (p, &index) in pixels.iter().zip(&indices) {
        assert_eq!(index as usize, closest_color_index(*p, &palette));
    }
}

fn four_colours() -> Vec<Rgba32> {
    vec![
        pack(0, 0, 0, 255),
        pack(255, 255, 255, 255),
        pack(200, 30, 30, 255),
        pack(30, 30, 200, 255),
    ]
}

#[rstest]
#[case(sixteen_colours())]
#[case(grey_palette())]
#[case(four_colours())]
fn quantised_image_is_stable_without_diffusion(#[case] palette: Vec<Rgba32>) {
    let gradient: Vec<Rgba32> = (0..16 * 16u32)
        .map(|i| pack((i % 16 * 17) as u8, (i / 16 * 17) as u8, (i * 3 % 256) as u8, 255))
        .collect();
    let first = dither_to_palette(&gradient, 16, 16, &palette, 1.0);
    let quantised: Vec<Rgba32> = first.iter().map(|&i| palette[i as usize]).collect();

    let again = dither_to_palette(&quantised, 16, 16, &palette, 0.0);
    assert_eq!(again, first);
}

#[test]
fn solid_red_block_maps_to_red_slot() {
    let palette = sixteen_colours();
    let red = vec![pack(255, 0, 0, 255); 64];
    assert!(dither_to_palette(&red, 8, 8, &palette, 0.0).iter().all(|&i| i == 5));
    assert!(dither_to_palette(&red, 8, 8, &palette, 1.0).iter().all(|&i| i == 5));
}

#[rstest]
#[case(4, false)]
#[case(16, true)]
#[case(16, false)]
#[case(256, true)]
fn palette_has_requested_size(#[case] size: usize, #[case] reserve: bool) {
    let pixels: Vec<Rgba32> = (0..1024u32)
        .map(|i| pack((i % 32 * 8) as u8, (i / 32 * 8) as u8, 90, 255))
        .collect();
    let palette = create_palette(&pixels, size, reserve, &BalanceParams::default());
    assert_eq!(palette.len(), size);
    if reserve {
        assert_eq!(palette[0], TRANSPARENT_MAGIC);
    }
}

#[rstest]
#[case(3, 5, 2)]
#[case(7, 3, 4)]
#[case(5, 2, 8)]
#[case(9, 4, 2)]
fn indexed_round_trip(#[case] width: usize, #[case] height: usize, #[case] depth: u8) {
    let max = 1usize << depth;
    let indices: Vec<u8> = (0..width * height).map(|i| (i * 7 % max) as u8).collect();
    let packed = encode_indexed(&indices, width, height, depth).unwrap();
    assert_eq!(packed.len(), (width * depth as usize).div_ceil(8) * height);
    assert_eq!(decode_indexed(&packed, width, height, depth).unwrap(), indices);
}

fn mirrored_pair() -> Vec<Rgba32> {
    let mut image = vec![0u32; 16 * 8];
    for y in 0..8 {
        for x in 0..16 {
            let col = if x < 8 { x } else { 15 - x };
            let v = ((col + y) * 17).min(255) as u8;
            image[y * 16 + x] = pack(v, v, v, 255);
        }
    }
    image
}

#[test]
fn horizontal_mirror_shares_a_character() {
    let progress = ProgressState::new();
    let ctx = MatchContext::new(&BalanceParams::default(), vec![grey_palette()], 0, 16, &progress);
    let mut tiles = split_blocks(&mirrored_pair(), 16, 8, 8).unwrap();
    setup_tiles(&mut tiles, &ctx, false, 0.0).unwrap();
    let out = compress_to_blocks(&mut tiles, 4, None, &ctx).unwrap();

    assert_eq!(out.bank.len(), 1);
    assert_eq!(out.refs[1].master, 0);
    assert_eq!(out.refs[1].flip, FlipMode::Horizontal);
}

#[test]
fn mirrored_pair_fits_a_one_character_budget() {
    let progress = ProgressState::new();
    let ctx = MatchContext::new(&BalanceParams::default(), vec![grey_palette()], 0, 16, &progress);
    let mut tiles = split_blocks(&mirrored_pair(), 16, 8, 8).unwrap();
    setup_tiles(&mut tiles, &ctx, false, 0.0).unwrap();
    let out = compress_to_blocks(&mut tiles, 1, None, &ctx).unwrap();

    assert_eq!(out.bank.len(), 1);
    assert!(out.truncated.is_none());
    assert_eq!(out.refs[0].flip, FlipMode::None);
    assert_eq!(out.refs[1].char_index, 0);
    assert_eq!(out.refs[1].flip, FlipMode::Horizontal);
}
