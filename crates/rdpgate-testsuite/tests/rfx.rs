//! RemoteFX structure round trips against hand-written byte vectors, plus
//! tile compositing through the full decoder.

use rdpgate_core::{decode, encode_vec, Encode as _};
use rdpgate_pdu::geometry::InclusiveRectangle;
use rdpgate_pdu::rfx::{
    Block, ChannelsPdu, CodecChannel, CodecVersionsPdu, ContextPdu, EntropyAlgorithm, FrameBeginPdu, FrameEndPdu,
    OperatingMode, Quant, RegionPdu, RfxChannel, RfxRectangle, SyncPdu, Tile, TileSetPdu,
};
use rdpgate_session::rfx::RemoteFxDecoder;
use rdpgate_session::Framebuffer;
use rstest::rstest;

// TS_RFX_SYNC
const SYNC_BUFFER: [u8; 12] = [
    0xC0, 0xCC, // blockType: WBT_SYNC
    0x0C, 0x00, 0x00, 0x00, // blockLen
    0xCA, 0xAC, 0xCC, 0xCA, // magic: WF_MAGIC
    0x00, 0x01, // version: WF_VERSION_1_0
];

// TS_RFX_CODEC_VERSIONS with the single mandated codec entry
const CODEC_VERSIONS_BUFFER: [u8; 10] = [
    0xC1, 0xCC, // blockType: WBT_CODEC_VERSIONS
    0x0A, 0x00, 0x00, 0x00, // blockLen
    0x01, // numCodecs
    0x01, // codecId
    0x00, 0x01, // version: WF_VERSION_1_0
];

// TS_RFX_CHANNELS advertising one 64x64 channel
const CHANNELS_BUFFER: [u8; 12] = [
    0xC2, 0xCC, // blockType: WBT_CHANNELS
    0x0C, 0x00, 0x00, 0x00, // blockLen
    0x01, // numChannels
    0x00, // channelId
    0x40, 0x00, // width
    0x40, 0x00, // height
];

// TS_RFX_CONTEXT selecting image mode and RLGR3
const CONTEXT_BUFFER: [u8; 13] = [
    0xC3, 0xCC, // blockType: WBT_CONTEXT
    0x0D, 0x00, 0x00, 0x00, // blockLen
    0x01, // codecId
    0xFF, // channelId
    0x00, // ctxId
    0x40, 0x00, // tileSize: CT_TILE_64X64
    0x2A, 0x28, // properties: flags=IMAGE_MODE, cct=ICT, xft=DWT_53_A, et=RLGR3, qt=SCALAR
];

// TS_RFX_REGION with one rectangle at (64, 0), 64x64
const REGION_BUFFER: [u8; 23] = [
    0xC6, 0xCC, // blockType: WBT_REGION
    0x17, 0x00, 0x00, 0x00, // blockLen
    0x01, // codecId
    0x00, // channelId
    0x01, // regionFlags: LRF
    0x01, 0x00, // numRects
    0x40, 0x00, // x
    0x00, 0x00, // y
    0x40, 0x00, // width
    0x40, 0x00, // height
    0xC1, 0xCA, // regionType: CBT_REGION
    0x01, 0x00, // numTilesets
];

// TS_RFX_CODEC_QUANT with the default quantization values
const QUANT_BUFFER: [u8; 5] = [0x66, 0x66, 0x77, 0x88, 0x98];

const GRAY: [u8; 4] = [128, 128, 128, 0xFF];
const UNTOUCHED: [u8; 4] = [0, 0, 0, 0];

#[rstest]
#[case::sync(Block::Sync(SyncPdu), &SYNC_BUFFER)]
#[case::codec_versions(Block::CodecVersions(CodecVersionsPdu), &CODEC_VERSIONS_BUFFER)]
#[case::channels(Block::Channels(ChannelsPdu(vec![RfxChannel { width: 64, height: 64 }])), &CHANNELS_BUFFER)]
#[case::context(
    Block::CodecChannel(CodecChannel::Context(ContextPdu {
        flags: OperatingMode::IMAGE_MODE,
        entropy_algorithm: EntropyAlgorithm::Rlgr3,
    })),
    &CONTEXT_BUFFER
)]
#[case::region(
    Block::CodecChannel(CodecChannel::Region(RegionPdu {
        rectangles: vec![RfxRectangle {
            x: 64,
            y: 0,
            width: 64,
            height: 64,
        }],
    })),
    &REGION_BUFFER
)]
fn block_round_trip(#[case] block: Block<'static>, #[case] buffer: &[u8]) {
    let decoded: Block<'_> = decode(buffer).unwrap();
    assert_eq!(decoded, block);

    assert_eq!(encode_vec(&block).unwrap(), buffer);
    assert_eq!(block.size(), buffer.len());
}

#[test]
fn default_quant_matches_its_wire_form() {
    let decoded: Quant = decode(&QUANT_BUFFER).unwrap();
    assert_eq!(decoded, Quant::default());

    assert_eq!(encode_vec(&Quant::default()).unwrap(), QUANT_BUFFER);
}

fn encode_blocks(blocks: &[Block<'_>]) -> Vec<u8> {
    blocks
        .iter()
        .flat_map(|block| encode_vec(block).unwrap())
        .collect()
}

fn headers(width: i16, height: i16) -> Vec<u8> {
    encode_blocks(&[
        Block::Sync(SyncPdu),
        Block::CodecChannel(CodecChannel::Context(ContextPdu {
            flags: OperatingMode::IMAGE_MODE,
            entropy_algorithm: EntropyAlgorithm::Rlgr3,
        })),
        Block::CodecVersions(CodecVersionsPdu),
        Block::Channels(ChannelsPdu(vec![RfxChannel { width, height }])),
    ])
}

/// A tile whose RLGR stream decodes to all-zero coefficients; after the
/// color conversion every pixel comes out as opaque (128, 128, 128).
fn zero_tile(x: u16, y: u16) -> Tile<'static> {
    Tile {
        y_quant_index: 0,
        cb_quant_index: 0,
        cr_quant_index: 0,
        x,
        y,
        y_data: &[0x00],
        cb_data: &[0x00],
        cr_data: &[0x00],
    }
}

fn frame(rectangles: Vec<RfxRectangle>, tiles: Vec<Tile<'_>>) -> Vec<u8> {
    encode_blocks(&[
        Block::CodecChannel(CodecChannel::FrameBegin(FrameBeginPdu {
            index: 1,
            number_of_regions: 1,
        })),
        Block::CodecChannel(CodecChannel::Region(RegionPdu { rectangles })),
        Block::CodecChannel(CodecChannel::TileSet(TileSetPdu {
            entropy_algorithm: EntropyAlgorithm::Rlgr3,
            quants: vec![Quant::default()],
            tiles,
        })),
        Block::CodecChannel(CodecChannel::FrameEnd(FrameEndPdu)),
    ])
}

fn pixel(image: &Framebuffer, x: usize, y: usize) -> [u8; 4] {
    let offset = (y * usize::from(image.width()) + x) * 4;
    image.data()[offset..offset + 4].try_into().unwrap()
}

#[test]
fn adjacent_tiles_are_composited_64_pixels_apart() {
    let mut decoder = RemoteFxDecoder::new();
    let mut image = Framebuffer::new(192, 64);

    let destination = InclusiveRectangle {
        left: 0,
        top: 0,
        right: 127,
        bottom: 63,
    };

    let mut bytes = headers(128, 64);
    bytes.extend_from_slice(&frame(
        vec![RfxRectangle {
            x: 0,
            y: 0,
            width: 128,
            height: 64,
        }],
        vec![zero_tile(0, 0), zero_tile(1, 0)],
    ));
    let mut input = bytes.as_slice();

    let (_, rectangle) = decoder.decode(&mut image, &destination, &mut input).unwrap();
    assert_eq!(rectangle, destination);
    assert!(input.is_empty());

    for y in [0, 31, 63] {
        for x in [0, 63, 64, 127] {
            assert_eq!(pixel(&image, x, y), GRAY, "tile pixel at ({x}, {y})");
        }
        for x in [128, 191] {
            assert_eq!(pixel(&image, x, y), UNTOUCHED, "pixel past the region at ({x}, {y})");
        }
    }
}

#[test]
fn tile_coordinates_offset_from_the_destination_origin() {
    let mut decoder = RemoteFxDecoder::new();
    let mut image = Framebuffer::new(192, 64);

    let destination = InclusiveRectangle {
        left: 0,
        top: 0,
        right: 127,
        bottom: 63,
    };

    // single tile at tile coordinate (1, 0): only pixels 64..128 painted
    let mut bytes = headers(128, 64);
    bytes.extend_from_slice(&frame(
        vec![RfxRectangle {
            x: 64,
            y: 0,
            width: 64,
            height: 64,
        }],
        vec![zero_tile(1, 0)],
    ));
    let mut input = bytes.as_slice();

    let (_, rectangle) = decoder.decode(&mut image, &destination, &mut input).unwrap();
    assert_eq!(
        rectangle,
        InclusiveRectangle {
            left: 64,
            top: 0,
            right: 127,
            bottom: 63,
        }
    );

    assert_eq!(pixel(&image, 0, 10), UNTOUCHED);
    assert_eq!(pixel(&image, 63, 10), UNTOUCHED);
    assert_eq!(pixel(&image, 64, 10), GRAY);
    assert_eq!(pixel(&image, 127, 10), GRAY);
}
