//! RemoteFX codec stream decoder (MS-RDPRFX).
//!
//! The stream starts with a sync block, then the three property blocks
//! (context, codec versions, channels) in any order, then frames. Property
//! blocks are mandatory before the first frame; inside the frame phase
//! unknown block types are skipped, everywhere else they are fatal.

use num_traits::FromPrimitive as _;

use rdpgate_core::{decode_cursor, ReadCursor};
use rdpgate_graphics::color_conversion::{self, YCbCrBuffer};
use rdpgate_graphics::image::{ImageRegion, PixelFormat};
use rdpgate_graphics::{dwt, quantization, rlgr, subband_reconstruction};
use rdpgate_pdu::geometry::{InclusiveRectangle, Rectangle as _};
use rdpgate_pdu::rfx::{
    Block, BlockHeader, BlockType, ChannelsPdu, CodecChannel, ContextPdu, EntropyAlgorithm, Quant, RfxRectangle, Tile,
    TileSetPdu,
};

use crate::image::Framebuffer;
use crate::{SessionError, SessionErrorExt, SessionResult};

pub type FrameId = u32;

const TILE_SIZE: u16 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceState {
    WaitingSync,
    WaitingProperties,
    WaitingFrame,
}

/// Decodes one RemoteFX stream and composites its tiles into a
/// [`Framebuffer`].
///
/// The per-tile working buffers are allocated once and reused for every
/// tile of every frame.
pub struct RemoteFxDecoder {
    state: SequenceState,
    context: Option<ContextPdu>,
    versions_received: bool,
    channels: Option<ChannelsPdu>,
    tiles: DecodingTileContext,
}

impl Default for RemoteFxDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteFxDecoder {
    pub fn new() -> Self {
        Self {
            state: SequenceState::WaitingSync,
            context: None,
            versions_received: false,
            channels: None,
            tiles: DecodingTileContext::new(),
        }
    }

    /// Consumes blocks from `input` until one frame has been decoded and
    /// composited at `destination`, advancing `input` past the consumed
    /// bytes. Returns the frame index and the updated surface rectangle.
    pub fn decode(
        &mut self,
        image: &mut Framebuffer,
        destination: &InclusiveRectangle,
        input: &mut &[u8],
    ) -> SessionResult<(FrameId, InclusiveRectangle)> {
        loop {
            match self.state {
                SequenceState::WaitingSync => self.process_sync(input)?,
                SequenceState::WaitingProperties => self.process_property(input)?,
                SequenceState::WaitingFrame => return self.process_frame(image, destination, input),
            }
        }
    }

    fn process_sync(&mut self, input: &mut &[u8]) -> SessionResult<()> {
        match read_block(input)? {
            Block::Sync(_) => {
                self.state = SequenceState::WaitingProperties;
                Ok(())
            }
            block => Err(reason_err!(
                "RemoteFX",
                "expected TS_RFX_SYNC, got {:?}",
                block.block_type()
            )),
        }
    }

    fn process_property(&mut self, input: &mut &[u8]) -> SessionResult<()> {
        match read_block(input)? {
            Block::CodecChannel(CodecChannel::Context(context)) => {
                debug!(?context, "RemoteFX context received");
                self.context = Some(context);
            }
            Block::CodecVersions(_) => {
                self.versions_received = true;
            }
            Block::Channels(channels) => {
                if channels.0.is_empty() {
                    return Err(general_err!("TS_RFX_CHANNELS carries no channel"));
                }
                self.channels = Some(channels);
            }
            block => {
                return Err(reason_err!(
                    "RemoteFX",
                    "expected a property block, got {:?}",
                    block.block_type()
                ));
            }
        }

        if self.context.is_some() && self.versions_received && self.channels.is_some() {
            self.state = SequenceState::WaitingFrame;
        }

        Ok(())
    }

    fn process_frame(
        &mut self,
        image: &mut Framebuffer,
        destination: &InclusiveRectangle,
        input: &mut &[u8],
    ) -> SessionResult<(FrameId, InclusiveRectangle)> {
        let mut frame_index = 0;
        let mut rectangles: Vec<RfxRectangle> = Vec::new();

        while !input.is_empty() {
            let Some(block) = read_frame_block(input)? else {
                continue;
            };

            match block {
                Block::CodecChannel(CodecChannel::FrameBegin(begin)) => {
                    trace!(index = begin.index, regions = begin.number_of_regions, "Frame begin");
                    frame_index = begin.index;
                }
                Block::CodecChannel(CodecChannel::Region(region)) => {
                    rectangles = region.rectangles;
                }
                Block::CodecChannel(CodecChannel::TileSet(tile_set)) => {
                    self.decode_tile_set(&tile_set, destination, image)?;
                }
                Block::CodecChannel(CodecChannel::FrameEnd(_)) => {
                    let update_rectangle = self.frame_rectangle(&rectangles, destination)?;
                    return Ok((frame_index, update_rectangle));
                }
                block => {
                    return Err(reason_err!(
                        "RemoteFX",
                        "unexpected {:?} block inside a frame",
                        block.block_type()
                    ));
                }
            }
        }

        Err(general_err!("frame truncated before TS_RFX_FRAME_END"))
    }

    /// The surface rectangle a frame reports as updated: the union of its
    /// region rectangles, or the whole first channel when the server sent
    /// an empty region.
    fn frame_rectangle(
        &self,
        rectangles: &[RfxRectangle],
        destination: &InclusiveRectangle,
    ) -> SessionResult<InclusiveRectangle> {
        if rectangles.is_empty() {
            let channels = self.channels.as_ref().ok_or_else(|| general_err!("channels are missing"))?;
            let channel = &channels.0[0];

            return Ok(InclusiveRectangle {
                left: destination.left,
                top: destination.top,
                right: destination.left + channel.width.unsigned_abs().saturating_sub(1),
                bottom: destination.top + channel.height.unsigned_abs().saturating_sub(1),
            });
        }

        let translated: Vec<InclusiveRectangle> = rectangles
            .iter()
            .map(|r| InclusiveRectangle {
                left: destination.left.saturating_add(r.x),
                top: destination.top.saturating_add(r.y),
                right: destination.left.saturating_add(r.x).saturating_add(r.width.saturating_sub(1)),
                bottom: destination
                    .top
                    .saturating_add(r.y)
                    .saturating_add(r.height.saturating_sub(1)),
            })
            .collect();

        Ok(InclusiveRectangle::union_all(&translated))
    }

    fn decode_tile_set(
        &mut self,
        tile_set: &TileSetPdu<'_>,
        destination: &InclusiveRectangle,
        image: &mut Framebuffer,
    ) -> SessionResult<()> {
        for quant in &tile_set.quants {
            if !quantization::is_valid(quant) {
                return Err(reason_err!("RemoteFX", "quantization factor out of range: {quant:?}"));
            }
        }

        for tile in &tile_set.tiles {
            let quants = tile_quants(tile_set, tile)?;
            self.decode_tile(tile, quants, tile_set.entropy_algorithm)?;

            let Some(left) = tile
                .x
                .checked_mul(TILE_SIZE)
                .and_then(|offset| destination.left.checked_add(offset))
            else {
                warn!(x = tile.x, "Tile x offset out of range");
                continue;
            };
            let Some(top) = tile
                .y
                .checked_mul(TILE_SIZE)
                .and_then(|offset| destination.top.checked_add(offset))
            else {
                warn!(y = tile.y, "Tile y offset out of range");
                continue;
            };

            let source = ImageRegion {
                region: InclusiveRectangle {
                    left: 0,
                    top: 0,
                    right: TILE_SIZE - 1,
                    bottom: TILE_SIZE - 1,
                },
                step: 0,
                pixel_format: PixelFormat::RgbA32,
                data: &self.tiles.tile_output,
            };

            image.apply_region(&source, left, top);
        }

        Ok(())
    }

    fn decode_tile(&mut self, tile: &Tile<'_>, quants: [&Quant; 3], entropy: EntropyAlgorithm) -> SessionResult<()> {
        let context = &mut self.tiles;

        for ((data, quant), output) in [tile.y_data, tile.cb_data, tile.cr_data]
            .into_iter()
            .zip(quants)
            .zip(context.ycbcr_buffer.iter_mut())
        {
            decode_component(entropy, data, quant, output, &mut context.ycbcr_temp_buffer)?;
        }

        let input = YCbCrBuffer {
            y: &context.ycbcr_buffer[0],
            cb: &context.ycbcr_buffer[1],
            cr: &context.ycbcr_buffer[2],
        };

        color_conversion::ycbcr_to_rgba(input, &mut context.tile_output);

        Ok(())
    }
}

fn decode_component(
    entropy: EntropyAlgorithm,
    data: &[u8],
    quant: &Quant,
    output: &mut [i16],
    temp: &mut [i16],
) -> SessionResult<()> {
    rlgr::decode(entropy, data, output).map_err(|e| custom_err!("RLGR", e))?;
    // The LL3 sub-band occupies the last 64 coefficients and is
    // differentially encoded.
    subband_reconstruction::decode(&mut output[4032..]);
    quantization::decode(output, quant);
    dwt::decode(output, temp);

    Ok(())
}

fn tile_quants<'a>(tile_set: &'a TileSetPdu<'_>, tile: &Tile<'_>) -> SessionResult<[&'a Quant; 3]> {
    let quant = |index: u8| {
        tile_set
            .quants
            .get(usize::from(index))
            .ok_or_else(|| reason_err!("RemoteFX", "tile references quantization table {index} which does not exist"))
    };

    Ok([
        quant(tile.y_quant_index)?,
        quant(tile.cb_quant_index)?,
        quant(tile.cr_quant_index)?,
    ])
}

fn read_block<'a>(input: &mut &'a [u8]) -> SessionResult<Block<'a>> {
    let mut cursor = ReadCursor::new(input);
    let block = decode_cursor::<Block<'_>>(&mut cursor).map_err(SessionError::pdu)?;
    *input = cursor.remaining();

    Ok(block)
}

/// Reads the next block during the frame phase. Returns `None` when an
/// unknown block type was skipped over.
fn read_frame_block<'a>(input: &mut &'a [u8]) -> SessionResult<Option<Block<'a>>> {
    if input.len() < BlockHeader::FIXED_PART_SIZE {
        return Err(general_err!("truncated RemoteFX block header"));
    }

    let ty = u16::from_le_bytes([input[0], input[1]]);

    if BlockType::from_u16(ty).is_none() {
        let length = u32::from_le_bytes([input[2], input[3], input[4], input[5]]) as usize;

        if length < BlockHeader::FIXED_PART_SIZE || length > input.len() {
            return Err(reason_err!("RemoteFX", "unknown block 0x{ty:04X} with invalid length"));
        }

        debug!(block_type = ty, length, "Skipping unknown RemoteFX block");
        *input = &input[length..];

        return Ok(None);
    }

    read_block(input).map(Some)
}

struct DecodingTileContext {
    tile_output: Vec<u8>,
    ycbcr_buffer: [Vec<i16>; 3],
    ycbcr_temp_buffer: Vec<i16>,
}

impl DecodingTileContext {
    fn new() -> Self {
        let component_len = usize::from(TILE_SIZE) * usize::from(TILE_SIZE);

        Self {
            tile_output: vec![0; component_len * 4],
            ycbcr_buffer: [
                vec![0; component_len],
                vec![0; component_len],
                vec![0; component_len],
            ],
            ycbcr_temp_buffer: vec![0; component_len],
        }
    }
}

#[cfg(test)]
mod tests {
    use rdpgate_core::encode_vec;
    use rdpgate_pdu::rfx::{CodecVersionsPdu, FrameBeginPdu, FrameEndPdu, OperatingMode, RegionPdu, RfxChannel, SyncPdu};

    use super::*;

    fn encode_blocks(blocks: &[Block<'_>]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for block in blocks {
            bytes.extend_from_slice(&encode_vec(block).unwrap());
        }
        bytes
    }

    fn context_block() -> Block<'static> {
        Block::CodecChannel(CodecChannel::Context(ContextPdu {
            flags: OperatingMode::IMAGE_MODE,
            entropy_algorithm: EntropyAlgorithm::Rlgr3,
        }))
    }

    fn channels_block() -> Block<'static> {
        Block::Channels(ChannelsPdu(vec![RfxChannel { width: 64, height: 64 }]))
    }

    fn headers(order: &[Block<'static>]) -> Vec<u8> {
        let mut blocks = vec![Block::Sync(SyncPdu)];
        blocks.extend_from_slice(order);
        encode_blocks(&blocks)
    }

    fn empty_frame() -> Vec<u8> {
        encode_blocks(&[
            Block::CodecChannel(CodecChannel::FrameBegin(FrameBeginPdu {
                index: 7,
                number_of_regions: 0,
            })),
            Block::CodecChannel(CodecChannel::Region(RegionPdu { rectangles: vec![] })),
            Block::CodecChannel(CodecChannel::FrameEnd(FrameEndPdu)),
        ])
    }

    fn whole_destination() -> InclusiveRectangle {
        InclusiveRectangle {
            left: 0,
            top: 0,
            right: 63,
            bottom: 63,
        }
    }

    #[test]
    fn frame_before_sync_is_rejected() {
        let mut decoder = RemoteFxDecoder::new();
        let mut image = Framebuffer::new(64, 64);

        let bytes = empty_frame();
        let mut input = bytes.as_slice();

        let err = decoder
            .decode(&mut image, &whole_destination(), &mut input)
            .unwrap_err();

        assert!(err.to_string().contains("expected TS_RFX_SYNC"));
    }

    #[test]
    fn properties_are_accepted_in_any_order() {
        let orders: [[Block<'static>; 3]; 2] = [
            [context_block(), Block::CodecVersions(CodecVersionsPdu), channels_block()],
            [channels_block(), Block::CodecVersions(CodecVersionsPdu), context_block()],
        ];

        for order in orders {
            let mut decoder = RemoteFxDecoder::new();
            let mut image = Framebuffer::new(64, 64);

            let mut bytes = headers(&order);
            bytes.extend_from_slice(&empty_frame());
            let mut input = bytes.as_slice();

            let (frame_id, rectangle) = decoder
                .decode(&mut image, &whole_destination(), &mut input)
                .unwrap();

            assert_eq!(frame_id, 7);
            assert_eq!(rectangle, whole_destination());
            assert!(input.is_empty());
        }
    }

    #[test]
    fn missing_property_keeps_the_decoder_waiting() {
        let mut decoder = RemoteFxDecoder::new();
        let mut image = Framebuffer::new(64, 64);

        // no channels block before the frame
        let mut bytes = headers(&[context_block(), Block::CodecVersions(CodecVersionsPdu)]);
        bytes.extend_from_slice(&empty_frame());
        let mut input = bytes.as_slice();

        assert!(decoder.decode(&mut image, &whole_destination(), &mut input).is_err());
    }

    #[test]
    fn unknown_block_is_fatal_during_properties() {
        let mut decoder = RemoteFxDecoder::new();
        let mut image = Framebuffer::new(64, 64);

        let mut bytes = encode_blocks(&[Block::Sync(SyncPdu)]);
        // blockType 0xCBCB is not assigned
        bytes.extend_from_slice(&[0xCB, 0xCB, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let mut input = bytes.as_slice();

        assert!(decoder.decode(&mut image, &whole_destination(), &mut input).is_err());
    }

    #[test]
    fn unknown_block_is_skipped_during_a_frame() {
        let mut decoder = RemoteFxDecoder::new();
        let mut image = Framebuffer::new(64, 64);

        let mut bytes = headers(&[context_block(), Block::CodecVersions(CodecVersionsPdu), channels_block()]);
        bytes.extend_from_slice(&[0xCB, 0xCB, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00]);
        bytes.extend_from_slice(&empty_frame());
        let mut input = bytes.as_slice();

        let (frame_id, _) = decoder
            .decode(&mut image, &whole_destination(), &mut input)
            .unwrap();

        assert_eq!(frame_id, 7);
    }

    #[test]
    fn unknown_block_with_bogus_length_is_fatal_even_in_a_frame() {
        let mut decoder = RemoteFxDecoder::new();
        let mut image = Framebuffer::new(64, 64);

        let mut bytes = headers(&[context_block(), Block::CodecVersions(CodecVersionsPdu), channels_block()]);
        bytes.extend_from_slice(&[0xCB, 0xCB, 0x02, 0x00, 0x00, 0x00]);
        let mut input = bytes.as_slice();

        assert!(decoder.decode(&mut image, &whole_destination(), &mut input).is_err());
    }

    #[test]
    fn corrupted_sync_magic_is_rejected() {
        let mut decoder = RemoteFxDecoder::new();
        let mut image = Framebuffer::new(64, 64);

        let mut bytes = encode_blocks(&[Block::Sync(SyncPdu)]);
        bytes[6] = 0xFF; // first magic byte
        let mut input = bytes.as_slice();

        assert!(decoder.decode(&mut image, &whole_destination(), &mut input).is_err());
    }

    #[test]
    fn tile_with_out_of_range_quant_index_is_rejected() {
        let mut decoder = RemoteFxDecoder::new();
        let mut image = Framebuffer::new(64, 64);

        let headers_bytes = headers(&[context_block(), Block::CodecVersions(CodecVersionsPdu), channels_block()]);
        let mut input = headers_bytes.as_slice();
        // drive through the property phase; the frame phase returns when
        // input is exhausted, so feed the headers first
        let _ = decoder.decode(&mut image, &whole_destination(), &mut input);

        let frame = encode_blocks(&[
            Block::CodecChannel(CodecChannel::FrameBegin(FrameBeginPdu {
                index: 0,
                number_of_regions: 1,
            })),
            Block::CodecChannel(CodecChannel::TileSet(TileSetPdu {
                entropy_algorithm: EntropyAlgorithm::Rlgr3,
                quants: vec![Quant::default()],
                tiles: vec![Tile {
                    y_quant_index: 5,
                    cb_quant_index: 0,
                    cr_quant_index: 0,
                    x: 0,
                    y: 0,
                    y_data: &[],
                    cb_data: &[],
                    cr_data: &[],
                }],
            })),
        ]);
        let mut input = frame.as_slice();

        let err = decoder
            .decode(&mut image, &whole_destination(), &mut input)
            .unwrap_err();

        assert!(err.to_string().contains("quantization table"));
    }

    #[test]
    fn region_rectangles_are_translated_by_the_destination() {
        let mut decoder = RemoteFxDecoder::new();
        let mut image = Framebuffer::new(256, 256);

        let destination = InclusiveRectangle {
            left: 100,
            top: 50,
            right: 227,
            bottom: 177,
        };

        let mut bytes = headers(&[context_block(), Block::CodecVersions(CodecVersionsPdu), channels_block()]);
        bytes.extend_from_slice(&encode_blocks(&[
            Block::CodecChannel(CodecChannel::FrameBegin(FrameBeginPdu {
                index: 1,
                number_of_regions: 1,
            })),
            Block::CodecChannel(CodecChannel::Region(RegionPdu {
                rectangles: vec![RfxRectangle {
                    x: 8,
                    y: 16,
                    width: 32,
                    height: 8,
                }],
            })),
            Block::CodecChannel(CodecChannel::FrameEnd(FrameEndPdu)),
        ]));
        let mut input = bytes.as_slice();

        let (_, rectangle) = decoder.decode(&mut image, &destination, &mut input).unwrap();

        assert_eq!(
            rectangle,
            InclusiveRectangle {
                left: 108,
                top: 66,
                right: 139,
                bottom: 73,
            }
        );
    }
}
