//! Fast-path update processing: fragment reassembly, update dispatch and
//! RemoteFX surface composition.

use rdpgate_core::{Decode as _, PduErrorKind, ReadCursor, WriteBuf};
use rdpgate_pdu::fast_path::{EncryptionFlags, FastPathHeader, FastPathUpdate, FastPathUpdatePdu, Fragmentation};
use rdpgate_pdu::geometry::InclusiveRectangle;
use rdpgate_pdu::pointer::PointerUpdateData;
use rdpgate_pdu::rdp::client_info::CompressionType;
use rdpgate_pdu::rdp::headers::{
    CompressionFlags, ShareControlHeader, ShareControlPdu, ShareDataHeader, ShareDataPdu, StreamPriority,
};
use rdpgate_pdu::surface_commands::{FrameAction, SurfaceCommand};
use rdpgate_pdu::{bitmap, palette};

use crate::image::Framebuffer;
use crate::orders::{OrderDecoder, PrimaryOrder};
use crate::rfx::RemoteFxDecoder;
use crate::{SessionError, SessionErrorExt as _, SessionResult};

/// TS_BITMAP_DATA_EX codecId negotiated for the RemoteFX codec.
const RFX_CODEC_ID: u8 = 3;

/// One decoded graphics update, handed to the caller's [`UpdateSink`].
#[derive(Debug)]
pub enum GraphicsUpdate<'a> {
    Orders(Vec<PrimaryOrder>),
    Bitmap(bitmap::BitmapUpdateData<'a>),
    Palette(palette::PaletteUpdateData),
    Synchronize,
    Pointer(PointerUpdateData<'a>),
    /// A RemoteFX frame region was composited onto the surface.
    SurfaceRegion {
        framebuffer: &'a Framebuffer,
        region: InclusiveRectangle,
    },
}

/// Receiver for decoded graphics updates. Purely observational: returning
/// from [`UpdateSink::update`] is the only acknowledgement.
pub trait UpdateSink {
    fn update(&mut self, update: GraphicsUpdate<'_>);
}

/// Decodes the fast-path output stream of one session.
///
/// Owns the composition surface, the fragment accumulator and the persistent
/// drawing-order state. Frame marker commands ending a frame are answered
/// with a Frame Acknowledge PDU written into the caller's output buffer.
pub struct FastPathProcessor {
    framebuffer: Framebuffer,
    complete_data: CompleteData,
    rfx_decoder: RemoteFxDecoder,
    order_decoder: OrderDecoder,
    user_channel_id: u16,
    io_channel_id: u16,
    last_rfx_frame_id: u32,
}

impl FastPathProcessor {
    pub fn new(desktop_size: rdpgate_connector::DesktopSize, user_channel_id: u16, io_channel_id: u16) -> Self {
        Self {
            framebuffer: Framebuffer::new(desktop_size.width, desktop_size.height),
            complete_data: CompleteData::default(),
            rfx_decoder: RemoteFxDecoder::new(),
            order_decoder: OrderDecoder::new(),
            user_channel_id,
            io_channel_id,
            last_rfx_frame_id: 0,
        }
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Processes one fast-path PDU (framing header included).
    ///
    /// Decoded updates go to `sink`; anything the processor wants sent back
    /// to the server is appended to `output`.
    pub fn process(&mut self, sink: &mut dyn UpdateSink, input: &[u8], output: &mut WriteBuf) -> SessionResult<()> {
        let mut cursor = ReadCursor::new(input);

        let header = FastPathHeader::decode(&mut cursor).map_err(SessionError::pdu)?;
        if header.flags.contains(EncryptionFlags::ENCRYPTED) {
            return Err(reason_err!("FastPath", "legacy fast-path encryption is not supported"));
        }

        let update_pdu = FastPathUpdatePdu::decode(&mut cursor).map_err(SessionError::pdu)?;
        let update_code = update_pdu.update_code;

        let Some(data) = self.complete_data.process_data(update_pdu.data, update_pdu.fragmentation) else {
            return Ok(());
        };

        match FastPathUpdate::decode_with_code(&data, update_code) {
            Ok(FastPathUpdate::Orders(orders)) => {
                let decoded = self.order_decoder.decode_orders(orders.number_of_orders, orders.data)?;
                sink.update(GraphicsUpdate::Orders(decoded));
            }
            Ok(FastPathUpdate::Bitmap(bitmap)) => sink.update(GraphicsUpdate::Bitmap(bitmap)),
            Ok(FastPathUpdate::Palette(palette)) => sink.update(GraphicsUpdate::Palette(palette)),
            Ok(FastPathUpdate::Synchronize) => sink.update(GraphicsUpdate::Synchronize),
            Ok(FastPathUpdate::Pointer(pointer)) => sink.update(GraphicsUpdate::Pointer(pointer)),
            Ok(FastPathUpdate::SurfaceCommands(commands)) => {
                self.process_surface_commands(sink, output, commands)?;
            }
            Err(e) if matches!(e.kind(), PduErrorKind::InvalidField { .. } | PduErrorKind::UnsupportedValue { .. }) => {
                warn!(error = %e.report(), "Skipping malformed {:?} update", update_code);
            }
            Err(e) => return Err(custom_err!("FastPath", e)),
        }

        Ok(())
    }

    fn process_surface_commands(
        &mut self,
        sink: &mut dyn UpdateSink,
        output: &mut WriteBuf,
        commands: Vec<SurfaceCommand<'_>>,
    ) -> SessionResult<()> {
        for command in commands {
            match command {
                SurfaceCommand::SetSurfaceBits(bits) | SurfaceCommand::StreamSurfaceBits(bits) => {
                    let codec_id = bits.extended_bitmap_data.codec_id;
                    if codec_id != RFX_CODEC_ID {
                        return Err(reason_err!("SurfaceBits", "unexpected codec ID: {codec_id:#x}"));
                    }

                    // exclusive on the wire, inclusive for composition
                    let destination = InclusiveRectangle {
                        left: bits.destination.left,
                        top: bits.destination.top,
                        right: bits.destination.right.saturating_sub(1),
                        bottom: bits.destination.bottom.saturating_sub(1),
                    };

                    let mut data = bits.extended_bitmap_data.data;
                    while !data.is_empty() {
                        let (frame_id, region) =
                            self.rfx_decoder.decode(&mut self.framebuffer, &destination, &mut data)?;
                        self.last_rfx_frame_id = frame_id;

                        sink.update(GraphicsUpdate::SurfaceRegion {
                            framebuffer: &self.framebuffer,
                            region,
                        });
                    }
                }
                SurfaceCommand::FrameMarker(marker) => {
                    trace!(action = ?marker.frame_action, frame_id = ?marker.frame_id, "Frame marker");

                    if marker.frame_action == FrameAction::End {
                        let frame_id = marker.frame_id.unwrap_or(self.last_rfx_frame_id);
                        self.send_frame_acknowledge(frame_id, output)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn send_frame_acknowledge(&self, frame_id: u32, output: &mut WriteBuf) -> SessionResult<()> {
        let header = ShareControlHeader {
            share_control_pdu: ShareControlPdu::Data(ShareDataHeader {
                share_data_pdu: ShareDataPdu::FrameAcknowledge(rdpgate_pdu::rfx::FrameAcknowledgePdu { frame_id }),
                stream_priority: StreamPriority::Low,
                compression_flags: CompressionFlags::empty(),
                compression_type: CompressionType::K8,
            }),
            pdu_source: self.user_channel_id,
            share_id: 0,
        };

        rdpgate_connector::encode_send_data_request(self.user_channel_id, self.io_channel_id, &header, output)
            .map_err(|e| custom_err!("FrameAcknowledge", e))?;

        Ok(())
    }
}

/// Reassembles fast-path update fragments.
///
/// A SINGLE or FIRST fragment arriving while another update is pending
/// discards the pending data with a warning; a NEXT or LAST fragment without
/// a preceding FIRST is dropped the same way.
#[derive(Debug, Default)]
struct CompleteData {
    fragmented_data: Option<Vec<u8>>,
}

impl CompleteData {
    fn process_data(&mut self, data: &[u8], fragmentation: Fragmentation) -> Option<Vec<u8>> {
        match fragmentation {
            Fragmentation::Single => {
                if self.fragmented_data.take().is_some() {
                    warn!("Skipping pending fragments because an unfragmented update arrived");
                }

                Some(data.to_vec())
            }
            Fragmentation::First => {
                if self.fragmented_data.replace(data.to_vec()).is_some() {
                    warn!("Restarting reassembly because a new first fragment arrived");
                }

                None
            }
            Fragmentation::Next => {
                self.append(data);

                None
            }
            Fragmentation::Last => {
                self.append(data);

                self.fragmented_data.take()
            }
        }
    }

    fn append(&mut self, data: &[u8]) {
        match &mut self.fragmented_data {
            Some(buffer) => buffer.extend_from_slice(data),
            None => warn!("A continuation fragment arrived without a first fragment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rdpgate_core::{encode_vec, Encode as _};
    use rdpgate_pdu::fast_path::UpdateCode;

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Seen {
        Orders(usize),
        Bitmap,
        Palette,
        Synchronize,
        Pointer,
        SurfaceRegion(InclusiveRectangle),
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Vec<Seen>,
    }

    impl UpdateSink for RecordingSink {
        fn update(&mut self, update: GraphicsUpdate<'_>) {
            self.seen.push(match update {
                GraphicsUpdate::Orders(orders) => Seen::Orders(orders.len()),
                GraphicsUpdate::Bitmap(_) => Seen::Bitmap,
                GraphicsUpdate::Palette(_) => Seen::Palette,
                GraphicsUpdate::Synchronize => Seen::Synchronize,
                GraphicsUpdate::Pointer(_) => Seen::Pointer,
                GraphicsUpdate::SurfaceRegion { region, .. } => Seen::SurfaceRegion(region),
            });
        }
    }

    fn processor() -> FastPathProcessor {
        FastPathProcessor::new(
            rdpgate_connector::DesktopSize {
                width: 1024,
                height: 768,
            },
            1004,
            1003,
        )
    }

    fn encode_pdu(fragmentation: Fragmentation, update_code: UpdateCode, data: &[u8]) -> Vec<u8> {
        let update = FastPathUpdatePdu {
            fragmentation,
            update_code,
            compression_flags: None,
            compression_type: None,
            data,
        };

        let header = FastPathHeader::new(EncryptionFlags::empty(), update.size());

        let mut out = encode_vec(&header).unwrap();
        out.extend_from_slice(&encode_vec(&update).unwrap());
        out
    }

    #[test]
    fn synchronize_update_reaches_the_sink() {
        let mut processor = processor();
        let mut sink = RecordingSink::default();
        let mut output = WriteBuf::new();

        let pdu = encode_pdu(Fragmentation::Single, UpdateCode::Synchronize, &[]);
        processor.process(&mut sink, &pdu, &mut output).unwrap();

        assert_eq!(sink.seen, vec![Seen::Synchronize]);
        assert!(output.filled().is_empty());
    }

    #[test]
    fn fragmented_orders_update_is_reassembled() {
        let mut processor = processor();
        let mut sink = RecordingSink::default();
        let mut output = WriteBuf::new();

        // one full OpaqueRect order, split across two fragments
        let orders_payload = [
            0x01, 0x00, // numberOfOrders
            0x09, 0x0A, 0x7F, // STANDARD | TYPE_CHANGE, OpaqueRect, all fields
            0x0A, 0x00, 0x14, 0x00, 0x1E, 0x00, 0x28, 0x00, 0x11, 0x22, 0x33,
        ];

        let first = encode_pdu(Fragmentation::First, UpdateCode::Orders, &orders_payload[..6]);
        let last = encode_pdu(Fragmentation::Last, UpdateCode::Orders, &orders_payload[6..]);

        processor.process(&mut sink, &first, &mut output).unwrap();
        assert!(sink.seen.is_empty());

        processor.process(&mut sink, &last, &mut output).unwrap();
        assert_eq!(sink.seen, vec![Seen::Orders(1)]);
    }

    #[test]
    fn continuation_without_first_fragment_is_dropped() {
        let mut processor = processor();
        let mut sink = RecordingSink::default();
        let mut output = WriteBuf::new();

        let next = encode_pdu(Fragmentation::Next, UpdateCode::Orders, &[0x00; 4]);
        let last = encode_pdu(Fragmentation::Last, UpdateCode::Orders, &[0x00; 4]);

        processor.process(&mut sink, &next, &mut output).unwrap();
        processor.process(&mut sink, &last, &mut output).unwrap();

        assert!(sink.seen.is_empty());
    }

    #[test]
    fn encrypted_fast_path_is_rejected() {
        let mut processor = processor();
        let mut sink = RecordingSink::default();
        let mut output = WriteBuf::new();

        let update = FastPathUpdatePdu {
            fragmentation: Fragmentation::Single,
            update_code: UpdateCode::Synchronize,
            compression_flags: None,
            compression_type: None,
            data: &[],
        };
        let header = FastPathHeader::new(EncryptionFlags::ENCRYPTED, update.size());
        let mut pdu = encode_vec(&header).unwrap();
        pdu.extend_from_slice(&encode_vec(&update).unwrap());

        assert!(processor.process(&mut sink, &pdu, &mut output).is_err());
    }

    #[test]
    fn frame_marker_end_is_acknowledged() {
        let mut processor = processor();
        let mut sink = RecordingSink::default();
        let mut output = WriteBuf::new();

        // TS_FRAME_MARKER: cmdType, frameAction = end, frameId = 3
        let surface_payload = [0x04, 0x00, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00];
        let pdu = encode_pdu(Fragmentation::Single, UpdateCode::SurfaceCommands, &surface_payload);

        processor.process(&mut sink, &pdu, &mut output).unwrap();

        assert!(sink.seen.is_empty());
        // a Frame Acknowledge went out to the server
        assert!(!output.filled().is_empty());
    }

    #[test]
    fn frame_marker_begin_is_not_acknowledged() {
        let mut processor = processor();
        let mut sink = RecordingSink::default();
        let mut output = WriteBuf::new();

        let surface_payload = [0x04, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00];
        let pdu = encode_pdu(Fragmentation::Single, UpdateCode::SurfaceCommands, &surface_payload);

        processor.process(&mut sink, &pdu, &mut output).unwrap();

        assert!(output.filled().is_empty());
    }

    #[test]
    fn surface_bits_with_unknown_codec_is_fatal() {
        let mut processor = processor();
        let mut sink = RecordingSink::default();
        let mut output = WriteBuf::new();

        // TS_SURFCMD_SET_SURF_BITS with codecId 9
        let surface_payload = [
            0x01, 0x00, // cmdType: set surface bits
            0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x40, 0x00, // destination
            0x20, // bpp
            0x00, // flags
            0x00, // reserved
            0x09, // codecId
            0x40, 0x00, 0x40, 0x00, // width, height
            0x00, 0x00, 0x00, 0x00, // bitmapDataLength
        ];
        let pdu = encode_pdu(Fragmentation::Single, UpdateCode::SurfaceCommands, &surface_payload);

        assert!(processor.process(&mut sink, &pdu, &mut output).is_err());
    }
}
