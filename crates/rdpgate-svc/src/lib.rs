//! Static virtual channel plumbing shared by the channel router and the
//! per-channel filters: chunk reassembly and fragmentation, the
//! [`ChannelFilter`] processor contract, and the [`ChannelAuthorizer`]
//! policy snapshot.

#[macro_use]
extern crate tracing;

pub mod authorizer;

use core::mem;

use rdpgate_core::{cast_length, invalid_field_err, PduResult};

pub use rdpgate_pdu::gcc::ChannelName;
pub use rdpgate_pdu::vc::{ChannelControlFlags as ChannelFlags, ChannelPduHeader, CHANNEL_PDU_HEADER_SIZE};

pub use crate::authorizer::{ChannelAuthorizer, DeviceClass, UnlistedPolicy};

/// The maximum size of the data payload of one virtual channel chunk,
/// excluding the chunk header (`CHANNEL_CHUNK_LENGTH` in MS-RDPBCGR 2.2.6).
pub const CHANNEL_CHUNK_LENGTH: usize = 1600;

/// One wire fragment of a logical channel PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelChunk {
    /// Size in bytes of the logical PDU this chunk belongs to.
    pub total_length: u32,
    pub flags: ChannelFlags,
    pub data: Vec<u8>,
}

/// Splits a logical channel payload into wire chunks of at most
/// [`CHANNEL_CHUNK_LENGTH`] bytes.
///
/// FIRST and LAST are computed from the chunk position rather than copied
/// from the inbound flags; `base_flags` carries the bits that apply to every
/// fragment, such as SHOW_PROTOCOL.
pub fn chunkify(data: &[u8], base_flags: ChannelFlags) -> PduResult<Vec<ChannelChunk>> {
    let total_length: u32 = cast_length!("totalLength", data.len())?;

    if data.is_empty() {
        return Ok(vec![ChannelChunk {
            total_length,
            flags: base_flags | ChannelFlags::FLAG_FIRST | ChannelFlags::FLAG_LAST,
            data: Vec::new(),
        }]);
    }

    let count = data.len().div_ceil(CHANNEL_CHUNK_LENGTH);
    let mut chunks = Vec::with_capacity(count);

    for (idx, piece) in data.chunks(CHANNEL_CHUNK_LENGTH).enumerate() {
        let mut flags = base_flags;
        if idx == 0 {
            flags |= ChannelFlags::FLAG_FIRST;
        }
        if idx == count - 1 {
            flags |= ChannelFlags::FLAG_LAST;
        }

        chunks.push(ChannelChunk {
            total_length,
            flags,
            data: piece.to_vec(),
        });
    }

    Ok(chunks)
}

/// Reassembles chunked virtual channel PDUs into logical PDUs
/// (MS-RDPBCGR 3.1.5.2.2).
///
/// Within one channel, chunks arrive in order FIRST, (intermediate)*, LAST
/// with no interleaving, so a single buffer per channel is enough.
#[derive(Debug, Default)]
pub struct ChunkCollector {
    total_length: usize,
    buffer: Vec<u8>,
}

impl ChunkCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk; returns the logical PDU once the LAST chunk closes it.
    pub fn process_chunk(
        &mut self,
        total_length: u32,
        flags: ChannelFlags,
        chunk: &[u8],
    ) -> PduResult<Option<Vec<u8>>> {
        if flags.contains(ChannelFlags::FLAG_FIRST) {
            if !self.buffer.is_empty() {
                warn!("Incomplete channel PDU discarded by a new FIRST chunk");
            }
            self.total_length = total_length as usize;
            self.buffer.clear();
            self.buffer.reserve(self.total_length);
        } else if self.total_length == 0 && self.buffer.is_empty() {
            return Err(invalid_field_err(
                "ChunkCollector",
                "flags",
                "chunk received without a FIRST fragment",
            ));
        }

        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() > self.total_length {
            self.reset();
            return Err(invalid_field_err(
                "ChunkCollector",
                "totalLength",
                "reassembled data exceeds the declared total length",
            ));
        }

        if flags.contains(ChannelFlags::FLAG_LAST) {
            if self.buffer.len() != self.total_length {
                self.reset();
                return Err(invalid_field_err(
                    "ChunkCollector",
                    "totalLength",
                    "LAST chunk closes an incomplete PDU",
                ));
            }

            self.total_length = 0;
            Ok(Some(mem::take(&mut self.buffer)))
        } else {
            Ok(None)
        }
    }

    fn reset(&mut self) {
        self.total_length = 0;
        self.buffer.clear();
    }
}

/// An action a channel filter asks the router to carry out.
///
/// Filters never hold references to the peers; everything they want done is
/// expressed as a returned effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEffect {
    /// Forward a logical PDU to the server; the router fragments it on send.
    SendToServer(Vec<u8>),
    /// Forward a logical PDU to the client.
    SendToClient(Vec<u8>),
    /// Record a security event in the session log.
    Log(SessionEvent),
}

/// Direction of a data transfer through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    ClientToServer,
    ServerToClient,
}

/// Typed security events emitted by the channel filters.
///
/// These are audit records for the session log and are distinct from the
/// diagnostic `tracing` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A drdynvc CREATE_REQUEST was refused by policy.
    DynamicChannelCreationRejected { channel_name: String },
    /// A clipboard data transfer was replaced by a deny response.
    ClipboardTransferDenied { direction: TransferDirection },
    /// A clipboard file transfer was replaced by a deny response.
    ClipboardFileTransferDenied { direction: TransferDirection },
    /// A device announcement was stripped from an rdpdr announce list.
    DeviceRedirectionRejected { device_name: String, device_class: DeviceClass },
    /// A RemoteApp execution request was observed on the rail channel.
    ApplicationExecutionRequested { application: String },
    /// The server reported the outcome of a RemoteApp execution request.
    ApplicationExecutionResult { application: String, exec_result: u16 },
}

/// Fire-and-forget consumer of session security events.
pub trait SessionEventSink {
    fn emit(&mut self, event: SessionEvent);
}

/// Sink discarding every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl SessionEventSink for NullEventSink {
    fn emit(&mut self, _event: SessionEvent) {}
}

/// Deep-inspection processor for one static virtual channel.
///
/// The filter sees the channel's chunks exactly as the router received them,
/// in both directions, and returns the effects to apply. A filter is free to
/// drop, transform, split or forward a message unchanged, and to originate
/// new messages to either peer.
pub trait ChannelFilter: Send {
    /// Name of the channel this filter inspects.
    fn channel_name(&self) -> ChannelName;

    /// Processes one chunk flowing from the client to the server.
    fn process_client_chunk(
        &mut self,
        total_length: u32,
        flags: ChannelFlags,
        chunk: &[u8],
    ) -> PduResult<Vec<ChannelEffect>>;

    /// Processes one chunk flowing from the server to the client.
    fn process_server_chunk(
        &mut self,
        total_length: u32,
        flags: ChannelFlags,
        chunk: &[u8],
    ) -> PduResult<Vec<ChannelEffect>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_is_a_single_chunk() {
        let chunks = chunkify(&[1, 2, 3], ChannelFlags::empty()).unwrap();

        assert_eq!(
            chunks,
            vec![ChannelChunk {
                total_length: 3,
                flags: ChannelFlags::FLAG_FIRST | ChannelFlags::FLAG_LAST,
                data: vec![1, 2, 3],
            }]
        );
    }

    #[test]
    fn empty_payload_is_a_single_empty_chunk() {
        let chunks = chunkify(&[], ChannelFlags::empty()).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].total_length, 0);
        assert!(chunks[0]
            .flags
            .contains(ChannelFlags::FLAG_FIRST | ChannelFlags::FLAG_LAST));
        assert!(chunks[0].data.is_empty());
    }

    #[test]
    fn large_payload_is_fragmented_with_positional_flags() {
        let data = vec![0xAB; 4000];

        let chunks = chunkify(&data, ChannelFlags::FLAG_SHOW_PROTOCOL).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].data.len(), CHANNEL_CHUNK_LENGTH);
        assert_eq!(chunks[1].data.len(), CHANNEL_CHUNK_LENGTH);
        assert_eq!(chunks[2].data.len(), 800);

        assert_eq!(
            chunks[0].flags,
            ChannelFlags::FLAG_FIRST | ChannelFlags::FLAG_SHOW_PROTOCOL
        );
        assert_eq!(chunks[1].flags, ChannelFlags::FLAG_SHOW_PROTOCOL);
        assert_eq!(
            chunks[2].flags,
            ChannelFlags::FLAG_LAST | ChannelFlags::FLAG_SHOW_PROTOCOL
        );

        assert!(chunks.iter().all(|c| c.total_length == 4000));
    }

    #[test]
    fn collector_returns_an_unfragmented_pdu_immediately() {
        let mut collector = ChunkCollector::new();

        let out = collector
            .process_chunk(
                4,
                ChannelFlags::FLAG_FIRST | ChannelFlags::FLAG_LAST,
                &[1, 2, 3, 4],
            )
            .unwrap();

        assert_eq!(out, Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn collector_reassembles_three_fragments() {
        let mut collector = ChunkCollector::new();

        assert_eq!(
            collector
                .process_chunk(200, ChannelFlags::FLAG_FIRST, &[1; 80])
                .unwrap(),
            None
        );
        assert_eq!(
            collector
                .process_chunk(200, ChannelFlags::empty(), &[2; 80])
                .unwrap(),
            None
        );

        let out = collector
            .process_chunk(200, ChannelFlags::FLAG_LAST, &[3; 40])
            .unwrap()
            .unwrap();

        assert_eq!(out.len(), 200);
        assert_eq!(&out[..80], &[1; 80][..]);
        assert_eq!(&out[80..160], &[2; 80][..]);
        assert_eq!(&out[160..], &[3; 40][..]);
    }

    #[test]
    fn collector_rejects_a_chunk_without_first() {
        let mut collector = ChunkCollector::new();

        assert!(collector
            .process_chunk(100, ChannelFlags::empty(), &[0; 10])
            .is_err());
    }

    #[test]
    fn collector_rejects_data_past_the_declared_length() {
        let mut collector = ChunkCollector::new();

        collector
            .process_chunk(10, ChannelFlags::FLAG_FIRST, &[0; 8])
            .unwrap();

        assert!(collector
            .process_chunk(10, ChannelFlags::empty(), &[0; 8])
            .is_err());
    }

    #[test]
    fn collector_rejects_a_short_last_chunk() {
        let mut collector = ChunkCollector::new();

        collector
            .process_chunk(100, ChannelFlags::FLAG_FIRST, &[0; 40])
            .unwrap();

        assert!(collector
            .process_chunk(100, ChannelFlags::FLAG_LAST, &[0; 40])
            .is_err());
    }

    #[test]
    fn collector_recovers_after_a_failed_pdu() {
        let mut collector = ChunkCollector::new();

        collector
            .process_chunk(100, ChannelFlags::FLAG_FIRST, &[0; 40])
            .unwrap();
        let _ = collector.process_chunk(100, ChannelFlags::FLAG_LAST, &[0; 40]);

        let out = collector
            .process_chunk(
                2,
                ChannelFlags::FLAG_FIRST | ChannelFlags::FLAG_LAST,
                &[7, 7],
            )
            .unwrap();

        assert_eq!(out, Some(vec![7, 7]));
    }
}
