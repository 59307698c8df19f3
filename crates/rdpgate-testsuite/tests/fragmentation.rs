//! Reassembly must not depend on where fragment boundaries fall, for both
//! the fast-path update accumulator and the virtual channel chunk collector.

use proptest::prelude::*;
use rdpgate_core::{encode_vec, Encode as _, WriteBuf};
use rdpgate_pdu::fast_path::{EncryptionFlags, FastPathHeader, FastPathUpdatePdu, Fragmentation, UpdateCode};
use rdpgate_session::{FastPathProcessor, GraphicsUpdate, UpdateSink};
use rdpgate_svc::{chunkify, ChannelFlags, ChunkCollector, CHANNEL_CHUNK_LENGTH};

#[derive(Default)]
struct RecordingSink {
    orders_seen: Vec<usize>,
}

impl UpdateSink for RecordingSink {
    fn update(&mut self, update: GraphicsUpdate<'_>) {
        if let GraphicsUpdate::Orders(orders) = update {
            self.orders_seen.push(orders.len());
        }
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

/// `order_count` OpaqueRect orders, 14 bytes each after the count.
fn orders_payload(order_count: usize) -> Vec<u8> {
    let mut payload = (order_count as u16).to_le_bytes().to_vec();

    for i in 0..order_count {
        // STANDARD | TYPE_CHANGE, OpaqueRect, all coordinate fields present
        payload.extend_from_slice(&[0x09, 0x0A, 0x7F]);
        payload.extend_from_slice(&(10 + i as u16).to_le_bytes()); // left
        payload.extend_from_slice(&20u16.to_le_bytes()); // top
        payload.extend_from_slice(&30u16.to_le_bytes()); // width
        payload.extend_from_slice(&40u16.to_le_bytes()); // height
        payload.extend_from_slice(&[0x11, 0x22, 0x33]); // color
    }

    payload
}

proptest! {
    #[test]
    fn fast_path_reassembly_is_split_invariant(
        order_count in 1usize..8,
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..4),
    ) {
        let payload = orders_payload(order_count);

        let mut boundaries: Vec<usize> = cuts.iter().map(|cut| cut.index(payload.len() + 1)).collect();
        boundaries.push(0);
        boundaries.push(payload.len());
        boundaries.sort_unstable();
        boundaries.dedup();

        let fragment_count = boundaries.len() - 1;

        let mut processor = processor();
        let mut sink = RecordingSink::default();
        let mut output = WriteBuf::new();

        for i in 0..fragment_count {
            let fragmentation = if fragment_count == 1 {
                Fragmentation::Single
            } else if i == 0 {
                Fragmentation::First
            } else if i == fragment_count - 1 {
                Fragmentation::Last
            } else {
                Fragmentation::Next
            };

            let pdu = encode_pdu(fragmentation, UpdateCode::Orders, &payload[boundaries[i]..boundaries[i + 1]]);
            processor.process(&mut sink, &pdu, &mut output).unwrap();

            if i < fragment_count - 1 {
                prop_assert!(sink.orders_seen.is_empty(), "update surfaced before the last fragment");
            }
        }

        prop_assert_eq!(&sink.orders_seen, &vec![order_count]);
    }

    #[test]
    fn chunkify_round_trips_through_the_collector(
        payload in prop::collection::vec(any::<u8>(), 0..6000),
    ) {
        let chunks = chunkify(&payload, ChannelFlags::empty()).unwrap();

        prop_assert!(!chunks.is_empty());
        prop_assert!(chunks.iter().all(|chunk| chunk.data.len() <= CHANNEL_CHUNK_LENGTH));
        prop_assert!(chunks[0].flags.contains(ChannelFlags::FLAG_FIRST));
        prop_assert!(chunks.last().unwrap().flags.contains(ChannelFlags::FLAG_LAST));
        prop_assert!(chunks.iter().all(|chunk| chunk.total_length as usize == payload.len()));

        let mut collector = ChunkCollector::new();
        let mut reassembled = None;

        for (i, chunk) in chunks.iter().enumerate() {
            let result = collector.process_chunk(chunk.total_length, chunk.flags, &chunk.data).unwrap();

            if i < chunks.len() - 1 {
                prop_assert!(result.is_none(), "PDU surfaced before the last chunk");
            } else {
                reassembled = result;
            }
        }

        prop_assert_eq!(reassembled, Some(payload));
    }

    #[test]
    fn collector_reassembly_is_split_invariant(
        payload in prop::collection::vec(any::<u8>(), 1..4000),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..5),
    ) {
        // arbitrary boundaries, unrelated to the wire chunk size
        let mut boundaries: Vec<usize> = cuts.iter().map(|cut| cut.index(payload.len())).collect();
        boundaries.push(0);
        boundaries.push(payload.len());
        boundaries.sort_unstable();
        boundaries.dedup();

        let fragment_count = boundaries.len() - 1;
        let total_length = payload.len() as u32;

        let mut collector = ChunkCollector::new();
        let mut reassembled = None;

        for i in 0..fragment_count {
            let mut flags = ChannelFlags::empty();
            if i == 0 {
                flags |= ChannelFlags::FLAG_FIRST;
            }
            if i == fragment_count - 1 {
                flags |= ChannelFlags::FLAG_LAST;
            }

            let result = collector
                .process_chunk(total_length, flags, &payload[boundaries[i]..boundaries[i + 1]])
                .unwrap();

            if i < fragment_count - 1 {
                prop_assert!(result.is_none(), "PDU surfaced before the last chunk");
            } else {
                reassembled = result;
            }
        }

        prop_assert_eq!(reassembled, Some(payload));
    }
}
