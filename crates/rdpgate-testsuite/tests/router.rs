//! Routing of fragmented clipboard traffic through the channel router.

use rdpgate_session::filters::CLIPRDR_CHANNEL_NAME;
use rdpgate_session::router::{RoutedChunk, RouterOutput};
use rdpgate_session::VirtualChannelRouter;
use rdpgate_svc::{ChannelAuthorizer, ChannelFlags, NullEventSink, UnlistedPolicy};

const CLIPRDR_CHANNEL_ID: u16 = 1005;

fn router() -> VirtualChannelRouter {
    VirtualChannelRouter::new(
        vec![(CLIPRDR_CHANNEL_ID, CLIPRDR_CHANNEL_NAME)],
        ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted).with_clipboard(true, true, true),
    )
}

#[test]
fn fragmented_clipboard_pdu_is_forwarded_as_one_logical_chunk() {
    let mut router = router();
    let mut sink = NullEventSink;

    // 200-byte clipboard PDU with a msgType the filter passes through
    let mut pdu = vec![0xF0, 0x00, 0x00, 0x00];
    pdu.extend_from_slice(&192u32.to_le_bytes()); // dataLen
    pdu.resize(200, 0xCD);

    let total_length = pdu.len() as u32;

    // 80 + 80 + 40 bytes; nothing is forwarded until the PDU is whole
    let first = router
        .route_to_server(&CLIPRDR_CHANNEL_NAME, total_length, ChannelFlags::FLAG_FIRST, &pdu[..80], &mut sink)
        .unwrap();
    assert_eq!(first, RouterOutput::default());

    let middle = router
        .route_to_server(&CLIPRDR_CHANNEL_NAME, total_length, ChannelFlags::empty(), &pdu[80..160], &mut sink)
        .unwrap();
    assert_eq!(middle, RouterOutput::default());

    let last = router
        .route_to_server(&CLIPRDR_CHANNEL_NAME, total_length, ChannelFlags::FLAG_LAST, &pdu[160..], &mut sink)
        .unwrap();

    assert!(last.to_client.is_empty());
    assert_eq!(
        last.to_server,
        vec![RoutedChunk {
            channel_id: CLIPRDR_CHANNEL_ID,
            total_length,
            flags: ChannelFlags::FLAG_FIRST | ChannelFlags::FLAG_LAST,
            data: pdu,
        }]
    );
}
