//! Static virtual channel routing.
//!
//! The router owns the id→name channel table negotiated by the connector
//! and moves chunks between the peers. Channels the proxy understands
//! (cliprdr, rdpdr, rail, drdynvc) are handed to deep-inspection filters,
//! instantiated on first use; every other channel forwards verbatim.
//!
//! Filters return whole logical PDUs; the router fragments them back into
//! wire chunks on the way out.

use std::collections::HashMap;

use rdpgate_dvc::{DrdynvcFilter, DRDYNVC_CHANNEL_NAME};
use rdpgate_svc::{
    chunkify, ChannelAuthorizer, ChannelEffect, ChannelFilter, ChannelFlags, ChannelName, SessionEventSink,
};

use crate::filters::{
    CliprdrFilter, IdentityWindowIdMapper, RailFilter, RdpdrFilter, WindowIdMapper, CLIPRDR_CHANNEL_NAME,
    RAIL_CHANNEL_NAME, RDPDR_CHANNEL_NAME,
};
use crate::{SessionError, SessionErrorExt as _, SessionResult};

/// One wire chunk addressed to a specific channel id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedChunk {
    pub channel_id: u16,
    pub total_length: u32,
    pub flags: ChannelFlags,
    pub data: Vec<u8>,
}

/// Chunks produced by routing one inbound chunk.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RouterOutput {
    pub to_server: Vec<RoutedChunk>,
    pub to_client: Vec<RoutedChunk>,
}

enum Direction {
    ToServer,
    ToClient,
}

/// Routes static virtual channel traffic between the two peers of a
/// proxied session.
pub struct VirtualChannelRouter {
    channels: Vec<(u16, ChannelName)>,
    authorizer: ChannelAuthorizer,
    filters: HashMap<ChannelName, Box<dyn ChannelFilter>>,
    /// Consumed when the rail filter is instantiated.
    window_id_mapper: Option<Box<dyn WindowIdMapper>>,
}

impl VirtualChannelRouter {
    /// `channels` is the joined channel table from the connector's
    /// negotiation result.
    pub fn new(channels: Vec<(u16, ChannelName)>, authorizer: ChannelAuthorizer) -> Self {
        Self {
            channels,
            authorizer,
            filters: HashMap::new(),
            window_id_mapper: None,
        }
    }

    /// Installs the window id mapper the rail filter will use. Must be
    /// called before the first rail chunk; later calls are ignored.
    #[must_use]
    pub fn with_window_id_mapper(mut self, mapper: Box<dyn WindowIdMapper>) -> Self {
        self.window_id_mapper = Some(mapper);
        self
    }

    pub fn channel_id(&self, name: &ChannelName) -> Option<u16> {
        self.channels.iter().find(|(_, n)| n == name).map(|(id, _)| *id)
    }

    pub fn channel_name(&self, channel_id: u16) -> Option<&ChannelName> {
        self.channels.iter().find(|(id, _)| *id == channel_id).map(|(_, n)| n)
    }

    /// Routes a chunk the client sent toward the server.
    pub fn route_to_server(
        &mut self,
        name: &ChannelName,
        total_length: u32,
        flags: ChannelFlags,
        chunk: &[u8],
        events: &mut dyn SessionEventSink,
    ) -> SessionResult<RouterOutput> {
        self.route(Direction::ToServer, name, total_length, flags, chunk, events)
    }

    /// Routes a chunk the server sent toward the client.
    pub fn route_to_client(
        &mut self,
        name: &ChannelName,
        total_length: u32,
        flags: ChannelFlags,
        chunk: &[u8],
        events: &mut dyn SessionEventSink,
    ) -> SessionResult<RouterOutput> {
        self.route(Direction::ToClient, name, total_length, flags, chunk, events)
    }

    fn route(
        &mut self,
        direction: Direction,
        name: &ChannelName,
        total_length: u32,
        flags: ChannelFlags,
        chunk: &[u8],
        events: &mut dyn SessionEventSink,
    ) -> SessionResult<RouterOutput> {
        let channel_id = self
            .channel_id(name)
            .ok_or_else(|| reason_err!("Router", "unknown channel: {name:?}"))?;

        if !self.is_filtered(name) {
            // verbatim forward, chunk boundaries preserved
            let forwarded = RoutedChunk {
                channel_id,
                total_length,
                flags,
                data: chunk.to_vec(),
            };

            let mut output = RouterOutput::default();
            match direction {
                Direction::ToServer => output.to_server.push(forwarded),
                Direction::ToClient => output.to_client.push(forwarded),
            }

            return Ok(output);
        }

        let filter = self.filter_for(name);
        let effects = match direction {
            Direction::ToServer => filter.process_client_chunk(total_length, flags, chunk),
            Direction::ToClient => filter.process_server_chunk(total_length, flags, chunk),
        }
        .map_err(SessionError::pdu)?;

        self.apply_effects(channel_id, effects, events)
    }

    fn apply_effects(
        &mut self,
        channel_id: u16,
        effects: Vec<ChannelEffect>,
        events: &mut dyn SessionEventSink,
    ) -> SessionResult<RouterOutput> {
        let mut output = RouterOutput::default();

        for effect in effects {
            match effect {
                ChannelEffect::SendToServer(payload) => {
                    let chunks = chunkify(&payload, ChannelFlags::empty()).map_err(SessionError::pdu)?;
                    output.to_server.extend(chunks.into_iter().map(|c| RoutedChunk {
                        channel_id,
                        total_length: c.total_length,
                        flags: c.flags,
                        data: c.data,
                    }));
                }
                ChannelEffect::SendToClient(payload) => {
                    let chunks = chunkify(&payload, ChannelFlags::empty()).map_err(SessionError::pdu)?;
                    output.to_client.extend(chunks.into_iter().map(|c| RoutedChunk {
                        channel_id,
                        total_length: c.total_length,
                        flags: c.flags,
                        data: c.data,
                    }));
                }
                ChannelEffect::Log(event) => events.emit(event),
            }
        }

        Ok(output)
    }

    fn is_filtered(&self, name: &ChannelName) -> bool {
        *name == CLIPRDR_CHANNEL_NAME
            || *name == RDPDR_CHANNEL_NAME
            || *name == RAIL_CHANNEL_NAME
            || *name == DRDYNVC_CHANNEL_NAME
    }

    fn filter_for(&mut self, name: &ChannelName) -> &mut Box<dyn ChannelFilter> {
        let authorizer = &self.authorizer;
        let mapper = &mut self.window_id_mapper;

        self.filters.entry(name.clone()).or_insert_with(|| {
            debug!(channel = ?name, "Instantiating channel filter");

            if *name == CLIPRDR_CHANNEL_NAME {
                Box::new(CliprdrFilter::new(authorizer.clone()))
            } else if *name == RDPDR_CHANNEL_NAME {
                Box::new(RdpdrFilter::new(authorizer.clone()))
            } else if *name == RAIL_CHANNEL_NAME {
                let mapper = mapper.take().unwrap_or_else(|| Box::new(IdentityWindowIdMapper));
                Box::new(RailFilter::new(mapper))
            } else {
                Box::new(DrdynvcFilter::new(authorizer.clone()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use rdpgate_svc::{SessionEvent, UnlistedPolicy, CHANNEL_CHUNK_LENGTH};

    use super::*;

    const BOTH: ChannelFlags = ChannelFlags::FLAG_FIRST.union(ChannelFlags::FLAG_LAST);
    const CUSTOM: ChannelName = ChannelName::from_static(b"custom\0\0");

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<SessionEvent>,
    }

    impl SessionEventSink for RecordingSink {
        fn emit(&mut self, event: SessionEvent) {
            self.events.push(event);
        }
    }

    fn router(authorizer: ChannelAuthorizer) -> VirtualChannelRouter {
        VirtualChannelRouter::new(
            vec![
                (1004, CUSTOM),
                (1005, CLIPRDR_CHANNEL_NAME),
                (1006, DRDYNVC_CHANNEL_NAME),
            ],
            authorizer,
        )
    }

    fn permissive() -> ChannelAuthorizer {
        ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted).with_clipboard(true, true, true)
    }

    #[test]
    fn unfiltered_channel_forwards_verbatim() {
        let mut router = router(permissive());
        let mut sink = RecordingSink::default();

        let chunk = [0xDE, 0xAD, 0xBE, 0xEF];
        let output = router
            .route_to_server(&CUSTOM, chunk.len() as u32, BOTH, &chunk, &mut sink)
            .unwrap();

        assert_eq!(
            output.to_server,
            vec![RoutedChunk {
                channel_id: 1004,
                total_length: chunk.len() as u32,
                flags: BOTH,
                data: chunk.to_vec(),
            }]
        );
        assert!(output.to_client.is_empty());
        assert!(sink.events.is_empty());
    }

    #[test]
    fn unknown_channel_is_an_error() {
        let mut router = router(permissive());
        let mut sink = RecordingSink::default();

        let missing = ChannelName::from_static(b"missing\0");
        assert!(router.route_to_server(&missing, 1, BOTH, &[0], &mut sink).is_err());
    }

    #[test]
    fn denied_clipboard_transfer_is_answered_and_logged() {
        let authorizer = ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted).with_clipboard(false, true, true);
        let mut router = router(authorizer);
        let mut sink = RecordingSink::default();

        // CB_FORMAT_LIST with one short-name entry
        let mut pdu = vec![0x02, 0x00, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00];
        pdu.extend_from_slice(&13u32.to_le_bytes());
        pdu.extend_from_slice(&[0; 32]);

        let output = router
            .route_to_server(&CLIPRDR_CHANNEL_NAME, pdu.len() as u32, BOTH, &pdu, &mut sink)
            .unwrap();

        assert!(output.to_server.is_empty());
        assert_eq!(output.to_client.len(), 1);
        assert_eq!(output.to_client[0].channel_id, 1005);
        assert_eq!(sink.events.len(), 1);
    }

    #[test]
    fn large_filter_output_is_refragmented() {
        let mut router = router(permissive());
        let mut sink = RecordingSink::default();

        // a pass-through clipboard PDU larger than one chunk, fed in wire
        // fragments and re-fragmented on the way out
        let payload_len = 2 * CHANNEL_CHUNK_LENGTH + 100;
        let mut pdu = vec![0xF0, 0x00, 0x00, 0x00];
        pdu.extend_from_slice(&((payload_len - 8) as u32).to_le_bytes());
        pdu.resize(payload_len, 0xAB);

        let total = pdu.len() as u32;
        let mut outputs = Vec::new();
        for (i, chunk) in pdu.chunks(CHANNEL_CHUNK_LENGTH).enumerate() {
            let mut flags = ChannelFlags::empty();
            if i == 0 {
                flags |= ChannelFlags::FLAG_FIRST;
            }
            if (i + 1) * CHANNEL_CHUNK_LENGTH >= pdu.len() {
                flags |= ChannelFlags::FLAG_LAST;
            }

            outputs.push(
                router
                    .route_to_server(&CLIPRDR_CHANNEL_NAME, total, flags, chunk, &mut sink)
                    .unwrap(),
            );
        }

        assert!(outputs[0].to_server.is_empty());
        assert!(outputs[1].to_server.is_empty());

        let sent = &outputs[2].to_server;
        assert_eq!(sent.len(), 3);
        assert!(sent[0].flags.contains(ChannelFlags::FLAG_FIRST));
        assert!(!sent[0].flags.contains(ChannelFlags::FLAG_LAST));
        assert!(sent[2].flags.contains(ChannelFlags::FLAG_LAST));
        assert_eq!(sent.iter().map(|c| c.data.len()).sum::<usize>(), payload_len);
        assert!(sent.iter().all(|c| c.total_length == total));
    }

    #[test]
    fn drdynvc_denial_produces_a_create_response_and_one_event() {
        let mut router = router(ChannelAuthorizer::new(UnlistedPolicy::DenyUnlisted));
        let mut sink = RecordingSink::default();

        // DVC CREATE_REQUEST for channel id 3
        let mut request = vec![0x10, 0x03];
        request.extend_from_slice(b"denied\0");

        let output = router
            .route_to_client(&DRDYNVC_CHANNEL_NAME, request.len() as u32, BOTH, &request, &mut sink)
            .unwrap();

        assert!(output.to_client.is_empty());
        assert_eq!(output.to_server.len(), 1);
        assert_eq!(
            sink.events,
            vec![SessionEvent::DynamicChannelCreationRejected {
                channel_name: "denied".to_owned(),
            }]
        );
    }

    #[test]
    fn filters_are_memoized_across_calls() {
        let mut router = router(permissive());
        let mut sink = RecordingSink::default();

        // the caps exchange happens once; a second monitor-ready must not
        // re-synthesize default capabilities, proving the filter kept state
        let monitor_ready = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let first = router
            .route_to_client(
                &CLIPRDR_CHANNEL_NAME,
                monitor_ready.len() as u32,
                BOTH,
                &monitor_ready,
                &mut sink,
            )
            .unwrap();
        let second = router
            .route_to_client(
                &CLIPRDR_CHANNEL_NAME,
                monitor_ready.len() as u32,
                BOTH,
                &monitor_ready,
                &mut sink,
            )
            .unwrap();

        assert_eq!(first.to_client.len(), 2);
        assert_eq!(second.to_client.len(), 1);
    }
}
