//! Dynamic virtual channel (drdynvc) filtering.
//!
//! The filter watches the drdynvc static channel in both directions,
//! intercepts channel creation against the session's channel policy and
//! passes every other command through after structural validation of the
//! command nibble.

#[macro_use]
extern crate tracing;

pub mod pdu;

use std::collections::BTreeMap;

use rdpgate_core::{decode, encode_vec, invalid_field_err, PduResult};
use rdpgate_svc::{
    ChannelAuthorizer, ChannelEffect, ChannelFilter, ChannelFlags, ChannelName, ChunkCollector,
    SessionEvent,
};

use crate::pdu::{
    peek_cmd, CapabilitiesResponsePdu, CapsVersion, ClientPdu, Cmd, CreateResponsePdu, ServerPdu,
    DVC_CREATION_STATUS_NO_LISTENER, DVC_CREATION_STATUS_OK,
};

pub const DRDYNVC_CHANNEL_NAME: ChannelName = ChannelName::from_static(b"drdynvc\0");

/// Lifecycle of one dynamic channel as seen by the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DynamicChannelState {
    /// CREATE_REQUEST forwarded, waiting for the client's response.
    CreationPending,
    /// The client accepted the creation.
    Open,
}

/// Deep-inspection filter for the drdynvc channel.
pub struct DrdynvcFilter {
    authorizer: ChannelAuthorizer,
    client_collector: ChunkCollector,
    server_collector: ChunkCollector,
    /// Channels keyed by their wire id, with the requested name.
    channels: BTreeMap<u32, (String, DynamicChannelState)>,
    caps_version: Option<CapsVersion>,
}

impl DrdynvcFilter {
    pub fn new(authorizer: ChannelAuthorizer) -> Self {
        Self {
            authorizer,
            client_collector: ChunkCollector::new(),
            server_collector: ChunkCollector::new(),
            channels: BTreeMap::new(),
            caps_version: None,
        }
    }

    /// The capabilities version negotiated by the peers, once both sides
    /// have spoken.
    pub fn caps_version(&self) -> Option<CapsVersion> {
        self.caps_version
    }

    /// Name of the dynamic channel behind `channel_id`, if it is open.
    pub fn open_channel_name(&self, channel_id: u32) -> Option<&str> {
        self.channels.get(&channel_id).and_then(|(name, state)| {
            (*state == DynamicChannelState::Open).then_some(name.as_str())
        })
    }

    fn process_server_pdu(&mut self, data: Vec<u8>) -> PduResult<Vec<ChannelEffect>> {
        let cmd = peek_cmd(&data).ok_or_else(|| {
            invalid_field_err!("Drdynvc", "cmd", "unknown command nibble from server")
        })?;

        match cmd {
            Cmd::Create => {
                let pdu = decode::<ServerPdu>(&data)?;
                let ServerPdu::CreateRequest(create_request) = pdu else {
                    return Err(invalid_field_err!("Drdynvc", "cmd", "expected a create request"));
                };

                if self
                    .authorizer
                    .is_dynamic_channel_authorized(&create_request.channel_name)
                {
                    debug!(
                        channel_name = %create_request.channel_name,
                        channel_id = create_request.channel_id,
                        "Forwarding dynamic channel creation"
                    );
                    self.channels.insert(
                        create_request.channel_id,
                        (create_request.channel_name, DynamicChannelState::CreationPending),
                    );

                    Ok(vec![ChannelEffect::SendToClient(data)])
                } else {
                    warn!(
                        channel_name = %create_request.channel_name,
                        "Dynamic channel creation denied by policy"
                    );

                    let response = CreateResponsePdu {
                        channel_id_type: create_request.channel_id_type,
                        channel_id: create_request.channel_id,
                        creation_status: DVC_CREATION_STATUS_NO_LISTENER,
                    };

                    Ok(vec![
                        ChannelEffect::SendToServer(encode_vec(&response)?),
                        ChannelEffect::Log(SessionEvent::DynamicChannelCreationRejected {
                            channel_name: create_request.channel_name,
                        }),
                    ])
                }
            }
            Cmd::Capability => {
                let pdu = decode::<ServerPdu>(&data)?;
                if let ServerPdu::CapabilitiesRequest(caps_request) = pdu {
                    debug!(version = ?caps_request.version(), "DVC capabilities requested");
                }

                Ok(vec![ChannelEffect::SendToClient(data)])
            }
            Cmd::Close => {
                let pdu = decode::<ServerPdu>(&data)?;
                if let ServerPdu::CloseRequest(close) = pdu {
                    self.channels.remove(&close.channel_id);
                }

                Ok(vec![ChannelEffect::SendToClient(data)])
            }
            _ => Ok(vec![ChannelEffect::SendToClient(data)]),
        }
    }

    fn process_client_pdu(&mut self, data: Vec<u8>) -> PduResult<Vec<ChannelEffect>> {
        let cmd = peek_cmd(&data).ok_or_else(|| {
            invalid_field_err!("Drdynvc", "cmd", "unknown command nibble from client")
        })?;

        match cmd {
            Cmd::Create => {
                let pdu = decode::<ClientPdu>(&data)?;
                if let ClientPdu::CreateResponse(create_response) = pdu {
                    self.register_create_response(&create_response);
                }

                Ok(vec![ChannelEffect::SendToServer(data)])
            }
            Cmd::Capability => {
                let pdu = decode::<ClientPdu>(&data)?;
                if let ClientPdu::CapabilitiesResponse(CapabilitiesResponsePdu { version }) = pdu {
                    debug!(?version, "DVC capabilities negotiated");
                    self.caps_version = Some(version);
                }

                Ok(vec![ChannelEffect::SendToServer(data)])
            }
            Cmd::Close => {
                let pdu = decode::<ClientPdu>(&data)?;
                if let ClientPdu::CloseResponse(close) = pdu {
                    self.channels.remove(&close.channel_id);
                }

                Ok(vec![ChannelEffect::SendToServer(data)])
            }
            _ => Ok(vec![ChannelEffect::SendToServer(data)]),
        }
    }

    fn register_create_response(&mut self, create_response: &CreateResponsePdu) {
        if create_response.creation_status == DVC_CREATION_STATUS_OK {
            if let Some((name, state)) = self.channels.get_mut(&create_response.channel_id) {
                debug!(channel_name = %name, channel_id = create_response.channel_id, "Dynamic channel open");
                *state = DynamicChannelState::Open;
            }
        } else {
            self.channels.remove(&create_response.channel_id);
        }
    }
}

impl ChannelFilter for DrdynvcFilter {
    fn channel_name(&self) -> ChannelName {
        DRDYNVC_CHANNEL_NAME
    }

    fn process_client_chunk(
        &mut self,
        total_length: u32,
        flags: ChannelFlags,
        chunk: &[u8],
    ) -> PduResult<Vec<ChannelEffect>> {
        match self.client_collector.process_chunk(total_length, flags, chunk)? {
            Some(data) => self.process_client_pdu(data),
            None => Ok(Vec::new()),
        }
    }

    fn process_server_chunk(
        &mut self,
        total_length: u32,
        flags: ChannelFlags,
        chunk: &[u8],
    ) -> PduResult<Vec<ChannelEffect>> {
        match self.server_collector.process_chunk(total_length, flags, chunk)? {
            Some(data) => self.process_server_pdu(data),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use rdpgate_svc::UnlistedPolicy;
    use rstest::rstest;

    use super::*;

    const BOTH: ChannelFlags = ChannelFlags::FLAG_FIRST.union(ChannelFlags::FLAG_LAST);

    fn filter_with(authorizer: ChannelAuthorizer) -> DrdynvcFilter {
        DrdynvcFilter::new(authorizer)
    }

    fn create_request(channel_id: u8, name: &str) -> Vec<u8> {
        let mut data = vec![0x10, channel_id];
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        data
    }

    #[test]
    fn denied_creation_is_answered_with_no_listener_and_one_event() {
        let mut filter = filter_with(ChannelAuthorizer::new(UnlistedPolicy::DenyUnlisted));

        let request = create_request(3, "Microsoft::Windows::RDS::Graphics");
        let effects = filter
            .process_server_chunk(request.len() as u32, BOTH, &request)
            .unwrap();

        assert_eq!(effects.len(), 2);
        assert_eq!(
            effects[0],
            ChannelEffect::SendToServer(vec![0x10, 0x03, 0x01, 0x00, 0x00, 0xC0])
        );
        assert_eq!(
            effects[1],
            ChannelEffect::Log(SessionEvent::DynamicChannelCreationRejected {
                channel_name: "Microsoft::Windows::RDS::Graphics".to_owned(),
            })
        );
    }

    #[test]
    fn authorized_creation_is_forwarded_and_tracked() {
        let authorizer = ChannelAuthorizer::new(UnlistedPolicy::DenyUnlisted)
            .allow_dynamic_channels(["Microsoft::Windows::RDS::*"]);
        let mut filter = filter_with(authorizer);

        let request = create_request(5, "Microsoft::Windows::RDS::DisplayControl");
        let effects = filter
            .process_server_chunk(request.len() as u32, BOTH, &request)
            .unwrap();

        assert_eq!(effects, vec![ChannelEffect::SendToClient(request)]);
        assert_eq!(filter.open_channel_name(5), None);

        // client accepts
        let response = [0x10, 0x05, 0x00, 0x00, 0x00, 0x00];
        let effects = filter
            .process_client_chunk(response.len() as u32, BOTH, &response)
            .unwrap();

        assert_eq!(effects, vec![ChannelEffect::SendToServer(response.to_vec())]);
        assert_eq!(
            filter.open_channel_name(5),
            Some("Microsoft::Windows::RDS::DisplayControl")
        );
    }

    #[test]
    fn caps_version_is_recorded_from_the_client_response() {
        let mut filter = filter_with(ChannelAuthorizer::new(UnlistedPolicy::DenyUnlisted));

        let caps_request = [0x50, 0x00, 0x01, 0x00];
        let effects = filter
            .process_server_chunk(caps_request.len() as u32, BOTH, &caps_request)
            .unwrap();
        assert_eq!(effects, vec![ChannelEffect::SendToClient(caps_request.to_vec())]);
        assert_eq!(filter.caps_version(), None);

        let caps_response = [0x50, 0x00, 0x01, 0x00];
        filter
            .process_client_chunk(caps_response.len() as u32, BOTH, &caps_response)
            .unwrap();
        assert_eq!(filter.caps_version(), Some(CapsVersion::V1));
    }

    #[test]
    fn data_commands_pass_through_unchanged() {
        let mut filter = filter_with(ChannelAuthorizer::new(UnlistedPolicy::DenyUnlisted));

        let data = [0x30, 0x05, 0xDE, 0xAD, 0xBE, 0xEF];
        let effects = filter
            .process_server_chunk(data.len() as u32, BOTH, &data)
            .unwrap();

        assert_eq!(effects, vec![ChannelEffect::SendToClient(data.to_vec())]);
    }

    #[test]
    fn fragmented_pdu_is_reassembled_before_inspection() {
        let mut filter = filter_with(ChannelAuthorizer::new(UnlistedPolicy::DenyUnlisted));

        let request = create_request(3, "denied");
        let total = request.len() as u32;
        let (first, rest) = request.split_at(4);

        assert!(filter
            .process_server_chunk(total, ChannelFlags::FLAG_FIRST, first)
            .unwrap()
            .is_empty());

        let effects = filter
            .process_server_chunk(total, ChannelFlags::FLAG_LAST, rest)
            .unwrap();

        // reassembled create request, denied in one piece
        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], ChannelEffect::SendToServer(_)));
    }

    #[rstest]
    #[case::server(true)]
    #[case::client(false)]
    fn unknown_command_nibble_is_fatal(#[case] from_server: bool) {
        let mut filter = filter_with(ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted));

        let data = [0xF0, 0x00];
        let result = if from_server {
            filter.process_server_chunk(data.len() as u32, BOTH, &data)
        } else {
            filter.process_client_chunk(data.len() as u32, BOTH, &data)
        };

        assert!(result.is_err());
    }

    #[test]
    fn close_request_drops_the_channel_tracking() {
        let authorizer =
            ChannelAuthorizer::new(UnlistedPolicy::DenyUnlisted).allow_dynamic_channels(["echo"]);
        let mut filter = filter_with(authorizer);

        let request = create_request(9, "echo");
        filter
            .process_server_chunk(request.len() as u32, BOTH, &request)
            .unwrap();
        let response = [0x10, 0x09, 0x00, 0x00, 0x00, 0x00];
        filter
            .process_client_chunk(response.len() as u32, BOTH, &response)
            .unwrap();
        assert_eq!(filter.open_channel_name(9), Some("echo"));

        let close = [0x40, 0x09];
        let effects = filter
            .process_server_chunk(close.len() as u32, BOTH, &close)
            .unwrap();

        assert_eq!(effects, vec![ChannelEffect::SendToClient(close.to_vec())]);
        assert_eq!(filter.open_channel_name(9), None);
    }
}
