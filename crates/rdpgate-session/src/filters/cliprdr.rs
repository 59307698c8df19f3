//! Clipboard channel (cliprdr, MS-RDPECLIP) filtering.
//!
//! Transfers run in two directions: "up" is client clipboard content read by
//! the server, "down" is server content read by the client. A denied
//! transfer is not an error: the filter swallows the triggering PDU,
//! substitutes a failure response toward the peer that sent it and emits one
//! audit event. Everything the policy allows passes through intact.

use rdpgate_core::{invalid_field_err, PduResult, ReadCursor};
use rdpgate_svc::{
    ChannelAuthorizer, ChannelEffect, ChannelFilter, ChannelFlags, ChannelName, ChunkCollector, SessionEvent,
    TransferDirection,
};

pub const CLIPRDR_CHANNEL_NAME: ChannelName = ChannelName::from_static(b"cliprdr\0");

// CLIPRDR_HEADER msgType values
const CB_MONITOR_READY: u16 = 0x0001;
const CB_FORMAT_LIST: u16 = 0x0002;
const CB_FORMAT_LIST_RESPONSE: u16 = 0x0003;
const CB_FORMAT_DATA_REQUEST: u16 = 0x0004;
const CB_FORMAT_DATA_RESPONSE: u16 = 0x0005;
const CB_CLIP_CAPS: u16 = 0x0007;
const CB_FILECONTENTS_REQUEST: u16 = 0x0008;
const CB_FILECONTENTS_RESPONSE: u16 = 0x0009;

// CLIPRDR_HEADER msgFlags values
const CB_RESPONSE_OK: u16 = 0x0001;
const CB_RESPONSE_FAIL: u16 = 0x0002;

// general capability set
const CB_CAPSTYPE_GENERAL: u16 = 0x0001;
const CB_CAPS_VERSION_2: u32 = 0x0002;
const CB_USE_LONG_FORMAT_NAMES: u32 = 0x0000_0002;

const HEADER_SIZE: usize = 8;

/// Deep-inspection filter for the cliprdr channel.
pub struct CliprdrFilter {
    authorizer: ChannelAuthorizer,
    client_collector: ChunkCollector,
    server_collector: ChunkCollector,
    client_general_flags: Option<u32>,
    server_general_flags: Option<u32>,
}

impl CliprdrFilter {
    pub fn new(authorizer: ChannelAuthorizer) -> Self {
        Self {
            authorizer,
            client_collector: ChunkCollector::new(),
            server_collector: ChunkCollector::new(),
            client_general_flags: None,
            server_general_flags: None,
        }
    }

    fn process_client_pdu(&mut self, data: Vec<u8>) -> PduResult<Vec<ChannelEffect>> {
        let (msg_type, _msg_flags, payload_len) = read_header(&data)?;

        match msg_type {
            CB_CLIP_CAPS => {
                self.client_general_flags = Some(parse_capabilities(&data[HEADER_SIZE..HEADER_SIZE + payload_len])?);
                Ok(vec![ChannelEffect::SendToServer(data)])
            }
            CB_FORMAT_LIST => {
                if !self.authorizer.is_clipboard_up_authorized() {
                    warn!("Clipboard transfer to the server denied by policy");

                    return Ok(vec![
                        ChannelEffect::SendToClient(encode_header(CB_FORMAT_LIST_RESPONSE, CB_RESPONSE_FAIL, &[])),
                        ChannelEffect::Log(SessionEvent::ClipboardTransferDenied {
                            direction: TransferDirection::ClientToServer,
                        }),
                    ]);
                }

                validate_format_list(
                    &data[HEADER_SIZE..HEADER_SIZE + payload_len],
                    self.use_long_format_names(),
                )?;

                Ok(vec![ChannelEffect::SendToServer(data)])
            }
            // the client asking for server data pulls content down
            CB_FORMAT_DATA_REQUEST => {
                if !self.authorizer.is_clipboard_down_authorized() {
                    warn!("Clipboard transfer to the client denied by policy");

                    return Ok(vec![
                        ChannelEffect::SendToClient(encode_header(CB_FORMAT_DATA_RESPONSE, CB_RESPONSE_FAIL, &[])),
                        ChannelEffect::Log(SessionEvent::ClipboardTransferDenied {
                            direction: TransferDirection::ServerToClient,
                        }),
                    ]);
                }

                Ok(vec![ChannelEffect::SendToServer(data)])
            }
            CB_FILECONTENTS_REQUEST => {
                if !self.authorizer.is_clipboard_file_transfer_authorized() {
                    warn!("Clipboard file transfer to the client denied by policy");

                    return Ok(vec![
                        ChannelEffect::SendToClient(file_contents_deny(&data[HEADER_SIZE..HEADER_SIZE + payload_len])?),
                        ChannelEffect::Log(SessionEvent::ClipboardFileTransferDenied {
                            direction: TransferDirection::ServerToClient,
                        }),
                    ]);
                }

                Ok(vec![ChannelEffect::SendToServer(data)])
            }
            _ => Ok(vec![ChannelEffect::SendToServer(data)]),
        }
    }

    fn process_server_pdu(&mut self, data: Vec<u8>) -> PduResult<Vec<ChannelEffect>> {
        let (msg_type, _msg_flags, payload_len) = read_header(&data)?;

        match msg_type {
            CB_CLIP_CAPS => {
                self.server_general_flags = Some(parse_capabilities(&data[HEADER_SIZE..HEADER_SIZE + payload_len])?);
                Ok(vec![ChannelEffect::SendToClient(data)])
            }
            CB_MONITOR_READY => {
                let mut effects = Vec::new();

                // Legacy servers skip the capabilities exchange; give the
                // client the defaults it would otherwise wait for.
                if self.server_general_flags.is_none() {
                    debug!("Legacy clipboard peer, synthesizing default capabilities");
                    self.server_general_flags = Some(0);
                    effects.push(ChannelEffect::SendToClient(default_capabilities()));
                }

                effects.push(ChannelEffect::SendToClient(data));
                Ok(effects)
            }
            CB_FORMAT_LIST => {
                if !self.authorizer.is_clipboard_down_authorized() {
                    warn!("Clipboard transfer to the client denied by policy");

                    return Ok(vec![
                        ChannelEffect::SendToServer(encode_header(CB_FORMAT_LIST_RESPONSE, CB_RESPONSE_FAIL, &[])),
                        ChannelEffect::Log(SessionEvent::ClipboardTransferDenied {
                            direction: TransferDirection::ServerToClient,
                        }),
                    ]);
                }

                validate_format_list(
                    &data[HEADER_SIZE..HEADER_SIZE + payload_len],
                    self.use_long_format_names(),
                )?;

                Ok(vec![ChannelEffect::SendToClient(data)])
            }
            // the server asking for client data pulls content up
            CB_FORMAT_DATA_REQUEST => {
                if !self.authorizer.is_clipboard_up_authorized() {
                    warn!("Clipboard transfer to the server denied by policy");

                    return Ok(vec![
                        ChannelEffect::SendToServer(encode_header(CB_FORMAT_DATA_RESPONSE, CB_RESPONSE_FAIL, &[])),
                        ChannelEffect::Log(SessionEvent::ClipboardTransferDenied {
                            direction: TransferDirection::ClientToServer,
                        }),
                    ]);
                }

                Ok(vec![ChannelEffect::SendToClient(data)])
            }
            CB_FILECONTENTS_REQUEST => {
                if !self.authorizer.is_clipboard_file_transfer_authorized() {
                    warn!("Clipboard file transfer to the server denied by policy");

                    return Ok(vec![
                        ChannelEffect::SendToServer(file_contents_deny(&data[HEADER_SIZE..HEADER_SIZE + payload_len])?),
                        ChannelEffect::Log(SessionEvent::ClipboardFileTransferDenied {
                            direction: TransferDirection::ClientToServer,
                        }),
                    ]);
                }

                Ok(vec![ChannelEffect::SendToClient(data)])
            }
            _ => Ok(vec![ChannelEffect::SendToClient(data)]),
        }
    }

    fn use_long_format_names(&self) -> bool {
        let client = self.client_general_flags.unwrap_or(0);
        let server = self.server_general_flags.unwrap_or(0);

        client & server & CB_USE_LONG_FORMAT_NAMES != 0
    }
}

impl ChannelFilter for CliprdrFilter {
    fn channel_name(&self) -> ChannelName {
        CLIPRDR_CHANNEL_NAME
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

/// Reads the CLIPRDR_HEADER and checks the declared dataLen against the
/// reassembled PDU.
fn read_header(data: &[u8]) -> PduResult<(u16, u16, usize)> {
    if data.len() < HEADER_SIZE {
        return Err(invalid_field_err!("Cliprdr", "header", "truncated clipboard header"));
    }

    let mut cursor = ReadCursor::new(data);
    let msg_type = cursor.read_u16();
    let msg_flags = cursor.read_u16();
    let data_len = cursor.read_u32() as usize;

    if data.len() - HEADER_SIZE < data_len {
        return Err(invalid_field_err!("Cliprdr", "dataLen", "shorter PDU than declared"));
    }

    Ok((msg_type, msg_flags, data_len))
}

fn encode_header(msg_type: u16, msg_flags: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&msg_type.to_le_bytes());
    out.extend_from_slice(&msg_flags.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// CLIPRDR_GENERAL_CAPABILITY with version 2 and no optional features.
fn default_capabilities() -> Vec<u8> {
    let mut payload = Vec::with_capacity(16);
    payload.extend_from_slice(&1u16.to_le_bytes()); // cCapabilitiesSets
    payload.extend_from_slice(&0u16.to_le_bytes()); // pad1
    payload.extend_from_slice(&CB_CAPSTYPE_GENERAL.to_le_bytes());
    payload.extend_from_slice(&12u16.to_le_bytes()); // lengthCapability
    payload.extend_from_slice(&CB_CAPS_VERSION_2.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes()); // generalFlags

    encode_header(CB_CLIP_CAPS, 0, &payload)
}

/// Walks the capability sets of a CB_CLIP_CAPS payload and returns the
/// general flags.
fn parse_capabilities(payload: &[u8]) -> PduResult<u32> {
    if payload.len() < 4 {
        return Err(invalid_field_err!("Cliprdr", "capabilities", "truncated capability list"));
    }

    let mut cursor = ReadCursor::new(payload);
    let count = cursor.read_u16();
    let _pad = cursor.read_u16();

    let mut general_flags = 0;

    for _ in 0..count {
        if cursor.len() < 4 {
            return Err(invalid_field_err!("Cliprdr", "capabilitySet", "truncated capability set"));
        }

        let set_type = cursor.read_u16();
        let length = usize::from(cursor.read_u16());

        let Some(body_len) = length.checked_sub(4) else {
            return Err(invalid_field_err!(
                "Cliprdr",
                "lengthCapability",
                "shorter than its own header"
            ));
        };

        if cursor.len() < body_len {
            return Err(invalid_field_err!("Cliprdr", "capabilitySet", "overflows the PDU"));
        }

        if set_type == CB_CAPSTYPE_GENERAL && body_len >= 8 {
            let _version = cursor.read_u32();
            general_flags = cursor.read_u32();
            cursor.advance(body_len - 8);
        } else {
            cursor.advance(body_len);
        }
    }

    Ok(general_flags)
}

/// Structural validation of a CB_FORMAT_LIST payload in the negotiated
/// format-name encoding. The formats themselves are not policy-relevant.
fn validate_format_list(payload: &[u8], long_names: bool) -> PduResult<()> {
    let mut cursor = ReadCursor::new(payload);

    while !cursor.is_empty() {
        if cursor.len() < 4 {
            return Err(invalid_field_err!("Cliprdr", "formatId", "truncated format entry"));
        }
        let _format_id = cursor.read_u32();

        if long_names {
            // null-terminated UTF-16 name
            loop {
                if cursor.len() < 2 {
                    return Err(invalid_field_err!("Cliprdr", "formatName", "unterminated format name"));
                }
                if cursor.read_u16() == 0 {
                    break;
                }
            }
        } else {
            if cursor.len() < 32 {
                return Err(invalid_field_err!("Cliprdr", "formatName", "truncated short format name"));
            }
            cursor.advance(32);
        }
    }

    Ok(())
}

/// Builds the CB_FILECONTENTS_RESPONSE failure carrying the request's
/// stream id back to the requester.
fn file_contents_deny(request_payload: &[u8]) -> PduResult<Vec<u8>> {
    if request_payload.len() < 4 {
        return Err(invalid_field_err!(
            "Cliprdr",
            "streamId",
            "file contents request too short"
        ));
    }

    Ok(encode_header(
        CB_FILECONTENTS_RESPONSE,
        CB_RESPONSE_FAIL,
        &request_payload[..4],
    ))
}

#[cfg(test)]
mod tests {
    use rdpgate_svc::UnlistedPolicy;

    use super::*;

    const BOTH: ChannelFlags = ChannelFlags::FLAG_FIRST.union(ChannelFlags::FLAG_LAST);

    fn permissive() -> CliprdrFilter {
        CliprdrFilter::new(
            ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted).with_clipboard(true, true, true),
        )
    }

    fn restricted(up: bool, down: bool, files: bool) -> CliprdrFilter {
        CliprdrFilter::new(
            ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted).with_clipboard(up, down, files),
        )
    }

    fn short_format_list(format_id: u32) -> Vec<u8> {
        let mut payload = format_id.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0; 32]);
        encode_header(CB_FORMAT_LIST, 0, &payload)
    }

    fn feed_client(filter: &mut CliprdrFilter, pdu: &[u8]) -> Vec<ChannelEffect> {
        filter.process_client_chunk(pdu.len() as u32, BOTH, pdu).unwrap()
    }

    fn feed_server(filter: &mut CliprdrFilter, pdu: &[u8]) -> Vec<ChannelEffect> {
        filter.process_server_chunk(pdu.len() as u32, BOTH, pdu).unwrap()
    }

    #[test]
    fn authorized_format_list_passes_through() {
        let mut filter = permissive();

        let pdu = short_format_list(13); // CF_UNICODETEXT
        let effects = feed_client(&mut filter, &pdu);

        assert_eq!(effects, vec![ChannelEffect::SendToServer(pdu)]);
    }

    #[test]
    fn denied_upload_substitutes_a_failure_response() {
        let mut filter = restricted(false, true, true);

        let pdu = short_format_list(13);
        let effects = feed_client(&mut filter, &pdu);

        assert_eq!(
            effects,
            vec![
                ChannelEffect::SendToClient(encode_header(CB_FORMAT_LIST_RESPONSE, CB_RESPONSE_FAIL, &[])),
                ChannelEffect::Log(SessionEvent::ClipboardTransferDenied {
                    direction: TransferDirection::ClientToServer,
                }),
            ]
        );
    }

    #[test]
    fn denied_download_blocks_the_client_data_request() {
        let mut filter = restricted(true, false, true);

        let request = encode_header(CB_FORMAT_DATA_REQUEST, 0, &13u32.to_le_bytes());
        let effects = feed_client(&mut filter, &request);

        assert_eq!(
            effects,
            vec![
                ChannelEffect::SendToClient(encode_header(CB_FORMAT_DATA_RESPONSE, CB_RESPONSE_FAIL, &[])),
                ChannelEffect::Log(SessionEvent::ClipboardTransferDenied {
                    direction: TransferDirection::ServerToClient,
                }),
            ]
        );
    }

    #[test]
    fn denied_file_transfer_answers_with_the_stream_id() {
        let mut filter = restricted(true, true, false);

        // streamId 7 followed by the rest of the request
        let mut payload = 7u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0; 20]);
        let request = encode_header(CB_FILECONTENTS_REQUEST, 0, &payload);

        let effects = feed_server(&mut filter, &request);

        assert_eq!(
            effects,
            vec![
                ChannelEffect::SendToServer(encode_header(
                    CB_FILECONTENTS_RESPONSE,
                    CB_RESPONSE_FAIL,
                    &7u32.to_le_bytes(),
                )),
                ChannelEffect::Log(SessionEvent::ClipboardFileTransferDenied {
                    direction: TransferDirection::ClientToServer,
                }),
            ]
        );
    }

    #[test]
    fn monitor_ready_without_capabilities_synthesizes_defaults() {
        let mut filter = permissive();

        let monitor_ready = encode_header(CB_MONITOR_READY, 0, &[]);
        let effects = feed_server(&mut filter, &monitor_ready);

        assert_eq!(
            effects,
            vec![
                ChannelEffect::SendToClient(default_capabilities()),
                ChannelEffect::SendToClient(monitor_ready),
            ]
        );
    }

    #[test]
    fn monitor_ready_after_capabilities_is_forwarded_alone() {
        let mut filter = permissive();

        let caps = default_capabilities();
        feed_server(&mut filter, &caps);

        let monitor_ready = encode_header(CB_MONITOR_READY, 0, &[]);
        let effects = feed_server(&mut filter, &monitor_ready);

        assert_eq!(effects, vec![ChannelEffect::SendToClient(monitor_ready)]);
    }

    #[test]
    fn declared_length_larger_than_the_pdu_is_fatal() {
        let mut filter = permissive();

        let mut pdu = encode_header(CB_FORMAT_LIST, 0, &[]);
        pdu[4] = 0xFF; // dataLen claims 255 bytes

        assert!(filter.process_client_chunk(pdu.len() as u32, BOTH, &pdu).is_err());
    }

    #[test]
    fn malformed_capability_set_is_fatal() {
        let mut filter = permissive();

        // one set whose lengthCapability overflows the payload
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&CB_CAPSTYPE_GENERAL.to_le_bytes());
        payload.extend_from_slice(&64u16.to_le_bytes());
        let pdu = encode_header(CB_CLIP_CAPS, 0, &payload);

        assert!(filter.process_client_chunk(pdu.len() as u32, BOTH, &pdu).is_err());
    }

    #[test]
    fn fragmented_pdu_is_reassembled_before_inspection() {
        let mut filter = restricted(false, true, true);

        let pdu = short_format_list(13);
        let total = pdu.len() as u32;
        let (first, rest) = pdu.split_at(10);

        assert!(filter
            .process_client_chunk(total, ChannelFlags::FLAG_FIRST, first)
            .unwrap()
            .is_empty());

        let effects = filter.process_client_chunk(total, ChannelFlags::FLAG_LAST, rest).unwrap();

        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], ChannelEffect::SendToClient(_)));
    }
}
