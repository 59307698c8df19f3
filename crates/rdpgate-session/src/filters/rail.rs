//! RemoteApp channel (rail, MS-RDPERP) filtering.
//!
//! Three concerns meet here:
//!
//! - execution auditing: client TS_RAIL_ORDER_EXEC requests are queued by
//!   (exe-or-file, flags) so the server's TS_RAIL_ORDER_EXEC_RESULT can be
//!   attributed to the original request;
//! - window id translation: client orders that reference a window go through
//!   an injected [`WindowIdMapper`], and orders referencing windows the
//!   mapper does not know are dropped;
//! - direction asymmetry: unknown client orders are forwarded with a
//!   warning, unknown server orders are dropped with a warning.
//!
//! Orders the filter must look inside may not be channel-fragmented: the
//! embedded orderLength has to cover the whole logical PDU.

use std::collections::VecDeque;

use rdpgate_core::{invalid_field_err, PduResult, ReadCursor};
use rdpgate_svc::{
    ChannelEffect, ChannelFilter, ChannelFlags, ChannelName, ChunkCollector, SessionEvent,
};

pub const RAIL_CHANNEL_NAME: ChannelName = ChannelName::from_static(b"rail\0\0\0\0");

// TS_RAIL_PDU_HEADER orderType values
const TS_RAIL_ORDER_EXEC: u16 = 0x0001;
const TS_RAIL_ORDER_ACTIVATE: u16 = 0x0002;
const TS_RAIL_ORDER_SYSPARAM: u16 = 0x0003;
const TS_RAIL_ORDER_SYSCOMMAND: u16 = 0x0004;
const TS_RAIL_ORDER_HANDSHAKE: u16 = 0x0005;
const TS_RAIL_ORDER_NOTIFY_EVENT: u16 = 0x0006;
const TS_RAIL_ORDER_WINDOWMOVE: u16 = 0x0008;
const TS_RAIL_ORDER_LOCALMOVESIZE: u16 = 0x0009;
const TS_RAIL_ORDER_MINMAXINFO: u16 = 0x000A;
const TS_RAIL_ORDER_CLIENTSTATUS: u16 = 0x000B;
const TS_RAIL_ORDER_SYSMENU: u16 = 0x000C;
const TS_RAIL_ORDER_LANGBARINFO: u16 = 0x000D;
const TS_RAIL_ORDER_GET_APPID_REQ: u16 = 0x000E;
const TS_RAIL_ORDER_GET_APPID_RESP: u16 = 0x000F;
const TS_RAIL_ORDER_TASKBARINFO: u16 = 0x0010;
const TS_RAIL_ORDER_LANGUAGEIMEINFO: u16 = 0x0011;
const TS_RAIL_ORDER_COMPARTMENTINFO: u16 = 0x0012;
const TS_RAIL_ORDER_HANDSHAKE_EX: u16 = 0x0013;
const TS_RAIL_ORDER_ZORDER_SYNC: u16 = 0x0014;
const TS_RAIL_ORDER_CLOAK: u16 = 0x0015;
const TS_RAIL_ORDER_POWER_DISPLAY_REQUEST: u16 = 0x0016;
const TS_RAIL_ORDER_SNAP_ARRANGE: u16 = 0x0017;
const TS_RAIL_ORDER_EXEC_RESULT: u16 = 0x0080;

const HEADER_SIZE: usize = 4;

/// Translates client-side window ids to the ids the server knows.
///
/// Returning `None` marks the window as client-only; orders referencing it
/// are dropped instead of forwarded.
pub trait WindowIdMapper: Send {
    fn map(&self, window_id: u32) -> Option<u32>;
}

/// Mapper for sessions where both peers share one id space.
#[derive(Debug, Default)]
pub struct IdentityWindowIdMapper;

impl WindowIdMapper for IdentityWindowIdMapper {
    fn map(&self, window_id: u32) -> Option<u32> {
        Some(window_id)
    }
}

/// Deep-inspection filter for the rail channel.
pub struct RailFilter {
    mapper: Box<dyn WindowIdMapper>,
    client_collector: ChunkCollector,
    server_collector: ChunkCollector,
    client_order_type: Option<u16>,
    server_order_type: Option<u16>,
    /// Execution requests forwarded to the server, awaiting their result.
    launch_pending: VecDeque<(String, u16)>,
}

impl RailFilter {
    pub fn new(mapper: Box<dyn WindowIdMapper>) -> Self {
        Self {
            mapper,
            client_collector: ChunkCollector::new(),
            server_collector: ChunkCollector::new(),
            client_order_type: None,
            server_order_type: None,
            launch_pending: VecDeque::new(),
        }
    }

    fn process_client_pdu(&mut self, order_type: u16, mut data: Vec<u8>) -> PduResult<Vec<ChannelEffect>> {
        match order_type {
            TS_RAIL_ORDER_EXEC => {
                let (application, flags) = parse_exec(&data)?;

                debug!(application = %application, flags, "RemoteApp execution requested");
                self.launch_pending.push_back((application.clone(), flags));

                Ok(vec![
                    ChannelEffect::SendToServer(data),
                    ChannelEffect::Log(SessionEvent::ApplicationExecutionRequested { application }),
                ])
            }
            TS_RAIL_ORDER_ACTIVATE
            | TS_RAIL_ORDER_SYSCOMMAND
            | TS_RAIL_ORDER_NOTIFY_EVENT
            | TS_RAIL_ORDER_WINDOWMOVE
            | TS_RAIL_ORDER_SYSMENU
            | TS_RAIL_ORDER_GET_APPID_REQ
            | TS_RAIL_ORDER_SNAP_ARRANGE => {
                let window_id = read_window_id(&data)?;

                match self.mapper.map(window_id) {
                    Some(mapped) => {
                        if mapped != window_id {
                            data[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&mapped.to_le_bytes());
                        }
                        Ok(vec![ChannelEffect::SendToServer(data)])
                    }
                    None => {
                        warn!(window_id, order_type, "Dropping rail order for a client-only window");
                        Ok(Vec::new())
                    }
                }
            }
            TS_RAIL_ORDER_SYSPARAM
            | TS_RAIL_ORDER_HANDSHAKE
            | TS_RAIL_ORDER_HANDSHAKE_EX
            | TS_RAIL_ORDER_CLIENTSTATUS
            | TS_RAIL_ORDER_LANGBARINFO
            | TS_RAIL_ORDER_LANGUAGEIMEINFO
            | TS_RAIL_ORDER_COMPARTMENTINFO
            | TS_RAIL_ORDER_CLOAK => Ok(vec![ChannelEffect::SendToServer(data)]),
            unknown => {
                warn!(order_type = unknown, "Forwarding unknown rail order from the client");
                Ok(vec![ChannelEffect::SendToServer(data)])
            }
        }
    }

    fn process_server_pdu(&mut self, order_type: u16, data: Vec<u8>) -> PduResult<Vec<ChannelEffect>> {
        match order_type {
            TS_RAIL_ORDER_EXEC_RESULT => {
                let (application, flags, exec_result) = parse_exec_result(&data)?;

                let matched = self
                    .launch_pending
                    .iter()
                    .position(|(pending_app, pending_flags)| {
                        *pending_app == application && *pending_flags == flags
                    });

                match matched {
                    Some(index) => {
                        self.launch_pending.remove(index);
                        debug!(application = %application, exec_result, "RemoteApp execution result");
                    }
                    None => warn!(application = %application, "Execution result without a pending request"),
                }

                Ok(vec![
                    ChannelEffect::SendToClient(data),
                    ChannelEffect::Log(SessionEvent::ApplicationExecutionResult {
                        application,
                        exec_result,
                    }),
                ])
            }
            TS_RAIL_ORDER_SYSPARAM
            | TS_RAIL_ORDER_HANDSHAKE
            | TS_RAIL_ORDER_HANDSHAKE_EX
            | TS_RAIL_ORDER_MINMAXINFO
            | TS_RAIL_ORDER_LOCALMOVESIZE
            | TS_RAIL_ORDER_LANGBARINFO
            | TS_RAIL_ORDER_TASKBARINFO
            | TS_RAIL_ORDER_GET_APPID_RESP
            | TS_RAIL_ORDER_COMPARTMENTINFO
            | TS_RAIL_ORDER_ZORDER_SYNC
            | TS_RAIL_ORDER_CLOAK
            | TS_RAIL_ORDER_POWER_DISPLAY_REQUEST => Ok(vec![ChannelEffect::SendToClient(data)]),
            unknown => {
                warn!(order_type = unknown, "Dropping unknown rail order from the server");
                Ok(Vec::new())
            }
        }
    }
}

impl ChannelFilter for RailFilter {
    fn channel_name(&self) -> ChannelName {
        RAIL_CHANNEL_NAME
    }

    fn process_client_chunk(
        &mut self,
        total_length: u32,
        flags: ChannelFlags,
        chunk: &[u8],
    ) -> PduResult<Vec<ChannelEffect>> {
        if flags.contains(ChannelFlags::FLAG_FIRST) {
            let (order_type, order_length) = peek_order_header(chunk)?;
            self.client_order_type = Some(order_type);

            if must_be_unit(order_type) {
                check_is_unit(flags, total_length, order_length)?;
            }
        }

        match self.client_collector.process_chunk(total_length, flags, chunk)? {
            Some(data) => {
                let order_type = self
                    .client_order_type
                    .take()
                    .ok_or_else(|| invalid_field_err!("Rail", "orderType", "no latched order type"))?;

                self.process_client_pdu(order_type, data)
            }
            None => Ok(Vec::new()),
        }
    }

    fn process_server_chunk(
        &mut self,
        total_length: u32,
        flags: ChannelFlags,
        chunk: &[u8],
    ) -> PduResult<Vec<ChannelEffect>> {
        if flags.contains(ChannelFlags::FLAG_FIRST) {
            let (order_type, order_length) = peek_order_header(chunk)?;
            self.server_order_type = Some(order_type);

            if must_be_unit(order_type) {
                check_is_unit(flags, total_length, order_length)?;
            }
        }

        match self.server_collector.process_chunk(total_length, flags, chunk)? {
            Some(data) => {
                let order_type = self
                    .server_order_type
                    .take()
                    .ok_or_else(|| invalid_field_err!("Rail", "orderType", "no latched order type"))?;

                self.process_server_pdu(order_type, data)
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Orders the filter parses or rewrites; these must arrive as one chunk.
fn must_be_unit(order_type: u16) -> bool {
    matches!(
        order_type,
        TS_RAIL_ORDER_EXEC
            | TS_RAIL_ORDER_EXEC_RESULT
            | TS_RAIL_ORDER_ACTIVATE
            | TS_RAIL_ORDER_SYSCOMMAND
            | TS_RAIL_ORDER_NOTIFY_EVENT
            | TS_RAIL_ORDER_WINDOWMOVE
            | TS_RAIL_ORDER_SYSMENU
            | TS_RAIL_ORDER_GET_APPID_REQ
            | TS_RAIL_ORDER_SNAP_ARRANGE
    )
}

/// An inspected order is a unit when it is unfragmented and its embedded
/// orderLength covers the whole logical PDU. Anything else means channel
/// fragmentation or truncation the filter cannot rewrite safely.
fn check_is_unit(flags: ChannelFlags, total_length: u32, order_length: u16) -> PduResult<()> {
    if !flags.contains(ChannelFlags::FLAG_FIRST | ChannelFlags::FLAG_LAST) {
        return Err(invalid_field_err!(
            "Rail",
            "flags",
            "inspected rail order is channel-fragmented"
        ));
    }

    if u32::from(order_length) != total_length {
        return Err(invalid_field_err!(
            "Rail",
            "orderLength",
            "does not match the channel total length"
        ));
    }

    Ok(())
}

fn peek_order_header(chunk: &[u8]) -> PduResult<(u16, u16)> {
    if chunk.len() < HEADER_SIZE {
        return Err(invalid_field_err!("Rail", "header", "truncated rail header"));
    }

    let mut cursor = ReadCursor::new(chunk);
    Ok((cursor.read_u16(), cursor.read_u16()))
}

fn read_window_id(data: &[u8]) -> PduResult<u32> {
    if data.len() < HEADER_SIZE + 4 {
        return Err(invalid_field_err!("Rail", "windowId", "order too short for a window id"));
    }

    let mut cursor = ReadCursor::new(data);
    cursor.advance(HEADER_SIZE);
    Ok(cursor.read_u32())
}

fn read_utf16(cursor: &mut ReadCursor<'_>, byte_len: usize) -> PduResult<String> {
    if byte_len % 2 != 0 || cursor.len() < byte_len {
        return Err(invalid_field_err!("Rail", "string", "bad UTF-16 string length"));
    }

    let units: Vec<u16> = cursor
        .read_slice(byte_len)
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(String::from_utf16_lossy(&units))
}

/// TS_RAIL_ORDER_EXEC: returns (exe-or-file, flags).
fn parse_exec(data: &[u8]) -> PduResult<(String, u16)> {
    if data.len() < HEADER_SIZE + 8 {
        return Err(invalid_field_err!("Rail", "exec", "truncated execution request"));
    }

    let mut cursor = ReadCursor::new(data);
    cursor.advance(HEADER_SIZE);

    let flags = cursor.read_u16();
    let exe_len = usize::from(cursor.read_u16());
    let _working_dir_len = cursor.read_u16();
    let _arguments_len = cursor.read_u16();

    let application = read_utf16(&mut cursor, exe_len)?;

    Ok((application, flags))
}

/// TS_RAIL_ORDER_EXEC_RESULT: returns (exe-or-file, flags, execResult).
fn parse_exec_result(data: &[u8]) -> PduResult<(String, u16, u16)> {
    if data.len() < HEADER_SIZE + 12 {
        return Err(invalid_field_err!("Rail", "execResult", "truncated execution result"));
    }

    let mut cursor = ReadCursor::new(data);
    cursor.advance(HEADER_SIZE);

    let flags = cursor.read_u16();
    let exec_result = cursor.read_u16();
    let _raw_result = cursor.read_u32();
    let _padding = cursor.read_u16();
    let exe_len = usize::from(cursor.read_u16());

    let application = read_utf16(&mut cursor, exe_len)?;

    Ok((application, flags, exec_result))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const BOTH: ChannelFlags = ChannelFlags::FLAG_FIRST.union(ChannelFlags::FLAG_LAST);

    struct TableMapper(Vec<(u32, u32)>);

    impl WindowIdMapper for TableMapper {
        fn map(&self, window_id: u32) -> Option<u32> {
            self.0.iter().find(|(from, _)| *from == window_id).map(|(_, to)| *to)
        }
    }

    fn identity_filter() -> RailFilter {
        RailFilter::new(Box::new(IdentityWindowIdMapper))
    }

    fn utf16(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    fn order(order_type: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.extend_from_slice(&order_type.to_le_bytes());
        out.extend_from_slice(&((HEADER_SIZE + body.len()) as u16).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    fn exec_order(application: &str, flags: u16) -> Vec<u8> {
        let exe = utf16(application);
        let mut body = Vec::new();
        body.extend_from_slice(&flags.to_le_bytes());
        body.extend_from_slice(&(exe.len() as u16).to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes()); // workingDir
        body.extend_from_slice(&0u16.to_le_bytes()); // arguments
        body.extend_from_slice(&exe);
        order(TS_RAIL_ORDER_EXEC, &body)
    }

    fn exec_result_order(application: &str, flags: u16, exec_result: u16) -> Vec<u8> {
        let exe = utf16(application);
        let mut body = Vec::new();
        body.extend_from_slice(&flags.to_le_bytes());
        body.extend_from_slice(&exec_result.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes()); // rawResult
        body.extend_from_slice(&0u16.to_le_bytes()); // padding
        body.extend_from_slice(&(exe.len() as u16).to_le_bytes());
        body.extend_from_slice(&exe);
        order(TS_RAIL_ORDER_EXEC_RESULT, &body)
    }

    #[test]
    fn execution_request_is_queued_and_logged() {
        let mut filter = identity_filter();

        let pdu = exec_order("||notepad", 0x0008);
        let effects = filter.process_client_chunk(pdu.len() as u32, BOTH, &pdu).unwrap();

        assert_eq!(
            effects,
            vec![
                ChannelEffect::SendToServer(pdu),
                ChannelEffect::Log(SessionEvent::ApplicationExecutionRequested {
                    application: "||notepad".to_owned(),
                }),
            ]
        );
    }

    #[test]
    fn execution_result_matches_the_pending_request() {
        let mut filter = identity_filter();

        let exec = exec_order("||notepad", 0x0008);
        filter.process_client_chunk(exec.len() as u32, BOTH, &exec).unwrap();

        let result = exec_result_order("||notepad", 0x0008, 0x0000);
        let effects = filter.process_server_chunk(result.len() as u32, BOTH, &result).unwrap();

        assert_eq!(
            effects,
            vec![
                ChannelEffect::SendToClient(result),
                ChannelEffect::Log(SessionEvent::ApplicationExecutionResult {
                    application: "||notepad".to_owned(),
                    exec_result: 0,
                }),
            ]
        );
        assert!(filter.launch_pending.is_empty());
    }

    #[test]
    fn window_id_is_rewritten_through_the_mapper() {
        let mut filter = RailFilter::new(Box::new(TableMapper(vec![(0x11, 0x99)])));

        let pdu = order(TS_RAIL_ORDER_ACTIVATE, &[0x11, 0x00, 0x00, 0x00, 0x01]);
        let effects = filter.process_client_chunk(pdu.len() as u32, BOTH, &pdu).unwrap();

        let expected = order(TS_RAIL_ORDER_ACTIVATE, &[0x99, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(effects, vec![ChannelEffect::SendToServer(expected)]);
    }

    #[test]
    fn order_for_a_client_only_window_is_dropped() {
        let mut filter = RailFilter::new(Box::new(TableMapper(Vec::new())));

        let pdu = order(TS_RAIL_ORDER_SYSCOMMAND, &[0x11, 0x00, 0x00, 0x00, 0x20, 0xF0]);
        let effects = filter.process_client_chunk(pdu.len() as u32, BOTH, &pdu).unwrap();

        assert!(effects.is_empty());
    }

    #[test]
    fn unknown_client_order_is_forwarded() {
        let mut filter = identity_filter();

        let pdu = order(0x00F3, &[0xAA, 0xBB]);
        let effects = filter.process_client_chunk(pdu.len() as u32, BOTH, &pdu).unwrap();

        assert_eq!(effects, vec![ChannelEffect::SendToServer(pdu)]);
    }

    #[test]
    fn unknown_server_order_is_dropped() {
        let mut filter = identity_filter();

        let pdu = order(0x00F3, &[0xAA, 0xBB]);
        let effects = filter.process_server_chunk(pdu.len() as u32, BOTH, &pdu).unwrap();

        assert!(effects.is_empty());
    }

    #[test]
    fn length_mismatch_on_an_inspected_order_is_a_fragmentation_error() {
        let mut filter = identity_filter();

        let mut pdu = exec_order("x", 0);
        // embedded orderLength disagrees with the channel total length
        pdu[2] = 0xFF;

        assert!(filter.process_client_chunk(pdu.len() as u32, BOTH, &pdu).is_err());
    }

    #[rstest]
    #[case::first_only(ChannelFlags::FLAG_FIRST)]
    #[case::last_only(ChannelFlags::FLAG_LAST)]
    fn fragmented_inspected_order_is_rejected(#[case] flags: ChannelFlags) {
        let mut filter = identity_filter();

        let pdu = exec_order("x", 0);
        // first-only trips check_is_unit, last-only trips reassembly
        let result = filter.process_client_chunk((pdu.len() * 2) as u32, flags, &pdu);

        assert!(result.is_err());
    }

    #[test]
    fn fragmented_sysparam_is_reassembled_and_forwarded() {
        let mut filter = identity_filter();

        let pdu = order(TS_RAIL_ORDER_SYSPARAM, &[0x00; 12]);
        let total = pdu.len() as u32;
        let (first, rest) = pdu.split_at(6);

        assert!(filter
            .process_client_chunk(total, ChannelFlags::FLAG_FIRST, first)
            .unwrap()
            .is_empty());

        let effects = filter.process_client_chunk(total, ChannelFlags::FLAG_LAST, rest).unwrap();

        assert_eq!(effects, vec![ChannelEffect::SendToServer(pdu)]);
    }
}
