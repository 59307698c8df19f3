//! Device redirection channel (rdpdr, MS-RDPEFS) filtering.
//!
//! The client announces its redirected devices in a device list; the filter
//! strips every device whose class the policy denies, synthesizes the
//! DEVICE_REPLY error the client expects for each stripped device and emits
//! one audit event per rejection. Core capability PDUs are validated
//! structurally; everything else passes through.

use rdpgate_core::{invalid_field_err, PduResult, ReadCursor};
use rdpgate_svc::{
    ChannelAuthorizer, ChannelEffect, ChannelFilter, ChannelFlags, ChannelName, ChunkCollector, DeviceClass,
    SessionEvent,
};

pub const RDPDR_CHANNEL_NAME: ChannelName = ChannelName::from_static(b"rdpdr\0\0\0");

// RDPDR_HEADER component values
const RDPDR_CTYP_CORE: u16 = 0x4472;
const RDPDR_CTYP_PRN: u16 = 0x5052;

// RDPDR_HEADER packetId values (core component)
const PAKID_CORE_DEVICELIST_ANNOUNCE: u16 = 0x4441;
const PAKID_CORE_DEVICE_REPLY: u16 = 0x6472;
const PAKID_CORE_SERVER_CAPABILITY: u16 = 0x5350;
const PAKID_CORE_CLIENT_CAPABILITY: u16 = 0x4350;

// DEVICE_ANNOUNCE deviceType values
const RDPDR_DTYP_SERIAL: u32 = 0x0000_0001;
const RDPDR_DTYP_PARALLEL: u32 = 0x0000_0002;
const RDPDR_DTYP_PRINT: u32 = 0x0000_0004;
const RDPDR_DTYP_FILESYSTEM: u32 = 0x0000_0008;
const RDPDR_DTYP_SMARTCARD: u32 = 0x0000_0020;

const STATUS_ACCESS_DENIED: u32 = 0xC000_0022;

const HEADER_SIZE: usize = 4;

/// Deep-inspection filter for the rdpdr channel.
pub struct RdpdrFilter {
    authorizer: ChannelAuthorizer,
    client_collector: ChunkCollector,
    server_collector: ChunkCollector,
}

struct DeviceAnnounce {
    device_type: u32,
    device_id: u32,
    dos_name: [u8; 8],
    data: Vec<u8>,
}

impl DeviceAnnounce {
    fn class(&self) -> Option<DeviceClass> {
        match self.device_type {
            RDPDR_DTYP_SERIAL | RDPDR_DTYP_PARALLEL => Some(DeviceClass::Port),
            RDPDR_DTYP_PRINT => Some(DeviceClass::Printer),
            RDPDR_DTYP_FILESYSTEM => Some(DeviceClass::Drive),
            RDPDR_DTYP_SMARTCARD => Some(DeviceClass::Smartcard),
            _ => None,
        }
    }

    fn name(&self) -> String {
        let end = self.dos_name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.dos_name[..end]).into_owned()
    }
}

impl RdpdrFilter {
    pub fn new(authorizer: ChannelAuthorizer) -> Self {
        Self {
            authorizer,
            client_collector: ChunkCollector::new(),
            server_collector: ChunkCollector::new(),
        }
    }

    fn process_client_pdu(&mut self, data: Vec<u8>) -> PduResult<Vec<ChannelEffect>> {
        let (component, packet_id) = read_header(&data)?;

        if component != RDPDR_CTYP_CORE && component != RDPDR_CTYP_PRN {
            return Err(invalid_field_err!("Rdpdr", "component", "unknown component"));
        }

        match (component, packet_id) {
            (RDPDR_CTYP_CORE, PAKID_CORE_DEVICELIST_ANNOUNCE) => self.filter_device_list(&data),
            (RDPDR_CTYP_CORE, PAKID_CORE_CLIENT_CAPABILITY) => {
                validate_capabilities(&data[HEADER_SIZE..])?;
                Ok(vec![ChannelEffect::SendToServer(data)])
            }
            _ => Ok(vec![ChannelEffect::SendToServer(data)]),
        }
    }

    fn process_server_pdu(&mut self, data: Vec<u8>) -> PduResult<Vec<ChannelEffect>> {
        let (component, packet_id) = read_header(&data)?;

        if component != RDPDR_CTYP_CORE && component != RDPDR_CTYP_PRN {
            return Err(invalid_field_err!("Rdpdr", "component", "unknown component"));
        }

        if (component, packet_id) == (RDPDR_CTYP_CORE, PAKID_CORE_SERVER_CAPABILITY) {
            validate_capabilities(&data[HEADER_SIZE..])?;
        }

        Ok(vec![ChannelEffect::SendToClient(data)])
    }

    /// Re-encodes the device list with denied classes removed, answering
    /// each removed device with an access-denied DEVICE_REPLY.
    fn filter_device_list(&mut self, data: &[u8]) -> PduResult<Vec<ChannelEffect>> {
        let devices = parse_device_list(&data[HEADER_SIZE..])?;

        let mut kept = Vec::new();
        let mut effects = Vec::new();

        for device in devices {
            let authorized = device
                .class()
                .is_some_and(|class| self.authorizer.is_device_class_authorized(class));

            if authorized {
                kept.push(device);
            } else {
                warn!(
                    device_name = %device.name(),
                    device_type = device.device_type,
                    "Device redirection denied by policy"
                );

                effects.push(ChannelEffect::SendToClient(device_reply(
                    device.device_id,
                    STATUS_ACCESS_DENIED,
                )));

                if let Some(class) = device.class() {
                    effects.push(ChannelEffect::Log(SessionEvent::DeviceRedirectionRejected {
                        device_name: device.name(),
                        device_class: class,
                    }));
                }
            }
        }

        if !kept.is_empty() {
            effects.insert(0, ChannelEffect::SendToServer(encode_device_list(&kept)));
        }

        Ok(effects)
    }
}

impl ChannelFilter for RdpdrFilter {
    fn channel_name(&self) -> ChannelName {
        RDPDR_CHANNEL_NAME
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

fn read_header(data: &[u8]) -> PduResult<(u16, u16)> {
    if data.len() < HEADER_SIZE {
        return Err(invalid_field_err!("Rdpdr", "header", "truncated rdpdr header"));
    }

    let mut cursor = ReadCursor::new(data);
    Ok((cursor.read_u16(), cursor.read_u16()))
}

fn parse_device_list(payload: &[u8]) -> PduResult<Vec<DeviceAnnounce>> {
    if payload.len() < 4 {
        return Err(invalid_field_err!("Rdpdr", "deviceCount", "truncated device list"));
    }

    let mut cursor = ReadCursor::new(payload);
    let count = cursor.read_u32();

    let mut devices = Vec::new();

    for _ in 0..count {
        if cursor.len() < 20 {
            return Err(invalid_field_err!("Rdpdr", "deviceAnnounce", "truncated device entry"));
        }

        let device_type = cursor.read_u32();
        let device_id = cursor.read_u32();
        let dos_name = cursor.read_array::<8>();
        let data_length = cursor.read_u32() as usize;

        if cursor.len() < data_length {
            return Err(invalid_field_err!("Rdpdr", "deviceDataLength", "overflows the PDU"));
        }

        devices.push(DeviceAnnounce {
            device_type,
            device_id,
            dos_name,
            data: cursor.read_slice(data_length).to_vec(),
        });
    }

    Ok(devices)
}

fn encode_device_list(devices: &[DeviceAnnounce]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&RDPDR_CTYP_CORE.to_le_bytes());
    out.extend_from_slice(&PAKID_CORE_DEVICELIST_ANNOUNCE.to_le_bytes());
    out.extend_from_slice(&(devices.len() as u32).to_le_bytes());

    for device in devices {
        out.extend_from_slice(&device.device_type.to_le_bytes());
        out.extend_from_slice(&device.device_id.to_le_bytes());
        out.extend_from_slice(&device.dos_name);
        out.extend_from_slice(&(device.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&device.data);
    }

    out
}

fn device_reply(device_id: u32, result_code: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    out.extend_from_slice(&RDPDR_CTYP_CORE.to_le_bytes());
    out.extend_from_slice(&PAKID_CORE_DEVICE_REPLY.to_le_bytes());
    out.extend_from_slice(&device_id.to_le_bytes());
    out.extend_from_slice(&result_code.to_le_bytes());
    out
}

/// Structural validation of a capability list: numCapabilities entries of
/// {type, length, version} headers whose lengths stay inside the PDU.
fn validate_capabilities(payload: &[u8]) -> PduResult<()> {
    if payload.len() < 4 {
        return Err(invalid_field_err!("Rdpdr", "numCapabilities", "truncated capability list"));
    }

    let mut cursor = ReadCursor::new(payload);
    let count = cursor.read_u16();
    let _pad = cursor.read_u16();

    for _ in 0..count {
        if cursor.len() < 8 {
            return Err(invalid_field_err!("Rdpdr", "capabilityHeader", "truncated capability"));
        }

        let _capability_type = cursor.read_u16();
        let length = usize::from(cursor.read_u16());
        let _version = cursor.read_u32();

        let Some(body_len) = length.checked_sub(8) else {
            return Err(invalid_field_err!("Rdpdr", "capabilityLength", "shorter than its header"));
        };

        if cursor.len() < body_len {
            return Err(invalid_field_err!("Rdpdr", "capabilityLength", "overflows the PDU"));
        }

        cursor.advance(body_len);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use rdpgate_svc::UnlistedPolicy;

    use super::*;

    const BOTH: ChannelFlags = ChannelFlags::FLAG_FIRST.union(ChannelFlags::FLAG_LAST);

    fn announce(devices: &[(u32, u32, &[u8; 8])]) -> Vec<u8> {
        let devices: Vec<DeviceAnnounce> = devices
            .iter()
            .map(|&(device_type, device_id, dos_name)| DeviceAnnounce {
                device_type,
                device_id,
                dos_name: *dos_name,
                data: Vec::new(),
            })
            .collect();

        encode_device_list(&devices)
    }

    fn feed_client(filter: &mut RdpdrFilter, pdu: &[u8]) -> Vec<ChannelEffect> {
        filter.process_client_chunk(pdu.len() as u32, BOTH, pdu).unwrap()
    }

    #[test]
    fn authorized_devices_are_forwarded_unchanged() {
        let authorizer = ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted)
            .allow_device_class(DeviceClass::Drive)
            .allow_device_class(DeviceClass::Smartcard);
        let mut filter = RdpdrFilter::new(authorizer);

        let pdu = announce(&[
            (RDPDR_DTYP_FILESYSTEM, 1, b"C\0\0\0\0\0\0\0"),
            (RDPDR_DTYP_SMARTCARD, 2, b"SCARD\0\0\0"),
        ]);
        let effects = feed_client(&mut filter, &pdu);

        assert_eq!(effects, vec![ChannelEffect::SendToServer(pdu)]);
    }

    #[test]
    fn denied_device_is_stripped_and_answered_with_access_denied() {
        let authorizer =
            ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted).allow_device_class(DeviceClass::Drive);
        let mut filter = RdpdrFilter::new(authorizer);

        let pdu = announce(&[
            (RDPDR_DTYP_FILESYSTEM, 1, b"C\0\0\0\0\0\0\0"),
            (RDPDR_DTYP_PRINT, 2, b"PRN1\0\0\0\0"),
        ]);
        let effects = feed_client(&mut filter, &pdu);

        assert_eq!(
            effects,
            vec![
                ChannelEffect::SendToServer(announce(&[(RDPDR_DTYP_FILESYSTEM, 1, b"C\0\0\0\0\0\0\0")])),
                ChannelEffect::SendToClient(device_reply(2, STATUS_ACCESS_DENIED)),
                ChannelEffect::Log(SessionEvent::DeviceRedirectionRejected {
                    device_name: "PRN1".to_owned(),
                    device_class: DeviceClass::Printer,
                }),
            ]
        );
    }

    #[test]
    fn fully_denied_list_is_swallowed() {
        let mut filter = RdpdrFilter::new(ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted));

        let pdu = announce(&[(RDPDR_DTYP_PRINT, 9, b"PRN9\0\0\0\0")]);
        let effects = feed_client(&mut filter, &pdu);

        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], ChannelEffect::SendToClient(_)));
        assert!(!effects.iter().any(|e| matches!(e, ChannelEffect::SendToServer(_))));
    }

    #[test]
    fn unknown_device_type_is_rejected_without_an_event() {
        let mut filter = RdpdrFilter::new(ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted));

        let pdu = announce(&[(0x40, 3, b"WEIRD\0\0\0")]);
        let effects = feed_client(&mut filter, &pdu);

        assert_eq!(effects, vec![ChannelEffect::SendToClient(device_reply(3, STATUS_ACCESS_DENIED))]);
    }

    #[test]
    fn truncated_device_entry_is_fatal() {
        let mut filter = RdpdrFilter::new(ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted));

        let mut pdu = announce(&[(RDPDR_DTYP_FILESYSTEM, 1, b"C\0\0\0\0\0\0\0")]);
        pdu.truncate(pdu.len() - 4);

        assert!(filter.process_client_chunk(pdu.len() as u32, BOTH, &pdu).is_err());
    }

    #[test]
    fn unknown_component_is_fatal() {
        let mut filter = RdpdrFilter::new(ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted));

        let pdu = [0x00, 0x00, 0x41, 0x41];

        assert!(filter.process_client_chunk(pdu.len() as u32, BOTH, &pdu).is_err());
    }

    #[test]
    fn server_capability_pdu_is_validated_and_forwarded() {
        let mut filter = RdpdrFilter::new(ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted));

        let mut pdu = Vec::new();
        pdu.extend_from_slice(&RDPDR_CTYP_CORE.to_le_bytes());
        pdu.extend_from_slice(&PAKID_CORE_SERVER_CAPABILITY.to_le_bytes());
        pdu.extend_from_slice(&1u16.to_le_bytes()); // numCapabilities
        pdu.extend_from_slice(&0u16.to_le_bytes()); // padding
        pdu.extend_from_slice(&1u16.to_le_bytes()); // CAP_GENERAL_TYPE
        pdu.extend_from_slice(&12u16.to_le_bytes()); // capabilityLength
        pdu.extend_from_slice(&1u32.to_le_bytes()); // version
        pdu.extend_from_slice(&[0; 4]); // body

        let effects = filter.process_server_chunk(pdu.len() as u32, BOTH, &pdu).unwrap();

        assert_eq!(effects, vec![ChannelEffect::SendToClient(pdu)]);
    }
}
