//! Dynamic virtual channel sub-protocol PDUs (MS-RDPEDYC section 2.2).
//!
//! Every PDU starts with a one-byte header: the command in the high 4 bits,
//! a command-dependent field in bits 2..4 and the channel-id width in the
//! low 2 bits.

use bit_field::BitField as _;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use rdpgate_core::{
    cast_length, ensure_size, invalid_field_err, Decode, Encode, PduResult, ReadCursor, WriteCursor,
};

const HEADER_SIZE: usize = 1;
const UNUSED_U8: u8 = 0;
const CREATION_STATUS_SIZE: usize = 4;
const CAPS_PAD_SIZE: usize = 1;
const CAPS_VERSION_SIZE: usize = 2;
const CHARGE_COUNT: usize = 4;

pub const DVC_CREATION_STATUS_OK: u32 = 0x0000_0000;
pub const DVC_CREATION_STATUS_NO_LISTENER: u32 = 0xC000_0001;

/// The command nibble of the DVC header byte.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum Cmd {
    Create = 0x01,
    DataFirst = 0x02,
    Data = 0x03,
    Close = 0x04,
    Capability = 0x05,
    DataFirstCompressed = 0x06,
    DataCompressed = 0x07,
    SoftSyncRequest = 0x08,
    SoftSyncResponse = 0x09,
}

/// Validates the high 4 bits of the first byte of a DVC PDU.
pub fn peek_cmd(data: &[u8]) -> Option<Cmd> {
    data.first().and_then(|byte| Cmd::from_u8(byte.get_bits(4..8)))
}

/// Wire width of the channel-id and length fields.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum FieldType {
    U8 = 0x00,
    U16 = 0x01,
    U32 = 0x02,
}

impl FieldType {
    pub fn read(self, src: &mut ReadCursor<'_>) -> PduResult<u32> {
        ensure_size!(ctx: "FieldType", in: src, size: self.size_of_val());

        let value = match self {
            Self::U8 => u32::from(src.read_u8()),
            Self::U16 => u32::from(src.read_u16()),
            Self::U32 => src.read_u32(),
        };

        Ok(value)
    }

    pub fn write(self, value: u32, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(ctx: "FieldType", in: dst, size: self.size_of_val());

        match self {
            Self::U8 => dst.write_u8(cast_length!("FieldType", "value", value)?),
            Self::U16 => dst.write_u16(cast_length!("FieldType", "value", value)?),
            Self::U32 => dst.write_u32(value),
        }

        Ok(())
    }

    pub fn size_of_val(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Header {
    channel_id_type: FieldType,
    pdu_dependent: u8,
    cmd: Cmd,
}

impl Header {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_size!(ctx: "DvcHeader", in: src, size: HEADER_SIZE);

        let byte = src.read_u8();

        let cmd = Cmd::from_u8(byte.get_bits(4..8))
            .ok_or_else(|| invalid_field_err!("DvcHeader", "cmd", "unknown command nibble"))?;
        let channel_id_type = FieldType::from_u8(byte.get_bits(0..2))
            .ok_or_else(|| invalid_field_err!("DvcHeader", "cbId", "invalid channel id width"))?;

        Ok(Self {
            channel_id_type,
            pdu_dependent: byte.get_bits(2..4),
            cmd,
        })
    }

    fn encode(self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(ctx: "DvcHeader", in: dst, size: HEADER_SIZE);

        let mut byte = 0u8;
        byte.set_bits(4..8, self.cmd as u8);
        byte.set_bits(2..4, self.pdu_dependent);
        byte.set_bits(0..2, self.channel_id_type as u8);
        dst.write_u8(byte);

        Ok(())
    }
}

/// PDUs the server sends on the drdynvc channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPdu {
    CapabilitiesRequest(CapabilitiesRequestPdu),
    CreateRequest(CreateRequestPdu),
    DataFirst(DataFirstPdu),
    Data(DataPdu),
    CloseRequest(ClosePdu),
}

impl Decode<'_> for ServerPdu {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        let header = Header::decode(src)?;

        match header.cmd {
            Cmd::Capability => Ok(Self::CapabilitiesRequest(CapabilitiesRequestPdu::decode(src)?)),
            Cmd::Create => Ok(Self::CreateRequest(CreateRequestPdu::decode(
                src,
                header.channel_id_type,
            )?)),
            Cmd::DataFirst => {
                let length_type = FieldType::from_u8(header.pdu_dependent).ok_or_else(|| {
                    invalid_field_err!("DvcHeader", "sp", "invalid length field width")
                })?;
                Ok(Self::DataFirst(DataFirstPdu::decode(
                    src,
                    header.channel_id_type,
                    length_type,
                )?))
            }
            Cmd::Data => Ok(Self::Data(DataPdu::decode(src, header.channel_id_type)?)),
            Cmd::Close => Ok(Self::CloseRequest(ClosePdu::decode(src, header.channel_id_type)?)),
            _ => Err(invalid_field_err!(
                "DvcHeader",
                "cmd",
                "command is not decoded structurally"
            )),
        }
    }
}

impl Encode for ServerPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        match self {
            Self::CapabilitiesRequest(pdu) => pdu.encode(dst),
            Self::CreateRequest(pdu) => pdu.encode(dst),
            Self::DataFirst(pdu) => pdu.encode(dst),
            Self::Data(pdu) => pdu.encode(dst),
            Self::CloseRequest(pdu) => pdu.encode(dst),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::CapabilitiesRequest(pdu) => pdu.name(),
            Self::CreateRequest(pdu) => pdu.name(),
            Self::DataFirst(pdu) => pdu.name(),
            Self::Data(pdu) => pdu.name(),
            Self::CloseRequest(pdu) => pdu.name(),
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::CapabilitiesRequest(pdu) => pdu.size(),
            Self::CreateRequest(pdu) => pdu.size(),
            Self::DataFirst(pdu) => pdu.size(),
            Self::Data(pdu) => pdu.size(),
            Self::CloseRequest(pdu) => pdu.size(),
        }
    }
}

/// PDUs the client sends on the drdynvc channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPdu {
    CapabilitiesResponse(CapabilitiesResponsePdu),
    CreateResponse(CreateResponsePdu),
    DataFirst(DataFirstPdu),
    Data(DataPdu),
    CloseResponse(ClosePdu),
}

impl Decode<'_> for ClientPdu {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        let header = Header::decode(src)?;

        match header.cmd {
            Cmd::Capability => Ok(Self::CapabilitiesResponse(CapabilitiesResponsePdu::decode(src)?)),
            Cmd::Create => Ok(Self::CreateResponse(CreateResponsePdu::decode(
                src,
                header.channel_id_type,
            )?)),
            Cmd::DataFirst => {
                let length_type = FieldType::from_u8(header.pdu_dependent).ok_or_else(|| {
                    invalid_field_err!("DvcHeader", "sp", "invalid length field width")
                })?;
                Ok(Self::DataFirst(DataFirstPdu::decode(
                    src,
                    header.channel_id_type,
                    length_type,
                )?))
            }
            Cmd::Data => Ok(Self::Data(DataPdu::decode(src, header.channel_id_type)?)),
            Cmd::Close => Ok(Self::CloseResponse(ClosePdu::decode(src, header.channel_id_type)?)),
            _ => Err(invalid_field_err!(
                "DvcHeader",
                "cmd",
                "command is not decoded structurally"
            )),
        }
    }
}

impl Encode for ClientPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        match self {
            Self::CapabilitiesResponse(pdu) => pdu.encode(dst),
            Self::CreateResponse(pdu) => pdu.encode(dst),
            Self::DataFirst(pdu) => pdu.encode(dst),
            Self::Data(pdu) => pdu.encode(dst),
            Self::CloseResponse(pdu) => pdu.encode(dst),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::CapabilitiesResponse(pdu) => pdu.name(),
            Self::CreateResponse(pdu) => pdu.name(),
            Self::DataFirst(pdu) => pdu.name(),
            Self::Data(pdu) => pdu.name(),
            Self::CloseResponse(pdu) => pdu.name(),
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::CapabilitiesResponse(pdu) => pdu.size(),
            Self::CreateResponse(pdu) => pdu.size(),
            Self::DataFirst(pdu) => pdu.size(),
            Self::Data(pdu) => pdu.size(),
            Self::CloseResponse(pdu) => pdu.size(),
        }
    }
}

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum CapsVersion {
    V1 = 0x0001,
    V2 = 0x0002,
    V3 = 0x0003,
}

/// DVC Capabilities Request PDU (DYNVC_CAPS_VERSION1/2/3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilitiesRequestPdu {
    V1,
    V2 { charges: [u16; CHARGE_COUNT] },
    V3 { charges: [u16; CHARGE_COUNT] },
}

impl CapabilitiesRequestPdu {
    const NAME: &'static str = "DYNVC_CAPS_REQUEST";

    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_size!(ctx: Self::NAME, in: src, size: CAPS_PAD_SIZE + CAPS_VERSION_SIZE);

        let _pad = src.read_u8();
        let version = CapsVersion::from_u16(src.read_u16())
            .ok_or_else(|| invalid_field_err!(Self::NAME, "version", "unknown caps version"))?;

        match version {
            CapsVersion::V1 => Ok(Self::V1),
            CapsVersion::V2 | CapsVersion::V3 => {
                ensure_size!(ctx: Self::NAME, in: src, size: CHARGE_COUNT * 2);

                let mut charges = [0u16; CHARGE_COUNT];
                for charge in charges.iter_mut() {
                    *charge = src.read_u16();
                }

                match version {
                    CapsVersion::V2 => Ok(Self::V2 { charges }),
                    _ => Ok(Self::V3 { charges }),
                }
            }
        }
    }

    pub fn version(&self) -> CapsVersion {
        match self {
            Self::V1 => CapsVersion::V1,
            Self::V2 { .. } => CapsVersion::V2,
            Self::V3 { .. } => CapsVersion::V3,
        }
    }
}

impl Encode for CapabilitiesRequestPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        Header {
            channel_id_type: FieldType::U8,
            pdu_dependent: UNUSED_U8,
            cmd: Cmd::Capability,
        }
        .encode(dst)?;
        dst.write_u8(UNUSED_U8);
        dst.write_u16(self.version() as u16);

        match self {
            Self::V1 => {}
            Self::V2 { charges } | Self::V3 { charges } => {
                for charge in charges {
                    dst.write_u16(*charge);
                }
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let charges_length = match self {
            Self::V1 => 0,
            Self::V2 { charges } | Self::V3 { charges } => charges.len() * 2,
        };

        HEADER_SIZE + CAPS_PAD_SIZE + CAPS_VERSION_SIZE + charges_length
    }
}

/// DVC Capabilities Response PDU (DYNVC_CAPS_RSP)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitiesResponsePdu {
    pub version: CapsVersion,
}

impl CapabilitiesResponsePdu {
    const NAME: &'static str = "DYNVC_CAPS_RSP";

    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_size!(ctx: Self::NAME, in: src, size: CAPS_PAD_SIZE + CAPS_VERSION_SIZE);

        let _pad = src.read_u8();
        let version = CapsVersion::from_u16(src.read_u16())
            .ok_or_else(|| invalid_field_err!(Self::NAME, "version", "unknown caps version"))?;

        Ok(Self { version })
    }
}

impl Encode for CapabilitiesResponsePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        Header {
            channel_id_type: FieldType::U8,
            pdu_dependent: UNUSED_U8,
            cmd: Cmd::Capability,
        }
        .encode(dst)?;
        dst.write_u8(UNUSED_U8);
        dst.write_u16(self.version as u16);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        HEADER_SIZE + CAPS_PAD_SIZE + CAPS_VERSION_SIZE
    }
}

/// DVC Create Request PDU (DYNVC_CREATE_REQ)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequestPdu {
    pub channel_id_type: FieldType,
    pub channel_id: u32,
    pub channel_name: String,
}

impl CreateRequestPdu {
    const NAME: &'static str = "DYNVC_CREATE_REQ";

    fn decode(src: &mut ReadCursor<'_>, channel_id_type: FieldType) -> PduResult<Self> {
        let channel_id = channel_id_type.read(src)?;

        let name_bytes = src.read_remaining();
        let terminator = name_bytes
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(name_bytes.len());
        let channel_name = core::str::from_utf8(&name_bytes[..terminator])
            .map_err(|_| invalid_field_err!(Self::NAME, "channelName", "not valid UTF-8"))?
            .to_owned();

        Ok(Self {
            channel_id_type,
            channel_id,
            channel_name,
        })
    }
}

impl Encode for CreateRequestPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        Header {
            channel_id_type: self.channel_id_type,
            pdu_dependent: UNUSED_U8,
            cmd: Cmd::Create,
        }
        .encode(dst)?;
        self.channel_id_type.write(self.channel_id, dst)?;
        dst.write_slice(self.channel_name.as_bytes());
        dst.write_u8(0);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        HEADER_SIZE + self.channel_id_type.size_of_val() + self.channel_name.len() + 1
    }
}

/// DVC Create Response PDU (DYNVC_CREATE_RSP)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateResponsePdu {
    pub channel_id_type: FieldType,
    pub channel_id: u32,
    pub creation_status: u32,
}

impl CreateResponsePdu {
    const NAME: &'static str = "DYNVC_CREATE_RSP";

    fn decode(src: &mut ReadCursor<'_>, channel_id_type: FieldType) -> PduResult<Self> {
        let channel_id = channel_id_type.read(src)?;

        ensure_size!(ctx: Self::NAME, in: src, size: CREATION_STATUS_SIZE);
        let creation_status = src.read_u32();

        Ok(Self {
            channel_id_type,
            channel_id,
            creation_status,
        })
    }
}

impl Encode for CreateResponsePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        Header {
            channel_id_type: self.channel_id_type,
            pdu_dependent: UNUSED_U8,
            cmd: Cmd::Create,
        }
        .encode(dst)?;
        self.channel_id_type.write(self.channel_id, dst)?;
        dst.write_u32(self.creation_status);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        HEADER_SIZE + self.channel_id_type.size_of_val() + CREATION_STATUS_SIZE
    }
}

/// DVC Data First PDU (DYNVC_DATA_FIRST)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFirstPdu {
    pub channel_id_type: FieldType,
    pub length_type: FieldType,
    pub channel_id: u32,
    /// Total length of the message this PDU opens, including the data
    /// carried by the subsequent DYNVC_DATA PDUs.
    pub total_length: u32,
    pub data: Vec<u8>,
}

impl DataFirstPdu {
    const NAME: &'static str = "DYNVC_DATA_FIRST";

    fn decode(
        src: &mut ReadCursor<'_>,
        channel_id_type: FieldType,
        length_type: FieldType,
    ) -> PduResult<Self> {
        let channel_id = channel_id_type.read(src)?;
        let total_length = length_type.read(src)?;
        let data = src.read_remaining().to_vec();

        Ok(Self {
            channel_id_type,
            length_type,
            channel_id,
            total_length,
            data,
        })
    }
}

impl Encode for DataFirstPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        Header {
            channel_id_type: self.channel_id_type,
            pdu_dependent: self.length_type as u8,
            cmd: Cmd::DataFirst,
        }
        .encode(dst)?;
        self.channel_id_type.write(self.channel_id, dst)?;
        self.length_type.write(self.total_length, dst)?;
        dst.write_slice(&self.data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        HEADER_SIZE + self.channel_id_type.size_of_val() + self.length_type.size_of_val() + self.data.len()
    }
}

/// DVC Data PDU (DYNVC_DATA)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPdu {
    pub channel_id_type: FieldType,
    pub channel_id: u32,
    pub data: Vec<u8>,
}

impl DataPdu {
    const NAME: &'static str = "DYNVC_DATA";

    fn decode(src: &mut ReadCursor<'_>, channel_id_type: FieldType) -> PduResult<Self> {
        let channel_id = channel_id_type.read(src)?;
        let data = src.read_remaining().to_vec();

        Ok(Self {
            channel_id_type,
            channel_id,
            data,
        })
    }
}

impl Encode for DataPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        Header {
            channel_id_type: self.channel_id_type,
            pdu_dependent: UNUSED_U8,
            cmd: Cmd::Data,
        }
        .encode(dst)?;
        self.channel_id_type.write(self.channel_id, dst)?;
        dst.write_slice(&self.data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        HEADER_SIZE + self.channel_id_type.size_of_val() + self.data.len()
    }
}

/// DVC Close PDU (DYNVC_CLOSE), sent by either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosePdu {
    pub channel_id_type: FieldType,
    pub channel_id: u32,
}

impl ClosePdu {
    const NAME: &'static str = "DYNVC_CLOSE";

    fn decode(src: &mut ReadCursor<'_>, channel_id_type: FieldType) -> PduResult<Self> {
        let channel_id = channel_id_type.read(src)?;

        Ok(Self {
            channel_id_type,
            channel_id,
        })
    }
}

impl Encode for ClosePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        Header {
            channel_id_type: self.channel_id_type,
            pdu_dependent: UNUSED_U8,
            cmd: Cmd::Close,
        }
        .encode(dst)?;
        self.channel_id_type.write(self.channel_id, dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        HEADER_SIZE + self.channel_id_type.size_of_val()
    }
}

#[cfg(test)]
mod tests {
    use rdpgate_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn create_request_round_trip() {
        let buffer = [
            0x10, // cmd: Create, cbId: U8
            0x03, // channel id
            b't', b'e', b's', b't', b'd', b'v', b'c', 0x00,
        ];

        let pdu = decode::<ServerPdu>(&buffer).unwrap();

        assert_eq!(
            pdu,
            ServerPdu::CreateRequest(CreateRequestPdu {
                channel_id_type: FieldType::U8,
                channel_id: 3,
                channel_name: "testdvc".to_owned(),
            })
        );
        assert_eq!(encode_vec(&pdu).unwrap(), buffer);
    }

    #[test]
    fn create_response_with_negative_status() {
        let pdu = CreateResponsePdu {
            channel_id_type: FieldType::U8,
            channel_id: 3,
            creation_status: DVC_CREATION_STATUS_NO_LISTENER,
        };

        let buffer = encode_vec(&pdu).unwrap();

        assert_eq!(buffer, [0x10, 0x03, 0x01, 0x00, 0x00, 0xC0]);

        let decoded = decode::<ClientPdu>(&buffer).unwrap();
        assert_eq!(decoded, ClientPdu::CreateResponse(pdu));
    }

    #[test]
    fn capabilities_request_v1_round_trip() {
        let buffer = [
            0x50, // cmd: Capability
            0x00, // pad
            0x01, 0x00, // version 1
        ];

        let pdu = decode::<ServerPdu>(&buffer).unwrap();

        assert_eq!(pdu, ServerPdu::CapabilitiesRequest(CapabilitiesRequestPdu::V1));
        assert_eq!(encode_vec(&pdu).unwrap(), buffer);
    }

    #[test]
    fn data_first_carries_the_total_length() {
        let buffer = [
            0x24, // cmd: DataFirst, sp: U16, cbId: U8
            0x07, // channel id
            0x08, 0x00, // total length: 8
            0x01, 0x02, 0x03, 0x04,
        ];

        let pdu = decode::<ServerPdu>(&buffer).unwrap();

        assert_eq!(
            pdu,
            ServerPdu::DataFirst(DataFirstPdu {
                channel_id_type: FieldType::U8,
                length_type: FieldType::U16,
                channel_id: 7,
                total_length: 8,
                data: vec![1, 2, 3, 4],
            })
        );
        assert_eq!(encode_vec(&pdu).unwrap(), buffer);
    }

    #[test]
    fn invalid_channel_id_width_is_rejected() {
        // cbId = 3 is not a defined width
        assert!(decode::<ServerPdu>(&[0x13, 0x03]).is_err());
    }

    #[test]
    fn unknown_command_nibble_is_rejected() {
        assert!(decode::<ServerPdu>(&[0xA0]).is_err());
        assert_eq!(peek_cmd(&[0xA0]), None);
        assert_eq!(peek_cmd(&[0x31, 0x05]), Some(Cmd::Data));
    }
}
