//! PDUs exchanged on the global static channel: the Client Info PDU and the
//! security / share headers wrapping everything that follows it.

use rdpgate_core::{ensure_fixed_part_size, invalid_field_err, Decode, Encode, PduResult, ReadCursor, WriteCursor};

use crate::rdp::client_info::ClientInfo;
use crate::rdp::headers::{BasicSecurityHeader, BasicSecurityHeaderFlags};

pub mod client_info;
pub mod headers;
pub mod redirection;

/// Client Info PDU prefixed with its basic security header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfoPdu {
    pub security_header: BasicSecurityHeader,
    pub client_info: ClientInfo,
}

impl ClientInfoPdu {
    const NAME: &'static str = "ClientInfoPDU";

    const FIXED_PART_SIZE: usize = BasicSecurityHeader::FIXED_PART_SIZE + ClientInfo::FIXED_PART_SIZE;
}

impl Encode for ClientInfoPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        self.security_header.encode(dst)?;
        self.client_info.encode(dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.security_header.size() + self.client_info.size()
    }
}

impl<'de> Decode<'de> for ClientInfoPdu {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let security_header = BasicSecurityHeader::decode(src)?;
        if !security_header.flags.contains(BasicSecurityHeaderFlags::INFO_PKT) {
            return Err(invalid_field_err(
                Self::NAME,
                "securityHeader",
                "INFO_PKT flag is not set",
            ));
        }

        let client_info = ClientInfo::decode(src)?;

        Ok(Self {
            security_header,
            client_info,
        })
    }
}
