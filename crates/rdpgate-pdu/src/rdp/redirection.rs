//! Server Redirection PDU (MS-RDPBCGR 2.2.13.1).
//!
//! Sent by a broker instead of the licensing exchange to move the client to
//! another target. Optional fields are present according to `redirFlags`, in
//! the order the flags are defined.

use bitflags::bitflags;

use rdpgate_core::{cast_length, ensure_fixed_part_size, ensure_size, Decode, Encode, PduResult, ReadCursor, WriteCursor};

use crate::utf16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct RedirectionFlags: u32 {
        const TARGET_NET_ADDRESS = 0x0000_0001;
        const LOAD_BALANCE_INFO = 0x0000_0002;
        const USERNAME = 0x0000_0004;
        const DOMAIN = 0x0000_0008;
        const PASSWORD = 0x0000_0010;
        const DONT_STORE_USERNAME = 0x0000_0020;
        const SMARTCARD_LOGON = 0x0000_0040;
        const NOREDIRECT = 0x0000_0080;
        const TARGET_FQDN = 0x0000_0100;
        const TARGET_NETBIOS_NAME = 0x0000_0200;
        const TARGET_NET_ADDRESSES = 0x0000_0800;
        const CLIENT_TSV_URL = 0x0000_1000;
        const SERVER_TSV_CAPABLE = 0x0000_2000;
    }
}

/// RDP_SERVER_REDIRECTION_PACKET.
///
/// `TARGET_NET_ADDRESSES` is carried as an opaque blob: the engine never
/// picks an address out of the list itself, the caller does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRedirection {
    pub session_id: u32,
    pub flags: RedirectionFlags,
    pub target_net_address: Option<String>,
    pub load_balance_info: Option<Vec<u8>>,
    pub username: Option<String>,
    pub domain: Option<String>,
    pub password: Option<Vec<u8>>,
    pub target_fqdn: Option<String>,
    pub target_netbios_name: Option<String>,
    pub target_net_addresses: Option<Vec<u8>>,
    pub tsv_url: Option<Vec<u8>>,
}

impl ServerRedirection {
    const NAME: &'static str = "ServerRedirection";

    // flags (2) + length (2) + sessionId (4) + redirFlags (4)
    const FIXED_PART_SIZE: usize = 12;

    const SEC_REDIRECTION_PKT: u16 = 0x0400;

    /// The most specific routing target the server provided.
    pub fn target(&self) -> Option<&str> {
        self.target_net_address
            .as_deref()
            .or(self.target_fqdn.as_deref())
            .or(self.target_netbios_name.as_deref())
    }

    fn field_size(field: &Option<impl AsRef<[u8]>>) -> usize {
        field.as_ref().map(|f| 4 + f.as_ref().len()).unwrap_or(0)
    }

    fn string_field_size(field: &Option<String>) -> usize {
        field.as_ref().map(|s| 4 + (s.len() + 1) * 2).unwrap_or(0)
    }
}

fn read_length_prefixed<'a>(src: &mut ReadCursor<'a>, ctx: &'static str) -> PduResult<&'a [u8]> {
    ensure_size!(ctx: ctx, in: src, size: 4);
    let length = src.read_u32() as usize;
    ensure_size!(ctx: ctx, in: src, size: length);
    Ok(src.read_slice(length))
}

fn read_utf16_field(src: &mut ReadCursor<'_>, ctx: &'static str) -> PduResult<String> {
    let bytes = read_length_prefixed(src, ctx)?;
    Ok(utf16::from_utf16_bytes(bytes).trim_end_matches('\0').to_owned())
}

fn write_blob_field(dst: &mut WriteCursor<'_>, field: &'static str, bytes: &[u8]) -> PduResult<()> {
    dst.write_u32(cast_length!(ServerRedirection::NAME, field, bytes.len())?);
    dst.write_slice(bytes);
    Ok(())
}

fn write_utf16_field(dst: &mut WriteCursor<'_>, field: &'static str, value: &str) -> PduResult<()> {
    let mut bytes = utf16::to_utf16_bytes(value);
    bytes.extend_from_slice(&[0, 0]);
    write_blob_field(dst, field, &bytes)
}

impl Encode for ServerRedirection {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(Self::SEC_REDIRECTION_PKT);
        dst.write_u16(cast_length!(Self::NAME, "length", self.size())?);
        dst.write_u32(self.session_id);
        dst.write_u32(self.flags.bits());

        if let Some(address) = &self.target_net_address {
            write_utf16_field(dst, "targetNetAddress", address)?;
        }
        if let Some(info) = &self.load_balance_info {
            write_blob_field(dst, "loadBalanceInfo", info)?;
        }
        if let Some(username) = &self.username {
            write_utf16_field(dst, "userName", username)?;
        }
        if let Some(domain) = &self.domain {
            write_utf16_field(dst, "domain", domain)?;
        }
        if let Some(password) = &self.password {
            write_blob_field(dst, "password", password)?;
        }
        if let Some(fqdn) = &self.target_fqdn {
            write_utf16_field(dst, "targetFQDN", fqdn)?;
        }
        if let Some(netbios) = &self.target_netbios_name {
            write_utf16_field(dst, "targetNetBiosName", netbios)?;
        }
        if let Some(addresses) = &self.target_net_addresses {
            write_blob_field(dst, "targetNetAddresses", addresses)?;
        }
        if let Some(url) = &self.tsv_url {
            write_blob_field(dst, "tsvUrl", url)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
            + Self::string_field_size(&self.target_net_address)
            + Self::field_size(&self.load_balance_info)
            + Self::string_field_size(&self.username)
            + Self::string_field_size(&self.domain)
            + Self::field_size(&self.password)
            + Self::string_field_size(&self.target_fqdn)
            + Self::string_field_size(&self.target_netbios_name)
            + Self::field_size(&self.target_net_addresses)
            + Self::field_size(&self.tsv_url)
    }
}

impl<'de> Decode<'de> for ServerRedirection {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags_field = src.read_u16();
        if flags_field != Self::SEC_REDIRECTION_PKT {
            return Err(rdpgate_core::invalid_field_err(
                Self::NAME,
                "flags",
                "not a server redirection packet",
            ));
        }

        let _length = src.read_u16();
        let session_id = src.read_u32();
        let flags = RedirectionFlags::from_bits_truncate(src.read_u32());

        let target_net_address = flags
            .contains(RedirectionFlags::TARGET_NET_ADDRESS)
            .then(|| read_utf16_field(src, Self::NAME))
            .transpose()?;
        let load_balance_info = flags
            .contains(RedirectionFlags::LOAD_BALANCE_INFO)
            .then(|| read_length_prefixed(src, Self::NAME).map(<[u8]>::to_vec))
            .transpose()?;
        let username = flags
            .contains(RedirectionFlags::USERNAME)
            .then(|| read_utf16_field(src, Self::NAME))
            .transpose()?;
        let domain = flags
            .contains(RedirectionFlags::DOMAIN)
            .then(|| read_utf16_field(src, Self::NAME))
            .transpose()?;
        let password = flags
            .contains(RedirectionFlags::PASSWORD)
            .then(|| read_length_prefixed(src, Self::NAME).map(<[u8]>::to_vec))
            .transpose()?;
        let target_fqdn = flags
            .contains(RedirectionFlags::TARGET_FQDN)
            .then(|| read_utf16_field(src, Self::NAME))
            .transpose()?;
        let target_netbios_name = flags
            .contains(RedirectionFlags::TARGET_NETBIOS_NAME)
            .then(|| read_utf16_field(src, Self::NAME))
            .transpose()?;
        let target_net_addresses = flags
            .contains(RedirectionFlags::TARGET_NET_ADDRESSES)
            .then(|| read_length_prefixed(src, Self::NAME).map(<[u8]>::to_vec))
            .transpose()?;
        let tsv_url = flags
            .contains(RedirectionFlags::CLIENT_TSV_URL)
            .then(|| read_length_prefixed(src, Self::NAME).map(<[u8]>::to_vec))
            .transpose()?;

        // Trailing pad bytes are tolerated.

        Ok(Self {
            session_id,
            flags,
            target_net_address,
            load_balance_info,
            username,
            domain,
            password,
            target_fqdn,
            target_netbios_name,
            target_net_addresses,
            tsv_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;
    use rdpgate_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn redirection_round_trip() {
        let pdu = ServerRedirection {
            session_id: 7,
            flags: RedirectionFlags::TARGET_NET_ADDRESS
                | RedirectionFlags::LOAD_BALANCE_INFO
                | RedirectionFlags::USERNAME,
            target_net_address: Some("10.0.0.42".to_owned()),
            load_balance_info: Some(b"Cookie: msts=1234".to_vec()),
            username: Some("alice".to_owned()),
            domain: None,
            password: None,
            target_fqdn: None,
            target_netbios_name: None,
            target_net_addresses: None,
            tsv_url: None,
        };

        let encoded = encode_vec(&pdu).unwrap();
        let decoded: ServerRedirection = decode(&encoded).unwrap();

        assert_eq!(decoded, pdu);
        assert_eq!(decoded.target(), Some("10.0.0.42"));
    }

    #[test]
    fn decode_rejects_non_redirection_flags() {
        // EXCHANGE_PKT instead of the redirection marker
        let input = [0x01, 0x00, 0x0c, 0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

        let err = decode::<ServerRedirection>(&input).err().unwrap();

        expect!["[ServerRedirection] invalid `flags`: not a server redirection packet"]
            .assert_eq(&err.report().to_string());
    }

    #[test]
    fn target_prefers_net_address_over_fqdn() {
        let pdu = ServerRedirection {
            session_id: 0,
            flags: RedirectionFlags::TARGET_NET_ADDRESS | RedirectionFlags::TARGET_FQDN,
            target_net_address: Some("192.168.1.1".to_owned()),
            load_balance_info: None,
            username: None,
            domain: None,
            password: None,
            target_fqdn: Some("host.example.com".to_owned()),
            target_netbios_name: None,
            target_net_addresses: None,
            tsv_url: None,
        };

        assert_eq!(pdu.target(), Some("192.168.1.1"));
    }
}
