//! Wire structures for the RDP session protocol: framing, connection
//! initiation, MCS, licensing, virtual channel chunking, fast-path output
//! and the RemoteFX codec blocks.

use rdpgate_core::{unexpected_message_type_err, PduResult, ReadCursor};

pub mod bitmap;
pub mod fast_path;
pub mod gcc;
pub mod geometry;
pub mod license;
pub mod mcs;
pub mod nego;
pub mod palette;
pub mod pointer;
pub mod rdp;
pub mod rfx;
pub mod surface_commands;
pub mod tpdu;
pub mod tpkt;
pub mod utf16;
pub mod vc;
pub mod x224;

pub(crate) mod ber;
pub(crate) mod crypto;
pub(crate) mod per;

/// Action bits of the first byte on the wire, shared by the fast-path
/// header and the TPKT version octet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    FastPath = 0x00,
    X224 = 0x03,
}

impl Action {
    pub fn from_fp_output_header(fp_output_header: u8) -> Result<Self, u8> {
        match fp_output_header & 0b11 {
            0x00 => Ok(Self::FastPath),
            0x03 => Ok(Self::X224),
            unknown_action_bits => Err(unknown_action_bits),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PduInfo {
    pub action: Action,
    pub length: usize,
}

/// Finds the next PDU size by peeking at the first few bytes.
///
/// Returns `Ok(None)` when more bytes are needed to tell, and an error when
/// the header is structurally invalid (in which case the transport cannot be
/// resynchronized and must be torn down).
pub fn find_size(bytes: &[u8]) -> PduResult<Option<PduInfo>> {
    macro_rules! ensure_enough {
        ($bytes:expr, $len:expr) => {
            if $bytes.len() < $len {
                return Ok(None);
            }
        };
    }

    ensure_enough!(bytes, 1);
    let fp_output_header = bytes[0];

    let action = Action::from_fp_output_header(fp_output_header)
        .map_err(|unknown_action| unexpected_message_type_err!("fpOutputHeader", unknown_action))?;

    match action {
        Action::X224 => {
            ensure_enough!(bytes, tpkt::TpktHeader::SIZE);
            let tpkt = tpkt::TpktHeader::read(&mut ReadCursor::new(bytes))?;

            Ok(Some(PduInfo {
                action,
                length: tpkt.packet_length(),
            }))
        }
        Action::FastPath => {
            ensure_enough!(bytes, 2);
            let a = bytes[1];

            let fast_path_length = if a & 0x80 != 0 {
                ensure_enough!(bytes, 3);
                let b = bytes[2];

                ((u16::from(a) & !0x80) << 8) + u16::from(b)
            } else {
                u16::from(a)
            };

            Ok(Some(PduInfo {
                action,
                length: usize::from(fast_path_length),
            }))
        }
    }
}

/// Tells the transport loop how many bytes make up the next PDU.
pub trait PduHint: Send + Sync + core::fmt::Debug {
    /// Returns `Some(length)` once the full extent of the next PDU is known.
    fn find_size(&self, bytes: &[u8]) -> PduResult<Option<usize>>;
}

rdpgate_core::assert_obj_safe!(PduHint);

#[derive(Clone, Copy, Debug)]
pub struct X224Hint;

pub const X224_HINT: X224Hint = X224Hint;

impl PduHint for X224Hint {
    fn find_size(&self, bytes: &[u8]) -> PduResult<Option<usize>> {
        match crate::find_size(bytes)? {
            Some(pdu_info) => {
                debug_assert_eq!(pdu_info.action, Action::X224);
                Ok(Some(pdu_info.length))
            }
            None => Ok(None),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FastPathHint;

pub const FAST_PATH_HINT: FastPathHint = FastPathHint;

impl PduHint for FastPathHint {
    fn find_size(&self, bytes: &[u8]) -> PduResult<Option<usize>> {
        match crate::find_size(bytes)? {
            Some(pdu_info) => {
                debug_assert_eq!(pdu_info.action, Action::FastPath);
                Ok(Some(pdu_info.length))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_size_needs_more_bytes_for_short_input() {
        assert_eq!(find_size(&[]).unwrap(), None);
        assert_eq!(find_size(&[0x03]).unwrap(), None);
        assert_eq!(find_size(&[0x03, 0x00, 0x00]).unwrap(), None);
    }

    #[test]
    fn find_size_reads_tpkt_length() {
        let info = find_size(&[0x03, 0x00, 0x00, 0x0c]).unwrap().unwrap();
        assert_eq!(info.action, Action::X224);
        assert_eq!(info.length, 12);
    }

    #[test]
    fn find_size_reads_fast_path_short_length() {
        let info = find_size(&[0x00, 0x08]).unwrap().unwrap();
        assert_eq!(info.action, Action::FastPath);
        assert_eq!(info.length, 8);
    }

    #[test]
    fn find_size_reads_fast_path_long_length() {
        // high bit of the first length byte selects the two-byte form
        let info = find_size(&[0x00, 0x81, 0x2a]).unwrap().unwrap();
        assert_eq!(info.action, Action::FastPath);
        assert_eq!(info.length, 0x012a);
    }

    #[test]
    fn find_size_rejects_unknown_action() {
        assert!(find_size(&[0x02, 0x00]).is_err());
    }
}
