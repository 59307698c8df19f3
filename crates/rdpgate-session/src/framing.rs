//! Incremental PDU framing over a raw byte stream.

use rdpgate_core::{Decode as _, ReadCursor};
use rdpgate_pdu::fast_path::FastPathHeader;
use rdpgate_pdu::{find_size, Action};

use crate::{SessionErrorExt, SessionResult};

/// One complete PDU extracted from the stream, header bytes included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub action: Action,
    pub data: Vec<u8>,
}

/// Accumulates stream bytes and drains complete PDUs.
///
/// A structurally invalid framing header is unrecoverable: the stream offset
/// of the next PDU is unknowable, so the caller must tear the transport
/// down. The buffer never tries to resynchronize.
#[derive(Debug, Default)]
pub struct FramingBuffer {
    buffer: Vec<u8>,
}

impl FramingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every PDU completed by them, in stream
    /// order. An empty vector means more bytes are needed.
    pub fn feed(&mut self, bytes: &[u8]) -> SessionResult<Vec<Frame>> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();

        loop {
            let Some(info) = find_size(&self.buffer).map_err(crate::SessionError::pdu)? else {
                break;
            };

            if info.length < minimal_pdu_size(info.action) {
                return Err(reason_err!(
                    "Framing",
                    "declared PDU length {} is smaller than its header",
                    info.length
                ));
            }

            if self.buffer.len() < info.length {
                break;
            }

            let rest = self.buffer.split_off(info.length);
            let data = core::mem::replace(&mut self.buffer, rest);

            frames.push(Frame {
                action: info.action,
                data,
            });
        }

        Ok(frames)
    }

    /// Bytes buffered but not yet forming a complete PDU.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn minimal_pdu_size(action: Action) -> usize {
    match action {
        // TPKT header
        Action::X224 => 4,
        // fpOutputHeader + one length byte
        Action::FastPath => 2,
    }
}

/// Strips the fast-path framing header from a complete frame, returning the
/// update payload.
pub fn fast_path_payload(frame: &Frame) -> SessionResult<&[u8]> {
    let mut cursor = ReadCursor::new(&frame.data);
    let header = FastPathHeader::decode(&mut cursor).map_err(crate::SessionError::pdu)?;

    if cursor.len() < header.data_length {
        return Err(reason_err!(
            "Framing",
            "fast-path frame is shorter than its declared data length"
        ));
    }

    Ok(&cursor.remaining()[..header.data_length])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_header_yields_no_frame() {
        let mut buffer = FramingBuffer::new();

        assert!(buffer.feed(&[0x03]).unwrap().is_empty());
        assert!(buffer.feed(&[0x00]).unwrap().is_empty());
        assert_eq!(buffer.pending_len(), 2);
    }

    #[test]
    fn tpkt_frame_is_drained_once_complete() {
        let mut buffer = FramingBuffer::new();

        let pdu = [0x03, 0x00, 0x00, 0x07, 0xAA, 0xBB, 0xCC];
        assert!(buffer.feed(&pdu[..5]).unwrap().is_empty());

        let frames = buffer.feed(&pdu[5..]).unwrap();
        assert_eq!(
            frames,
            vec![Frame {
                action: Action::X224,
                data: pdu.to_vec(),
            }]
        );
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn multiple_frames_in_one_feed_are_split_in_order() {
        let mut buffer = FramingBuffer::new();

        let mut bytes = vec![0x03, 0x00, 0x00, 0x05, 0x11];
        bytes.extend_from_slice(&[0x00, 0x04, 0x22, 0x33]); // fast-path, length 4
        bytes.extend_from_slice(&[0x03, 0x00]); // start of a third PDU

        let frames = buffer.feed(&bytes).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].action, Action::X224);
        assert_eq!(frames[0].data, vec![0x03, 0x00, 0x00, 0x05, 0x11]);
        assert_eq!(frames[1].action, Action::FastPath);
        assert_eq!(frames[1].data, vec![0x00, 0x04, 0x22, 0x33]);
        assert_eq!(buffer.pending_len(), 2);
    }

    #[test]
    fn unknown_action_bits_are_fatal() {
        let mut buffer = FramingBuffer::new();

        assert!(buffer.feed(&[0x02, 0x00, 0x00, 0x04]).is_err());
    }

    #[test]
    fn undersized_declared_length_is_fatal() {
        let mut buffer = FramingBuffer::new();

        // TPKT length 3 cannot even cover the TPKT header
        assert!(buffer.feed(&[0x03, 0x00, 0x00, 0x03]).is_err());
    }

    #[test]
    fn fast_path_payload_is_stripped_of_the_framing_header() {
        let frame = Frame {
            action: Action::FastPath,
            data: vec![0x80, 0x05, 0xDE, 0xAD, 0xBE],
        };

        assert_eq!(fast_path_payload(&frame).unwrap(), &[0xDE, 0xAD, 0xBE]);
    }
}
