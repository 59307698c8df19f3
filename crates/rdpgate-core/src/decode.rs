use core::fmt;

use crate::{
    Error, InvalidFieldErr, NotEnoughBytesErr, OtherErr, ReadCursor, UnexpectedMessageTypeErr, UnsupportedValueErr,
    UnsupportedVersionErr,
};

pub type PduResult<T> = Result<T, PduError>;

pub type PduError = Error<PduErrorKind>;

/// Structural failure while reading or writing a wire structure.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum PduErrorKind {
    /// The buffer is shorter than the structure's declared extent.
    ///
    /// During framing this is the `TruncatedPdu` condition: the transport is
    /// no longer trustworthy and must be torn down.
    NotEnoughBytes { received: usize, expected: usize },
    InvalidField { field: &'static str, reason: &'static str },
    UnexpectedMessageType { got: u8 },
    UnsupportedVersion { got: u8 },
    UnsupportedValue { name: &'static str, value: String },
    Other { description: &'static str },
}

impl std::error::Error for PduErrorKind {}

impl fmt::Display for PduErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEnoughBytes { received, expected } => write!(
                f,
                "not enough bytes: received {received} bytes, expected {expected} bytes"
            ),
            Self::InvalidField { field, reason } => {
                write!(f, "invalid `{field}`: {reason}")
            }
            Self::UnexpectedMessageType { got } => {
                write!(f, "invalid message type ({got})")
            }
            Self::UnsupportedVersion { got } => {
                write!(f, "unsupported version ({got})")
            }
            Self::UnsupportedValue { name, value } => {
                write!(f, "unsupported {name} ({value})")
            }
            Self::Other { description } => {
                write!(f, "other ({description})")
            }
        }
    }
}

impl NotEnoughBytesErr for PduError {
    fn not_enough_bytes(context: &'static str, received: usize, expected: usize) -> Self {
        Self::new(context, PduErrorKind::NotEnoughBytes { received, expected })
    }
}

impl InvalidFieldErr for PduError {
    fn invalid_field(context: &'static str, field: &'static str, reason: &'static str) -> Self {
        Self::new(context, PduErrorKind::InvalidField { field, reason })
    }
}

impl UnexpectedMessageTypeErr for PduError {
    fn unexpected_message_type(context: &'static str, got: u8) -> Self {
        Self::new(context, PduErrorKind::UnexpectedMessageType { got })
    }
}

impl UnsupportedVersionErr for PduError {
    fn unsupported_version(context: &'static str, got: u8) -> Self {
        Self::new(context, PduErrorKind::UnsupportedVersion { got })
    }
}

impl UnsupportedValueErr for PduError {
    fn unsupported_value(context: &'static str, name: &'static str, value: String) -> Self {
        Self::new(context, PduErrorKind::UnsupportedValue { name, value })
    }
}

impl OtherErr for PduError {
    fn other(context: &'static str, description: &'static str) -> Self {
        Self::new(context, PduErrorKind::Other { description })
    }
}

/// Wire structure decodable from a byte stream, possibly borrowing from it.
pub trait Decode<'de>: Sized {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self>;
}

pub fn decode<'de, T>(src: &'de [u8]) -> PduResult<T>
where
    T: Decode<'de>,
{
    let mut cursor = ReadCursor::new(src);
    T::decode(&mut cursor)
}

pub fn decode_cursor<'de, T>(src: &mut ReadCursor<'de>) -> PduResult<T>
where
    T: Decode<'de>,
{
    T::decode(src)
}

/// Similar to [`Decode`] but unconditionally returns an owned type.
pub trait DecodeOwned: Sized {
    fn decode_owned(src: &mut ReadCursor<'_>) -> PduResult<Self>;
}

pub fn decode_owned<T: DecodeOwned>(src: &[u8]) -> PduResult<T> {
    let mut cursor = ReadCursor::new(src);
    T::decode_owned(&mut cursor)
}

pub fn decode_owned_cursor<T: DecodeOwned>(src: &mut ReadCursor<'_>) -> PduResult<T> {
    T::decode_owned(src)
}
