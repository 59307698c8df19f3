//! Post-negotiation session engine: PDU framing, static virtual channel
//! routing with deep-inspection filters, and fast-path graphics decoding
//! including the RemoteFX tile codec.
//!
//! The engine never performs I/O. Inbound bytes are handed to the
//! [`FramingBuffer`] or the routers/processors directly; everything the
//! engine wants sent is returned as effect values or written into a
//! caller-provided buffer.

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

pub mod fast_path;
pub mod filters;
pub mod framing;
pub mod image;
pub mod orders;
pub mod rfx;
pub mod router;

use core::fmt;

pub use crate::fast_path::{FastPathProcessor, GraphicsUpdate, UpdateSink};
pub use crate::framing::{Frame, FramingBuffer};
pub use crate::image::Framebuffer;
pub use crate::router::VirtualChannelRouter;

pub type SessionResult<T> = Result<T, SessionError>;

pub type SessionError = rdpgate_core::Error<SessionErrorKind>;

#[non_exhaustive]
#[derive(Debug)]
pub enum SessionErrorKind {
    Pdu(rdpgate_core::PduError),
    Reason(String),
    General,
    Custom,
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionErrorKind::Pdu(_) => write!(f, "PDU error"),
            SessionErrorKind::Reason(description) => write!(f, "reason: {description}"),
            SessionErrorKind::General => write!(f, "general error"),
            SessionErrorKind::Custom => write!(f, "custom error"),
        }
    }
}

impl std::error::Error for SessionErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            SessionErrorKind::Pdu(e) => Some(e),
            _ => None,
        }
    }
}

pub trait SessionErrorExt {
    fn pdu(error: rdpgate_core::PduError) -> Self;
    fn general(context: &'static str) -> Self;
    fn reason(context: &'static str, reason: impl Into<String>) -> Self;
    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl SessionErrorExt for SessionError {
    fn pdu(error: rdpgate_core::PduError) -> Self {
        Self::new("invalid payload", SessionErrorKind::Pdu(error))
    }

    fn general(context: &'static str) -> Self {
        Self::new(context, SessionErrorKind::General)
    }

    fn reason(context: &'static str, reason: impl Into<String>) -> Self {
        Self::new(context, SessionErrorKind::Reason(reason.into()))
    }

    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, SessionErrorKind::Custom).with_source(e)
    }
}

pub trait SessionResultExt {
    #[must_use]
    fn with_context(self, context: &'static str) -> Self;
    #[must_use]
    fn with_source<E>(self, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl<T> SessionResultExt for SessionResult<T> {
    fn with_context(self, context: &'static str) -> Self {
        self.map_err(|mut e| {
            e.context = context;
            e
        })
    }

    fn with_source<E>(self, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        self.map_err(|e| e.with_source(source))
    }
}
