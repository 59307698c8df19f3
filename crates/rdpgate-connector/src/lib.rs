//! Connection negotiation for the client-facing side of the proxy: security
//! protocol selection, MCS connect and channel join, secure settings
//! exchange and the licensing sub-protocol.
//!
//! The state machines never perform I/O. The caller accumulates the number
//! of bytes advertised by [`Sequence::next_pdu_hint`], hands them to
//! [`Sequence::step`] and sends back whatever the sequence wrote into the
//! output buffer.

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

pub mod license;
pub mod negotiation;

use core::any::Any;
use core::fmt;
use std::borrow::Cow;
use std::num::NonZeroUsize;
use std::time::Duration;

use rdpgate_core::{decode, encode_vec, Decode, Encode, PduError, WriteBuf};
use rdpgate_pdu::gcc::{ChannelName, EncryptionLevel, EncryptionMethod, KeyboardType};
use rdpgate_pdu::nego::SecurityProtocol;
use rdpgate_pdu::rdp::client_info::Credentials;
use rdpgate_pdu::rdp::redirection::ServerRedirection;
use rdpgate_pdu::{mcs, x224, PduHint};
use rdpgate_svc::ChannelAuthorizer;

pub use crate::license::{LicenseStore, NoopLicenseStore};
pub use crate::negotiation::{ClientConnector, ClientConnectorState};

pub type ConnectorResult<T> = Result<T, ConnectorError>;

pub type ConnectorError = rdpgate_core::Error<ConnectorErrorKind>;

#[derive(Debug)]
#[non_exhaustive]
pub enum ConnectorErrorKind {
    Pdu(PduError),
    AccessDenied,
    Timeout,
    Redirect(ServerRedirect),
    General,
    Reason(String),
    Custom,
}

impl fmt::Display for ConnectorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorErrorKind::Pdu(_) => write!(f, "PDU error"),
            ConnectorErrorKind::AccessDenied => write!(f, "access denied"),
            ConnectorErrorKind::Timeout => write!(f, "negotiation deadline exceeded"),
            ConnectorErrorKind::Redirect(_) => write!(f, "server redirection"),
            ConnectorErrorKind::General => write!(f, "general error"),
            ConnectorErrorKind::Reason(description) => write!(f, "{description}"),
            ConnectorErrorKind::Custom => write!(f, "custom error"),
        }
    }
}

impl std::error::Error for ConnectorErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            ConnectorErrorKind::Pdu(e) => Some(e),
            _ => None,
        }
    }
}

pub trait ConnectorErrorExt {
    fn pdu(error: PduError) -> Self;
    fn general(context: &'static str) -> Self;
    fn reason(context: &'static str, reason: impl Into<String>) -> Self;
    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
    fn timeout(context: &'static str) -> Self;
    fn access_denied(context: &'static str) -> Self;
    fn redirect(context: &'static str, redirect: ServerRedirect) -> Self;
}

impl ConnectorErrorExt for ConnectorError {
    fn pdu(error: PduError) -> Self {
        Self::new("invalid payload", ConnectorErrorKind::Pdu(error))
    }

    fn general(context: &'static str) -> Self {
        Self::new(context, ConnectorErrorKind::General)
    }

    fn reason(context: &'static str, reason: impl Into<String>) -> Self {
        Self::new(context, ConnectorErrorKind::Reason(reason.into()))
    }

    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, ConnectorErrorKind::Custom).with_source(e)
    }

    fn timeout(context: &'static str) -> Self {
        Self::new(context, ConnectorErrorKind::Timeout)
    }

    fn access_denied(context: &'static str) -> Self {
        Self::new(context, ConnectorErrorKind::AccessDenied)
    }

    fn redirect(context: &'static str, redirect: ServerRedirect) -> Self {
        Self::new(context, ConnectorErrorKind::Redirect(redirect))
    }
}

pub trait ConnectorResultExt {
    #[must_use]
    fn with_context(self, context: &'static str) -> Self;
    #[must_use]
    fn with_source<E>(self, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl<T> ConnectorResultExt for ConnectorResult<T> {
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

/// Instruction carried by a server redirection unwind: reconnect to the
/// given target with the carried-over credentials and routing cookie.
///
/// This is surfaced through [`ConnectorErrorKind::Redirect`] so it aborts
/// the whole negotiation, but it is not a failure of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRedirect {
    pub session_id: u32,
    pub target: Option<String>,
    pub cookie: Option<Vec<u8>>,
    pub username: Option<String>,
    pub domain: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl From<ServerRedirection> for ServerRedirect {
    fn from(pdu: ServerRedirection) -> Self {
        Self {
            session_id: pdu.session_id,
            target: pdu.target().map(str::to_owned),
            cookie: pdu.load_balance_info.clone(),
            username: pdu.username,
            domain: pdu.domain,
            password: pdu.password,
        }
    }
}

/// Answer of the external TLS certificate checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStatus {
    Valid,
    Invalid,
    /// The answer is not available yet; the connector parks in
    /// `WaitCertCb` until [`ClientConnector::certificate_answer`] delivers
    /// the final verdict.
    Wait,
}

/// External validator for the server TLS certificate.
///
/// Consulted once per connection, after the caller completed the TLS
/// upgrade, and only when the server actually presented a certificate.
pub trait CertificateChecker: Send + fmt::Debug {
    fn check_certificate(&mut self, cert_der: &[u8]) -> ConnectorResult<CertStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesktopSize {
    pub width: u16,
    pub height: u16,
}

/// Everything the connector needs to know about the client identity and
/// the session policy. Built by the caller; no file parsing happens here.
#[derive(Debug, Clone)]
pub struct Config {
    pub desktop_size: DesktopSize,
    pub credentials: Credentials,
    pub client_build: u32,
    pub client_name: String,
    pub keyboard_type: KeyboardType,
    pub keyboard_subtype: u32,
    pub keyboard_functional_keys_count: u32,
    pub keyboard_layout: u32,
    pub ime_file_name: String,
    pub dig_product_id: String,
    pub client_dir: String,
    pub hardware_id: [u32; 4],
    pub autologon: bool,
    /// Security protocols the client is willing to use.
    pub security_protocol: SecurityProtocol,
    /// Static virtual channels to request; filtered through
    /// `channel_policy` before being put on the wire.
    pub static_channels: Vec<ChannelName>,
    pub channel_policy: ChannelAuthorizer,
    /// Bound on the total negotiation duration, checked on every step.
    pub negotiation_timeout: Option<Duration>,
}

/// Everything the session layer needs once the handshake is over.
#[derive(Debug, Clone)]
pub struct NegotiationResult {
    pub desktop_size: DesktopSize,
    pub rdp5_in_use: bool,
    pub io_channel_id: u16,
    pub user_channel_id: u16,
    /// Joined static channels, wire id to name.
    pub static_channels: Vec<(u16, ChannelName)>,
    pub encryption_method: EncryptionMethod,
    pub encryption_level: EncryptionLevel,
    pub selected_protocol: SecurityProtocol,
}

pub trait State: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    fn is_terminal(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

rdpgate_core::assert_obj_safe!(State);

impl State for () {
    fn name(&self) -> &'static str {
        "()"
    }

    fn is_terminal(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Amount of bytes written into the output buffer by a sequence step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Written {
    Nothing,
    Size(NonZeroUsize),
}

impl Written {
    pub fn from_size(value: usize) -> ConnectorResult<Self> {
        NonZeroUsize::new(value)
            .map(Self::Size)
            .ok_or_else(|| ConnectorError::general("invalid written length (0)"))
    }

    pub fn is_nothing(self) -> bool {
        matches!(self, Self::Nothing)
    }

    pub fn size(self) -> Option<usize> {
        if let Self::Size(size) = self {
            Some(size.get())
        } else {
            None
        }
    }
}

pub trait Sequence: Send {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint>;

    fn state(&self) -> &dyn State;

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written>;

    fn step_no_input(&mut self, output: &mut WriteBuf) -> ConnectorResult<Written> {
        self.step(&[], output)
    }
}

rdpgate_core::assert_obj_safe!(Sequence);

/// Encodes `x224_msg` into an X.224 Data TPDU and appends it to `buf`.
pub fn encode_x224_packet<T>(x224_msg: &T, buf: &mut WriteBuf) -> ConnectorResult<usize>
where
    T: Encode,
{
    let x224_msg_buf = encode_vec(x224_msg).map_err(ConnectorError::pdu)?;

    let pdu = x224::X224(x224::X224Data {
        data: Cow::Owned(x224_msg_buf),
    });

    let written = rdpgate_core::encode_buf(&pdu, buf).map_err(ConnectorError::pdu)?;

    Ok(written)
}

/// Decodes the payload of an X.224 Data TPDU.
pub fn decode_x224_packet<T>(src: &[u8]) -> ConnectorResult<T>
where
    T: for<'a> Decode<'a>,
{
    let x224_payload = decode::<x224::X224<x224::X224Data<'_>>>(src)
        .map_err(ConnectorError::pdu)?
        .0;

    let pdu = decode(x224_payload.data.as_ref()).map_err(ConnectorError::pdu)?;

    Ok(pdu)
}

/// Encodes `user_msg` into an MCS Send Data Request and appends it to `buf`.
pub fn encode_send_data_request<T>(
    initiator_id: u16,
    channel_id: u16,
    user_msg: &T,
    buf: &mut WriteBuf,
) -> ConnectorResult<usize>
where
    T: Encode,
{
    let user_data = encode_vec(user_msg).map_err(ConnectorError::pdu)?;

    let pdu = x224::X224(mcs::SendDataRequest {
        initiator_id,
        channel_id,
        user_data: Cow::Owned(user_data),
    });

    let written = rdpgate_core::encode_buf(&pdu, buf).map_err(ConnectorError::pdu)?;

    Ok(written)
}

#[derive(Debug, Clone, Copy)]
pub struct SendDataIndicationCtx<'a> {
    pub initiator_id: u16,
    pub channel_id: u16,
    pub user_data: &'a [u8],
}

impl<'a> SendDataIndicationCtx<'a> {
    pub fn decode_user_data<T>(&self) -> ConnectorResult<T>
    where
        T: Decode<'a>,
    {
        decode(self.user_data).map_err(ConnectorError::pdu)
    }
}

/// Decodes an MCS Send Data Indication, turning a disconnect ultimatum into
/// a reasoned error.
pub fn decode_send_data_indication(src: &[u8]) -> ConnectorResult<SendDataIndicationCtx<'_>> {
    use rdpgate_pdu::mcs::McsMessage;

    let mcs_msg = decode::<x224::X224<McsMessage<'_>>>(src).map_err(ConnectorError::pdu)?.0;

    match mcs_msg {
        McsMessage::SendDataIndication(msg) => {
            let Cow::Borrowed(user_data) = msg.user_data else {
                unreachable!()
            };

            Ok(SendDataIndicationCtx {
                initiator_id: msg.initiator_id,
                channel_id: msg.channel_id,
                user_data,
            })
        }
        McsMessage::DisconnectProviderUltimatum(msg) => Err(reason_err!(
            "decode_send_data_indication",
            "received disconnect provider ultimatum: {}",
            msg.reason
        )),
        unexpected => Err(reason_err!(
            "decode_send_data_indication",
            "unexpected MCS message: {}",
            rdpgate_pdu::mcs::McsPdu::name(&unexpected)
        )),
    }
}
