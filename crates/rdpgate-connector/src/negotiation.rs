//! Client-side connection negotiation, from the X.224 connection request up
//! to the end of the licensing sub-protocol.
//!
//! The TLS upgrade itself happens outside of this module. After the server
//! selects an enhanced security protocol, the caller completes the handshake
//! and submits the server certificate through
//! [`ClientConnector::attach_server_certificate`] before stepping further.

use std::collections::HashSet;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use rdpgate_core::{decode, encode_buf, WriteBuf};
use rdpgate_pdu::gcc::{ChannelName, EncryptionLevel, EncryptionMethod, RdpVersion};
use rdpgate_pdu::{gcc, mcs, nego, rdp, x224, PduHint};

use crate::license::{LicenseExchangeSequence, LicenseStore};
use crate::{
    decode_x224_packet, encode_send_data_request, encode_x224_packet, CertStatus, CertificateChecker, Config,
    ConnectorError, ConnectorErrorExt as _, ConnectorResult, NegotiationResult, Sequence, State, Written,
};

/// Settings gathered during the MCS connect phase and carried until the
/// negotiation result can be assembled.
#[derive(Debug, Clone)]
pub struct GatheredSettings {
    pub selected_protocol: nego::SecurityProtocol,
    pub rdp5_in_use: bool,
    pub encryption_method: EncryptionMethod,
    pub encryption_level: EncryptionLevel,
    pub io_channel_id: u16,
    pub static_channels: Vec<(u16, ChannelName)>,
}

#[derive(Default, Debug)]
#[non_exhaustive]
pub enum ClientConnectorState {
    #[default]
    Consumed,

    Initiate,
    CoreNegotiation {
        requested_protocol: nego::SecurityProtocol,
    },
    BasicSettingsExchange {
        selected_protocol: nego::SecurityProtocol,
        connect_initial: Option<mcs::ConnectInitial>,
    },
    ChannelConnectionAttachUser {
        settings: GatheredSettings,
    },
    ChannelJoinConfirm {
        settings: GatheredSettings,
        user_channel_id: Option<u16>,
        pending: HashSet<u16>,
    },
    LicenseExchange {
        settings: GatheredSettings,
        user_channel_id: u16,
        sent_client_info: bool,
        license_exchange: LicenseExchangeSequence,
    },
    /// Parked until the external certificate checker delivers its verdict
    /// through [`ClientConnector::certificate_answer`].
    WaitCertCb {
        resume: Box<ClientConnectorState>,
    },
    Terminated {
        result: NegotiationResult,
    },
}

impl State for ClientConnectorState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::Initiate => "Initiate",
            Self::CoreNegotiation { .. } => "CoreNegotiation",
            Self::BasicSettingsExchange { .. } => "BasicSettingsExchange",
            Self::ChannelConnectionAttachUser { .. } => "ChannelConnectionAttachUser",
            Self::ChannelJoinConfirm { .. } => "ChannelJoinConfirm",
            Self::LicenseExchange { .. } => "LicenseExchange",
            Self::WaitCertCb { .. } => "WaitCertCb",
            Self::Terminated { .. } => "Terminated",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

#[derive(Debug)]
pub struct ClientConnector {
    pub config: Config,
    pub state: ClientConnectorState,
    server_addr: Option<SocketAddr>,
    cert_checker: Box<dyn CertificateChecker>,
    license_store: Arc<dyn LicenseStore>,
    deadline: Option<Instant>,
    pending_cert_validation: bool,
}

impl ClientConnector {
    pub fn new(config: Config, cert_checker: Box<dyn CertificateChecker>, license_store: Arc<dyn LicenseStore>) -> Self {
        let deadline = config.negotiation_timeout.map(|timeout| Instant::now() + timeout);

        Self {
            config,
            state: ClientConnectorState::Initiate,
            server_addr: None,
            cert_checker,
            license_store,
            deadline,
            pending_cert_validation: false,
        }
    }

    /// Must be set to the actual target server address before the secure
    /// settings exchange.
    #[must_use]
    pub fn with_server_addr(mut self, addr: SocketAddr) -> Self {
        self.server_addr = Some(addr);
        self
    }

    pub fn attach_server_addr(&mut self, addr: SocketAddr) {
        self.server_addr = Some(addr);
    }

    /// Returns true when the caller is expected to complete the TLS upgrade
    /// and submit the server certificate before stepping further.
    pub fn should_submit_server_certificate(&self) -> bool {
        self.pending_cert_validation
    }

    /// Submits the server TLS certificate for validation.
    ///
    /// `None` means the transport presented no certificate (anonymous TLS on
    /// an inner leg); the checker is not consulted in that case.
    pub fn attach_server_certificate(&mut self, cert_der: Option<&[u8]>) -> ConnectorResult<()> {
        if !self.pending_cert_validation {
            return Err(general_err!("no certificate validation is pending"));
        }

        let Some(cert_der) = cert_der else {
            debug!("No server certificate presented, skipping validation");
            self.pending_cert_validation = false;
            return Ok(());
        };

        match self.cert_checker.check_certificate(cert_der)? {
            CertStatus::Valid => {
                self.pending_cert_validation = false;
                Ok(())
            }
            CertStatus::Invalid => Err(ConnectorError::access_denied("certificate validation")),
            CertStatus::Wait => {
                self.state = ClientConnectorState::WaitCertCb {
                    resume: Box::new(mem::take(&mut self.state)),
                };
                Ok(())
            }
        }
    }

    /// Delivers the deferred verdict of the certificate checker.
    pub fn certificate_answer(&mut self, status: CertStatus) -> ConnectorResult<()> {
        let ClientConnectorState::WaitCertCb { resume } = mem::take(&mut self.state) else {
            return Err(general_err!("no deferred certificate validation is pending"));
        };

        self.state = *resume;

        match status {
            CertStatus::Valid => {
                self.pending_cert_validation = false;
                Ok(())
            }
            CertStatus::Invalid => Err(ConnectorError::access_denied("certificate validation")),
            CertStatus::Wait => Err(general_err!("certificate checker answered with Wait again")),
        }
    }

    /// Consumes the connector once the sequence reached its terminal state.
    pub fn negotiation_result(self) -> ConnectorResult<NegotiationResult> {
        match self.state {
            ClientConnectorState::Terminated { result } => Ok(result),
            _ => Err(general_err!("negotiation sequence is not terminated")),
        }
    }
}

impl Sequence for ClientConnector {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint> {
        if self.pending_cert_validation {
            return None;
        }

        match &self.state {
            ClientConnectorState::Consumed => None,
            ClientConnectorState::Initiate => None,
            ClientConnectorState::CoreNegotiation { .. } => Some(&rdpgate_pdu::X224_HINT),
            ClientConnectorState::BasicSettingsExchange { connect_initial, .. } => {
                connect_initial.as_ref().map(|_| &rdpgate_pdu::X224_HINT as &dyn PduHint)
            }
            ClientConnectorState::ChannelConnectionAttachUser { .. } => None,
            ClientConnectorState::ChannelJoinConfirm { .. } => Some(&rdpgate_pdu::X224_HINT),
            ClientConnectorState::LicenseExchange {
                sent_client_info,
                license_exchange,
                ..
            } => {
                if *sent_client_info {
                    license_exchange.next_pdu_hint()
                } else {
                    None
                }
            }
            ClientConnectorState::WaitCertCb { .. } => None,
            ClientConnectorState::Terminated { .. } => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(timeout_err!("Negotiation"));
            }
        }

        if self.pending_cert_validation {
            return Err(general_err!("certificate validation is pending"));
        }

        let (written, next_state) = match mem::take(&mut self.state) {
            // Invalid state
            ClientConnectorState::Consumed => {
                return Err(general_err!("connector sequence state is consumed (this is a bug)"))
            }

            ClientConnectorState::WaitCertCb { .. } => {
                return Err(general_err!("deferred certificate validation is pending"))
            }

            //== Connection Initiation ==//
            // Advertise supported security protocols and the routing cookie.
            ClientConnectorState::Initiate => {
                debug!("Connection Initiation");

                let requested_protocol = self.config.security_protocol;

                if requested_protocol == nego::SecurityProtocol::RDP {
                    return Err(reason_err!("Initiate", "standard RDP security is not supported"));
                }

                let connection_request = nego::ConnectionRequest {
                    nego_data: Some(nego::NegoRequestData::cookie(
                        self.config.credentials.username.clone(),
                    )),
                    flags: nego::RequestFlags::empty(),
                    protocol: requested_protocol,
                };

                debug!(message = ?connection_request, "Send");

                let written =
                    encode_buf(&x224::X224(connection_request), output).map_err(ConnectorError::pdu)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::CoreNegotiation { requested_protocol },
                )
            }
            ClientConnectorState::CoreNegotiation { requested_protocol } => {
                let connection_confirm = decode::<x224::X224<nego::ConnectionConfirm>>(input)
                    .map_err(ConnectorError::pdu)?
                    .0;

                debug!(message = ?connection_confirm, "Received");

                let (flags, selected_protocol) = match connection_confirm {
                    nego::ConnectionConfirm::Response { flags, protocol } => (flags, protocol),
                    nego::ConnectionConfirm::Failure { code } => {
                        error!(?code, "Received connection failure code");
                        return Err(reason_err!("CoreNegotiation", "{code:?}"));
                    }
                };

                info!(?selected_protocol, ?flags, "Server confirmed connection");

                if selected_protocol != nego::SecurityProtocol::RDP
                    && !selected_protocol.intersects(requested_protocol)
                {
                    return Err(reason_err!(
                        "CoreNegotiation",
                        "client advertised {requested_protocol:?}, but server selected {selected_protocol:?}",
                    ));
                }

                if selected_protocol.intersects(nego::SecurityProtocol::SSL | nego::SecurityProtocol::HYBRID) {
                    self.pending_cert_validation = true;
                }

                (
                    Written::Nothing,
                    ClientConnectorState::BasicSettingsExchange {
                        selected_protocol,
                        connect_initial: None,
                    },
                )
            }

            //== Basic Settings Exchange ==//
            // Exchange the GCC conference blocks: core, security and network data.
            ClientConnectorState::BasicSettingsExchange {
                selected_protocol,
                connect_initial: None,
            } => {
                debug!("Basic Settings Exchange");

                let client_gcc_blocks = create_gcc_blocks(&self.config, selected_protocol);

                let connect_initial = mcs::ConnectInitial::with_gcc_blocks(client_gcc_blocks);

                debug!(message = ?connect_initial, "Send");

                let written = encode_x224_packet(&connect_initial, output)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::BasicSettingsExchange {
                        selected_protocol,
                        connect_initial: Some(connect_initial),
                    },
                )
            }
            ClientConnectorState::BasicSettingsExchange {
                selected_protocol,
                connect_initial: Some(connect_initial),
            } => {
                let connect_response = decode_x224_packet::<mcs::ConnectResponse>(input)?;

                debug!(message = ?connect_response, "Received");

                let server_gcc_blocks = connect_response.conference_create_response.gcc_blocks;

                if !server_gcc_blocks.security.encryption_method.is_empty() {
                    return Err(general_err!("cannot satisfy server security settings"));
                }

                let rdp5_in_use = server_gcc_blocks.core.version >= RdpVersion::V5_PLUS;

                let static_channel_ids = server_gcc_blocks.network.channel_ids;
                let io_channel_id = server_gcc_blocks.network.io_channel;

                debug!(?static_channel_ids, io_channel_id);

                let requested_channels = connect_initial
                    .conference_create_request
                    .gcc_blocks
                    .network
                    .map(|network| network.channels)
                    .unwrap_or_default();

                if requested_channels.len() != static_channel_ids.len() {
                    warn!(
                        requested = requested_channels.len(),
                        joined = static_channel_ids.len(),
                        "Server did not allocate every requested static channel"
                    );
                }

                let static_channels = static_channel_ids
                    .iter()
                    .copied()
                    .zip(requested_channels.into_iter().map(|def| def.name))
                    .collect();

                (
                    Written::Nothing,
                    ClientConnectorState::ChannelConnectionAttachUser {
                        settings: GatheredSettings {
                            selected_protocol,
                            rdp5_in_use,
                            encryption_method: server_gcc_blocks.security.encryption_method,
                            encryption_level: server_gcc_blocks.security.encryption_level,
                            io_channel_id,
                            static_channels,
                        },
                    },
                )
            }

            //== Channel Connection ==//
            // Erect the MCS domain and attach the user, in a single batch.
            ClientConnectorState::ChannelConnectionAttachUser { settings } => {
                debug!("Channel Connection");

                let erect_domain = mcs::ErectDomainPdu {
                    sub_height: 0,
                    sub_interval: 0,
                };

                let mut written = encode_buf(&x224::X224(erect_domain), output).map_err(ConnectorError::pdu)?;
                written += encode_buf(&x224::X224(mcs::AttachUserRequest), output).map_err(ConnectorError::pdu)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::ChannelJoinConfirm {
                        settings,
                        user_channel_id: None,
                        pending: HashSet::new(),
                    },
                )
            }
            ClientConnectorState::ChannelJoinConfirm {
                settings,
                user_channel_id: None,
                pending: _,
            } => {
                let attach_user_confirm = decode::<x224::X224<mcs::AttachUserConfirm>>(input)
                    .map_err(ConnectorError::pdu)?
                    .0;

                debug!(message = ?attach_user_confirm, "Received");

                if attach_user_confirm.result != 0 {
                    return Err(reason_err!(
                        "ChannelJoinConfirm",
                        "server rejected the attach user request (result: {})",
                        attach_user_confirm.result
                    ));
                }

                let user_channel_id = attach_user_confirm.initiator_id;

                // All join requests are batched; confirms may come back in any order.
                let mut pending = HashSet::new();
                pending.insert(user_channel_id);
                pending.insert(settings.io_channel_id);
                pending.extend(settings.static_channels.iter().map(|(id, _)| *id));

                let mut written = 0;

                for channel_id in pending.iter().copied() {
                    let channel_join_request = mcs::ChannelJoinRequest {
                        initiator_id: user_channel_id,
                        channel_id,
                    };

                    debug!(message = ?channel_join_request, "Send");

                    written +=
                        encode_buf(&x224::X224(channel_join_request), output).map_err(ConnectorError::pdu)?;
                }

                (
                    Written::from_size(written)?,
                    ClientConnectorState::ChannelJoinConfirm {
                        settings,
                        user_channel_id: Some(user_channel_id),
                        pending,
                    },
                )
            }
            ClientConnectorState::ChannelJoinConfirm {
                settings,
                user_channel_id: Some(user_channel_id),
                mut pending,
            } => {
                let channel_join_confirm = decode::<x224::X224<mcs::ChannelJoinConfirm>>(input)
                    .map_err(ConnectorError::pdu)?
                    .0;

                debug!(message = ?channel_join_confirm, "Received");

                if channel_join_confirm.initiator_id != user_channel_id {
                    warn!(
                        user_channel_id,
                        channel_join_confirm.initiator_id, "Inconsistent initiator ID for channel join confirm"
                    );
                }

                if !pending.remove(&channel_join_confirm.requested_channel_id) {
                    return Err(reason_err!(
                        "ChannelJoinConfirm",
                        "unexpected requested_channel_id in MCS Channel Join Confirm: {}",
                        channel_join_confirm.requested_channel_id
                    ));
                }

                if channel_join_confirm.requested_channel_id != channel_join_confirm.channel_id {
                    // Strictly speaking, the server is allowed to assign a different ID, but
                    // auditing the channel table becomes ambiguous if the mapping diverges.
                    return Err(reason_err!(
                        "ChannelJoinConfirm",
                        "server joined channel {} instead of the requested {}",
                        channel_join_confirm.channel_id,
                        channel_join_confirm.requested_channel_id
                    ));
                }

                let next_state = if pending.is_empty() {
                    ClientConnectorState::LicenseExchange {
                        user_channel_id,
                        sent_client_info: false,
                        license_exchange: LicenseExchangeSequence::new(
                            settings.io_channel_id,
                            self.config.credentials.username.clone(),
                            self.config.credentials.domain.clone(),
                            self.config.hardware_id,
                            Arc::clone(&self.license_store),
                        ),
                        settings,
                    }
                } else {
                    ClientConnectorState::ChannelJoinConfirm {
                        settings,
                        user_channel_id: Some(user_channel_id),
                        pending,
                    }
                };

                (Written::Nothing, next_state)
            }

            //== Secure Settings Exchange and Licensing ==//
            // Send the Client Info PDU, then run the licensing sub-protocol.
            ClientConnectorState::LicenseExchange {
                settings,
                user_channel_id,
                sent_client_info: false,
                license_exchange,
            } => {
                debug!("Secure Settings Exchange");

                let routing_addr = self
                    .server_addr
                    .as_ref()
                    .ok_or_else(|| general_err!("server address is missing"))?;

                let client_info = create_client_info_pdu(&self.config, routing_addr);

                debug!(message = ?client_info, "Send");

                let written =
                    encode_send_data_request(user_channel_id, settings.io_channel_id, &client_info, output)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::LicenseExchange {
                        settings,
                        user_channel_id,
                        sent_client_info: true,
                        license_exchange,
                    },
                )
            }
            ClientConnectorState::LicenseExchange {
                settings,
                user_channel_id,
                sent_client_info: true,
                mut license_exchange,
            } => {
                debug!("Licensing Exchange");

                let written = license_exchange.step(input, output)?;

                let next_state = if license_exchange.state.is_terminal() {
                    ClientConnectorState::Terminated {
                        result: NegotiationResult {
                            desktop_size: self.config.desktop_size,
                            rdp5_in_use: settings.rdp5_in_use,
                            io_channel_id: settings.io_channel_id,
                            user_channel_id,
                            static_channels: settings.static_channels,
                            encryption_method: settings.encryption_method,
                            encryption_level: settings.encryption_level,
                            selected_protocol: settings.selected_protocol,
                        },
                    }
                } else {
                    ClientConnectorState::LicenseExchange {
                        settings,
                        user_channel_id,
                        sent_client_info: true,
                        license_exchange,
                    }
                };

                (written, next_state)
            }

            //== Terminated ==//
            // The connector job is done; the session layer takes over.
            ClientConnectorState::Terminated { .. } => return Err(general_err!("negotiation already terminated")),
        };

        self.state = next_state;

        Ok(written)
    }
}

fn create_gcc_blocks(config: &Config, selected_protocol: nego::SecurityProtocol) -> gcc::ClientGccBlocks {
    use rdpgate_pdu::gcc::*;

    let channels: Vec<ChannelDef> = config
        .static_channels
        .iter()
        .filter(|name| {
            let authorized = name
                .as_str()
                .is_some_and(|name| config.channel_policy.is_authorized(name));
            if !authorized {
                warn!(channel = name.as_str(), "Static channel denied by policy");
            }
            authorized
        })
        .map(|name| ChannelDef {
            name: name.clone(),
            options: ChannelOptions::INITIALIZED | ChannelOptions::COMPRESS_RDP,
        })
        .collect();

    ClientGccBlocks {
        core: ClientCoreData {
            version: RdpVersion::V5_PLUS,
            desktop_width: config.desktop_size.width,
            desktop_height: config.desktop_size.height,
            color_depth: ColorDepth::Bpp8, // ignored because we use the optional core data below
            sec_access_sequence: SecureAccessSequence::Del,
            keyboard_layout: config.keyboard_layout,
            client_build: config.client_build,
            client_name: config.client_name.clone(),
            keyboard_type: config.keyboard_type,
            keyboard_subtype: config.keyboard_subtype,
            keyboard_functional_keys_count: config.keyboard_functional_keys_count,
            ime_file_name: config.ime_file_name.clone(),
            optional_data: ClientCoreOptionalData {
                post_beta2_color_depth: Some(ColorDepth::Bpp8), // ignored because we set high_color_depth
                client_product_id: Some(1),
                serial_number: Some(0),
                high_color_depth: Some(HighColorDepth::Bpp24),
                supported_color_depths: Some(SupportedColorDepths::BPP32 | SupportedColorDepths::BPP16),
                early_capability_flags: Some(
                    ClientEarlyCapabilityFlags::VALID_CONNECTION_TYPE | ClientEarlyCapabilityFlags::SUPPORT_ERR_INFO_PDU,
                ),
                dig_product_id: Some(config.dig_product_id.clone()),
                connection_type: Some(ConnectionType::Lan),
                server_selected_protocol: Some(selected_protocol),
            },
        },
        security: ClientSecurityData::no_security(),
        network: if channels.is_empty() {
            None
        } else {
            Some(ClientNetworkData { channels })
        },
    }
}

fn create_client_info_pdu(config: &Config, routing_addr: &SocketAddr) -> rdp::ClientInfoPdu {
    use rdpgate_pdu::rdp::client_info::{
        AddressFamily, ClientInfo, ClientInfoFlags, CompressionType, ExtendedClientInfo, ExtendedClientOptionalInfo,
    };
    use rdpgate_pdu::rdp::headers::{BasicSecurityHeader, BasicSecurityHeaderFlags};

    let security_header = BasicSecurityHeader {
        flags: BasicSecurityHeaderFlags::INFO_PKT,
    };

    // Default flags for all sessions
    let mut flags = ClientInfoFlags::UNICODE
        | ClientInfoFlags::DISABLE_CTRL_ALT_DEL
        | ClientInfoFlags::LOGON_NOTIFY
        | ClientInfoFlags::LOGON_ERRORS
        | ClientInfoFlags::MOUSE
        | ClientInfoFlags::MOUSE_HAS_WHEEL
        | ClientInfoFlags::MAXIMIZE_SHELL
        | ClientInfoFlags::ENABLE_WINDOWS_KEY;

    if config.autologon {
        flags |= ClientInfoFlags::AUTOLOGON;
    }

    let client_info = ClientInfo {
        credentials: config.credentials.clone(),
        code_page: 0, // ignored if the keyboardLayout field of the Client Core Data is set to zero
        flags,
        compression_type: CompressionType::K8, // ignored if ClientInfoFlags::COMPRESSION is not set
        alternate_shell: String::new(),
        work_dir: String::new(),
        extra_info: ExtendedClientInfo {
            address_family: match routing_addr {
                SocketAddr::V4(_) => AddressFamily::INet,
                SocketAddr::V6(_) => AddressFamily::INet6,
            },
            address: routing_addr.ip().to_string(),
            dir: config.client_dir.clone(),
            optional_data: ExtendedClientOptionalInfo::default(),
        },
    };

    rdp::ClientInfoPdu {
        security_header,
        client_info,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use rdpgate_core::encode_vec;
    use rdpgate_pdu::rdp::client_info::Credentials;
    use rdpgate_svc::{ChannelAuthorizer, UnlistedPolicy};

    use super::*;
    use crate::{ConnectorErrorKind, DesktopSize, NoopLicenseStore};

    #[derive(Debug)]
    struct CountingChecker {
        calls: Arc<AtomicUsize>,
        verdict: CertStatus,
    }

    impl CertificateChecker for CountingChecker {
        fn check_certificate(&mut self, _cert_der: &[u8]) -> ConnectorResult<CertStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict)
        }
    }

    fn test_config() -> Config {
        Config {
            desktop_size: DesktopSize { width: 1280, height: 720 },
            credentials: Credentials {
                username: "alice".to_owned(),
                password: "hunter2".to_owned(),
                domain: None,
            },
            client_build: 18363,
            client_name: "GATEWAY-01".to_owned(),
            keyboard_type: rdpgate_pdu::gcc::KeyboardType::IbmEnhanced,
            keyboard_subtype: 0,
            keyboard_functional_keys_count: 12,
            keyboard_layout: 0,
            ime_file_name: String::new(),
            dig_product_id: String::new(),
            client_dir: "C:\\Windows\\System32\\mstscax.dll".to_owned(),
            hardware_id: [1, 2, 3, 4],
            autologon: false,
            security_protocol: nego::SecurityProtocol::SSL,
            static_channels: vec![ChannelName::from_utf8("cliprdr").unwrap()],
            channel_policy: ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted),
            negotiation_timeout: None,
        }
    }

    fn connector_with_checker(verdict: CertStatus, calls: &Arc<AtomicUsize>) -> ClientConnector {
        ClientConnector::new(
            test_config(),
            Box::new(CountingChecker {
                calls: Arc::clone(calls),
                verdict,
            }),
            Arc::new(NoopLicenseStore),
        )
    }

    fn drive_to_pending_cert(connector: &mut ClientConnector) {
        let mut output = WriteBuf::new();
        let written = connector.step_no_input(&mut output).unwrap();
        assert!(written.size().unwrap() > 0);
        assert_eq!(connector.state.name(), "CoreNegotiation");

        let confirm = encode_vec(&x224::X224(nego::ConnectionConfirm::Response {
            flags: nego::ResponseFlags::empty(),
            protocol: nego::SecurityProtocol::SSL,
        }))
        .unwrap();

        let mut output = WriteBuf::new();
        let written = connector.step(&confirm, &mut output).unwrap();
        assert!(written.is_nothing());
        assert!(connector.should_submit_server_certificate());
        assert_eq!(connector.state.name(), "BasicSettingsExchange");
    }

    #[test]
    fn consumed_state_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut connector = connector_with_checker(CertStatus::Valid, &calls);
        connector.state = ClientConnectorState::Consumed;

        let err = connector.step_no_input(&mut WriteBuf::new()).unwrap_err();
        assert!(matches!(err.kind(), ConnectorErrorKind::General));
    }

    #[test]
    fn initiate_writes_connection_request_with_cookie() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut connector = connector_with_checker(CertStatus::Valid, &calls);

        let mut output = WriteBuf::new();
        connector.step_no_input(&mut output).unwrap();

        let request = decode::<x224::X224<nego::ConnectionRequest>>(output.filled()).unwrap().0;
        assert_eq!(request.protocol, nego::SecurityProtocol::SSL);
        assert_eq!(
            request.nego_data,
            Some(nego::NegoRequestData::cookie("alice".to_owned()))
        );
    }

    #[test]
    fn connection_failure_is_reasoned() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut connector = connector_with_checker(CertStatus::Valid, &calls);
        connector.step_no_input(&mut WriteBuf::new()).unwrap();

        let failure = encode_vec(&x224::X224(nego::ConnectionConfirm::Failure {
            code: nego::FailureCode::SSL_NOT_ALLOWED_BY_SERVER,
        }))
        .unwrap();

        let err = connector.step(&failure, &mut WriteBuf::new()).unwrap_err();
        assert!(matches!(err.kind(), ConnectorErrorKind::Reason(_)));
    }

    #[test]
    fn stepping_with_pending_certificate_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut connector = connector_with_checker(CertStatus::Valid, &calls);
        drive_to_pending_cert(&mut connector);

        let err = connector.step_no_input(&mut WriteBuf::new()).unwrap_err();
        assert!(matches!(err.kind(), ConnectorErrorKind::General));
    }

    #[test]
    fn absent_certificate_skips_the_checker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut connector = connector_with_checker(CertStatus::Invalid, &calls);
        drive_to_pending_cert(&mut connector);

        connector.attach_server_certificate(None).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!connector.should_submit_server_certificate());
    }

    #[test]
    fn invalid_certificate_is_access_denied() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut connector = connector_with_checker(CertStatus::Invalid, &calls);
        drive_to_pending_cert(&mut connector);

        let err = connector.attach_server_certificate(Some(&[0x30, 0x82])).unwrap_err();
        assert!(matches!(err.kind(), ConnectorErrorKind::AccessDenied));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_verdict_parks_and_resumes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut connector = connector_with_checker(CertStatus::Wait, &calls);
        drive_to_pending_cert(&mut connector);

        connector.attach_server_certificate(Some(&[0x30, 0x82])).unwrap();
        assert_eq!(connector.state.name(), "WaitCertCb");
        assert!(connector.next_pdu_hint().is_none());

        connector.certificate_answer(CertStatus::Valid).unwrap();
        assert_eq!(connector.state.name(), "BasicSettingsExchange");
        assert!(!connector.should_submit_server_certificate());
    }

    #[test]
    fn deadline_is_enforced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = test_config();
        config.negotiation_timeout = Some(Duration::ZERO);

        let mut connector = ClientConnector::new(
            config,
            Box::new(CountingChecker {
                calls: Arc::clone(&calls),
                verdict: CertStatus::Valid,
            }),
            Arc::new(NoopLicenseStore),
        );

        let err = connector.step_no_input(&mut WriteBuf::new()).unwrap_err();
        assert!(matches!(err.kind(), ConnectorErrorKind::Timeout));
    }

    #[test]
    fn standard_rdp_security_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = test_config();
        config.security_protocol = nego::SecurityProtocol::RDP;

        let mut connector = ClientConnector::new(
            config,
            Box::new(CountingChecker {
                calls: Arc::clone(&calls),
                verdict: CertStatus::Valid,
            }),
            Arc::new(NoopLicenseStore),
        );

        let err = connector.step_no_input(&mut WriteBuf::new()).unwrap_err();
        assert!(matches!(err.kind(), ConnectorErrorKind::Reason(_)));
    }
}
