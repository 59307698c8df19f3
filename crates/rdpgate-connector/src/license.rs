//! Client licensing sequence (MS-RDPELE 3.1.5.3.1).
//!
//! A cached license found in the [`LicenseStore`] is replayed as a Client
//! License Info; otherwise a Client New License Request is sent and the
//! issued license is persisted through the same store. A server answering
//! with `STATUS_VALID_CLIENT` skips the exchange altogether.

use core::fmt;
use core::mem;
use std::sync::Arc;

use rand::RngCore as _;

use rdpgate_core::WriteBuf;
use rdpgate_pdu::license::{self, LicenseError, LicenseInformation, LicensePdu};
use rdpgate_pdu::rdp::headers::BasicSecurityHeaderFlags;
use rdpgate_pdu::rdp::redirection::ServerRedirection;
use rdpgate_pdu::PduHint;

use crate::{
    decode_send_data_indication, encode_send_data_request, ConnectorError, ConnectorErrorExt as _, ConnectorResult,
    ConnectorResultExt as _, Sequence, ServerRedirect, State, Written,
};

/// Synchronous store of issued licenses, keyed by
/// (version, scope, company name, product id).
pub trait LicenseStore: Sync + Send + fmt::Debug {
    /// Returns the cached license blob for `license_info`, if any.
    fn get_license(&self, license_info: LicenseInformation) -> ConnectorResult<Option<Vec<u8>>>;

    /// Persists a freshly issued license.
    fn put_license(&self, license_info: LicenseInformation) -> ConnectorResult<()>;
}

/// Store that caches nothing; every connection runs the full issuance.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLicenseStore;

impl LicenseStore for NoopLicenseStore {
    fn get_license(&self, _license_info: LicenseInformation) -> ConnectorResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn put_license(&self, _license_info: LicenseInformation) -> ConnectorResult<()> {
        Ok(())
    }
}

#[derive(Default, Debug)]
#[non_exhaustive]
pub enum LicenseExchangeState {
    #[default]
    Consumed,

    NewLicenseRequest,
    PlatformChallenge {
        encryption_data: license::LicenseEncryptionData,
    },
    UpgradeLicense {
        encryption_data: license::LicenseEncryptionData,
    },
    LicenseExchanged,
}

impl State for LicenseExchangeState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::NewLicenseRequest => "NewLicenseRequest",
            Self::PlatformChallenge { .. } => "PlatformChallenge",
            Self::UpgradeLicense { .. } => "UpgradeLicense",
            Self::LicenseExchanged => "LicenseExchanged",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::LicenseExchanged)
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

#[derive(Debug)]
pub struct LicenseExchangeSequence {
    pub state: LicenseExchangeState,
    pub io_channel_id: u16,
    pub username: String,
    pub domain: Option<String>,
    pub hardware_id: [u32; 4],
    pub license_store: Arc<dyn LicenseStore>,
}

impl LicenseExchangeSequence {
    pub fn new(
        io_channel_id: u16,
        username: String,
        domain: Option<String>,
        hardware_id: [u32; 4],
        license_store: Arc<dyn LicenseStore>,
    ) -> Self {
        Self {
            state: LicenseExchangeState::NewLicenseRequest,
            io_channel_id,
            username,
            domain,
            hardware_id,
            license_store,
        }
    }
}

impl Sequence for LicenseExchangeSequence {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint> {
        match self.state {
            LicenseExchangeState::Consumed => None,
            LicenseExchangeState::NewLicenseRequest => Some(&rdpgate_pdu::X224_HINT),
            LicenseExchangeState::PlatformChallenge { .. } => Some(&rdpgate_pdu::X224_HINT),
            LicenseExchangeState::UpgradeLicense { .. } => Some(&rdpgate_pdu::X224_HINT),
            LicenseExchangeState::LicenseExchanged => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written> {
        let (written, next_state) = match mem::take(&mut self.state) {
            LicenseExchangeState::Consumed => {
                return Err(general_err!("license exchange sequence state is consumed (this is a bug)"))
            }

            LicenseExchangeState::NewLicenseRequest => {
                let send_data_indication_ctx = decode_send_data_indication(input)?;

                check_server_redirection(send_data_indication_ctx.user_data)?;

                let license_pdu = send_data_indication_ctx
                    .decode_user_data::<LicensePdu>()
                    .with_context("decode during LicenseExchangeState::NewLicenseRequest")?;

                match license_pdu {
                    LicensePdu::ServerLicenseRequest(license_request) => {
                        let mut rng = rand::rng();
                        let mut client_random = [0u8; license::RANDOM_NUMBER_SIZE];
                        rng.fill_bytes(&mut client_random);

                        let mut premaster_secret = [0u8; license::PREMASTER_SECRET_SIZE];
                        rng.fill_bytes(&mut premaster_secret);

                        let cached_license = license_request
                            .scope_list
                            .iter()
                            .filter_map(|scope| {
                                self.license_store
                                    .get_license(LicenseInformation {
                                        version: license_request.product_info.version,
                                        scope: scope.0.clone(),
                                        company_name: license_request.product_info.company_name.clone(),
                                        product_id: license_request.product_info.product_id.clone(),
                                        license_info: vec![],
                                    })
                                    .transpose()
                            })
                            .next()
                            .transpose()?;

                        if let Some(license_info) = cached_license {
                            let (client_license_info, encryption_data) =
                                license::ClientLicenseInfo::from_server_license_request(
                                    &license_request,
                                    &client_random,
                                    &premaster_secret,
                                    self.hardware_id,
                                    license_info,
                                )
                                .map_err(|e| custom_err!("ClientLicenseInfo", e))?;

                            debug!(message = ?client_license_info, "Send");

                            let written = encode_send_data_request::<LicensePdu>(
                                send_data_indication_ctx.initiator_id,
                                send_data_indication_ctx.channel_id,
                                &client_license_info.into(),
                                output,
                            )?;

                            (
                                Written::from_size(written)?,
                                LicenseExchangeState::PlatformChallenge { encryption_data },
                            )
                        } else {
                            let hwid = self.hardware_id;
                            let machine_name = format!("{:X}-{:X}-{:X}-{:X}", hwid[0], hwid[1], hwid[2], hwid[3]);

                            let (new_license_request, encryption_data) =
                                license::ClientNewLicenseRequest::from_server_license_request(
                                    &license_request,
                                    &client_random,
                                    &premaster_secret,
                                    &self.username,
                                    &machine_name,
                                )
                                .map_err(|e| report_license_error("ClientNewLicenseRequest", e))?;

                            debug!(message = ?new_license_request, "Send");

                            let written = encode_send_data_request::<LicensePdu>(
                                send_data_indication_ctx.initiator_id,
                                send_data_indication_ctx.channel_id,
                                &new_license_request.into(),
                                output,
                            )?;

                            (
                                Written::from_size(written)?,
                                LicenseExchangeState::PlatformChallenge { encryption_data },
                            )
                        }
                    }
                    LicensePdu::LicensingErrorMessage(error_message) => {
                        if error_message.error_code != license::LicenseErrorCode::StatusValidClient {
                            return Err(custom_err!("LicensingErrorMessage", LicenseError::from(error_message)));
                        }
                        info!("Server did not initiate license exchange");
                        (Written::Nothing, LicenseExchangeState::LicenseExchanged)
                    }
                    _ => {
                        return Err(general_err!(
                            "unexpected PDU received during LicenseExchangeState::NewLicenseRequest"
                        ));
                    }
                }
            }

            LicenseExchangeState::PlatformChallenge { encryption_data } => {
                let send_data_indication_ctx = decode_send_data_indication(input)?;

                check_server_redirection(send_data_indication_ctx.user_data)?;

                let license_pdu = send_data_indication_ctx
                    .decode_user_data::<LicensePdu>()
                    .with_context("decode during LicenseExchangeState::PlatformChallenge")?;

                match license_pdu {
                    LicensePdu::ServerPlatformChallenge(challenge) => {
                        debug!(message = ?challenge, "Received");

                        let challenge_response =
                            license::ClientPlatformChallengeResponse::from_server_platform_challenge(
                                &challenge,
                                self.hardware_id,
                                &encryption_data,
                            )
                            .map_err(|e| custom_err!("ClientPlatformChallengeResponse", e))?;

                        debug!(message = ?challenge_response, "Send");

                        let written = encode_send_data_request::<LicensePdu>(
                            send_data_indication_ctx.initiator_id,
                            send_data_indication_ctx.channel_id,
                            &challenge_response.into(),
                            output,
                        )?;

                        (
                            Written::from_size(written)?,
                            LicenseExchangeState::UpgradeLicense { encryption_data },
                        )
                    }
                    LicensePdu::LicensingErrorMessage(error_message) => {
                        if error_message.error_code != license::LicenseErrorCode::StatusValidClient {
                            return Err(custom_err!("LicensingErrorMessage", LicenseError::from(error_message)));
                        }
                        debug!(message = ?error_message, "Received");
                        info!("Client licensing completed");
                        (Written::Nothing, LicenseExchangeState::LicenseExchanged)
                    }
                    _ => {
                        return Err(general_err!(
                            "unexpected PDU received during LicenseExchangeState::PlatformChallenge"
                        ));
                    }
                }
            }

            LicenseExchangeState::UpgradeLicense { encryption_data } => {
                let send_data_indication_ctx = decode_send_data_indication(input)?;

                check_server_redirection(send_data_indication_ctx.user_data)?;

                let license_pdu = send_data_indication_ctx
                    .decode_user_data::<LicensePdu>()
                    .with_context("decode during LicenseExchangeState::UpgradeLicense")?;

                match license_pdu {
                    LicensePdu::ServerUpgradeLicense(upgrade_license) => {
                        debug!(message = ?upgrade_license, "Received");

                        upgrade_license
                            .verify_server_license(&encryption_data)
                            .map_err(|e| custom_err!("license verification", e))?;

                        debug!("License verified with success");

                        let license_info = upgrade_license
                            .new_license_info(&encryption_data)
                            .map_err(ConnectorError::pdu)?;

                        self.license_store.put_license(license_info)?;
                    }
                    LicensePdu::LicensingErrorMessage(error_message) => {
                        if error_message.error_code != license::LicenseErrorCode::StatusValidClient {
                            return Err(custom_err!("LicensingErrorMessage", LicenseError::from(error_message)));
                        }

                        debug!(message = ?error_message, "Received");
                        info!("Client licensing completed");
                    }
                    _ => {
                        return Err(general_err!(
                            "unexpected PDU received during LicenseExchangeState::UpgradeLicense"
                        ));
                    }
                }

                (Written::Nothing, LicenseExchangeState::LicenseExchanged)
            }

            LicenseExchangeState::LicenseExchanged => return Err(general_err!("license already exchanged")),
        };

        self.state = next_state;

        Ok(written)
    }
}

/// A broker may answer the licensing phase with a Server Redirection PDU
/// instead; that unwinds the whole negotiation as a non-error.
fn check_server_redirection(user_data: &[u8]) -> ConnectorResult<()> {
    if user_data.len() < 2 {
        return Ok(());
    }

    let flags = BasicSecurityHeaderFlags::from_bits_truncate(u16::from_le_bytes([user_data[0], user_data[1]]));

    if flags.contains(BasicSecurityHeaderFlags::REDIRECTION_PKT) {
        let redirection: ServerRedirection = rdpgate_core::decode(user_data).map_err(ConnectorError::pdu)?;

        info!(session_id = redirection.session_id, target = ?redirection.target(), "Server redirection received");

        return Err(ConnectorError::redirect(
            "LicenseExchange",
            ServerRedirect::from(redirection),
        ));
    }

    Ok(())
}

fn report_license_error(context: &'static str, error: LicenseError) -> ConnectorError {
    if let LicenseError::InvalidX509Certificate { source, cert_der } = &error {
        struct BytesHexFormatter<'a>(&'a [u8]);

        impl fmt::Display for BytesHexFormatter<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x")?;
                self.0.iter().try_for_each(|byte| write!(f, "{byte:02X}"))
            }
        }

        error!(
            error = %source,
            cert_der = %BytesHexFormatter(cert_der),
            "Unsupported or invalid X509 certificate received during license exchange"
        );
    }

    custom_err!(context, error)
}
