//! Canned server messages and helpers driving a [`ClientConnector`] from
//! the connection request up to the licensing exchange.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rdpgate_connector::{
    CertStatus, CertificateChecker, ClientConnector, Config, ConnectorResult, DesktopSize, LicenseStore, Sequence as _,
    State as _,
};
use rdpgate_core::{decode, encode_vec, WriteBuf};
use rdpgate_pdu::license::{LicenseInformation, LicensePdu};
use rdpgate_pdu::rdp::client_info::Credentials;
use rdpgate_pdu::{gcc, mcs, nego, x224};
use rdpgate_svc::{ChannelAuthorizer, ChannelName, UnlistedPolicy};

pub const SERVER_INITIATOR_ID: u16 = 1002;
pub const IO_CHANNEL_ID: u16 = 1003;
pub const USER_CHANNEL_ID: u16 = 1004;
pub const CLIPRDR_CHANNEL_ID: u16 = 1005;

/// Certificate checker that counts how often it is consulted.
#[derive(Debug)]
pub struct CountingChecker {
    pub calls: Arc<AtomicUsize>,
    pub verdict: CertStatus,
}

impl CertificateChecker for CountingChecker {
    fn check_certificate(&mut self, _cert_der: &[u8]) -> ConnectorResult<CertStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict)
    }
}

/// License store with an empty cache that records every persisted license.
#[derive(Debug, Default)]
pub struct RecordingLicenseStore {
    puts: Mutex<Vec<LicenseInformation>>,
}

impl RecordingLicenseStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stored(&self) -> Vec<LicenseInformation> {
        self.puts.lock().unwrap().clone()
    }
}

impl LicenseStore for RecordingLicenseStore {
    fn get_license(&self, _license_info: LicenseInformation) -> ConnectorResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn put_license(&self, license_info: LicenseInformation) -> ConnectorResult<()> {
        self.puts.lock().unwrap().push(license_info);
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        desktop_size: DesktopSize { width: 1280, height: 720 },
        credentials: Credentials {
            username: "alice".to_owned(),
            password: "hunter2".to_owned(),
            domain: None,
        },
        client_build: 18363,
        client_name: "GATEWAY-01".to_owned(),
        keyboard_type: gcc::KeyboardType::IbmEnhanced,
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

pub fn server_addr() -> SocketAddr {
    "10.0.0.7:3389".parse().unwrap()
}

pub fn connector(verdict: CertStatus, calls: &Arc<AtomicUsize>, license_store: Arc<dyn LicenseStore>) -> ClientConnector {
    ClientConnector::new(
        test_config(),
        Box::new(CountingChecker {
            calls: Arc::clone(calls),
            verdict,
        }),
        license_store,
    )
    .with_server_addr(server_addr())
}

/// MCS Connect Response allocating the io channel and one static channel
/// for cliprdr, with no legacy encryption.
pub fn connect_response() -> Vec<u8> {
    let response = mcs::ConnectResponse {
        conference_create_response: gcc::ConferenceCreateResponse {
            user_id: SERVER_INITIATOR_ID,
            gcc_blocks: gcc::ServerGccBlocks {
                core: gcc::ServerCoreData {
                    version: gcc::RdpVersion::V5_PLUS,
                    optional_data: gcc::ServerCoreOptionalData::default(),
                },
                network: gcc::ServerNetworkData {
                    channel_ids: vec![CLIPRDR_CHANNEL_ID],
                    io_channel: IO_CHANNEL_ID,
                },
                security: gcc::ServerSecurityData::no_security(),
            },
        },
        called_connect_id: 0,
        domain_parameters: mcs::DomainParameters::target(),
    };

    let mut buf = WriteBuf::new();
    rdpgate_connector::encode_x224_packet(&response, &mut buf).unwrap();
    buf.filled().to_vec()
}

/// Wraps a license PDU the way the server delivers it: an MCS Send Data
/// Indication on the io channel inside an X.224 Data TPDU.
pub fn send_data_indication(pdu: &LicensePdu) -> Vec<u8> {
    let user_data = encode_vec(pdu).unwrap();

    encode_vec(&x224::X224(mcs::McsMessage::SendDataIndication(mcs::SendDataIndication {
        initiator_id: SERVER_INITIATOR_ID,
        channel_id: IO_CHANNEL_ID,
        user_data: Cow::Owned(user_data),
    })))
    .unwrap()
}

/// Unwraps the license PDU the connector sent on the io channel.
pub fn client_license_pdu(output: &[u8]) -> LicensePdu {
    let message = decode::<x224::X224<mcs::McsMessage<'_>>>(output).unwrap().0;

    let mcs::McsMessage::SendDataRequest(request) = message else {
        panic!("expected an MCS Send Data Request");
    };
    assert_eq!(request.channel_id, IO_CHANNEL_ID);

    decode(&request.user_data).unwrap()
}

/// Steps the connector through connection initiation, the MCS connect,
/// channel joins and the Client Info PDU, leaving it waiting for the first
/// server licensing message. The transport presents no certificate, so the
/// checker is never consulted here.
pub fn drive_to_license_exchange(connector: &mut ClientConnector) {
    let mut output = WriteBuf::new();

    // connection request
    connector.step_no_input(&mut output).unwrap();
    assert_eq!(connector.state.name(), "CoreNegotiation");

    // connection confirm selecting TLS
    let confirm = encode_vec(&x224::X224(nego::ConnectionConfirm::Response {
        flags: nego::ResponseFlags::empty(),
        protocol: nego::SecurityProtocol::SSL,
    }))
    .unwrap();
    connector.step(&confirm, &mut output).unwrap();
    assert!(connector.should_submit_server_certificate());

    // anonymous TLS on the inner leg
    connector.attach_server_certificate(None).unwrap();

    // MCS connect initial / response
    connector.step_no_input(&mut output).unwrap();
    assert_eq!(connector.state.name(), "BasicSettingsExchange");

    connector.step(&connect_response(), &mut output).unwrap();
    assert_eq!(connector.state.name(), "ChannelConnectionAttachUser");

    // erect domain + attach user, then join every channel
    connector.step_no_input(&mut output).unwrap();

    let attach_confirm = encode_vec(&x224::X224(mcs::AttachUserConfirm {
        result: 0,
        initiator_id: USER_CHANNEL_ID,
    }))
    .unwrap();
    connector.step(&attach_confirm, &mut output).unwrap();
    assert_eq!(connector.state.name(), "ChannelJoinConfirm");

    for channel_id in [USER_CHANNEL_ID, IO_CHANNEL_ID, CLIPRDR_CHANNEL_ID] {
        let join_confirm = encode_vec(&x224::X224(mcs::ChannelJoinConfirm {
            result: 0,
            initiator_id: USER_CHANNEL_ID,
            requested_channel_id: channel_id,
            channel_id,
        }))
        .unwrap();
        connector.step(&join_confirm, &mut output).unwrap();
    }
    assert_eq!(connector.state.name(), "LicenseExchange");

    // Client Info PDU
    let written = connector.step_no_input(&mut output).unwrap();
    assert!(written.size().unwrap() > 0);
}
