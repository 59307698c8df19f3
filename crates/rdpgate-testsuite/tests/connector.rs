//! End-to-end negotiation runs against the canned server fixtures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rdpgate_connector::{CertStatus, LicenseStore, Sequence as _, State as _};
use rdpgate_core::WriteBuf;
use rdpgate_pdu::license::{LicensePdu, RANDOM_NUMBER_SIZE};
use rdpgate_pdu::{gcc, nego};
use rdpgate_testsuite::licensing::{
    decrypt_premaster_secret, derive_keys, issued_license_information, platform_challenge, server_license_request,
    status_valid_client, upgrade_license,
};
use rdpgate_testsuite::negotiation::{
    client_license_pdu, connector, drive_to_license_exchange, send_data_indication, RecordingLicenseStore,
    CLIPRDR_CHANNEL_ID, IO_CHANNEL_ID, USER_CHANNEL_ID,
};

#[test]
fn anonymous_tls_completes_without_consulting_the_checker() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = RecordingLicenseStore::new();
    // an Invalid verdict would fail the connection if the checker ran
    let mut connector = connector(
        CertStatus::Invalid,
        &calls,
        Arc::clone(&store) as Arc<dyn LicenseStore>,
    );

    drive_to_license_exchange(&mut connector);

    let mut output = WriteBuf::new();
    let written = connector
        .step(&send_data_indication(&status_valid_client()), &mut output)
        .unwrap();

    assert!(written.is_nothing());
    assert_eq!(connector.state.name(), "Terminated");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(store.stored().is_empty());

    let result = connector.negotiation_result().unwrap();
    assert_eq!(result.io_channel_id, IO_CHANNEL_ID);
    assert_eq!(result.user_channel_id, USER_CHANNEL_ID);
    assert_eq!(result.selected_protocol, nego::SecurityProtocol::SSL);
    assert_eq!(
        result.static_channels,
        vec![(CLIPRDR_CHANNEL_ID, gcc::ChannelName::from_utf8("cliprdr").unwrap())]
    );
}

#[test]
fn empty_store_runs_the_full_issuance_and_persists_one_license() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = RecordingLicenseStore::new();
    let mut connector = connector(
        CertStatus::Invalid,
        &calls,
        Arc::clone(&store) as Arc<dyn LicenseStore>,
    );

    drive_to_license_exchange(&mut connector);

    let server_random = [0x11; RANDOM_NUMBER_SIZE];

    // Server License Request answered with a Client New License Request
    let mut output = WriteBuf::new();
    connector
        .step(&send_data_indication(&server_license_request(server_random)), &mut output)
        .unwrap();
    assert_eq!(connector.state.name(), "LicenseExchange");

    let LicensePdu::ClientNewLicenseRequest(request) = client_license_pdu(output.filled()) else {
        panic!("expected a Client New License Request");
    };
    assert_eq!(request.client_username, "alice");
    assert_eq!(request.client_machine_name, "1-2-3-4");

    // the server now derives the same session keys as the client
    let premaster_secret = decrypt_premaster_secret(&request.encrypted_premaster_secret);
    let keys = derive_keys(&premaster_secret, &request.client_random, &server_random);

    // Platform Challenge answered with a Platform Challenge Response
    let mut output = WriteBuf::new();
    connector
        .step(&send_data_indication(&platform_challenge(&keys)), &mut output)
        .unwrap();

    let LicensePdu::ClientPlatformChallengeResponse(_) = client_license_pdu(output.filled()) else {
        panic!("expected a Client Platform Challenge Response");
    };

    // Upgrade License terminates the exchange and persists the license once
    let issued = issued_license_information();
    let mut output = WriteBuf::new();
    let written = connector
        .step(&send_data_indication(&upgrade_license(&keys, &issued)), &mut output)
        .unwrap();

    assert!(written.is_nothing());
    assert_eq!(connector.state.name(), "Terminated");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.stored(), vec![issued]);
}
