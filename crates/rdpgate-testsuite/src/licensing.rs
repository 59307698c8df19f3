//! Server-side licensing oracle.
//!
//! The connector implements the client half of MS-RDPELE; these fixtures
//! play the server: they build the server PDUs of the exchange, decrypt the
//! premaster secret the client sent and derive the same session keys the
//! client derived, so the tests can encrypt challenges and licenses the
//! client will accept.

use md5::{Digest as _, Md5};
use num_bigint::BigUint;
use rdpgate_core::Encode as _;
use rdpgate_pdu::license::cert::{CertificateType, ProprietaryCertificate, RsaPublicKey};
use rdpgate_pdu::license::{
    LicenseErrorCode, LicenseHeader, LicenseInformation, LicensePdu, LicensingErrorMessage, LicensingStateTransition,
    PreambleFlags, PreambleType, PreambleVersion, ProductInfo, Scope, ServerCertificate, ServerLicenseRequest,
    ServerPlatformChallenge, ServerUpgradeLicense, PREMASTER_SECRET_SIZE, RANDOM_NUMBER_SIZE,
};
use rdpgate_pdu::rdp::headers::{BasicSecurityHeader, BasicSecurityHeaderFlags};
use sha1::Sha1;

pub const RSA_PUBLIC_EXPONENT: u32 = 65537;

/// 512-bit test modulus, big-endian.
pub const RSA_MODULUS: [u8; 64] = [
    0x81, 0xA9, 0xCF, 0x95, 0x3F, 0xF9, 0x56, 0xCA, 0xD0, 0xA3, 0xFC, 0x45, 0x64, 0xB0, 0x05, 0xF2, 0xFF, 0xFF, 0x66,
    0x72, 0xF2, 0xDF, 0xFE, 0xBC, 0x02, 0xB4, 0x20, 0x50, 0xB3, 0x05, 0xF5, 0x56, 0x13, 0x93, 0x4D, 0xCB, 0x18, 0xA2,
    0x65, 0x8C, 0x6F, 0x59, 0xF7, 0x39, 0xFE, 0xC1, 0x2A, 0xE2, 0xE8, 0xE0, 0x4E, 0x13, 0xF2, 0xF5, 0xC7, 0xD4, 0xF3,
    0xBE, 0x28, 0x8E, 0xC7, 0x94, 0xB0, 0xBB,
];

/// Private exponent matching [`RSA_MODULUS`], big-endian.
pub const RSA_PRIVATE_EXPONENT: [u8; 64] = [
    0x4B, 0x09, 0x20, 0x2D, 0xF8, 0xF5, 0xAC, 0x3A, 0x76, 0x7F, 0x4F, 0xB0, 0x40, 0xD2, 0x74, 0xBE, 0xE9, 0x52, 0xBD,
    0xD0, 0xEB, 0xA8, 0xA0, 0xDB, 0xE0, 0x9C, 0xA8, 0xCE, 0xCA, 0xAB, 0x3A, 0x0C, 0x1C, 0xC1, 0x9E, 0xF3, 0x3B, 0x08,
    0x94, 0x4E, 0xC3, 0x21, 0x4E, 0x1A, 0x16, 0xC0, 0x2B, 0x50, 0xD8, 0x69, 0x1C, 0x9B, 0xD6, 0x64, 0x29, 0xC5, 0xD7,
    0x5D, 0x5D, 0x3F, 0xB5, 0xF0, 0x8C, 0xC1,
];

/// "TEST" in UTF-16 with a null terminator, the canonical plaintext
/// platform challenge.
const PLATFORM_CHALLENGE: [u8; 10] = [0x54, 0x00, 0x45, 0x00, 0x53, 0x00, 0x54, 0x00, 0x00, 0x00];

/// Session keys shared by both sides after the premaster exchange.
pub struct LicenseKeys {
    pub mac_salt_key: Vec<u8>,
    pub license_key: Vec<u8>,
}

pub struct Rc4 {
    state: [u8; 256],
    i: usize,
    j: usize,
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Self {
        let mut state = [0u8; 256];
        for (index, value) in state.iter_mut().enumerate() {
            *value = index as u8;
        }

        let mut j = 0;
        for i in 0..256 {
            j = (j + usize::from(state[i]) + usize::from(key[i % key.len()])) % 256;
            state.swap(i, j);
        }

        Self { state, i: 0, j: 0 }
    }

    pub fn process(&mut self, message: &[u8]) -> Vec<u8> {
        message
            .iter()
            .map(|&byte| {
                self.i = (self.i + 1) % 256;
                self.j = (self.j + usize::from(self.state[self.i])) % 256;
                self.state.swap(self.i, self.j);
                let index = (usize::from(self.state[self.i]) + usize::from(self.state[self.j])) % 256;
                byte ^ self.state[index]
            })
            .collect()
    }
}

/// Undoes the client's RSA encryption of the premaster secret. Both the
/// ciphertext and the plaintext are little-endian on the wire.
pub fn decrypt_premaster_secret(encrypted: &[u8]) -> Vec<u8> {
    let modulus = BigUint::from_bytes_be(&RSA_MODULUS);
    let private_exponent = BigUint::from_bytes_be(&RSA_PRIVATE_EXPONENT);

    let mut premaster_secret = BigUint::from_bytes_le(encrypted)
        .modpow(&private_exponent, &modulus)
        .to_bytes_le();
    premaster_secret.resize(PREMASTER_SECRET_SIZE, 0);
    premaster_secret
}

fn salted_hash(salt: &[u8], salt_first: &[u8], salt_second: &[u8], input: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update([input, salt, salt_first, salt_second].concat().as_slice());
    let sha_result = hasher.finalize();

    let mut md5 = Md5::new();
    md5.update([salt, sha_result.as_ref()].concat().as_slice());

    md5.finalize().to_vec()
}

/// Runs the MS-RDPELE 5.1.3 key derivation the way the client does it.
pub fn derive_keys(premaster_secret: &[u8], client_random: &[u8], server_random: &[u8]) -> LicenseKeys {
    let master_secret = [
        salted_hash(premaster_secret, client_random, server_random, b"A"),
        salted_hash(premaster_secret, client_random, server_random, b"BB"),
        salted_hash(premaster_secret, client_random, server_random, b"CCC"),
    ]
    .concat();

    let session_key_blob = [
        salted_hash(&master_secret, server_random, client_random, b"A"),
        salted_hash(&master_secret, server_random, client_random, b"BB"),
        salted_hash(&master_secret, server_random, client_random, b"CCC"),
    ]
    .concat();

    let mut md5 = Md5::new();
    md5.update(
        [&session_key_blob[16..32], client_random, server_random]
            .concat()
            .as_slice(),
    );

    LicenseKeys {
        mac_salt_key: session_key_blob[..16].to_vec(),
        license_key: md5.finalize().to_vec(),
    }
}

/// MACs `data` with the salted SHA-1 + MD5 construction of MS-RDPELE 2.2.2.3.
pub fn compute_mac_data(mac_salt_key: &[u8], data: &[u8]) -> Vec<u8> {
    let data_len = (data.len() as u32).to_le_bytes();
    let pad_one = [0x36; 40];

    let mut hasher = Sha1::new();
    hasher.update(
        [mac_salt_key, pad_one.as_ref(), data_len.as_ref(), data]
            .concat()
            .as_slice(),
    );
    let sha_result = hasher.finalize();

    let pad_two = [0x5c; 48];

    let mut md5 = Md5::new();
    md5.update([mac_salt_key, pad_two.as_ref(), sha_result.as_ref()].concat().as_slice());

    md5.finalize().to_vec()
}

fn license_header(preamble_message_type: PreambleType) -> LicenseHeader {
    LicenseHeader {
        security_header: BasicSecurityHeader {
            flags: BasicSecurityHeaderFlags::LICENSE_PKT,
        },
        preamble_message_type,
        preamble_flags: PreambleFlags::empty(),
        preamble_version: PreambleVersion::V3,
        // patched once the full message size is known
        preamble_message_size: 0,
    }
}

/// Server License Request carrying the proprietary certificate for
/// [`RSA_MODULUS`]. The signature is not validated by the client.
pub fn server_license_request(server_random: [u8; RANDOM_NUMBER_SIZE]) -> LicensePdu {
    let mut request = ServerLicenseRequest {
        license_header: license_header(PreambleType::LicenseRequest),
        server_random: server_random.to_vec(),
        product_info: ProductInfo {
            version: 0x0006_0000,
            company_name: "Microsoft Corporation".to_owned(),
            product_id: "A02".to_owned(),
        },
        server_certificate: Some(ServerCertificate {
            issued_permanently: true,
            certificate: CertificateType::Proprietary(ProprietaryCertificate {
                public_key: RsaPublicKey {
                    public_exponent: RSA_PUBLIC_EXPONENT,
                    modulus: RSA_MODULUS.to_vec(),
                },
                signature: vec![0; 72],
            }),
        }),
        scope_list: vec![Scope("microsoft.com".to_owned())],
    };
    request.license_header.preamble_message_size = request.size() as u16;

    LicensePdu::ServerLicenseRequest(request)
}

/// Platform challenge encrypted under the derived license key, MACed over
/// the plaintext as the client expects.
pub fn platform_challenge(keys: &LicenseKeys) -> LicensePdu {
    let mac_data = compute_mac_data(&keys.mac_salt_key, &PLATFORM_CHALLENGE);
    let encrypted_platform_challenge = Rc4::new(&keys.license_key).process(&PLATFORM_CHALLENGE);

    let mut challenge = ServerPlatformChallenge {
        license_header: license_header(PreambleType::PlatformChallenge),
        encrypted_platform_challenge,
        mac_data,
    };
    challenge.license_header.preamble_message_size = challenge.size() as u16;

    LicensePdu::ServerPlatformChallenge(challenge)
}

/// Server Upgrade License issuing `license_info`, encrypted and MACed so
/// the client's verification passes.
pub fn upgrade_license(keys: &LicenseKeys, license_info: &LicenseInformation) -> LicensePdu {
    let plaintext = rdpgate_core::encode_vec(license_info).unwrap();
    let mac_data = compute_mac_data(&keys.mac_salt_key, &plaintext);
    let encrypted_license_info = Rc4::new(&keys.license_key).process(&plaintext);

    let mut upgrade = ServerUpgradeLicense {
        license_header: license_header(PreambleType::UpgradeLicense),
        encrypted_license_info,
        mac_data,
    };
    upgrade.license_header.preamble_message_size = upgrade.size() as u16;

    LicensePdu::ServerUpgradeLicense(upgrade)
}

/// STATUS_VALID_CLIENT error alert, the short-circuit answer of a server
/// that requires no license.
pub fn status_valid_client() -> LicensePdu {
    let mut message = LicensingErrorMessage {
        license_header: license_header(PreambleType::ErrorAlert),
        error_code: LicenseErrorCode::StatusValidClient,
        state_transition: LicensingStateTransition::NoTransition,
        error_info: Vec::new(),
    };
    message.license_header.preamble_message_size = message.size() as u16;

    LicensePdu::LicensingErrorMessage(message)
}

pub fn issued_license_information() -> LicenseInformation {
    LicenseInformation {
        version: 0x0006_0000,
        scope: "microsoft.com".to_owned(),
        company_name: "Microsoft Corporation".to_owned(),
        product_id: "A02".to_owned(),
        license_info: vec![0xAA; 16],
    }
}
