//! Licensing PDUs exchanged on the IO channel after the channel join phase,
//! per MS-RDPELE. The client either replays a cached license (Client License
//! Info) or requests a new one (Client New License Request), answers the
//! platform challenge and verifies the license pushed back by the server.

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;
use thiserror::Error;

use rdpgate_core::{
    cast_length, ensure_fixed_part_size, invalid_field_err, Decode, Encode, PduError, PduResult, ReadCursor,
    WriteCursor,
};

use crate::rdp::headers::{BasicSecurityHeader, BasicSecurityHeaderFlags, BASIC_SECURITY_HEADER_SIZE};

pub mod cert;

mod client_license_info;
mod client_new_license_request;
mod client_platform_challenge_response;
mod licensing_error_message;
mod server_license_request;
mod server_platform_challenge;
mod server_upgrade_license;

pub use self::client_license_info::ClientLicenseInfo;
pub use self::client_new_license_request::{ClientNewLicenseRequest, ClientOsType, Isv, PLATFORM_ID};
pub use self::client_platform_challenge_response::ClientPlatformChallengeResponse;
pub use self::licensing_error_message::{LicenseErrorCode, LicensingErrorMessage, LicensingStateTransition};
pub use self::server_license_request::{ProductInfo, Scope, ServerCertificate, ServerLicenseRequest};
pub use self::server_platform_challenge::ServerPlatformChallenge;
pub use self::server_upgrade_license::{LicenseInformation, ServerUpgradeLicense};

pub const PREAMBLE_SIZE: usize = 4;
pub const PREMASTER_SECRET_SIZE: usize = 48;
pub const RANDOM_NUMBER_SIZE: usize = 32;
pub const MAC_SIZE: usize = 16;

const PROTOCOL_VERSION_MASK: u8 = 0x0F;

const BLOB_TYPE_SIZE: usize = 2;
const BLOB_LENGTH_SIZE: usize = 2;

const UTF8_NULL_TERMINATOR_SIZE: usize = 1;
const UTF16_NULL_TERMINATOR_SIZE: usize = 2;

const KEY_EXCHANGE_ALGORITHM_RSA: u32 = 1;

// ClientHardwareIdentification: PlatformId + 16 bytes of client data
const CLIENT_HARDWARE_IDENTIFICATION_SIZE: usize = 20;

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("MAC checksum generated over decrypted data does not match the server's checksum")]
    InvalidMacData,
    #[error("server license request has no certificate to take the public key from")]
    NoServerCertificate,
    #[error("unable to retrieve the public key from the certificate")]
    UnableToGetPublicKey,
    #[error("invalid X.509 certificate")]
    InvalidX509Certificate {
        source: x509_cert::der::Error,
        cert_der: Vec<u8>,
    },
    #[error("invalid X.509 certificates amount")]
    InvalidX509CertificatesAmount,
    #[error("the server returned a licensing error: {0:?}")]
    ServerError(LicensingErrorMessage),
    #[error("PDU error: {0}")]
    Pdu(#[from] PduError),
}

impl From<LicensingErrorMessage> for LicenseError {
    fn from(e: LicensingErrorMessage) -> Self {
        Self::ServerError(e)
    }
}

/// Key material derived while building a client licensing message, needed
/// later to answer the platform challenge and verify the issued license.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct LicenseEncryptionData {
    pub premaster_secret: Vec<u8>,
    pub mac_salt_key: Vec<u8>,
    pub license_key: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct LicenseHeader {
    pub security_header: BasicSecurityHeader,
    pub preamble_message_type: PreambleType,
    pub preamble_flags: PreambleFlags,
    pub preamble_version: PreambleVersion,
    pub preamble_message_size: u16,
}

impl LicenseHeader {
    const NAME: &'static str = "LicenseHeader";

    const FIXED_PART_SIZE: usize = PREAMBLE_SIZE + BASIC_SECURITY_HEADER_SIZE;
}

impl Encode for LicenseHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        self.security_header.encode(dst)?;

        let flags_with_version = self.preamble_flags.bits() | self.preamble_version as u8;

        dst.write_u8(self.preamble_message_type as u8);
        dst.write_u8(flags_with_version);
        dst.write_u16(self.preamble_message_size);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for LicenseHeader {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let security_header = BasicSecurityHeader::decode(src)?;

        if !security_header.flags.contains(BasicSecurityHeaderFlags::LICENSE_PKT) {
            return Err(invalid_field_err(
                Self::NAME,
                "securityHeaderFlags",
                "LICENSE_PKT flag is not set",
            ));
        }

        let preamble_message_type = PreambleType::from_u8(src.read_u8())
            .ok_or_else(|| invalid_field_err(Self::NAME, "preambleType", "invalid license message type"))?;

        let flags_with_version = src.read_u8();
        let preamble_message_size = src.read_u16();

        let preamble_flags = PreambleFlags::from_bits(flags_with_version & !PROTOCOL_VERSION_MASK)
            .ok_or_else(|| invalid_field_err(Self::NAME, "preambleFlags", "invalid preamble flags"))?;

        let preamble_version = PreambleVersion::from_u8(flags_with_version & PROTOCOL_VERSION_MASK)
            .ok_or_else(|| invalid_field_err(Self::NAME, "preambleVersion", "invalid preamble version"))?;

        Ok(Self {
            security_header,
            preamble_message_type,
            preamble_flags,
            preamble_version,
            preamble_message_size,
        })
    }
}

/// [2.2.1.12.1.1] Licensing Preamble (LICENSE_PREAMBLE)
///
/// [2.2.1.12.1.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/73170ca2-5f82-4a2d-9d1b-b439f3d8dadc
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum PreambleType {
    LicenseRequest = 0x01,
    PlatformChallenge = 0x02,
    NewLicense = 0x03,
    UpgradeLicense = 0x04,
    LicenseInfo = 0x12,
    NewLicenseRequest = 0x13,
    PlatformChallengeResponse = 0x15,
    ErrorAlert = 0xff,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct PreambleFlags: u8 {
        const EXTENDED_ERROR_MSG_SUPPORTED = 0x80;
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum PreambleVersion {
    V2 = 2, // RDP 4.0
    V3 = 3, // RDP 5.0 and up
}

/// Licensing Binary Blob type. Servers are known to leave this field
/// meaningless in some messages, so unknown values are preserved as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobType(pub u16);

impl BlobType {
    pub const ANY: Self = Self(0x00);
    pub const DATA: Self = Self(0x01);
    pub const RANDOM: Self = Self(0x02);
    pub const CERTIFICATE: Self = Self(0x03);
    pub const ERROR: Self = Self(0x04);
    pub const RSA_KEY: Self = Self(0x06);
    pub const RSA_SIGNATURE: Self = Self(0x08);
    pub const ENCRYPTED_DATA: Self = Self(0x09);
    pub const KEY_EXCHANGE_ALGORITHM: Self = Self(0x0d);
    pub const SCOPE: Self = Self(0x0e);
    pub const CLIENT_USER_NAME: Self = Self(0x0f);
    pub const CLIENT_MACHINE_NAME_BLOB: Self = Self(0x10);
}

#[derive(Debug, PartialEq, Eq)]
pub struct BlobHeader {
    pub blob_type: BlobType,
    pub length: usize,
}

impl BlobHeader {
    const NAME: &'static str = "BlobHeader";

    const FIXED_PART_SIZE: usize = BLOB_TYPE_SIZE + BLOB_LENGTH_SIZE;

    pub fn new(blob_type: BlobType, length: usize) -> Self {
        Self { blob_type, length }
    }
}

impl Encode for BlobHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.blob_type.0);
        dst.write_u16(cast_length!(Self::NAME, "wBlobLen", self.length)?);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for BlobHeader {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let blob_type = BlobType(src.read_u16());
        let length = usize::from(src.read_u16());

        Ok(Self { blob_type, length })
    }
}

/// All licensing messages, dispatched on the preamble message type.
///
/// An ERROR_ALERT decodes into the [`LicensingErrorMessage`] variant rather
/// than an error: STATUS_VALID_CLIENT is the normal way for a server to skip
/// the licensing exchange, and the caller decides what the other codes mean.
#[derive(Debug, PartialEq, Eq)]
pub enum LicensePdu {
    ServerLicenseRequest(ServerLicenseRequest),
    ClientNewLicenseRequest(ClientNewLicenseRequest),
    ClientLicenseInfo(ClientLicenseInfo),
    ServerPlatformChallenge(ServerPlatformChallenge),
    ClientPlatformChallengeResponse(ClientPlatformChallengeResponse),
    ServerUpgradeLicense(ServerUpgradeLicense),
    LicensingErrorMessage(LicensingErrorMessage),
}

impl Encode for LicensePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        match self {
            Self::ServerLicenseRequest(pdu) => pdu.encode(dst),
            Self::ClientNewLicenseRequest(pdu) => pdu.encode(dst),
            Self::ClientLicenseInfo(pdu) => pdu.encode(dst),
            Self::ServerPlatformChallenge(pdu) => pdu.encode(dst),
            Self::ClientPlatformChallengeResponse(pdu) => pdu.encode(dst),
            Self::ServerUpgradeLicense(pdu) => pdu.encode(dst),
            Self::LicensingErrorMessage(pdu) => pdu.encode(dst),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ServerLicenseRequest(pdu) => pdu.name(),
            Self::ClientNewLicenseRequest(pdu) => pdu.name(),
            Self::ClientLicenseInfo(pdu) => pdu.name(),
            Self::ServerPlatformChallenge(pdu) => pdu.name(),
            Self::ClientPlatformChallengeResponse(pdu) => pdu.name(),
            Self::ServerUpgradeLicense(pdu) => pdu.name(),
            Self::LicensingErrorMessage(pdu) => pdu.name(),
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::ServerLicenseRequest(pdu) => pdu.size(),
            Self::ClientNewLicenseRequest(pdu) => pdu.size(),
            Self::ClientLicenseInfo(pdu) => pdu.size(),
            Self::ServerPlatformChallenge(pdu) => pdu.size(),
            Self::ClientPlatformChallengeResponse(pdu) => pdu.size(),
            Self::ServerUpgradeLicense(pdu) => pdu.size(),
            Self::LicensingErrorMessage(pdu) => pdu.size(),
        }
    }
}

impl<'de> Decode<'de> for LicensePdu {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        let license_header = LicenseHeader::decode(src)?;

        match license_header.preamble_message_type {
            PreambleType::LicenseRequest => Ok(ServerLicenseRequest::decode(license_header, src)?.into()),
            PreambleType::PlatformChallenge => Ok(ServerPlatformChallenge::decode(license_header, src)?.into()),
            PreambleType::NewLicense | PreambleType::UpgradeLicense => {
                Ok(ServerUpgradeLicense::decode(license_header, src)?.into())
            }
            PreambleType::LicenseInfo => Ok(ClientLicenseInfo::decode(license_header, src)?.into()),
            PreambleType::NewLicenseRequest => Ok(ClientNewLicenseRequest::decode(license_header, src)?.into()),
            PreambleType::PlatformChallengeResponse => {
                Ok(ClientPlatformChallengeResponse::decode(license_header, src)?.into())
            }
            PreambleType::ErrorAlert => Ok(LicensingErrorMessage::decode(license_header, src)?.into()),
        }
    }
}

impl From<ServerLicenseRequest> for LicensePdu {
    fn from(pdu: ServerLicenseRequest) -> Self {
        Self::ServerLicenseRequest(pdu)
    }
}

impl From<ClientNewLicenseRequest> for LicensePdu {
    fn from(pdu: ClientNewLicenseRequest) -> Self {
        Self::ClientNewLicenseRequest(pdu)
    }
}

impl From<ClientLicenseInfo> for LicensePdu {
    fn from(pdu: ClientLicenseInfo) -> Self {
        Self::ClientLicenseInfo(pdu)
    }
}

impl From<ServerPlatformChallenge> for LicensePdu {
    fn from(pdu: ServerPlatformChallenge) -> Self {
        Self::ServerPlatformChallenge(pdu)
    }
}

impl From<ClientPlatformChallengeResponse> for LicensePdu {
    fn from(pdu: ClientPlatformChallengeResponse) -> Self {
        Self::ClientPlatformChallengeResponse(pdu)
    }
}

impl From<ServerUpgradeLicense> for LicensePdu {
    fn from(pdu: ServerUpgradeLicense) -> Self {
        Self::ServerUpgradeLicense(pdu)
    }
}

impl From<LicensingErrorMessage> for LicensePdu {
    fn from(pdu: LicensingErrorMessage) -> Self {
        Self::LicensingErrorMessage(pdu)
    }
}

pub(crate) fn compute_mac_data(mac_salt_key: &[u8], data: &[u8]) -> Vec<u8> {
    use md5::Digest as _;

    let data_len_buffer = (data.len() as u32).to_le_bytes();

    let pad_one: [u8; 40] = [0x36; 40];

    let mut hasher = sha1::Sha1::new();
    hasher.update(
        [mac_salt_key, pad_one.as_ref(), data_len_buffer.as_ref(), data]
            .concat()
            .as_slice(),
    );
    let sha_result = hasher.finalize();

    let pad_two: [u8; 48] = [0x5c; 48];

    let mut md5 = md5::Md5::new();
    md5.update(
        [mac_salt_key, pad_two.as_ref(), sha_result.as_ref()]
            .concat()
            .as_slice(),
    );

    md5.finalize().to_vec()
}

fn salted_hash(salt: &[u8], salt_first: &[u8], salt_second: &[u8], input: &[u8]) -> Vec<u8> {
    use md5::Digest as _;

    let mut hasher = sha1::Sha1::new();
    hasher.update([input, salt, salt_first, salt_second].concat().as_slice());
    let sha_result = hasher.finalize();

    let mut md5 = md5::Md5::new();
    md5.update([salt, sha_result.as_ref()].concat().as_slice());

    md5.finalize().to_vec()
}

// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpele/88061224-4a2f-4a28-a52e-e896b75ed2d3
pub(crate) fn compute_master_secret(premaster_secret: &[u8], client_random: &[u8], server_random: &[u8]) -> Vec<u8> {
    [
        salted_hash(premaster_secret, client_random, server_random, b"A"),
        salted_hash(premaster_secret, client_random, server_random, b"BB"),
        salted_hash(premaster_secret, client_random, server_random, b"CCC"),
    ]
    .concat()
}

pub(crate) fn compute_session_key_blob(master_secret: &[u8], client_random: &[u8], server_random: &[u8]) -> Vec<u8> {
    [
        salted_hash(master_secret, server_random, client_random, b"A"),
        salted_hash(master_secret, server_random, client_random, b"BB"),
        salted_hash(master_secret, server_random, client_random, b"CCC"),
    ]
    .concat()
}

/// Derives the MAC salt key and license key from the premaster secret and
/// both random numbers, per MS-RDPELE 5.1.3.
pub(crate) fn derive_encryption_data(
    premaster_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> LicenseEncryptionData {
    use md5::Digest as _;

    let master_secret = compute_master_secret(premaster_secret, client_random, server_random);
    let session_key_blob = compute_session_key_blob(master_secret.as_slice(), client_random, server_random);
    let mac_salt_key = &session_key_blob[..16];

    let mut md5 = md5::Md5::new();
    md5.update([&session_key_blob[16..32], client_random, server_random].concat().as_slice());
    let license_key = md5.finalize().to_vec();

    LicenseEncryptionData {
        premaster_secret: Vec::from(premaster_secret),
        mac_salt_key: Vec::from(mac_salt_key),
        license_key,
    }
}

/// RSA-encrypts `message` with a PKCS#1 DER public key. Both the message and
/// the ciphertext are little-endian, the ciphertext is padded to the modulus
/// length.
fn encrypt_with_public_key(message: &[u8], public_key: &[u8]) -> Result<Vec<u8>, LicenseError> {
    use num_bigint::BigUint;
    use pkcs1::der::Decode as _;

    let public_key = pkcs1::RsaPublicKey::from_der(public_key).map_err(|_| LicenseError::UnableToGetPublicKey)?;

    let exponent = BigUint::from_bytes_be(public_key.public_exponent.as_bytes());
    let modulus = BigUint::from_bytes_be(public_key.modulus.as_bytes());
    let message = BigUint::from_bytes_le(message);

    let mut encrypted = message.modpow(&exponent, &modulus).to_bytes_le();
    encrypted.resize(public_key.modulus.as_bytes().len(), 0);

    Ok(encrypted)
}

fn new_license_header(preamble_message_type: PreambleType, preamble_message_size: usize) -> PduResult<LicenseHeader> {
    Ok(LicenseHeader {
        security_header: BasicSecurityHeader {
            flags: BasicSecurityHeaderFlags::LICENSE_PKT,
        },
        preamble_message_type,
        preamble_flags: PreambleFlags::empty(),
        preamble_version: PreambleVersion::V3,
        preamble_message_size: cast_length!("LicenseHeader", "preambleMessageSize", preamble_message_size)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdpgate_core::{decode, encode_vec};

    const LICENSE_HEADER_BUFFER: [u8; 8] = [
        0x80, 0x00, // flags
        0x00, 0x00, // flagsHi
        0xff, 0x03, 0x10, 0x00, // preamble
    ];

    const BLOB_BUFFER: [u8; 76] = [
        0x08, 0x00, // sig blob type
        0x48, 0x00, // sig blob len
        0xe9, 0xe1, 0xd6, 0x28, 0x46, 0x8b, 0x4e, 0xf5, 0x0a, 0xdf, 0xfd, 0xee, 0x21, 0x99, 0xac, 0xb4, 0xe1, 0x8f,
        0x5f, 0x81, 0x57, 0x82, 0xef, 0x9d, 0x96, 0x52, 0x63, 0x27, 0x18, 0x29, 0xdb, 0xb3, 0x4a, 0xfd, 0x9a, 0xda,
        0x42, 0xad, 0xb5, 0x69, 0x21, 0x89, 0x0e, 0x1d, 0xc0, 0x4c, 0x1a, 0xa8, 0xaa, 0x71, 0x3e, 0x0f, 0x54, 0xb9,
        0x9a, 0xe4, 0x99, 0x68, 0x3f, 0x6c, 0xd6, 0x76, 0x84, 0x61, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    const PLATFORM_CHALLENGE_BUFFER: [u8; 42] = [
        0x80, 0x00, // flags
        0x00, 0x00, // flagsHi
        0x02, 0x03, 0x26, 0x00, // preamble
        0x00, 0x00, 0x00, 0x00, // connect flags
        0x00, 0x00, // blob type, ignored
        0x0a, 0x00, // blob len
        0x46, 0x37, 0x85, 0x54, 0x8e, 0xc5, 0x91, 0x34, 0x97, 0x5d, // challenge
        0x38, 0x23, 0x62, 0x5d, 0x10, 0x8b, 0x93, 0xc3, 0xf1, 0xe4, 0x67, 0x1f, 0x4a, 0xb6, 0x00, 0x0a, // mac data
    ];

    const STATUS_VALID_CLIENT_BUFFER: [u8; 20] = [
        0x80, 0x00, // flags
        0x00, 0x00, // flagsHi
        0xff, 0x03, 0x10, 0x00, // preamble
        0x07, 0x00, 0x00, 0x00, // error code
        0x02, 0x00, 0x00, 0x00, // state transition
        0x04, 0x00, 0x00, 0x00, // error info blob
    ];

    fn license_header() -> LicenseHeader {
        LicenseHeader {
            security_header: BasicSecurityHeader {
                flags: BasicSecurityHeaderFlags::LICENSE_PKT,
            },
            preamble_message_type: PreambleType::ErrorAlert,
            preamble_flags: PreambleFlags::empty(),
            preamble_version: PreambleVersion::V3,
            preamble_message_size: 0x10,
        }
    }

    #[test]
    fn decode_license_header() {
        assert_eq!(decode::<LicenseHeader>(&LICENSE_HEADER_BUFFER).unwrap(), license_header());
    }

    #[test]
    fn encode_license_header() {
        let buffer = encode_vec(&license_header()).unwrap();
        assert_eq!(buffer, LICENSE_HEADER_BUFFER.as_ref());
    }

    #[test]
    fn license_header_size() {
        assert_eq!(license_header().size(), PREAMBLE_SIZE + BASIC_SECURITY_HEADER_SIZE);
    }

    #[test]
    fn decode_blob_header() {
        let blob = decode::<BlobHeader>(&BLOB_BUFFER).unwrap();
        assert_eq!(blob.blob_type, BlobType::RSA_SIGNATURE);
        assert_eq!(blob.length, BLOB_BUFFER.len() - 4);
    }

    #[test]
    fn decode_blob_header_preserves_unknown_type() {
        let mut buffer = BLOB_BUFFER;
        buffer[0] = 0x99;

        let header = decode::<BlobHeader>(&buffer).unwrap();
        assert_eq!(
            header,
            BlobHeader {
                blob_type: BlobType(0x99),
                length: 0x48,
            }
        );
    }

    #[test]
    fn encode_blob_header() {
        let blob = BlobHeader::new(BlobType::RSA_SIGNATURE, BLOB_BUFFER.len() - 4);
        let buffer = encode_vec(&blob).unwrap();

        assert_eq!(buffer.as_slice(), &BLOB_BUFFER[..4]);
    }

    #[test]
    fn mac_data_computes_correctly() {
        let mac_salt_key: [u8; 16] = [
            0x68, 0x1f, 0x7b, 0x26, 0x7e, 0x76, 0x0a, 0x24, 0x2d, 0x98, 0x07, 0xd6, 0x6b, 0x56, 0xc5, 0x01,
        ];

        let server_mac_data: [u8; 16] = [
            0x58, 0xaf, 0x1f, 0x30, 0xd6, 0x4e, 0xe8, 0x06, 0xfc, 0xf9, 0xe6, 0x68, 0x21, 0x64, 0x25, 0x3d,
        ];

        let decrypted_server_challenge: [u8; 10] = [0x54, 0x00, 0x45, 0x00, 0x53, 0x00, 0x54, 0x00, 0x00, 0x00];

        assert_eq!(
            compute_mac_data(mac_salt_key.as_ref(), decrypted_server_challenge.as_ref()),
            server_mac_data.as_ref()
        );
    }

    #[test]
    fn decode_platform_challenge_as_license_pdu() {
        let pdu = decode::<LicensePdu>(&PLATFORM_CHALLENGE_BUFFER).unwrap();

        match pdu {
            LicensePdu::ServerPlatformChallenge(challenge) => {
                assert_eq!(challenge.encrypted_platform_challenge.len(), 10);
                assert_eq!(challenge.mac_data.len(), MAC_SIZE);
            }
            _ => panic!("expected a platform challenge"),
        }
    }

    #[test]
    fn status_valid_client_decodes_as_error_message_variant() {
        let pdu = decode::<LicensePdu>(&STATUS_VALID_CLIENT_BUFFER).unwrap();

        assert_eq!(
            pdu,
            LicensingErrorMessage {
                license_header: license_header(),
                error_code: LicenseErrorCode::StatusValidClient,
                state_transition: LicensingStateTransition::NoTransition,
                error_info: Vec::new(),
            }
            .into()
        );
    }

    #[test]
    fn status_valid_client_round_trip() {
        let pdu = decode::<LicensePdu>(&STATUS_VALID_CLIENT_BUFFER).unwrap();
        let buffer = encode_vec(&pdu).unwrap();

        assert_eq!(buffer, STATUS_VALID_CLIENT_BUFFER.as_ref());
        assert_eq!(pdu.size(), STATUS_VALID_CLIENT_BUFFER.len());
    }
}
