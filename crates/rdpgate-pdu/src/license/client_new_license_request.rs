use bitflags::bitflags;

use rdpgate_core::{ensure_size, invalid_field_err, Decode, Encode, PduResult, ReadCursor, WriteCursor};

use super::{
    derive_encryption_data, encrypt_with_public_key, new_license_header, BlobHeader, BlobType, LicenseEncryptionData,
    LicenseError, LicenseHeader, PreambleType, KEY_EXCHANGE_ALGORITHM_RSA, PREAMBLE_SIZE, RANDOM_NUMBER_SIZE,
    UTF8_NULL_TERMINATOR_SIZE,
};
use crate::utf16::{self, CharacterSet};

// key exchange algorithm + platform id + 3 blob headers
const LICENSE_REQUEST_STATIC_FIELDS_SIZE: usize = 20;

pub const PLATFORM_ID: u32 = ClientOsType::NT_POST_52.bits() | Isv::MICROSOFT.bits();

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ClientOsType: u32 {
        const NT_351 = 0x100_0000;
        const NT_40 = 0x200_0000;
        const NT_50 = 0x300_0000;
        const NT_POST_52 = 0x400_0000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Isv: u32 {
        const MICROSOFT = 0x10000;
        const CITRIX = 0x20000;
    }
}

/// [2.2.2.2] Client New License Request (CLIENT_NEW_LICENSE_REQUEST)
///
/// [2.2.2.2]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpele/c57e4890-9049-421e-9fe8-9a6f9519675a
#[derive(Debug, PartialEq, Eq)]
pub struct ClientNewLicenseRequest {
    pub license_header: LicenseHeader,
    pub client_random: Vec<u8>,
    pub encrypted_premaster_secret: Vec<u8>,
    pub client_username: String,
    pub client_machine_name: String,
}

impl ClientNewLicenseRequest {
    const NAME: &'static str = "ClientNewLicenseRequest";

    pub fn from_server_license_request(
        license_request: &super::ServerLicenseRequest,
        client_random: &[u8],
        premaster_secret: &[u8],
        client_username: &str,
        client_machine_name: &str,
    ) -> Result<(Self, LicenseEncryptionData), LicenseError> {
        let public_key = license_request
            .get_public_key()?
            .ok_or(LicenseError::NoServerCertificate)?;

        let encrypted_premaster_secret = encrypt_with_public_key(premaster_secret, &public_key)?;

        let encryption_data =
            derive_encryption_data(premaster_secret, client_random, license_request.server_random.as_slice());

        let license_header = new_license_header(
            PreambleType::NewLicenseRequest,
            PREAMBLE_SIZE
                + LICENSE_REQUEST_STATIC_FIELDS_SIZE
                + RANDOM_NUMBER_SIZE
                + encrypted_premaster_secret.len()
                + client_username.len()
                + UTF8_NULL_TERMINATOR_SIZE
                + client_machine_name.len()
                + UTF8_NULL_TERMINATOR_SIZE,
        )?;

        Ok((
            Self {
                license_header,
                client_random: Vec::from(client_random),
                encrypted_premaster_secret,
                client_username: client_username.to_owned(),
                client_machine_name: client_machine_name.to_owned(),
            },
            encryption_data,
        ))
    }

    pub fn decode(license_header: LicenseHeader, src: &mut ReadCursor<'_>) -> PduResult<Self> {
        if license_header.preamble_message_type != PreambleType::NewLicenseRequest {
            return Err(invalid_field_err(Self::NAME, "preambleType", "unexpected preamble type"));
        }

        ensure_size!(ctx: Self::NAME, in: src, size: LICENSE_REQUEST_STATIC_FIELDS_SIZE + RANDOM_NUMBER_SIZE);
        let key_exchange_algorithm = src.read_u32();
        if key_exchange_algorithm != KEY_EXCHANGE_ALGORITHM_RSA {
            return Err(invalid_field_err(
                Self::NAME,
                "keyExchangeAlgorithm",
                "invalid key exchange algorithm",
            ));
        }

        let _platform_id = src.read_u32();
        let client_random = src.read_slice(RANDOM_NUMBER_SIZE).into();

        let premaster_secret_blob_header = BlobHeader::decode(src)?;
        if premaster_secret_blob_header.blob_type != BlobType::RANDOM {
            return Err(invalid_field_err(Self::NAME, "blobType", "invalid blob type"));
        }
        ensure_size!(ctx: Self::NAME, in: src, size: premaster_secret_blob_header.length);
        let encrypted_premaster_secret = src.read_slice(premaster_secret_blob_header.length).into();

        let username_blob_header = BlobHeader::decode(src)?;
        if username_blob_header.blob_type != BlobType::CLIENT_USER_NAME {
            return Err(invalid_field_err(Self::NAME, "blobType", "invalid blob type"));
        }
        ensure_size!(ctx: Self::NAME, in: src, size: username_blob_header.length);
        let client_username = utf16::decode_string(src.read_slice(username_blob_header.length), CharacterSet::Ansi)?;

        let machine_name_blob_header = BlobHeader::decode(src)?;
        if machine_name_blob_header.blob_type != BlobType::CLIENT_MACHINE_NAME_BLOB {
            return Err(invalid_field_err(Self::NAME, "blobType", "invalid blob type"));
        }
        ensure_size!(ctx: Self::NAME, in: src, size: machine_name_blob_header.length);
        let client_machine_name =
            utf16::decode_string(src.read_slice(machine_name_blob_header.length), CharacterSet::Ansi)?;

        Ok(Self {
            license_header,
            client_random,
            encrypted_premaster_secret,
            client_username,
            client_machine_name,
        })
    }
}

impl Encode for ClientNewLicenseRequest {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        self.license_header.encode(dst)?;

        dst.write_u32(KEY_EXCHANGE_ALGORITHM_RSA);
        dst.write_u32(PLATFORM_ID);
        dst.write_slice(&self.client_random);

        BlobHeader::new(BlobType::RANDOM, self.encrypted_premaster_secret.len()).encode(dst)?;
        dst.write_slice(&self.encrypted_premaster_secret);

        BlobHeader::new(
            BlobType::CLIENT_USER_NAME,
            self.client_username.len() + UTF8_NULL_TERMINATOR_SIZE,
        )
        .encode(dst)?;
        utf16::write_string_to_cursor(dst, &self.client_username, CharacterSet::Ansi, true)?;

        BlobHeader::new(
            BlobType::CLIENT_MACHINE_NAME_BLOB,
            self.client_machine_name.len() + UTF8_NULL_TERMINATOR_SIZE,
        )
        .encode(dst)?;
        utf16::write_string_to_cursor(dst, &self.client_machine_name, CharacterSet::Ansi, true)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.license_header.size()
            + LICENSE_REQUEST_STATIC_FIELDS_SIZE
            + RANDOM_NUMBER_SIZE
            + self.encrypted_premaster_secret.len()
            + self.client_username.len()
            + UTF8_NULL_TERMINATOR_SIZE
            + self.client_machine_name.len()
            + UTF8_NULL_TERMINATOR_SIZE
    }
}
