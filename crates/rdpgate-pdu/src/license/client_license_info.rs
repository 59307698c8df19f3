use rdpgate_core::{ensure_size, invalid_field_err, Decode, Encode, PduResult, ReadCursor, WriteCursor};

use super::{
    compute_mac_data, derive_encryption_data, encrypt_with_public_key, new_license_header, BlobHeader, BlobType,
    LicenseEncryptionData, LicenseError, LicenseHeader, PreambleType, ServerLicenseRequest,
    CLIENT_HARDWARE_IDENTIFICATION_SIZE, KEY_EXCHANGE_ALGORITHM_RSA, MAC_SIZE, PLATFORM_ID, PREAMBLE_SIZE,
    RANDOM_NUMBER_SIZE,
};
use crate::crypto::Rc4;

// key exchange algorithm + platform id + 3 blob headers
const LICENSE_INFO_STATIC_FIELDS_SIZE: usize = 20;

/// [2.2.2.3] Client License Info (CLIENT_LICENSE_INFO)
///
/// Replays a license obtained during a previous connection instead of
/// requesting a new one.
///
/// [2.2.2.3]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpele/9407b2eb-f180-4827-9488-cdbff4a5d4ea
#[derive(Debug, PartialEq, Eq)]
pub struct ClientLicenseInfo {
    pub license_header: LicenseHeader,
    pub client_random: Vec<u8>,
    pub encrypted_premaster_secret: Vec<u8>,
    pub license_info: Vec<u8>,
    pub encrypted_hwid: Vec<u8>,
    pub mac_data: Vec<u8>,
}

impl ClientLicenseInfo {
    const NAME: &'static str = "ClientLicenseInfo";

    pub fn from_server_license_request(
        license_request: &ServerLicenseRequest,
        client_random: &[u8],
        premaster_secret: &[u8],
        hardware_data: [u32; 4],
        license_info: Vec<u8>,
    ) -> Result<(Self, LicenseEncryptionData), LicenseError> {
        let public_key = license_request
            .get_public_key()?
            .ok_or(LicenseError::NoServerCertificate)?;

        let encrypted_premaster_secret = encrypt_with_public_key(premaster_secret, &public_key)?;

        let encryption_data =
            derive_encryption_data(premaster_secret, client_random, license_request.server_random.as_slice());

        let mut hardware_id = Vec::with_capacity(CLIENT_HARDWARE_IDENTIFICATION_SIZE);
        hardware_id.extend_from_slice(&PLATFORM_ID.to_le_bytes());
        for data in hardware_data {
            hardware_id.extend_from_slice(&data.to_le_bytes());
        }

        let mut rc4 = Rc4::new(&encryption_data.license_key);
        let encrypted_hwid = rc4.process(&hardware_id);

        let mac_data = compute_mac_data(encryption_data.mac_salt_key.as_slice(), &hardware_id);

        let license_header = new_license_header(
            PreambleType::LicenseInfo,
            PREAMBLE_SIZE
                + LICENSE_INFO_STATIC_FIELDS_SIZE
                + RANDOM_NUMBER_SIZE
                + encrypted_premaster_secret.len()
                + license_info.len()
                + encrypted_hwid.len()
                + MAC_SIZE,
        )?;

        Ok((
            Self {
                license_header,
                client_random: Vec::from(client_random),
                encrypted_premaster_secret,
                license_info,
                encrypted_hwid,
                mac_data,
            },
            encryption_data,
        ))
    }

    pub fn decode(license_header: LicenseHeader, src: &mut ReadCursor<'_>) -> PduResult<Self> {
        if license_header.preamble_message_type != PreambleType::LicenseInfo {
            return Err(invalid_field_err(Self::NAME, "preambleType", "unexpected preamble type"));
        }

        ensure_size!(ctx: Self::NAME, in: src, size: 8 + RANDOM_NUMBER_SIZE);
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

        let license_info_blob_header = BlobHeader::decode(src)?;
        if license_info_blob_header.blob_type != BlobType::DATA {
            return Err(invalid_field_err(Self::NAME, "blobType", "invalid blob type"));
        }
        ensure_size!(ctx: Self::NAME, in: src, size: license_info_blob_header.length);
        let license_info = src.read_slice(license_info_blob_header.length).into();

        let encrypted_hwid_blob_header = BlobHeader::decode(src)?;
        if encrypted_hwid_blob_header.blob_type != BlobType::ENCRYPTED_DATA {
            return Err(invalid_field_err(Self::NAME, "blobType", "invalid blob type"));
        }
        ensure_size!(ctx: Self::NAME, in: src, size: encrypted_hwid_blob_header.length);
        let encrypted_hwid = src.read_slice(encrypted_hwid_blob_header.length).into();

        ensure_size!(ctx: Self::NAME, in: src, size: MAC_SIZE);
        let mac_data = src.read_slice(MAC_SIZE).into();

        Ok(Self {
            license_header,
            client_random,
            encrypted_premaster_secret,
            license_info,
            encrypted_hwid,
            mac_data,
        })
    }
}

impl Encode for ClientLicenseInfo {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        self.license_header.encode(dst)?;

        dst.write_u32(KEY_EXCHANGE_ALGORITHM_RSA);
        dst.write_u32(PLATFORM_ID);
        dst.write_slice(&self.client_random);

        BlobHeader::new(BlobType::RANDOM, self.encrypted_premaster_secret.len()).encode(dst)?;
        dst.write_slice(&self.encrypted_premaster_secret);

        BlobHeader::new(BlobType::DATA, self.license_info.len()).encode(dst)?;
        dst.write_slice(&self.license_info);

        BlobHeader::new(BlobType::ENCRYPTED_DATA, self.encrypted_hwid.len()).encode(dst)?;
        dst.write_slice(&self.encrypted_hwid);

        dst.write_slice(&self.mac_data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.license_header.size()
            + LICENSE_INFO_STATIC_FIELDS_SIZE
            + RANDOM_NUMBER_SIZE
            + self.encrypted_premaster_secret.len()
            + self.license_info.len()
            + self.encrypted_hwid.len()
            + MAC_SIZE
    }
}
