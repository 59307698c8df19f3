use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;

use rdpgate_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, Decode, Encode, PduResult, ReadCursor,
    WriteCursor,
};

use super::{
    compute_mac_data, new_license_header, BlobHeader, BlobType, LicenseEncryptionData, LicenseError, LicenseHeader,
    PreambleType, ServerPlatformChallenge, BLOB_LENGTH_SIZE, BLOB_TYPE_SIZE, CLIENT_HARDWARE_IDENTIFICATION_SIZE,
    MAC_SIZE, PLATFORM_ID, PREAMBLE_SIZE,
};
use crate::crypto::Rc4;

const RESPONSE_DATA_VERSION: u16 = 0x100;
const RESPONSE_DATA_STATIC_FIELDS_SIZE: usize = 8;

/// [2.2.2.5] Client Platform Challenge Response (CLIENT_PLATFORM_CHALLENGE_RESPONSE)
///
/// [2.2.2.5]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpele/f53ab87c-d07d-4bf9-a2ac-79542f7b456c
#[derive(Debug, PartialEq, Eq)]
pub struct ClientPlatformChallengeResponse {
    pub license_header: LicenseHeader,
    pub encrypted_challenge_response_data: Vec<u8>,
    pub encrypted_hwid: Vec<u8>,
    pub mac_data: Vec<u8>,
}

impl ClientPlatformChallengeResponse {
    const NAME: &'static str = "ClientPlatformChallengeResponse";

    pub fn from_server_platform_challenge(
        platform_challenge: &ServerPlatformChallenge,
        hardware_data: [u32; 4],
        encryption_data: &LicenseEncryptionData,
    ) -> Result<Self, LicenseError> {
        let mut rc4 = Rc4::new(&encryption_data.license_key);
        let decrypted_challenge = rc4.process(platform_challenge.encrypted_platform_challenge.as_slice());

        let decrypted_challenge_mac =
            compute_mac_data(encryption_data.mac_salt_key.as_slice(), decrypted_challenge.as_slice());

        if decrypted_challenge_mac != platform_challenge.mac_data {
            return Err(LicenseError::InvalidMacData);
        }

        let mut challenge_response_data =
            Vec::with_capacity(RESPONSE_DATA_STATIC_FIELDS_SIZE + decrypted_challenge.len());
        challenge_response_data.extend_from_slice(&RESPONSE_DATA_VERSION.to_le_bytes());
        challenge_response_data.extend_from_slice(&(ClientType::Other as u16).to_le_bytes());
        challenge_response_data.extend_from_slice(&(LicenseDetailLevel::Detail as u16).to_le_bytes());
        challenge_response_data.extend_from_slice(&(decrypted_challenge.len() as u16).to_le_bytes());
        challenge_response_data.extend_from_slice(&decrypted_challenge);

        let mut hardware_id = Vec::with_capacity(CLIENT_HARDWARE_IDENTIFICATION_SIZE);
        hardware_id.extend_from_slice(&PLATFORM_ID.to_le_bytes());
        for data in hardware_data {
            hardware_id.extend_from_slice(&data.to_le_bytes());
        }

        let mut rc4 = Rc4::new(&encryption_data.license_key);
        let encrypted_hwid = rc4.process(&hardware_id);

        let mut rc4 = Rc4::new(&encryption_data.license_key);
        let encrypted_challenge_response_data = rc4.process(&challenge_response_data);

        // The MAC covers the decrypted response data followed by the hardware id
        challenge_response_data.extend(&hardware_id);
        let mac_data = compute_mac_data(
            encryption_data.mac_salt_key.as_slice(),
            challenge_response_data.as_slice(),
        );

        let license_header = new_license_header(
            PreambleType::PlatformChallengeResponse,
            PREAMBLE_SIZE
                + (BLOB_TYPE_SIZE + BLOB_LENGTH_SIZE) * 2
                + encrypted_challenge_response_data.len()
                + encrypted_hwid.len()
                + MAC_SIZE,
        )?;

        Ok(Self {
            license_header,
            encrypted_challenge_response_data,
            encrypted_hwid,
            mac_data,
        })
    }

    pub fn decode(license_header: LicenseHeader, src: &mut ReadCursor<'_>) -> PduResult<Self> {
        if license_header.preamble_message_type != PreambleType::PlatformChallengeResponse {
            return Err(invalid_field_err(Self::NAME, "preambleType", "unexpected preamble type"));
        }

        let encrypted_challenge_blob = BlobHeader::decode(src)?;
        if encrypted_challenge_blob.blob_type != BlobType::ENCRYPTED_DATA {
            return Err(invalid_field_err(Self::NAME, "blobType", "unexpected blob type"));
        }
        ensure_size!(ctx: Self::NAME, in: src, size: encrypted_challenge_blob.length);
        let encrypted_challenge_response_data = src.read_slice(encrypted_challenge_blob.length).into();

        let encrypted_hwid_blob = BlobHeader::decode(src)?;
        if encrypted_hwid_blob.blob_type != BlobType::ENCRYPTED_DATA {
            return Err(invalid_field_err(Self::NAME, "blobType", "unexpected blob type"));
        }
        ensure_size!(ctx: Self::NAME, in: src, size: encrypted_hwid_blob.length);
        let encrypted_hwid = src.read_slice(encrypted_hwid_blob.length).into();

        ensure_size!(ctx: Self::NAME, in: src, size: MAC_SIZE);
        let mac_data = src.read_slice(MAC_SIZE).into();

        Ok(Self {
            license_header,
            encrypted_challenge_response_data,
            encrypted_hwid,
            mac_data,
        })
    }
}

impl Encode for ClientPlatformChallengeResponse {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        self.license_header.encode(dst)?;

        BlobHeader::new(BlobType::ENCRYPTED_DATA, self.encrypted_challenge_response_data.len()).encode(dst)?;
        dst.write_slice(&self.encrypted_challenge_response_data);

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
            + (BLOB_TYPE_SIZE + BLOB_LENGTH_SIZE) * 2
            + self.encrypted_challenge_response_data.len()
            + self.encrypted_hwid.len()
            + MAC_SIZE
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ClientType {
    Win32 = 0x0100,
    Win16 = 0x0200,
    WinCe = 0x0300,
    Other = 0xff00,
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum LicenseDetailLevel {
    Simple = 1,
    Moderate = 2,
    Detail = 3,
}

/// Decrypted body of the challenge response blob.
#[derive(Debug, PartialEq, Eq)]
pub struct PlatformChallengeResponseData {
    pub client_type: ClientType,
    pub license_detail_level: LicenseDetailLevel,
    pub challenge: Vec<u8>,
}

impl PlatformChallengeResponseData {
    const NAME: &'static str = "PlatformChallengeResponseData";

    const FIXED_PART_SIZE: usize = RESPONSE_DATA_STATIC_FIELDS_SIZE;
}

impl Encode for PlatformChallengeResponseData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(RESPONSE_DATA_VERSION);
        dst.write_u16(self.client_type as u16);
        dst.write_u16(self.license_detail_level as u16);
        dst.write_u16(cast_length!(Self::NAME, "cbChallenge", self.challenge.len())?);
        dst.write_slice(&self.challenge);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.challenge.len()
    }
}

impl<'de> Decode<'de> for PlatformChallengeResponseData {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let version = src.read_u16();
        if version != RESPONSE_DATA_VERSION {
            return Err(invalid_field_err(
                Self::NAME,
                "wVersion",
                "invalid challenge response version",
            ));
        }

        let client_type = ClientType::from_u16(src.read_u16())
            .ok_or_else(|| invalid_field_err(Self::NAME, "wClientType", "invalid client type"))?;

        let license_detail_level = LicenseDetailLevel::from_u16(src.read_u16())
            .ok_or_else(|| invalid_field_err(Self::NAME, "wLicenseDetailLevel", "invalid license detail level"))?;

        let challenge_len: usize = cast_length!(Self::NAME, "cbChallenge", src.read_u16())?;
        ensure_size!(in: src, size: challenge_len);
        let challenge = src.read_slice(challenge_len).into();

        Ok(Self {
            client_type,
            license_detail_level,
            challenge,
        })
    }
}
