use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;

use rdpgate_core::{ensure_size, invalid_field_err, Decode, Encode, PduResult, ReadCursor, WriteCursor};

use super::{
    new_license_header, BlobHeader, BlobType, LicenseHeader, PreambleType, BLOB_LENGTH_SIZE, BLOB_TYPE_SIZE,
    PREAMBLE_SIZE,
};

const ERROR_CODE_SIZE: usize = 4;
const STATE_TRANSITION_SIZE: usize = 4;

/// [2.2.1.12.1.3] Licensing Error Message (LICENSE_ERROR_MESSAGE)
///
/// Despite the name this message is not always an error: the server sends
/// STATUS_VALID_CLIENT to signal that no license exchange is needed.
///
/// [2.2.1.12.1.3]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/f18b6c9f-f3d8-4a0e-8398-f9b153233dca
#[derive(Debug, PartialEq, Eq)]
pub struct LicensingErrorMessage {
    pub license_header: LicenseHeader,
    pub error_code: LicenseErrorCode,
    pub state_transition: LicensingStateTransition,
    pub error_info: Vec<u8>,
}

impl LicensingErrorMessage {
    const NAME: &'static str = "LicensingErrorMessage";

    const FIXED_PART_SIZE: usize = ERROR_CODE_SIZE + STATE_TRANSITION_SIZE + BLOB_TYPE_SIZE + BLOB_LENGTH_SIZE;

    /// Builds the STATUS_VALID_CLIENT message a server sends to skip the
    /// license exchange.
    pub fn new_status_valid_client() -> PduResult<Self> {
        let license_header = new_license_header(PreambleType::ErrorAlert, PREAMBLE_SIZE + Self::FIXED_PART_SIZE)?;

        Ok(Self {
            license_header,
            error_code: LicenseErrorCode::StatusValidClient,
            state_transition: LicensingStateTransition::NoTransition,
            error_info: Vec::new(),
        })
    }

    pub fn decode(license_header: LicenseHeader, src: &mut ReadCursor<'_>) -> PduResult<Self> {
        if license_header.preamble_message_type != PreambleType::ErrorAlert {
            return Err(invalid_field_err(Self::NAME, "preambleType", "unexpected preamble type"));
        }

        ensure_size!(ctx: Self::NAME, in: src, size: ERROR_CODE_SIZE + STATE_TRANSITION_SIZE);
        let error_code = LicenseErrorCode::from_u32(src.read_u32())
            .ok_or_else(|| invalid_field_err(Self::NAME, "dwErrorCode", "invalid error code"))?;
        let state_transition = LicensingStateTransition::from_u32(src.read_u32())
            .ok_or_else(|| invalid_field_err(Self::NAME, "dwStateTransition", "invalid state transition"))?;

        let error_info_blob = BlobHeader::decode(src)?;
        if error_info_blob.blob_type != BlobType::ERROR {
            return Err(invalid_field_err(Self::NAME, "blobType", "invalid blob type"));
        }
        ensure_size!(ctx: Self::NAME, in: src, size: error_info_blob.length);
        let error_info = src.read_slice(error_info_blob.length).into();

        Ok(Self {
            license_header,
            error_code,
            state_transition,
            error_info,
        })
    }
}

impl Encode for LicensingErrorMessage {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        self.license_header.encode(dst)?;

        dst.write_u32(self.error_code as u32);
        dst.write_u32(self.state_transition as u32);

        BlobHeader::new(BlobType::ERROR, self.error_info.len()).encode(dst)?;
        dst.write_slice(&self.error_info);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.license_header.size() + Self::FIXED_PART_SIZE + self.error_info.len()
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum LicenseErrorCode {
    InvalidServerCertificate = 0x01,
    NoLicense = 0x02,
    InvalidMac = 0x03,
    InvalidScope = 0x04,
    NoLicenseServer = 0x06,
    StatusValidClient = 0x07,
    InvalidClient = 0x08,
    InvalidProductId = 0x0b,
    InvalidMessageLen = 0x0c,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum LicensingStateTransition {
    TotalAbort = 1,
    NoTransition = 2,
    ResetPhaseToStart = 3,
    ResendLastMessage = 4,
}
