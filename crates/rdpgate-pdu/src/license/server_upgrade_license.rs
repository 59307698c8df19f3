use rdpgate_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, Decode, Encode, PduResult, ReadCursor,
    WriteCursor,
};

use super::{
    compute_mac_data, BlobHeader, BlobType, LicenseEncryptionData, LicenseError, LicenseHeader, PreambleType,
    BLOB_LENGTH_SIZE, BLOB_TYPE_SIZE, MAC_SIZE, UTF16_NULL_TERMINATOR_SIZE, UTF8_NULL_TERMINATOR_SIZE,
};
use crate::crypto::Rc4;
use crate::utf16::{self, CharacterSet};

// version + 4 length fields
const LICENSE_INFO_STATIC_FIELDS_SIZE: usize = 20;

/// [2.2.2.6] Server Upgrade License (SERVER_UPGRADE_LICENSE), also carries a
/// Server New License since the two messages share their layout.
///
/// [2.2.2.6]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpele/e8339fbd-1fe3-42c2-a599-27c04407166d
#[derive(Debug, PartialEq, Eq)]
pub struct ServerUpgradeLicense {
    pub license_header: LicenseHeader,
    pub encrypted_license_info: Vec<u8>,
    pub mac_data: Vec<u8>,
}

impl ServerUpgradeLicense {
    const NAME: &'static str = "ServerUpgradeLicense";

    /// Checks the MAC of the decrypted license against the one sent by the
    /// server.
    pub fn verify_server_license(&self, encryption_data: &LicenseEncryptionData) -> Result<(), LicenseError> {
        let mut rc4 = Rc4::new(encryption_data.license_key.as_slice());
        let decrypted_license_info = rc4.process(self.encrypted_license_info.as_slice());
        let mac_data = compute_mac_data(encryption_data.mac_salt_key.as_slice(), decrypted_license_info.as_ref());

        if mac_data != self.mac_data {
            return Err(LicenseError::InvalidMacData);
        }

        Ok(())
    }

    /// Decrypts and decodes the issued license, ready to be persisted and
    /// replayed on the next connection.
    pub fn new_license_info(&self, encryption_data: &LicenseEncryptionData) -> PduResult<LicenseInformation> {
        let mut rc4 = Rc4::new(encryption_data.license_key.as_slice());
        let decrypted_license_info = rc4.process(self.encrypted_license_info.as_slice());

        let mut src = ReadCursor::new(&decrypted_license_info);
        LicenseInformation::decode(&mut src)
    }

    pub fn decode(license_header: LicenseHeader, src: &mut ReadCursor<'_>) -> PduResult<Self> {
        if license_header.preamble_message_type != PreambleType::UpgradeLicense
            && license_header.preamble_message_type != PreambleType::NewLicense
        {
            return Err(invalid_field_err(Self::NAME, "preambleType", "unexpected preamble type"));
        }

        let encrypted_license_info_blob = BlobHeader::decode(src)?;
        if encrypted_license_info_blob.blob_type != BlobType::ENCRYPTED_DATA {
            return Err(invalid_field_err(Self::NAME, "blobType", "unexpected blob type"));
        }

        ensure_size!(ctx: Self::NAME, in: src, size: encrypted_license_info_blob.length + MAC_SIZE);
        let encrypted_license_info = src.read_slice(encrypted_license_info_blob.length).into();
        let mac_data = src.read_slice(MAC_SIZE).into();

        Ok(Self {
            license_header,
            encrypted_license_info,
            mac_data,
        })
    }
}

impl Encode for ServerUpgradeLicense {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        self.license_header.encode(dst)?;
        BlobHeader::new(BlobType::ENCRYPTED_DATA, self.encrypted_license_info.len()).encode(dst)?;
        dst.write_slice(&self.encrypted_license_info);
        dst.write_slice(&self.mac_data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.license_header.size() + BLOB_TYPE_SIZE + BLOB_LENGTH_SIZE + self.encrypted_license_info.len() + MAC_SIZE
    }
}

/// [2.2.2.6.1] New License Information (NEW_LICENSE_INFO)
///
/// Identifies an issued license: the scope, company name and product id key
/// the license blob in the client's store.
///
/// [2.2.2.6.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpele/1d29a541-49a6-4ca9-80ae-9d425a20b9fb
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct LicenseInformation {
    pub version: u32,
    pub scope: String,
    pub company_name: String,
    pub product_id: String,
    pub license_info: Vec<u8>,
}

impl LicenseInformation {
    const NAME: &'static str = "LicenseInformation";

    const FIXED_PART_SIZE: usize = LICENSE_INFO_STATIC_FIELDS_SIZE;
}

impl Encode for LicenseInformation {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.version);

        dst.write_u32(cast_length!(
            Self::NAME,
            "cbScope",
            self.scope.len() + UTF8_NULL_TERMINATOR_SIZE
        )?);
        utf16::write_string_to_cursor(dst, &self.scope, CharacterSet::Ansi, true)?;

        dst.write_u32(cast_length!(
            Self::NAME,
            "cbCompanyName",
            utf16::encoded_str_len(&self.company_name, CharacterSet::Unicode, true)
        )?);
        utf16::write_string_to_cursor(dst, &self.company_name, CharacterSet::Unicode, true)?;

        dst.write_u32(cast_length!(
            Self::NAME,
            "cbProductId",
            utf16::encoded_str_len(&self.product_id, CharacterSet::Unicode, true)
        )?);
        utf16::write_string_to_cursor(dst, &self.product_id, CharacterSet::Unicode, true)?;

        dst.write_u32(cast_length!(Self::NAME, "cbLicenseInfo", self.license_info.len())?);
        dst.write_slice(self.license_info.as_slice());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
            + self.scope.len()
            + UTF8_NULL_TERMINATOR_SIZE
            + utf16::encoded_str_len(&self.company_name, CharacterSet::Unicode, true)
            + utf16::encoded_str_len(&self.product_id, CharacterSet::Unicode, true)
            + self.license_info.len()
    }
}

impl<'de> Decode<'de> for LicenseInformation {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let version = src.read_u32();

        let scope_len: usize = cast_length!(Self::NAME, "cbScope", src.read_u32())?;
        ensure_size!(in: src, size: scope_len);
        let scope = utf16::decode_string(src.read_slice(scope_len), CharacterSet::Ansi)?;

        ensure_size!(in: src, size: 4);
        let company_name_len: usize = cast_length!(Self::NAME, "cbCompanyName", src.read_u32())?;
        ensure_size!(in: src, size: company_name_len);
        let company_name = utf16::decode_string(src.read_slice(company_name_len), CharacterSet::Unicode)?;

        ensure_size!(in: src, size: 4);
        let product_id_len: usize = cast_length!(Self::NAME, "cbProductId", src.read_u32())?;
        ensure_size!(in: src, size: product_id_len);
        let product_id = utf16::decode_string(src.read_slice(product_id_len), CharacterSet::Unicode)?;

        ensure_size!(in: src, size: 4);
        let license_info_len: usize = cast_length!(Self::NAME, "cbLicenseInfo", src.read_u32())?;
        ensure_size!(in: src, size: license_info_len);
        let license_info = src.read_slice(license_info_len).into();

        Ok(Self {
            version,
            scope,
            company_name,
            product_id,
            license_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdpgate_core::{decode, encode_vec};

    fn license_information() -> LicenseInformation {
        LicenseInformation {
            version: 0x0006_0000,
            scope: "microsoft.com".to_owned(),
            company_name: "Microsoft Corporation".to_owned(),
            product_id: "A02".to_owned(),
            license_info: vec![0xAA; 16],
        }
    }

    #[test]
    fn license_information_round_trip() {
        let info = license_information();
        let buffer = encode_vec(&info).unwrap();

        assert_eq!(buffer.len(), info.size());
        assert_eq!(decode::<LicenseInformation>(&buffer).unwrap(), info);
    }

    #[test]
    fn new_license_info_decrypts_and_decodes() {
        let encryption_data = LicenseEncryptionData {
            premaster_secret: vec![0; 48],
            mac_salt_key: vec![0x11; 16],
            license_key: vec![0x22; 16],
        };

        let info = license_information();
        let plaintext = encode_vec(&info).unwrap();

        let encrypted_license_info = Rc4::new(&encryption_data.license_key).process(&plaintext);
        let mac_data = compute_mac_data(&encryption_data.mac_salt_key, &plaintext);

        let upgrade_license = ServerUpgradeLicense {
            license_header: super::super::new_license_header(
                PreambleType::UpgradeLicense,
                super::super::PREAMBLE_SIZE
                    + BLOB_TYPE_SIZE
                    + BLOB_LENGTH_SIZE
                    + encrypted_license_info.len()
                    + MAC_SIZE,
            )
            .unwrap(),
            encrypted_license_info,
            mac_data,
        };

        upgrade_license.verify_server_license(&encryption_data).unwrap();
        assert_eq!(upgrade_license.new_license_info(&encryption_data).unwrap(), info);
    }

    #[test]
    fn verify_server_license_rejects_tampered_mac() {
        let encryption_data = LicenseEncryptionData {
            premaster_secret: vec![0; 48],
            mac_salt_key: vec![0x11; 16],
            license_key: vec![0x22; 16],
        };

        let plaintext = encode_vec(&license_information()).unwrap();
        let encrypted_license_info = Rc4::new(&encryption_data.license_key).process(&plaintext);

        let upgrade_license = ServerUpgradeLicense {
            license_header: super::super::new_license_header(PreambleType::NewLicense, 0).unwrap(),
            encrypted_license_info,
            mac_data: vec![0; MAC_SIZE],
        };

        assert!(matches!(
            upgrade_license.verify_server_license(&encryption_data),
            Err(LicenseError::InvalidMacData)
        ));
    }
}
