//! Bitmap update data for the fast-path Bitmap update code.

use std::fmt;

use bitflags::bitflags;

use rdpgate_core::{
    ensure_fixed_part_size, ensure_size, invalid_field_err, Decode, Encode, PduResult, ReadCursor, WriteCursor,
};

use crate::geometry::InclusiveRectangle;

const FIRST_ROW_SIZE_VALUE: u16 = 0;

/// [2.2.9.1.1.3.1.2.1] Bitmap Update Data (TS_UPDATE_BITMAP_DATA)
///
/// [2.2.9.1.1.3.1.2.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/afae97bd-e34c-4a1d-8420-d428863479a9
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapUpdateData<'a> {
    pub rectangles: Vec<BitmapData<'a>>,
}

impl BitmapUpdateData<'_> {
    const NAME: &'static str = "BitmapUpdateData";
    const FIXED_PART_SIZE: usize = 2 /* updateType */ + 2 /* numberRectangles */;
}

impl Encode for BitmapUpdateData<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        if self.rectangles.len() > u16::MAX as usize {
            return Err(invalid_field_err!("numberRectangles", "rectangle count is too big"));
        }

        dst.write_u16(BitmapFlags::BITMAP_UPDATE_TYPE.bits());
        dst.write_u16(self.rectangles.len() as u16);

        for bitmap_data in self.rectangles.iter() {
            bitmap_data.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.rectangles
            .iter()
            .fold(Self::FIXED_PART_SIZE, |size, data| size + data.size())
    }
}

impl<'de> Decode<'de> for BitmapUpdateData<'de> {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let update_type = BitmapFlags::from_bits_truncate(src.read_u16());
        if !update_type.contains(BitmapFlags::BITMAP_UPDATE_TYPE) {
            return Err(invalid_field_err!("updateType", "invalid update type"));
        }

        let rectangles_number = usize::from(src.read_u16());
        let mut rectangles = Vec::with_capacity(rectangles_number);

        for _ in 0..rectangles_number {
            rectangles.push(BitmapData::decode(src)?);
        }

        Ok(Self { rectangles })
    }
}

/// [2.2.9.1.1.3.1.2.2] Bitmap Data (TS_BITMAP_DATA)
///
/// [2.2.9.1.1.3.1.2.2]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/84a3d4d2-5523-4e49-9a48-33952c559485
#[derive(Clone, PartialEq, Eq)]
pub struct BitmapData<'a> {
    pub rectangle: InclusiveRectangle,
    pub width: u16,
    pub height: u16,
    pub bits_per_pixel: u16,
    pub compression_flags: Compression,
    pub compressed_data_header: Option<CompressedDataHeader>,
    pub bitmap_data: &'a [u8],
}

impl BitmapData<'_> {
    const NAME: &'static str = "BitmapData";
    const FIXED_PART_SIZE: usize = InclusiveRectangle::ENCODED_SIZE
        + 2 /* width */ + 2 /* height */ + 2 /* bitsPerPixel */ + 2 /* flags */ + 2 /* bitmapLength */;

    fn encoded_bitmap_data_length(&self) -> usize {
        self.bitmap_data.len()
            + self
                .compressed_data_header
                .as_ref()
                .map(|header| header.size())
                .unwrap_or(0)
    }
}

impl Encode for BitmapData<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        let encoded_bitmap_data_length = self.encoded_bitmap_data_length();
        if encoded_bitmap_data_length > u16::MAX as usize {
            return Err(invalid_field_err!("bitmapLength", "bitmap data length is too big"));
        }

        self.rectangle.encode(dst)?;
        dst.write_u16(self.width);
        dst.write_u16(self.height);
        dst.write_u16(self.bits_per_pixel);
        dst.write_u16(self.compression_flags.bits());
        dst.write_u16(encoded_bitmap_data_length as u16);
        if let Some(compressed_data_header) = &self.compressed_data_header {
            compressed_data_header.encode(dst)?;
        }
        dst.write_slice(self.bitmap_data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.encoded_bitmap_data_length()
    }
}

impl<'de> Decode<'de> for BitmapData<'de> {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let rectangle = InclusiveRectangle::decode(src)?;
        let width = src.read_u16();
        let height = src.read_u16();
        let bits_per_pixel = src.read_u16();
        let compression_flags = Compression::from_bits_truncate(src.read_u16());

        // Counts both the compressed data header (when present) and the
        // bitmap data stream.
        let encoded_bitmap_data_length = usize::from(src.read_u16());

        ensure_size!(in: src, size: encoded_bitmap_data_length);

        let (compressed_data_header, buffer_length) = if compression_flags.contains(Compression::BITMAP_COMPRESSION)
            && !compression_flags.contains(Compression::NO_BITMAP_COMPRESSION_HDR)
        {
            if encoded_bitmap_data_length < CompressedDataHeader::ENCODED_SIZE {
                return Err(invalid_field_err!(
                    "bitmapLength",
                    "length is smaller than the compressed data header"
                ));
            }

            let buffer_length = encoded_bitmap_data_length - CompressedDataHeader::ENCODED_SIZE;
            (Some(CompressedDataHeader::decode(src)?), buffer_length)
        } else {
            (None, encoded_bitmap_data_length)
        };

        let bitmap_data = src.read_slice(buffer_length);

        Ok(BitmapData {
            rectangle,
            width,
            height,
            bits_per_pixel,
            compression_flags,
            compressed_data_header,
            bitmap_data,
        })
    }
}

impl fmt::Debug for BitmapData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitmapData")
            .field("rectangle", &self.rectangle)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bits_per_pixel", &self.bits_per_pixel)
            .field("compression_flags", &self.compression_flags)
            .field("compressed_data_header", &self.compressed_data_header)
            .field("bitmap_data.len()", &self.bitmap_data.len())
            .finish()
    }
}

/// [2.2.9.1.1.3.1.2.3] Compressed Data Header (TS_CD_HEADER)
///
/// [2.2.9.1.1.3.1.2.3]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/f7d1fb4b-4c87-4318-b3a1-c9d7b4e77a5e
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedDataHeader {
    pub main_body_size: u16,
    pub scan_width: u16,
    pub uncompressed_size: u16,
}

impl CompressedDataHeader {
    const NAME: &'static str = "CompressedDataHeader";
    const FIXED_PART_SIZE: usize = 2 /* firstRowSize */ + 2 /* mainBodySize */ + 2 /* scanWidth */ + 2 /* uncompressedSize */;

    pub const ENCODED_SIZE: usize = Self::FIXED_PART_SIZE;
}

impl Encode for CompressedDataHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        if self.scan_width % 4 != 0 {
            return Err(invalid_field_err!("cbScanWidth", "bitmap width must be divisible by 4"));
        }

        dst.write_u16(FIRST_ROW_SIZE_VALUE);
        dst.write_u16(self.main_body_size);
        dst.write_u16(self.scan_width);
        dst.write_u16(self.uncompressed_size);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl Decode<'_> for CompressedDataHeader {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let size = src.read_u16();
        if size != FIRST_ROW_SIZE_VALUE {
            return Err(invalid_field_err!("cbCompFirstRowSize", "invalid first row size"));
        }

        let main_body_size = src.read_u16();
        let scan_width = src.read_u16();
        if scan_width % 4 != 0 {
            return Err(invalid_field_err!("cbScanWidth", "bitmap width must be divisible by 4"));
        }

        let uncompressed_size = src.read_u16();

        Ok(Self {
            main_body_size,
            scan_width,
            uncompressed_size,
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct BitmapFlags: u16 {
        const BITMAP_UPDATE_TYPE = 0x0001;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Compression: u16 {
        const BITMAP_COMPRESSION = 0x0001;
        const NO_BITMAP_COMPRESSION_HDR = 0x0400;
    }
}

#[cfg(test)]
mod tests {
    use rdpgate_core::{decode, encode_vec};

    use super::*;

    fn bitmap_update_buffer() -> Vec<u8> {
        let mut buffer = vec![
            0x01, 0x00, // updateType
            0x01, 0x00, // numberRectangles
            0x00, 0x00, 0x00, 0x00, 0x0f, 0x00, 0x0f, 0x00, // destination rectangle
            0x10, 0x00, // width
            0x10, 0x00, // height
            0x20, 0x00, // bitsPerPixel
            0x00, 0x04, // flags: NO_BITMAP_COMPRESSION_HDR
            0x08, 0x00, // bitmapLength
        ];
        buffer.extend_from_slice(&[0xFF; 8]);
        buffer
    }

    #[test]
    fn bitmap_update_round_trip() {
        let buffer = bitmap_update_buffer();
        let update = decode::<BitmapUpdateData<'_>>(&buffer).unwrap();

        assert_eq!(update.rectangles.len(), 1);
        assert_eq!(update.rectangles[0].width, 16);
        assert_eq!(update.rectangles[0].compressed_data_header, None);
        assert_eq!(update.rectangles[0].bitmap_data, &[0xFF; 8][..]);
        assert_eq!(encode_vec(&update).unwrap(), buffer);
    }

    #[test]
    fn bitmap_data_with_compressed_header() {
        let mut buffer = vec![
            0x00, 0x00, 0x00, 0x00, 0x0f, 0x00, 0x0f, 0x00, // destination rectangle
            0x10, 0x00, // width
            0x10, 0x00, // height
            0x10, 0x00, // bitsPerPixel
            0x01, 0x00, // flags: BITMAP_COMPRESSION
            0x0c, 0x00, // bitmapLength: 8-byte header + 4 bytes of data
            0x00, 0x00, // cbCompFirstRowSize
            0x04, 0x00, // cbCompMainBodySize
            0x20, 0x00, // cbScanWidth
            0x00, 0x02, // cbUncompressedSize
        ];
        buffer.extend_from_slice(&[0xAB; 4]);

        let data = decode::<BitmapData<'_>>(&buffer).unwrap();

        assert_eq!(
            data.compressed_data_header,
            Some(CompressedDataHeader {
                main_body_size: 4,
                scan_width: 32,
                uncompressed_size: 512,
            })
        );
        assert_eq!(data.bitmap_data, &[0xAB; 4][..]);
        assert_eq!(encode_vec(&data).unwrap(), buffer);
    }

    #[test]
    fn bitmap_update_rejects_wrong_update_type() {
        let mut buffer = bitmap_update_buffer();
        buffer[0] = 0x02;

        assert!(decode::<BitmapUpdateData<'_>>(&buffer).is_err());
    }
}
