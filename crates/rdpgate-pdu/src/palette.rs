//! Palette update data for the fast-path Palette update code.

use rdpgate_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, read_padding, write_padding, Decode, Encode,
    PduResult, ReadCursor, WriteCursor,
};

const UPDATE_TYPE_PALETTE: u16 = 0x0002;
const MAX_PALETTE_COLORS: usize = 256;

/// [2.2.9.1.1.3.1.1.1] Palette Update Data (TS_UPDATE_PALETTE_DATA)
///
/// [2.2.9.1.1.3.1.1.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/18b71c72-cc6b-4cf8-8db3-d07e4b212e56
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteUpdateData {
    pub entries: Vec<PaletteEntry>,
}

impl PaletteUpdateData {
    const NAME: &'static str = "PaletteUpdateData";
    const FIXED_PART_SIZE: usize = 2 /* updateType */ + 2 /* pad2Octets */ + 4 /* numberColors */;
}

impl Encode for PaletteUpdateData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(UPDATE_TYPE_PALETTE);
        write_padding(dst, 2);
        dst.write_u32(cast_length!("numberColors", self.entries.len())?);

        for entry in &self.entries {
            entry.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.entries.len() * PaletteEntry::FIXED_PART_SIZE
    }
}

impl Decode<'_> for PaletteUpdateData {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let update_type = src.read_u16();
        if update_type != UPDATE_TYPE_PALETTE {
            return Err(invalid_field_err!("updateType", "invalid palette update type"));
        }

        read_padding(src, 2);

        let number_colors = src.read_u32() as usize;
        if number_colors > MAX_PALETTE_COLORS {
            return Err(invalid_field_err!("numberColors", "too many palette entries"));
        }

        ensure_size!(in: src, size: number_colors * PaletteEntry::FIXED_PART_SIZE);

        let entries = (0..number_colors)
            .map(|_| PaletteEntry::decode(src))
            .collect::<PduResult<Vec<_>>>()?;

        Ok(Self { entries })
    }
}

/// [2.2.9.1.1.3.1.1.2] Palette Entry (TS_PALETTE_ENTRY)
///
/// [2.2.9.1.1.3.1.1.2]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/03597285-b31e-4041-b543-70f43a4a9307
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteEntry {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl PaletteEntry {
    const NAME: &'static str = "PaletteEntry";
    const FIXED_PART_SIZE: usize = 1 /* red */ + 1 /* green */ + 1 /* blue */;
}

impl Encode for PaletteEntry {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u8(self.red);
        dst.write_u8(self.green);
        dst.write_u8(self.blue);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl Decode<'_> for PaletteEntry {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let red = src.read_u8();
        let green = src.read_u8();
        let blue = src.read_u8();

        Ok(Self { red, green, blue })
    }
}

#[cfg(test)]
mod tests {
    use rdpgate_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn palette_update_round_trip() {
        let buffer = [
            0x02, 0x00, // updateType
            0x00, 0x00, // pad2Octets
            0x02, 0x00, 0x00, 0x00, // numberColors
            0x10, 0x20, 0x30, // entry 0
            0x40, 0x50, 0x60, // entry 1
        ];

        let update = decode::<PaletteUpdateData>(&buffer).unwrap();

        assert_eq!(
            update.entries,
            vec![
                PaletteEntry {
                    red: 0x10,
                    green: 0x20,
                    blue: 0x30
                },
                PaletteEntry {
                    red: 0x40,
                    green: 0x50,
                    blue: 0x60
                },
            ]
        );
        assert_eq!(encode_vec(&update).unwrap(), buffer);
    }

    #[test]
    fn palette_update_rejects_oversized_color_count() {
        let buffer = [
            0x02, 0x00, // updateType
            0x00, 0x00, // pad2Octets
            0x01, 0x01, 0x00, 0x00, // numberColors: 257
        ];

        assert!(decode::<PaletteUpdateData>(&buffer).is_err());
    }
}
