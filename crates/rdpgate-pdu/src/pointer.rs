//! Pointer shape and position updates carried over the fast path.

use rdpgate_core::{
    ensure_fixed_part_size, ensure_size, invalid_field_err, Decode, Encode, PduResult, ReadCursor, WriteCursor,
};

/// [2.2.9.1.1.4.1] Point (TS_POINT16)
///
/// [2.2.9.1.1.4.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/86b14cd1-f122-43f1-a51c-527971b8b951
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point16 {
    pub x: u16,
    pub y: u16,
}

impl Point16 {
    const NAME: &'static str = "Point16";
    const FIXED_PART_SIZE: usize = 2 /* x */ + 2 /* y */;
}

impl Encode for Point16 {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.x);
        dst.write_u16(self.y);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl Decode<'_> for Point16 {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let x = src.read_u16();
        let y = src.read_u16();

        Ok(Self { x, y })
    }
}

/// TS_POINTERPOSATTRIBUTE shares the TS_POINT16 layout.
pub type PointerPositionAttribute = Point16;

/// [2.2.9.1.1.4.4] Color Pointer Update (TS_COLORPOINTERATTRIBUTE)
///
/// [2.2.9.1.1.4.4]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/2d122191-af10-4e36-a781-381e91c182b7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorPointerAttribute<'a> {
    pub cache_index: u16,
    pub hot_spot: Point16,
    pub width: u16,
    pub height: u16,
    pub xor_mask: &'a [u8],
    pub and_mask: &'a [u8],
}

impl ColorPointerAttribute<'_> {
    const NAME: &'static str = "ColorPointerAttribute";
    const FIXED_PART_SIZE: usize = 2 /* cacheIndex */ + Point16::FIXED_PART_SIZE + 2 /* width */ + 2 /* height */
        + 2 /* lengthAndMask */ + 2 /* lengthXorMask */;

    fn check_masks_alignment(and_mask: &[u8], xor_mask: &[u8], pointer_height: u16, large_ptr: bool) -> PduResult<()> {
        let check_mask = |mask: &[u8], field: &'static str| {
            if pointer_height == 0 {
                return Err(invalid_field_err!(field, "pointer height cannot be zero"));
            }
            if large_ptr && mask.len() > u32::MAX as usize {
                return Err(invalid_field_err!(field, "pointer mask is too big for u32 size"));
            }
            if !large_ptr && mask.len() > u16::MAX as usize {
                return Err(invalid_field_err!(field, "pointer mask is too big for u16 size"));
            }
            if mask.len() % usize::from(pointer_height) != 0 {
                return Err(invalid_field_err!(field, "pointer mask has incomplete scanlines"));
            }
            if (mask.len() / usize::from(pointer_height)) % 2 != 0 {
                return Err(invalid_field_err!(field, "pointer mask scanlines must be 16-bit aligned"));
            }
            Ok(())
        };

        check_mask(and_mask, "lengthAndMask")?;
        check_mask(xor_mask, "lengthXorMask")
    }
}

impl Encode for ColorPointerAttribute<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        Self::check_masks_alignment(self.and_mask, self.xor_mask, self.height, false)?;

        dst.write_u16(self.cache_index);
        self.hot_spot.encode(dst)?;
        dst.write_u16(self.width);
        dst.write_u16(self.height);

        dst.write_u16(self.and_mask.len() as u16);
        dst.write_u16(self.xor_mask.len() as u16);
        // The masks are written in reverse order of their length fields.
        dst.write_slice(self.xor_mask);
        dst.write_slice(self.and_mask);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.xor_mask.len() + self.and_mask.len()
    }
}

impl<'a> Decode<'a> for ColorPointerAttribute<'a> {
    fn decode(src: &mut ReadCursor<'a>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let cache_index = src.read_u16();
        let hot_spot = Point16::decode(src)?;
        let width = src.read_u16();
        let height = src.read_u16();
        let length_and_mask = src.read_u16();
        let length_xor_mask = src.read_u16();

        let expected_masks_size = usize::from(length_and_mask) + usize::from(length_xor_mask);
        ensure_size!(in: src, size: expected_masks_size);

        let xor_mask = src.read_slice(usize::from(length_xor_mask));
        let and_mask = src.read_slice(usize::from(length_and_mask));

        Self::check_masks_alignment(and_mask, xor_mask, height, false)?;

        Ok(Self {
            cache_index,
            hot_spot,
            width,
            height,
            xor_mask,
            and_mask,
        })
    }
}

/// [2.2.9.1.1.4.5] New Pointer Update (TS_POINTERATTRIBUTE)
///
/// [2.2.9.1.1.4.5]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/aa8c362d-cc67-4a75-9b4a-e5b7e0bbf3f7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerAttribute<'a> {
    pub xor_bpp: u16,
    pub color_pointer: ColorPointerAttribute<'a>,
}

impl PointerAttribute<'_> {
    const NAME: &'static str = "PointerAttribute";
    const FIXED_PART_SIZE: usize = 2 /* xorBpp */;
}

impl Encode for PointerAttribute<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.xor_bpp);
        self.color_pointer.encode(dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.color_pointer.size()
    }
}

impl<'a> Decode<'a> for PointerAttribute<'a> {
    fn decode(src: &mut ReadCursor<'a>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let xor_bpp = src.read_u16();
        let color_pointer = ColorPointerAttribute::decode(src)?;

        Ok(Self { xor_bpp, color_pointer })
    }
}

/// [2.2.9.1.1.4.6] Cached Pointer Update (TS_CACHEDPOINTERATTRIBUTE)
///
/// [2.2.9.1.1.4.6]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/9913a0c4-d2f8-471a-af97-f6ebd9da1b33
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedPointerAttribute {
    pub cache_index: u16,
}

impl CachedPointerAttribute {
    const NAME: &'static str = "CachedPointerAttribute";
    const FIXED_PART_SIZE: usize = 2 /* cacheIndex */;
}

impl Encode for CachedPointerAttribute {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.cache_index);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl Decode<'_> for CachedPointerAttribute {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let cache_index = src.read_u16();

        Ok(Self { cache_index })
    }
}

/// [2.2.9.1.2.1.11] Fast-Path Large Pointer Update (TS_FP_LARGEPOINTERATTRIBUTE)
///
/// [2.2.9.1.2.1.11]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/84fa3c8c-cd55-4413-a606-68b0181f2aca
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LargePointerAttribute<'a> {
    pub xor_bpp: u16,
    pub cache_index: u16,
    pub hot_spot: Point16,
    pub width: u16,
    pub height: u16,
    pub xor_mask: &'a [u8],
    pub and_mask: &'a [u8],
}

impl LargePointerAttribute<'_> {
    const NAME: &'static str = "LargePointerAttribute";
    const FIXED_PART_SIZE: usize = 2 /* xorBpp */ + 2 /* cacheIndex */ + Point16::FIXED_PART_SIZE
        + 2 /* width */ + 2 /* height */ + 4 /* lengthAndMask */ + 4 /* lengthXorMask */;
}

impl Encode for LargePointerAttribute<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        ColorPointerAttribute::check_masks_alignment(self.and_mask, self.xor_mask, self.height, true)?;

        dst.write_u16(self.xor_bpp);
        dst.write_u16(self.cache_index);
        self.hot_spot.encode(dst)?;
        dst.write_u16(self.width);
        dst.write_u16(self.height);

        dst.write_u32(self.and_mask.len() as u32);
        dst.write_u32(self.xor_mask.len() as u32);
        // Same reversed order as the color pointer masks.
        dst.write_slice(self.xor_mask);
        dst.write_slice(self.and_mask);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.xor_mask.len() + self.and_mask.len()
    }
}

impl<'a> Decode<'a> for LargePointerAttribute<'a> {
    fn decode(src: &mut ReadCursor<'a>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let xor_bpp = src.read_u16();
        let cache_index = src.read_u16();
        let hot_spot = Point16::decode(src)?;
        let width = src.read_u16();
        let height = src.read_u16();
        let length_and_mask = src.read_u32() as usize;
        let length_xor_mask = src.read_u32() as usize;

        let expected_masks_size = length_and_mask + length_xor_mask;
        ensure_size!(in: src, size: expected_masks_size);

        let xor_mask = src.read_slice(length_xor_mask);
        let and_mask = src.read_slice(length_and_mask);

        ColorPointerAttribute::check_masks_alignment(and_mask, xor_mask, height, true)?;

        Ok(Self {
            xor_bpp,
            cache_index,
            hot_spot,
            width,
            height,
            xor_mask,
            and_mask,
        })
    }
}

/// Pointer payloads carried by the fast-path pointer update codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerUpdateData<'a> {
    SetHidden,
    SetDefault,
    SetPosition(PointerPositionAttribute),
    Color(ColorPointerAttribute<'a>),
    Cached(CachedPointerAttribute),
    New(PointerAttribute<'a>),
    Large(LargePointerAttribute<'a>),
}

#[cfg(test)]
mod tests {
    use rdpgate_core::{decode, encode_vec};

    use super::*;

    // cacheIndex 0, hot spot (8, 8), 16x16, 1bpp masks (2 bytes per scanline)
    fn color_pointer_buffer() -> Vec<u8> {
        let mut buffer = vec![
            0x00, 0x00, // cacheIndex
            0x08, 0x00, 0x08, 0x00, // hotSpot
            0x10, 0x00, // width
            0x10, 0x00, // height
            0x20, 0x00, // lengthAndMask
            0x20, 0x00, // lengthXorMask
        ];
        buffer.extend_from_slice(&[0xAA; 32]); // xorMaskData
        buffer.extend_from_slice(&[0x55; 32]); // andMaskData
        buffer
    }

    #[test]
    fn color_pointer_round_trip() {
        let buffer = color_pointer_buffer();
        let pointer = decode::<ColorPointerAttribute<'_>>(&buffer).unwrap();

        assert_eq!(pointer.hot_spot, Point16 { x: 8, y: 8 });
        assert_eq!(pointer.xor_mask, &[0xAA; 32][..]);
        assert_eq!(pointer.and_mask, &[0x55; 32][..]);
        assert_eq!(encode_vec(&pointer).unwrap(), buffer);
    }

    #[test]
    fn color_pointer_rejects_zero_height() {
        let mut buffer = color_pointer_buffer();
        buffer[8] = 0;

        assert!(decode::<ColorPointerAttribute<'_>>(&buffer).is_err());
    }

    #[test]
    fn color_pointer_rejects_incomplete_scanlines() {
        let mut buffer = color_pointer_buffer();
        // height 15 does not divide the 32-byte masks evenly
        buffer[8] = 15;

        assert!(decode::<ColorPointerAttribute<'_>>(&buffer).is_err());
    }

    #[test]
    fn position_round_trip() {
        let buffer = [0x40, 0x00, 0x80, 0x00];
        let position = decode::<PointerPositionAttribute>(&buffer).unwrap();

        assert_eq!(position, Point16 { x: 64, y: 128 });
        assert_eq!(encode_vec(&position).unwrap(), buffer);
    }
}
