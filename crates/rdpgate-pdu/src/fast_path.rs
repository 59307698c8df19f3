//! Fast-path server output framing (TS_FP_UPDATE_PDU).

use bit_field::BitField;
use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;

use rdpgate_core::{
    decode_cursor, ensure_fixed_part_size, ensure_size, invalid_field_err, Decode, Encode, PduResult, ReadCursor,
    WriteCursor,
};

use crate::bitmap::BitmapUpdateData;
use crate::palette::PaletteUpdateData;
use crate::pointer::PointerUpdateData;
use crate::rdp::client_info::CompressionType;
use crate::rdp::headers::{CompressionFlags, SHARE_DATA_HEADER_COMPRESSION_MASK};
use crate::surface_commands::{SurfaceCommand, SURFACE_COMMAND_HEADER_SIZE};
use crate::per;

/// Fast-path output header (fpOutputHeader + length fields).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPathHeader {
    pub flags: EncryptionFlags,
    pub data_length: usize,
    forced_long_length: bool,
}

impl FastPathHeader {
    const NAME: &'static str = "FastPathHeader";
    const FIXED_PART_SIZE: usize = 1 /* fpOutputHeader */;

    pub fn new(flags: EncryptionFlags, data_length: usize) -> Self {
        Self {
            flags,
            data_length,
            forced_long_length: false,
        }
    }

    fn minimal_size(&self) -> usize {
        Self::FIXED_PART_SIZE + per::sizeof_length(self.data_length as u16)
    }
}

impl Encode for FastPathHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        let mut header = 0u8;
        header.set_bits(0..2, 0); // fast-path action
        header.set_bits(6..8, self.flags.bits());
        dst.write_u8(header);

        let length = self.data_length + self.size();
        if length > usize::from(u16::MAX) {
            return Err(invalid_field_err!("length", "fast-path PDU is too big"));
        }

        if self.forced_long_length {
            // Keep the same layout the header was received with.
            per::write_long_length(dst, length as u16);
        } else {
            per::write_length(dst, length as u16);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        if self.forced_long_length {
            Self::FIXED_PART_SIZE + per::U16_SIZE
        } else {
            self.minimal_size()
        }
    }
}

impl Decode<'_> for FastPathHeader {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let header = src.read_u8();
        let flags = EncryptionFlags::from_bits_truncate(header.get_bits(6..8));

        let (length, sizeof_length) =
            per::read_length(src).map_err(|_| invalid_field_err!("length", "invalid fast-path PDU length"))?;
        let Some(data_length) = usize::from(length).checked_sub(sizeof_length + Self::FIXED_PART_SIZE) else {
            return Err(invalid_field_err!("length", "fast-path PDU length is smaller than its header"));
        };
        // The sender used the two-byte length form for a value that fits in one.
        let forced_long_length = per::sizeof_length(length) != sizeof_length;

        Ok(FastPathHeader {
            flags,
            data_length,
            forced_long_length,
        })
    }
}

/// Fast-path update wrapper (TS_FP_UPDATE).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPathUpdatePdu<'a> {
    pub fragmentation: Fragmentation,
    pub update_code: UpdateCode,
    pub compression_flags: Option<CompressionFlags>,
    // Always Some when compression_flags is Some
    pub compression_type: Option<CompressionType>,
    pub data: &'a [u8],
}

impl FastPathUpdatePdu<'_> {
    const NAME: &'static str = "FastPathUpdatePdu";
    const FIXED_PART_SIZE: usize = 1 /* updateHeader */;
}

impl Encode for FastPathUpdatePdu<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        if self.data.len() > usize::from(u16::MAX) {
            return Err(invalid_field_err!("data", "fast-path update data is too big"));
        }

        let mut header = 0u8;
        header.set_bits(0..4, self.update_code as u8);
        header.set_bits(4..6, self.fragmentation as u8);
        if self.compression_flags.is_some() {
            header.set_bits(6..8, Compression::COMPRESSION_USED.bits());
        }
        dst.write_u8(header);

        if self.compression_flags.is_some() {
            let compression_flags_with_type = self.compression_flags.map(|flags| flags.bits()).unwrap_or(0)
                | self.compression_type.map(|ty| ty as u8).unwrap_or(0);
            dst.write_u8(compression_flags_with_type);
        }

        dst.write_u16(self.data.len() as u16);
        dst.write_slice(self.data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let compression_flags_size = if self.compression_flags.is_some() { 1 } else { 0 };

        Self::FIXED_PART_SIZE + compression_flags_size + 2 /* size */ + self.data.len()
    }
}

impl<'de> Decode<'de> for FastPathUpdatePdu<'de> {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let header = src.read_u8();

        let update_code = header.get_bits(0..4);
        let update_code =
            UpdateCode::from_u8(update_code).ok_or_else(|| invalid_field_err!("updateHeader", "invalid update code"))?;

        let fragmentation = header.get_bits(4..6);
        let fragmentation = Fragmentation::from_u8(fragmentation)
            .ok_or_else(|| invalid_field_err!("updateHeader", "invalid fragmentation"))?;

        let compression = Compression::from_bits_truncate(header.get_bits(6..8));

        let (compression_flags, compression_type) = if compression.contains(Compression::COMPRESSION_USED) {
            ensure_size!(in: src, size: 1 /* compressionFlags */ + 2 /* size */);

            let compression_flags_with_type = src.read_u8();
            let compression_flags =
                CompressionFlags::from_bits_truncate(compression_flags_with_type & !SHARE_DATA_HEADER_COMPRESSION_MASK);
            let compression_type =
                CompressionType::from_u8(compression_flags_with_type & SHARE_DATA_HEADER_COMPRESSION_MASK)
                    .ok_or_else(|| invalid_field_err!("compressionFlags", "invalid compression type"))?;

            (Some(compression_flags), Some(compression_type))
        } else {
            ensure_size!(in: src, size: 2 /* size */);

            (None, None)
        };

        let data_length = usize::from(src.read_u16());
        ensure_size!(in: src, size: data_length);
        let data = src.read_slice(data_length);

        Ok(Self {
            fragmentation,
            update_code,
            compression_flags,
            compression_type,
            data,
        })
    }
}

/// Decoded fast-path update payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastPathUpdate<'a> {
    Orders(OrdersUpdate<'a>),
    Bitmap(BitmapUpdateData<'a>),
    Palette(PaletteUpdateData),
    Synchronize,
    SurfaceCommands(Vec<SurfaceCommand<'a>>),
    Pointer(PointerUpdateData<'a>),
}

impl<'a> FastPathUpdate<'a> {
    const NAME: &'static str = "FastPathUpdate";

    pub fn decode_with_code(src: &'a [u8], code: UpdateCode) -> PduResult<Self> {
        let mut cursor = ReadCursor::<'a>::new(src);
        Self::decode_cursor_with_code(&mut cursor, code)
    }

    pub fn decode_cursor_with_code(src: &mut ReadCursor<'a>, code: UpdateCode) -> PduResult<Self> {
        match code {
            UpdateCode::Orders => Ok(Self::Orders(decode_cursor(src)?)),
            UpdateCode::Bitmap => Ok(Self::Bitmap(decode_cursor(src)?)),
            UpdateCode::Palette => Ok(Self::Palette(decode_cursor(src)?)),
            UpdateCode::Synchronize => Ok(Self::Synchronize),
            UpdateCode::SurfaceCommands => {
                let mut commands = Vec::with_capacity(1);
                while src.len() >= SURFACE_COMMAND_HEADER_SIZE {
                    commands.push(decode_cursor::<SurfaceCommand<'_>>(src)?);
                }

                Ok(Self::SurfaceCommands(commands))
            }
            UpdateCode::HiddenPointer => Ok(Self::Pointer(PointerUpdateData::SetHidden)),
            UpdateCode::DefaultPointer => Ok(Self::Pointer(PointerUpdateData::SetDefault)),
            UpdateCode::PositionPointer => Ok(Self::Pointer(PointerUpdateData::SetPosition(decode_cursor(src)?))),
            UpdateCode::ColorPointer => Ok(Self::Pointer(PointerUpdateData::Color(decode_cursor(src)?))),
            UpdateCode::CachedPointer => Ok(Self::Pointer(PointerUpdateData::Cached(decode_cursor(src)?))),
            UpdateCode::NewPointer => Ok(Self::Pointer(PointerUpdateData::New(decode_cursor(src)?))),
            UpdateCode::LargePointer => Ok(Self::Pointer(PointerUpdateData::Large(decode_cursor(src)?))),
        }
    }

    pub fn as_short_name(&self) -> &str {
        match self {
            Self::Orders(_) => "Orders",
            Self::Bitmap(_) => "Bitmap",
            Self::Palette(_) => "Palette",
            Self::Synchronize => "Synchronize",
            Self::SurfaceCommands(_) => "Surface Commands",
            Self::Pointer(_) => "Pointer",
        }
    }
}

impl Encode for FastPathUpdate<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        match self {
            Self::Orders(orders) => orders.encode(dst),
            Self::Bitmap(bitmap) => bitmap.encode(dst),
            Self::Palette(palette) => palette.encode(dst),
            Self::Synchronize => Ok(()),
            Self::SurfaceCommands(commands) => {
                for command in commands {
                    command.encode(dst)?;
                }
                Ok(())
            }
            Self::Pointer(pointer) => match pointer {
                PointerUpdateData::SetHidden => Ok(()),
                PointerUpdateData::SetDefault => Ok(()),
                PointerUpdateData::SetPosition(inner) => inner.encode(dst),
                PointerUpdateData::Color(inner) => inner.encode(dst),
                PointerUpdateData::Cached(inner) => inner.encode(dst),
                PointerUpdateData::New(inner) => inner.encode(dst),
                PointerUpdateData::Large(inner) => inner.encode(dst),
            },
        }
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        match self {
            Self::Orders(orders) => orders.size(),
            Self::Bitmap(bitmap) => bitmap.size(),
            Self::Palette(palette) => palette.size(),
            Self::Synchronize => 0,
            Self::SurfaceCommands(commands) => commands.iter().map(Encode::size).sum::<usize>(),
            Self::Pointer(pointer) => match pointer {
                PointerUpdateData::SetHidden => 0,
                PointerUpdateData::SetDefault => 0,
                PointerUpdateData::SetPosition(inner) => inner.size(),
                PointerUpdateData::Color(inner) => inner.size(),
                PointerUpdateData::Cached(inner) => inner.size(),
                PointerUpdateData::New(inner) => inner.size(),
                PointerUpdateData::Large(inner) => inner.size(),
            },
        }
    }
}

impl From<&FastPathUpdate<'_>> for UpdateCode {
    fn from(update: &FastPathUpdate<'_>) -> Self {
        match update {
            FastPathUpdate::Orders(_) => Self::Orders,
            FastPathUpdate::Bitmap(_) => Self::Bitmap,
            FastPathUpdate::Palette(_) => Self::Palette,
            FastPathUpdate::Synchronize => Self::Synchronize,
            FastPathUpdate::SurfaceCommands(_) => Self::SurfaceCommands,
            FastPathUpdate::Pointer(action) => match action {
                PointerUpdateData::SetHidden => Self::HiddenPointer,
                PointerUpdateData::SetDefault => Self::DefaultPointer,
                PointerUpdateData::SetPosition(_) => Self::PositionPointer,
                PointerUpdateData::Color(_) => Self::ColorPointer,
                PointerUpdateData::Cached(_) => Self::CachedPointer,
                PointerUpdateData::New(_) => Self::NewPointer,
                PointerUpdateData::Large(_) => Self::LargePointer,
            },
        }
    }
}

/// [2.2.9.1.2.1.2] Fast-Path Orders Update (TS_FP_UPDATE_ORDERS)
///
/// The individual drawing orders are decoded separately by the session layer.
///
/// [2.2.9.1.2.1.2]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/ad41e1cf-39a6-45c5-a86e-331e23d43534
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdersUpdate<'a> {
    pub number_of_orders: u16,
    pub data: &'a [u8],
}

impl OrdersUpdate<'_> {
    const NAME: &'static str = "OrdersUpdate";
    const FIXED_PART_SIZE: usize = 2 /* numberOrders */;
}

impl Encode for OrdersUpdate<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.number_of_orders);
        dst.write_slice(self.data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.data.len()
    }
}

impl<'de> Decode<'de> for OrdersUpdate<'de> {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let number_of_orders = src.read_u16();
        let data = src.read_remaining();

        Ok(Self { number_of_orders, data })
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum UpdateCode {
    Orders = 0x0,
    Bitmap = 0x1,
    Palette = 0x2,
    Synchronize = 0x3,
    SurfaceCommands = 0x4,
    HiddenPointer = 0x5,
    DefaultPointer = 0x6,
    PositionPointer = 0x8,
    ColorPointer = 0x9,
    CachedPointer = 0xa,
    NewPointer = 0xb,
    LargePointer = 0xc,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Fragmentation {
    Single = 0x0,
    Last = 0x1,
    First = 0x2,
    Next = 0x3,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct EncryptionFlags: u8 {
        const SECURE_CHECKSUM = 0x1;
        const ENCRYPTED = 0x2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Compression: u8 {
        const COMPRESSION_USED = 0x2;
    }
}

#[cfg(test)]
mod tests {
    use rdpgate_core::{decode, encode_vec};

    use super::*;

    const HEADER_WITH_SHORT_LEN_BUFFER: [u8; 2] = [0x80, 0x08];
    const HEADER_WITH_LONG_LEN_BUFFER: [u8; 3] = [0x80, 0x81, 0xE7];
    const HEADER_WITH_FORCED_LONG_LEN_BUFFER: [u8; 3] = [0x80, 0x80, 0x08];

    const UPDATE_PDU_BUFFER: [u8; 19] = [
        0x4, 0x10, 0x0, 0x4, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x4, 0x0, 0x1, 0x0, 0x0, 0x0, 0x0, 0x0,
    ];

    fn header_with_short_len() -> FastPathHeader {
        FastPathHeader {
            flags: EncryptionFlags::ENCRYPTED,
            data_length: 6,
            forced_long_length: false,
        }
    }

    fn header_with_long_len() -> FastPathHeader {
        FastPathHeader {
            flags: EncryptionFlags::ENCRYPTED,
            data_length: 484,
            forced_long_length: false,
        }
    }

    fn header_with_forced_long_len() -> FastPathHeader {
        FastPathHeader {
            flags: EncryptionFlags::ENCRYPTED,
            data_length: 5,
            forced_long_length: true,
        }
    }

    #[test]
    fn decode_header_with_short_length() {
        assert_eq!(
            decode::<FastPathHeader>(HEADER_WITH_SHORT_LEN_BUFFER.as_ref()).unwrap(),
            header_with_short_len()
        );
    }

    #[test]
    fn encode_header_with_short_length() {
        assert_eq!(
            encode_vec(&header_with_short_len()).unwrap(),
            HEADER_WITH_SHORT_LEN_BUFFER.as_ref()
        );
    }

    #[test]
    fn decode_header_with_long_length() {
        assert_eq!(
            decode::<FastPathHeader>(HEADER_WITH_LONG_LEN_BUFFER.as_ref()).unwrap(),
            header_with_long_len()
        );
    }

    #[test]
    fn encode_header_with_long_length() {
        assert_eq!(
            encode_vec(&header_with_long_len()).unwrap(),
            HEADER_WITH_LONG_LEN_BUFFER.as_ref()
        );
    }

    #[test]
    fn decode_header_with_forced_long_length() {
        assert_eq!(
            decode::<FastPathHeader>(HEADER_WITH_FORCED_LONG_LEN_BUFFER.as_ref()).unwrap(),
            header_with_forced_long_len()
        );
    }

    #[test]
    fn encode_header_preserves_forced_long_length() {
        assert_eq!(
            encode_vec(&header_with_forced_long_len()).unwrap(),
            HEADER_WITH_FORCED_LONG_LEN_BUFFER.as_ref()
        );
    }

    #[test]
    fn header_sizes_match_encoded_lengths() {
        assert_eq!(header_with_short_len().size(), HEADER_WITH_SHORT_LEN_BUFFER.len());
        assert_eq!(header_with_long_len().size(), HEADER_WITH_LONG_LEN_BUFFER.len());
        assert_eq!(
            header_with_forced_long_len().size(),
            HEADER_WITH_FORCED_LONG_LEN_BUFFER.len()
        );
    }

    #[test]
    fn decode_update_pdu() {
        let pdu = decode::<FastPathUpdatePdu<'_>>(UPDATE_PDU_BUFFER.as_ref()).unwrap();

        assert_eq!(pdu.fragmentation, Fragmentation::Single);
        assert_eq!(pdu.update_code, UpdateCode::SurfaceCommands);
        assert_eq!(pdu.compression_flags, None);
        assert_eq!(pdu.compression_type, None);
        assert_eq!(pdu.data, &UPDATE_PDU_BUFFER[3..]);
    }

    #[test]
    fn encode_update_pdu_round_trips() {
        let pdu = decode::<FastPathUpdatePdu<'_>>(UPDATE_PDU_BUFFER.as_ref()).unwrap();

        assert_eq!(encode_vec(&pdu).unwrap(), UPDATE_PDU_BUFFER.as_ref());
    }

    #[test]
    fn decode_update_pdu_rejects_invalid_update_code() {
        // update code 0x7 is not assigned
        assert!(decode::<FastPathUpdatePdu<'_>>(&[0x07, 0x00, 0x00]).is_err());
    }

    #[test]
    fn synchronize_update_decodes_to_unit_variant() {
        let update = FastPathUpdate::decode_with_code(&[], UpdateCode::Synchronize).unwrap();

        assert_eq!(update, FastPathUpdate::Synchronize);
        assert_eq!(update.size(), 0);
    }

    #[test]
    fn hidden_pointer_update_has_no_payload() {
        let update = FastPathUpdate::decode_with_code(&[], UpdateCode::HiddenPointer).unwrap();

        assert_eq!(update, FastPathUpdate::Pointer(PointerUpdateData::SetHidden));
    }
}
