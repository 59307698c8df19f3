//! ASN.1 PER (aligned variant) primitives used by the MCS and GCC layers.

use core::fmt;

use rdpgate_core::{ReadCursor, WriteCursor};

pub(crate) const CHOICE_SIZE: usize = 1;
pub(crate) const ENUM_SIZE: usize = 1;
pub(crate) const U16_SIZE: usize = 2;

const OBJECT_ID_SIZE: usize = 6;

#[derive(Clone, Debug)]
pub(crate) enum PerError {
    NotEnoughBytes { available: usize, required: usize },
    InvalidLength { reason: &'static str },
    Overflow,
    Underflow,
    UnexpectedEnumVariant,
    OctetStringTooSmall,
    OctetStringTooBig,
    NumericStringTooSmall,
    NumericStringTooBig,
}

impl std::error::Error for PerError {}

impl fmt::Display for PerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerError::NotEnoughBytes { available, required } => write!(
                f,
                "not enough bytes to read PER element: {available} bytes available, required {required} bytes"
            ),
            PerError::InvalidLength { reason } => write!(f, "invalid length: {reason}"),
            PerError::Overflow => write!(f, "overflow"),
            PerError::Underflow => write!(f, "underflow"),
            PerError::UnexpectedEnumVariant => write!(f, "enumerated value does not fall within the expected range"),
            PerError::OctetStringTooSmall => write!(f, "octet string too small"),
            PerError::OctetStringTooBig => write!(f, "octet string too big"),
            PerError::NumericStringTooSmall => write!(f, "numeric string too small"),
            PerError::NumericStringTooBig => write!(f, "numeric string too big"),
        }
    }
}

fn try_read_u8(src: &mut ReadCursor<'_>) -> Result<u8, PerError> {
    if src.is_empty() {
        Err(PerError::NotEnoughBytes {
            available: src.len(),
            required: 1,
        })
    } else {
        Ok(src.read_u8())
    }
}

fn try_read_u16_be(src: &mut ReadCursor<'_>) -> Result<u16, PerError> {
    if src.len() >= 2 {
        Ok(src.read_u16_be())
    } else {
        Err(PerError::NotEnoughBytes {
            available: src.len(),
            required: 2,
        })
    }
}

fn try_read_u32_be(src: &mut ReadCursor<'_>) -> Result<u32, PerError> {
    if src.len() >= 4 {
        Ok(src.read_u32_be())
    } else {
        Err(PerError::NotEnoughBytes {
            available: src.len(),
            required: 4,
        })
    }
}

fn try_read_slice<'a>(src: &mut ReadCursor<'a>, n: usize) -> Result<&'a [u8], PerError> {
    if src.len() >= n {
        Ok(src.read_slice(n))
    } else {
        Err(PerError::NotEnoughBytes {
            available: src.len(),
            required: n,
        })
    }
}

/// Reads a PER length determinant, returning (length, determinant size).
pub(crate) fn read_length(src: &mut ReadCursor<'_>) -> Result<(u16, usize), PerError> {
    let a = try_read_u8(src)?;

    if a & 0x80 != 0 {
        let b = try_read_u8(src)?;
        let length = ((u16::from(a) & !0x80) << 8) + u16::from(b);

        Ok((length, 2))
    } else {
        Ok((u16::from(a), 1))
    }
}

pub(crate) fn write_length(dst: &mut WriteCursor<'_>, length: u16) {
    if length > 0x7f {
        write_long_length(dst, length);
    } else {
        // fits in 7 bits
        dst.write_u8(length as u8);
    }
}

/// Writes the two-byte form even when the value fits in one byte.
pub(crate) fn write_long_length(dst: &mut WriteCursor<'_>, length: u16) {
    dst.write_u16_be(length | 0x8000);
}

pub(crate) fn sizeof_length(length: u16) -> usize {
    if length > 0x7f {
        2
    } else {
        1
    }
}

pub(crate) fn sizeof_u32(value: u32) -> usize {
    if value <= 0xff {
        2
    } else if value <= 0xffff {
        3
    } else {
        5
    }
}

pub(crate) fn read_choice(src: &mut ReadCursor<'_>) -> u8 {
    src.read_u8()
}

pub(crate) fn write_choice(dst: &mut WriteCursor<'_>, choice: u8) {
    dst.write_u8(choice);
}

pub(crate) fn read_selection(src: &mut ReadCursor<'_>) -> u8 {
    src.read_u8()
}

pub(crate) fn write_selection(dst: &mut WriteCursor<'_>, selection: u8) {
    dst.write_u8(selection);
}

pub(crate) fn read_number_of_sets(src: &mut ReadCursor<'_>) -> u8 {
    src.read_u8()
}

pub(crate) fn write_number_of_sets(dst: &mut WriteCursor<'_>, number_of_sets: u8) {
    dst.write_u8(number_of_sets);
}

pub(crate) fn read_padding(src: &mut ReadCursor<'_>, padding_length: usize) {
    src.advance(padding_length);
}

pub(crate) fn write_padding(dst: &mut WriteCursor<'_>, padding_length: usize) {
    for _ in 0..padding_length {
        dst.write_u8(0);
    }
}

pub(crate) fn read_u32(src: &mut ReadCursor<'_>) -> Result<u32, PerError> {
    let (length, _) = read_length(src)?;

    match length {
        0 => Ok(0),
        1 => Ok(u32::from(try_read_u8(src)?)),
        2 => Ok(u32::from(try_read_u16_be(src)?)),
        4 => Ok(try_read_u32_be(src)?),
        _ => Err(PerError::InvalidLength {
            reason: "U32 with length greater than 4 bytes",
        }),
    }
}

pub(crate) fn write_u32(dst: &mut WriteCursor<'_>, value: u32) {
    if value <= 0xff {
        write_length(dst, 1);
        dst.write_u8(value as u8);
    } else if value <= 0xffff {
        write_length(dst, 2);
        dst.write_u16_be(value as u16);
    } else {
        write_length(dst, 4);
        dst.write_u32_be(value);
    }
}

pub(crate) fn read_u16(src: &mut ReadCursor<'_>, min: u16) -> Result<u16, PerError> {
    let value = try_read_u16_be(src)?;
    min.checked_add(value).ok_or(PerError::Overflow)
}

pub(crate) fn write_u16(dst: &mut WriteCursor<'_>, value: u16, min: u16) -> Result<(), PerError> {
    dst.write_u16_be(value.checked_sub(min).ok_or(PerError::Underflow)?);
    Ok(())
}

pub(crate) fn read_enum(src: &mut ReadCursor<'_>, count: u8) -> Result<u8, PerError> {
    let enumerated = try_read_u8(src)?;

    if enumerated >= count {
        Err(PerError::UnexpectedEnumVariant)
    } else {
        Ok(enumerated)
    }
}

pub(crate) fn write_enum(dst: &mut WriteCursor<'_>, enumerated: u8) {
    dst.write_u8(enumerated);
}

pub(crate) fn read_object_id(src: &mut ReadCursor<'_>) -> Result<[u8; OBJECT_ID_SIZE], PerError> {
    let (length, _) = read_length(src)?;

    if length != 5 {
        return Err(PerError::InvalidLength {
            reason: "invalid OID length advertised",
        });
    }

    let first_two_tuples = try_read_u8(src)?;

    let mut object_ids = [0u8; OBJECT_ID_SIZE];
    object_ids[0] = first_two_tuples / 40;
    object_ids[1] = first_two_tuples % 40;
    for object_id in object_ids.iter_mut().skip(2) {
        *object_id = try_read_u8(src)?;
    }

    Ok(object_ids)
}

pub(crate) fn write_object_id(dst: &mut WriteCursor<'_>, object_ids: [u8; OBJECT_ID_SIZE]) {
    write_length(dst, OBJECT_ID_SIZE as u16 - 1);

    let first_two_tuples = object_ids[0] * 40 + object_ids[1];
    dst.write_u8(first_two_tuples);

    for object_id in object_ids.iter().skip(2) {
        dst.write_u8(*object_id);
    }
}

pub(crate) fn read_octet_string<'a>(src: &mut ReadCursor<'a>, min: usize) -> Result<&'a [u8], PerError> {
    let (length, _) = read_length(src)?;
    let read_len = min + usize::from(length);
    try_read_slice(src, read_len)
}

pub(crate) fn write_octet_string(dst: &mut WriteCursor<'_>, octet_string: &[u8], min: usize) -> Result<(), PerError> {
    if octet_string.len() < min {
        return Err(PerError::OctetStringTooSmall);
    }

    let length = octet_string.len() - min;
    let length = u16::try_from(length).map_err(|_| PerError::OctetStringTooBig)?;
    write_length(dst, length);

    dst.write_slice(octet_string);

    Ok(())
}

pub(crate) fn read_numeric_string(src: &mut ReadCursor<'_>, min: u16) -> Result<(), PerError> {
    let (length, _) = read_length(src)?;
    let length = usize::from((length + min + 1) / 2);

    if src.len() < length {
        Err(PerError::NotEnoughBytes {
            available: src.len(),
            required: length,
        })
    } else {
        src.advance(length);
        Ok(())
    }
}

pub(crate) fn write_numeric_string(dst: &mut WriteCursor<'_>, num_str: &[u8], min: usize) -> Result<(), PerError> {
    if num_str.len() < min {
        return Err(PerError::NumericStringTooSmall);
    }

    let length = num_str.len() - min;
    let length = u16::try_from(length).map_err(|_| PerError::NumericStringTooBig)?;

    write_length(dst, length);

    // digits are packed two per octet as BCD
    let to_digit = |elem| (elem - 0x30) % 10;

    for pair in num_str.chunks(2) {
        let first = to_digit(pair[0]);
        let second = to_digit(if pair.len() == 1 { 0x30 } else { pair[1] });

        dst.write_u8((first << 4) | second);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_length_handles_short_form() {
        let mut src = ReadCursor::new(&[0x05]);

        let (length, sizeof_length) = read_length(&mut src).unwrap();

        assert_eq!(5, length);
        assert_eq!(src.len(), 0);
        assert_eq!(sizeof_length, 1);
    }

    #[test]
    fn read_length_handles_long_form() {
        let mut src = ReadCursor::new(&[0x80, 0x8d]);

        let (length, sizeof_length) = read_length(&mut src).unwrap();

        assert_eq!(141, length);
        assert_eq!(sizeof_length, 2);
    }

    #[test]
    fn write_length_round_trips() {
        let mut buf = [0; 2];
        let mut dst = WriteCursor::new(&mut buf);
        write_length(&mut dst, 141);
        assert_eq!(buf, [0x80, 0x8d]);

        let mut buf = [0; 1];
        let mut dst = WriteCursor::new(&mut buf);
        write_length(&mut dst, 0x05);
        assert_eq!(buf, [0x05]);
    }

    #[test]
    fn sizeof_length_matches_encoding() {
        assert_eq!(1, sizeof_length(10));
        assert_eq!(2, sizeof_length(10_000));
    }

    #[test]
    fn read_u32_handles_every_advertised_width() {
        assert_eq!(0, read_u32(&mut ReadCursor::new(&[0x00])).unwrap());
        assert_eq!(127, read_u32(&mut ReadCursor::new(&[0x01, 0x7f])).unwrap());
        assert_eq!(32767, read_u32(&mut ReadCursor::new(&[0x02, 0x7f, 0xff])).unwrap());
        assert_eq!(
            18_000_000,
            read_u32(&mut ReadCursor::new(&[0x04, 0x01, 0x12, 0xA8, 0x80])).unwrap()
        );
    }

    #[test]
    fn read_u32_fails_on_invalid_length() {
        let mut src = ReadCursor::new(&[0x03, 0x01, 0x12, 0xA8]);
        assert!(read_u32(&mut src).is_err());
    }

    #[test]
    fn write_u32_picks_smallest_width() {
        let mut buf = [0; 2];
        write_u32(&mut WriteCursor::new(&mut buf), 127);
        assert_eq!(buf, [0x01, 0x7f]);

        let mut buf = [0; 3];
        write_u32(&mut WriteCursor::new(&mut buf), 32767);
        assert_eq!(buf, [0x02, 0x7f, 0xff]);

        let mut buf = [0; 5];
        write_u32(&mut WriteCursor::new(&mut buf), 18_000_000);
        assert_eq!(buf, [0x04, 0x01, 0x12, 0xA8, 0x80]);
    }

    #[test]
    fn read_u16_applies_minimum() {
        let mut src = ReadCursor::new(&[0x00, 0x07]);
        assert_eq!(1008, read_u16(&mut src, 1001).unwrap());
    }

    #[test]
    fn read_u16_fails_on_overflow_past_minimum() {
        let mut src = ReadCursor::new(&[0xff, 0xff]);
        assert!(read_u16(&mut src, 1).is_err());
    }

    #[test]
    fn write_u16_fails_when_below_minimum() {
        let mut buf = [0; 2];
        let mut dst = WriteCursor::new(&mut buf);
        assert!(write_u16(&mut dst, 1000, 1001).is_err());
    }

    #[test]
    fn object_id_round_trips() {
        let encoded = [0x05, 0x00, 0x14, 0x7c, 0x00, 0x01];

        let mut src = ReadCursor::new(&encoded);
        assert_eq!([0, 0, 20, 124, 0, 1], read_object_id(&mut src).unwrap());

        let mut buf = [0; 6];
        write_object_id(&mut WriteCursor::new(&mut buf), [0, 0, 20, 124, 0, 1]);
        assert_eq!(buf, encoded);
    }

    #[test]
    fn read_enum_rejects_value_outside_range() {
        assert!(read_enum(&mut ReadCursor::new(&[0x05]), 1).is_err());
        assert_eq!(5, read_enum(&mut ReadCursor::new(&[0x05]), 10).unwrap());
        assert!(read_enum(&mut ReadCursor::new(&[0xff]), 0xff).is_err());
    }

    #[test]
    fn octet_string_round_trips() {
        let encoded = [0x00, 0x44, 0x75, 0x63, 0x61];

        let mut src = ReadCursor::new(&encoded);
        assert_eq!(b"Duca", read_octet_string(&mut src, 4).unwrap());

        let mut buf = [0; 5];
        write_octet_string(&mut WriteCursor::new(&mut buf), b"Duca", 4).unwrap();
        assert_eq!(buf, encoded);
    }

    #[test]
    fn numeric_string_round_trips() {
        let mut buf = [0; 2];
        write_numeric_string(&mut WriteCursor::new(&mut buf), b"1", 1).unwrap();
        assert_eq!(buf, [0x00, 0x10]);

        let mut src = ReadCursor::new(&[0x00, 0x10]);
        read_numeric_string(&mut src, 1).unwrap();
    }
}
