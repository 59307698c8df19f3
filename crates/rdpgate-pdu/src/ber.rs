//! ASN.1 BER primitives, just enough for the MCS Connect Initial and
//! Connect Response sequences.

use rdpgate_core::{ensure_size, invalid_field_err, PduResult, ReadCursor, WriteCursor};

const CTX: &str = "BER";

#[repr(u8)]
pub(crate) enum Pc {
    Primitive = 0x00,
    Construct = 0x20,
}

#[repr(u8)]
enum Class {
    Universal = 0x00,
    Application = 0x40,
}

#[repr(u8)]
enum Tag {
    Boolean = 0x01,
    Integer = 0x02,
    OctetString = 0x04,
    Enumerated = 0x0A,
    Sequence = 0x10,
}

pub(crate) const SIZEOF_ENUMERATED: u16 = 3;
pub(crate) const SIZEOF_BOOL: u16 = 3;

const TAG_MASK: u8 = 0x1F;

pub(crate) fn sizeof_application_tag(tagnum: u8, length: u16) -> u16 {
    let tag_len = if tagnum > 0x1E { 2 } else { 1 };

    sizeof_length(length) + tag_len
}

pub(crate) fn sizeof_sequence_tag(length: u16) -> u16 {
    1 + sizeof_length(length)
}

pub(crate) fn sizeof_octet_string(length: u16) -> u16 {
    1 + sizeof_length(length) + length
}

pub(crate) fn sizeof_integer(value: u32) -> u16 {
    if value < 0x0000_0080 {
        3
    } else if value < 0x0000_8000 {
        4
    } else if value < 0x0080_0000 {
        5
    } else {
        6
    }
}

pub(crate) fn write_sequence_tag(dst: &mut WriteCursor<'_>, length: u16) -> PduResult<()> {
    write_universal_tag(dst, Tag::Sequence, Pc::Construct)?;
    write_length(dst, length)
}

pub(crate) fn read_sequence_tag(src: &mut ReadCursor<'_>) -> PduResult<u16> {
    ensure_size!(ctx: CTX, in: src, size: 1);
    let identifier = src.read_u8();

    if identifier != Class::Universal as u8 | Pc::Construct as u8 | (TAG_MASK & Tag::Sequence as u8) {
        Err(invalid_field_err(CTX, "sequence tag", "invalid identifier"))
    } else {
        read_length(src)
    }
}

pub(crate) fn write_application_tag(dst: &mut WriteCursor<'_>, tagnum: u8, length: u16) -> PduResult<()> {
    if tagnum > 0x1E {
        ensure_size!(ctx: CTX, in: dst, size: 2);
        dst.write_u8(Class::Application as u8 | Pc::Construct as u8 | TAG_MASK);
        dst.write_u8(tagnum);
    } else {
        ensure_size!(ctx: CTX, in: dst, size: 1);
        dst.write_u8(Class::Application as u8 | Pc::Construct as u8 | (TAG_MASK & tagnum));
    }

    write_length(dst, length)
}

pub(crate) fn read_application_tag(src: &mut ReadCursor<'_>, tagnum: u8) -> PduResult<u16> {
    ensure_size!(ctx: CTX, in: src, size: 1);
    let identifier = src.read_u8();

    if tagnum > 0x1E {
        if identifier != Class::Application as u8 | Pc::Construct as u8 | TAG_MASK {
            return Err(invalid_field_err(CTX, "application tag", "invalid identifier"));
        }

        ensure_size!(ctx: CTX, in: src, size: 1);
        if src.read_u8() != tagnum {
            return Err(invalid_field_err(CTX, "application tag", "unexpected tag number"));
        }
    } else if identifier != Class::Application as u8 | Pc::Construct as u8 | (TAG_MASK & tagnum) {
        return Err(invalid_field_err(CTX, "application tag", "invalid identifier"));
    }

    read_length(src)
}

pub(crate) fn write_enumerated(dst: &mut WriteCursor<'_>, enumerated: u8) -> PduResult<()> {
    write_universal_tag(dst, Tag::Enumerated, Pc::Primitive)?;
    write_length(dst, 1)?;
    ensure_size!(ctx: CTX, in: dst, size: 1);
    dst.write_u8(enumerated);

    Ok(())
}

pub(crate) fn read_enumerated(src: &mut ReadCursor<'_>, count: u8) -> PduResult<u8> {
    read_universal_tag(src, Tag::Enumerated, Pc::Primitive)?;

    let length = read_length(src)?;
    if length != 1 {
        return Err(invalid_field_err(CTX, "enumerated", "invalid length"));
    }

    ensure_size!(ctx: CTX, in: src, size: 1);
    let enumerated = src.read_u8();
    if enumerated == u8::MAX || enumerated + 1 > count {
        return Err(invalid_field_err(CTX, "enumerated", "value outside of expected range"));
    }

    Ok(enumerated)
}

pub(crate) fn write_integer(dst: &mut WriteCursor<'_>, value: u32) -> PduResult<()> {
    write_universal_tag(dst, Tag::Integer, Pc::Primitive)?;

    if value < 0x0000_0080 {
        write_length(dst, 1)?;
        ensure_size!(ctx: CTX, in: dst, size: 1);
        dst.write_u8(value as u8);
    } else if value < 0x0000_8000 {
        write_length(dst, 2)?;
        ensure_size!(ctx: CTX, in: dst, size: 2);
        dst.write_u16_be(value as u16);
    } else if value < 0x0080_0000 {
        write_length(dst, 3)?;
        ensure_size!(ctx: CTX, in: dst, size: 3);
        dst.write_u8((value >> 16) as u8);
        dst.write_u16_be((value & 0xFFFF) as u16);
    } else {
        write_length(dst, 4)?;
        ensure_size!(ctx: CTX, in: dst, size: 4);
        dst.write_u32_be(value);
    }

    Ok(())
}

pub(crate) fn read_integer(src: &mut ReadCursor<'_>) -> PduResult<u64> {
    read_universal_tag(src, Tag::Integer, Pc::Primitive)?;
    let length = read_length(src)?;

    ensure_size!(ctx: CTX, in: src, size: usize::from(length));

    match length {
        1 => Ok(u64::from(src.read_u8())),
        2 => Ok(u64::from(src.read_u16_be())),
        3 => {
            let a = src.read_u8();
            let b = src.read_u16_be();

            Ok(u64::from(b) + (u64::from(a) << 16))
        }
        4 => Ok(u64::from(src.read_u32_be())),
        8 => {
            let bytes = src.read_array::<8>();
            Ok(u64::from_be_bytes(bytes))
        }
        _ => Err(invalid_field_err(CTX, "integer", "invalid length")),
    }
}

pub(crate) fn write_bool(dst: &mut WriteCursor<'_>, value: bool) -> PduResult<()> {
    write_universal_tag(dst, Tag::Boolean, Pc::Primitive)?;
    write_length(dst, 1)?;
    ensure_size!(ctx: CTX, in: dst, size: 1);
    dst.write_u8(if value { 0xFF } else { 0x00 });

    Ok(())
}

pub(crate) fn read_bool(src: &mut ReadCursor<'_>) -> PduResult<bool> {
    read_universal_tag(src, Tag::Boolean, Pc::Primitive)?;
    let length = read_length(src)?;

    if length != 1 {
        return Err(invalid_field_err(CTX, "boolean", "invalid length"));
    }

    ensure_size!(ctx: CTX, in: src, size: 1);
    Ok(src.read_u8() != 0)
}

pub(crate) fn write_octet_string(dst: &mut WriteCursor<'_>, value: &[u8]) -> PduResult<()> {
    write_octet_string_tag(dst, value.len() as u16)?;
    ensure_size!(ctx: CTX, in: dst, size: value.len());
    dst.write_slice(value);
    Ok(())
}

pub(crate) fn write_octet_string_tag(dst: &mut WriteCursor<'_>, length: u16) -> PduResult<()> {
    write_universal_tag(dst, Tag::OctetString, Pc::Primitive)?;
    write_length(dst, length)
}

pub(crate) fn read_octet_string(src: &mut ReadCursor<'_>) -> PduResult<Vec<u8>> {
    let length = read_octet_string_tag(src)?;

    ensure_size!(ctx: CTX, in: src, size: usize::from(length));
    Ok(src.read_slice(usize::from(length)).to_vec())
}

pub(crate) fn read_octet_string_tag(src: &mut ReadCursor<'_>) -> PduResult<u16> {
    read_universal_tag(src, Tag::OctetString, Pc::Primitive)?;
    read_length(src)
}

fn write_universal_tag(dst: &mut WriteCursor<'_>, tag: Tag, pc: Pc) -> PduResult<()> {
    ensure_size!(ctx: CTX, in: dst, size: 1);
    dst.write_u8(Class::Universal as u8 | pc as u8 | (TAG_MASK & tag as u8));

    Ok(())
}

fn read_universal_tag(src: &mut ReadCursor<'_>, tag: Tag, pc: Pc) -> PduResult<()> {
    ensure_size!(ctx: CTX, in: src, size: 1);
    let identifier = src.read_u8();

    if identifier != Class::Universal as u8 | pc as u8 | (TAG_MASK & tag as u8) {
        Err(invalid_field_err(CTX, "universal tag", "invalid identifier"))
    } else {
        Ok(())
    }
}

fn sizeof_length(length: u16) -> u16 {
    if length > 0xFF {
        3
    } else if length > 0x7F {
        2
    } else {
        1
    }
}

fn write_length(dst: &mut WriteCursor<'_>, length: u16) -> PduResult<()> {
    if length > 0xFF {
        ensure_size!(ctx: CTX, in: dst, size: 3);
        dst.write_u8(0x80 ^ 0x2);
        dst.write_u16_be(length);
    } else if length > 0x7F {
        ensure_size!(ctx: CTX, in: dst, size: 2);
        dst.write_u8(0x80 ^ 0x1);
        dst.write_u8(length as u8);
    } else {
        ensure_size!(ctx: CTX, in: dst, size: 1);
        dst.write_u8(length as u8);
    }

    Ok(())
}

fn read_length(src: &mut ReadCursor<'_>) -> PduResult<u16> {
    ensure_size!(ctx: CTX, in: src, size: 1);
    let byte = src.read_u8();

    if byte & 0x80 != 0 {
        let len = byte & !0x80;

        if len == 1 {
            ensure_size!(ctx: CTX, in: src, size: 1);
            Ok(u16::from(src.read_u8()))
        } else if len == 2 {
            ensure_size!(ctx: CTX, in: src, size: 2);
            Ok(src.read_u16_be())
        } else {
            Err(invalid_field_err(CTX, "length", "invalid length of the length"))
        }
    } else {
        Ok(u16::from(byte))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_with<F: FnOnce(&mut WriteCursor<'_>) -> PduResult<()>>(len: usize, f: F) -> Vec<u8> {
        let mut buf = vec![0; len];
        let mut dst = WriteCursor::new(&mut buf);
        f(&mut dst).unwrap();
        assert_eq!(dst.len(), 0);
        buf
    }

    #[test]
    fn sequence_tag_round_trips() {
        let buf = write_with(4, |dst| write_sequence_tag(dst, 0x100));
        assert_eq!(buf, [0x30, 0x82, 0x01, 0x00]);
        assert_eq!(read_sequence_tag(&mut ReadCursor::new(&buf)).unwrap(), 0x100);
    }

    #[test]
    fn read_sequence_tag_rejects_wrong_identifier() {
        assert!(read_sequence_tag(&mut ReadCursor::new(&[0x3a, 0x82, 0x01, 0x00])).is_err());
    }

    #[test]
    fn application_tag_round_trips_with_long_tag() {
        let buf = write_with(3, |dst| write_application_tag(dst, 0x1F, 0x0F));
        assert_eq!(buf, [0x7F, 0x1F, 0x0F]);
        assert_eq!(read_application_tag(&mut ReadCursor::new(&buf), 0x1F).unwrap(), 0x0F);
    }

    #[test]
    fn application_tag_round_trips_with_short_tag() {
        let buf = write_with(4, |dst| write_application_tag(dst, 0x08, 0x100));
        assert_eq!(buf, [0x68, 0x82, 0x01, 0x00]);
        assert_eq!(read_application_tag(&mut ReadCursor::new(&buf), 0x08).unwrap(), 0x100);
    }

    #[test]
    fn read_application_tag_rejects_wrong_tag_number() {
        assert!(read_application_tag(&mut ReadCursor::new(&[0x7F, 0x1B, 0x0F]), 0x1F).is_err());
        assert!(read_application_tag(&mut ReadCursor::new(&[0x67, 0x0F]), 0x08).is_err());
    }

    #[test]
    fn enumerated_round_trips() {
        let buf = write_with(3, |dst| write_enumerated(dst, 0x0F));
        assert_eq!(buf, [0x0A, 0x01, 0x0F]);
        assert_eq!(read_enumerated(&mut ReadCursor::new(&buf), 0x10).unwrap(), 0x0F);
    }

    #[test]
    fn read_enumerated_rejects_out_of_range_variant() {
        assert!(read_enumerated(&mut ReadCursor::new(&[0x0A, 0x01, 0x0F]), 0x05).is_err());
        assert!(read_enumerated(&mut ReadCursor::new(&[0x0A, 0x02, 0x0F]), 0x10).is_err());
    }

    #[test]
    fn bool_round_trips() {
        let buf = write_with(3, |dst| write_bool(dst, true));
        assert_eq!(buf, [0x01, 0x01, 0xFF]);
        assert!(read_bool(&mut ReadCursor::new(&buf)).unwrap());

        let buf = write_with(3, |dst| write_bool(dst, false));
        assert_eq!(buf, [0x01, 0x01, 0x00]);
        assert!(!read_bool(&mut ReadCursor::new(&buf)).unwrap());
    }

    #[test]
    fn octet_string_round_trips() {
        let buf = write_with(7, |dst| write_octet_string(dst, b"hello"));
        assert_eq!(buf, [0x04, 0x05, 0x68, 0x65, 0x6c, 0x6c, 0x6f]);
        assert_eq!(read_octet_string(&mut ReadCursor::new(&buf)).unwrap(), b"hello");
    }

    #[test]
    fn integer_picks_smallest_encoding() {
        assert_eq!(write_with(3, |dst| write_integer(dst, 0x79)), [0x02, 0x01, 0x79]);
        assert_eq!(write_with(4, |dst| write_integer(dst, 0x800)), [0x02, 0x02, 0x08, 0x00]);
        assert_eq!(
            write_with(5, |dst| write_integer(dst, 0x80000)),
            [0x02, 0x03, 0x08, 0x00, 0x00]
        );
        assert_eq!(
            write_with(6, |dst| write_integer(dst, 0x0080_0000)),
            [0x02, 0x04, 0x00, 0x80, 0x00, 0x00]
        );
    }

    #[test]
    fn read_integer_handles_every_advertised_width() {
        assert_eq!(read_integer(&mut ReadCursor::new(&[0x02, 0x01, 0x79])).unwrap(), 0x79);
        assert_eq!(
            read_integer(&mut ReadCursor::new(&[0x02, 0x02, 0x08, 0x00])).unwrap(),
            0x800
        );
        assert_eq!(
            read_integer(&mut ReadCursor::new(&[0x02, 0x04, 0x00, 0x80, 0x00, 0x00])).unwrap(),
            0x0080_0000
        );
        assert_eq!(
            read_integer(&mut ReadCursor::new(&[
                0x02, 0x08, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00
            ]))
            .unwrap(),
            0x0080_0000_0000_0000
        );
    }

    #[test]
    fn read_integer_rejects_invalid_length() {
        assert!(read_integer(&mut ReadCursor::new(&[0x02, 0x06, 0x79])).is_err());
    }
}
