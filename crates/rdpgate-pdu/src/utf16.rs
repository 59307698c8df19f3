//! UTF-16 string helpers for the fixed-size and null-terminated string
//! fields scattered across the protocol.

use num_derive::{FromPrimitive, ToPrimitive};

use rdpgate_core::{ensure_size, invalid_field_err, PduResult, ReadCursor, WriteCursor};

pub fn to_utf16_bytes(value: &str) -> Vec<u8> {
    value
        .encode_utf16()
        .flat_map(|i| i.to_le_bytes().to_vec())
        .collect::<Vec<u8>>()
}

pub fn from_utf16_bytes(value: &[u8]) -> String {
    let value_u16: Vec<u16> = value
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    String::from_utf16_lossy(value_u16.as_ref())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum CharacterSet {
    Ansi = 1,
    Unicode = 2,
}

/// Decodes a string from a raw byte slice, trimming trailing null terminators.
pub fn decode_string(bytes: &[u8], character_set: CharacterSet) -> PduResult<String> {
    let decoded = match character_set {
        CharacterSet::Unicode => from_utf16_bytes(bytes),
        CharacterSet::Ansi => String::from_utf8(bytes.to_vec())
            .map_err(|_| invalid_field_err!("buffer", "failed to decode UTF-8 string"))?,
    };

    Ok(decoded.trim_end_matches('\0').into())
}

// Read a string from the cursor, using the specified character set.
//
// If read_null_terminator is true, the string will be read until a null terminator is found.
// Otherwise, the string will be read until the end of the cursor. If the next character is a null
// terminator, an empty string will be returned (without consuming the null terminator).
pub fn read_string_from_cursor(
    cursor: &mut ReadCursor<'_>,
    character_set: CharacterSet,
    read_null_terminator: bool,
) -> PduResult<String> {
    let size = if character_set == CharacterSet::Unicode {
        let code_units = if read_null_terminator {
            // Find null or read all if null is not found
            cursor
                .remaining()
                .chunks_exact(2)
                .position(|chunk| chunk == [0, 0])
                .map(|null_terminator_pos| null_terminator_pos + 1) // Read null code point
                .unwrap_or(cursor.len() / 2)
        } else {
            // UTF16 uses 2 bytes per code unit, so we need to read an even number of bytes
            cursor.len() / 2
        };

        code_units * 2
    } else if read_null_terminator {
        // Find null or read all if null is not found
        cursor
            .remaining()
            .iter()
            .position(|&i| i == 0)
            .map(|null_terminator_pos| null_terminator_pos + 1) // Read null code point
            .unwrap_or(cursor.len())
    } else {
        // Read all
        cursor.len()
    };

    if size == 0 {
        return Ok(String::new());
    }

    let result = match character_set {
        CharacterSet::Unicode => {
            ensure_size!(ctx: "Decode string (UTF-16)", in: cursor, size: size);
            let slice = cursor.read_slice(size);

            let u16_buffer: Vec<u16> = slice
                .chunks_exact(2)
                .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
                .collect();

            String::from_utf16(&u16_buffer)
                .map_err(|_| invalid_field_err!("buffer", "failed to decode UTF-16 string"))?
        }
        CharacterSet::Ansi => {
            ensure_size!(ctx: "Decode string (UTF-8)", in: cursor, size: size);
            let slice = cursor.read_slice(size);
            String::from_utf8(slice.to_vec())
                .map_err(|_| invalid_field_err!("buffer", "failed to decode UTF-8 string"))?
        }
    };

    Ok(result.trim_end_matches('\0').into())
}

pub fn write_string_to_cursor(
    cursor: &mut WriteCursor<'_>,
    value: &str,
    character_set: CharacterSet,
    write_null_terminator: bool,
) -> PduResult<()> {
    let buffer = match character_set {
        CharacterSet::Unicode => {
            let mut buffer = to_utf16_bytes(value);
            if write_null_terminator {
                buffer.extend_from_slice(&[0, 0]);
            }
            buffer
        }
        CharacterSet::Ansi => {
            let mut buffer = value.as_bytes().to_vec();
            if write_null_terminator {
                buffer.push(0);
            }
            buffer
        }
    };

    ensure_size!(ctx: "Encode string", in: cursor, size: buffer.len());
    cursor.write_slice(&buffer);

    Ok(())
}

/// Returns the length in bytes of the encoded value
/// based on the passed CharacterSet and with_null_terminator flag.
pub fn encoded_str_len(value: &str, character_set: CharacterSet, with_null_terminator: bool) -> usize {
    match character_set {
        CharacterSet::Ansi => value.len() + if with_null_terminator { 1 } else { 0 },
        CharacterSet::Unicode => value.encode_utf16().count() * 2 + if with_null_terminator { 2 } else { 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_bytes_round_trip() {
        let bytes = to_utf16_bytes("session");
        assert_eq!(bytes.len(), 14);
        assert_eq!(from_utf16_bytes(&bytes), "session");
    }

    #[test]
    fn read_unicode_string_stops_at_null_terminator() {
        let mut buffer = to_utf16_bytes("abc");
        buffer.extend_from_slice(&[0, 0]);
        buffer.extend_from_slice(&to_utf16_bytes("junk"));

        let mut cursor = ReadCursor::new(&buffer);
        let decoded = read_string_from_cursor(&mut cursor, CharacterSet::Unicode, true).unwrap();

        assert_eq!(decoded, "abc");
        assert_eq!(cursor.len(), 8);
    }

    #[test]
    fn write_ansi_string_with_terminator() {
        let mut buffer = [0xAA; 6];
        let mut cursor = WriteCursor::new(&mut buffer);
        write_string_to_cursor(&mut cursor, "abcd", CharacterSet::Ansi, true).unwrap();

        assert_eq!(buffer, [b'a', b'b', b'c', b'd', 0, 0xAA]);
    }
}
