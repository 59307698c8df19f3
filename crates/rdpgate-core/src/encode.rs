use crate::{PduResult, WriteBuf, WriteCursor};

/// Wire structure that can be encoded into its binary form.
///
/// Object-safe so heterogeneous PDUs can be queued behind one `dyn Encode`.
pub trait Encode {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()>;

    /// Protocol name of this structure, used as error context.
    fn name(&self) -> &'static str;

    /// Encoded size in bytes.
    fn size(&self) -> usize;
}

crate::assert_obj_safe!(Encode);

/// Encodes the given PDU into the provided buffer, returning the number of bytes written.
pub fn encode<T>(pdu: &T, dst: &mut [u8]) -> PduResult<usize>
where
    T: Encode + ?Sized,
{
    let mut cursor = WriteCursor::new(dst);
    encode_cursor(pdu, &mut cursor)?;
    Ok(cursor.pos())
}

pub fn encode_cursor<T>(pdu: &T, dst: &mut WriteCursor<'_>) -> PduResult<()>
where
    T: Encode + ?Sized,
{
    pdu.encode(dst)
}

/// Same as [`encode`] but grows the buffer when it is too small to fit the PDU.
pub fn encode_buf<T>(pdu: &T, buf: &mut WriteBuf) -> PduResult<usize>
where
    T: Encode + ?Sized,
{
    let pdu_size = pdu.size();
    let dst = buf.unfilled_to(pdu_size);
    let written = encode(pdu, dst)?;
    debug_assert_eq!(written, pdu_size);
    buf.advance(written);
    Ok(written)
}

/// Same as [`encode`] but allocates a fresh buffer each time.
pub fn encode_vec<T>(pdu: &T) -> PduResult<Vec<u8>>
where
    T: Encode + ?Sized,
{
    let pdu_size = pdu.size();
    let mut buf = vec![0; pdu_size];
    let written = encode(pdu, buf.as_mut_slice())?;
    debug_assert_eq!(written, pdu_size);
    Ok(buf)
}

impl Encode for Vec<u8> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.len());

        dst.write_slice(self);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "raw-bytes"
    }

    fn size(&self) -> usize {
        self.len()
    }
}
