use core::ops::{Index, Range, RangeFrom, RangeFull, RangeTo};

/// Capacity kept for the inner `Vec<u8>` when [`WriteBuf::clear`] is called.
const MAX_CAPACITY_WHEN_CLEARED: usize = 16384;

/// Growable buffer backed by a [`Vec<u8>`] that is incrementally filled.
///
/// ```not_rust
/// [          Vec capacity             ]
/// [ filled | unfilled |               ]
/// [    initialized    | uninitialized ]
/// ```
#[derive(Debug)]
pub struct WriteBuf {
    inner: Vec<u8>,
    filled: usize,
}

impl WriteBuf {
    pub const fn new() -> Self {
        Self {
            inner: Vec::new(),
            filled: 0,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.inner
    }

    /// Length of the filled region.
    pub const fn filled_len(&self) -> usize {
        self.filled
    }

    /// Shared reference to the filled portion of the buffer.
    pub fn filled(&self) -> &[u8] {
        &self.inner[..self.filled]
    }

    /// Ensures the initialized, unfilled portion can hold `additional` more bytes.
    pub fn initialize(&mut self, additional: usize) {
        if self.inner.len() < self.filled + additional {
            self.inner.resize(self.filled + additional, 0);
        }
    }

    /// Mutable reference to the first `n` bytes of the unfilled part,
    /// allocating as necessary.
    pub fn unfilled_to(&mut self, n: usize) -> &mut [u8] {
        self.initialize(n);
        &mut self.inner[self.filled..self.filled + n]
    }

    pub fn write_slice(&mut self, slice: &[u8]) {
        let n = slice.len();
        self.initialize(n);
        self.inner[self.filled..self.filled + n].copy_from_slice(slice);
        self.filled += n;
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_slice(&value.to_le_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_slice(&value.to_le_bytes());
    }

    /// Marks the next `len` initialized bytes as filled.
    pub fn advance(&mut self, len: usize) {
        debug_assert!(self.filled + len <= self.inner.len());
        self.filled = core::cmp::min(self.filled + len, self.inner.len());
    }

    /// Resets the filled cursor, shrinking oversized buffers to reclaim memory.
    pub fn clear(&mut self) {
        if self.inner.len() > MAX_CAPACITY_WHEN_CLEARED {
            self.inner.truncate(MAX_CAPACITY_WHEN_CLEARED);
            self.inner.shrink_to_fit();
        }
        self.filled = 0;
    }
}

impl Default for WriteBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<Range<usize>> for WriteBuf {
    type Output = [u8];

    fn index(&self, index: Range<usize>) -> &Self::Output {
        &self.filled()[index]
    }
}

impl Index<RangeFrom<usize>> for WriteBuf {
    type Output = [u8];

    fn index(&self, index: RangeFrom<usize>) -> &Self::Output {
        &self.filled()[index]
    }
}

impl Index<RangeTo<usize>> for WriteBuf {
    type Output = [u8];

    fn index(&self, index: RangeTo<usize>) -> &Self::Output {
        &self.filled()[index]
    }
}

impl Index<RangeFull> for WriteBuf {
    type Output = [u8];

    fn index(&self, _: RangeFull) -> &Self::Output {
        self.filled()
    }
}
