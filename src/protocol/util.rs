use crate::{FepError, FepResult};

// A cursor over a message body. Decoders take slices off the front and
// the message decoder asserts exhaustion at the end.
pub(crate) struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn take(&mut self, n: usize) -> FepResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(FepError::Protocol(format!(
                "body exhausted: needed {n} bytes at offset {}, {} remain",
                self.pos,
                self.bytes.len() - self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn take_u8(&mut self) -> FepResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

// Hex rendering for trace-level frame dumps.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}
