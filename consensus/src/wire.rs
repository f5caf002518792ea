//! Low-level helpers for the fixed binary layout of ballots and certificates.
//!
//! Integers are big-endian and fixed width; lengths and counts are unsigned
//! LEB128 var-ints in their shortest form, so every message has exactly one
//! encoding. The layout is version-less.

use thiserror::Error;

/// Upper bound on a single length-prefixed field (signatures are ~100 bytes).
pub const MAX_FIELD_LEN: usize = 4 * 1024;

/// Upper bound on the number of signatures a certificate may carry.
pub const MAX_CERTIFICATE_SIGNATURES: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} more bytes")]
    UnexpectedEof { needed: usize },

    #[error("var-int overflows u64")]
    VarIntOverflow,

    #[error("var-int is not minimally encoded")]
    NonCanonicalVarInt,

    #[error("field length {len} exceeds limit {max}")]
    FieldTooLong { len: usize, max: usize },

    #[error("invalid stage byte {0}")]
    InvalidStage(u8),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Appends wire fields to a byte buffer.
pub(crate) struct Writer<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub(crate) fn var_int(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8 & 0x7F) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    pub(crate) fn length_prefixed(&mut self, v: &[u8]) {
        self.var_int(v.len() as u64);
        self.buf.extend_from_slice(v);
    }
}

/// Cursor over an input buffer.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.data.len() - self.pos;
        if remaining < n {
            return Err(CodecError::UnexpectedEof {
                needed: n - remaining,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, CodecError> {
        self.array().map(u16::from_be_bytes)
    }

    pub(crate) fn u32(&mut self) -> Result<u32, CodecError> {
        self.array().map(u32::from_be_bytes)
    }

    pub(crate) fn u64(&mut self) -> Result<u64, CodecError> {
        self.array().map(u64::from_be_bytes)
    }

    pub(crate) fn hash(&mut self) -> Result<[u8; 32], CodecError> {
        self.array()
    }

    pub(crate) fn var_int(&mut self) -> Result<u64, CodecError> {
        let mut value: u64 = 0;
        for shift in (0..64).step_by(7) {
            let byte = self.u8()?;
            let low = (byte & 0x7F) as u64;
            if shift == 63 && low > 1 {
                return Err(CodecError::VarIntOverflow);
            }
            value |= low << shift;
            if byte & 0x80 == 0 {
                if shift > 0 && byte == 0 {
                    return Err(CodecError::NonCanonicalVarInt);
                }
                return Ok(value);
            }
        }
        Err(CodecError::VarIntOverflow)
    }

    /// Read a var-int length, checked against `max`.
    pub(crate) fn length(&mut self, max: usize) -> Result<usize, CodecError> {
        let len = self.var_int()?;
        if len > max as u64 {
            return Err(CodecError::FieldTooLong {
                len: len.min(usize::MAX as u64) as usize,
                max,
            });
        }
        Ok(len as usize)
    }

    /// Read a length-prefixed field into `out`, reusing its allocation.
    pub(crate) fn length_prefixed_into(&mut self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let len = self.length(MAX_FIELD_LEN)?;
        out.clear();
        out.extend_from_slice(self.take(len)?);
        Ok(())
    }

    pub(crate) fn finish(&self) -> Result<(), CodecError> {
        match self.data.len() - self.pos {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var_int_bytes(v: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        Writer::new(&mut buf).var_int(v);
        buf
    }

    #[test]
    fn var_int_small_values_are_one_byte() {
        assert_eq!(var_int_bytes(0), vec![0]);
        assert_eq!(var_int_bytes(96), vec![96]);
        assert_eq!(var_int_bytes(127), vec![127]);
        assert_eq!(var_int_bytes(128), vec![0x80, 0x01]);
    }

    #[test]
    fn var_int_reads_back() {
        for v in [0, 1, 127, 128, 300, 16_384, u32::MAX as u64, u64::MAX] {
            let bytes = var_int_bytes(v);
            let mut reader = Reader::new(&bytes);
            assert_eq!(reader.var_int().unwrap(), v);
            reader.finish().unwrap();
        }
    }

    #[test]
    fn var_int_overflow_rejected() {
        let bytes = [0xFF; 11];
        assert_eq!(
            Reader::new(&bytes).var_int(),
            Err(CodecError::VarIntOverflow)
        );
    }

    #[test]
    fn padded_var_int_rejected() {
        for bytes in [&[0xE0, 0x00][..], &[0x80, 0x00], &[0xFF, 0x80, 0x00]] {
            assert_eq!(
                Reader::new(bytes).var_int(),
                Err(CodecError::NonCanonicalVarInt),
                "{bytes:02x?}"
            );
        }
        assert_eq!(Reader::new(&[0x00]).var_int(), Ok(0));
    }

    #[test]
    fn truncated_input_reports_missing_bytes() {
        let mut reader = Reader::new(&[0, 1]);
        assert_eq!(reader.u32(), Err(CodecError::UnexpectedEof { needed: 2 }));
    }

    #[test]
    fn oversized_field_rejected() {
        let mut buf = Vec::new();
        Writer::new(&mut buf).var_int((MAX_FIELD_LEN + 1) as u64);
        let mut out = Vec::new();
        assert!(matches!(
            Reader::new(&buf).length_prefixed_into(&mut out),
            Err(CodecError::FieldTooLong { .. })
        ));
    }

    #[test]
    fn trailing_bytes_detected() {
        let reader = Reader::new(&[1, 2, 3]);
        assert_eq!(reader.finish(), Err(CodecError::TrailingBytes(3)));
    }
}
