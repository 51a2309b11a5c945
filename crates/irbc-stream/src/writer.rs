//! Growable output buffer. Writes never fail.

use alloc::vec::Vec;

use crate::vbr;

#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Writer {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_fixed32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_vbr_u32(&mut self, v: u32) {
        vbr::write_vbr_u32(&mut self.buf, v);
    }

    pub fn write_vbr_u64(&mut self, v: u64) {
        vbr::write_vbr_u64(&mut self.buf, v);
    }

    pub fn write_vbr_i64(&mut self, v: i64) {
        vbr::write_vbr_i64(&mut self.buf, v);
    }

    /// Writes `VBR len` followed by the UTF-8 bytes of `s`.
    pub fn write_string(&mut self, s: &str) {
        vbr::write_vbr_u64(&mut self.buf, s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Pads with zeros to the next 4-byte boundary of this buffer.
    ///
    /// A block body is always built in its own `Writer`, so this matches
    /// [`Reader::align32`](crate::Reader::align32) on the decode side.
    pub fn align32(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }

    /// Appends a framed block: `VBR kind`, `VBR len`, body, zero padding.
    pub fn write_block(&mut self, kind: u32, body: &[u8]) {
        let padded = body.len().next_multiple_of(4);
        vbr::write_vbr_u64(&mut self.buf, u64::from(kind));
        vbr::write_vbr_u64(&mut self.buf, padded as u64);
        self.buf.extend_from_slice(body);
        self.buf.resize(self.buf.len() + (padded - body.len()), 0);
    }

    /// Builds a block body with `f` and appends it framed as `kind`.
    pub fn block<F>(&mut self, kind: u32, f: F)
    where
        F: FnOnce(&mut Writer),
    {
        let mut body = Writer::new();
        f(&mut body);
        self.write_block(kind, &body.buf);
    }

    /// Fallible variant of [`Writer::block`]; nothing is appended on error.
    pub fn try_block<F, E>(&mut self, kind: u32, f: F) -> Result<(), E>
    where
        F: FnOnce(&mut Writer) -> Result<(), E>,
    {
        let mut body = Writer::new();
        f(&mut body)?;
        self.write_block(kind, &body.buf);
        Ok(())
    }
}
