//! Bounds-checked byte cursor with nested block framing.

use alloc::vec::Vec;

use crate::vbr;
use crate::{StreamError, StreamResult};

/// Nesting limit used by [`Reader::new`].
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Header of a block the reader has entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub kind: u32,
    /// Body length in bytes, padding included.
    pub len: u32,
    /// Absolute offset of the first body byte.
    pub body_start: usize,
}

#[derive(Debug, Clone, Copy)]
struct Scope {
    start: usize,
    end: usize,
}

/// A forward-only cursor over an encoded stream.
///
/// Every read is limited to the innermost entered block; reading past it
/// fails with [`StreamError::Truncated`] and leaves the cursor unchanged.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    scope: Scope,
    saved: Vec<Scope>,
    max_depth: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::with_max_depth(bytes, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(bytes: &'a [u8], max_depth: usize) -> Self {
        Reader {
            bytes,
            pos: 0,
            scope: Scope {
                start: 0,
                end: bytes.len(),
            },
            saved: Vec::new(),
            max_depth,
        }
    }

    /// Absolute offset of the cursor.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Bytes left in the innermost block.
    pub fn remaining(&self) -> usize {
        self.scope.end.saturating_sub(self.pos)
    }

    /// True once the innermost block has been fully consumed.
    pub fn at_end(&self) -> bool {
        self.pos >= self.scope.end
    }

    /// True when all that is left of the innermost block is its zero padding.
    pub fn only_padding_left(&self) -> bool {
        let rest = &self.bytes[self.pos.min(self.scope.end)..self.scope.end];
        rest.len() < 4 && rest.iter().all(|&b| b == 0)
    }

    /// Number of blocks currently entered.
    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    pub fn read_u8(&mut self) -> StreamResult<u8> {
        let byte = self.peek_u8()?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn peek_u8(&self) -> StreamResult<u8> {
        if self.at_end() {
            return Err(StreamError::Truncated);
        }
        Ok(self.bytes[self.pos])
    }

    pub fn read_bytes(&mut self, n: usize) -> StreamResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(StreamError::Truncated)?;
        if end > self.scope.end {
            return Err(StreamError::Truncated);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_fixed32(&mut self) -> StreamResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_fixed64(&mut self) -> StreamResult<u64> {
        let b = self.read_bytes(8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(b);
        Ok(u64::from_le_bytes(word))
    }

    /// Little-endian u32 at the cursor without consuming it.
    pub fn peek_fixed32(&self) -> StreamResult<u32> {
        let end = self.pos.checked_add(4).ok_or(StreamError::Truncated)?;
        if end > self.scope.end {
            return Err(StreamError::Truncated);
        }
        let b = &self.bytes[self.pos..end];
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_vbr_u64(&mut self) -> StreamResult<u64> {
        vbr::read_vbr_u64(self.bytes, &mut self.pos, self.scope.end)
    }

    pub fn read_vbr_u32(&mut self) -> StreamResult<u32> {
        let start = self.pos;
        let v = self.read_vbr_u64()?;
        u32::try_from(v).map_err(|_| {
            self.pos = start;
            StreamError::InvalidVbr
        })
    }

    pub fn read_vbr_i64(&mut self) -> StreamResult<i64> {
        vbr::read_vbr_i64(self.bytes, &mut self.pos, self.scope.end)
    }

    /// Reads a `VBR len` prefixed UTF-8 string.
    pub fn read_string(&mut self) -> StreamResult<&'a str> {
        let start = self.pos;
        let len = self.read_vbr_u32()? as usize;
        let bytes = self.read_bytes(len).inspect_err(|_| self.pos = start)?;
        core::str::from_utf8(bytes).map_err(|_| StreamError::InvalidUtf8)
    }

    /// Skips to the next 4-byte boundary relative to the innermost block body.
    pub fn align32(&mut self) -> StreamResult<()> {
        let rel = self.pos - self.scope.start;
        let pad = (4 - rel % 4) % 4;
        self.read_bytes(pad).map(|_| ())
    }

    /// Reads a block header and narrows the reader to its body.
    pub fn enter_block(&mut self) -> StreamResult<BlockHeader> {
        if self.saved.len() >= self.max_depth {
            return Err(StreamError::NestingTooDeep);
        }
        let start = self.pos;
        let header = self.read_header();
        let (kind, len) = match header {
            Ok(h) => h,
            Err(e) => {
                self.pos = start;
                return Err(e);
            }
        };
        let body_start = self.pos;
        let end = match body_start.checked_add(len as usize) {
            Some(end) if end <= self.bytes.len() => end,
            _ => {
                self.pos = start;
                return Err(StreamError::Truncated);
            }
        };
        if end > self.scope.end {
            self.pos = start;
            return Err(StreamError::BlockOverrun);
        }
        self.saved.push(self.scope);
        self.scope = Scope {
            start: body_start,
            end,
        };
        Ok(BlockHeader {
            kind,
            len,
            body_start,
        })
    }

    fn read_header(&mut self) -> StreamResult<(u32, u32)> {
        let kind = self.read_vbr_u32()?;
        let len = self.read_vbr_u32()?;
        Ok((kind, len))
    }

    /// Leaves the innermost block, skipping whatever of its body is unread.
    pub fn exit_block(&mut self) {
        if let Some(parent) = self.saved.pop() {
            self.pos = self.scope.end;
            self.scope = parent;
        }
    }

    /// Enters and immediately leaves the next block.
    pub fn skip_block(&mut self) -> StreamResult<BlockHeader> {
        let header = self.enter_block()?;
        self.exit_block();
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Writer;

    fn framed(kind: u32, body: &[u8]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_block(kind, body);
        w.into_bytes()
    }

    #[test]
    fn fixed_width_is_little_endian() {
        let bytes = [0x78, 0x56, 0x34, 0x12, 1, 0, 0, 0, 0, 0, 0, 0x80];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_fixed32(), Ok(0x1234_5678));
        assert_eq!(r.read_fixed64(), Ok(0x8000_0000_0000_0001));
        assert!(r.at_end());
    }

    #[test]
    fn reads_past_end_are_truncated() {
        let bytes = [1, 2, 3];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_fixed32(), Err(StreamError::Truncated));
        assert_eq!(r.offset(), 0);
        assert_eq!(r.read_bytes(usize::MAX), Err(StreamError::Truncated));
    }

    #[test]
    fn vbr_u32_rejects_wide_values() {
        let mut w = Writer::new();
        w.write_vbr_u64(u64::from(u32::MAX) + 1);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_vbr_u32(), Err(StreamError::InvalidVbr));
        assert_eq!(r.offset(), 0);
    }

    #[test]
    fn strings_round_trip_and_validate() {
        let mut w = Writer::new();
        w.write_string("héllo");
        w.write_vbr_u32(1);
        w.write_u8(0xff);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_string(), Ok("héllo"));
        assert_eq!(r.read_string(), Err(StreamError::InvalidUtf8));
    }

    #[test]
    fn block_narrows_reads_to_body() {
        let mut bytes = framed(7, &[1, 2, 3]);
        bytes.push(0xaa);
        let mut r = Reader::new(&bytes);
        let header = r.enter_block().unwrap();
        assert_eq!(header.kind, 7);
        assert_eq!(header.len, 4, "body is padded to a multiple of four");
        assert_eq!(r.read_bytes(3), Ok(&[1u8, 2, 3][..]));
        assert_eq!(r.read_u8(), Ok(0));
        assert_eq!(r.read_u8(), Err(StreamError::Truncated));
        r.exit_block();
        assert_eq!(r.read_u8(), Ok(0xaa));
    }

    #[test]
    fn exit_skips_unread_trailing_fields() {
        let bytes = framed(1, &[9, 9, 9, 9, 9, 9, 9, 9]);
        let mut r = Reader::new(&bytes);
        r.enter_block().unwrap();
        assert_eq!(r.read_u8(), Ok(9));
        r.exit_block();
        assert!(r.at_end());
    }

    #[test]
    fn trailing_padding_is_recognised() {
        let bytes = framed(4, &[7]);
        let mut r = Reader::new(&bytes);
        r.enter_block().unwrap();
        assert!(!r.only_padding_left());
        r.read_u8().unwrap();
        assert!(r.only_padding_left());
        r.read_bytes(3).unwrap();
        assert!(r.only_padding_left());
    }

    #[test]
    fn child_larger_than_parent_is_overrun() {
        // Parent body holds a child header claiming 8 bytes but only 2 follow.
        let inner = [0x02, 0x08, 0, 0];
        let mut bytes = framed(1, &inner);
        bytes.extend_from_slice(&[0; 16]);
        let mut r = Reader::new(&bytes);
        r.enter_block().unwrap();
        assert_eq!(r.enter_block(), Err(StreamError::BlockOverrun));
    }

    #[test]
    fn block_past_buffer_is_truncated() {
        let bytes = [0x01, 0x40, 0, 0];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.enter_block(), Err(StreamError::Truncated));
        assert_eq!(r.offset(), 0);
    }

    #[test]
    fn nesting_is_bounded() {
        let mut body = framed(3, &[]);
        for _ in 0..4 {
            body = framed(3, &body);
        }
        let mut r = Reader::with_max_depth(&body, 3);
        for _ in 0..3 {
            r.enter_block().unwrap();
        }
        assert_eq!(r.enter_block(), Err(StreamError::NestingTooDeep));
    }

    #[test]
    fn align32_is_relative_to_block_body() {
        let mut w = Writer::new();
        w.write_u8(5);
        w.align32();
        w.write_u8(6);
        let bytes = framed(2, w.as_bytes());
        let mut r = Reader::new(&bytes);
        r.enter_block().unwrap();
        assert_eq!(r.read_u8(), Ok(5));
        r.align32().unwrap();
        assert_eq!(r.read_u8(), Ok(6));
    }
}

// ============================================================================
// Kani Formal Verification Proofs
// ============================================================================

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: entering a block over arbitrary bytes never panics, and a
    /// successful entry never widens the readable region.
    #[kani::proof]
    #[kani::unwind(12)]
    fn enter_block_never_panics() {
        let bytes: [u8; 8] = kani::any();
        let mut r = Reader::new(&bytes);
        if r.enter_block().is_ok() {
            kani::assert(r.remaining() <= bytes.len(), "body stays inside buffer");
        }
    }
}
