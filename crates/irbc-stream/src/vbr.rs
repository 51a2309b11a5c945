//! Variable-bit-rate integers.
//!
//! Each byte carries 7 payload bits (least significant group first) and uses
//! bit 7 as a continuation flag. Signed values are stored as the unsigned VBR
//! of `(|v| << 1) | sign`; `i64::MIN` is the otherwise unused "negative zero".

use alloc::vec::Vec;

use crate::{StreamError, StreamResult};

/// Longest encoding of a `u64` (ten groups of seven bits).
pub const MAX_VBR64_LEN: usize = 10;

/// Number of bytes [`write_vbr_u64`] emits for `v`.
pub fn vbr_len(mut v: u64) -> usize {
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Appends `v` as an unsigned VBR.
pub fn write_vbr_u64(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Appends `v` as an unsigned VBR.
pub fn write_vbr_u32(out: &mut Vec<u8>, v: u32) {
    write_vbr_u64(out, u64::from(v));
}

/// Appends `v` as a signed VBR.
pub fn write_vbr_i64(out: &mut Vec<u8>, v: i64) {
    let sign = u64::from(v < 0);
    // i64::MIN has no positive counterpart; its magnitude shifts out to 0.
    write_vbr_u64(out, (v.unsigned_abs() << 1) | sign);
}

/// Decodes an unsigned VBR from `bytes[*offset..end]`, advancing `offset`.
///
/// Fails with [`StreamError::Truncated`] if the encoding runs past `end`, and
/// with [`StreamError::InvalidVbr`] if it does not fit in 64 bits.
pub fn read_vbr_u64(bytes: &[u8], offset: &mut usize, end: usize) -> StreamResult<u64> {
    let end = end.min(bytes.len());
    let mut pos = *offset;
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        if pos >= end {
            return Err(StreamError::Truncated);
        }
        let byte = bytes[pos];
        pos += 1;
        let payload = u64::from(byte & 0x7f);
        if shift == 63 && payload > 1 {
            return Err(StreamError::InvalidVbr);
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            *offset = pos;
            return Ok(result);
        }
        shift += 7;
        if shift > 63 {
            return Err(StreamError::InvalidVbr);
        }
    }
}

/// Decodes a signed VBR from `bytes[*offset..end]`, advancing `offset`.
pub fn read_vbr_i64(bytes: &[u8], offset: &mut usize, end: usize) -> StreamResult<i64> {
    let raw = read_vbr_u64(bytes, offset, end)?;
    let magnitude = raw >> 1;
    if raw & 1 == 0 {
        Ok(magnitude as i64)
    } else if magnitude == 0 {
        Ok(i64::MIN)
    } else {
        Ok(-(magnitude as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use proptest::prelude::*;

    fn encode_u64(v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_vbr_u64(&mut out, v);
        out
    }

    fn encode_i64(v: i64) -> Vec<u8> {
        let mut out = Vec::new();
        write_vbr_i64(&mut out, v);
        out
    }

    #[test]
    fn single_byte_values() {
        assert_eq!(encode_u64(0), vec![0x00]);
        assert_eq!(encode_u64(127), vec![0x7f]);
    }

    #[test]
    fn continuation_is_lsb_first() {
        assert_eq!(encode_u64(128), vec![0x80, 0x01]);
        assert_eq!(encode_u64(300), vec![0xac, 0x02]);
    }

    #[test]
    fn boundary_values_round_trip() {
        for v in [0, 127, 128, u64::from(u32::MAX), i64::MAX as u64, u64::MAX] {
            let bytes = encode_u64(v);
            assert_eq!(bytes.len(), vbr_len(v));
            let mut off = 0;
            assert_eq!(read_vbr_u64(&bytes, &mut off, bytes.len()), Ok(v));
            assert_eq!(off, bytes.len());
        }
    }

    #[test]
    fn signed_boundary_values_round_trip() {
        for v in [
            0,
            127,
            -127,
            128,
            -128,
            i64::from(u32::MAX),
            -i64::from(u32::MAX),
            i64::MAX,
            -i64::MAX,
            i64::MIN,
        ] {
            let bytes = encode_i64(v);
            let mut off = 0;
            assert_eq!(read_vbr_i64(&bytes, &mut off, bytes.len()), Ok(v), "value {v}");
        }
    }

    #[test]
    fn signed_encoding_puts_sign_in_bit_zero() {
        assert_eq!(encode_i64(1), vec![0x02]);
        assert_eq!(encode_i64(-1), vec![0x03]);
        assert_eq!(encode_i64(i64::MIN), vec![0x01]);
    }

    #[test]
    fn truncated_encoding_fails() {
        let bytes = [0x80, 0x80];
        let mut off = 0;
        assert_eq!(
            read_vbr_u64(&bytes, &mut off, bytes.len()),
            Err(StreamError::Truncated)
        );
        assert_eq!(off, 0, "offset must not move on failure");
    }

    #[test]
    fn end_bound_is_respected() {
        let bytes = [0x80, 0x01];
        let mut off = 0;
        assert_eq!(read_vbr_u64(&bytes, &mut off, 1), Err(StreamError::Truncated));
    }

    #[test]
    fn overlong_encoding_is_rejected() {
        let mut bytes = vec![0xff; 10];
        bytes.push(0x01);
        let mut off = 0;
        assert_eq!(
            read_vbr_u64(&bytes, &mut off, bytes.len()),
            Err(StreamError::InvalidVbr)
        );

        // 10th group may only contribute bit 63.
        let mut bytes = vec![0xff; 9];
        bytes.push(0x02);
        let mut off = 0;
        assert_eq!(
            read_vbr_u64(&bytes, &mut off, bytes.len()),
            Err(StreamError::InvalidVbr)
        );
    }

    proptest! {
        #[test]
        fn unsigned_inverse(v in any::<u64>()) {
            let bytes = encode_u64(v);
            let mut off = 0;
            prop_assert_eq!(read_vbr_u64(&bytes, &mut off, bytes.len()), Ok(v));
            prop_assert!(bytes.len() <= MAX_VBR64_LEN);
        }

        #[test]
        fn signed_inverse(v in any::<i64>()) {
            let bytes = encode_i64(v);
            let mut off = 0;
            prop_assert_eq!(read_vbr_i64(&bytes, &mut off, bytes.len()), Ok(v));
        }

        #[test]
        fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..16)) {
            let mut off = 0;
            let _ = read_vbr_u64(&bytes, &mut off, bytes.len());
            prop_assert!(off <= bytes.len());
        }
    }
}

// ============================================================================
// Kani Formal Verification Proofs
// ============================================================================
//
// Run with: cargo kani -p irbc-stream

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: decoding any 11-byte window never panics and never moves the
    /// offset past the window.
    #[kani::proof]
    #[kani::unwind(12)]
    fn read_vbr_never_panics() {
        let bytes: [u8; 11] = kani::any();
        let end: usize = kani::any();
        kani::assume(end <= bytes.len());
        let mut off = 0;
        let _ = read_vbr_u64(&bytes, &mut off, end);
        kani::assert(off <= end, "offset stays inside the window");
    }

    /// Proof: every u32 round-trips through the unsigned encoding.
    #[kani::proof]
    #[kani::unwind(6)]
    fn vbr_u32_round_trips() {
        let v: u32 = kani::any();
        let mut out = Vec::new();
        write_vbr_u32(&mut out, v);
        let mut off = 0;
        let end = out.len();
        kani::assert(
            read_vbr_u64(&out, &mut off, end) == Ok(u64::from(v)),
            "u32 round-trip",
        );
    }
}
