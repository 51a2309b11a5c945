//! Optional whole-stream compression.
//!
//! A compressed stream is one method tag byte followed by the codec payload.

use thiserror::Error;
use tracing::debug;

/// Compression method, identified on the wire by its tag byte.
///
/// | tag    | method | payload |
/// |--------|--------|---------|
/// | `b'0'` | `None` | the stream as is |
/// | `b'2'` | `Lz4`  | `u32` LE size, then an LZ4 block |
///
/// Tag `b'2'` is the slot of the block-sorting codec of older writers; those
/// payloads are not decodable here and are rejected as corrupt or
/// implausibly sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    None,
    Lz4,
}

const TAG_NONE: u8 = b'0';
const TAG_LZ4: u8 = b'2';

impl Method {
    pub fn tag(self) -> u8 {
        match self {
            Method::None => TAG_NONE,
            Method::Lz4 => TAG_LZ4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_NONE => Some(Method::None),
            TAG_LZ4 => Some(Method::Lz4),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompressError {
    #[error("compressed stream is empty")]
    Empty,
    #[error("unknown compression method tag {0:#04x}")]
    UnknownMethod(u8),
    #[error("compression method {0:?} is not available in this build")]
    Unavailable(Method),
    #[error("declared size {declared} is implausible for {input} input bytes")]
    ImplausibleSize { declared: usize, input: usize },
    #[error("corrupt compressed payload: {0}")]
    Corrupt(String),
}

/// A codec for the payload after the tag byte.
///
/// Codecs append to `out` and let the `Vec` reallocate as it fills, so no
/// separate capacity callback is involved.
pub trait Compressor {
    fn method(&self) -> Method;
    fn compress(&self, input: &[u8], out: &mut Vec<u8>);
    fn decompress(&self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressError>;
}

/// Stores the payload as is.
pub struct NoCompression;

impl Compressor for NoCompression {
    fn method(&self) -> Method {
        Method::None
    }

    fn compress(&self, input: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(input);
    }

    fn decompress(&self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressError> {
        out.extend_from_slice(input);
        Ok(())
    }
}

/// LZ4 block format with a little-endian `u32` size prefix.
#[cfg(feature = "compression")]
pub struct Lz4Compressor;

/// LZ4 cannot expand data by more than this factor.
#[cfg(feature = "compression")]
const LZ4_MAX_RATIO: usize = 255;

#[cfg(feature = "compression")]
impl Compressor for Lz4Compressor {
    fn method(&self) -> Method {
        Method::Lz4
    }

    fn compress(&self, input: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(&lz4_flex::compress_prepend_size(input));
    }

    fn decompress(&self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressError> {
        if input.len() < 4 {
            return Err(CompressError::Corrupt("missing size prefix".to_string()));
        }
        let declared = u32::from_le_bytes([input[0], input[1], input[2], input[3]]) as usize;
        let body = input.len() - 4;
        if declared > body.saturating_mul(LZ4_MAX_RATIO) {
            return Err(CompressError::ImplausibleSize {
                declared,
                input: body,
            });
        }
        let bytes = lz4_flex::decompress_size_prepended(input)
            .map_err(|e| CompressError::Corrupt(e.to_string()))?;
        out.extend_from_slice(&bytes);
        Ok(())
    }
}

fn compressor_for(method: Method) -> Result<Box<dyn Compressor>, CompressError> {
    match method {
        Method::None => Ok(Box::new(NoCompression)),
        #[cfg(feature = "compression")]
        Method::Lz4 => Ok(Box::new(Lz4Compressor)),
        #[cfg(not(feature = "compression"))]
        Method::Lz4 => Err(CompressError::Unavailable(method)),
    }
}

/// Compresses `bytes` with `method`, prefixed by the method tag.
pub fn compress(bytes: &[u8], method: Method) -> Result<Vec<u8>, CompressError> {
    let codec = compressor_for(method)?;
    Ok(compress_with(codec.as_ref(), bytes))
}

/// Compresses with a caller-supplied codec.
pub fn compress_with(codec: &dyn Compressor, bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() / 2 + 1);
    out.push(codec.method().tag());
    codec.compress(bytes, &mut out);
    debug!(
        method = ?codec.method(),
        input = bytes.len(),
        output = out.len(),
        "compressed stream"
    );
    out
}

/// Undoes [`compress`], selecting the codec from the tag byte.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CompressError> {
    let (&tag, payload) = bytes.split_first().ok_or(CompressError::Empty)?;
    let method = Method::from_tag(tag).ok_or(CompressError::UnknownMethod(tag))?;
    let codec = compressor_for(method)?;
    let mut out = Vec::new();
    codec.decompress(payload, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_stream_is_tagged() {
        let out = compress(b"irbc", Method::None).unwrap();
        assert_eq!(out, b"0irbc");
        assert_eq!(decompress(&out).unwrap(), b"irbc");
    }

    #[test]
    fn tags_are_stable() {
        assert_eq!(Method::None.tag(), b'0');
        assert_eq!(Method::Lz4.tag(), b'2');
        for method in [Method::None, Method::Lz4] {
            assert_eq!(Method::from_tag(method.tag()), Some(method));
        }
        assert_eq!(Method::from_tag(b'1'), None);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(decompress(b"9abc"), Err(CompressError::UnknownMethod(b'9')));
        assert_eq!(decompress(b""), Err(CompressError::Empty));
    }

    #[cfg(feature = "compression")]
    #[test]
    fn lz4_round_trip() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        let packed = compress(&data, Method::Lz4).unwrap();
        assert_eq!(packed[0], b'2');
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn lz4_size_bomb_is_rejected() {
        let mut bytes = vec![b'2'];
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.push(0);
        assert!(matches!(
            decompress(&bytes),
            Err(CompressError::ImplausibleSize { .. })
        ));
    }
}
