//! Byte-level layer of the irbc bytecode format.
//!
//! This crate is `#![no_std]` (it needs `alloc` for growable buffers). It provides:
//! - VBR (base-128, continuation bit 7, LSB first) integer encoding
//! - [`Reader`], a bounds-checked cursor that also frames nested blocks
//! - [`Writer`], a growable output buffer that emits length-delimited blocks
//! - [`StreamError`] / [`StreamResult<T>`] for every failure (no panics)

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::fmt;

mod vbr;
pub use vbr::{
    read_vbr_i64, read_vbr_u64, vbr_len, write_vbr_i64, write_vbr_u32, write_vbr_u64,
    MAX_VBR64_LEN,
};

mod reader;
pub use reader::{BlockHeader, Reader, DEFAULT_MAX_DEPTH};

mod writer;
pub use writer::Writer;

/// Byte-level decode failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// A read asked for more bytes than remain in the current block.
    Truncated,
    /// A nested block claims to extend past the end of its parent.
    BlockOverrun,
    /// A VBR integer overflowed its target width.
    InvalidVbr,
    /// A string field was not valid UTF-8.
    InvalidUtf8,
    /// Blocks were nested deeper than the reader allows.
    NestingTooDeep,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Truncated => write!(f, "unexpected end of block"),
            StreamError::BlockOverrun => write!(f, "nested block overruns its parent"),
            StreamError::InvalidVbr => write!(f, "VBR integer out of range"),
            StreamError::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            StreamError::NestingTooDeep => write!(f, "blocks nested too deeply"),
        }
    }
}

impl core::error::Error for StreamError {}

/// Result type for byte-level operations.
pub type StreamResult<T> = Result<T, StreamError>;
