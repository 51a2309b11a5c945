//! Error types for reading, writing and building modules.

use irbc_stream::StreamError;
use thiserror::Error;

use crate::format::Revision;
use crate::ir::{TypeId, ValueId};

/// What went wrong while decoding a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("unexpected end of input")]
    Truncated,
    #[error("nested block overruns its parent")]
    BlockOverrun,
    #[error("blocks nested too deeply")]
    NestingTooDeep,
    #[error("unsupported format revision {0}")]
    UnsupportedVersion(u32),
    #[error("invalid type: {0}")]
    InvalidType(&'static str),
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
    #[error("slot {slot} of type {ty} is referenced but never defined")]
    UnresolvedReference { ty: TypeId, slot: u32 },
    #[error("compaction table lists type slot {0} twice")]
    DuplicatePlane(u32),
    #[error("missing irbc magic")]
    CorruptMagic,
    #[error("decoded module is malformed: {0}")]
    Malformed(#[from] IrError),
}

impl From<StreamError> for ErrorKind {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Truncated => ErrorKind::Truncated,
            StreamError::BlockOverrun => ErrorKind::BlockOverrun,
            StreamError::NestingTooDeep => ErrorKind::NestingTooDeep,
            StreamError::InvalidVbr => ErrorKind::InvalidValue("integer out of range"),
            StreamError::InvalidUtf8 => ErrorKind::InvalidValue("string is not UTF-8"),
        }
    }
}

/// A decode failure, with the byte offset it was detected at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at byte offset {offset}")]
pub struct ReadError {
    pub kind: ErrorKind,
    pub offset: usize,
    /// Revision from the version word, if decoding got that far.
    pub revision: Option<Revision>,
}

/// The in-memory module cannot be encoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("type {0} is still opaque")]
    OpaqueType(TypeId),
    #[error("value {0} is an unresolved placeholder")]
    UnresolvedPlaceholder(ValueId),
    #[error("value {0} is not visible from the scope that references it")]
    OutOfScope(ValueId),
    #[error("type {0} is not in the module type table")]
    UnknownType(TypeId),
    #[error("{what} cannot be encoded in revision {revision}")]
    NotEncodable {
        what: &'static str,
        revision: Revision,
    },
    #[error("malformed {0}: {1}")]
    Malformed(ValueId, &'static str),
}

/// Misuse of the module builder, or a failed structural check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("type {0} is not opaque")]
    NotOpaque(TypeId),
    #[error("type {0} is still opaque")]
    OpaqueType(TypeId),
    #[error("type {0} contains itself by value")]
    RecursiveByValue(TypeId),
    #[error("expected {expected}, found type {found}")]
    TypeMismatch {
        expected: &'static str,
        found: TypeId,
    },
    #[error("constant does not fit in type {0}")]
    OutOfRange(TypeId),
    #[error("expected {expected} elements, found {found}")]
    ElementCount { expected: u64, found: usize },
    #[error("{0} is not a constant expression opcode")]
    NotConstantExpr(crate::ir::Opcode),
    #[error("value {0} still has uses")]
    StillUsed(ValueId),
    #[error("value {0} has the wrong kind for this operation")]
    WrongKind(ValueId),
    #[error("value {0} is an unresolved placeholder")]
    Placeholder(ValueId),
    #[error("block {block} of function {function} has no terminator")]
    Unterminated { function: ValueId, block: ValueId },
    #[error("constant {0} contains itself")]
    RecursiveConstant(ValueId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_errors_map_onto_taxonomy() {
        assert_eq!(ErrorKind::from(StreamError::Truncated), ErrorKind::Truncated);
        assert_eq!(
            ErrorKind::from(StreamError::BlockOverrun),
            ErrorKind::BlockOverrun
        );
        assert!(matches!(
            ErrorKind::from(StreamError::InvalidVbr),
            ErrorKind::InvalidValue(_)
        ));
    }

    #[test]
    fn read_error_reports_offset() {
        let err = ReadError {
            kind: ErrorKind::UnsupportedVersion(9),
            offset: 6,
            revision: None,
        };
        assert_eq!(
            err.to_string(),
            "unsupported format revision 9 at byte offset 6"
        );
    }
}
