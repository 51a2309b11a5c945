//! In-memory IR module graph.
//!
//! Types and values are arena-allocated inside [`Module`] and addressed by
//! [`TypeId`] / [`ValueId`] handles. Use edges are plain indices, so the
//! graph may contain cycles (loops, recursive types, self-referential
//! globals) without any shared ownership.

mod types;
pub use types::{PrimitiveType, TypeId, TypeNode, FIRST_DERIVED};

mod value;
pub use value::{
    BasicBlock, Constant, ConstantKind, Function, GlobalVariable, Instruction, Linkage, Opcode,
    Use, ValueData, ValueId, ValueKind,
};

mod module;
pub use module::{Endianness, Module, PointerSize, TargetInfo};

mod listing;
mod verify;
