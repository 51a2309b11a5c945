//! irbc: reader and writer for a compact, block-structured bytecode that
//! serializes IR modules.
//!
//! A module is a graph of typed values: globals, functions, basic blocks,
//! instructions and constants, over a structural type system that allows
//! recursive types. The stream stores that graph as nested length-prefixed
//! blocks in which values are addressed by their index within a per-type
//! plane, so any revision of the format can be decoded into the same
//! [`Module`] and written back out in any other revision.
//!
//! ```
//! use irbc::ir::{Linkage, Module, PrimitiveType};
//! use irbc::{read_module, write_module, Revision, WriteOptions};
//!
//! let mut module = Module::new();
//! let int = PrimitiveType::Int.type_id();
//! let init = module.const_int(int, 42).unwrap();
//! module.new_global(int, true, Linkage::Internal, Some(init));
//!
//! let bytes = write_module(&module, &WriteOptions::revision(Revision::V1)).unwrap();
//! let decoded = read_module(&bytes).unwrap();
//! assert_eq!(decoded.listing(), module.listing());
//! ```

pub mod compress;
pub mod error;
pub mod format;
pub mod ir;
pub mod reader;
pub mod writer;

pub use error::{ErrorKind, IrError, ReadError, WriteError};
pub use format::{Revision, Version};
pub use ir::Module;
pub use reader::{peek_version, read_module, read_module_with, ReadOptions};
pub use writer::{write_module, CompactionPolicy, WriteOptions};
