//! Bytecode decoder.
//!
//! One [`Session`] owns every piece of decode state: the cursor, the module
//! under construction, the type slots, the value planes and the forward
//! reference maps. Function-local state lives in a [`FunctionScope`] that is
//! installed for the duration of one Function block and dropped on every
//! exit path.

mod compaction;
mod constants;
mod forward;
mod function;
mod globals;
mod instructions;
mod planes;
mod symtab;
mod types;

use std::collections::{HashMap, VecDeque};

use irbc_stream::{Reader, DEFAULT_MAX_DEPTH};
use tracing::{debug, trace};

use crate::error::{ErrorKind, ReadError};
use crate::format::{BlockKind, FormatFlags, Revision, Version, MAGIC};
use crate::ir::{Module, TypeId, ValueId};

use forward::ForwardRefs;
use planes::Planes;

/// Decoder configuration.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Deepest block nesting accepted before failing.
    pub max_block_depth: usize,
    /// Run [`Module::verify`] on the result.
    pub verify: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_block_depth: DEFAULT_MAX_DEPTH,
            verify: true,
        }
    }
}

/// Decodes a module with default options.
pub fn read_module(bytes: &[u8]) -> Result<Module, ReadError> {
    read_module_with(bytes, &ReadOptions::default())
}

/// Decodes a module. On failure nothing of the partial module survives.
pub fn read_module_with(bytes: &[u8], options: &ReadOptions) -> Result<Module, ReadError> {
    let mut session = Session::new(bytes, options);
    if let Err(kind) = session.read_stream() {
        return Err(session.error(kind));
    }
    let revision = session.revision();
    let module = session.module;
    if options.verify {
        module.verify().map_err(|e| ReadError {
            kind: ErrorKind::Malformed(e),
            offset: bytes.len(),
            revision,
        })?;
    }
    Ok(module)
}

/// Reads only the magic and the version word.
pub fn peek_version(bytes: &[u8]) -> Result<Version, ReadError> {
    let options = ReadOptions::default();
    let mut session = Session::new(bytes, &options);
    session
        .read_header()
        .map_err(|kind| session.error(kind))
}

/// Function-local decode state.
struct FunctionScope {
    function: ValueId,
    /// Wire type ids named by the compaction table; empty when absent.
    compact_types: Vec<u32>,
    compaction: HashMap<TypeId, Vec<ValueId>>,
    locals: Planes,
    refs: ForwardRefs,
    /// Basic blocks by label slot, created on first reference.
    blocks: HashMap<u32, ValueId>,
    defined_blocks: u32,
}

impl FunctionScope {
    fn new(function: ValueId) -> Self {
        FunctionScope {
            function,
            compact_types: Vec::new(),
            compaction: HashMap::new(),
            locals: Planes::default(),
            refs: ForwardRefs::default(),
            blocks: HashMap::new(),
            defined_blocks: 0,
        }
    }
}

struct PendingInit {
    global: ValueId,
    ty: TypeId,
    slot: u32,
}

pub(crate) struct Session<'a> {
    reader: Reader<'a>,
    module: Module,
    version: Option<Version>,
    flags: FormatFlags,
    /// Derived types by slot, offset by `FIRST_DERIVED`.
    type_slots: Vec<TypeId>,
    types_read: bool,
    globals_read: bool,
    module_planes: Planes,
    module_refs: ForwardRefs,
    pending_inits: Vec<PendingInit>,
    pending_bodies: VecDeque<ValueId>,
    functions_read: usize,
    func: Option<FunctionScope>,
}

impl<'a> Session<'a> {
    fn new(bytes: &'a [u8], options: &ReadOptions) -> Self {
        Session {
            reader: Reader::with_max_depth(bytes, options.max_block_depth),
            module: Module::new(),
            version: None,
            flags: FormatFlags::empty(),
            type_slots: Vec::new(),
            types_read: false,
            globals_read: false,
            module_planes: Planes::default(),
            module_refs: ForwardRefs::default(),
            pending_inits: Vec::new(),
            pending_bodies: VecDeque::new(),
            functions_read: 0,
            func: None,
        }
    }

    fn revision(&self) -> Option<Revision> {
        self.version.map(|v| v.revision)
    }

    fn error(&self, kind: ErrorKind) -> ReadError {
        ReadError {
            kind,
            offset: self.reader.offset(),
            revision: self.revision(),
        }
    }

    /// True once the innermost block has nothing but padding left.
    fn block_done(&self) -> bool {
        self.reader.only_padding_left()
    }

    /// Guards a count read from the stream: every counted item takes at
    /// least one byte, so a count larger than what is left cannot be valid.
    fn check_count(&self, count: u64) -> Result<u32, ErrorKind> {
        if count > self.reader.remaining() as u64 {
            return Err(ErrorKind::Truncated);
        }
        u32::try_from(count).map_err(|_| ErrorKind::Truncated)
    }

    fn read_count(&mut self) -> Result<u32, ErrorKind> {
        let count = self.reader.read_vbr_u64()?;
        self.check_count(count)
    }

    fn read_header(&mut self) -> Result<Version, ErrorKind> {
        let magic = self.reader.read_bytes(MAGIC.len())?;
        if magic != MAGIC {
            return Err(ErrorKind::CorruptMagic);
        }
        let header = self.reader.enter_block()?;
        if header.kind != BlockKind::Module.code() {
            return Err(ErrorKind::InvalidValue("stream does not hold a module block"));
        }
        let word = self.reader.read_vbr_u32()?;
        let version = Version::decode(word)?;
        self.version = Some(version);
        self.flags = version.flags();
        self.module.target = version.target;
        Ok(version)
    }

    fn read_stream(&mut self) -> Result<(), ErrorKind> {
        let version = self.read_header()?;
        debug!(revision = %version.revision, target = ?version.target, "reading module");

        while !self.block_done() {
            let header = self.reader.enter_block()?;
            trace!(kind = header.kind, len = header.len, offset = header.body_start, "module block");
            match BlockKind::from_u32(header.kind) {
                Some(BlockKind::TypeTable) => self.read_type_table()?,
                Some(BlockKind::ConstantPool)
                    if self.flags.contains(FormatFlags::TYPES_IN_VALUE_PLANES)
                        && !self.types_read =>
                {
                    self.read_type_pool()?
                }
                Some(BlockKind::ConstantPool) => {
                    self.read_constant_pool()?;
                    self.fold_null_aggregates()?;
                    self.finish_module_constants()?;
                }
                Some(BlockKind::ModuleGlobalInfo) => self.read_global_info()?,
                Some(BlockKind::Function) => self.read_function()?,
                Some(BlockKind::SymbolTable) => self.read_symbol_table()?,
                _ => trace!(kind = header.kind, "skipping unknown block"),
            }
            self.reader.exit_block();
        }

        self.finish_module_constants()?;
        if !self.pending_bodies.is_empty() {
            return Err(ErrorKind::InvalidValue(
                "function declared with a body has no function block",
            ));
        }
        self.reader.exit_block();
        debug!(
            types = self.module.type_table().len(),
            globals = self.module.globals().len(),
            functions = self.module.functions().len(),
            bodies = self.functions_read,
            "decoded module"
        );
        Ok(())
    }

    /// Resolves global initializers and checks that every forward
    /// reference made at module scope has been defined.
    fn finish_module_constants(&mut self) -> Result<(), ErrorKind> {
        if let Some((ty, slot)) = self.module_refs.first_unresolved() {
            return Err(ErrorKind::UnresolvedReference { ty, slot });
        }
        for init in std::mem::take(&mut self.pending_inits) {
            let value = self.module_value(init.ty, init.slot)?;
            self.module.set_initializer(init.global, Some(value))?;
        }
        Ok(())
    }
}
