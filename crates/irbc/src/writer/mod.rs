//! Bytecode encoder.
//!
//! Encoding happens in two passes. The first plans where every constant is
//! emitted and assigns module-level slots; the second walks the module and
//! writes each block with slots looked up from that plan.

mod constants;
mod function;
mod instructions;
mod legacy;
mod slots;
mod symtab;
mod types;

use std::collections::HashMap;

use irbc_stream::Writer;
use tracing::debug;

use crate::error::WriteError;
use crate::format::{wire_type_id, BlockKind, FormatFlags, Revision, Version, MAGIC};
use crate::ir::{Module, TargetInfo, TypeId, ValueId, ValueKind, FIRST_DERIVED};

use constants::{ConstantPlan, Pool};
use slots::PlaneMap;

/// When to emit a per-function compaction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionPolicy {
    Never,
    /// Emit one only if it makes the function smaller.
    #[default]
    Auto,
    Always,
}

/// Encoder configuration.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub revision: Revision,
    pub compaction: CompactionPolicy,
    /// Overrides the module's own target description.
    pub target: Option<TargetInfo>,
}

impl WriteOptions {
    pub fn revision(revision: Revision) -> Self {
        WriteOptions {
            revision,
            ..Self::default()
        }
    }
}

/// Encodes `module` as a complete stream, magic included.
pub fn write_module(module: &Module, options: &WriteOptions) -> Result<Vec<u8>, WriteError> {
    let module = legacy::prepare(module, options.revision)?;
    validate(&module)?;

    let version = Version::new(options.revision, options.target.unwrap_or(module.target));
    let encoder = ModuleEncoder::new(&module, version, options.compaction)?;

    let mut out = Writer::new();
    out.write_bytes(&MAGIC);
    out.try_block(BlockKind::Module.code(), |body| encoder.write(body))?;
    debug!(
        revision = %options.revision,
        bytes = out.len(),
        "encoded module"
    );
    Ok(out.into_bytes())
}

/// Rejects modules the format cannot represent.
fn validate(module: &Module) -> Result<(), WriteError> {
    if let Some(&ty) = module.type_table().iter().find(|&&t| module.is_opaque(t)) {
        return Err(WriteError::OpaqueType(ty));
    }
    for (id, data) in module.values() {
        if matches!(data.kind, ValueKind::Placeholder { .. }) && !data.uses().is_empty() {
            return Err(WriteError::UnresolvedPlaceholder(id));
        }
    }
    Ok(())
}

/// Module-wide encoding state shared by every block writer.
pub(crate) struct ModuleEncoder<'m> {
    module: &'m Module,
    version: Version,
    flags: FormatFlags,
    compaction: CompactionPolicy,
    type_slots: HashMap<TypeId, u32>,
    plan: ConstantPlan,
    module_pool: Pool,
    module_planes: PlaneMap,
}

impl<'m> ModuleEncoder<'m> {
    fn new(
        module: &'m Module,
        version: Version,
        compaction: CompactionPolicy,
    ) -> Result<Self, WriteError> {
        let flags = version.flags();
        let type_slots = module
            .type_table()
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, FIRST_DERIVED + i as u32))
            .collect();
        let plan = ConstantPlan::build(module, flags)?;
        let module_pool = Pool::new(module, plan.module_constants());

        let mut module_planes = PlaneMap::default();
        for &g in module.globals().iter().chain(module.functions()) {
            module_planes.push(module.type_of(g), g);
        }
        for (ty, v) in module_pool.plane_order(module) {
            module_planes.push(ty, v);
        }

        Ok(ModuleEncoder {
            module,
            version,
            flags,
            compaction,
            type_slots,
            plan,
            module_pool,
            module_planes,
        })
    }

    fn revision(&self) -> Revision {
        self.version.revision
    }

    fn implicit_nulls(&self) -> bool {
        !self.flags.contains(FormatFlags::EXPLICIT_NULLS)
    }

    /// Module-level wire id of `ty`.
    fn wire_type(&self, ty: TypeId) -> Result<u32, WriteError> {
        let ty = self.module.resolve(ty);
        let slot = if ty.0 < FIRST_DERIVED {
            ty.0
        } else {
            *self
                .type_slots
                .get(&ty)
                .ok_or(WriteError::UnknownType(ty))?
        };
        Ok(wire_type_id(slot, self.flags))
    }

    /// Slots before the first plane entry: one for an implicit null.
    fn null_offset(&self, ty: TypeId) -> u32 {
        u32::from(self.implicit_nulls() && self.module.has_null(ty))
    }

    /// Slot of `v` as seen from module scope.
    fn module_slot(&self, v: ValueId) -> Result<u32, WriteError> {
        if self.implicit_nulls() && self.module.is_null(v) {
            return Ok(0);
        }
        let ty = self.module.type_of(v);
        self.module_planes
            .index(v)
            .map(|i| self.null_offset(ty) + i)
            .ok_or(WriteError::OutOfScope(v))
    }

    fn write(&self, w: &mut Writer) -> Result<(), WriteError> {
        w.write_vbr_u32(self.version.encode());
        self.write_type_table(w)?;
        w.try_block(BlockKind::ModuleGlobalInfo.code(), |b| self.write_global_info(b))?;
        if !self.module_pool.is_empty() {
            let mut scope = slots::ModuleScope(self);
            w.try_block(BlockKind::ConstantPool.code(), |b| {
                constants::write_pool(&mut scope, &self.module_pool, b)
            })?;
        }
        for &f in self.module.functions() {
            if self.module.function(f).is_some_and(|func| !func.is_declaration()) {
                let body = self.encode_function(f)?;
                w.write_block(BlockKind::Function.code(), &body);
            }
        }
        self.write_module_symbols(w)
    }

    fn write_global_info(&self, w: &mut Writer) -> Result<(), WriteError> {
        let module = self.module;
        w.write_vbr_u32(module.globals().len() as u32);
        for &g in module.globals() {
            let global = module
                .global(g)
                .ok_or(WriteError::Malformed(g, "global list holds a non-global"))?;
            let ptr_ty = module.type_of(g);
            let word = (u64::from(self.wire_type(ptr_ty)?) << 5)
                | (u64::from(global.linkage.code()) << 2)
                | (u64::from(global.initializer.is_some()) << 1)
                | u64::from(global.is_constant);
            w.write_vbr_u64(word);
            if let Some(init) = global.initializer {
                if Some(module.type_of(init)) != module.pointee(ptr_ty) {
                    return Err(WriteError::Malformed(g, "initializer type differs from the global"));
                }
                w.write_vbr_u32(self.module_slot(init)?);
            }
        }

        w.write_vbr_u32(module.functions().len() as u32);
        for &f in module.functions() {
            let func = module
                .function(f)
                .ok_or(WriteError::Malformed(f, "function list holds a non-function"))?;
            let word = (u64::from(self.wire_type(module.type_of(f))?) << 4)
                | (u64::from(func.linkage.code()) << 1)
                | u64::from(!func.is_declaration());
            w.write_vbr_u64(word);
        }
        Ok(())
    }
}
