//! Function blocks and their compaction tables.

use std::collections::HashMap;

use irbc_stream::Writer;
use tracing::debug;

use super::constants::{self, Pool};
use super::slots::{PlaneMap, SlotScope};
use super::{CompactionPolicy, ModuleEncoder};
use crate::error::WriteError;
use crate::format::BlockKind;
use crate::ir::{Module, PrimitiveType, TypeId, ValueId};

/// Module values a function refers to, renumbered densely per type, plus
/// the global type ids the function's type references index into.
#[derive(Debug, Default)]
struct Compaction {
    types: Vec<u32>,
    type_index: HashMap<u32, u32>,
    planes: Vec<(TypeId, Vec<ValueId>)>,
    slots: PlaneMap,
}

/// Function-local encoding state.
pub(super) struct FunctionEncoder<'e, 'm> {
    enc: &'e ModuleEncoder<'m>,
    function: ValueId,
    blocks: HashMap<ValueId, u32>,
    locals: PlaneMap,
    pool: Pool,
    compaction: Option<Compaction>,
}

impl<'e, 'm> FunctionEncoder<'e, 'm> {
    fn new(enc: &'e ModuleEncoder<'m>, function: ValueId) -> Result<Self, WriteError> {
        let module = enc.module;
        let func = module
            .function(function)
            .ok_or(WriteError::Malformed(function, "not a function"))?;
        let blocks = func
            .blocks
            .iter()
            .enumerate()
            .map(|(i, &bb)| (bb, i as u32))
            .collect();

        let pool = Pool::new(module, enc.plan.local_constants(function));
        let mut locals = PlaneMap::default();
        for &arg in &func.arguments {
            locals.push(module.type_of(arg), arg);
        }
        for (ty, v) in pool.plane_order(module) {
            locals.push(ty, v);
        }
        for &bb in &func.blocks {
            for &inst in module.block(bb).map(|b| b.instructions.as_slice()).unwrap_or(&[]) {
                let ty = module.type_of(inst);
                if !module.is_primitive(ty, PrimitiveType::Void) {
                    locals.push(ty, inst);
                }
            }
        }
        Ok(FunctionEncoder {
            enc,
            function,
            blocks,
            locals,
            pool,
            compaction: None,
        })
    }

    /// Fills the compaction planes with every module value the function
    /// refers to, in order of first use.
    fn compact(&mut self) {
        let enc = self.enc;
        let module = enc.module;
        let mut compaction = Compaction::default();
        let mut plane_of: HashMap<TypeId, usize> = HashMap::new();
        let mut consider = |v: ValueId| {
            if !enc.module_planes.contains(v) || compaction.slots.contains(v) {
                return;
            }
            let ty = module.type_of(v);
            compaction.slots.push(ty, v);
            let i = *plane_of.entry(ty).or_insert_with(|| {
                compaction.planes.push((ty, Vec::new()));
                compaction.planes.len() - 1
            });
            compaction.planes[i].1.push(v);
        };
        for c in self.pool.values() {
            if !constants::is_string(module, c) {
                module.operands(c).iter().for_each(|&op| consider(op));
            }
        }
        for inst in instructions(module, self.function) {
            module.operands(inst).iter().for_each(|&op| consider(op));
        }
        self.compaction = Some(compaction);
    }

    fn write_body(&mut self) -> Result<Vec<u8>, WriteError> {
        let module = self.enc.module;
        let mut rest = Writer::new();
        if !self.pool.is_empty() {
            let pool = std::mem::take(&mut self.pool);
            let result = rest.try_block(BlockKind::ConstantPool.code(), |b| {
                constants::write_pool(&mut *self, &pool, b)
            });
            self.pool = pool;
            result?;
        }
        let blocks = module
            .function(self.function)
            .map(|f| f.blocks.clone())
            .unwrap_or_default();
        for bb in blocks {
            let insts = module
                .block(bb)
                .map(|b| b.instructions.clone())
                .unwrap_or_default();
            rest.try_block(BlockKind::BasicBlock.code(), |b| {
                for inst in insts {
                    self.write_instruction(inst, b)?;
                }
                Ok::<(), WriteError>(())
            })?;
        }
        self.write_function_symbols(&mut rest)?;

        let mut out = Writer::new();
        if let Some(c) = &self.compaction {
            let enc = self.enc;
            out.try_block(BlockKind::CompactionTable.code(), |b| {
                b.write_vbr_u32(c.types.len() as u32);
                for &t in &c.types {
                    b.write_vbr_u32(t);
                }
                for (ty, values) in &c.planes {
                    b.write_vbr_u32(values.len() as u32);
                    b.write_vbr_u32(enc.wire_type(*ty)?);
                    for &v in values {
                        b.write_vbr_u32(enc.module_slot(v)?);
                    }
                }
                Ok::<(), WriteError>(())
            })?;
        }
        out.write_bytes(rest.as_bytes());
        Ok(out.into_bytes())
    }

    pub(super) fn function(&self) -> ValueId {
        self.function
    }

    pub(super) fn local_constants(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.pool.values()
    }

    pub(super) fn block_index(&self, bb: ValueId) -> Result<u32, WriteError> {
        self.blocks
            .get(&bb)
            .copied()
            .ok_or(WriteError::OutOfScope(bb))
    }
}

impl SlotScope for FunctionEncoder<'_, '_> {
    fn module(&self) -> &Module {
        self.enc.module
    }

    fn encoder(&self) -> &ModuleEncoder<'_> {
        self.enc
    }

    /// Same search order as the reader: implicit null, compaction plane,
    /// module plane, local plane.
    fn value_slot(&mut self, v: ValueId) -> Result<u32, WriteError> {
        let module = self.enc.module;
        let ty = module.type_of(v);
        if module.is_primitive(ty, PrimitiveType::Label) {
            return self.block_index(v);
        }
        if self.enc.implicit_nulls() && module.is_null(v) {
            return Ok(0);
        }
        let mut base = self.enc.null_offset(ty);
        if let Some(c) = &self.compaction {
            if let Some(i) = c.slots.index(v) {
                return Ok(base + i);
            }
            base += c.slots.len(ty);
        }
        if let Some(i) = self.enc.module_planes.index(v) {
            return Ok(base + i);
        }
        base += self.enc.module_planes.len(ty);
        self.locals
            .index(v)
            .map(|i| base + i)
            .ok_or(WriteError::OutOfScope(v))
    }

    fn type_ref(&mut self, ty: TypeId) -> Result<u32, WriteError> {
        let wire = self.enc.wire_type(ty)?;
        let Some(c) = self.compaction.as_mut() else {
            return Ok(wire);
        };
        let next = c.types.len() as u32;
        let index = *c.type_index.entry(wire).or_insert(next);
        if index == next {
            c.types.push(wire);
        }
        Ok(index)
    }
}

/// Instructions of `function` in block order.
fn instructions(module: &Module, function: ValueId) -> impl Iterator<Item = ValueId> + '_ {
    module
        .function(function)
        .into_iter()
        .flat_map(|f| f.blocks.iter())
        .filter_map(|&bb| module.block(bb))
        .flat_map(|b| b.instructions.iter().copied())
}

impl ModuleEncoder<'_> {
    /// Encodes one function body, with or without a compaction table as
    /// the policy and the resulting sizes decide.
    pub(super) fn encode_function(&self, function: ValueId) -> Result<Vec<u8>, WriteError> {
        let compacted = || -> Result<Vec<u8>, WriteError> {
            let mut f = FunctionEncoder::new(self, function)?;
            f.compact();
            f.write_body()
        };
        let plain = || FunctionEncoder::new(self, function)?.write_body();

        match self.compaction {
            CompactionPolicy::Never => plain(),
            CompactionPolicy::Always => compacted(),
            CompactionPolicy::Auto => {
                let plain = plain()?;
                let compacted = compacted()?;
                let use_compaction = compacted.len() < plain.len();
                debug!(
                    function = %function,
                    plain = plain.len(),
                    compacted = compacted.len(),
                    use_compaction,
                    "chose function encoding"
                );
                Ok(if use_compaction { compacted } else { plain })
            }
        }
    }
}
