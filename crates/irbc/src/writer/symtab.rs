//! SymbolTable blocks.

use std::collections::HashMap;

use irbc_stream::Writer;

use super::function::FunctionEncoder;
use super::slots::{ModuleScope, SlotScope};
use super::ModuleEncoder;
use crate::error::WriteError;
use crate::format::{BlockKind, FormatFlags, TYPE_PLANE_ID};
use crate::ir::{PrimitiveType, TypeId, ValueId};

/// Named values grouped by type, in first-appearance order.
fn named_planes<S: SlotScope>(
    scope: &S,
    values: impl IntoIterator<Item = ValueId>,
) -> Vec<(TypeId, Vec<ValueId>)> {
    let module = scope.module();
    let mut planes: Vec<(TypeId, Vec<ValueId>)> = Vec::new();
    let mut plane_of: HashMap<TypeId, usize> = HashMap::new();
    for v in values {
        if module.name(v).is_none() {
            continue;
        }
        let ty = module.type_of(v);
        let i = *plane_of.entry(ty).or_insert_with(|| {
            planes.push((ty, Vec::new()));
            planes.len() - 1
        });
        planes[i].1.push(v);
    }
    planes
}

fn write_name(name: &str, flags: FormatFlags, w: &mut Writer) {
    w.write_string(name);
    if flags.contains(FormatFlags::PADDED_STRINGS) {
        w.align32();
    }
}

fn write_value_planes<S: SlotScope>(
    scope: &mut S,
    planes: &[(TypeId, Vec<ValueId>)],
    w: &mut Writer,
) -> Result<(), WriteError> {
    let flags = scope.encoder().flags;
    for (ty, values) in planes {
        w.write_vbr_u32(values.len() as u32);
        w.write_vbr_u32(scope.type_ref(*ty)?);
        for &v in values {
            w.write_vbr_u32(scope.value_slot(v)?);
            write_name(scope.module().name(v).unwrap_or_default(), flags, w);
        }
    }
    Ok(())
}

impl ModuleEncoder<'_> {
    /// Type names, then names of globals, functions and module constants.
    /// Nothing is written when the module names nothing.
    pub(super) fn write_module_symbols(&self, w: &mut Writer) -> Result<(), WriteError> {
        let module = self.module;
        let named_types: Vec<(TypeId, &str)> = PrimitiveType::ALL
            .iter()
            .map(|p| p.type_id())
            .chain(module.type_table().iter().copied())
            .filter_map(|ty| module.type_name(ty).map(|name| (ty, name)))
            .collect();

        let mut scope = ModuleScope(self);
        let values = module
            .globals()
            .iter()
            .chain(module.functions())
            .copied()
            .chain(self.module_pool.values());
        let planes = named_planes(&scope, values);
        if named_types.is_empty() && planes.is_empty() {
            return Ok(());
        }

        let in_planes = self.flags.contains(FormatFlags::TYPES_IN_VALUE_PLANES);
        w.try_block(BlockKind::SymbolTable.code(), |b| {
            if in_planes {
                if !named_types.is_empty() {
                    b.write_vbr_u32(named_types.len() as u32);
                    b.write_vbr_u32(TYPE_PLANE_ID);
                }
            } else {
                b.write_vbr_u32(named_types.len() as u32);
            }
            for &(ty, name) in &named_types {
                b.write_vbr_u32(self.wire_type(ty)?);
                write_name(name, self.flags, b);
            }
            write_value_planes(&mut scope, &planes, b)
        })
    }
}

impl FunctionEncoder<'_, '_> {
    /// Names of arguments, blocks, local constants and instructions.
    pub(super) fn write_function_symbols(&mut self, w: &mut Writer) -> Result<(), WriteError> {
        let module = self.module();
        let Some(func) = module.function(self.function()) else {
            return Ok(());
        };
        let mut values: Vec<ValueId> = func.arguments.clone();
        values.extend(&func.blocks);
        values.extend(self.local_constants());
        for &bb in &func.blocks {
            if let Some(block) = module.block(bb) {
                values.extend(&block.instructions);
            }
        }
        let planes = named_planes(&*self, values);
        if planes.is_empty() {
            return Ok(());
        }

        let types_in_planes = self.encoder().flags.contains(FormatFlags::TYPES_IN_VALUE_PLANES);
        w.try_block(BlockKind::SymbolTable.code(), |b| {
            if !types_in_planes {
                b.write_vbr_u32(0);
            }
            write_value_planes(&mut *self, &planes, b)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{Linkage, Module, Opcode, PrimitiveType};
    use crate::{read_module, write_module, Revision, WriteOptions};

    fn named_module() -> Module {
        let mut m = Module::new();
        let int = PrimitiveType::Int.type_id();
        let s = m.struct_type(vec![int, int]);
        m.name_type(s, "pair");
        m.name_type(int, "word");
        let g = m.new_global(s, false, Linkage::External, None);
        m.set_name(g, "origin");
        let fn_ty = m.function_type(int, vec![int], false);
        let f = m.new_function(fn_ty, Linkage::External).unwrap();
        m.set_name(f, "twice");
        let arg = m.function(f).unwrap().arguments[0];
        m.set_name(arg, "x");
        let bb = m.new_basic_block();
        m.set_name(bb, "entry");
        m.append_block(f, bb).unwrap();
        let sum = m.new_instruction(Opcode::Add, int, vec![arg, arg]);
        m.set_name(sum, "sum");
        m.append_to_block(bb, sum).unwrap();
        let ret = m.new_instruction(Opcode::Ret, PrimitiveType::Void.type_id(), vec![sum]);
        m.append_to_block(bb, ret).unwrap();
        m
    }

    #[test]
    fn names_survive_every_revision() {
        let m = named_module();
        for revision in [Revision::V0, Revision::V1, Revision::V2] {
            let bytes = write_module(&m, &WriteOptions::revision(revision)).unwrap();
            let back = read_module(&bytes).unwrap();
            let mut names: Vec<&str> = back.values().filter_map(|(_, d)| d.name.as_deref()).collect();
            names.sort_unstable();
            assert_eq!(names, ["entry", "origin", "sum", "twice", "x"], "{revision}");
            assert_eq!(back.type_name(PrimitiveType::Int.type_id()), Some("word"));
            let pair = back
                .type_table()
                .iter()
                .copied()
                .find(|&t| back.type_name(t) == Some("pair"));
            assert!(pair.is_some(), "{revision}");
        }
    }

    #[test]
    fn unnamed_module_has_no_symbol_table() {
        let mut m = Module::new();
        m.new_global(PrimitiveType::Int.type_id(), false, Linkage::External, None);
        let plain = write_module(&m, &WriteOptions::default()).unwrap();
        m.set_name(m.globals()[0], "g");
        let named = write_module(&m, &WriteOptions::default()).unwrap();
        assert!(named.len() > plain.len());
    }
}
