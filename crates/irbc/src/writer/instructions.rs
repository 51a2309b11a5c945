//! Instruction encoding.

use irbc_stream::Writer;

use super::function::FunctionEncoder;
use super::slots::SlotScope;
use crate::error::WriteError;
use crate::format::{packed, FormatFlags, GEP_INDEX_PLANES, VOLATILE_LOAD, VOLATILE_STORE};
use crate::ir::{Opcode, PrimitiveType, TypeId, TypeNode, ValueId};

/// Opcode, type reference and operand words of one instruction.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct Encoded {
    pub(super) code: u32,
    pub(super) ty: u32,
    pub(super) operands: Vec<u32>,
}

impl Encoded {
    /// Writes the smallest layout that holds every field.
    pub(super) fn write(&self, w: &mut Writer) {
        let Encoded { code, ty, operands } = self;
        let (code, ty) = (*code, *ty);
        if code < packed::OPCODE_LIMIT {
            let word = match operands.as_slice() {
                [] if ty < 4096 => Some(
                    packed::ONE_OPERAND | (code << 2) | (ty << 8) | (packed::NO_OPERAND << 20),
                ),
                [a] if ty < 4096 && *a < packed::NO_OPERAND => {
                    Some(packed::ONE_OPERAND | (code << 2) | (ty << 8) | (a << 20))
                }
                [a, b] if ty < 256 && *a < 256 && *b < 256 => {
                    Some(packed::TWO_OPERANDS | (code << 2) | (ty << 8) | (a << 16) | (b << 24))
                }
                [a, b, c] if ty < 64 && *a < 64 && *b < 64 && *c < 64 => Some(
                    packed::THREE_OPERANDS
                        | (code << 2)
                        | (ty << 8)
                        | (a << 14)
                        | (b << 20)
                        | (c << 26),
                ),
                _ => None,
            };
            if let Some(word) = word {
                w.write_fixed32(word);
                return;
            }
        }
        w.write_vbr_u32(code << 2);
        w.write_vbr_u32(ty);
        w.write_vbr_u32(operands.len() as u32);
        for &op in operands {
            w.write_vbr_u32(op);
        }
        w.align32();
    }
}

impl FunctionEncoder<'_, '_> {
    pub(super) fn write_instruction(&mut self, inst: ValueId, w: &mut Writer) -> Result<(), WriteError> {
        self.encode_instruction(inst)?.write(w);
        Ok(())
    }

    /// Slot of an operand that must live in the plane of `expected`.
    fn typed_slot(&mut self, inst: ValueId, v: ValueId, expected: TypeId) -> Result<u32, WriteError> {
        let module = self.module();
        if !module.same_type(module.type_of(v), expected) {
            return Err(WriteError::Malformed(inst, "operand type mismatch"));
        }
        self.value_slot(v)
    }

    fn label_slot(&mut self, inst: ValueId, v: ValueId) -> Result<u32, WriteError> {
        let module = self.module();
        if !module.is_primitive(module.type_of(v), PrimitiveType::Label) {
            return Err(WriteError::Malformed(inst, "operand is not a basic block"));
        }
        self.block_index(v)
    }

    pub(super) fn encode_instruction(&mut self, inst: ValueId) -> Result<Encoded, WriteError> {
        let module = self.module();
        let data = module
            .instruction(inst)
            .ok_or(WriteError::Malformed(inst, "block holds a non-instruction"))?;
        let opcode = data.opcode;
        let volatile = data.volatile;
        let ops = data.operands.clone();
        let result = module.type_of(inst);
        let void = PrimitiveType::Void.type_id();
        let bool_ty = PrimitiveType::Bool.type_id();
        let count = |allowed: &[usize]| {
            if allowed.contains(&ops.len()) {
                Ok(())
            } else {
                Err(WriteError::Malformed(inst, "wrong operand count"))
            }
        };

        let mut slots = Vec::with_capacity(ops.len());
        let ty = if opcode.is_binary() || opcode.is_comparison() {
            count(&[2])?;
            let ty = module.type_of(ops[0]);
            for &op in &ops {
                slots.push(self.typed_slot(inst, op, ty)?);
            }
            ty
        } else {
            match opcode {
                Opcode::Ret => {
                    count(&[0, 1])?;
                    match ops.first() {
                        Some(&v) => {
                            slots.push(self.value_slot(v)?);
                            self.module().type_of(v)
                        }
                        None => void,
                    }
                }
                Opcode::Br => {
                    count(&[1, 3])?;
                    slots.push(self.label_slot(inst, ops[0])?);
                    if ops.len() == 3 {
                        slots.push(self.label_slot(inst, ops[1])?);
                        slots.push(self.typed_slot(inst, ops[2], bool_ty)?);
                    }
                    void
                }
                Opcode::Switch => {
                    if ops.len() < 2 || ops.len() % 2 != 0 {
                        return Err(WriteError::Malformed(inst, "wrong operand count"));
                    }
                    let ty = module.type_of(ops[0]);
                    for pair in ops.chunks_exact(2) {
                        slots.push(self.typed_slot(inst, pair[0], ty)?);
                        slots.push(self.label_slot(inst, pair[1])?);
                    }
                    ty
                }
                Opcode::Call | Opcode::Invoke => self.encode_call(inst, opcode, &ops, &mut slots)?,
                Opcode::Unwind | Opcode::Unreachable => {
                    count(&[0])?;
                    void
                }
                Opcode::Shl | Opcode::Shr => {
                    count(&[2])?;
                    slots.push(self.typed_slot(inst, ops[0], result)?);
                    slots.push(self.typed_slot(inst, ops[1], PrimitiveType::UByte.type_id())?);
                    result
                }
                Opcode::Malloc | Opcode::Alloca => {
                    count(&[0, 1])?;
                    if module.pointee(result).is_none() {
                        return Err(WriteError::Malformed(inst, "allocation of non-pointer type"));
                    }
                    if let Some(&n) = ops.first() {
                        slots.push(self.typed_slot(inst, n, PrimitiveType::UInt.type_id())?);
                    }
                    result
                }
                Opcode::Free | Opcode::Load => {
                    count(&[1])?;
                    let ptr = module.type_of(ops[0]);
                    if module.pointee(ptr).is_none() {
                        return Err(WriteError::Malformed(inst, "operand is not a pointer"));
                    }
                    slots.push(self.value_slot(ops[0])?);
                    ptr
                }
                Opcode::Store => {
                    count(&[2])?;
                    let ptr = module.type_of(ops[1]);
                    let element = module
                        .pointee(ptr)
                        .ok_or(WriteError::Malformed(inst, "operand is not a pointer"))?;
                    slots.push(self.typed_slot(inst, ops[0], element)?);
                    slots.push(self.value_slot(ops[1])?);
                    ptr
                }
                Opcode::GetElementPtr => self.encode_gep(inst, &ops, &mut slots)?,
                Opcode::PHI => {
                    if ops.is_empty() || ops.len() % 2 != 0 {
                        return Err(WriteError::Malformed(inst, "wrong operand count"));
                    }
                    for pair in ops.chunks_exact(2) {
                        slots.push(self.typed_slot(inst, pair[0], result)?);
                        slots.push(self.label_slot(inst, pair[1])?);
                    }
                    result
                }
                Opcode::Cast | Opcode::VAArg => {
                    count(&[1])?;
                    let src = module.type_of(ops[0]);
                    slots.push(self.value_slot(ops[0])?);
                    slots.push(self.type_ref(src)?);
                    result
                }
                Opcode::Select => {
                    count(&[3])?;
                    slots.push(self.typed_slot(inst, ops[0], bool_ty)?);
                    slots.push(self.typed_slot(inst, ops[1], result)?);
                    slots.push(self.typed_slot(inst, ops[2], result)?);
                    result
                }
                _ => return Err(WriteError::Malformed(inst, "opcode is not an instruction")),
            }
        };

        let code = match (opcode, volatile) {
            (Opcode::Load, true) => VOLATILE_LOAD,
            (Opcode::Store, true) => VOLATILE_STORE,
            _ => opcode.code(),
        };
        Ok(Encoded {
            code,
            ty: self.type_ref(ty)?,
            operands: slots,
        })
    }

    /// `[callee, (normal, unwind,) fixed args.., (type, slot)*]`
    fn encode_call(
        &mut self,
        inst: ValueId,
        opcode: Opcode,
        ops: &[ValueId],
        slots: &mut Vec<u32>,
    ) -> Result<TypeId, WriteError> {
        let module = self.module();
        let fixed = if opcode == Opcode::Invoke { 3 } else { 1 };
        if ops.len() < fixed {
            return Err(WriteError::Malformed(inst, "wrong operand count"));
        }
        let callee_ty = module.type_of(ops[0]);
        let (_, params, vararg) = module
            .pointee(callee_ty)
            .filter(|&f| matches!(module.type_node(f), TypeNode::Function { .. }))
            .and_then(|f| module.signature(f))
            .ok_or(WriteError::Malformed(inst, "callee is not a function pointer"))?;
        if ops.len() < fixed + params.len() || (!vararg && ops.len() != fixed + params.len()) {
            return Err(WriteError::Malformed(inst, "wrong operand count"));
        }

        slots.push(self.value_slot(ops[0])?);
        if opcode == Opcode::Invoke {
            slots.push(self.label_slot(inst, ops[1])?);
            slots.push(self.label_slot(inst, ops[2])?);
        }
        let (args, rest) = ops[fixed..].split_at(params.len());
        for (&param, &arg) in params.iter().zip(args) {
            slots.push(self.typed_slot(inst, arg, param)?);
        }
        for &arg in rest {
            let arg_ty = self.module().type_of(arg);
            slots.push(self.type_ref(arg_ty)?);
            slots.push(self.value_slot(arg)?);
        }
        Ok(callee_ty)
    }

    /// `[base, idx*]`. Fixed-plane revisions imply each index's plane from
    /// its position; revision 2 tags every index with its plane.
    fn encode_gep(
        &mut self,
        inst: ValueId,
        ops: &[ValueId],
        slots: &mut Vec<u32>,
    ) -> Result<TypeId, WriteError> {
        let module = self.module();
        let (&base, indices) = ops
            .split_first()
            .ok_or(WriteError::Malformed(inst, "wrong operand count"))?;
        let base_ty = module.type_of(base);
        let mut cur = module
            .pointee(base_ty)
            .ok_or(WriteError::Malformed(inst, "getelementptr base is not a pointer"))?;
        let fixed = self.encoder().flags.contains(FormatFlags::FIXED_GEP_INDICES);
        let revision = self.encoder().revision();
        slots.push(self.value_slot(base)?);

        for (i, &index) in indices.iter().enumerate() {
            let module = self.module();
            let index_ty = module.type_of(index);
            if fixed {
                let into_struct = i > 0 && matches!(module.type_node(cur), TypeNode::Struct { .. });
                let want = if into_struct {
                    PrimitiveType::UByte
                } else {
                    PrimitiveType::Long
                };
                slots.push(self.typed_slot(inst, index, want.type_id())?);
            } else {
                let tag = module
                    .primitive_of(index_ty)
                    .and_then(|p| GEP_INDEX_PLANES.iter().position(|&q| q == p))
                    .ok_or(WriteError::NotEncodable {
                        what: "getelementptr index of this type",
                        revision,
                    })?;
                slots.push((self.value_slot(index)? << 2) | tag as u32);
            }
            if i > 0 {
                cur = self
                    .module()
                    .gep_step(cur, index)
                    .map_err(|_| WriteError::Malformed(inst, "getelementptr index"))?;
            }
        }
        Ok(base_ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Module;
    use crate::reader::ReadOptions;
    use crate::{read_module_with, write_module, CompactionPolicy, Revision, WriteOptions};

    fn encoded(code: u32, ty: u32, operands: Vec<u32>) -> Vec<u8> {
        let mut w = Writer::new();
        Encoded { code, ty, operands }.write(&mut w);
        w.into_bytes()
    }

    #[test]
    fn small_fields_pack_into_one_word() {
        assert_eq!(encoded(1, 7, vec![]).len(), 4);
        assert_eq!(encoded(1, 4095, vec![4094]).len(), 4);
        assert_eq!(encoded(7, 255, vec![255, 255]).len(), 4);
        assert_eq!(encoded(7, 63, vec![63, 63, 63]).len(), 4);
    }

    #[test]
    fn large_fields_fall_back_to_vbr() {
        let bytes = encoded(1, 7, vec![packed::NO_OPERAND]);
        assert_eq!(bytes[0] & 0b11, 0);
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(encoded(7, 64, vec![1, 2, 3])[0] & 0b11, 0);
        assert_eq!(encoded(VOLATILE_STORE, 9, vec![1, 2])[0] & 0b11, packed::TWO_OPERANDS as u8);
        assert_eq!(encoded(70, 9, vec![1])[0] & 0b11, 0);
    }

    fn store_module(volatile: bool) -> Module {
        let mut m = Module::new();
        let int = PrimitiveType::Int.type_id();
        let pint = m.pointer_type(int);
        let fn_ty = m.function_type(PrimitiveType::Void.type_id(), vec![pint, int], false);
        let f = m.new_function(fn_ty, crate::ir::Linkage::External).unwrap();
        let args = m.function(f).unwrap().arguments.clone();
        let bb = m.new_basic_block();
        m.append_block(f, bb).unwrap();
        let store = m.new_instruction(Opcode::Store, PrimitiveType::Void.type_id(), vec![args[1], args[0]]);
        m.set_volatile(store, volatile).unwrap();
        m.append_to_block(bb, store).unwrap();
        let load = m.new_instruction(Opcode::Load, int, vec![args[0]]);
        m.set_volatile(load, volatile).unwrap();
        m.append_to_block(bb, load).unwrap();
        let ret = m.new_instruction(Opcode::Ret, PrimitiveType::Void.type_id(), vec![]);
        m.append_to_block(bb, ret).unwrap();
        m
    }

    #[test]
    fn volatile_access_survives() {
        let m = store_module(true);
        let options = WriteOptions {
            revision: Revision::V2,
            compaction: CompactionPolicy::Never,
            target: None,
        };
        let bytes = write_module(&m, &options).unwrap();
        let back = read_module_with(&bytes, &ReadOptions::default()).unwrap();
        let volatile: Vec<bool> = back
            .values()
            .filter_map(|(_, d)| d.instruction())
            .filter(|i| matches!(i.opcode, Opcode::Load | Opcode::Store))
            .map(|i| i.volatile)
            .collect();
        assert_eq!(volatile, vec![true, true]);
    }

    #[test]
    fn mistyped_store_is_rejected() {
        let mut m = Module::new();
        let int = PrimitiveType::Int.type_id();
        let pint = m.pointer_type(int);
        let fn_ty = m.function_type(PrimitiveType::Void.type_id(), vec![pint], false);
        let f = m.new_function(fn_ty, crate::ir::Linkage::External).unwrap();
        let ptr = m.function(f).unwrap().arguments[0];
        let bb = m.new_basic_block();
        m.append_block(f, bb).unwrap();
        let wrong = m.const_double(1.5);
        let store = m.new_instruction(Opcode::Store, PrimitiveType::Void.type_id(), vec![wrong, ptr]);
        m.append_to_block(bb, store).unwrap();
        let ret = m.new_instruction(Opcode::Ret, PrimitiveType::Void.type_id(), vec![]);
        m.append_to_block(bb, ret).unwrap();
        assert_eq!(
            write_module(&m, &WriteOptions::default()),
            Err(WriteError::Malformed(store, "operand type mismatch"))
        );
    }
}
