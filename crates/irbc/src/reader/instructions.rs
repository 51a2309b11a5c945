//! Instruction decoding.

use super::Session;
use crate::error::ErrorKind;
use crate::format::{packed, FormatFlags, GEP_INDEX_PLANES, VOLATILE_LOAD, VOLATILE_STORE};
use crate::ir::{Opcode, PrimitiveType, TypeId, TypeNode, ValueId};

/// An instruction as laid out on the wire, before operand resolution.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct RawInstruction {
    pub(super) code: u32,
    pub(super) ty: u32,
    pub(super) operands: Vec<u32>,
}

fn expect_operands(ops: &[u32], counts: &[usize]) -> Result<(), ErrorKind> {
    if counts.contains(&ops.len()) {
        Ok(())
    } else {
        Err(ErrorKind::InvalidValue("wrong operand count"))
    }
}

impl Session<'_> {
    pub(super) fn read_raw_instruction(&mut self) -> Result<RawInstruction, ErrorKind> {
        let format = u32::from(self.reader.peek_u8()?) & 0b11;
        if format == 0 {
            let code = self.reader.read_vbr_u32()? >> 2;
            let ty = self.reader.read_vbr_u32()?;
            let nops = self.read_count()?;
            let mut operands = Vec::with_capacity(nops as usize);
            for _ in 0..nops {
                operands.push(self.reader.read_vbr_u32()?);
            }
            self.reader.align32()?;
            return Ok(RawInstruction { code, ty, operands });
        }

        let word = self.reader.read_fixed32()?;
        let code = (word >> 2) & 0x3f;
        let (ty, operands) = match format {
            packed::ONE_OPERAND => {
                let op = (word >> 20) & 0xfff;
                let operands = if op == packed::NO_OPERAND { vec![] } else { vec![op] };
                ((word >> 8) & 0xfff, operands)
            }
            packed::TWO_OPERANDS => (
                (word >> 8) & 0xff,
                vec![(word >> 16) & 0xff, word >> 24],
            ),
            _ => (
                (word >> 8) & 0x3f,
                vec![(word >> 14) & 0x3f, (word >> 20) & 0x3f, word >> 26],
            ),
        };
        Ok(RawInstruction { code, ty, operands })
    }

    /// Decodes one instruction and appends it to `block`.
    pub(super) fn read_instruction(&mut self, block: ValueId) -> Result<(), ErrorKind> {
        let raw = self.read_raw_instruction()?;
        let (opcode, volatile) = match raw.code {
            VOLATILE_LOAD => (Opcode::Load, true),
            VOLATILE_STORE => (Opcode::Store, true),
            code => (
                Opcode::from_u32(code).ok_or(ErrorKind::InvalidValue("unknown opcode"))?,
                false,
            ),
        };
        let ty = self.type_ref(raw.ty)?;
        let (result_ty, operands) = self.decode_operands(opcode, ty, &raw.operands)?;

        let inst = self.module.new_instruction(opcode, result_ty, operands);
        if volatile {
            self.module.set_volatile(inst, true)?;
        }
        self.module.append_to_block(block, inst)?;
        if !self.module.is_primitive(result_ty, PrimitiveType::Void) {
            self.define_value(result_ty, inst)?;
        }
        Ok(())
    }

    fn operand(&mut self, ty: TypeId, slot: u32) -> Result<ValueId, ErrorKind> {
        self.value_ref(ty, slot, true)
    }

    fn pointee_of(&self, ty: TypeId) -> Result<TypeId, ErrorKind> {
        self.module
            .pointee(ty)
            .ok_or(ErrorKind::InvalidType("instruction type is not a pointer"))
    }

    /// Resolves wire operands to values and computes the result type.
    fn decode_operands(
        &mut self,
        opcode: Opcode,
        ty: TypeId,
        ops: &[u32],
    ) -> Result<(TypeId, Vec<ValueId>), ErrorKind> {
        let void = PrimitiveType::Void.type_id();
        let bool_ty = PrimitiveType::Bool.type_id();

        if opcode.is_binary() || opcode.is_comparison() {
            expect_operands(ops, &[2])?;
            let values = vec![self.operand(ty, ops[0])?, self.operand(ty, ops[1])?];
            let result = if opcode.is_comparison() { bool_ty } else { ty };
            return Ok((result, values));
        }

        Ok(match opcode {
            Opcode::Ret => {
                expect_operands(ops, &[0, 1])?;
                let values = match ops.first() {
                    Some(&slot) => vec![self.operand(ty, slot)?],
                    None => Vec::new(),
                };
                (void, values)
            }
            Opcode::Br => {
                expect_operands(ops, &[1, 3])?;
                let mut values = vec![self.block_for(ops[0])?];
                if ops.len() == 3 {
                    values.push(self.block_for(ops[1])?);
                    values.push(self.operand(bool_ty, ops[2])?);
                }
                (void, values)
            }
            Opcode::Switch => {
                if ops.len() < 2 || ops.len() % 2 != 0 {
                    return Err(ErrorKind::InvalidValue("wrong operand count"));
                }
                let mut values = vec![self.operand(ty, ops[0])?, self.block_for(ops[1])?];
                for pair in ops[2..].chunks_exact(2) {
                    values.push(self.operand(ty, pair[0])?);
                    values.push(self.block_for(pair[1])?);
                }
                (void, values)
            }
            Opcode::Call | Opcode::Invoke => self.decode_call(opcode, ty, ops)?,
            Opcode::Unwind | Opcode::Unreachable => {
                expect_operands(ops, &[0])?;
                (void, Vec::new())
            }
            Opcode::Shl | Opcode::Shr => {
                expect_operands(ops, &[2])?;
                let amount = PrimitiveType::UByte.type_id();
                (
                    ty,
                    vec![self.operand(ty, ops[0])?, self.operand(amount, ops[1])?],
                )
            }
            Opcode::Malloc | Opcode::Alloca => {
                expect_operands(ops, &[0, 1])?;
                self.pointee_of(ty)?;
                let values = match ops.first() {
                    Some(&slot) => vec![self.operand(PrimitiveType::UInt.type_id(), slot)?],
                    None => Vec::new(),
                };
                (ty, values)
            }
            Opcode::Free => {
                expect_operands(ops, &[1])?;
                self.pointee_of(ty)?;
                (void, vec![self.operand(ty, ops[0])?])
            }
            Opcode::Load => {
                expect_operands(ops, &[1])?;
                let element = self.pointee_of(ty)?;
                (element, vec![self.operand(ty, ops[0])?])
            }
            Opcode::Store => {
                expect_operands(ops, &[2])?;
                let element = self.pointee_of(ty)?;
                (
                    void,
                    vec![self.operand(element, ops[0])?, self.operand(ty, ops[1])?],
                )
            }
            Opcode::GetElementPtr => self.decode_gep(ty, ops)?,
            Opcode::PHI => {
                if ops.is_empty() || ops.len() % 2 != 0 {
                    return Err(ErrorKind::InvalidValue("wrong operand count"));
                }
                let mut values = Vec::with_capacity(ops.len());
                for pair in ops.chunks_exact(2) {
                    values.push(self.operand(ty, pair[0])?);
                    values.push(self.block_for(pair[1])?);
                }
                (ty, values)
            }
            Opcode::Cast | Opcode::VAArg => {
                expect_operands(ops, &[2])?;
                let src = self.type_ref(ops[1])?;
                (ty, vec![self.operand(src, ops[0])?])
            }
            Opcode::Select => {
                expect_operands(ops, &[3])?;
                (
                    ty,
                    vec![
                        self.operand(bool_ty, ops[0])?,
                        self.operand(ty, ops[1])?,
                        self.operand(ty, ops[2])?,
                    ],
                )
            }
            _ => return Err(ErrorKind::InvalidValue("unknown opcode")),
        })
    }

    /// `[callee, (normal, unwind,) fixed args.., (type, slot)*]`
    fn decode_call(
        &mut self,
        opcode: Opcode,
        ty: TypeId,
        ops: &[u32],
    ) -> Result<(TypeId, Vec<ValueId>), ErrorKind> {
        let fn_ty = self.pointee_of(ty)?;
        let (ret, params, vararg) = match self.module.type_node(fn_ty) {
            TypeNode::Function { .. } => self
                .module
                .signature(fn_ty)
                .ok_or(ErrorKind::InvalidType("callee is not a function"))?,
            _ => return Err(ErrorKind::InvalidType("callee is not a function")),
        };
        let fixed = if opcode == Opcode::Invoke { 3 } else { 1 };
        if ops.len() < fixed + params.len() {
            return Err(ErrorKind::InvalidValue("wrong operand count"));
        }

        let mut values = Vec::with_capacity(ops.len());
        values.push(self.operand(ty, ops[0])?);
        if opcode == Opcode::Invoke {
            values.push(self.block_for(ops[1])?);
            values.push(self.block_for(ops[2])?);
        }
        let (args, rest) = ops[fixed..].split_at(params.len());
        for (&param, &slot) in params.iter().zip(args) {
            values.push(self.operand(param, slot)?);
        }
        if !rest.is_empty() && (!vararg || rest.len() % 2 != 0) {
            return Err(ErrorKind::InvalidValue("wrong operand count"));
        }
        for pair in rest.chunks_exact(2) {
            let arg_ty = self.type_ref(pair[0])?;
            values.push(self.operand(arg_ty, pair[1])?);
        }
        Ok((ret, values))
    }

    /// `[base, idx*]`, walking the indexed type to find the result.
    fn decode_gep(&mut self, ty: TypeId, ops: &[u32]) -> Result<(TypeId, Vec<ValueId>), ErrorKind> {
        let (&base, indices) = ops
            .split_first()
            .ok_or(ErrorKind::InvalidValue("wrong operand count"))?;
        let mut cur = self.pointee_of(ty)?;
        let mut values = Vec::with_capacity(ops.len());
        values.push(self.operand(ty, base)?);

        let fixed = self.flags.contains(FormatFlags::FIXED_GEP_INDICES);
        for (i, &raw) in indices.iter().enumerate() {
            let (index_ty, slot) = if fixed {
                let into_struct =
                    i > 0 && matches!(self.module.type_node(cur), TypeNode::Struct { .. });
                let p = if into_struct {
                    PrimitiveType::UByte
                } else {
                    PrimitiveType::Long
                };
                (p.type_id(), raw)
            } else {
                (GEP_INDEX_PLANES[(raw & 0b11) as usize].type_id(), raw >> 2)
            };
            let index = self.operand(index_ty, slot)?;
            if i > 0 {
                cur = self
                    .module
                    .gep_step(cur, index)
                    .map_err(|_| ErrorKind::InvalidValue("bad getelementptr index"))?;
            }
            values.push(index);
        }
        Ok((self.module.pointer_type(cur), values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ReadOptions;
    use irbc_stream::Writer;

    fn raw(bytes: &[u8]) -> RawInstruction {
        let options = ReadOptions::default();
        let mut session = Session::new(bytes, &options);
        session.read_raw_instruction().unwrap()
    }

    #[test]
    fn packed_one_operand() {
        let word: u32 = 1 | (Opcode::Ret.code() << 2) | (7 << 8) | (5 << 20);
        assert_eq!(
            raw(&word.to_le_bytes()),
            RawInstruction {
                code: Opcode::Ret.code(),
                ty: 7,
                operands: vec![5],
            }
        );
        let word: u32 = 1 | (Opcode::Ret.code() << 2) | (packed::NO_OPERAND << 20);
        assert!(raw(&word.to_le_bytes()).operands.is_empty());
    }

    #[test]
    fn packed_two_and_three_operands() {
        let word: u32 = 2 | (Opcode::Add.code() << 2) | (7 << 8) | (200 << 16) | (255 << 24);
        assert_eq!(raw(&word.to_le_bytes()).operands, vec![200, 255]);

        let word: u32 =
            3 | (Opcode::Select.code() << 2) | (7 << 8) | (1 << 14) | (63 << 20) | (40 << 26);
        let r = raw(&word.to_le_bytes());
        assert_eq!((r.code, r.ty), (Opcode::Select.code(), 7));
        assert_eq!(r.operands, vec![1, 63, 40]);
    }

    #[test]
    fn vbr_form_is_padded() {
        let mut w = Writer::new();
        w.write_vbr_u32(Opcode::Call.code() << 2);
        w.write_vbr_u32(300);
        w.write_vbr_u32(4);
        for op in [1, 2, 3, 70_000] {
            w.write_vbr_u32(op);
        }
        w.align32();
        w.write_u8(0xee);
        let bytes = w.into_bytes();
        let options = ReadOptions::default();
        let mut session = Session::new(&bytes, &options);
        let r = session.read_raw_instruction().unwrap();
        assert_eq!(r.ty, 300);
        assert_eq!(r.operands, vec![1, 2, 3, 70_000]);
        assert_eq!(session.reader.read_u8(), Ok(0xee));
    }

    #[test]
    fn short_packed_word_is_truncated() {
        let options = ReadOptions::default();
        let bytes = [0x05, 0x00];
        let mut session = Session::new(&bytes, &options);
        assert_eq!(session.read_raw_instruction(), Err(ErrorKind::Truncated));
    }
}
