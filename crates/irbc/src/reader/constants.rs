//! ConstantPool blocks, at module or function scope.

use tracing::trace;

use super::Session;
use crate::error::ErrorKind;
use crate::format::FormatFlags;
use crate::ir::{Opcode, PrimitiveType, TypeId, TypeNode, ValueId};

impl Session<'_> {
    /// Reads `(count, type)` planes until the block ends, appending each
    /// constant to the current scope.
    pub(super) fn read_constant_pool(&mut self) -> Result<(), ErrorKind> {
        let mut total = 0usize;
        while !self.block_done() {
            let count = self.read_count()?;
            let ty = self.read_type_ref()?;
            if self.module.is_primitive(ty, PrimitiveType::Void) {
                for _ in 0..count {
                    self.read_string_constant()?;
                }
            } else {
                for _ in 0..count {
                    let value = self.read_constant(ty)?;
                    self.define_value(ty, value)?;
                }
            }
            total += count as usize;
        }
        trace!(
            constants = total,
            local = self.func.is_some(),
            "decoded constant pool"
        );
        Ok(())
    }

    /// A byte array stored as raw bytes.
    fn read_string_constant(&mut self) -> Result<(), ErrorKind> {
        let ty = self.read_type_ref()?;
        let (element, len) = match self.module.type_node(ty) {
            TypeNode::Array { element, len } => (self.module.resolve(*element), *len),
            _ => return Err(ErrorKind::InvalidType("string constant of non-array type")),
        };
        let len = self.check_count(len)? as usize;
        let bytes = self.reader.read_bytes(len)?;
        let elems = match self.module.primitive_of(element) {
            Some(PrimitiveType::UByte) => bytes
                .iter()
                .map(|&b| self.module.const_uint(element, u64::from(b)))
                .collect::<Result<Vec<_>, _>>()?,
            Some(PrimitiveType::SByte) => bytes
                .iter()
                .map(|&b| self.module.const_int(element, i64::from(b as i8)))
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(ErrorKind::InvalidType("string element is not a byte")),
        };
        if self.flags.contains(FormatFlags::PADDED_STRINGS) {
            self.reader.align32()?;
        }
        let value = self.module.const_array(ty, elems)?;
        self.define_value(ty, value)
    }

    fn read_constant(&mut self, ty: TypeId) -> Result<ValueId, ErrorKind> {
        if let Some(p) = self.module.primitive_of(ty) {
            return self.read_scalar(p);
        }

        let nops = self.read_count()?;
        if nops > 0 {
            let code = self.reader.read_vbr_u32()?;
            let opcode = Opcode::from_u32(code)
                .filter(|op| op.is_constant_expr())
                .ok_or(ErrorKind::InvalidValue("bad constant expression opcode"))?;
            let mut operands = Vec::with_capacity(nops as usize);
            for _ in 0..nops {
                let slot = self.reader.read_vbr_u32()?;
                let op_ty = self.read_type_ref()?;
                operands.push(self.value_ref(op_ty, slot, true)?);
            }
            return self
                .module
                .const_expr(opcode, ty, operands)
                .map_err(|_| ErrorKind::InvalidValue("malformed constant expression"));
        }

        match self.module.type_node(ty).clone() {
            TypeNode::Pointer(_) => {
                if !self.flags.contains(FormatFlags::EXPLICIT_NULLS) {
                    return Err(ErrorKind::InvalidValue("explicit null pointer"));
                }
                self.module
                    .null_value(ty)
                    .ok_or(ErrorKind::InvalidValue("type has no null value"))
            }
            TypeNode::Array { element, len } => {
                let len = self.check_count(len)?;
                let elems = self.read_members(std::iter::repeat(element).take(len as usize))?;
                Ok(self.module.const_array(ty, elems)?)
            }
            TypeNode::Struct { fields } => {
                let elems = self.read_members(fields.into_iter())?;
                Ok(self.module.const_struct(ty, elems)?)
            }
            _ => Err(ErrorKind::InvalidValue("no constants of this type")),
        }
    }

    fn read_members(&mut self, types: impl Iterator<Item = TypeId>) -> Result<Vec<ValueId>, ErrorKind> {
        let mut out = Vec::new();
        for ty in types {
            let slot = self.reader.read_vbr_u32()?;
            out.push(self.value_ref(ty, slot, true)?);
        }
        Ok(out)
    }

    fn read_scalar(&mut self, p: PrimitiveType) -> Result<ValueId, ErrorKind> {
        let ty = p.type_id();
        match p {
            PrimitiveType::Bool => match self.reader.read_vbr_u64()? {
                0 => Ok(self.module.const_bool(false)),
                1 => Ok(self.module.const_bool(true)),
                _ => Err(ErrorKind::InvalidValue("bool constant is not 0 or 1")),
            },
            PrimitiveType::Float => Ok(self.module.const_float_bits(self.reader.read_fixed32()?)),
            PrimitiveType::Double => Ok(self.module.const_double_bits(self.reader.read_fixed64()?)),
            p if p.is_integer() && p.is_signed() => {
                let v = self.reader.read_vbr_i64()?;
                self.module
                    .const_int(ty, v)
                    .map_err(|_| ErrorKind::InvalidValue("integer constant out of range"))
            }
            p if p.is_integer() => {
                let v = self.reader.read_vbr_u64()?;
                self.module
                    .const_uint(ty, v)
                    .map_err(|_| ErrorKind::InvalidValue("integer constant out of range"))
            }
            _ => Err(ErrorKind::InvalidValue("no constants of this type")),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::format::{BlockKind, MAGIC};
    use crate::ir::{ConstantKind, Opcode, TypeNode};
    use crate::{read_module, ErrorKind, ReadOptions};
    use irbc_stream::Writer;

    /// Revision-2 module with `%t13 = [3 x ubyte]`, `%t14 = { int, %t15 }`,
    /// `%t15 = int*` and one global `%t15`, followed by `pool`.
    fn module(word: u32, pool: impl FnOnce(&mut Writer)) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_bytes(&MAGIC);
        w.block(BlockKind::Module.code(), |m| {
            m.write_vbr_u32(word);
            m.block(BlockKind::TypeTable.code(), |t| {
                t.write_vbr_u32(3);
                t.write_vbr_u32(0x22);
                t.write_vbr_u32(2);
                t.write_vbr_u32(3);
                t.write_vbr_u32(0x21);
                t.write_vbr_u32(2);
                t.write_vbr_u32(7);
                t.write_vbr_u32(15);
                t.write_vbr_u32(0x23);
                t.write_vbr_u32(7);
            });
            m.block(BlockKind::ModuleGlobalInfo.code(), |g| {
                g.write_vbr_u32(1);
                g.write_vbr_u32(15 << 5);
                g.write_vbr_u32(0);
            });
            m.block(BlockKind::ConstantPool.code(), pool);
        });
        w.into_bytes()
    }

    fn no_verify() -> ReadOptions {
        ReadOptions {
            verify: false,
            ..ReadOptions::default()
        }
    }

    #[test]
    fn strings_are_raw_bytes() {
        let bytes = module(0x20, |p| {
            p.write_vbr_u32(1);
            p.write_vbr_u32(0);
            p.write_vbr_u32(13);
            p.write_bytes(b"hi\0");
        });
        let m = crate::read_module_with(&bytes, &no_verify()).unwrap();
        let (id, _) = m
            .values()
            .find(|(_, v)| v.constant().is_some_and(|c| c.kind == ConstantKind::Array))
            .unwrap();
        let elems = m.operands(id).to_vec();
        assert_eq!(elems.len(), 3);
        assert_eq!(m.constant(elems[0]).unwrap().kind, ConstantKind::UInt(u64::from(b'h')));
        assert!(m.is_null(elems[2]));
    }

    #[test]
    fn struct_forward_references_resolve_within_the_pool() {
        // int plane: slot 1 = 7. struct plane: { int slot 2, global }.
        // The struct is read before int slot 2 exists.
        let bytes = module(0x20, |p| {
            p.write_vbr_u32(1);
            p.write_vbr_u32(14);
            p.write_vbr_u32(0);
            p.write_vbr_u32(2);
            p.write_vbr_u32(1);
            p.write_vbr_u32(2);
            p.write_vbr_u32(7);
            p.write_vbr_i64(7);
            p.write_vbr_i64(-7);
        });
        let m = crate::read_module_with(&bytes, &no_verify()).unwrap();
        let (id, _) = m
            .values()
            .find(|(_, v)| v.constant().is_some_and(|c| c.kind == ConstantKind::Struct))
            .unwrap();
        let ops = m.operands(id).to_vec();
        assert_eq!(m.constant(ops[0]).unwrap().kind, ConstantKind::Int(-7));
        assert_eq!(ops[1], m.globals()[0]);
    }

    #[test]
    fn struct_of_forward_nulls_folds_to_null() {
        // Revision 1: int* plane = [global, null], then the struct
        // { int slot 0, int* slot 1 } before the int plane holds its zero.
        let bytes = module(0x10, |p| {
            p.write_vbr_u32(1);
            p.write_vbr_u32(15);
            p.write_vbr_u32(0);
            p.write_vbr_u32(1);
            p.write_vbr_u32(14);
            p.write_vbr_u32(0);
            p.write_vbr_u32(0);
            p.write_vbr_u32(1);
            p.write_vbr_u32(1);
            p.write_vbr_u32(7);
            p.write_vbr_i64(0);
        });
        let m = read_module(&bytes).unwrap();
        assert!(!m
            .values()
            .any(|(_, v)| v.constant().is_some_and(|c| c.kind == ConstantKind::Struct)));
        assert!(m.values().any(|(id, v)| {
            v.is_null() && matches!(m.type_node(m.type_of(id)), TypeNode::Struct { .. })
        }));
    }

    #[test]
    fn constant_expressions_decode() {
        // cast of the global to int*: nops 1, opcode Cast, (slot 1, %t15)
        let bytes = module(0x20, |p| {
            p.write_vbr_u32(1);
            p.write_vbr_u32(15);
            p.write_vbr_u32(1);
            p.write_vbr_u32(Opcode::Cast.code());
            p.write_vbr_u32(1);
            p.write_vbr_u32(15);
        });
        let m = crate::read_module_with(&bytes, &no_verify()).unwrap();
        let (id, _) = m
            .values()
            .find(|(_, v)| {
                v.constant()
                    .is_some_and(|c| c.kind == ConstantKind::Expr(Opcode::Cast))
            })
            .unwrap();
        assert_eq!(m.operands(id), &[m.globals()[0]]);
    }

    #[test]
    fn non_constant_opcode_is_rejected() {
        let bytes = module(0x20, |p| {
            p.write_vbr_u32(1);
            p.write_vbr_u32(15);
            p.write_vbr_u32(1);
            p.write_vbr_u32(Opcode::Load.code());
            p.write_vbr_u32(1);
            p.write_vbr_u32(15);
        });
        let err = read_module(&bytes).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidValue(_)));
    }

    #[test]
    fn explicit_null_pointer_depends_on_revision() {
        let pool = |p: &mut Writer| {
            p.write_vbr_u32(1);
            p.write_vbr_u32(15);
            p.write_vbr_u32(0);
        };
        let err = read_module(&module(0x20, pool)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidValue("explicit null pointer"));
        assert!(read_module(&module(0x10, pool)).is_ok());
    }

    #[test]
    fn dangling_pool_reference_is_unresolved() {
        let bytes = module(0x20, |p| {
            p.write_vbr_u32(1);
            p.write_vbr_u32(14);
            p.write_vbr_u32(0);
            p.write_vbr_u32(9);
            p.write_vbr_u32(0);
        });
        let err = read_module(&bytes).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnresolvedReference { .. }));
    }

    #[test]
    fn huge_array_length_is_truncated_not_allocated() {
        let mut w = Writer::new();
        w.write_bytes(&MAGIC);
        w.block(BlockKind::Module.code(), |m| {
            m.write_vbr_u32(0x20);
            m.block(BlockKind::TypeTable.code(), |t| {
                t.write_vbr_u32(1);
                t.write_vbr_u32(0x22);
                t.write_vbr_u32(7);
                t.write_vbr_u64(u64::MAX);
            });
            m.block(BlockKind::ConstantPool.code(), |p| {
                p.write_vbr_u32(1);
                p.write_vbr_u32(13);
                p.write_vbr_u32(0);
            });
        });
        let err = read_module(&w.into_bytes()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Truncated);
    }
}
