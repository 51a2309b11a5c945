//! Type table encoding.

use irbc_stream::Writer;
use tracing::trace;

use super::ModuleEncoder;
use crate::error::WriteError;
use crate::format::{type_tag, BlockKind, FormatFlags, TYPE_PLANE_ID};
use crate::ir::{TypeId, TypeNode};

impl ModuleEncoder<'_> {
    /// Revision 0 keeps the table in a leading constant pool tagged with
    /// the type plane; later revisions have a TypeTable block.
    pub(super) fn write_type_table(&self, w: &mut Writer) -> Result<(), WriteError> {
        let table = self.module.type_table();
        let in_planes = self.flags.contains(FormatFlags::TYPES_IN_VALUE_PLANES);
        let kind = if in_planes {
            BlockKind::ConstantPool
        } else {
            BlockKind::TypeTable
        };
        w.try_block(kind.code(), |b| {
            b.write_vbr_u32(table.len() as u32);
            if in_planes {
                b.write_vbr_u32(TYPE_PLANE_ID);
            }
            for &ty in table {
                self.write_type_body(ty, b)?;
            }
            Ok::<(), WriteError>(())
        })?;
        trace!(types = table.len(), "wrote type table");
        Ok(())
    }

    fn write_type_body(&self, ty: TypeId, w: &mut Writer) -> Result<(), WriteError> {
        match self.module.type_node(ty) {
            TypeNode::Pointer(element) => {
                w.write_vbr_u32(type_tag::POINTER);
                w.write_vbr_u32(self.wire_type(*element)?);
            }
            TypeNode::Array { element, len } => {
                w.write_vbr_u32(type_tag::ARRAY);
                w.write_vbr_u32(self.wire_type(*element)?);
                w.write_vbr_u64(*len);
            }
            TypeNode::Struct { fields } => {
                w.write_vbr_u32(type_tag::STRUCT);
                w.write_vbr_u32(fields.len() as u32);
                for &f in fields {
                    w.write_vbr_u32(self.wire_type(f)?);
                }
            }
            TypeNode::Function {
                ret,
                params,
                vararg,
            } => {
                w.write_vbr_u32(type_tag::FUNCTION);
                w.write_vbr_u32(self.wire_type(*ret)?);
                w.write_vbr_u32(params.len() as u32);
                for &p in params {
                    w.write_vbr_u32(self.wire_type(p)?);
                }
                w.write_vbr_u32(u32::from(*vararg));
            }
            TypeNode::Primitive(p) => w.write_vbr_u32(p.id()),
            TypeNode::Opaque => return Err(WriteError::OpaqueType(ty)),
        }
        Ok(())
    }
}
