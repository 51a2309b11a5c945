//! Module type table.

use tracing::debug;

use super::Session;
use crate::error::ErrorKind;
use crate::format::{canonical_type_slot, type_tag, FormatFlags, TYPE_PLANE_ID};
use crate::ir::{PrimitiveType, TypeId, TypeNode, FIRST_DERIVED};

impl Session<'_> {
    /// TypeTable block: `count` then `count` bodies.
    pub(super) fn read_type_table(&mut self) -> Result<(), ErrorKind> {
        if self.types_read {
            return Err(ErrorKind::InvalidType("second type table"));
        }
        let count = self.read_count()?;
        self.read_type_bodies(count)
    }

    /// Revision 0 keeps the type table in a constant pool whose only plane is
    /// tagged with the reserved type plane id.
    pub(super) fn read_type_pool(&mut self) -> Result<(), ErrorKind> {
        let count = self.read_count()?;
        let plane = self.reader.read_vbr_u32()?;
        if plane != TYPE_PLANE_ID {
            return Err(ErrorKind::InvalidType("type pool plane is not the type plane"));
        }
        self.read_type_bodies(count)?;
        if !self.block_done() {
            return Err(ErrorKind::InvalidType("type pool holds more than one plane"));
        }
        Ok(())
    }

    /// Reads `count` bodies. Every slot starts out opaque so bodies can name
    /// themselves and later siblings.
    fn read_type_bodies(&mut self, count: u32) -> Result<(), ErrorKind> {
        self.type_slots = (0..count).map(|_| self.module.new_opaque_type()).collect();
        self.types_read = true;
        for i in 0..count as usize {
            let node = self.read_type_body()?;
            let slot = self.type_slots[i];
            self.module
                .refine_type(slot, node)
                .map_err(|_| ErrorKind::InvalidType("malformed type body"))?;
        }
        self.module.canonicalize_types();
        if self.module.by_value_cycle().is_some() {
            return Err(ErrorKind::InvalidType("type contains itself by value"));
        }
        debug!(
            declared = count,
            distinct = self.module.type_table().len(),
            "decoded type table"
        );
        Ok(())
    }

    fn read_type_body(&mut self) -> Result<TypeNode, ErrorKind> {
        let tag = self.reader.read_vbr_u32()?;
        Ok(match tag {
            type_tag::FUNCTION => {
                let ret = self.read_global_type()?;
                let count = self.read_count()?;
                let params = (0..count)
                    .map(|_| self.read_global_type())
                    .collect::<Result<Vec<_>, _>>()?;
                let vararg = self.reader.read_vbr_u32()? != 0;
                TypeNode::Function {
                    ret,
                    params,
                    vararg,
                }
            }
            type_tag::STRUCT => {
                let count = self.read_count()?;
                let fields = (0..count)
                    .map(|_| self.read_global_type())
                    .collect::<Result<Vec<_>, _>>()?;
                TypeNode::Struct { fields }
            }
            type_tag::ARRAY => {
                let element = self.read_global_type()?;
                let len = self.reader.read_vbr_u64()?;
                TypeNode::Array { element, len }
            }
            type_tag::POINTER => TypeNode::Pointer(self.read_global_type()?),
            other => PrimitiveType::from_id(other)
                .map(TypeNode::Primitive)
                .ok_or(ErrorKind::InvalidType("unknown type tag"))?,
        })
    }

    fn read_global_type(&mut self) -> Result<TypeId, ErrorKind> {
        let wire = self.reader.read_vbr_u32()?;
        self.global_type(wire)
    }

    /// Type for a module-level wire id.
    pub(super) fn global_type(&self, wire: u32) -> Result<TypeId, ErrorKind> {
        let slot = canonical_type_slot(wire, self.flags)
            .ok_or(ErrorKind::InvalidType("the type plane is not a value type"))?;
        if slot < FIRST_DERIVED {
            return PrimitiveType::from_id(slot)
                .map(PrimitiveType::type_id)
                .ok_or(ErrorKind::InvalidType("unknown primitive type"));
        }
        self.type_slots
            .get((slot - FIRST_DERIVED) as usize)
            .map(|&t| self.module.resolve(t))
            .ok_or(ErrorKind::InvalidType("type slot out of range"))
    }

    /// Type for a wire id in the current scope: inside a function with a
    /// compaction table the id indexes the table's type list.
    pub(super) fn type_ref(&self, wire: u32) -> Result<TypeId, ErrorKind> {
        match self.func.as_ref() {
            Some(f) if !f.compact_types.is_empty() => {
                let global = f
                    .compact_types
                    .get(wire as usize)
                    .copied()
                    .ok_or(ErrorKind::InvalidType("compacted type index out of range"))?;
                self.global_type(global)
            }
            _ => self.global_type(wire),
        }
    }

    pub(super) fn read_type_ref(&mut self) -> Result<TypeId, ErrorKind> {
        let wire = self.reader.read_vbr_u32()?;
        self.type_ref(wire)
    }

    /// Whether `wire` is the revision 0 type plane id. Under a compacted
    /// type list every id is an index, so the type plane cannot be named.
    pub(super) fn is_type_plane(&self, wire: u32) -> bool {
        let compacted = self.func.as_ref().is_some_and(|f| !f.compact_types.is_empty());
        self.flags.contains(FormatFlags::TYPES_IN_VALUE_PLANES)
            && wire == TYPE_PLANE_ID
            && !compacted
    }
}
