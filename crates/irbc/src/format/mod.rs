//! Wire-format constants shared by the reader and the writer.

mod version;
pub use version::{FormatFlags, Revision, Version};

use crate::ir::PrimitiveType;

/// First four bytes of every stream.
pub const MAGIC: [u8; 4] = *b"irbc";

/// Kind tag of a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Module = 0x01,
    Function = 0x11,
    ConstantPool = 0x12,
    SymbolTable = 0x13,
    ModuleGlobalInfo = 0x14,
    TypeTable = 0x15,
    BasicBlock = 0x31,
    CompactionTable = 0x33,
}

impl BlockKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0x01 => BlockKind::Module,
            0x11 => BlockKind::Function,
            0x12 => BlockKind::ConstantPool,
            0x13 => BlockKind::SymbolTable,
            0x14 => BlockKind::ModuleGlobalInfo,
            0x15 => BlockKind::TypeTable,
            0x31 => BlockKind::BasicBlock,
            0x33 => BlockKind::CompactionTable,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Type body tags. Any other tag must be a primitive type id.
pub mod type_tag {
    pub const FUNCTION: u32 = 0x20;
    pub const STRUCT: u32 = 0x21;
    pub const ARRAY: u32 = 0x22;
    pub const POINTER: u32 = 0x23;
}

/// In revision 0, the id reserved for the plane of type values.
pub const TYPE_PLANE_ID: u32 = 12;

/// Converts a canonical type slot to its wire id under `flags`.
pub fn wire_type_id(slot: u32, flags: FormatFlags) -> u32 {
    if flags.contains(FormatFlags::TYPES_IN_VALUE_PLANES) && slot >= TYPE_PLANE_ID {
        slot + 1
    } else {
        slot
    }
}

/// Inverse of [`wire_type_id`]. `None` for the reserved type-plane id.
pub fn canonical_type_slot(wire: u32, flags: FormatFlags) -> Option<u32> {
    if !flags.contains(FormatFlags::TYPES_IN_VALUE_PLANES) {
        return Some(wire);
    }
    match wire.cmp(&TYPE_PLANE_ID) {
        std::cmp::Ordering::Less => Some(wire),
        std::cmp::Ordering::Equal => None,
        std::cmp::Ordering::Greater => Some(wire - 1),
    }
}

/// Opcode values outside the main table that select volatile memory access.
pub const VOLATILE_LOAD: u32 = 62;
pub const VOLATILE_STORE: u32 = 63;

/// Packed instruction layouts, selected by the low two bits of the first word.
pub mod packed {
    /// `[1:2][opcode:6][type:12][op0:12]`
    pub const ONE_OPERAND: u32 = 1;
    /// `[2:2][opcode:6][type:8][op0:8][op1:8]`
    pub const TWO_OPERANDS: u32 = 2;
    /// `[3:2][opcode:6][type:6][op0:6][op1:6][op2:6]`
    pub const THREE_OPERANDS: u32 = 3;
    /// `op0` value meaning "no operand" in the one-operand form.
    pub const NO_OPERAND: u32 = 4095;
    /// Opcodes at or above this need the VBR form.
    pub const OPCODE_LIMIT: u32 = 64;
}

/// Index planes selected by the 2-bit tag of a revision 2 GEP index.
pub const GEP_INDEX_PLANES: [PrimitiveType; 4] = [
    PrimitiveType::UInt,
    PrimitiveType::Int,
    PrimitiveType::ULong,
    PrimitiveType::Long,
];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn block_kinds_round_trip() {
        for kind in [
            BlockKind::Module,
            BlockKind::Function,
            BlockKind::ConstantPool,
            BlockKind::SymbolTable,
            BlockKind::ModuleGlobalInfo,
            BlockKind::TypeTable,
            BlockKind::BasicBlock,
            BlockKind::CompactionTable,
        ] {
            assert_eq!(BlockKind::from_u32(kind.code()), Some(kind));
        }
        assert_eq!(BlockKind::from_u32(0x77), None);
    }

    #[test]
    fn legacy_type_ids_skip_the_type_plane() {
        let flags = Revision::V0.flags();
        assert_eq!(wire_type_id(11, flags), 11);
        assert_eq!(wire_type_id(12, flags), 13);
        assert_eq!(canonical_type_slot(13, flags), Some(12));
        assert_eq!(canonical_type_slot(TYPE_PLANE_ID, flags), None);

        let flags = Revision::V2.flags();
        assert_eq!(wire_type_id(12, flags), 12);
        assert_eq!(canonical_type_slot(12, flags), Some(12));
    }

    fn any_revision() -> impl Strategy<Value = Revision> {
        prop_oneof![Just(Revision::V0), Just(Revision::V1), Just(Revision::V2)]
    }

    proptest! {
        #[test]
        fn type_ids_invert(slot in 0..u32::MAX - 1, revision in any_revision()) {
            let flags = revision.flags();
            let wire = wire_type_id(slot, flags);
            prop_assert_eq!(canonical_type_slot(wire, flags), Some(slot));
        }

        #[test]
        fn every_wire_id_but_the_type_plane_is_a_slot(wire in any::<u32>(), revision in any_revision()) {
            let flags = revision.flags();
            match canonical_type_slot(wire, flags) {
                Some(slot) => prop_assert_eq!(wire_type_id(slot, flags), wire),
                None => {
                    prop_assert!(flags.contains(FormatFlags::TYPES_IN_VALUE_PLANES));
                    prop_assert_eq!(wire, TYPE_PLANE_ID);
                }
            }
        }
    }
}
