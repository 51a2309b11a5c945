//! Slot assignment.

use std::collections::HashMap;

use super::ModuleEncoder;
use crate::error::WriteError;
use crate::ir::{Module, TypeId, ValueId};

/// Plane positions of the values of one scope.
#[derive(Debug, Default)]
pub(super) struct PlaneMap {
    index: HashMap<ValueId, u32>,
    lens: HashMap<TypeId, u32>,
}

impl PlaneMap {
    /// Appends `v` to the plane of `ty`. A value already present keeps its slot.
    pub(super) fn push(&mut self, ty: TypeId, v: ValueId) -> u32 {
        if let Some(&i) = self.index.get(&v) {
            return i;
        }
        let len = self.lens.entry(ty).or_default();
        let i = *len;
        *len += 1;
        self.index.insert(v, i);
        i
    }

    pub(super) fn index(&self, v: ValueId) -> Option<u32> {
        self.index.get(&v).copied()
    }

    pub(super) fn len(&self, ty: TypeId) -> u32 {
        self.lens.get(&ty).copied().unwrap_or(0)
    }

    pub(super) fn contains(&self, v: ValueId) -> bool {
        self.index.contains_key(&v)
    }
}

/// A scope that block writers resolve slots and type references through.
pub(super) trait SlotScope {
    fn module(&self) -> &Module;
    fn encoder(&self) -> &ModuleEncoder<'_>;
    fn value_slot(&mut self, v: ValueId) -> Result<u32, WriteError>;
    fn type_ref(&mut self, ty: TypeId) -> Result<u32, WriteError>;
}

/// Module scope: no locals and no compaction.
pub(super) struct ModuleScope<'e, 'm>(pub(super) &'e ModuleEncoder<'m>);

impl SlotScope for ModuleScope<'_, '_> {
    fn module(&self) -> &Module {
        self.0.module
    }

    fn encoder(&self) -> &ModuleEncoder<'_> {
        self.0
    }

    fn value_slot(&mut self, v: ValueId) -> Result<u32, WriteError> {
        self.0.module_slot(v)
    }

    fn type_ref(&mut self, ty: TypeId) -> Result<u32, WriteError> {
        self.0.wire_type(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::PrimitiveType;

    #[test]
    fn planes_count_per_type() {
        let mut planes = PlaneMap::default();
        let int = PrimitiveType::Int.type_id();
        let long = PrimitiveType::Long.type_id();
        assert_eq!(planes.push(int, ValueId(10)), 0);
        assert_eq!(planes.push(long, ValueId(11)), 0);
        assert_eq!(planes.push(int, ValueId(12)), 1);
        assert_eq!(planes.push(int, ValueId(10)), 0);
        assert_eq!(planes.len(int), 2);
        assert_eq!(planes.index(ValueId(12)), Some(1));
        assert!(!planes.contains(ValueId(13)));
    }
}
