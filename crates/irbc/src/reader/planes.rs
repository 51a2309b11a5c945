//! Value planes and slot lookup.

use std::collections::HashMap;

use tracing::trace;

use super::Session;
use crate::error::ErrorKind;
use crate::format::FormatFlags;
use crate::ir::{PrimitiveType, TypeId, ValueId};

/// Values of one scope, grouped by type in definition order.
#[derive(Debug, Default)]
pub(super) struct Planes {
    planes: HashMap<TypeId, Vec<ValueId>>,
}

impl Planes {
    pub(super) fn len(&self, ty: TypeId) -> u32 {
        self.planes.get(&ty).map_or(0, |p| p.len() as u32)
    }

    pub(super) fn get(&self, ty: TypeId, index: u32) -> Option<ValueId> {
        self.planes.get(&ty)?.get(index as usize).copied()
    }

    /// Appends `value` and returns its index in the plane.
    pub(super) fn push(&mut self, ty: TypeId, value: ValueId) -> u32 {
        let plane = self.planes.entry(ty).or_default();
        plane.push(value);
        (plane.len() - 1) as u32
    }

    pub(super) fn values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.planes.values().flatten().copied()
    }

    /// Points every entry holding `old` at `new`.
    pub(super) fn replace(&mut self, old: ValueId, new: ValueId) {
        for v in self.planes.values_mut().flatten() {
            if *v == old {
                *v = new;
            }
        }
    }
}

impl Session<'_> {
    /// Whether slot 0 of `ty` stands for its null value without an entry.
    fn implicit_null(&self, ty: TypeId) -> bool {
        !self.flags.contains(FormatFlags::EXPLICIT_NULLS) && self.module.has_null(ty)
    }

    /// Looks up `slot` of `ty` in the current scope.
    ///
    /// Search order: implicit null, then the compaction plane, the module
    /// plane and the function plane, each consuming the slots before it.
    /// A slot past every plane becomes a placeholder when `forward` is set.
    pub(super) fn value_ref(
        &mut self,
        ty: TypeId,
        slot: u32,
        forward: bool,
    ) -> Result<ValueId, ErrorKind> {
        let ty = self.module.resolve(ty);
        if self.module.is_primitive(ty, PrimitiveType::Label) {
            return if forward {
                self.block_for(slot)
            } else {
                self.defined_block(slot)
            };
        }
        let mut index = slot;
        if self.implicit_null(ty) {
            if index == 0 {
                return self
                    .module
                    .null_value(ty)
                    .ok_or(ErrorKind::InvalidValue("type has no null value"));
            }
            index -= 1;
        }
        if let Some(plane) = self.func.as_ref().and_then(|f| f.compaction.get(&ty)) {
            match plane.get(index as usize) {
                Some(&v) => return Ok(v),
                None => index -= plane.len() as u32,
            }
        }
        if let Some(v) = self.module_planes.get(ty, index) {
            return Ok(v);
        }
        index -= self.module_planes.len(ty);

        let refs = match self.func.as_mut() {
            Some(f) => {
                if let Some(v) = f.locals.get(ty, index) {
                    return Ok(v);
                }
                &mut f.refs
            }
            None => &mut self.module_refs,
        };
        if forward {
            Ok(refs.get_or_create(&mut self.module, ty, index))
        } else {
            Err(ErrorKind::UnresolvedReference { ty, slot })
        }
    }

    /// Looks up `slot` of `ty` among module-level values only.
    pub(super) fn module_value(&mut self, ty: TypeId, slot: u32) -> Result<ValueId, ErrorKind> {
        let ty = self.module.resolve(ty);
        let mut index = slot;
        if self.implicit_null(ty) {
            if index == 0 {
                return self
                    .module
                    .null_value(ty)
                    .ok_or(ErrorKind::InvalidValue("type has no null value"));
            }
            index -= 1;
        }
        self.module_planes
            .get(ty, index)
            .ok_or(ErrorKind::UnresolvedReference { ty, slot })
    }

    /// Appends a decoded value to the current scope's plane for `ty` and
    /// retires any placeholder that was standing in for it.
    pub(super) fn define_value(&mut self, ty: TypeId, value: ValueId) -> Result<(), ErrorKind> {
        let ty = self.module.resolve(ty);
        match self.func.as_mut() {
            Some(f) => {
                let index = f.locals.push(ty, value);
                f.refs.resolve(&mut self.module, ty, index, value)
            }
            None => {
                let index = self.module_planes.push(ty, value);
                self.module_refs.resolve(&mut self.module, ty, index, value)
            }
        }
    }

    /// Collapses aggregates of the current scope whose forward-referenced
    /// elements all resolved to nulls. Repeats until nested aggregates settle.
    pub(super) fn fold_null_aggregates(&mut self) -> Result<(), ErrorKind> {
        loop {
            let planes = match self.func.as_ref() {
                Some(f) => &f.locals,
                None => &self.module_planes,
            };
            let folds: Vec<ValueId> = planes
                .values()
                .filter(|&v| self.module.is_null_aggregate(v))
                .collect();
            if folds.is_empty() {
                return Ok(());
            }
            for old in folds {
                let new = self.module.fold_null_aggregate(old)?;
                trace!(%old, %new, "folded null aggregate");
                match self.func.as_mut() {
                    Some(f) => f.locals.replace(old, new),
                    None => self.module_planes.replace(old, new),
                }
            }
        }
    }

    /// The basic block for label `slot`, only if its BasicBlock block has
    /// already been read.
    fn defined_block(&self, slot: u32) -> Result<ValueId, ErrorKind> {
        self.func
            .as_ref()
            .filter(|f| slot < f.defined_blocks)
            .and_then(|f| f.blocks.get(&slot).copied())
            .ok_or(ErrorKind::InvalidValue("name given to an undefined basic block"))
    }

    /// The basic block for label `slot` of the current function.
    pub(super) fn block_for(&mut self, slot: u32) -> Result<ValueId, ErrorKind> {
        let f = self
            .func
            .as_mut()
            .ok_or(ErrorKind::InvalidValue("label referenced outside a function"))?;
        let module = &mut self.module;
        Ok(*f
            .blocks
            .entry(slot)
            .or_insert_with(|| module.new_basic_block()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planes_index_per_type() {
        let mut planes = Planes::default();
        let int = PrimitiveType::Int.type_id();
        let uint = PrimitiveType::UInt.type_id();
        assert_eq!(planes.push(int, ValueId(1)), 0);
        assert_eq!(planes.push(uint, ValueId(2)), 0);
        assert_eq!(planes.push(int, ValueId(3)), 1);
        assert_eq!(planes.len(int), 2);
        assert_eq!(planes.get(int, 1), Some(ValueId(3)));
        assert_eq!(planes.get(uint, 1), None);
    }
}
