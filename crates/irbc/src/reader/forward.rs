//! Placeholders for values referenced before they are decoded.

use std::collections::HashMap;

use crate::error::ErrorKind;
use crate::ir::{Module, TypeId, ValueId};

/// Pending forward references of one scope, keyed by `(type, plane index)`.
#[derive(Debug, Default)]
pub(super) struct ForwardRefs {
    pending: HashMap<(TypeId, u32), ValueId>,
}

impl ForwardRefs {
    /// The placeholder standing in for `(ty, index)`, created on first request.
    pub(super) fn get_or_create(&mut self, module: &mut Module, ty: TypeId, index: u32) -> ValueId {
        *self
            .pending
            .entry((ty, index))
            .or_insert_with(|| module.new_placeholder(ty, index))
    }

    /// Redirects every use of the placeholder for `(ty, index)`, if any, to
    /// `value` and retires the placeholder.
    pub(super) fn resolve(
        &mut self,
        module: &mut Module,
        ty: TypeId,
        index: u32,
        value: ValueId,
    ) -> Result<(), ErrorKind> {
        if let Some(placeholder) = self.pending.remove(&(ty, index)) {
            module.replace_all_uses_with(placeholder, value);
            module.retire_value(placeholder)?;
        }
        Ok(())
    }

    /// Lowest pending key, for a deterministic error report.
    pub(super) fn first_unresolved(&self) -> Option<(TypeId, u32)> {
        self.pending.keys().min().copied()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
