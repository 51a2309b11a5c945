//! Structural checks run on decoded modules.

use std::collections::HashMap;

use super::{Module, TypeId, ValueId, ValueKind};
use crate::error::IrError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Active,
    Done,
}

/// Iterative depth-first search for a cycle in the graph given by `edges`.
/// Returns a node on the first cycle found.
fn find_cycle<N, F>(roots: impl IntoIterator<Item = N>, mut edges: F) -> Option<N>
where
    N: Copy + Eq + std::hash::Hash,
    F: FnMut(N) -> Vec<N>,
{
    let mut marks: HashMap<N, Mark> = HashMap::new();
    for root in roots {
        if marks.contains_key(&root) {
            continue;
        }
        marks.insert(root, Mark::Active);
        let mut stack = vec![(root, edges(root), 0usize)];
        while let Some((node, children, next)) = stack.last_mut() {
            let Some(&child) = children.get(*next) else {
                marks.insert(*node, Mark::Done);
                stack.pop();
                continue;
            };
            *next += 1;
            match marks.get(&child) {
                Some(Mark::Active) => return Some(child),
                Some(Mark::Done) => {}
                None => {
                    marks.insert(child, Mark::Active);
                    let grand = edges(child);
                    stack.push((child, grand, 0));
                }
            }
        }
    }
    None
}

impl Module {
    /// A type that contains itself without an intervening pointer.
    pub fn by_value_cycle(&self) -> Option<TypeId> {
        find_cycle(self.type_table().iter().copied(), |t| {
            self.type_node(t)
                .by_value_children()
                .iter()
                .map(|&c| self.resolve(c))
                .collect()
        })
    }

    /// An aggregate or expression constant that reaches itself.
    fn constant_cycle(&self) -> Option<ValueId> {
        let roots = self
            .values()
            .filter(|(_, v)| v.constant().is_some_and(|c| !c.operands.is_empty()))
            .map(|(id, _)| id);
        find_cycle(roots, |v| {
            self.operands(v)
                .iter()
                .copied()
                .filter(|&op| self.constant(op).is_some())
                .collect()
        })
    }

    /// Checks the invariants every decoded module satisfies: no opaque or
    /// self-containing types, no placeholders, no self-containing constants,
    /// and a terminator at the end of every basic block.
    pub fn verify(&self) -> Result<(), IrError> {
        if let Some(&ty) = self.type_table().iter().find(|&&t| self.is_opaque(t)) {
            return Err(IrError::OpaqueType(ty));
        }
        if let Some(ty) = self.by_value_cycle() {
            return Err(IrError::RecursiveByValue(ty));
        }
        if let Some((id, _)) = self
            .values()
            .find(|(_, v)| matches!(v.kind, ValueKind::Placeholder { .. }))
        {
            return Err(IrError::Placeholder(id));
        }
        if let Some(id) = self.constant_cycle() {
            return Err(IrError::RecursiveConstant(id));
        }
        for &function in self.functions() {
            let Some(f) = self.function(function) else {
                continue;
            };
            for &block in &f.blocks {
                let terminated = self
                    .block(block)
                    .and_then(|b| b.terminator())
                    .and_then(|i| self.instruction(i))
                    .is_some_and(|i| i.opcode.is_terminator());
                if !terminated {
                    return Err(IrError::Unterminated { function, block });
                }
            }
        }
        Ok(())
    }
}
