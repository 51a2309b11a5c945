//! Constant planning and ConstantPool encoding.

use std::collections::{HashMap, HashSet};

use irbc_stream::Writer;

use super::slots::SlotScope;
use crate::error::WriteError;
use crate::format::FormatFlags;
use crate::ir::{ConstantKind, Module, PrimitiveType, TypeId, TypeNode, ValueId};

/// Where a constant is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Scope {
    Module,
    Function(ValueId),
}

impl Scope {
    fn join(self, other: Scope) -> Scope {
        if self == other {
            self
        } else {
            Scope::Module
        }
    }
}

/// Every constant the stream needs, with its scope and emission order.
#[derive(Debug, Default)]
pub(super) struct ConstantPlan {
    scopes: HashMap<ValueId, Scope>,
    /// Post-order: operands before the constants that use them.
    order: Vec<ValueId>,
}

impl ConstantPlan {
    pub(super) fn build(module: &Module, flags: FormatFlags) -> Result<Self, WriteError> {
        let explicit_nulls = flags.contains(FormatFlags::EXPLICIT_NULLS);
        let mut roots = Vec::new();
        for &g in module.globals() {
            if let Some(init) = module.global(g).and_then(|g| g.initializer) {
                roots.push((init, Scope::Module));
            }
        }
        for &f in module.functions() {
            let Some(func) = module.function(f) else {
                continue;
            };
            for &bb in &func.blocks {
                let Some(block) = module.block(bb) else {
                    continue;
                };
                for &inst in &block.instructions {
                    for &op in module.operands(inst) {
                        roots.push((op, Scope::Function(f)));
                    }
                }
            }
        }

        let mut plan = ConstantPlan::default();
        let mut work = roots.clone();
        while let Some((v, scope)) = work.pop() {
            if !is_emitted(module, v, explicit_nulls) {
                continue;
            }
            let scope = if module.is_null(v) {
                Scope::Module
            } else {
                plan.scopes.get(&v).map_or(scope, |s| s.join(scope))
            };
            if plan.scopes.get(&v) == Some(&scope) {
                continue;
            }
            plan.scopes.insert(v, scope);
            for child in children(module, v, explicit_nulls)? {
                work.push((child, scope));
            }
        }

        let mut visited = HashSet::new();
        for (root, _) in roots {
            plan.visit(module, root, explicit_nulls, &mut visited)?;
        }
        Ok(plan)
    }

    fn visit(
        &mut self,
        module: &Module,
        root: ValueId,
        explicit_nulls: bool,
        visited: &mut HashSet<ValueId>,
    ) -> Result<(), WriteError> {
        // (value, children already expanded)
        let mut stack = vec![(root, false)];
        while let Some((v, expanded)) = stack.pop() {
            if expanded {
                self.order.push(v);
                continue;
            }
            if !self.scopes.contains_key(&v) || !visited.insert(v) {
                continue;
            }
            stack.push((v, true));
            for child in children(module, v, explicit_nulls)?.into_iter().rev() {
                stack.push((child, false));
            }
        }
        Ok(())
    }

    pub(super) fn module_constants(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.order
            .iter()
            .copied()
            .filter(|v| self.scopes.get(v) == Some(&Scope::Module))
    }

    pub(super) fn local_constants(&self, function: ValueId) -> impl Iterator<Item = ValueId> + '_ {
        self.order
            .iter()
            .copied()
            .filter(move |v| self.scopes.get(v) == Some(&Scope::Function(function)))
    }
}

/// Whether `v` gets a pool entry. Implicit nulls never do.
fn is_emitted(module: &Module, v: ValueId, explicit_nulls: bool) -> bool {
    match module.constant(v) {
        Some(c) if c.kind == ConstantKind::Null => explicit_nulls,
        Some(_) => true,
        None => false,
    }
}

/// Values a constant's entry refers to by slot.
fn children(module: &Module, v: ValueId, explicit_nulls: bool) -> Result<Vec<ValueId>, WriteError> {
    if is_string(module, v) {
        return Ok(Vec::new());
    }
    if explicit_nulls && module.is_null(v) {
        return null_members(module, v);
    }
    Ok(module.operands(v).to_vec())
}

/// Element nulls an explicit aggregate null is spelled out with.
fn null_members(module: &Module, v: ValueId) -> Result<Vec<ValueId>, WriteError> {
    let member = |ty: TypeId| {
        module
            .existing_null(ty)
            .ok_or(WriteError::Malformed(v, "aggregate null without element nulls"))
    };
    match module.type_node(module.type_of(v)) {
        TypeNode::Array { element, len } if *len > 0 => Ok(vec![member(*element)?]),
        TypeNode::Struct { fields } => fields.iter().map(|&f| member(f)).collect(),
        _ => Ok(Vec::new()),
    }
}

/// A byte array whose elements are all scalar constants.
pub(super) fn is_string(module: &Module, v: ValueId) -> bool {
    let Some(c) = module.constant(v) else {
        return false;
    };
    if c.kind != ConstantKind::Array {
        return false;
    }
    let byte_element = match module.type_node(module.type_of(v)) {
        TypeNode::Array { element, .. } => matches!(
            module.primitive_of(*element),
            Some(PrimitiveType::UByte | PrimitiveType::SByte)
        ),
        _ => false,
    };
    byte_element
        && c.operands.iter().all(|&e| {
            module
                .constant(e)
                .is_some_and(|c| matches!(c.kind, ConstantKind::Null | ConstantKind::UInt(_) | ConstantKind::Int(_)))
        })
}

/// One scope's constants, laid out the way the pool is written.
#[derive(Debug, Default)]
pub(super) struct Pool {
    strings: Vec<ValueId>,
    groups: Vec<(TypeId, Vec<ValueId>)>,
}

impl Pool {
    pub(super) fn new(module: &Module, constants: impl Iterator<Item = ValueId>) -> Self {
        let mut pool = Pool::default();
        let mut group_of: HashMap<TypeId, usize> = HashMap::new();
        for v in constants {
            if is_string(module, v) {
                pool.strings.push(v);
                continue;
            }
            let ty = module.type_of(v);
            let i = *group_of.entry(ty).or_insert_with(|| {
                pool.groups.push((ty, Vec::new()));
                pool.groups.len() - 1
            });
            pool.groups[i].1.push(v);
        }
        pool
    }

    pub(super) fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.groups.is_empty()
    }

    /// Constants in the order the reader appends them to their planes.
    pub(super) fn plane_order<'a>(
        &'a self,
        module: &'a Module,
    ) -> impl Iterator<Item = (TypeId, ValueId)> + 'a {
        self.strings
            .iter()
            .map(move |&s| (module.type_of(s), s))
            .chain(
                self.groups
                    .iter()
                    .flat_map(|(ty, values)| values.iter().map(move |&v| (*ty, v))),
            )
    }

    /// Every constant, strings included.
    pub(super) fn values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.strings
            .iter()
            .chain(self.groups.iter().flat_map(|(_, values)| values))
            .copied()
    }
}

pub(super) fn write_pool<S: SlotScope>(
    scope: &mut S,
    pool: &Pool,
    w: &mut Writer,
) -> Result<(), WriteError> {
    if !pool.strings.is_empty() {
        w.write_vbr_u32(pool.strings.len() as u32);
        w.write_vbr_u32(scope.type_ref(PrimitiveType::Void.type_id())?);
        for &s in &pool.strings {
            write_string(scope, s, w)?;
        }
    }
    for (ty, values) in &pool.groups {
        w.write_vbr_u32(values.len() as u32);
        w.write_vbr_u32(scope.type_ref(*ty)?);
        for &v in values {
            write_constant(scope, v, w)?;
        }
    }
    Ok(())
}

fn write_string<S: SlotScope>(scope: &mut S, s: ValueId, w: &mut Writer) -> Result<(), WriteError> {
    let ty = scope.module().type_of(s);
    let type_ref = scope.type_ref(ty)?;
    w.write_vbr_u32(type_ref);
    let module = scope.module();
    for &e in module.operands(s) {
        let byte = match module.constant(e).map(|c| c.kind) {
            Some(ConstantKind::UInt(b)) => b as u8,
            Some(ConstantKind::Int(b)) => b as u8,
            _ => 0,
        };
        w.write_u8(byte);
    }
    if scope.encoder().flags.contains(FormatFlags::PADDED_STRINGS) {
        w.align32();
    }
    Ok(())
}

fn write_constant<S: SlotScope>(scope: &mut S, v: ValueId, w: &mut Writer) -> Result<(), WriteError> {
    let module = scope.module();
    let ty = module.type_of(v);
    let c = module
        .constant(v)
        .ok_or(WriteError::Malformed(v, "pool entry is not a constant"))?;
    let kind = c.kind;
    let operands = c.operands.clone();

    if let Some(p) = module.primitive_of(ty) {
        return write_scalar(v, p, kind, w);
    }

    match kind {
        ConstantKind::Expr(opcode) => {
            w.write_vbr_u32(operands.len() as u32);
            w.write_vbr_u32(opcode.code());
            for op in operands {
                let op_ty = scope.module().type_of(op);
                w.write_vbr_u32(scope.value_slot(op)?);
                w.write_vbr_u32(scope.type_ref(op_ty)?);
            }
        }
        ConstantKind::Array | ConstantKind::Struct => {
            w.write_vbr_u32(0);
            for op in operands {
                w.write_vbr_u32(scope.value_slot(op)?);
            }
        }
        ConstantKind::Null => {
            w.write_vbr_u32(0);
            let members = null_members(module, v)?;
            let repeat = match module.type_node(ty) {
                TypeNode::Array { len, .. } => *len,
                _ => 1,
            };
            for m in members {
                let slot = scope.value_slot(m)?;
                for _ in 0..repeat {
                    w.write_vbr_u32(slot);
                }
            }
        }
        _ => return Err(WriteError::Malformed(v, "scalar constant of derived type")),
    }
    Ok(())
}

fn write_scalar(
    v: ValueId,
    p: PrimitiveType,
    kind: ConstantKind,
    w: &mut Writer,
) -> Result<(), WriteError> {
    let mismatch = WriteError::Malformed(v, "constant kind does not match its type");
    match (p, kind) {
        (PrimitiveType::Bool, ConstantKind::Null) => w.write_vbr_u32(0),
        (PrimitiveType::Bool, ConstantKind::Bool(b)) => w.write_vbr_u32(u32::from(b)),
        (PrimitiveType::Float, ConstantKind::Null) => w.write_fixed32(0),
        (PrimitiveType::Float, ConstantKind::Float(bits)) => w.write_fixed32(bits),
        (PrimitiveType::Double, ConstantKind::Null) => w.write_fixed64(0),
        (PrimitiveType::Double, ConstantKind::Double(bits)) => w.write_fixed64(bits),
        (p, ConstantKind::Null) if p.is_integer() => w.write_vbr_u32(0),
        (p, ConstantKind::Int(x)) if p.is_integer() && p.is_signed() => w.write_vbr_i64(x),
        (p, ConstantKind::UInt(x)) if p.is_integer() && !p.is_signed() => w.write_vbr_u64(x),
        _ => return Err(mismatch),
    }
    Ok(())
}
