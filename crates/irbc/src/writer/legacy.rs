//! Rewrites that make a module encodable in a given revision.
//!
//! Revisions with fixed GEP index planes need struct indices as `ubyte`
//! constants and sequential indices as `long`; revision 2 has no `ubyte`
//! index plane. Revisions with explicit nulls spell aggregate nulls out
//! element by element, so the element nulls must exist as values.

use std::borrow::Cow;

use crate::error::WriteError;
use crate::format::{FormatFlags, Revision, GEP_INDEX_PLANES};
use crate::ir::{ConstantKind, Module, Opcode, PrimitiveType, TypeId, TypeNode, ValueId, ValueKind};

/// Operand `operand` of `user` must become a constant `value` of type `ty`.
struct IndexFix {
    user: ValueId,
    operand: usize,
    ty: PrimitiveType,
    value: i128,
}

pub(super) fn prepare(module: &Module, revision: Revision) -> Result<Cow<'_, Module>, WriteError> {
    let flags = revision.flags();
    let mut fixes = Vec::new();
    for (id, data) in module.values() {
        let is_gep = match &data.kind {
            ValueKind::Instruction(i) => i.opcode == Opcode::GetElementPtr,
            ValueKind::Constant(c) => c.kind == ConstantKind::Expr(Opcode::GetElementPtr),
            _ => false,
        };
        if is_gep {
            gep_fixes(module, id, flags, revision, &mut fixes)?;
        }
    }
    let nulls = if flags.contains(FormatFlags::EXPLICIT_NULLS) {
        missing_element_nulls(module)
    } else {
        Vec::new()
    };
    if fixes.is_empty() && nulls.is_empty() {
        return Ok(Cow::Borrowed(module));
    }

    let mut owned = module.clone();
    for fix in fixes {
        let ty = fix.ty.type_id();
        let constant = if fix.ty.is_signed() {
            i64::try_from(fix.value)
                .ok()
                .and_then(|v| owned.const_int(ty, v).ok())
        } else {
            u64::try_from(fix.value)
                .ok()
                .and_then(|v| owned.const_uint(ty, v).ok())
        }
        .ok_or(WriteError::NotEncodable {
            what: "getelementptr index out of range for its plane",
            revision,
        })?;
        owned
            .set_operand(fix.user, fix.operand, constant)
            .map_err(|_| WriteError::Malformed(fix.user, "getelementptr operand"))?;
    }
    // Creating a null may need the nulls of its own elements.
    loop {
        let missing = missing_element_nulls(&owned);
        if missing.is_empty() {
            break;
        }
        for ty in missing {
            owned.null_value(ty);
        }
    }
    Ok(Cow::Owned(owned))
}

fn gep_fixes(
    module: &Module,
    gep: ValueId,
    flags: FormatFlags,
    revision: Revision,
    fixes: &mut Vec<IndexFix>,
) -> Result<(), WriteError> {
    let operands = module.operands(gep);
    let Some((&base, indices)) = operands.split_first() else {
        return Ok(());
    };
    let Some(mut cur) = module.pointee(module.type_of(base)) else {
        return Ok(());
    };
    let fixed = flags.contains(FormatFlags::FIXED_GEP_INDICES);
    for (i, &index) in indices.iter().enumerate() {
        let into_struct = i > 0 && matches!(module.type_node(cur), TypeNode::Struct { .. });
        let have = module.primitive_of(module.type_of(index));
        let want = if fixed {
            Some(if into_struct {
                PrimitiveType::UByte
            } else {
                PrimitiveType::Long
            })
        } else if have.is_some_and(|p| GEP_INDEX_PLANES.contains(&p)) {
            None
        } else if into_struct {
            Some(PrimitiveType::UInt)
        } else {
            Some(PrimitiveType::Long)
        };
        if let Some(want) = want.filter(|&w| Some(w) != have) {
            let value = integer_value(module, index).ok_or(WriteError::NotEncodable {
                what: "non-constant getelementptr index of this type",
                revision,
            })?;
            fixes.push(IndexFix {
                user: gep,
                operand: i + 1,
                ty: want,
                value,
            });
        }
        if i > 0 {
            cur = module
                .gep_step(cur, index)
                .map_err(|_| WriteError::Malformed(gep, "getelementptr index"))?;
        }
    }
    Ok(())
}

fn integer_value(module: &Module, v: ValueId) -> Option<i128> {
    let p = module.primitive_of(module.type_of(v))?;
    if !p.is_integer() {
        return None;
    }
    match module.constant(v)?.kind {
        ConstantKind::Null => Some(0),
        ConstantKind::Int(x) => Some(i128::from(x)),
        ConstantKind::UInt(x) => Some(i128::from(x)),
        _ => None,
    }
}

/// Element and field types of existing aggregate nulls whose own null is
/// not yet a value.
fn missing_element_nulls(module: &Module) -> Vec<TypeId> {
    let mut missing = Vec::new();
    for (id, data) in module.values() {
        if !data.is_null() {
            continue;
        }
        let members: Vec<TypeId> = match module.type_node(module.type_of(id)) {
            TypeNode::Array { element, len } if *len > 0 => vec![*element],
            TypeNode::Struct { fields } => fields.clone(),
            _ => continue,
        };
        for ty in members {
            let ty = module.resolve(ty);
            if module.existing_null(ty).is_none() && !missing.contains(&ty) {
                missing.push(ty);
            }
        }
    }
    missing
}
