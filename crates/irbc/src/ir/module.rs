//! The module: type arena, value arena, and the builder API over both.

use std::collections::HashMap;

use super::types::TypeEntry;
use super::value::{
    BasicBlock, Constant, ConstantKind, Function, GlobalVariable, Instruction, Linkage, Opcode,
    Use, ValueData, ValueId, ValueKind,
};
use super::{PrimitiveType, TypeId, TypeNode};
use crate::error::IrError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endianness {
    Little,
    Big,
    #[default]
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerSize {
    Bits32,
    Bits64,
    #[default]
    Unspecified,
}

/// Target description carried in the version word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TargetInfo {
    pub endianness: Endianness,
    pub pointer_size: PointerSize,
}

const OPAQUE: &TypeNode = &TypeNode::Opaque;

/// An IR module.
///
/// Types and values are arena-allocated and never freed individually;
/// removed values become [`ValueKind::Retired`] and refined opaque types
/// may become redirects. Handles stay valid for the module's lifetime.
#[derive(Debug, Clone)]
pub struct Module {
    types: Vec<TypeEntry>,
    /// Derived types in serialization order.
    type_table: Vec<TypeId>,
    type_names: HashMap<TypeId, String>,
    interned_types: HashMap<TypeNode, TypeId>,
    values: Vec<ValueData>,
    globals: Vec<ValueId>,
    functions: Vec<ValueId>,
    interned_constants: HashMap<(TypeId, ConstantKind), ValueId>,
    pub target: TargetInfo,
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Module {
    pub fn new() -> Self {
        let mut module = Module {
            types: Vec::new(),
            type_table: Vec::new(),
            type_names: HashMap::new(),
            interned_types: HashMap::new(),
            values: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            interned_constants: HashMap::new(),
            target: TargetInfo::default(),
        };
        for p in PrimitiveType::ALL {
            let node = TypeNode::Primitive(p);
            module.types.push(TypeEntry::Defined(node.clone()));
            module.interned_types.insert(node, p.type_id());
        }
        module
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    /// Follows refinement redirects to the type a handle now denotes.
    pub fn resolve(&self, mut ty: TypeId) -> TypeId {
        for _ in 0..self.types.len() {
            match self.types.get(ty.index()) {
                Some(TypeEntry::Forward(next)) => ty = *next,
                _ => break,
            }
        }
        ty
    }

    /// Node behind `ty`. Unknown handles read as opaque.
    pub fn type_node(&self, ty: TypeId) -> &TypeNode {
        match self.types.get(self.resolve(ty).index()) {
            Some(TypeEntry::Defined(node)) => node,
            _ => OPAQUE,
        }
    }

    pub fn same_type(&self, a: TypeId, b: TypeId) -> bool {
        self.resolve(a) == self.resolve(b)
    }

    pub fn primitive_of(&self, ty: TypeId) -> Option<PrimitiveType> {
        match self.type_node(ty) {
            TypeNode::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_primitive(&self, ty: TypeId, p: PrimitiveType) -> bool {
        self.primitive_of(ty) == Some(p)
    }

    pub fn pointee(&self, ty: TypeId) -> Option<TypeId> {
        match self.type_node(ty) {
            TypeNode::Pointer(elem) => Some(self.resolve(*elem)),
            _ => None,
        }
    }

    /// `(ret, params, vararg)` of a function type or of a pointer to one.
    pub fn signature(&self, ty: TypeId) -> Option<(TypeId, Vec<TypeId>, bool)> {
        let ty = self.pointee(ty).unwrap_or(ty);
        match self.type_node(ty) {
            TypeNode::Function {
                ret,
                params,
                vararg,
            } => Some((
                self.resolve(*ret),
                params.iter().map(|p| self.resolve(*p)).collect(),
                *vararg,
            )),
            _ => None,
        }
    }

    /// Whether the type has a zero value that slot 0 can stand for.
    pub fn has_null(&self, ty: TypeId) -> bool {
        match self.type_node(ty) {
            TypeNode::Primitive(p) => p.has_null(),
            TypeNode::Pointer(_) | TypeNode::Array { .. } | TypeNode::Struct { .. } => true,
            TypeNode::Function { .. } | TypeNode::Opaque => false,
        }
    }

    pub fn is_opaque(&self, ty: TypeId) -> bool {
        self.type_node(ty).is_opaque()
    }

    /// Derived types in serialization order.
    pub fn type_table(&self) -> &[TypeId] {
        &self.type_table
    }

    pub fn type_name(&self, ty: TypeId) -> Option<&str> {
        self.type_names.get(&self.resolve(ty)).map(String::as_str)
    }

    pub fn name_type(&mut self, ty: TypeId, name: impl Into<String>) {
        let ty = self.resolve(ty);
        self.type_names.insert(ty, name.into());
    }

    fn intern_type(&mut self, node: TypeNode) -> TypeId {
        let key = node.map_children(|t| self.resolve(t));
        if let Some(&id) = self.interned_types.get(&key) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeEntry::Defined(key.clone()));
        self.type_table.push(id);
        self.interned_types.insert(key, id);
        id
    }

    pub fn pointer_type(&mut self, element: TypeId) -> TypeId {
        self.intern_type(TypeNode::Pointer(element))
    }

    pub fn array_type(&mut self, element: TypeId, len: u64) -> TypeId {
        self.intern_type(TypeNode::Array { element, len })
    }

    pub fn struct_type(&mut self, fields: Vec<TypeId>) -> TypeId {
        self.intern_type(TypeNode::Struct { fields })
    }

    pub fn function_type(&mut self, ret: TypeId, params: Vec<TypeId>, vararg: bool) -> TypeId {
        self.intern_type(TypeNode::Function {
            ret,
            params,
            vararg,
        })
    }

    /// Creates a placeholder type to be given a body with [`Module::refine_type`].
    pub fn new_opaque_type(&mut self) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeEntry::Defined(TypeNode::Opaque));
        self.type_table.push(id);
        id
    }

    /// Gives an opaque type its body.
    ///
    /// Every handle to `opaque` observes the result. If an equal type already
    /// exists, `opaque` becomes a redirect to it and leaves the type table.
    /// Returns the type `opaque` now denotes.
    pub fn refine_type(&mut self, opaque: TypeId, node: TypeNode) -> Result<TypeId, IrError> {
        match self.types.get(opaque.index()) {
            Some(TypeEntry::Defined(TypeNode::Opaque)) => {}
            _ => return Err(IrError::NotOpaque(opaque)),
        }
        if node.is_opaque() {
            return Err(IrError::OpaqueType(opaque));
        }
        let key = node.map_children(|t| self.resolve(t));
        if let Some(&existing) = self.interned_types.get(&key) {
            self.forward_type(opaque, existing);
            return Ok(existing);
        }
        self.types[opaque.index()] = TypeEntry::Defined(key.clone());
        self.interned_types.insert(key, opaque);
        Ok(opaque)
    }

    fn forward_type(&mut self, from: TypeId, to: TypeId) {
        self.types[from.index()] = TypeEntry::Forward(to);
        self.type_table.retain(|&t| t != from);
        if let Some(name) = self.type_names.remove(&from) {
            self.type_names.entry(to).or_insert(name);
        }
    }

    /// Rewrites every type body to refer to resolved handles and merges
    /// types that became structurally equal through refinement.
    pub fn canonicalize_types(&mut self) {
        loop {
            let mut merged = false;
            self.interned_types.retain(|node, _| matches!(node, TypeNode::Primitive(_)));
            for id in self.type_table.clone() {
                let node = match &self.types[id.index()] {
                    TypeEntry::Defined(node) => node.clone(),
                    TypeEntry::Forward(_) => continue,
                };
                if node.is_opaque() {
                    continue;
                }
                let key = node.map_children(|t| self.resolve(t));
                if let Some(&existing) = self.interned_types.get(&key) {
                    self.forward_type(id, existing);
                    merged = true;
                    continue;
                }
                self.types[id.index()] = TypeEntry::Defined(key.clone());
                self.interned_types.insert(key, id);
            }
            if !merged {
                break;
            }
        }
    }

    /// Type reached by indexing one level into aggregate `ty` with `index`.
    pub fn gep_step(&self, ty: TypeId, index: ValueId) -> Result<TypeId, IrError> {
        match self.type_node(ty) {
            TypeNode::Struct { fields } => {
                let i = self
                    .constant_index(index)
                    .ok_or(IrError::WrongKind(index))?;
                let field = usize::try_from(i)
                    .ok()
                    .and_then(|i| fields.get(i))
                    .ok_or(IrError::OutOfRange(self.resolve(ty)))?;
                Ok(self.resolve(*field))
            }
            TypeNode::Array { element, .. } => Ok(self.resolve(*element)),
            _ => Err(IrError::TypeMismatch {
                expected: "struct or array type",
                found: self.resolve(ty),
            }),
        }
    }

    /// Result type of a `getelementptr` on `base_ty` with `indices`.
    pub fn gep_result_type(
        &mut self,
        base_ty: TypeId,
        indices: &[ValueId],
    ) -> Result<TypeId, IrError> {
        let mut cur = self.pointee(base_ty).ok_or(IrError::TypeMismatch {
            expected: "pointer type",
            found: self.resolve(base_ty),
        })?;
        for &idx in indices.iter().skip(1) {
            cur = self.gep_step(cur, idx)?;
        }
        Ok(self.pointer_type(cur))
    }

    // ------------------------------------------------------------------
    // Value access
    // ------------------------------------------------------------------

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    pub fn get(&self, id: ValueId) -> Option<&ValueData> {
        self.values.get(id.index())
    }

    /// Resolved type of a value.
    pub fn type_of(&self, id: ValueId) -> TypeId {
        self.resolve(self.values[id.index()].ty)
    }

    pub fn kind(&self, id: ValueId) -> &ValueKind {
        &self.values[id.index()].kind
    }

    pub fn operands(&self, id: ValueId) -> &[ValueId] {
        self.values[id.index()].kind.operands()
    }

    pub fn name(&self, id: ValueId) -> Option<&str> {
        self.values[id.index()].name.as_deref()
    }

    pub fn values(&self) -> impl Iterator<Item = (ValueId, &ValueData)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (ValueId(i as u32), v))
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn globals(&self) -> &[ValueId] {
        &self.globals
    }

    pub fn functions(&self) -> &[ValueId] {
        &self.functions
    }

    pub fn global(&self, id: ValueId) -> Option<&GlobalVariable> {
        match self.get(id).map(|v| &v.kind) {
            Some(ValueKind::GlobalVariable(g)) => Some(g),
            _ => None,
        }
    }

    pub fn function(&self, id: ValueId) -> Option<&Function> {
        match self.get(id).map(|v| &v.kind) {
            Some(ValueKind::Function(f)) => Some(f),
            _ => None,
        }
    }

    pub fn block(&self, id: ValueId) -> Option<&BasicBlock> {
        match self.get(id).map(|v| &v.kind) {
            Some(ValueKind::BasicBlock(b)) => Some(b),
            _ => None,
        }
    }

    pub fn instruction(&self, id: ValueId) -> Option<&Instruction> {
        self.get(id).and_then(ValueData::instruction)
    }

    pub fn constant(&self, id: ValueId) -> Option<&Constant> {
        self.get(id).and_then(ValueData::constant)
    }

    pub fn is_null(&self, id: ValueId) -> bool {
        self.get(id).is_some_and(ValueData::is_null)
    }

    /// Integer value of a constant usable as a struct index.
    pub fn constant_index(&self, id: ValueId) -> Option<u64> {
        match self.constant(id)?.kind {
            ConstantKind::Null => self
                .primitive_of(self.type_of(id))
                .filter(|p| p.is_integer())
                .map(|_| 0),
            ConstantKind::UInt(v) => Some(v),
            ConstantKind::Int(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Use lists
    // ------------------------------------------------------------------

    fn push_value(&mut self, ty: TypeId, kind: ValueKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        let operands = kind.operands().to_vec();
        self.values.push(ValueData {
            ty: self.resolve(ty),
            name: None,
            kind,
            uses: Vec::new(),
        });
        for (i, op) in operands.into_iter().enumerate() {
            self.add_use(
                op,
                Use {
                    user: id,
                    operand: i as u32,
                },
            );
        }
        id
    }

    fn add_use(&mut self, value: ValueId, u: Use) {
        if let Some(data) = self.values.get_mut(value.index()) {
            data.uses.push(u);
        }
    }

    fn remove_use(&mut self, value: ValueId, u: Use) {
        if let Some(data) = self.values.get_mut(value.index()) {
            if let Some(pos) = data.uses.iter().position(|x| *x == u) {
                data.uses.swap_remove(pos);
            }
        }
    }

    /// Points operand `index` of `user` at `new`, keeping use lists current.
    pub fn set_operand(&mut self, user: ValueId, index: usize, new: ValueId) -> Result<(), IrError> {
        let old = {
            let slot = self
                .values
                .get_mut(user.index())
                .and_then(|v| v.kind.operands_mut())
                .and_then(|ops| ops.get_mut(index))
                .ok_or(IrError::WrongKind(user))?;
            std::mem::replace(slot, new)
        };
        let u = Use {
            user,
            operand: index as u32,
        };
        self.remove_use(old, u);
        self.add_use(new, u);
        Ok(())
    }

    /// Rewrites every use of `old` to refer to `new`.
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let uses = match self.values.get_mut(old.index()) {
            Some(data) => std::mem::take(&mut data.uses),
            None => return,
        };
        for u in uses {
            if let Some(slot) = self
                .values
                .get_mut(u.user.index())
                .and_then(|v| v.kind.operands_mut())
                .and_then(|ops| ops.get_mut(u.operand as usize))
            {
                *slot = new;
            }
            self.add_use(new, u);
        }
    }

    /// Removes a value from the graph. Only values nobody uses may go.
    pub fn retire_value(&mut self, id: ValueId) -> Result<(), IrError> {
        let data = self.values.get(id.index()).ok_or(IrError::WrongKind(id))?;
        if !data.uses.is_empty() {
            return Err(IrError::StillUsed(id));
        }
        let operands = data.kind.operands().to_vec();
        for (i, op) in operands.into_iter().enumerate() {
            self.remove_use(
                op,
                Use {
                    user: id,
                    operand: i as u32,
                },
            );
        }
        let data = &mut self.values[id.index()];
        data.kind = ValueKind::Retired;
        data.name = None;
        Ok(())
    }

    pub fn set_name(&mut self, id: ValueId, name: impl Into<String>) {
        if let Some(data) = self.values.get_mut(id.index()) {
            data.name = Some(name.into());
        }
    }

    // ------------------------------------------------------------------
    // Constants
    // ------------------------------------------------------------------

    fn intern_constant(&mut self, ty: TypeId, kind: ConstantKind) -> ValueId {
        let key = (self.resolve(ty), kind);
        if let Some(&id) = self.interned_constants.get(&key) {
            return id;
        }
        let id = self.push_value(
            ty,
            ValueKind::Constant(Constant {
                kind,
                operands: Vec::new(),
            }),
        );
        self.interned_constants.insert(key, id);
        id
    }

    /// The zero value of `ty`, if the type has one.
    pub fn null_value(&mut self, ty: TypeId) -> Option<ValueId> {
        if !self.has_null(ty) {
            return None;
        }
        Some(self.intern_constant(ty, ConstantKind::Null))
    }

    /// Like [`Module::null_value`] but never creates the constant.
    pub fn existing_null(&self, ty: TypeId) -> Option<ValueId> {
        self.interned_constants
            .get(&(self.resolve(ty), ConstantKind::Null))
            .copied()
    }

    fn integer_type(&self, ty: TypeId, signed: bool) -> Result<PrimitiveType, IrError> {
        match self.primitive_of(ty) {
            Some(p) if p.is_integer() && p.is_signed() == signed => Ok(p),
            _ => Err(IrError::TypeMismatch {
                expected: if signed {
                    "signed integer type"
                } else {
                    "unsigned integer type"
                },
                found: self.resolve(ty),
            }),
        }
    }

    pub fn const_bool(&mut self, v: bool) -> ValueId {
        let ty = PrimitiveType::Bool.type_id();
        if v {
            self.intern_constant(ty, ConstantKind::Bool(true))
        } else {
            self.intern_constant(ty, ConstantKind::Null)
        }
    }

    pub fn const_int(&mut self, ty: TypeId, v: i64) -> Result<ValueId, IrError> {
        let p = self.integer_type(ty, true)?;
        let bits = p.bits().unwrap_or(64);
        if bits < 64 {
            let limit = 1i64 << (bits - 1);
            if v < -limit || v >= limit {
                return Err(IrError::OutOfRange(self.resolve(ty)));
            }
        }
        Ok(if v == 0 {
            self.intern_constant(ty, ConstantKind::Null)
        } else {
            self.intern_constant(ty, ConstantKind::Int(v))
        })
    }

    pub fn const_uint(&mut self, ty: TypeId, v: u64) -> Result<ValueId, IrError> {
        let p = self.integer_type(ty, false)?;
        let bits = p.bits().unwrap_or(64);
        if bits < 64 && v >> bits != 0 {
            return Err(IrError::OutOfRange(self.resolve(ty)));
        }
        Ok(if v == 0 {
            self.intern_constant(ty, ConstantKind::Null)
        } else {
            self.intern_constant(ty, ConstantKind::UInt(v))
        })
    }

    pub fn const_float(&mut self, v: f32) -> ValueId {
        self.const_float_bits(v.to_bits())
    }

    pub fn const_float_bits(&mut self, bits: u32) -> ValueId {
        let ty = PrimitiveType::Float.type_id();
        match bits {
            0 => self.intern_constant(ty, ConstantKind::Null),
            _ => self.intern_constant(ty, ConstantKind::Float(bits)),
        }
    }

    pub fn const_double(&mut self, v: f64) -> ValueId {
        self.const_double_bits(v.to_bits())
    }

    pub fn const_double_bits(&mut self, bits: u64) -> ValueId {
        let ty = PrimitiveType::Double.type_id();
        match bits {
            0 => self.intern_constant(ty, ConstantKind::Null),
            _ => self.intern_constant(ty, ConstantKind::Double(bits)),
        }
    }

    fn check_value_type(&self, value: ValueId, expected: TypeId) -> Result<(), IrError> {
        let found = self.type_of(value);
        if found == self.resolve(expected) {
            Ok(())
        } else {
            Err(IrError::TypeMismatch {
                expected: "element of the aggregate's type",
                found,
            })
        }
    }

    fn aggregate(&mut self, ty: TypeId, kind: ConstantKind, elems: Vec<ValueId>) -> ValueId {
        if elems.iter().all(|&e| self.is_null(e)) {
            if let Some(null) = self.null_value(ty) {
                return null;
            }
        }
        self.push_value(
            ty,
            ValueKind::Constant(Constant {
                kind,
                operands: elems,
            }),
        )
    }

    /// Whether `id` is an array or struct constant whose elements are all null.
    pub fn is_null_aggregate(&self, id: ValueId) -> bool {
        self.constant(id).is_some_and(|c| {
            matches!(c.kind, ConstantKind::Array | ConstantKind::Struct)
                && c.operands.iter().all(|&e| self.is_null(e))
        })
    }

    /// Replaces an all-null aggregate by its type's null and retires it.
    /// Returns the value that now stands for `id`.
    ///
    /// Aggregates built from placeholders miss the collapse in
    /// [`Module::const_array`]; this applies it once the elements are known.
    pub fn fold_null_aggregate(&mut self, id: ValueId) -> Result<ValueId, IrError> {
        if !self.is_null_aggregate(id) {
            return Ok(id);
        }
        let Some(null) = self.null_value(self.type_of(id)) else {
            return Ok(id);
        };
        self.replace_all_uses_with(id, null);
        self.retire_value(id)?;
        Ok(null)
    }

    /// An array constant. All-zero arrays collapse to the type's null.
    pub fn const_array(&mut self, ty: TypeId, elems: Vec<ValueId>) -> Result<ValueId, IrError> {
        let (element, len) = match self.type_node(ty) {
            TypeNode::Array { element, len } => (*element, *len),
            _ => {
                return Err(IrError::TypeMismatch {
                    expected: "array type",
                    found: self.resolve(ty),
                })
            }
        };
        if elems.len() as u64 != len {
            return Err(IrError::ElementCount {
                expected: len,
                found: elems.len(),
            });
        }
        for &e in &elems {
            self.check_value_type(e, element)?;
        }
        Ok(self.aggregate(ty, ConstantKind::Array, elems))
    }

    /// A struct constant. All-zero structs collapse to the type's null.
    pub fn const_struct(&mut self, ty: TypeId, fields: Vec<ValueId>) -> Result<ValueId, IrError> {
        let field_types = match self.type_node(ty) {
            TypeNode::Struct { fields } => fields.clone(),
            _ => {
                return Err(IrError::TypeMismatch {
                    expected: "struct type",
                    found: self.resolve(ty),
                })
            }
        };
        if fields.len() != field_types.len() {
            return Err(IrError::ElementCount {
                expected: field_types.len() as u64,
                found: fields.len(),
            });
        }
        for (&v, &t) in fields.iter().zip(&field_types) {
            self.check_value_type(v, t)?;
        }
        Ok(self.aggregate(ty, ConstantKind::Struct, fields))
    }

    /// A `[n x ubyte]` array holding `bytes`.
    pub fn const_string(&mut self, bytes: &[u8]) -> ValueId {
        let ubyte = PrimitiveType::UByte.type_id();
        let ty = self.array_type(ubyte, bytes.len() as u64);
        let elems = bytes
            .iter()
            .map(|&b| match b {
                0 => self.intern_constant(ubyte, ConstantKind::Null),
                _ => self.intern_constant(ubyte, ConstantKind::UInt(u64::from(b))),
            })
            .collect();
        self.aggregate(ty, ConstantKind::Array, elems)
    }

    pub fn const_expr(
        &mut self,
        opcode: Opcode,
        ty: TypeId,
        operands: Vec<ValueId>,
    ) -> Result<ValueId, IrError> {
        if !opcode.is_constant_expr() {
            return Err(IrError::NotConstantExpr(opcode));
        }
        let expected = match opcode {
            Opcode::Cast => Some(1),
            Opcode::GetElementPtr => None,
            _ => Some(2),
        };
        let count_ok = match expected {
            Some(n) => operands.len() == n,
            None => !operands.is_empty(),
        };
        if !count_ok {
            return Err(IrError::ElementCount {
                expected: expected.unwrap_or(1) as u64,
                found: operands.len(),
            });
        }
        Ok(self.push_value(
            ty,
            ValueKind::Constant(Constant {
                kind: ConstantKind::Expr(opcode),
                operands,
            }),
        ))
    }

    // ------------------------------------------------------------------
    // Globals, functions, blocks, instructions
    // ------------------------------------------------------------------

    /// A global variable holding an `element_ty`. The value itself is a pointer.
    pub fn new_global(
        &mut self,
        element_ty: TypeId,
        is_constant: bool,
        linkage: Linkage,
        initializer: Option<ValueId>,
    ) -> ValueId {
        let ty = self.pointer_type(element_ty);
        let id = self.push_value(
            ty,
            ValueKind::GlobalVariable(GlobalVariable {
                linkage,
                is_constant,
                initializer,
            }),
        );
        self.globals.push(id);
        id
    }

    pub fn set_initializer(
        &mut self,
        global: ValueId,
        initializer: Option<ValueId>,
    ) -> Result<(), IrError> {
        let old = match self.values.get_mut(global.index()).map(|v| &mut v.kind) {
            Some(ValueKind::GlobalVariable(g)) => std::mem::replace(&mut g.initializer, initializer),
            _ => return Err(IrError::WrongKind(global)),
        };
        let u = Use {
            user: global,
            operand: 0,
        };
        if let Some(old) = old {
            self.remove_use(old, u);
        }
        if let Some(new) = initializer {
            self.add_use(new, u);
        }
        Ok(())
    }

    /// A function of type `fn_ty`, with one argument per parameter.
    /// It stays a declaration until a block is appended.
    pub fn new_function(&mut self, fn_ty: TypeId, linkage: Linkage) -> Result<ValueId, IrError> {
        let params = match self.type_node(fn_ty) {
            TypeNode::Function { params, .. } => params.clone(),
            _ => {
                return Err(IrError::TypeMismatch {
                    expected: "function type",
                    found: self.resolve(fn_ty),
                })
            }
        };
        let ptr_ty = self.pointer_type(fn_ty);
        let id = self.push_value(
            ptr_ty,
            ValueKind::Function(Function {
                linkage,
                arguments: Vec::new(),
                blocks: Vec::new(),
            }),
        );
        let arguments: Vec<ValueId> = params
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                self.push_value(
                    ty,
                    ValueKind::Argument {
                        parent: id,
                        index: index as u32,
                    },
                )
            })
            .collect();
        if let ValueKind::Function(f) = &mut self.values[id.index()].kind {
            f.arguments = arguments;
        }
        self.functions.push(id);
        Ok(id)
    }

    pub fn new_basic_block(&mut self) -> ValueId {
        self.push_value(
            PrimitiveType::Label.type_id(),
            ValueKind::BasicBlock(BasicBlock::default()),
        )
    }

    pub fn append_block(&mut self, function: ValueId, block: ValueId) -> Result<(), IrError> {
        match self.values.get_mut(block.index()).map(|v| &mut v.kind) {
            Some(ValueKind::BasicBlock(b)) if b.parent.is_none() => b.parent = Some(function),
            _ => return Err(IrError::WrongKind(block)),
        }
        match self.values.get_mut(function.index()).map(|v| &mut v.kind) {
            Some(ValueKind::Function(f)) => {
                f.blocks.push(block);
                Ok(())
            }
            _ => {
                if let ValueKind::BasicBlock(b) = &mut self.values[block.index()].kind {
                    b.parent = None;
                }
                Err(IrError::WrongKind(function))
            }
        }
    }

    /// A detached instruction producing a value of type `ty` (`void` if none).
    pub fn new_instruction(&mut self, opcode: Opcode, ty: TypeId, operands: Vec<ValueId>) -> ValueId {
        self.push_value(
            ty,
            ValueKind::Instruction(Instruction {
                opcode,
                operands,
                volatile: false,
                parent: None,
            }),
        )
    }

    pub fn set_volatile(&mut self, inst: ValueId, volatile: bool) -> Result<(), IrError> {
        match self.values.get_mut(inst.index()).map(|v| &mut v.kind) {
            Some(ValueKind::Instruction(i)) if matches!(i.opcode, Opcode::Load | Opcode::Store) => {
                i.volatile = volatile;
                Ok(())
            }
            _ => Err(IrError::WrongKind(inst)),
        }
    }

    pub fn append_to_block(&mut self, block: ValueId, inst: ValueId) -> Result<(), IrError> {
        match self.values.get_mut(inst.index()).map(|v| &mut v.kind) {
            Some(ValueKind::Instruction(i)) if i.parent.is_none() => i.parent = Some(block),
            _ => return Err(IrError::WrongKind(inst)),
        }
        match self.values.get_mut(block.index()).map(|v| &mut v.kind) {
            Some(ValueKind::BasicBlock(b)) => {
                b.instructions.push(inst);
                Ok(())
            }
            _ => {
                if let ValueKind::Instruction(i) = &mut self.values[inst.index()].kind {
                    i.parent = None;
                }
                Err(IrError::WrongKind(block))
            }
        }
    }

    /// A stand-in for the value at `slot` of `ty`, to be replaced with
    /// [`Module::replace_all_uses_with`] and then retired.
    pub fn new_placeholder(&mut self, ty: TypeId, slot: u32) -> ValueId {
        self.push_value(ty, ValueKind::Placeholder { slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INT: TypeId = TypeId(PrimitiveType::Int as u32);
    const UINT: TypeId = TypeId(PrimitiveType::UInt as u32);

    #[test]
    fn derived_types_are_interned() {
        let mut m = Module::new();
        let p1 = m.pointer_type(INT);
        let p2 = m.pointer_type(INT);
        assert_eq!(p1, p2);
        assert_eq!(m.type_table(), &[p1]);
        let s = m.struct_type(vec![INT, p1]);
        assert_eq!(m.struct_type(vec![INT, p1]), s);
        assert_eq!(m.type_table().len(), 2);
    }

    #[test]
    fn self_referential_struct_refines_in_place() {
        let mut m = Module::new();
        let node = m.new_opaque_type();
        let ptr = m.pointer_type(node);
        let refined = m
            .refine_type(node, TypeNode::Struct { fields: vec![ptr, INT] })
            .unwrap();
        assert_eq!(refined, node);
        assert_eq!(m.pointee(ptr), Some(node));
        assert!(!m.is_opaque(node));
        assert_eq!(m.type_table(), &[node, ptr]);
    }

    #[test]
    fn refining_into_an_existing_type_forwards() {
        let mut m = Module::new();
        let existing = m.struct_type(vec![INT]);
        let opaque = m.new_opaque_type();
        let ptr = m.pointer_type(opaque);
        let refined = m
            .refine_type(opaque, TypeNode::Struct { fields: vec![INT] })
            .unwrap();
        assert_eq!(refined, existing);
        assert_eq!(m.resolve(opaque), existing);
        assert_eq!(m.pointee(ptr), Some(existing));
        assert!(!m.type_table().contains(&opaque));
    }

    #[test]
    fn refine_rejects_non_opaque() {
        let mut m = Module::new();
        let p = m.pointer_type(INT);
        assert_eq!(
            m.refine_type(p, TypeNode::Pointer(UINT)),
            Err(IrError::NotOpaque(p))
        );
    }

    #[test]
    fn canonicalize_merges_types_equal_after_refinement() {
        let mut m = Module::new();
        let target = m.struct_type(vec![INT]);
        let direct = m.pointer_type(target);
        let opaque = m.new_opaque_type();
        let indirect = m.pointer_type(opaque);
        m.refine_type(opaque, TypeNode::Struct { fields: vec![INT] })
            .unwrap();
        assert_ne!(m.resolve(indirect), direct);
        m.canonicalize_types();
        assert_eq!(m.resolve(indirect), direct);
        assert_eq!(m.type_table(), &[target, direct]);
    }

    #[test]
    fn zero_scalars_are_null() {
        let mut m = Module::new();
        let zero = m.const_int(INT, 0).unwrap();
        assert!(m.is_null(zero));
        assert_eq!(m.null_value(INT), Some(zero));
        assert_eq!(m.const_bool(false), m.null_value(TypeId(1)).unwrap());
        assert_eq!(m.null_value(PrimitiveType::Label.type_id()), None);
        let neg_zero = m.const_double(-0.0);
        assert!(!m.is_null(neg_zero));
    }

    #[test]
    fn resolved_null_elements_fold_the_aggregate() {
        let mut m = Module::new();
        let arr = m.array_type(INT, 2);
        let holder = m.new_placeholder(INT, 0);
        let zero = m.const_int(INT, 0).unwrap();
        let agg = m.const_array(arr, vec![holder, zero]).unwrap();
        assert!(!m.is_null(agg));
        let g = m.new_global(arr, false, Linkage::Internal, Some(agg));

        m.replace_all_uses_with(holder, zero);
        m.retire_value(holder).unwrap();
        let null = m.fold_null_aggregate(agg).unwrap();
        assert!(m.is_null(null));
        assert_eq!(m.global(g).unwrap().initializer, Some(null));
        assert_eq!(m.kind(agg), &ValueKind::Retired);
        assert_eq!(m.fold_null_aggregate(null).unwrap(), null);
    }

    #[test]
    fn integer_constants_are_range_checked() {
        let mut m = Module::new();
        let sbyte = PrimitiveType::SByte.type_id();
        assert!(m.const_int(sbyte, -128).is_ok());
        assert_eq!(m.const_int(sbyte, 128), Err(IrError::OutOfRange(sbyte)));
        assert!(m.const_uint(UINT, u64::from(u32::MAX)).is_ok());
        assert!(m.const_uint(UINT, 1 << 32).is_err());
        assert!(m.const_uint(INT, 1).is_err(), "int is signed");
    }

    #[test]
    fn all_null_aggregate_collapses() {
        let mut m = Module::new();
        let arr = m.array_type(INT, 2);
        let z = m.null_value(INT).unwrap();
        let c = m.const_array(arr, vec![z, z]).unwrap();
        assert!(m.is_null(c));
        let one = m.const_int(INT, 1).unwrap();
        let c = m.const_array(arr, vec![z, one]).unwrap();
        assert!(!m.is_null(c));
        assert_eq!(m.value(z).uses().len(), 1);
    }

    #[test]
    fn aggregate_shape_is_checked() {
        let mut m = Module::new();
        let arr = m.array_type(INT, 2);
        let one = m.const_int(INT, 1).unwrap();
        assert!(matches!(
            m.const_array(arr, vec![one]),
            Err(IrError::ElementCount { .. })
        ));
        let u = m.const_uint(UINT, 1).unwrap();
        assert!(matches!(
            m.const_array(arr, vec![one, u]),
            Err(IrError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn functions_get_arguments() {
        let mut m = Module::new();
        let fn_ty = m.function_type(INT, vec![INT, UINT], false);
        let f = m.new_function(fn_ty, Linkage::Internal).unwrap();
        let args = m.function(f).unwrap().arguments.clone();
        assert_eq!(args.len(), 2);
        assert_eq!(m.type_of(args[1]), UINT);
        assert!(m.function(f).unwrap().is_declaration());
        assert_eq!(m.pointee(m.type_of(f)), Some(fn_ty));
    }

    #[test]
    fn replace_all_uses_moves_use_edges() {
        let mut m = Module::new();
        let placeholder = m.new_placeholder(INT, 3);
        let one = m.const_int(INT, 1).unwrap();
        let add = m.new_instruction(Opcode::Add, INT, vec![placeholder, one]);
        assert_eq!(m.value(placeholder).uses().len(), 1);

        let two = m.const_int(INT, 2).unwrap();
        m.replace_all_uses_with(placeholder, two);
        assert_eq!(m.operands(add), &[two, one]);
        assert!(m.value(placeholder).uses().is_empty());
        assert_eq!(m.value(two).uses(), &[Use { user: add, operand: 0 }]);
        m.retire_value(placeholder).unwrap();
        assert_eq!(m.kind(placeholder), &ValueKind::Retired);
    }

    #[test]
    fn used_values_cannot_be_retired() {
        let mut m = Module::new();
        let one = m.const_int(INT, 1).unwrap();
        let g = m.new_global(INT, false, Linkage::External, Some(one));
        assert_eq!(m.retire_value(one), Err(IrError::StillUsed(one)));
        m.set_initializer(g, None).unwrap();
        assert!(m.retire_value(one).is_ok());
    }

    #[test]
    fn set_operand_updates_both_use_lists() {
        let mut m = Module::new();
        let a = m.const_int(INT, 1).unwrap();
        let b = m.const_int(INT, 2).unwrap();
        let add = m.new_instruction(Opcode::Add, INT, vec![a, a]);
        m.set_operand(add, 1, b).unwrap();
        assert_eq!(m.value(a).uses().len(), 1);
        assert_eq!(m.value(b).uses(), &[Use { user: add, operand: 1 }]);
    }

    #[test]
    fn gep_walks_struct_and_array() {
        let mut m = Module::new();
        let arr = m.array_type(INT, 4);
        let s = m.struct_type(vec![UINT, arr]);
        let ps = m.pointer_type(s);
        let zero = m.null_value(PrimitiveType::Long.type_id()).unwrap();
        let one = m.const_uint(UINT, 1).unwrap();
        let i = m.const_int(PrimitiveType::Long.type_id(), 3).unwrap();
        let ty = m.gep_result_type(ps, &[zero, one, i]).unwrap();
        assert_eq!(m.pointee(ty), Some(INT));
        let bad = m.const_uint(UINT, 2).unwrap();
        assert_eq!(
            m.gep_result_type(ps, &[zero, bad]),
            Err(IrError::OutOfRange(s))
        );
    }
}
