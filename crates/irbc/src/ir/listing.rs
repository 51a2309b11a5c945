//! Canonical text rendering of a module.
//!
//! Every entity is named by position (`%t13`, `@g0`, `@f1`, `%a0`, `bb2`,
//! `%i4`), so two structurally equal modules render identically no matter
//! how their arenas were populated.

use std::collections::HashMap;

use super::{
    ConstantKind, Endianness, FIRST_DERIVED, Module, PointerSize, TypeId, TypeNode, ValueId,
    ValueKind,
};

/// Constants nested deeper than this are elided.
const MAX_CONSTANT_DEPTH: usize = 32;

struct Listing<'a> {
    module: &'a Module,
    type_pos: HashMap<TypeId, usize>,
    globals: HashMap<ValueId, usize>,
    functions: HashMap<ValueId, usize>,
    blocks: HashMap<ValueId, usize>,
    insts: HashMap<ValueId, usize>,
}

impl<'a> Listing<'a> {
    fn new(module: &'a Module) -> Self {
        let type_pos = module
            .type_table()
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, i))
            .collect();
        let globals = module
            .globals()
            .iter()
            .enumerate()
            .map(|(i, &g)| (g, i))
            .collect();
        let functions = module
            .functions()
            .iter()
            .enumerate()
            .map(|(i, &f)| (f, i))
            .collect();
        let mut blocks = HashMap::new();
        let mut insts = HashMap::new();
        for &f in module.functions() {
            let Some(func) = module.function(f) else {
                continue;
            };
            let mut next_inst = 0;
            for (bi, &bb) in func.blocks.iter().enumerate() {
                blocks.insert(bb, bi);
                let body = module.block(bb).map(|b| b.instructions.as_slice());
                for &inst in body.unwrap_or(&[]) {
                    insts.insert(inst, next_inst);
                    next_inst += 1;
                }
            }
        }
        Listing {
            module,
            type_pos,
            globals,
            functions,
            blocks,
            insts,
        }
    }

    fn type_ref(&self, ty: TypeId) -> String {
        let ty = self.module.resolve(ty);
        match self.module.type_node(ty) {
            TypeNode::Primitive(p) => p.name().to_string(),
            _ => match self.type_pos.get(&ty) {
                Some(pos) => format!("%t{}", *pos as u32 + FIRST_DERIVED),
                None => format!("%t?{}", ty.0),
            },
        }
    }

    fn type_body(&self, ty: TypeId) -> String {
        let list = |tys: &[TypeId]| {
            tys.iter()
                .map(|&t| self.type_ref(t))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self.module.type_node(ty) {
            TypeNode::Primitive(p) => p.name().to_string(),
            TypeNode::Pointer(elem) => format!("{}*", self.type_ref(*elem)),
            TypeNode::Array { element, len } => format!("[{} x {}]", len, self.type_ref(*element)),
            TypeNode::Struct { fields } => format!("{{ {} }}", list(fields)),
            TypeNode::Function {
                ret,
                params,
                vararg,
            } => {
                let mut params = list(params);
                if *vararg {
                    params.push_str(if params.is_empty() { "..." } else { ", ..." });
                }
                format!("{} ({})", self.type_ref(*ret), params)
            }
            TypeNode::Opaque => "opaque".to_string(),
        }
    }

    fn operand(&self, v: ValueId, depth: usize) -> String {
        let Some(data) = self.module.get(v) else {
            return format!("?{}", v.0);
        };
        match &data.kind {
            ValueKind::Constant(_) => self.constant(v, depth),
            ValueKind::GlobalVariable(_) => match self.globals.get(&v) {
                Some(i) => format!("@g{i}"),
                None => "@g?".to_string(),
            },
            ValueKind::Function(_) => match self.functions.get(&v) {
                Some(i) => format!("@f{i}"),
                None => "@f?".to_string(),
            },
            ValueKind::Argument { index, .. } => format!("%a{index}"),
            ValueKind::BasicBlock(_) => match self.blocks.get(&v) {
                Some(i) => format!("bb{i}"),
                None => "bb?".to_string(),
            },
            ValueKind::Instruction(_) => match self.insts.get(&v) {
                Some(i) => format!("%i{i}"),
                None => "%i?".to_string(),
            },
            ValueKind::Placeholder { slot } => format!("placeholder({slot})"),
            ValueKind::Retired => "retired".to_string(),
        }
    }

    fn constant(&self, v: ValueId, depth: usize) -> String {
        let m = self.module;
        let ty = self.type_ref(m.type_of(v));
        let Some(c) = m.constant(v) else {
            return self.operand(v, depth);
        };
        if depth > MAX_CONSTANT_DEPTH {
            return format!("{ty} ...");
        }
        let ops = || {
            c.operands
                .iter()
                .map(|&op| self.operand(op, depth + 1))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match c.kind {
            ConstantKind::Null => format!("{ty} null"),
            ConstantKind::Bool(b) => format!("{ty} {b}"),
            ConstantKind::Int(i) => format!("{ty} {i}"),
            ConstantKind::UInt(u) => format!("{ty} {u}"),
            ConstantKind::Float(bits) => format!("{ty} 0x{bits:08x}"),
            ConstantKind::Double(bits) => format!("{ty} 0x{bits:016x}"),
            ConstantKind::Array => format!("{ty} [{}]", ops()),
            ConstantKind::Struct => format!("{ty} {{ {} }}", ops()),
            ConstantKind::Expr(op) => format!("{ty} {}({})", op.mnemonic(), ops()),
        }
    }

    fn name_suffix(&self, v: ValueId) -> String {
        match self.module.name(v) {
            Some(name) => format!(" ; {name:?}"),
            None => String::new(),
        }
    }

    fn render(&self) -> String {
        let m = self.module;
        let mut out = String::new();

        let endian = match m.target.endianness {
            Endianness::Little => "little",
            Endianness::Big => "big",
            Endianness::Unspecified => "any",
        };
        let pointer = match m.target.pointer_size {
            PointerSize::Bits32 => "32",
            PointerSize::Bits64 => "64",
            PointerSize::Unspecified => "any",
        };
        out.push_str(&format!("target endian={endian} pointer={pointer}\n"));

        for &ty in m.type_table() {
            out.push_str(&format!("{} = type {}", self.type_ref(ty), self.type_body(ty)));
            if let Some(name) = m.type_name(ty) {
                out.push_str(&format!(" ; {name:?}"));
            }
            out.push('\n');
        }

        for (i, &g) in m.globals().iter().enumerate() {
            let Some(global) = m.global(g) else { continue };
            let elem = m.pointee(m.type_of(g)).unwrap_or(m.type_of(g));
            out.push_str(&format!(
                "@g{i} = {} {} {}",
                global.linkage.keyword(),
                if global.is_constant { "constant" } else { "global" },
                self.type_ref(elem)
            ));
            if let Some(init) = global.initializer {
                out.push_str(&format!(" = {}", self.operand(init, 0)));
            }
            out.push_str(&self.name_suffix(g));
            out.push('\n');
        }

        for (i, &f) in m.functions().iter().enumerate() {
            let Some(func) = m.function(f) else { continue };
            let fn_ty = m.pointee(m.type_of(f)).unwrap_or(m.type_of(f));
            let args = func
                .arguments
                .iter()
                .enumerate()
                .map(|(ai, &a)| {
                    let mut s = format!("%a{ai}: {}", self.type_ref(m.type_of(a)));
                    if let Some(name) = m.name(a) {
                        s.push_str(&format!(" {name:?}"));
                    }
                    s
                })
                .collect::<Vec<_>>()
                .join(", ");
            let keyword = if func.is_declaration() { "declare" } else { "define" };
            out.push_str(&format!(
                "@f{i} = {keyword} {} {} ({args})",
                func.linkage.keyword(),
                self.type_ref(fn_ty)
            ));
            out.push_str(&self.name_suffix(f));
            out.push('\n');
            for (bi, &bb) in func.blocks.iter().enumerate() {
                out.push_str(&format!("bb{bi}:{}\n", self.name_suffix(bb)));
                let insts = m.block(bb).map(|b| b.instructions.as_slice()).unwrap_or(&[]);
                for &inst in insts {
                    self.render_instruction(inst, &mut out);
                }
            }
            if !func.is_declaration() {
                out.push_str("end\n");
            }
        }
        out
    }

    fn render_instruction(&self, inst: ValueId, out: &mut String) {
        let m = self.module;
        let Some(i) = m.instruction(inst) else { return };
        let ty = m.type_of(inst);
        let ops = i
            .operands
            .iter()
            .map(|&op| self.operand(op, 0))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str("  ");
        if !m.is_primitive(ty, super::PrimitiveType::Void) {
            out.push_str(&format!("{} = ", self.operand(inst, 0)));
        }
        if i.volatile {
            out.push_str("volatile ");
        }
        out.push_str(&format!("{} {} {}", i.opcode.mnemonic(), self.type_ref(ty), ops));
        out.push_str(&self.name_suffix(inst));
        out.push('\n');
    }
}

impl Module {
    /// Renders the module as positional text.
    pub fn listing(&self) -> String {
        Listing::new(self).render()
    }
}
