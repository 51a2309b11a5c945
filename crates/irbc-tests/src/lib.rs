//! Fixture modules shared by the end-to-end tests and the benchmarks.
//!
//! Every fixture is built through the public `Module` builder API and is
//! valid in every format revision.

use anyhow::Result;
use irbc::ir::{Linkage, Module, Opcode, PrimitiveType, TypeId, TypeNode, ValueId};

fn prim(p: PrimitiveType) -> TypeId {
    p.type_id()
}

fn void() -> TypeId {
    prim(PrimitiveType::Void)
}

/// Appends a new basic block to `function`.
fn block(m: &mut Module, function: ValueId) -> Result<ValueId> {
    let bb = m.new_basic_block();
    m.append_block(function, bb)?;
    Ok(bb)
}

/// Creates an instruction at the end of `bb`.
fn emit(m: &mut Module, bb: ValueId, op: Opcode, ty: TypeId, ops: Vec<ValueId>) -> Result<ValueId> {
    let inst = m.new_instruction(op, ty, ops);
    m.append_to_block(bb, inst)?;
    Ok(inst)
}

/// A global counter and a function that bumps it.
///
/// ```text
/// @counter = internal global int 0
/// int @bump(int %step) {
///   %old = load int* @counter
///   %new = add int %old, %step
///   store int %new, int* @counter
///   ret int %new
/// }
/// ```
pub fn counter_module() -> Result<Module> {
    let mut m = Module::new();
    let int = prim(PrimitiveType::Int);
    let zero = m.const_int(int, 0)?;
    let counter = m.new_global(int, false, Linkage::Internal, Some(zero));
    m.set_name(counter, "counter");

    let fn_ty = m.function_type(int, vec![int], false);
    let bump = m.new_function(fn_ty, Linkage::External)?;
    m.set_name(bump, "bump");
    let step = m.function(bump).map(|f| f.arguments[0]).unwrap_or(bump);
    m.set_name(step, "step");

    let entry = block(&mut m, bump)?;
    let old = emit(&mut m, entry, Opcode::Load, int, vec![counter])?;
    let new = emit(&mut m, entry, Opcode::Add, int, vec![old, step])?;
    emit(&mut m, entry, Opcode::Store, void(), vec![new, counter])?;
    emit(&mut m, entry, Opcode::Ret, void(), vec![new])?;
    Ok(m)
}

/// A self-referential list node type and a loop summing a list.
///
/// The loop header's PHI nodes refer to values defined later in the body,
/// and the header's branch refers to the exit block before it exists.
pub fn list_module() -> Result<Module> {
    let mut m = Module::new();
    let int = prim(PrimitiveType::Int);
    let long = prim(PrimitiveType::Long);
    let uint = prim(PrimitiveType::UInt);
    let bool_ty = prim(PrimitiveType::Bool);

    let node = m.new_opaque_type();
    let node_ptr = m.pointer_type(node);
    let node = m.refine_type(node, TypeNode::Struct { fields: vec![int, node_ptr] })?;
    m.name_type(node, "node");
    let int_ptr = m.pointer_type(int);
    let node_ptr_ptr = m.pointer_type(node_ptr);

    let null_node = m
        .null_value(node_ptr)
        .ok_or_else(|| anyhow::anyhow!("pointer type without a null"))?;
    let head = m.new_global(node_ptr, false, Linkage::External, Some(null_node));
    m.set_name(head, "head");

    let fn_ty = m.function_type(int, vec![node_ptr], false);
    let sum = m.new_function(fn_ty, Linkage::External)?;
    m.set_name(sum, "sum");
    let list = m.function(sum).map(|f| f.arguments[0]).unwrap_or(sum);

    let entry = block(&mut m, sum)?;
    let header = block(&mut m, sum)?;
    let body = block(&mut m, sum)?;
    let exit = block(&mut m, sum)?;
    m.set_name(header, "loop");

    let zero_long = m.const_int(long, 0)?;
    let zero_int = m.const_int(int, 0)?;
    let value_field = m.const_uint(uint, 0)?;
    let next_field = m.const_uint(uint, 1)?;

    emit(&mut m, entry, Opcode::Br, void(), vec![header])?;

    // Operands pointing at body values are patched in once they exist.
    let cur = emit(&mut m, header, Opcode::PHI, node_ptr, vec![list, entry, list, body])?;
    let acc = emit(&mut m, header, Opcode::PHI, int, vec![zero_int, entry, zero_int, body])?;
    let done = emit(&mut m, header, Opcode::SetEQ, bool_ty, vec![cur, null_node])?;
    emit(&mut m, header, Opcode::Br, void(), vec![exit, body, done])?;

    let value_ptr = emit(
        &mut m,
        body,
        Opcode::GetElementPtr,
        int_ptr,
        vec![cur, zero_long, value_field],
    )?;
    let value = emit(&mut m, body, Opcode::Load, int, vec![value_ptr])?;
    let acc_next = emit(&mut m, body, Opcode::Add, int, vec![acc, value])?;
    let next_ptr = emit(
        &mut m,
        body,
        Opcode::GetElementPtr,
        node_ptr_ptr,
        vec![cur, zero_long, next_field],
    )?;
    let next = emit(&mut m, body, Opcode::Load, node_ptr, vec![next_ptr])?;
    emit(&mut m, body, Opcode::Br, void(), vec![header])?;
    m.set_operand(cur, 2, next)?;
    m.set_operand(acc, 2, acc_next)?;

    emit(&mut m, exit, Opcode::Ret, void(), vec![acc])?;
    Ok(m)
}

/// Exercises every instruction family, string constants, constant
/// expressions, floating-point constants, varargs, invoke and volatile
/// memory access.
pub fn kitchen_sink_module() -> Result<Module> {
    let mut m = Module::new();
    let int = prim(PrimitiveType::Int);
    let uint = prim(PrimitiveType::UInt);
    let long = prim(PrimitiveType::Long);
    let ubyte = prim(PrimitiveType::UByte);
    let bool_ty = prim(PrimitiveType::Bool);
    let float = prim(PrimitiveType::Float);
    let double = prim(PrimitiveType::Double);

    let hello = m.const_string(b"hello %d %u\n\0");
    let hello_ty = m.type_of(hello);
    let msg = m.new_global(hello_ty, true, Linkage::Internal, Some(hello));
    m.set_name(msg, "msg");

    let byte_ptr = m.pointer_type(ubyte);
    let zero_long = m.const_int(long, 0)?;
    let msg_start = m.const_expr(Opcode::GetElementPtr, byte_ptr, vec![msg, zero_long, zero_long])?;
    let fmt = m.new_global(byte_ptr, true, Linkage::Internal, Some(msg_start));
    m.set_name(fmt, "fmt");

    let pair_ty = m.struct_type(vec![float, double, bool_ty]);
    m.name_type(pair_ty, "pair");
    let f = m.const_float(1.5);
    let d = m.const_double(-2.25);
    let t = m.const_bool(true);
    let pair = m.const_struct(pair_ty, vec![f, d, t])?;
    m.new_global(pair_ty, false, Linkage::Weak, Some(pair));

    let seven = m.const_int(int, 7)?;
    let widened = m.const_expr(Opcode::Cast, long, vec![seven])?;
    m.new_global(long, false, Linkage::LinkOnce, Some(widened));

    let table_ty = m.array_type(int, 4);
    let one = m.const_int(int, 1)?;
    let two = m.const_int(int, 2)?;
    let zero = m.const_int(int, 0)?;
    let table = m.const_array(table_ty, vec![one, zero, two, seven])?;
    m.new_global(table_ty, true, Linkage::Appending, Some(table));

    let printf_ty = m.function_type(int, vec![byte_ptr], true);
    let printf = m.new_function(printf_ty, Linkage::External)?;
    m.set_name(printf, "printf");

    let main_ty = m.function_type(int, vec![int, uint], false);
    let main = m.new_function(main_ty, Linkage::External)?;
    m.set_name(main, "main");
    let args = m.function(main).map(|f| f.arguments.clone()).unwrap_or_default();
    let (a, b) = (args[0], args[1]);

    let entry = block(&mut m, main)?;
    let ok = block(&mut m, main)?;
    let one_bb = block(&mut m, main)?;
    let done = block(&mut m, main)?;
    let fail = block(&mut m, main)?;

    let int_ptr = m.pointer_type(int);
    let sixteen = m.const_uint(uint, 16)?;
    let two_bits = m.const_uint(ubyte, 2)?;
    let one_bit = m.const_uint(ubyte, 1)?;

    let slot = emit(&mut m, entry, Opcode::Alloca, int_ptr, vec![])?;
    let buf = emit(&mut m, entry, Opcode::Malloc, byte_ptr, vec![sixteen])?;
    let store = emit(&mut m, entry, Opcode::Store, void(), vec![a, slot])?;
    m.set_volatile(store, true)?;
    let v = emit(&mut m, entry, Opcode::Load, int, vec![slot])?;
    m.set_volatile(v, true)?;
    let shifted = emit(&mut m, entry, Opcode::Shl, int, vec![v, two_bits])?;
    let halved = emit(&mut m, entry, Opcode::Shr, int, vec![shifted, one_bit])?;
    let wide = emit(&mut m, entry, Opcode::Cast, long, vec![halved])?;
    let narrow = emit(&mut m, entry, Opcode::Cast, int, vec![wide])?;
    let negative = emit(&mut m, entry, Opcode::SetLT, bool_ty, vec![narrow, zero])?;
    let pick = emit(&mut m, entry, Opcode::Select, int, vec![negative, a, narrow])?;
    let mixed = emit(&mut m, entry, Opcode::Xor, int, vec![pick, seven])?;
    emit(&mut m, entry, Opcode::VAArg, int, vec![slot])?;
    let text = emit(&mut m, entry, Opcode::Load, byte_ptr, vec![fmt])?;
    let printed = emit(
        &mut m,
        entry,
        Opcode::Invoke,
        int,
        vec![printf, ok, fail, text, mixed, b],
    )?;

    emit(&mut m, ok, Opcode::Free, void(), vec![buf])?;
    emit(
        &mut m,
        ok,
        Opcode::Switch,
        void(),
        vec![mixed, done, one, one_bb, two, done],
    )?;
    emit(&mut m, one_bb, Opcode::Unreachable, void(), vec![])?;
    emit(&mut m, done, Opcode::Ret, void(), vec![printed])?;
    emit(&mut m, fail, Opcode::Unwind, void(), vec![])?;
    Ok(m)
}

/// `globals` initialized integer globals and a function that passes the
/// last four of them to a declared helper over and over. The function
/// touches few module values, all with large module slots.
pub fn wide_module(globals: usize) -> Result<Module> {
    let mut m = Module::new();
    let int = prim(PrimitiveType::Int);
    let int_ptr = m.pointer_type(int);
    let mut all = Vec::with_capacity(globals);
    for i in 0..globals {
        let init = m.const_int(int, i as i64 + 1)?;
        all.push(m.new_global(int, false, Linkage::Internal, Some(init)));
    }

    let use_ty = m.function_type(void(), vec![int_ptr, int_ptr], false);
    let helper = m.new_function(use_ty, Linkage::External)?;
    m.set_name(helper, "use");
    let touch_ty = m.function_type(void(), vec![], false);
    let touch = m.new_function(touch_ty, Linkage::External)?;
    m.set_name(touch, "touch");

    let entry = block(&mut m, touch)?;
    let hot = &all[all.len().saturating_sub(4)..];
    if !hot.is_empty() {
        for k in 0..32 {
            let a = hot[k % hot.len()];
            let b = hot[(k + 1) % hot.len()];
            emit(&mut m, entry, Opcode::Call, void(), vec![helper, a, b])?;
        }
    }
    emit(&mut m, entry, Opcode::Ret, void(), vec![])?;
    Ok(m)
}

/// Every fixture, by name.
pub fn all_fixtures() -> Result<Vec<(&'static str, Module)>> {
    Ok(vec![
        ("counter", counter_module()?),
        ("list", list_module()?),
        ("kitchen_sink", kitchen_sink_module()?),
        ("wide", wide_module(300)?),
    ])
}
