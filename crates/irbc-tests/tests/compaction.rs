//! Per-function compaction tables.

use anyhow::Result;
use irbc::ir::{Linkage, Module, Opcode, PrimitiveType};
use irbc::{read_module, write_module, CompactionPolicy, Revision, WriteOptions};
use irbc_tests::wide_module;
use pretty_assertions::assert_eq;

fn encode(module: &Module, revision: Revision, compaction: CompactionPolicy) -> Result<Vec<u8>> {
    let options = WriteOptions {
        revision,
        compaction,
        target: None,
    };
    Ok(write_module(module, &options)?)
}

#[test]
fn compaction_shrinks_functions_with_far_references() -> Result<()> {
    let module = wide_module(300)?;
    for revision in [Revision::V0, Revision::V1, Revision::V2] {
        let never = encode(&module, revision, CompactionPolicy::Never)?;
        let always = encode(&module, revision, CompactionPolicy::Always)?;
        let auto = encode(&module, revision, CompactionPolicy::Auto)?;
        assert!(always.len() < never.len(), "revision {revision}");
        assert_eq!(auto, always, "revision {revision}");
    }
    Ok(())
}

#[test]
fn auto_skips_tables_that_do_not_pay_off() -> Result<()> {
    let module = irbc_tests::counter_module()?;
    let never = encode(&module, Revision::V2, CompactionPolicy::Never)?;
    let auto = encode(&module, Revision::V2, CompactionPolicy::Auto)?;
    assert!(auto.len() <= never.len());
    assert_eq!(auto, never);
    Ok(())
}

#[test]
fn compacted_and_plain_streams_decode_alike() -> Result<()> {
    let module = wide_module(300)?;
    let never = read_module(&encode(&module, Revision::V2, CompactionPolicy::Never)?)?;
    let always = read_module(&encode(&module, Revision::V2, CompactionPolicy::Always)?)?;
    assert_eq!(always.listing(), never.listing());
    Ok(())
}

/// Two functions reference disjoint module values through their own
/// tables; neither table leaks into the other function.
#[test]
fn tables_are_scoped_to_their_function() -> Result<()> {
    let mut m = Module::new();
    let int = PrimitiveType::Int.type_id();
    let void = PrimitiveType::Void.type_id();
    let mut globals = Vec::new();
    for i in 0..100 {
        let init = m.const_int(int, i + 1)?;
        globals.push(m.new_global(int, false, Linkage::Internal, Some(init)));
    }
    let fn_ty = m.function_type(int, vec![], false);
    for &g in [globals[99], globals[50]].iter() {
        let f = m.new_function(fn_ty, Linkage::External)?;
        let bb = m.new_basic_block();
        m.append_block(f, bb)?;
        let load = m.new_instruction(Opcode::Load, int, vec![g]);
        m.append_to_block(bb, load)?;
        let twice = m.new_instruction(Opcode::Add, int, vec![load, load]);
        m.append_to_block(bb, twice)?;
        let ret = m.new_instruction(Opcode::Ret, void, vec![twice]);
        m.append_to_block(bb, ret)?;
    }

    for revision in [Revision::V0, Revision::V1, Revision::V2] {
        let bytes = encode(&m, revision, CompactionPolicy::Always)?;
        let decoded = read_module(&bytes)?;
        let loads: Vec<String> = decoded
            .listing()
            .lines()
            .filter(|l| l.contains("load"))
            .map(str::to_owned)
            .collect();
        assert_eq!(
            loads,
            vec!["  %i0 = load int @g99".to_string(), "  %i0 = load int @g50".to_string()],
            "revision {revision}"
        );
    }
    Ok(())
}

/// Under `Auto` one function carries a table and its sibling does not;
/// both still resolve their operands against the right planes.
#[test]
fn compacted_and_plain_functions_coexist() -> Result<()> {
    let mut m = wide_module(300)?;
    let int = PrimitiveType::Int.type_id();
    let void = PrimitiveType::Void.type_id();
    let first = m.globals()[0];
    let fn_ty = m.function_type(int, vec![], false);
    let peek = m.new_function(fn_ty, Linkage::External)?;
    let bb = m.new_basic_block();
    m.append_block(peek, bb)?;
    let load = m.new_instruction(Opcode::Load, int, vec![first]);
    m.append_to_block(bb, load)?;
    let ret = m.new_instruction(Opcode::Ret, void, vec![load]);
    m.append_to_block(bb, ret)?;

    let never = encode(&m, Revision::V2, CompactionPolicy::Never)?;
    let always = encode(&m, Revision::V2, CompactionPolicy::Always)?;
    let auto = encode(&m, Revision::V2, CompactionPolicy::Auto)?;
    assert!(auto != never);
    assert!(auto != always);
    assert!(auto.len() < never.len());

    let decoded = read_module(&auto)?;
    assert_eq!(decoded.listing(), m.listing());
    assert!(decoded.listing().contains("  %i0 = load int @g0"));
    Ok(())
}
