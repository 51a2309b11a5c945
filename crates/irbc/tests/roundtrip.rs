//! Public API round trips through the compression wrapper and the decoder
//! options.

use irbc::compress::{self, Method};
use irbc::ir::{Linkage, Module, Opcode, PrimitiveType};
use irbc::{read_module, read_module_with, write_module, ErrorKind, ReadOptions, Revision, WriteOptions};
use pretty_assertions::assert_eq;

fn doubler() -> Module {
    let mut m = Module::new();
    let int = PrimitiveType::Int.type_id();
    let void = PrimitiveType::Void.type_id();
    let fn_ty = m.function_type(int, vec![int], false);
    let f = m.new_function(fn_ty, Linkage::External).unwrap();
    m.set_name(f, "double");
    let x = m.function(f).unwrap().arguments[0];
    let bb = m.new_basic_block();
    m.append_block(f, bb).unwrap();
    let sum = m.new_instruction(Opcode::Add, int, vec![x, x]);
    m.append_to_block(bb, sum).unwrap();
    let ret = m.new_instruction(Opcode::Ret, void, vec![sum]);
    m.append_to_block(bb, ret).unwrap();
    m
}

#[test]
fn stored_stream_round_trips() {
    let module = doubler();
    let bytes = write_module(&module, &WriteOptions::default()).unwrap();
    let packed = compress::compress(&bytes, Method::None).unwrap();
    let decoded = read_module(&compress::decompress(&packed).unwrap()).unwrap();
    assert_eq!(decoded.listing(), module.listing());
}

#[cfg(feature = "compression")]
#[test]
fn lz4_stream_round_trips() {
    let module = doubler();
    let bytes = write_module(&module, &WriteOptions::revision(Revision::V0)).unwrap();
    let packed = compress::compress(&bytes, Method::Lz4).unwrap();
    assert_eq!(packed[0], Method::Lz4.tag());
    let decoded = read_module(&compress::decompress(&packed).unwrap()).unwrap();
    assert_eq!(decoded.listing(), module.listing());
}

#[test]
fn nesting_limit_is_enforced() {
    let bytes = write_module(&doubler(), &WriteOptions::default()).unwrap();
    let options = ReadOptions {
        max_block_depth: 0,
        ..ReadOptions::default()
    };
    let err = read_module_with(&bytes, &options).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NestingTooDeep);
}

#[test]
fn truncated_module_block_fails_before_the_version_word() {
    for revision in [Revision::V0, Revision::V1, Revision::V2] {
        let bytes = write_module(&doubler(), &WriteOptions::revision(revision)).unwrap();
        let err = read_module(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Truncated);
        assert_eq!(err.revision, None);
        assert!(err.offset <= bytes.len() - 1);
    }
}

#[test]
fn unverified_read_matches_verified_read() {
    let bytes = write_module(&doubler(), &WriteOptions::default()).unwrap();
    let options = ReadOptions {
        verify: false,
        ..ReadOptions::default()
    };
    let fast = read_module_with(&bytes, &options).unwrap();
    assert_eq!(fast.listing(), read_module(&bytes).unwrap().listing());
}

#[test]
fn names_are_kept() {
    let bytes = write_module(&doubler(), &WriteOptions::default()).unwrap();
    let listing = read_module(&bytes).unwrap().listing();
    assert!(listing.contains("\"double\""), "{listing}");
}
