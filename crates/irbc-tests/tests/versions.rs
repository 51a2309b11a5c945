//! Version word handling and revision-specific encodings.

use anyhow::Result;
use irbc::ir::{Endianness, PointerSize, TargetInfo};
use irbc::{peek_version, read_module, write_module, ErrorKind, Revision, WriteOptions};
use irbc_tests::{counter_module, list_module};
use pretty_assertions::assert_eq;

/// Magic plus a module block holding nothing but `word`.
fn stream_with_version(word: u8) -> Vec<u8> {
    let mut bytes = b"irbc".to_vec();
    bytes.extend_from_slice(&[0x01, 0x04, word, 0, 0, 0]);
    bytes
}

#[test]
fn every_revision_is_announced() -> Result<()> {
    let module = counter_module()?;
    for revision in [Revision::V0, Revision::V1, Revision::V2] {
        let bytes = write_module(&module, &WriteOptions::revision(revision))?;
        assert_eq!(peek_version(&bytes)?.revision, revision);
    }
    Ok(())
}

#[test]
fn unknown_revision_is_rejected() {
    let err = read_module(&stream_with_version(3 << 4)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedVersion(3));
    assert_eq!(err.revision, None);
}

#[test]
fn empty_module_of_each_revision_decodes() {
    for revision in 0u8..3 {
        let module = read_module(&stream_with_version((revision << 4) | 0b1100)).unwrap();
        assert!(module.globals().is_empty());
        assert_eq!(module.target, TargetInfo::default());
    }
}

#[test]
fn missing_magic_is_reported() {
    let mut bytes = write_module(&counter_module().unwrap(), &WriteOptions::default()).unwrap();
    bytes[0] = b'X';
    assert_eq!(read_module(&bytes).unwrap_err().kind, ErrorKind::CorruptMagic);
}

#[test]
fn target_description_round_trips() -> Result<()> {
    let module = counter_module()?;
    for target in [
        TargetInfo {
            endianness: Endianness::Big,
            pointer_size: PointerSize::Bits64,
        },
        TargetInfo {
            endianness: Endianness::Little,
            pointer_size: PointerSize::Bits32,
        },
        TargetInfo::default(),
    ] {
        let options = WriteOptions {
            target: Some(target),
            ..WriteOptions::default()
        };
        let bytes = write_module(&module, &options)?;
        assert_eq!(peek_version(&bytes)?.target, target);
        assert_eq!(read_module(&bytes)?.target, target);
    }
    Ok(())
}

#[test]
fn legacy_revisions_are_larger() -> Result<()> {
    // Explicit nulls and padded strings cost bytes.
    let module = list_module()?;
    let v0 = write_module(&module, &WriteOptions::revision(Revision::V0))?;
    let v2 = write_module(&module, &WriteOptions::revision(Revision::V2))?;
    assert!(v0.len() > v2.len());
    Ok(())
}
