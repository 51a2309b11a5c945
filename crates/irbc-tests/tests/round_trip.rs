//! Encode/decode round trips of the shared fixtures.
//!
//! Structural equality is checked through `Module::listing`, which names
//! everything by position and so does not depend on arena layout.

use anyhow::{Context, Result};
use irbc::{read_module, write_module, CompactionPolicy, Revision, WriteOptions};
use irbc_tests::all_fixtures;
use pretty_assertions::assert_eq;

const POLICIES: [CompactionPolicy; 3] = [
    CompactionPolicy::Never,
    CompactionPolicy::Auto,
    CompactionPolicy::Always,
];

fn options(revision: Revision, compaction: CompactionPolicy) -> WriteOptions {
    WriteOptions {
        revision,
        compaction,
        target: None,
    }
}

#[test]
fn current_revision_preserves_listing() -> Result<()> {
    for (name, module) in all_fixtures()? {
        for policy in POLICIES {
            let bytes = write_module(&module, &options(Revision::V2, policy))
                .with_context(|| format!("encoding {name} with {policy:?}"))?;
            let decoded =
                read_module(&bytes).with_context(|| format!("decoding {name} with {policy:?}"))?;
            assert_eq!(decoded.listing(), module.listing(), "{name} {policy:?}");
        }
    }
    Ok(())
}

#[test]
fn legacy_revisions_convert_back_to_current() -> Result<()> {
    for (name, module) in all_fixtures()? {
        for revision in [Revision::V0, Revision::V1] {
            for policy in POLICIES {
                let legacy = write_module(&module, &options(revision, policy))
                    .with_context(|| format!("encoding {name} at revision {revision}"))?;
                let decoded = read_module(&legacy)
                    .with_context(|| format!("decoding {name} at revision {revision}"))?;
                let current = write_module(&decoded, &WriteOptions::default())?;
                let restored = read_module(&current)?;
                assert_eq!(restored.listing(), module.listing(), "{name} via revision {revision}");
            }
        }
    }
    Ok(())
}

#[test]
fn legacy_streams_decode_stably() -> Result<()> {
    for (name, module) in all_fixtures()? {
        for revision in [Revision::V0, Revision::V1] {
            let first = read_module(&write_module(&module, &WriteOptions::revision(revision))?)?;
            let second = read_module(&write_module(&first, &WriteOptions::revision(revision))?)?;
            assert_eq!(second.listing(), first.listing(), "{name} at revision {revision}");
        }
    }
    Ok(())
}

#[test]
fn re_encoding_a_decoded_module_is_byte_identical() -> Result<()> {
    for (name, module) in all_fixtures()? {
        let options = WriteOptions::default();
        let bytes = write_module(&module, &options)?;
        let again = write_module(&read_module(&bytes)?, &options)?;
        assert!(bytes == again, "{name}: re-encoding changed the stream");
    }
    Ok(())
}

#[test]
fn names_and_volatility_survive() -> Result<()> {
    let (_, module) = all_fixtures()?
        .into_iter()
        .find(|(name, _)| *name == "kitchen_sink")
        .context("kitchen_sink fixture")?;
    for revision in [Revision::V0, Revision::V1, Revision::V2] {
        let decoded = read_module(&write_module(&module, &WriteOptions::revision(revision))?)?;
        let listing = decoded.listing();
        assert!(listing.contains("\"printf\""), "revision {revision}");
        assert!(listing.contains("\"pair\""), "revision {revision}");
        assert_eq!(listing.matches("volatile ").count(), 2, "revision {revision}");
    }
    Ok(())
}
