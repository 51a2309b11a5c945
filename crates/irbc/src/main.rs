use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use irbc::compress::{self, Method};
use irbc::format::MAGIC;
use irbc::{read_module_with, write_module, CompactionPolicy, ReadOptions, Revision, WriteOptions};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// irbc: decode, verify, list and re-encode IR module bytecode.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input bytecode file, raw or compressed
    input: PathBuf,

    /// Re-encode the module into this file
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Format revision used with --output
    #[arg(long, value_enum, default_value_t = RevisionArg::V2)]
    revision: RevisionArg,

    /// Function compaction used with --output
    #[arg(long, value_enum, default_value_t = CompactionArg::Auto)]
    compaction: CompactionArg,

    /// Compression applied to --output
    #[arg(long, value_enum, default_value_t = CompressArg::None)]
    compress: CompressArg,

    /// Print the module listing to stdout
    #[arg(long)]
    listing: bool,

    /// Skip the structural verifier after decoding
    #[arg(long)]
    no_verify: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RevisionArg {
    #[value(name = "0")]
    V0,
    #[value(name = "1")]
    V1,
    #[value(name = "2")]
    V2,
}

impl From<RevisionArg> for Revision {
    fn from(arg: RevisionArg) -> Self {
        match arg {
            RevisionArg::V0 => Revision::V0,
            RevisionArg::V1 => Revision::V1,
            RevisionArg::V2 => Revision::V2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CompactionArg {
    Never,
    Auto,
    Always,
}

impl From<CompactionArg> for CompactionPolicy {
    fn from(arg: CompactionArg) -> Self {
        match arg {
            CompactionArg::Never => CompactionPolicy::Never,
            CompactionArg::Auto => CompactionPolicy::Auto,
            CompactionArg::Always => CompactionPolicy::Always,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CompressArg {
    None,
    Lz4,
}

impl From<CompressArg> for Method {
    fn from(arg: CompressArg) -> Self {
        match arg {
            CompressArg::None => Method::None,
            CompressArg::Lz4 => Method::Lz4,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let raw = fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;
    // Anything that does not start with the magic is taken to be compressed.
    let bytes = if raw.starts_with(&MAGIC) {
        raw
    } else {
        compress::decompress(&raw).context("input is neither bytecode nor a compressed stream")?
    };

    let read_options = ReadOptions {
        verify: !cli.no_verify,
        ..ReadOptions::default()
    };
    let module = read_module_with(&bytes, &read_options)
        .with_context(|| format!("failed to decode {}", cli.input.display()))?;
    info!(
        globals = module.globals().len(),
        functions = module.functions().len(),
        "decoded {}",
        cli.input.display()
    );

    if cli.listing {
        print!("{}", module.listing());
    }

    if let Some(output_path) = &cli.output {
        let options = WriteOptions {
            revision: cli.revision.into(),
            compaction: cli.compaction.into(),
            target: None,
        };
        let encoded = write_module(&module, &options).context("failed to encode module")?;
        let encoded = match Method::from(cli.compress) {
            Method::None => encoded,
            method => compress::compress(&encoded, method).context("failed to compress module")?,
        };
        fs::write(output_path, &encoded)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        info!(bytes = encoded.len(), "wrote {}", output_path.display());
    }
    Ok(())
}
