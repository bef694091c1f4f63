use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;

use tbcheck::annotate::{annotate, progress_bar};
use tbcheck::fixture::load_fixtures;
use tbcheck::oracle::SyzygyOracle;

use super::DialectArg;

#[derive(Args)]
pub(crate) struct AnnotateArgs {
    /// Fixture file to annotate.
    #[arg(long)]
    fixtures: PathBuf,
    /// Syzygy tablebase directory.
    #[arg(long, env = "SYZYGY_PATH")]
    syzygy: PathBuf,
    /// Where to write the annotated fixture.
    #[arg(long)]
    output: PathBuf,
    /// Fixture dialect.
    #[arg(long, value_enum, default_value_t = DialectArg::Auto)]
    dialect: DialectArg,
}

pub(crate) fn run_annotate(args: AnnotateArgs) -> Result<()> {
    let fixtures = load_fixtures(&args.fixtures, args.dialect.into())
        .with_context(|| format!("failed to read {}", args.fixtures.display()))?;
    for rejected in &fixtures.rejected {
        eprintln!("{rejected}");
    }
    if fixtures.cases.is_empty() {
        bail!("no valid positions loaded from {}", args.fixtures.display());
    }

    let oracle = SyzygyOracle::open(&args.syzygy)
        .with_context(|| format!("failed to open tablebases in {}", args.syzygy.display()))?;
    if oracle.table_count() == 0 {
        bail!("no syzygy tables found in {}", args.syzygy.display());
    }

    let file = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    let mut out = BufWriter::new(file);
    let progress = progress_bar(fixtures.cases.len());
    let stats = annotate(&fixtures.cases, &oracle, &mut out, &progress)?;

    println!(
        "Wrote {} positions to {} ({} without tablebase answer)",
        stats.written,
        args.output.display(),
        stats.unanswered
    );
    Ok(())
}
