mod annotate;
mod check;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use tbcheck::engine::ProbeKind;
use tbcheck::fixture::Dialect;
use tbcheck::verdict::Mode;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every position of a fixture file and compare the engine's answers.
    Run(check::RunArgs),
    /// Write a fixture file annotated with tablebase WDL and DTZ values.
    Annotate(annotate::AnnotateArgs),
}

/// Parse CLI arguments and execute the requested command.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => check::run_check(args)?,
        Commands::Annotate(args) => annotate::run_annotate(args)?,
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Compare the best move.
    Bm,
    /// Compare the WDL class.
    Wdl,
    /// Compare the WDL class and the DTZ distance.
    WdlDtz,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Bm => Mode::BestMove,
            ModeArg::Wdl => Mode::Wdl,
            ModeArg::WdlDtz => Mode::WdlDtz,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProbeArg {
    /// `probebest`: best move with class and distance.
    Full,
    /// `probe`: class only.
    WdlOnly,
}

impl From<ProbeArg> for ProbeKind {
    fn from(value: ProbeArg) -> Self {
        match value {
            ProbeArg::Full => ProbeKind::Full,
            ProbeArg::WdlOnly => ProbeKind::WdlOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DialectArg {
    /// Accept any dialect, line by line.
    Auto,
    /// Require a `bm` annotation.
    Bm,
    /// Require a `TB_WDL` annotation.
    Tb,
}

impl From<DialectArg> for Dialect {
    fn from(value: DialectArg) -> Self {
        match value {
            DialectArg::Auto => Dialect::Auto,
            DialectArg::Bm => Dialect::BestMove,
            DialectArg::Tb => Dialect::Tablebase,
        }
    }
}
