use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use tbcheck::engine::{EngineConfig, Protocol, ReadLimits};
use tbcheck::harness::{self, HarnessConfig};
use tbcheck::oracle::{Oracle, SyzygyOracle};
use tbcheck::report::RunLog;

use super::{DialectArg, ModeArg, ProbeArg};

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Engine executable under test.
    #[arg(long, env = "TBCHECK_ENGINE")]
    engine: PathBuf,
    /// Fixture file with one position per line.
    #[arg(long)]
    fixtures: PathBuf,
    /// Syzygy tablebase directory, shared by the engine and the oracle.
    #[arg(long, env = "SYZYGY_PATH")]
    syzygy: PathBuf,
    /// What to compare.
    #[arg(long, value_enum, default_value_t = ModeArg::Bm)]
    mode: ModeArg,
    /// Probe command to send.
    #[arg(long, value_enum, default_value_t = ProbeArg::Full)]
    probe: ProbeArg,
    /// Fixture dialect.
    #[arg(long, value_enum, default_value_t = DialectArg::Auto)]
    dialect: DialectArg,
    /// Extra argument passed to the engine (repeatable).
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,
    /// Run log, truncated at start.
    #[arg(long, default_value = "tbcheck.log")]
    log: PathBuf,
    /// Also write the summary as JSON.
    #[arg(long)]
    summary_json: Option<PathBuf>,
    /// Per-probe deadline in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
    /// Deadline for each startup step in milliseconds.
    #[arg(long, default_value_t = 5000)]
    startup_timeout_ms: u64,
    /// Lines read per probe before giving up.
    #[arg(long, default_value_t = 100)]
    max_lines: usize,
    /// Line that ends the handshake.
    #[arg(long, default_value = "uciok")]
    ready_sentinel: String,
    /// Line that confirms the tablebase path was accepted.
    #[arg(long, default_value = "fathom initialized")]
    init_sentinel: String,
}

impl RunArgs {
    pub(crate) fn harness_config(&self) -> HarnessConfig {
        let protocol = Protocol {
            ready_sentinel: self.ready_sentinel.clone(),
            initialized_sentinel: self.init_sentinel.clone(),
            ..Protocol::default()
        };
        let limits = ReadLimits {
            deadline: Duration::from_millis(self.timeout_ms),
            startup_deadline: Duration::from_millis(self.startup_timeout_ms),
            max_lines: self.max_lines,
            ..ReadLimits::default()
        };
        HarnessConfig {
            engine: EngineConfig {
                program: self.engine.clone(),
                args: self.engine_args.clone(),
                syzygy_path: self.syzygy.clone(),
                protocol,
                limits,
            },
            fixtures: self.fixtures.clone(),
            dialect: self.dialect.into(),
            mode: self.mode.into(),
            probe: self.probe.into(),
        }
    }
}

pub(crate) fn run_check(args: RunArgs) -> Result<()> {
    let config = args.harness_config();
    let mut log = RunLog::create(&args.log)
        .with_context(|| format!("failed to create run log {}", args.log.display()))?;

    if let Err(err) = harness::preflight(&config) {
        log.line(format_args!("Error: {err}"));
        return Err(err.into());
    }

    let oracle = open_oracle(&config, &mut log);
    let summary = match harness::run(&config, oracle.as_ref().map(|o| o as &dyn Oracle), &mut log) {
        Ok(summary) => summary,
        Err(err) => {
            log.line(format_args!("Error: {err}"));
            return Err(err.into());
        }
    };

    if let Some(path) = &args.summary_json {
        summary
            .write_json(path)
            .with_context(|| format!("failed to write summary {}", path.display()))?;
    }
    log.finish()
        .with_context(|| format!("failed to write run log {}", args.log.display()))?;
    Ok(())
}

fn open_oracle(config: &HarnessConfig, log: &mut RunLog) -> Option<SyzygyOracle> {
    let dir = &config.engine.syzygy_path;
    match SyzygyOracle::open(dir) {
        Ok(oracle) if oracle.table_count() > 0 => {
            log.line(format_args!(
                "Tablebase oracle initialized with {} tables from {}",
                oracle.table_count(),
                dir.display()
            ));
            Some(oracle)
        }
        Ok(_) => {
            log.line(format_args!(
                "Warning: no tablebase files in {}; positions without annotations will be skipped",
                dir.display()
            ));
            None
        }
        Err(err) => {
            log.line(format_args!(
                "Warning: failed to open tablebases in {}: {err}",
                dir.display()
            ));
            None
        }
    }
}
