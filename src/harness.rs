//! Runs a fixture file against the engine and tallies the verdicts.

use std::io;
use std::path::PathBuf;

use itertools::Itertools;
use thiserror::Error;
use tracing::info;

use crate::engine::{Engine, EngineConfig, EngineError, ProbeKind};
use crate::extract::ProbeStatus;
use crate::fixture::{Dialect, load_fixtures};
use crate::oracle::Oracle;
use crate::report::{RunLog, RunSummary};
use crate::verdict::{self, Mode, Verdict};

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub engine: EngineConfig,
    pub fixtures: PathBuf,
    pub dialect: Dialect,
    pub mode: Mode,
    pub probe: ProbeKind,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("engine executable not found at {}", .0.display())]
    MissingEngine(PathBuf),
    #[error("fixture file not found at {}", .0.display())]
    MissingFixtures(PathBuf),
    #[error("tablebase path {} does not exist", .0.display())]
    MissingTablebase(PathBuf),
    #[error("failed to read fixtures from {}", path.display())]
    ReadFixtures {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no valid positions loaded from {}; check the file format", .0.display())]
    NoCases(PathBuf),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Fail fast on inputs that make the run pointless.
pub fn preflight(config: &HarnessConfig) -> Result<(), HarnessError> {
    let program = &config.engine.program;
    if !program.exists() {
        return Err(HarnessError::MissingEngine(program.clone()));
    }
    if !config.fixtures.is_file() {
        return Err(HarnessError::MissingFixtures(config.fixtures.clone()));
    }
    let syzygy = &config.engine.syzygy_path;
    if !syzygy.is_dir() {
        return Err(HarnessError::MissingTablebase(syzygy.clone()));
    }
    Ok(())
}

/// Probe every case of the fixture file once and report the results.
///
/// Callers check the inputs with [`preflight`] first. Protocol failures are
/// per-case verdicts. Only problems that prevent the run from starting are
/// returned as errors.
pub fn run(
    config: &HarnessConfig,
    oracle: Option<&dyn Oracle>,
    log: &mut RunLog,
) -> Result<RunSummary, HarnessError> {
    let fixtures = load_fixtures(&config.fixtures, config.dialect).map_err(|source| {
        HarnessError::ReadFixtures {
            path: config.fixtures.clone(),
            source,
        }
    })?;
    for rejected in &fixtures.rejected {
        log.line(rejected);
    }
    if fixtures.cases.is_empty() {
        return Err(HarnessError::NoCases(config.fixtures.clone()));
    }
    log.line(format_args!(
        "Loaded {} positions from {}",
        fixtures.cases.len(),
        config.fixtures.display()
    ));

    let engine_config = &config.engine;
    log.line(format_args!(
        "Starting engine: {} {}",
        engine_config.program.display(),
        engine_config.args.iter().join(" ")
    ));
    log.line(format_args!(
        "Setting Syzygy path: {}",
        engine_config.syzygy_path.display()
    ));
    let mut engine = Engine::start(engine_config)?;
    log.line("Engine initialized. Starting tests...");

    let wants = config.mode.wants();
    let mut summary = RunSummary::new(fixtures.cases.len());
    for (idx, case) in fixtures.cases.iter().enumerate() {
        log.blank();
        log.line(format_args!(
            "--- Test {}: {} (line {}) ---",
            idx + 1,
            case.fen(),
            case.line()
        ));

        let verdict = match verdict::expectation(case, config.mode, oracle) {
            Err(reason) => Verdict::Skip(reason),
            Ok(expected) => {
                log.line(format_args!("Expected: {expected}"));
                if let Some(result) = case.expected_result() {
                    log.line(format_args!("Annotated result: {result}"));
                }
                match engine.probe(case.fen(), config.probe, wants, log) {
                    Ok(result) => {
                        if result.status == ProbeStatus::Crashed {
                            log.line("Engine crashed; remaining positions will not be probed.");
                        }
                        verdict::judge(case, &expected, &result)
                    }
                    Err(_) => verdict::unavailable(&expected),
                }
            }
        };
        log.line(&verdict);
        summary.record(case, &verdict);
    }

    engine.shutdown();
    debug_assert!(summary.is_complete());
    info!(
        passed = summary.passed,
        failed = summary.failed,
        skipped = summary.skipped,
        "run finished"
    );
    summary.write_report(log);
    Ok(summary)
}
