use std::fmt;

use shakmaty::uci::UciMove;

use crate::extract::{CanonicalResult, ProbeStatus, Wants};
use crate::fixture::{ExpectedMove, TestCase};
use crate::oracle::{DtzExpectation, Expectation, Oracle};
use crate::wdl::WdlClass;

/// What a run compares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    BestMove,
    Wdl,
    WdlDtz,
}

impl Mode {
    pub fn wants(self) -> Wants {
        match self {
            Mode::BestMove => Wants {
                best_move: true,
                ..Wants::default()
            },
            Mode::Wdl => Wants {
                wdl: true,
                ..Wants::default()
            },
            Mode::WdlDtz => Wants {
                wdl: true,
                dtz: true,
                ..Wants::default()
            },
        }
    }
}

/// The answer a case is judged against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    Move(ExpectedMove),
    Outcome(Expectation),
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Move(mv) => write!(f, "bestmove {} ({})", mv.uci(), mv.san()),
            Expected::Outcome(outcome) => {
                write!(f, "WDL {}", outcome.wdl)?;
                match outcome.dtz {
                    Some(dtz) if dtz.rounded => write!(f, ", DTZ {} (rounded)", dtz.value),
                    Some(dtz) => write!(f, ", DTZ {}", dtz.value),
                    None => Ok(()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    Probe(ProbeStatus),
    EngineUnavailable,
    MissingMove,
    IllegalMove,
    WrongMove,
    MissingWdl,
    WdlMismatch,
    DtzMismatch,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::Probe(status) => fmt::Display::fmt(status, f),
            FailReason::EngineUnavailable => f.write_str("engine unavailable"),
            FailReason::MissingMove => f.write_str("no best move reported"),
            FailReason::IllegalMove => f.write_str("move mismatch (reported move is illegal)"),
            FailReason::WrongMove => f.write_str("move mismatch"),
            FailReason::MissingWdl => f.write_str("no WDL reported"),
            FailReason::WdlMismatch => f.write_str("WDL mismatch"),
            FailReason::DtzMismatch => f.write_str("DTZ mismatch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub reason: FailReason,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(Failure),
    Skip(String),
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Fail(failure) => write!(
                f,
                "FAIL: {} (expected {}, got {})",
                failure.reason, failure.expected, failure.actual
            ),
            Verdict::Skip(reason) => write!(f, "SKIP: {reason}"),
        }
    }
}

/// Work out what the engine should answer for `case`.
///
/// Annotations in the fixture win over the oracle. `Err` carries the reason
/// the case has to be skipped.
pub fn expectation(
    case: &TestCase,
    mode: Mode,
    oracle: Option<&dyn Oracle>,
) -> Result<Expected, String> {
    if mode == Mode::BestMove {
        return case
            .expected_move()
            .cloned()
            .map(Expected::Move)
            .ok_or_else(|| "no best move annotation".to_string());
    }

    let want_dtz = mode == Mode::WdlDtz;
    if let Some(wdl) = case.expected_wdl() {
        return Ok(Expected::Outcome(Expectation {
            wdl,
            dtz: case
                .expected_dtz()
                .filter(|_| want_dtz)
                .map(DtzExpectation::precise),
        }));
    }

    let oracle = oracle.ok_or_else(|| "no annotation and no tablebase oracle".to_string())?;
    oracle
        .probe(case.position(), want_dtz)
        .map(Expected::Outcome)
        .map_err(|err| format!("oracle cannot answer: {err}"))
}

/// Judge one probe result.
pub fn judge(case: &TestCase, expected: &Expected, actual: &CanonicalResult) -> Verdict {
    let fail = |reason| {
        Verdict::Fail(Failure {
            reason,
            expected: expected.to_string(),
            actual: describe(expected, actual),
        })
    };

    match actual.status {
        ProbeStatus::Resolved => {}
        ProbeStatus::Skipped => {
            return Verdict::Skip(format!(
                "engine declined position with {} pieces",
                case.piece_count()
            ));
        }
        status => return fail(FailReason::Probe(status)),
    }

    match expected {
        Expected::Move(mv) => match actual.best_move.as_deref() {
            None => fail(FailReason::MissingMove),
            Some(reported) if reported == mv.uci() => Verdict::Pass,
            Some(reported) if is_legal(case, reported) => fail(FailReason::WrongMove),
            Some(_) => fail(FailReason::IllegalMove),
        },
        Expected::Outcome(outcome) => {
            let Some(wdl) = actual.wdl else {
                return fail(FailReason::MissingWdl);
            };
            if wdl != outcome.wdl {
                return fail(FailReason::WdlMismatch);
            }
            match (outcome.dtz, actual.dtz) {
                (Some(dtz), Some(reported))
                    if outcome.wdl != WdlClass::Draw && !dtz.accepts(reported) =>
                {
                    fail(FailReason::DtzMismatch)
                }
                _ => Verdict::Pass,
            }
        }
    }
}

/// Verdict for a case that could not be probed because the engine is gone.
pub fn unavailable(expected: &Expected) -> Verdict {
    Verdict::Fail(Failure {
        reason: FailReason::EngineUnavailable,
        expected: expected.to_string(),
        actual: "not probed".into(),
    })
}

fn is_legal(case: &TestCase, uci: &str) -> bool {
    uci.parse::<UciMove>()
        .is_ok_and(|mv| mv.to_move(case.position()).is_ok())
}

fn describe(expected: &Expected, actual: &CanonicalResult) -> String {
    if actual.status != ProbeStatus::Resolved {
        return match &actual.detail {
            Some(detail) => format!("{} ({detail})", actual.status),
            None => actual.status.to_string(),
        };
    }
    match expected {
        Expected::Move(_) => match &actual.best_move {
            Some(mv) => format!("bestmove {mv}"),
            None => "no best move".into(),
        },
        Expected::Outcome(_) => {
            let wdl = actual
                .wdl
                .map_or_else(|| "none".to_string(), |wdl| wdl.to_string());
            match actual.dtz {
                Some(dtz) => format!("WDL {wdl}, DTZ {dtz}"),
                None => format!("WDL {wdl}"),
            }
        }
    }
}
