//! Position fixtures: one test case per line, in any of the EPD-like dialects
//! the probing suites have accumulated.
//!
//! ```text
//! 8/8/8/7k/8/8/8/K3Q3 w - - 0 1;bm Qe5+
//! 8/8/8/7k/8/8/8/K3Q3 w - - 0 1 bm Qe5+
//! 4k3/8/8/8/8/8/4K3/4Q3 w - - 0 1; TB_WDL 2; TB_DTZ 5; TB_RESULT "Win";
//! ```

use std::{borrow::Cow, fs, io, path::Path};

use shakmaty::{CastlingMode, Chess, EnPassantMode, Position, fen::Fen, san::SanPlus};
use thiserror::Error;
use winnow::ModalResult;
use winnow::ascii::{Caseless, space1};
use winnow::combinator::alt;
use winnow::prelude::*;
use winnow::token::rest;

use crate::wdl::WdlClass;

/// Which annotations a fixture line must carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// Accept bare FENs, best-move lines and tablebase lines alike.
    #[default]
    Auto,
    /// Every line needs a `bm` annotation.
    BestMove,
    /// Every line needs a `TB_WDL` annotation.
    Tablebase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedMove {
    san: String,
    uci: String,
}

impl ExpectedMove {
    /// The move as written in the fixture.
    pub fn san(&self) -> &str {
        &self.san
    }

    /// The move resolved against the position, in UCI notation.
    pub fn uci(&self) -> &str {
        &self.uci
    }
}

/// A single position to probe, together with whatever the fixture says the
/// answer should be.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    line: usize,
    fen: String,
    position: Chess,
    expected_move: Option<ExpectedMove>,
    expected_wdl: Option<WdlClass>,
    expected_dtz: Option<i32>,
    expected_result: Option<String>,
}

impl TestCase {
    pub fn line(&self) -> usize {
        self.line
    }

    /// Full six-field FEN, as sent to the engine.
    pub fn fen(&self) -> &str {
        &self.fen
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }

    pub fn piece_count(&self) -> usize {
        self.position.board().occupied().count()
    }

    pub fn expected_move(&self) -> Option<&ExpectedMove> {
        self.expected_move.as_ref()
    }

    pub fn expected_wdl(&self) -> Option<WdlClass> {
        self.expected_wdl
    }

    pub fn expected_dtz(&self) -> Option<i32> {
        self.expected_dtz
    }

    pub fn expected_result(&self) -> Option<&str> {
        self.expected_result.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixtureErrorKind {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),
    #[error("invalid SAN '{san}': {reason}")]
    InvalidMove { san: String, reason: String },
    #[error("invalid {label} annotation '{value}'")]
    InvalidAnnotation { label: &'static str, value: String },
    #[error("no 'bm' keyword")]
    MissingBestMove,
    #[error("empty best move")]
    EmptyBestMove,
    #[error("no TB_WDL annotation")]
    MissingWdl,
}

/// A fixture line that was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Line {line}: Skipped ({kind}): '{text}'")]
pub struct FixtureError {
    pub line: usize,
    pub kind: FixtureErrorKind,
    pub text: String,
}

/// All cases of a fixture file, plus the lines that were rejected.
#[derive(Debug, Default)]
pub struct FixtureSet {
    pub cases: Vec<TestCase>,
    pub rejected: Vec<FixtureError>,
}

/// Read a fixture file and sort its lines into cases and rejects.
pub fn load_fixtures<P: AsRef<Path>>(path: P, dialect: Dialect) -> io::Result<FixtureSet> {
    let text = fs::read_to_string(path)?;
    let mut set = FixtureSet::default();
    for item in parse_fixtures(&text, dialect) {
        match item {
            Ok(case) => set.cases.push(case),
            Err(err) => set.rejected.push(err),
        }
    }
    Ok(set)
}

/// Lazily parse fixture text.
///
/// Blank lines and `#` comments yield nothing; every other line yields either
/// a case or the reason it was dropped, in input order.
pub fn parse_fixtures(
    text: &str,
    dialect: Dialect,
) -> impl Iterator<Item = Result<TestCase, FixtureError>> + '_ {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    physical_lines(text)
        .enumerate()
        .filter_map(move |(idx, raw)| parse_line(idx + 1, raw, dialect))
}

/// Split on `\n`, `\r\n` and lone `\r`.
fn physical_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').flat_map(|line| {
        let line = line.strip_suffix('\r').unwrap_or(line);
        line.split('\r')
    })
}

fn parse_line(line: usize, raw: &str, dialect: Dialect) -> Option<Result<TestCase, FixtureError>> {
    let text = raw.trim();
    if text.is_empty() || text.starts_with('#') {
        return None;
    }
    Some(parse_record(line, text, dialect).map_err(|kind| FixtureError {
        line,
        kind,
        text: text.to_string(),
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    BestMove,
    Wdl,
    Dtz,
    Result,
}

fn labeled_field<'a>(input: &mut &'a str) -> ModalResult<(Label, &'a str)> {
    (
        alt((
            "TB_WDL".value(Label::Wdl),
            "TB_DTZ".value(Label::Dtz),
            "TB_RESULT".value(Label::Result),
            Caseless("bm").value(Label::BestMove),
        )),
        space1,
        rest,
    )
        .map(|(label, _, value): (Label, &str, &str)| (label, value.trim()))
        .parse_next(input)
}

fn parse_record(line: usize, text: &str, dialect: Dialect) -> Result<TestCase, FixtureErrorKind> {
    let mut fields = text.split(';').map(str::trim).filter(|f| !f.is_empty());
    let first = fields.next().unwrap_or_default();

    // `FEN bm Qe4+` without a separator.
    let (fen_text, mut best_move) = match first.split_once(" bm ") {
        Some((fen, mv)) => (fen.trim(), Some(mv.trim())),
        None if first.ends_with(" bm") => return Err(FixtureErrorKind::EmptyBestMove),
        None => (first, None),
    };

    let mut expected_wdl = None;
    let mut expected_dtz = None;
    let mut expected_result = None;
    for field in fields {
        if field.eq_ignore_ascii_case("bm") {
            return Err(FixtureErrorKind::EmptyBestMove);
        }
        let mut input = field;
        let Ok((label, value)) = labeled_field.parse_next(&mut input) else {
            continue;
        };
        match label {
            Label::BestMove => {
                best_move.get_or_insert(value);
            }
            Label::Wdl => {
                let class = value
                    .parse::<i8>()
                    .ok()
                    .and_then(|v| WdlClass::try_from(v).ok())
                    .ok_or_else(|| FixtureErrorKind::InvalidAnnotation {
                        label: "TB_WDL",
                        value: value.to_string(),
                    })?;
                expected_wdl = Some(class);
            }
            Label::Dtz => {
                let dtz = value
                    .parse::<i32>()
                    .map_err(|_| FixtureErrorKind::InvalidAnnotation {
                        label: "TB_DTZ",
                        value: value.to_string(),
                    })?;
                expected_dtz = Some(dtz);
            }
            Label::Result => {
                expected_result = Some(value.trim_matches('"').to_string());
            }
        }
    }

    // EPD positions carry no move counters.
    let fen_text = match fen_text.split_whitespace().count() {
        4 => Cow::Owned(format!("{fen_text} 0 1")),
        _ => Cow::Borrowed(fen_text),
    };
    let fen = fen_text
        .parse::<Fen>()
        .map_err(|err| FixtureErrorKind::InvalidFen(err.to_string()))?;
    let position: Chess = fen
        .into_position(CastlingMode::Standard)
        .map_err(|err| FixtureErrorKind::InvalidFen(err.to_string()))?;

    let expected_move = best_move
        .map(|san| resolve_move(&position, san))
        .transpose()?;

    match dialect {
        Dialect::BestMove if expected_move.is_none() => {
            return Err(FixtureErrorKind::MissingBestMove);
        }
        Dialect::Tablebase if expected_wdl.is_none() => {
            return Err(FixtureErrorKind::MissingWdl);
        }
        _ => (),
    }

    Ok(TestCase {
        line,
        fen: Fen::from_position(&position, EnPassantMode::Legal).to_string(),
        position,
        expected_move,
        expected_wdl,
        expected_dtz,
        expected_result,
    })
}

fn resolve_move(position: &Chess, text: &str) -> Result<ExpectedMove, FixtureErrorKind> {
    let invalid = |reason: String| FixtureErrorKind::InvalidMove {
        san: text.to_string(),
        reason,
    };
    let san = text
        .trim_end_matches(['!', '?'])
        .parse::<SanPlus>()
        .map_err(|err| invalid(err.to_string()))?;
    let m = san
        .san
        .to_move(position)
        .map_err(|err| invalid(err.to_string()))?;
    Ok(ExpectedMove {
        san: text.to_string(),
        uci: m.to_uci(CastlingMode::Standard).to_string(),
    })
}
