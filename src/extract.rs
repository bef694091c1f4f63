//! Turns the raw output of one probe into a [`CanonicalResult`].
//!
//! The engine has printed the same information in several formats over its
//! lifetime, sometimes more than one in the same probe. Each format is an
//! independent matcher from a line to a [`Finding`]; findings are merged by
//! [`Source`] rank, so the outcome does not depend on which format shows up
//! first.

use std::fmt;

use winnow::ModalResult;
use winnow::ascii::{dec_int, dec_uint, space0, space1};
use winnow::combinator::{alt, preceded};
use winnow::prelude::*;
use winnow::token::take_till;

use crate::wdl::WdlClass;

const PROBE_RESULT_LABEL: &str = "WDL Probe Result:";
const BEST_MOVE_LABEL: &str = "Best Move:";

/// Where a value came from. Earlier variants take precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Source {
    /// Stalemate report; overrides every other distance.
    Forced,
    /// Numeric probe code.
    Code,
    /// Labeled token, e.g. `WDL Probe Result: Win` or `DTZ=5`.
    Label,
    /// Free text inside a best-move annotation.
    Annotation,
    /// Weak hint, used only when nothing else is known.
    Inferred,
}

/// What a single line says, if anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Finding {
    pub best_move: Option<String>,
    pub wdl: Option<(WdlClass, Source)>,
    pub dtz: Option<(i32, Source)>,
}

pub type Matcher = fn(&str) -> Finding;

/// All matchers, highest precedence first.
pub const MATCHERS: [Matcher; 6] = [
    probe_code,
    probe_label,
    annotation_labels,
    annotation_text,
    stalemate,
    best_move_report,
];

/// `info string WDL Probe Result: Win (Code: 4)`
pub fn probe_code(line: &str) -> Finding {
    let Some(tail) = after(line, PROBE_RESULT_LABEL) else {
        return Finding::default();
    };
    let wdl = scan(tail, code)
        .and_then(WdlClass::from_engine_code)
        .map(|class| (class, Source::Code));
    Finding {
        wdl,
        ..Finding::default()
    }
}

fn code(input: &mut &str) -> ModalResult<u32> {
    preceded(("Code:", space0), dec_uint).parse_next(input)
}

/// `info string WDL Probe Result: Draw: Win (cursed)` without a code.
///
/// A line that carries a code, even one outside the code table, is left to
/// [`probe_code`].
pub fn probe_label(line: &str) -> Finding {
    let Some(tail) = after(line, PROBE_RESULT_LABEL) else {
        return Finding::default();
    };
    if scan(tail, code).is_some() {
        return Finding::default();
    }
    let text = tail.split("(Code").next().unwrap_or_default();
    Finding {
        wdl: WdlClass::from_label(text).map(|class| (class, Source::Label)),
        ..Finding::default()
    }
}

/// `WDL=<label>` and `DTZ=<n>` (or `:`) inside a best-move annotation.
pub fn annotation_labels(line: &str) -> Finding {
    fn dtz(input: &mut &str) -> ModalResult<i32> {
        preceded(("DTZ", alt(('=', ':')), space0), dec_int).parse_next(input)
    }

    fn wdl<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
        preceded(("WDL", alt(('=', ':')), space0), take_till(1.., [',', ')'])).parse_next(input)
    }

    let Some(content) = best_move_annotation(line) else {
        return Finding::default();
    };
    Finding {
        wdl: scan(content, wdl)
            .and_then(WdlClass::from_label)
            .map(|class| (class, Source::Label)),
        dtz: scan(content, dtz).map(|n| (n, Source::Label)),
        ..Finding::default()
    }
}

/// `Win in 12 moves (DTZ)` style phrases.
///
/// The distance phrase is accepted on any line, since older builds printed it
/// on a line of its own. The class is only inferred inside a best-move
/// annotation.
pub fn annotation_text(line: &str) -> Finding {
    fn distance(input: &mut &str) -> ModalResult<i32> {
        (
            alt(("Win".value(1), "Loss".value(-1))),
            (space1, "in", space1),
            dec_uint::<_, u32, _>,
            (space1, "moves", space1, "(DTZ)"),
        )
            .map(|(sign, _, n, _)| sign * n as i32)
            .parse_next(input)
    }

    let dtz = scan(line, distance).map(|n| (n, Source::Annotation));
    let wdl = best_move_annotation(line)
        .and_then(class_phrase)
        .map(|class| (class, Source::Annotation));
    Finding {
        wdl,
        dtz,
        ..Finding::default()
    }
}

fn class_phrase(content: &str) -> Option<WdlClass> {
    if content.contains("Draw: Loss (blessed)") {
        return Some(WdlClass::BlessedLoss);
    }
    if content.contains("Draw: Win (cursed)") {
        return Some(WdlClass::CursedWin);
    }
    if !content.contains("DTZ") || content.contains("Draw:") {
        return None;
    }
    if content.contains("Loss") {
        Some(WdlClass::Loss)
    } else if content.contains("Win") {
        Some(WdlClass::Win)
    } else if content.contains("Draw") {
        Some(WdlClass::Draw)
    } else {
        None
    }
}

/// `info string Best Move: Stalemate`
pub fn stalemate(line: &str) -> Finding {
    if line.contains("Best Move: Stalemate") {
        Finding {
            wdl: Some((WdlClass::Draw, Source::Inferred)),
            dtz: Some((0, Source::Forced)),
            ..Finding::default()
        }
    } else if line.contains("Draw") && line.contains("Stalemate") {
        Finding {
            wdl: Some((WdlClass::Draw, Source::Inferred)),
            ..Finding::default()
        }
    } else {
        Finding::default()
    }
}

/// `bestmove e2e4`
pub fn best_move_report(line: &str) -> Finding {
    fn best_move<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
        preceded(("bestmove", space1), take_till(1.., char::is_whitespace)).parse_next(input)
    }

    let mut input = line.trim_start();
    Finding {
        best_move: best_move.parse_next(&mut input).ok().map(str::to_string),
        ..Finding::default()
    }
}

/// The text after `label`, if the line contains it.
fn after<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    line.find(label).map(|idx| &line[idx + label.len()..])
}

/// The text between the first `(` and the last `)` of a best-move line.
fn best_move_annotation(line: &str) -> Option<&str> {
    let tail = after(line, BEST_MOVE_LABEL)?;
    let open = tail.find('(')?;
    let close = tail.rfind(')')?;
    (close > open).then(|| &tail[open + 1..close])
}

/// Run `parser` at every position of `haystack` and return the first match.
fn scan<'a, O>(
    haystack: &'a str,
    mut parser: impl FnMut(&mut &'a str) -> ModalResult<O>,
) -> Option<O> {
    haystack.char_indices().find_map(|(idx, _)| {
        let mut input = &haystack[idx..];
        parser(&mut input).ok()
    })
}

/// Which fields a probe is expected to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Wants {
    pub best_move: bool,
    pub wdl: bool,
    pub dtz: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Resolved,
    /// The engine declined the position (too many pieces).
    Skipped,
    Crashed,
    TimedOut,
    Unparsed,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProbeStatus::Resolved => "resolved",
            ProbeStatus::Skipped => "declined by engine",
            ProbeStatus::Crashed => "engine crashed",
            ProbeStatus::TimedOut => "timed out",
            ProbeStatus::Unparsed => "unrecognized engine output",
        };
        f.write_str(text)
    }
}

/// The normalized outcome of one probe.
///
/// Only [`ProbeStatus::Resolved`] results carry meaningful values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalResult {
    pub status: ProbeStatus,
    pub best_move: Option<String>,
    pub wdl: Option<WdlClass>,
    pub dtz: Option<i32>,
    /// The line that ended the probe early, for crashes and skips.
    pub detail: Option<String>,
}

impl CanonicalResult {
    pub fn unresolved(status: ProbeStatus, detail: Option<String>) -> Self {
        Self {
            status,
            best_move: None,
            wdl: None,
            dtz: None,
            detail,
        }
    }
}

/// Accumulates findings for one probe until the wanted fields are known.
#[derive(Debug)]
pub struct Extractor {
    wants: Wants,
    best_move: Option<String>,
    wdl: Option<(WdlClass, Source)>,
    dtz: Option<(i32, Source)>,
    lines: usize,
    recognized: bool,
    done: bool,
}

impl Extractor {
    pub fn new(wants: Wants) -> Self {
        Self {
            wants,
            best_move: None,
            wdl: None,
            dtz: None,
            lines: 0,
            recognized: false,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one output line. Returns `true` once the probe is resolved.
    pub fn feed(&mut self, line: &str) -> bool {
        self.lines += 1;
        let mut fresh = false;
        for matcher in MATCHERS {
            fresh |= self.merge(matcher(line));
        }
        self.recognized |= fresh;

        if self.satisfied() {
            self.done = true;
        } else if self.best_move.is_some() && !fresh {
            // One quiet cycle after `bestmove` drains trailing output.
            self.done = true;
        }
        self.done
    }

    /// A read cycle passed without output.
    pub fn idle(&mut self) -> bool {
        if self.best_move.is_some() {
            self.done = true;
        }
        self.done
    }

    /// Close the probe. Partial findings only count once the extractor is
    /// done; a read bound reached before that is a timeout.
    pub fn finish(self) -> CanonicalResult {
        let status = if self.done {
            ProbeStatus::Resolved
        } else if self.lines > 0 && !self.recognized {
            ProbeStatus::Unparsed
        } else {
            ProbeStatus::TimedOut
        };
        if status != ProbeStatus::Resolved {
            return CanonicalResult::unresolved(status, None);
        }
        CanonicalResult {
            status,
            best_move: self.best_move,
            wdl: self.wdl.map(|(class, _)| class),
            dtz: self.dtz.map(|(n, _)| n),
            detail: None,
        }
    }

    fn satisfied(&self) -> bool {
        (!self.wants.best_move || self.best_move.is_some())
            && (!self.wants.wdl || self.wdl.is_some())
            && (!self.wants.dtz || self.dtz.is_some())
    }

    fn merge(&mut self, finding: Finding) -> bool {
        let mut changed = false;
        if self.best_move.is_none() && finding.best_move.is_some() {
            self.best_move = finding.best_move;
            changed = true;
        }
        changed |= merge_ranked(&mut self.wdl, finding.wdl);
        changed |= merge_ranked(&mut self.dtz, finding.dtz);
        changed
    }
}

/// Replace `slot` only with a strictly higher-precedence value.
fn merge_ranked<T: PartialEq>(slot: &mut Option<(T, Source)>, new: Option<(T, Source)>) -> bool {
    let Some((value, source)) = new else {
        return false;
    };
    match slot {
        Some((_, have)) if *have <= source => false,
        _ => {
            *slot = Some((value, source));
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_debug_snapshot;

    const FULL: Wants = Wants {
        best_move: false,
        wdl: true,
        dtz: true,
    };

    fn extract(wants: Wants, lines: &[&str]) -> CanonicalResult {
        let mut extractor = Extractor::new(wants);
        for line in lines {
            extractor.feed(line);
        }
        extractor.finish()
    }

    #[test]
    fn reads_probe_code() {
        assert_debug_snapshot!(probe_code("info string WDL Probe Result: Win (Code: 4)"), @r"
        Finding {
            best_move: None,
            wdl: Some(
                (
                    Win,
                    Code,
                ),
            ),
            dtz: None,
        }
        ");
    }

    #[test]
    fn label_is_ignored_when_code_present() {
        let line = "info string WDL Probe Result: Loss (Code: 4)";
        assert_eq!(probe_label(line), Finding::default());
        assert_eq!(
            probe_label("info string WDL Probe Result: Draw: Loss (blessed)").wdl,
            Some((WdlClass::BlessedLoss, Source::Label))
        );
    }

    #[test]
    fn unknown_code_classifies_nothing() {
        let line = "info string WDL Probe Result: Win (Code: 7)";
        for matcher in MATCHERS {
            assert_eq!(matcher(line).wdl, None);
        }
    }

    #[test]
    fn code_and_label_agree_for_every_class() {
        for class in WdlClass::ALL {
            let line = format!(
                "info string WDL Probe Result: {} (Code: {})",
                class.engine_label(),
                class.engine_code()
            );
            let from_code = probe_code(&line).wdl.map(|(c, _)| c);
            let label_only = line.split(" (Code:").next().unwrap();
            let from_label = probe_label(label_only).wdl.map(|(c, _)| c);
            assert_eq!(from_code, Some(class));
            assert_eq!(from_label, from_code, "{line}");
        }
    }

    #[test]
    fn reads_labeled_annotation() {
        let finding = annotation_labels("info string Best Move: e1e5 (WDL=Win, DTZ=-7)");
        assert_eq!(finding.wdl, Some((WdlClass::Win, Source::Label)));
        assert_eq!(finding.dtz, Some((-7, Source::Label)));
    }

    #[test]
    fn reads_distance_phrases() {
        let win = annotation_text("info string Best Move: e1e5 (Win in 118 moves (DTZ))");
        assert_eq!(win.dtz, Some((118, Source::Annotation)));
        assert_eq!(win.wdl, Some((WdlClass::Win, Source::Annotation)));

        let loss = annotation_text("info string Best Move: h5g4 (Loss in 3 moves (DTZ))");
        assert_eq!(loss.dtz, Some((-3, Source::Annotation)));
        assert_eq!(loss.wdl, Some((WdlClass::Loss, Source::Annotation)));

        let legacy = annotation_text("info string Loss in 9 moves (DTZ)");
        assert_eq!(legacy.dtz, Some((-9, Source::Annotation)));
        assert_eq!(legacy.wdl, None);
    }

    #[test]
    fn cursed_phrase_is_not_collapsed() {
        let finding = annotation_text("info string Best Move: a1b1 (Draw: Win (cursed), 120 (DTZ))");
        assert_eq!(finding.wdl, Some((WdlClass::CursedWin, Source::Annotation)));
    }

    #[test]
    fn reads_best_move_report() {
        assert_eq!(
            best_move_report("bestmove e2e4 ponder e7e5").best_move.as_deref(),
            Some("e2e4")
        );
        assert_eq!(best_move_report("info string bestmove soon").best_move, None);
    }

    #[test]
    fn unrelated_lines_find_nothing() {
        for line in ["id name Lambergar", "readyok", "info depth 3 score cp 20", ""] {
            for matcher in MATCHERS {
                assert_eq!(matcher(line), Finding::default(), "{line}");
            }
        }
    }

    #[test]
    fn code_overrides_earlier_text() {
        let result = extract(
            Wants {
                wdl: true,
                dtz: true,
                ..Wants::default()
            },
            &[
                "info string Best Move: e1e5 (Win in 5 moves (DTZ))",
                "info string WDL Probe Result: Draw (Code: 3)",
            ],
        );
        assert_eq!(result.status, ProbeStatus::Resolved);
        assert_eq!(result.wdl, Some(WdlClass::CursedWin));
        assert_eq!(result.dtz, Some(5));
    }

    #[test]
    fn later_text_does_not_override_code() {
        let result = extract(
            FULL,
            &[
                "info string WDL Probe Result: Win (Code: 4)",
                "info string Best Move: e1e5 (Draw: Loss (blessed), DTZ=12)",
            ],
        );
        assert_eq!(result.wdl, Some(WdlClass::Win));
        assert_eq!(result.dtz, Some(12));
    }

    #[test]
    fn stalemate_forces_zero_distance() {
        let result = extract(
            FULL,
            &[
                "info string Best Move: Stalemate",
                "info string Draw by Stalemate",
            ],
        );
        assert_eq!(result.wdl, Some(WdlClass::Draw));
        assert_eq!(result.dtz, Some(0));
    }

    #[test]
    fn stops_once_wanted_fields_are_known() {
        let mut extractor = Extractor::new(Wants {
            wdl: true,
            ..Wants::default()
        });
        assert!(!extractor.feed("info string probing"));
        assert!(extractor.feed("info string WDL Probe Result: Win (Code: 4)"));
    }

    #[test]
    fn drains_one_cycle_after_bestmove() {
        let mut extractor = Extractor::new(FULL);
        assert!(!extractor.feed("info string WDL Probe Result: Win (Code: 4)"));
        assert!(!extractor.feed("bestmove e1e5"));
        assert!(extractor.idle());
        let result = extractor.finish();
        assert_eq!(result.best_move.as_deref(), Some("e1e5"));
        assert_eq!(result.dtz, None);
        assert_eq!(result.status, ProbeStatus::Resolved);
    }

    #[test]
    fn noise_after_bestmove_ends_probe() {
        let mut extractor = Extractor::new(FULL);
        assert!(!extractor.feed("bestmove e1e5"));
        assert!(extractor.feed("info string done"));
    }

    #[test]
    fn unparsed_and_timed_out_are_distinguished() {
        assert_eq!(extract(FULL, &["garbage"]).status, ProbeStatus::Unparsed);
        assert_eq!(extract(FULL, &[]).status, ProbeStatus::TimedOut);
    }

    #[test]
    fn partial_answer_at_the_bound_times_out() {
        let result = extract(FULL, &["info string WDL Probe Result: Win (Code: 4)"]);
        assert_eq!(result, CanonicalResult::unresolved(ProbeStatus::TimedOut, None));
    }
}
