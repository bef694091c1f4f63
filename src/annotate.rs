use std::io::{self, Write};

use indicatif::{ProgressBar, ProgressStyle};

use crate::fixture::TestCase;
use crate::oracle::{Expectation, Oracle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotateStats {
    pub written: usize,
    pub unanswered: usize,
}

pub fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {wide_bar} {pos}/{len} {msg}")
    {
        bar.set_style(style);
    }
    bar
}

/// Write each case in the tablebase-annotated dialect, with the oracle's
/// class and distance.
pub fn annotate<W: Write>(
    cases: &[TestCase],
    oracle: &dyn Oracle,
    out: &mut W,
    progress: &ProgressBar,
) -> io::Result<AnnotateStats> {
    let mut stats = AnnotateStats::default();
    for case in cases {
        match oracle.probe(case.position(), true) {
            Ok(expectation) => {
                writeln!(out, "{}", annotation_line(case, &expectation))?;
                stats.written += 1;
            }
            Err(err) => {
                progress.println(format!("Line {}: oracle cannot answer: {err}", case.line()));
                stats.unanswered += 1;
            }
        }
        progress.inc(1);
    }
    out.flush()?;
    progress.finish_with_message(format!("{} annotated", stats.written));
    Ok(stats)
}

pub fn annotation_line(case: &TestCase, expectation: &Expectation) -> String {
    let mut line = format!("{}; TB_WDL {};", case.fen(), i8::from(expectation.wdl));
    if let Some(dtz) = expectation.dtz {
        line.push_str(&format!(" TB_DTZ {};", dtz.value));
    }
    line.push_str(&format!(" TB_RESULT \"{}\";", expectation.wdl.result_word()));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{Dialect, parse_fixtures};
    use crate::oracle::{DtzExpectation, OracleError};
    use crate::wdl::WdlClass;
    use insta::assert_snapshot;
    use shakmaty::{Chess, Position};

    /// Answers only positions with white to move.
    struct WhiteOnly;

    impl Oracle for WhiteOnly {
        fn probe(&self, pos: &Chess, _want_dtz: bool) -> Result<Expectation, OracleError> {
            if pos.turn().is_white() {
                Ok(Expectation {
                    wdl: WdlClass::CursedWin,
                    dtz: Some(DtzExpectation::precise(107)),
                })
            } else {
                Err(OracleError::Unavailable)
            }
        }
    }

    #[test]
    fn annotated_output_parses_back() {
        let cases: Vec<_> = parse_fixtures(
            "4k3/8/8/8/8/8/4K3/4Q3 w - - 0 1\n\
             4k3/8/8/8/8/8/4K3/4Q3 b - - 0 1\n\
             8/8/8/7k/8/8/8/K3Q3 w - -;bm Qe5+",
            Dialect::Auto,
        )
        .map(Result::unwrap)
        .collect();

        let mut out = Vec::new();
        let stats = annotate(&cases, &WhiteOnly, &mut out, &ProgressBar::hidden()).unwrap();
        assert_eq!(
            stats,
            AnnotateStats {
                written: 2,
                unanswered: 1
            }
        );

        let text = String::from_utf8(out).unwrap();
        assert_snapshot!(text.trim(), @r#"
        4k3/8/8/8/8/8/4K3/4Q3 w - - 0 1; TB_WDL 1; TB_DTZ 107; TB_RESULT "Win";
        8/8/8/7k/8/8/8/K3Q3 w - - 0 1; TB_WDL 1; TB_DTZ 107; TB_RESULT "Win";
        "#);

        let reparsed: Vec<_> = parse_fixtures(&text, Dialect::Tablebase)
            .map(Result::unwrap)
            .collect();
        assert_eq!(reparsed.len(), 2);
        assert!(reparsed.iter().all(|case| {
            case.expected_wdl() == Some(WdlClass::CursedWin) && case.expected_dtz() == Some(107)
        }));
    }
}
