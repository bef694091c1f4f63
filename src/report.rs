//! Run log and end-of-run summary.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use serde_json::json;

use crate::fixture::TestCase;
use crate::verdict::Verdict;

/// Writes every report line to all of its sinks, flushing after each one.
///
/// Write errors do not interrupt the run. The first one is kept and returned
/// by [`RunLog::finish`].
pub struct RunLog {
    sinks: Vec<Box<dyn Write + Send>>,
    error: Option<io::Error>,
}

impl RunLog {
    /// Log to stdout and to `path`, truncating it.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writers(vec![Box::new(io::stdout()), Box::new(file)]))
    }

    pub fn from_writers(sinks: Vec<Box<dyn Write + Send>>) -> Self {
        Self { sinks, error: None }
    }

    pub fn line(&mut self, text: impl fmt::Display) {
        for sink in &mut self.sinks {
            let written = writeln!(sink, "{text}").and_then(|()| sink.flush());
            if let Err(err) = written {
                self.error.get_or_insert(err);
            }
        }
    }

    pub fn blank(&mut self) {
        self.line("");
    }

    pub fn finish(mut self) -> io::Result<()> {
        for sink in &mut self.sinks {
            if let Err(err) = sink.flush() {
                self.error.get_or_insert(err);
            }
        }
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub line: usize,
    pub fen: String,
    pub expected: String,
    pub actual: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<FailureRecord>,
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, case: &TestCase, verdict: &Verdict) {
        match verdict {
            Verdict::Pass => self.passed += 1,
            Verdict::Skip(_) => self.skipped += 1,
            Verdict::Fail(failure) => {
                self.failed += 1;
                self.failures.push(FailureRecord {
                    line: case.line(),
                    fen: case.fen().to_string(),
                    expected: failure.expected.clone(),
                    actual: failure.actual.clone(),
                    reason: failure.reason.to_string(),
                });
            }
        }
    }

    /// Every loaded case has exactly one verdict.
    pub fn is_complete(&self) -> bool {
        self.passed + self.failed + self.skipped == self.total
    }

    pub fn write_report(&self, log: &mut RunLog) {
        log.blank();
        log.line("--- Summary ---");
        log.line(format_args!("Passed: {}/{}", self.passed, self.total));
        log.line(format_args!("Failed: {}", self.failed));
        log.line(format_args!("Skipped: {}", self.skipped));

        if !self.failures.is_empty() {
            log.blank();
            log.line("Failed Positions:");
            for failure in &self.failures {
                log.line(format_args!("Line {}: {}", failure.line, failure.fen));
                log.line(format_args!("  Expected: {}", failure.expected));
                log.line(format_args!("  Actual: {}", failure.actual));
                log.line(format_args!("  Reason: {}", failure.reason));
            }
            log.blank();
        }

        if self.failed == 0 {
            log.line("All probing tests passed!");
        } else {
            log.line("Some tests failed. Check the engine's tablebase probing or the tablebase files.");
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let failures: Vec<_> = self
            .failures
            .iter()
            .map(|f| {
                json!({
                    "line": f.line,
                    "fen": f.fen,
                    "expected": f.expected,
                    "actual": f.actual,
                    "reason": f.reason,
                })
            })
            .collect();
        json!({
            "total": self.total,
            "passed": self.passed,
            "failed": self.failed,
            "skipped": self.skipped,
            "failures": failures,
        })
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let text = serde_json::to_string_pretty(&self.to_json())?;
        fs::write(path, text + "\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ProbeStatus;
    use crate::fixture::{Dialect, parse_fixtures};
    use crate::verdict::{FailReason, Failure};
    use insta::assert_snapshot;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn summary() -> RunSummary {
        let cases: Vec<_> = parse_fixtures(
            "4k3/8/8/8/8/8/4K3/4Q3 w - - 0 1; TB_WDL 2;\n\
             8/8/8/8/8/8/P7/K6k w - - 0 1; TB_WDL 2;\n\
             8/8/4k3/2p1p3/8/2P1P3/4K3/6N1 w - - 0 1; TB_WDL 0;",
            Dialect::Tablebase,
        )
        .map(Result::unwrap)
        .collect();

        let mut summary = RunSummary::new(cases.len());
        summary.record(&cases[0], &Verdict::Pass);
        summary.record(
            &cases[1],
            &Verdict::Fail(Failure {
                reason: FailReason::Probe(ProbeStatus::TimedOut),
                expected: "WDL Win (2)".into(),
                actual: "timed out".into(),
            }),
        );
        summary.record(&cases[2], &Verdict::Skip("too many pieces".into()));
        summary
    }

    #[test]
    fn every_line_reaches_every_sink() {
        let (a, b) = (Buffer::default(), Buffer::default());
        let mut log = RunLog::from_writers(vec![Box::new(a.clone()), Box::new(b.clone())]);
        log.line("Loaded 3 positions");
        log.line(format_args!("Engine output: {}", "uciok"));
        log.finish().unwrap();
        assert_eq!(a.text(), "Loaded 3 positions\nEngine output: uciok\n");
        assert_eq!(a.text(), b.text());
    }

    #[test]
    fn first_write_error_is_reported_at_finish() {
        let good = Buffer::default();
        let mut log = RunLog::from_writers(vec![Box::new(Broken), Box::new(good.clone())]);
        log.line("one");
        log.line("two");
        assert_eq!(good.text(), "one\ntwo\n");
        assert_eq!(log.finish().unwrap_err().to_string(), "disk full");
    }

    #[test]
    fn summary_counts_add_up() {
        let summary = summary();
        assert!(summary.is_complete());
        assert_eq!((summary.passed, summary.failed, summary.skipped), (1, 1, 1));
    }

    #[test]
    fn report_lists_failures() {
        let buffer = Buffer::default();
        let mut log = RunLog::from_writers(vec![Box::new(buffer.clone())]);
        summary().write_report(&mut log);
        assert_snapshot!(buffer.text().trim(), @r"
        --- Summary ---
        Passed: 1/3
        Failed: 1
        Skipped: 1

        Failed Positions:
        Line 2: 8/8/8/8/8/8/P7/K6k w - - 0 1
          Expected: WDL Win (2)
          Actual: timed out
          Reason: timed out

        Some tests failed. Check the engine's tablebase probing or the tablebase files.
        ");
    }

    #[test]
    fn json_summary_has_counts_and_failures() {
        let value = summary().to_json();
        assert_eq!(value["passed"], 1);
        assert_eq!(value["failures"][0]["line"], 2);
        assert_eq!(value["failures"][0]["reason"], "timed out");
    }
}
