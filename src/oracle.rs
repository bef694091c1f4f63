//! Reference answers from Syzygy tablebases.

use std::io;
use std::path::Path;

use shakmaty::Chess;
use shakmaty_syzygy::{MaybeRounded, SyzygyError, Tablebase};
use thiserror::Error;
use tracing::debug;

use crate::wdl::WdlClass;

/// Expected distance to zeroing, as far as the oracle can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtzExpectation {
    pub value: i32,
    /// Rounded values may be one ply further from zero than the true value.
    pub rounded: bool,
}

impl DtzExpectation {
    pub fn precise(value: i32) -> Self {
        Self {
            value,
            rounded: false,
        }
    }

    pub fn accepts(self, reported: i32) -> bool {
        reported == self.value || (self.rounded && reported == self.value + self.value.signum())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    pub wdl: WdlClass,
    pub dtz: Option<DtzExpectation>,
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("no tablebase configured")]
    Unavailable,
    #[error(transparent)]
    Probe(#[from] SyzygyError),
}

/// An independent source of tablebase truth.
pub trait Oracle {
    fn probe(&self, pos: &Chess, want_dtz: bool) -> Result<Expectation, OracleError>;
}

pub struct SyzygyOracle {
    tablebase: Tablebase<Chess>,
    tables: usize,
}

impl SyzygyOracle {
    /// Load every table file found in `dir`.
    pub fn open(dir: &Path) -> io::Result<Self> {
        let mut tablebase = Tablebase::<Chess>::new();
        let tables = tablebase.add_directory(dir)?;
        debug!(dir = %dir.display(), tables, "tablebase opened");
        Ok(Self { tablebase, tables })
    }

    pub fn table_count(&self) -> usize {
        self.tables
    }
}

impl Oracle for SyzygyOracle {
    fn probe(&self, pos: &Chess, want_dtz: bool) -> Result<Expectation, OracleError> {
        let wdl = WdlClass::from(self.tablebase.probe_wdl_after_zeroing(pos)?);
        let dtz = if want_dtz {
            Some(match self.tablebase.probe_dtz(pos)? {
                MaybeRounded::Precise(dtz) => DtzExpectation::precise(i32::from(dtz)),
                MaybeRounded::Rounded(dtz) => DtzExpectation {
                    value: i32::from(dtz),
                    rounded: true,
                },
            })
        } else {
            None
        };
        Ok(Expectation { wdl, dtz })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precise_distance_needs_exact_match() {
        let dtz = DtzExpectation::precise(-7);
        assert!(dtz.accepts(-7));
        assert!(!dtz.accepts(-8));
    }

    #[test]
    fn rounded_distance_accepts_one_ply_further() {
        let dtz = DtzExpectation {
            value: 12,
            rounded: true,
        };
        assert!(dtz.accepts(12));
        assert!(dtz.accepts(13));
        assert!(!dtz.accepts(11));

        let losing = DtzExpectation {
            value: -12,
            rounded: true,
        };
        assert!(losing.accepts(-13));
        assert!(!losing.accepts(-11));
    }

    #[test]
    fn empty_directory_opens_with_no_tables() {
        let dir = std::env::temp_dir().join(format!("tbcheck-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let oracle = SyzygyOracle::open(&dir).unwrap();
        assert_eq!(oracle.table_count(), 0);

        let pos = Chess::default();
        assert!(oracle.probe(&pos, false).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
