//! Conformance harness for engines that probe Syzygy endgame tablebases.
//!
//! A run loads positions from a fixture file, asks the engine under test to
//! probe each one, and compares the answers against the fixture's own
//! annotations or an independent tablebase oracle.

pub mod annotate;
pub mod engine;
pub mod extract;
pub mod fixture;
pub mod harness;
pub mod oracle;
pub mod report;
pub mod verdict;
pub mod wdl;
