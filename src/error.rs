//! Error types for the simulator.
//!
//! The public [`SimError`] is what the driver sees: trace-syntax problems and
//! I/O failures opening a trace file. The [`Pending`] signal is deliberately
//! not part of it — it is an internal, recoverable condition consumed by the
//! core's retry logic and must never reach a caller outside this crate.

use std::path::PathBuf;

/// Errors that can abort a run.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A trace line did not match the instruction grammar.
    #[error("trace syntax error in {path}:{line}: {text:?}")]
    TraceSyntax {
        /// Path to the offending trace file.
        path: PathBuf,
        /// One-based line number within the file.
        line: usize,
        /// The raw (whitespace-trimmed) line text.
        text: String,
    },

    /// Failed to open or read a trace file.
    #[error("I/O error reading trace file: {0}")]
    Io(#[from] std::io::Error),
}

/// Signals that a snoop could not proceed because the target line is pending
/// a fill from main memory. Caught at the core boundary and turned into a
/// retry; never surfaced to the user.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pending;
