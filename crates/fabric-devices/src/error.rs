// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types surfaced by device construction.
//!
//! These are all setup-time, config-shaped failures — spec.md §7's "config
//! error" taxonomy — fatal before the first packet ever moves, so they
//! propagate as `Result` rather than panicking.

use thiserror::Error;

/// Failures constructing a device from its configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DevicesError {
    /// An unrecognized eviction policy name was given to a [`crate::snoop::Snoop`].
    #[error("unknown eviction policy: {0}")]
    UnknownEvictionPolicy(String),
    /// `line_num` is not evenly divisible by `assoc`.
    #[error("snoop line_num {line_num} is not divisible by assoc {assoc}")]
    SetCountMismatch {
        /// Configured line count.
        line_num: usize,
        /// Configured associativity.
        assoc: usize,
    },
    /// An unrecognized interleave policy name was given to a [`crate::requester::Requester`].
    #[error("unknown interleave type: {0}")]
    UnknownInterleaveType(String),
    /// The trace file backing a `trace` interleaver couldn't be read.
    #[error("cannot open trace file {path}: {reason}")]
    TraceUnreadable {
        /// The configured path.
        path: String,
        /// The underlying I/O error, rendered to a string since `io::Error` isn't `Eq`.
        reason: String,
    },
}
