// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types for the scheduling kernel.
//!
//! Recoverable conditions (a caller asked to route to a node that isn't
//! reachable, a config-less lookup failed) return [`CoreError`]. Conditions
//! the original Xerxes implementation treats as a logic bug — scheduling a
//! thunk in the past, double-registering a device at the same [`crate::ident::TopoId`]
//! — panic with a message naming the violated invariant, matching
//! `original_source/utils.hh`'s `ASSERT` macro.

use crate::ident::TopoId;
use thiserror::Error;

/// Recoverable failures surfaced by the core crate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// No route exists between the two topology nodes.
    #[error("no route from {from} to {to}")]
    Unreachable {
        /// Routing source.
        from: TopoId,
        /// Routing destination.
        to: TopoId,
    },
    /// A [`TopoId`] was used that no device is registered under.
    #[error("no device registered at {0}")]
    UnknownDevice(TopoId),
    /// An edge referenced an endpoint outside the topology's node set.
    #[error("edge endpoint {0} is out of range")]
    NodeOutOfRange(TopoId),
}
