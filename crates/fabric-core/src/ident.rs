// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dense integer identifiers used throughout the simulator.
//!
//! Unlike content-addressed identifiers (hash-based ids), these are opaque
//! handles assigned by monotonic counters: [`TopoId`] at topology
//! construction time, [`PktId`] at packet construction time. Dedicated
//! newtypes (rather than bare `u64`) prevent accidentally mixing a node
//! index with a packet id at a call site.

use std::sync::atomic::{AtomicU64, Ordering};

/// Simulation time, in whatever unit the run's configuration fixes
/// (nanoseconds or picoseconds) — monotonically advancing and consistent
/// across a single run.
pub type Tick = u64;

/// A memory address in the simulated fabric's address space.
pub type Addr = u64;

/// Identifier for a node in the [`crate::topology::Topology`] graph.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopoId(pub usize);

impl TopoId {
    /// Returns the raw index into the topology's node vector.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TopoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a [`crate::packet::Packet`], assigned from a
/// process-wide monotonically increasing counter.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PktId(pub u64);

impl std::fmt::Display for PktId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic, process-wide packet id allocator.
///
/// The original Xerxes implementation used a `static PktID id` local to the
/// packet builder constructor (`original_source/def.hpp`); a Rust
/// implementation threads this as an explicit, ownable counter on
/// [`crate::context::Context`] rather than process-global static state (see
/// spec.md §9 "Global mutable state").
#[derive(Debug, Default)]
pub struct PktIdAllocator {
    next: AtomicU64,
}

impl PktIdAllocator {
    /// Creates an allocator starting at packet id zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Allocates the next packet id.
    pub fn next(&self) -> PktId {
        PktId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_is_monotonic_and_unique() {
        let alloc = PktIdAllocator::new();
        let ids: Vec<_> = (0..64).map(|_| alloc.next().0).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(ids.first().copied(), Some(0));
    }
}
