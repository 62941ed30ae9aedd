// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The fabric's connectivity graph and the routing tables derived from it.
//!
//! Grounded on `original_source/topology.hh`: an undirected adjacency list
//! over dense [`TopoId`] handles, with a per-source BFS building a "first
//! hop towards `dst`" table so that every device only needs to know its
//! direct neighbors to forward a packet that isn't addressed to it.

use std::collections::VecDeque;

use crate::error::CoreError;
use crate::ident::TopoId;

/// A connectivity graph over dense node handles.
///
/// Nodes are added with [`Topology::add_node`] (returning their assigned
/// [`TopoId`]) and connected with [`Topology::add_edge`]; routing tables are
/// then derived with [`Topology::build_routes`].
#[derive(Debug, Default)]
pub struct Topology {
    adjacency: Vec<Vec<TopoId>>,
    /// `routes[s][d]` is the first hop from `s` towards `d`, or `None` if
    /// `s == d`. Empty until [`Topology::build_routes`] runs.
    routes: Vec<Vec<Option<TopoId>>>,
}

impl Topology {
    /// An empty topology.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new node, returning its assigned id. Ids are assigned
    /// densely in allocation order, starting at zero.
    pub fn add_node(&mut self) -> TopoId {
        let id = TopoId(self.adjacency.len());
        self.adjacency.push(Vec::new());
        id
    }

    /// The number of nodes registered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    /// True if no nodes have been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Connects two nodes undirected. Both must already be registered.
    ///
    /// # Errors
    /// Returns [`CoreError::NodeOutOfRange`] if either endpoint is outside
    /// the set of registered nodes.
    pub fn add_edge(&mut self, a: TopoId, b: TopoId) -> Result<(), CoreError> {
        self.check_range(a)?;
        self.check_range(b)?;
        self.adjacency[a.index()].push(b);
        self.adjacency[b.index()].push(a);
        Ok(())
    }

    fn check_range(&self, id: TopoId) -> Result<(), CoreError> {
        if id.index() < self.adjacency.len() {
            Ok(())
        } else {
            Err(CoreError::NodeOutOfRange(id))
        }
    }

    /// The direct neighbors of `id`, in the order edges were added.
    #[must_use]
    pub fn neighbors(&self, id: TopoId) -> &[TopoId] {
        &self.adjacency[id.index()]
    }

    /// Runs a BFS from every node to build the `first hop towards dst`
    /// routing table. Must be called after all edges are added and before
    /// any call to [`Topology::next_hop`].
    pub fn build_routes(&mut self) {
        let n = self.adjacency.len();
        self.routes = vec![vec![None; n]; n];

        for src in 0..n {
            let mut visited = vec![false; n];
            let mut queue = VecDeque::new();
            visited[src] = true;
            queue.push_back(src);

            while let Some(cur) = queue.pop_front() {
                for &next in &self.adjacency[cur] {
                    if visited[next.index()] {
                        continue;
                    }
                    visited[next.index()] = true;
                    // The first hop towards `next` from `src` is the same as
                    // the first hop towards `cur`, unless `cur` itself is
                    // `src`, in which case `next` *is* the first hop.
                    self.routes[src][next.index()] = if cur == src {
                        Some(next)
                    } else {
                        self.routes[src][cur]
                    };
                    queue.push_back(next.index());
                }
            }
        }
    }

    /// The first hop from `src` towards `dst`.
    ///
    /// # Errors
    /// Returns [`CoreError::Unreachable`] if no path exists (or
    /// [`Topology::build_routes`] was never called).
    pub fn next_hop(&self, src: TopoId, dst: TopoId) -> Result<TopoId, CoreError> {
        if src == dst {
            return Ok(dst);
        }
        self.routes
            .get(src.index())
            .and_then(|row| row.get(dst.index()))
            .copied()
            .flatten()
            .ok_or(CoreError::Unreachable { from: src, to: dst })
    }

    /// Dumps the full `src -> dst: first-hop` routing table as lines of
    /// text, for operator debugging (`original_source/topology.hh`'s
    /// `log_route`).
    #[must_use]
    pub fn log_routes(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (src, row) in self.routes.iter().enumerate() {
            for (dst, hop) in row.iter().enumerate() {
                if src == dst {
                    continue;
                }
                match hop {
                    Some(h) => lines.push(format!("{src} -> {dst}: via {h}")),
                    None => lines.push(format!("{src} -> {dst}: unreachable")),
                }
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn line_topology(n: usize) -> Topology {
        let mut topo = Topology::new();
        let nodes: Vec<_> = (0..n).map(|_| topo.add_node()).collect();
        for w in nodes.windows(2) {
            topo.add_edge(w[0], w[1]).unwrap();
        }
        topo.build_routes();
        topo
    }

    #[test]
    fn next_hop_on_a_line_always_steps_towards_the_goal() {
        let topo = line_topology(5);
        assert_eq!(topo.next_hop(TopoId(0), TopoId(4)).unwrap(), TopoId(1));
        assert_eq!(topo.next_hop(TopoId(4), TopoId(0)).unwrap(), TopoId(3));
        assert_eq!(topo.next_hop(TopoId(2), TopoId(2)).unwrap(), TopoId(2));
    }

    #[test]
    fn disconnected_nodes_are_unreachable() {
        let mut topo = Topology::new();
        let a = topo.add_node();
        let b = topo.add_node();
        topo.build_routes();
        assert_eq!(
            topo.next_hop(a, b).unwrap_err(),
            CoreError::Unreachable { from: a, to: b }
        );
    }

    #[test]
    fn edge_to_unregistered_node_errors() {
        let mut topo = Topology::new();
        let a = topo.add_node();
        let ghost = TopoId(99);
        assert_eq!(
            topo.add_edge(a, ghost).unwrap_err(),
            CoreError::NodeOutOfRange(ghost)
        );
    }
}
