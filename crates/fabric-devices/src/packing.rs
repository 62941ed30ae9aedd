// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Coalesces `packaging_num` packets from registered upstream hosts into one
//! framed "super-packet": the first member carries the combined payload, the
//! rest are flagged as sub-packets that bypass bus framing and bandwidth
//! delay once forwarded.
//!
//! Grounded on `original_source/burst_pack.hh`'s `Packing`.

use std::collections::{BTreeMap, HashSet};

use fabric_core::{Context, Device, Packet, PktId, StatKind, TopoId};

/// Configuration for a [`Packing`] shim.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct PackingConfig {
    /// Number of packets coalesced into one package before forwarding.
    pub packaging_num: usize,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self { packaging_num: 1 }
    }
}

#[derive(Debug, Default)]
struct Package {
    /// Keyed by [`PktId`] so members forward in the same order the original's
    /// `std::map<PktID, Packet>` iterates.
    members: BTreeMap<PktId, Packet>,
}

/// A shim that batches packets from its registered upstream hosts into
/// fixed-size packages before handing them downstream.
pub struct Packing {
    name: String,
    packaging_num: usize,
    upstreams: HashSet<TopoId>,
    packages: BTreeMap<usize, Package>,
    cur_pkg_id: usize,
}

impl Packing {
    /// Builds a packing shim from its config, naming it `name` for
    /// diagnostics.
    #[must_use]
    pub fn new(config: &PackingConfig, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            packaging_num: config.packaging_num.max(1),
            upstreams: HashSet::new(),
            packages: BTreeMap::new(),
            cur_pkg_id: 0,
        }
    }

    /// Registers `host` as a packable upstream; packets arriving from any
    /// other sender pass through untouched.
    pub fn add_upstream(&mut self, host: TopoId) {
        self.upstreams.insert(host);
    }
}

impl Device for Packing {
    fn transit(&mut self, ctx: &mut Context, id: TopoId) {
        let Some(mut pkt) = ctx.receive(id) else {
            return;
        };
        let tick = pkt.arrive();

        if !self.upstreams.contains(&pkt.from()) {
            let _ = ctx.send_pkt(id, pkt);
            return;
        }

        let pkg = self.packages.entry(self.cur_pkg_id).or_default();
        if pkg.members.is_empty() {
            let scale = u32::try_from(self.packaging_num).unwrap_or(u32::MAX);
            pkt.set_length(pkt.length().saturating_mul(scale));
            pkg.members.insert(pkt.id(), pkt);
        } else {
            pkt.mark_sub_pkt();
            pkt.set_length(0);
            pkg.members.insert(pkt.id(), pkt);
        }

        if pkg.members.len() < self.packaging_num {
            return;
        }

        let Some(pkg) = self.packages.remove(&self.cur_pkg_id) else {
            return;
        };
        self.cur_pkg_id += 1;

        for (_, mut member) in pkg.members {
            let delay = tick.saturating_sub(member.arrive());
            ctx.stats_mut()
                .add(member.id(), StatKind::PackagingDelay, delay as f64);
            member.set_arrive(tick.max(member.arrive()));
            let _ = ctx.send_pkt(id, member);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
