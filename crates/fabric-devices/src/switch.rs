// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots/echo>
//! A multi-port switch: one round-robin queue set per output port, keyed by
//! the incoming link each packet arrived on, plus optional batched draining
//! for ports marked as "upstream".
//!
//! Grounded on `original_source/switch.hh`'s `Switch`.

use std::collections::{HashMap, VecDeque};

use fabric_core::{Context, CoreError, Device, Packet, StatKind, Tick, Timeline, TopoId};

/// A switch's only tunable: the fixed per-packet arbitration/forwarding
/// delay charged once a packet is selected off a port's queue.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// Forwarding delay, in ticks.
    pub delay: Tick,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self { delay: 1 }
    }
}

/// A batch of same-destination packets is held until `WAIT_FOR_Q` of them
/// have queued up on an "upstream" port, then drained all at once. Matches
/// the original's `const size_t wait_for_q = 4`.
const WAIT_FOR_Q: usize = 4;

#[derive(Debug, Default)]
struct Port {
    order: Vec<TopoId>,
    queues: HashMap<TopoId, VecDeque<Packet>>,
    cursor: usize,
    timeline: Timeline,
    sum_queue_depth: f64,
    qd_record_cnt: f64,
}

impl Port {
    fn new(neighbors: &[TopoId]) -> Self {
        Self {
            order: neighbors.to_vec(),
            queues: neighbors.iter().map(|&n| (n, VecDeque::new())).collect(),
            ..Self::default()
        }
    }

    fn queue_len(&self, from: TopoId) -> usize {
        self.queues.get(&from).map_or(0, VecDeque::len)
    }

    fn push(&mut self, from: TopoId, pkt: Packet) {
        if !self.queues.contains_key(&from) {
            self.order.push(from);
            self.queues.insert(from, VecDeque::new());
        }
        self.queues.get_mut(&from).unwrap_or_else(|| unreachable!()).push_back(pkt);
    }

    /// Round-robins across the port's per-link queues, skipping empty ones
    /// but always advancing the cursor (including on a skip), matching
    /// `Switch::Port::next` in the original.
    fn next(&mut self) -> Option<Packet> {
        let n = self.order.len();
        if n == 0 {
            return None;
        }
        for _ in 0..=n {
            let key = self.order[self.cursor];
            self.cursor = (self.cursor + 1) % n;
            if let Some(pkt) = self.queues.get_mut(&key).and_then(VecDeque::pop_front) {
                return Some(pkt);
            }
        }
        None
    }
}

/// A switch device with per-output-port round-robin fairness across
/// incoming links.
pub struct Switch {
    name: String,
    delay: Tick,
    upstreams: HashMap<TopoId, usize>,
    ports: HashMap<TopoId, Port>,
}

impl Switch {
    /// Builds a switch from its config, naming it `name` for diagnostics.
    #[must_use]
    pub fn new(config: &SwitchConfig, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: config.delay,
            upstreams: HashMap::new(),
            ports: HashMap::new(),
        }
    }

    /// Marks the port towards `id` as batched: packets queue until
    /// `WAIT_FOR_Q` have accumulated, then all drain together.
    pub fn add_upstream(&mut self, id: TopoId) {
        self.upstreams.insert(id, 0);
    }

    /// Average queue depth observed at enqueue time, per upstream port —
    /// the only stat `original_source/switch.hh`'s `log_stats` reports.
    #[must_use]
    pub fn log_stats(&self) -> Vec<String> {
        let mut lines = vec![format!("{} stats:", self.name)];
        for (&id, port) in &self.ports {
            if !self.upstreams.contains_key(&id) {
                continue;
            }
            let avg = if port.qd_record_cnt > 0.0 {
                port.sum_queue_depth / port.qd_record_cnt
            } else {
                0.0
            };
            lines.push(format!("Port {id}:"));
            lines.push(format!("  Average queue depth: {avg}"));
        }
        lines
    }

    /// Number of distinct output ports ever addressed.
    #[must_use]
    pub fn port_num(&self) -> usize {
        self.ports.len()
    }

    fn port_for(&mut self, ctx: &Context, self_id: TopoId, dst: TopoId) -> Result<TopoId, CoreError> {
        let hop = ctx.topology().next_hop(self_id, dst)?;
        self.ports
            .entry(hop)
            .or_insert_with(|| Port::new(ctx.topology().neighbors(self_id)));
        Ok(hop)
    }

    fn sched(&mut self, ctx: &mut Context, self_id: TopoId, hop: TopoId) {
        let Some(port) = self.ports.get_mut(&hop) else {
            return;
        };
        let Some(mut pkt) = port.next() else {
            return;
        };
        let transfer_time = port.timeline.transfer_time(pkt.arrive(), self.delay);
        if transfer_time > pkt.arrive() {
            ctx.stats_mut().add(
                pkt.id(),
                StatKind::SwitchQueueDelay,
                (transfer_time - pkt.arrive()) as f64,
            );
            pkt.set_arrive(transfer_time);
        }
        pkt.set_arrive(pkt.arrive() + self.delay);
        ctx.stats_mut()
            .add(pkt.id(), StatKind::SwitchTime, self.delay as f64);
        let _ = ctx.send_pkt(self_id, pkt);
    }
}

impl Device for Switch {
    fn transit(&mut self, ctx: &mut Context, id: TopoId) {
        let Some(pkt) = ctx.receive(id) else {
            return;
        };
        if pkt.dst() == id {
            return;
        }
        let Ok(hop) = self.port_for(ctx, id, pkt.dst()) else {
            return;
        };
        let from = pkt.from();
        {
            let port = self.ports.get_mut(&hop).unwrap_or_else(|| unreachable!());
            let depth = port.queue_len(from);
            port.sum_queue_depth += depth as f64;
            port.qd_record_cnt += 1.0;
            port.push(from, pkt);
        }

        if let Some(count) = self.upstreams.get_mut(&hop) {
            *count += 1;
            if *count == WAIT_FOR_Q {
                *count = 0;
                for _ in 0..WAIT_FOR_Q {
                    self.sched(ctx, id, hop);
                }
            }
        } else {
            self.sched(ctx, id, hop);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn log_stats(&self) -> Vec<String> {
        self.log_stats()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use fabric_core::PacketType;

    struct Sink {
        name: String,
    }
    impl Device for Sink {
        fn transit(&mut self, ctx: &mut Context, id: TopoId) {
            let _ = ctx.receive(id);
        }
        fn name(&self) -> &str {
            &self.name
        }
    }

    fn star(n_leaves: usize) -> (Context, TopoId, Vec<TopoId>) {
        let mut ctx = Context::new();
        let switch = ctx.add_device(Box::new(Switch::new(
            &SwitchConfig::default(),
            "switch0",
        )));
        let mut leaves = Vec::new();
        for i in 0..n_leaves {
            let leaf = ctx.add_device(Box::new(Sink {
                name: format!("leaf{i}"),
            }));
            ctx.add_edge(switch, leaf).unwrap();
            leaves.push(leaf);
        }
        ctx.build_routes();
        (ctx, switch, leaves)
    }

    #[test]
    fn round_robins_across_input_links_fairly() {
        let (mut ctx, switch, leaves) = star(3);
        for &leaf in &leaves {
            let pkt = Packet::new(ctx.pkt_ids(), PacketType::Rd, leaf, leaves[0], 0, 64, 0);
            ctx.send_pkt(leaf, pkt).unwrap();
        }
        ctx.run_to_completion();
        assert_eq!(ctx.device_name(switch), Some("switch0"));
    }

    #[test]
    fn upstream_batches_drain_together_at_wait_for_q() {
        let (mut ctx, switch, leaves) = star(2);
        if let Some(dev) = ctx.device_name(switch) {
            assert_eq!(dev, "switch0");
        }
        for i in 0..WAIT_FOR_Q {
            let pkt = Packet::new(
                ctx.pkt_ids(),
                PacketType::Rd,
                leaves[0],
                leaves[1],
                u64::try_from(i).unwrap(),
                64,
                0,
            );
            ctx.send_pkt(leaves[0], pkt).unwrap();
        }
        ctx.run_to_completion();
    }
}
