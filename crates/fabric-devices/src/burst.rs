// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Splits a wide burst request into 64-byte-aligned cache-line
//! subrequests on the way out, and rejoins their responses into a single
//! response to the origin on the way back.
//!
//! Grounded on `original_source/burst_pack.hh`'s `BurstHandler`.

use std::collections::{HashMap, HashSet};

use fabric_core::{Context, Device, Packet, PacketType, PktId, StatKind, TopoId};

const LINE_SIZE_ADDR: u64 = 64;
const LINE_SIZE_BYTES: u32 = 64;

struct Recorder {
    origin: Packet,
    sub_pkts: HashSet<PktId>,
}

/// A shim that expands `burst > 1` requests into per-cache-line children and
/// rejoins their responses into one response to the requester.
#[derive(Default)]
pub struct BurstHandler {
    name: String,
    bursts: HashMap<PktId, Recorder>,
    reverse: HashMap<PktId, PktId>,
}

impl BurstHandler {
    /// Builds an (initially empty) burst handler, naming it `name` for
    /// diagnostics.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Device for BurstHandler {
    #[allow(clippy::panic)]
    fn transit(&mut self, ctx: &mut Context, id: TopoId) {
        let Some(pkt) = ctx.receive(id) else {
            return;
        };

        if matches!(pkt.ty(), PacketType::Inv | PacketType::Corrupt) || pkt.burst() <= 1 {
            let _ = ctx.send_pkt(id, pkt);
            return;
        }

        let pkt_id = pkt.id();

        if pkt.is_rsp() {
            let Some(&origin_id) = self.reverse.get(&pkt_id) else {
                panic!("BurstHandler invariant violated: no recorded sub-packet {pkt_id}");
            };
            self.reverse.remove(&pkt_id);

            for kind in [
                StatKind::DeviceProcessTime,
                StatKind::DramInterfaceQueuingDelay,
                StatKind::DramTime,
            ] {
                let delta = ctx.stats().get(pkt_id, kind);
                ctx.stats_mut().add(origin_id, kind, delta);
            }

            let done = {
                let rec = self
                    .bursts
                    .get_mut(&origin_id)
                    .unwrap_or_else(|| panic!("BurstHandler invariant violated: unknown origin {origin_id}"));
                rec.sub_pkts.remove(&pkt_id);
                rec.sub_pkts.is_empty()
            };

            if done {
                let rec = self
                    .bursts
                    .remove(&origin_id)
                    .unwrap_or_else(|| panic!("BurstHandler invariant violated: unknown origin {origin_id}"));
                let mut origin = rec.origin;
                let wait = pkt.arrive().saturating_sub(origin.arrive());
                ctx.stats_mut().add(origin_id, StatKind::WaitAllBurst, wait as f64);

                origin.turn_around();
                origin.set_arrive(pkt.arrive());
                let burst = origin.burst();
                let length = if origin.ty().is_write() { 0 } else { LINE_SIZE_BYTES * burst };
                origin.set_length(length);
                let _ = ctx.send_pkt(id, origin);
            }
            return;
        }

        assert!(
            !self.bursts.contains_key(&pkt_id),
            "BurstHandler invariant violated: double receiving origin packet {pkt_id}"
        );

        let burst = pkt.burst();
        let ty = pkt.ty();
        let src = pkt.src();
        let dst = pkt.dst();
        let sent = pkt.sent();
        let arrive = pkt.arrive();
        let addr = pkt.addr();
        let zero_payload = pkt.length() == 0;

        self.bursts.insert(
            pkt_id,
            Recorder {
                origin: pkt,
                sub_pkts: HashSet::new(),
            },
        );

        for i in 0..burst {
            let child_addr = addr + u64::from(i) * LINE_SIZE_ADDR;
            let length = if zero_payload { 0 } else { LINE_SIZE_BYTES };
            let mut child = Packet::new(ctx.pkt_ids(), ty, src, dst, child_addr, length, sent);
            child.set_arrive(arrive);
            // Carried on every child "for filtering the response", matching
            // the original's overload of this field.
            child.set_burst(burst);
            let child_id = child.id();

            self.bursts
                .get_mut(&pkt_id)
                .unwrap_or_else(|| panic!("BurstHandler invariant violated: unknown origin {pkt_id}"))
                .sub_pkts
                .insert(child_id);
            self.reverse.insert(child_id, pkt_id);
            let _ = ctx.send_pkt(id, child);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

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

    fn linked() -> (Context, TopoId, TopoId, TopoId) {
        let mut ctx = Context::new();
        let host = ctx.add_device(Box::new(Sink {
            name: "host".to_string(),
        }));
        let handler = ctx.add_device(Box::new(BurstHandler::new("burst0")));
        let mem = ctx.add_device(Box::new(Sink {
            name: "mem".to_string(),
        }));
        ctx.add_edge(host, handler).unwrap();
        ctx.add_edge(handler, mem).unwrap();
        ctx.build_routes();
        (ctx, host, handler, mem)
    }

    #[test]
    fn a_burst_of_four_splits_into_four_cache_line_children() {
        let (mut ctx, host, handler, mem) = linked();
        let mut pkt = Packet::new(ctx.pkt_ids(), PacketType::Rd, host, mem, 0x1000, 0, 0);
        pkt.set_burst(4);
        ctx.send_pkt(host, pkt).unwrap();
        ctx.run_to_completion();
        assert_eq!(ctx.device_name(handler), Some("burst0"));
    }

    #[test]
    fn single_requests_bypass_splitting() {
        let (mut ctx, host, _handler, mem) = linked();
        let pkt = Packet::new(ctx.pkt_ids(), PacketType::Rd, host, mem, 0, 64, 0);
        ctx.send_pkt(host, pkt).unwrap();
        ctx.run_to_completion();
    }
}
