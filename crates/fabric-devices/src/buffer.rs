// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! A capacity-bounded in-flight buffer: admits up to `capacity` outstanding
//! reads and `capacity` outstanding writes, queuing the rest until a
//! response frees a slot.
//!
//! Grounded on `original_source/switch.hh`'s `DeviceBuffer`. Not part of the
//! default device-type table; available for configs that need back-pressure
//! in front of a slow downstream device.

use std::collections::{HashSet, VecDeque};

use fabric_core::{Context, Device, Packet, PktId, TopoId};

/// Configuration for a [`DeviceBuffer`].
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum outstanding reads, and independently, outstanding writes.
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { capacity: 8 }
    }
}

/// A device that admits at most `capacity` outstanding reads and `capacity`
/// outstanding writes at once, queuing excess requests until a response
/// frees a slot.
pub struct DeviceBuffer {
    name: String,
    capacity: usize,
    pending: VecDeque<Packet>,
    rd: HashSet<PktId>,
    wt: HashSet<PktId>,
}

impl DeviceBuffer {
    /// Builds a buffer from its config, naming it `name` for diagnostics.
    #[must_use]
    pub fn new(config: &BufferConfig, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: config.capacity,
            pending: VecDeque::new(),
            rd: HashSet::new(),
            wt: HashSet::new(),
        }
    }

    /// Number of requests currently queued waiting for a free slot.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Device for DeviceBuffer {
    fn transit(&mut self, ctx: &mut Context, id: TopoId) {
        let Some(pkt) = ctx.receive(id) else {
            return;
        };
        if pkt.dst() == id {
            return;
        }

        if !pkt.ty().is_read() && !pkt.ty().is_write() {
            let _ = ctx.send_pkt(id, pkt.clone());
        }

        let is_read = pkt.ty().is_read();
        let in_flight = if is_read { &mut self.rd } else { &mut self.wt };

        if pkt.is_rsp() {
            in_flight.remove(&pkt.id());
            if let Some(mut next) = self.pending.pop_front() {
                in_flight.insert(next.id());
                next.set_arrive(next.arrive().max(pkt.arrive()));
                let _ = ctx.send_pkt(id, next);
            }
            let _ = ctx.send_pkt(id, pkt);
        } else if in_flight.len() < self.capacity {
            in_flight.insert(pkt.id());
            let _ = ctx.send_pkt(id, pkt);
        } else {
            self.pending.push_back(pkt);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
