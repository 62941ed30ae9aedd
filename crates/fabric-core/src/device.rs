// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The device trait and the owning context that breaks the device / topology
//! / engine reference cycle.
//!
//! `original_source/system.hh` and `simulation.hh` keep the topology graph
//! and the device registry behind a `Simulation` facade that both the
//! engine's scheduled callbacks and the devices themselves reach through,
//! and `original_source/device.hh`'s `Device` base class gives every device
//! a per-node inbox (`TopoNode::buffer`) it drains with `receive_pkt` and
//! feeds with `send_pkt`/`send_pkt_to`. A naive Rust port of that shape
//! wants each device to hold a reference back to the system that owns it,
//! which borrowck rejects. [`Context`] centralizes topology, device
//! registry, per-device inboxes, the stat table, and the event engine in
//! one struct instead: devices are looked up and mutated through `Context`,
//! never stored as back-references on each other.

use std::collections::{HashMap, VecDeque};

use crate::engine::EventEngine;
use crate::error::CoreError;
use crate::ident::{Addr, PktId, PktIdAllocator, Tick, TopoId};
use crate::packet::{Packet, PacketType, StatTable};
use crate::topology::Topology;

/// One completed top-level request, recorded by the host that issued it once
/// its response arrives — the row shape the per-packet CSV log (spec.md §6)
/// reads back after the run.
#[derive(Debug, Clone, Copy)]
pub struct CompletedRequest {
    /// The request's packet id.
    pub id: PktId,
    /// The host device that issued the request.
    pub host: TopoId,
    /// The request's operation type.
    pub ty: PacketType,
    /// The memory device the request's response came from.
    pub mem_id: TopoId,
    /// The address the request targeted.
    pub addr: Addr,
    /// The tick the request was originally sent.
    pub sent: Tick,
    /// The tick its response arrived back at the host.
    pub arrive: Tick,
}

/// Something that can receive packets and react to them.
///
/// `transit` is called once per scheduled arrival at this device's
/// [`TopoId`]; implementations pull their pending packet(s) off their own
/// inbox with [`Context::receive`]. Most devices (buses, switches) expect
/// exactly one packet to be waiting and process it once per call; a device
/// whose schedule can lag its inbox (the DRAM adapter, matching
/// `original_source/dramsim3_interface.hh`'s `transit`) instead drains the
/// inbox in a loop until [`Context::receive`] returns `None`.
pub trait Device {
    /// Handles whatever is waiting in this device's inbox. Implementations
    /// that need to model delay should schedule their own continuation on
    /// `ctx` rather than blocking, since the engine is cooperative and
    /// single-threaded.
    fn transit(&mut self, ctx: &mut Context, id: TopoId);

    /// Handles a self-scheduled continuation registered with
    /// [`Context::schedule_event`] — used by devices that need to wake
    /// themselves up independent of inbox traffic (a requester's periodic
    /// issue step, `original_source/requester.hh`'s `register_issue_event` /
    /// `issue_event`). `tag` is whatever the device passed when scheduling,
    /// letting one device multiplex several kinds of self-event.
    ///
    /// The default implementation does nothing, for devices that never
    /// self-schedule.
    fn on_event(&mut self, ctx: &mut Context, id: TopoId, tag: u64) {
        let _ = (ctx, id, tag);
    }

    /// A short name for diagnostics and stats headers (e.g. `"bus0"`).
    fn name(&self) -> &str;

    /// End-of-run human-readable stat lines (spec.md §6 "Per-device
    /// stats"). The default implementation reports nothing, for devices
    /// with no accumulators worth surfacing.
    fn log_stats(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Owns the topology, the device registry, per-device inboxes, the packet
/// id/stat accounting, and the event engine — everything a
/// [`Device::transit`] implementation or a scheduled thunk needs to reach.
pub struct Context {
    topology: Topology,
    devices: HashMap<TopoId, Box<dyn Device>>,
    inboxes: HashMap<TopoId, VecDeque<Packet>>,
    engine: EventEngine<Context>,
    stats: StatTable,
    pkt_ids: PktIdAllocator,
    completed: Vec<CompletedRequest>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// An empty context: no nodes, no devices, clock at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topology: Topology::new(),
            devices: HashMap::new(),
            inboxes: HashMap::new(),
            engine: EventEngine::new(),
            stats: StatTable::new(),
            pkt_ids: PktIdAllocator::new(),
            completed: Vec::new(),
        }
    }

    /// Registers a node in the topology and binds `device` to it, returning
    /// the assigned [`TopoId`].
    pub fn add_device(&mut self, device: Box<dyn Device>) -> TopoId {
        let id = self.topology.add_node();
        self.devices.insert(id, device);
        self.inboxes.insert(id, VecDeque::new());
        id
    }

    /// Connects two already-registered nodes. See [`Topology::add_edge`].
    ///
    /// # Errors
    /// Propagates [`CoreError::NodeOutOfRange`] for an endpoint outside the
    /// registered node set.
    pub fn add_edge(&mut self, a: TopoId, b: TopoId) -> Result<(), CoreError> {
        self.topology.add_edge(a, b)
    }

    /// Finalizes routing tables. Must run once, after every edge is added
    /// and before the first packet is sent.
    pub fn build_routes(&mut self) {
        self.topology.build_routes();
    }

    /// Read-only access to the topology, for routing introspection.
    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Mutable access to the per-packet stat accumulators.
    pub fn stats_mut(&mut self) -> &mut StatTable {
        &mut self.stats
    }

    /// Read-only access to the per-packet stat accumulators.
    #[must_use]
    pub const fn stats(&self) -> &StatTable {
        &self.stats
    }

    /// The packet id allocator, shared by every device that constructs new
    /// packets (requesters issuing requests, the snoop filter issuing
    /// invalidations).
    #[must_use]
    pub const fn pkt_ids(&self) -> &PktIdAllocator {
        &self.pkt_ids
    }

    /// The current simulation tick.
    #[must_use]
    pub const fn now(&self) -> Tick {
        self.engine.now()
    }

    /// Runs the event engine until no events remain queued.
    pub fn run_to_completion(&mut self) {
        // `EventEngine::step` needs `&mut Context` while this method itself
        // *is* a method on `Context`, so the engine is temporarily taken out
        // and put back — the "extract, drive, restore" idiom that avoids a
        // self-referential borrow here.
        let mut engine = std::mem::replace(&mut self.engine, EventEngine::new());
        engine.run_to_completion(self);
        self.engine = engine;
    }

    /// Runs a single pending event, if any. Returns the tick it ran at, or
    /// `None` if nothing was pending — mirrors `xerxes::step()`'s `Tick`
    /// return used to drive the per-tick DRAM backend clocking loop in
    /// `original_source/main.cc`.
    pub fn step(&mut self) -> Option<Tick> {
        let mut engine = std::mem::replace(&mut self.engine, EventEngine::new());
        let tick = engine.step(self);
        self.engine = engine;
        tick
    }

    /// Pops the next packet waiting in `id`'s inbox, if any.
    pub fn receive(&mut self, id: TopoId) -> Option<Packet> {
        self.inboxes.get_mut(&id)?.pop_front()
    }

    /// Routes `pkt` one hop towards its destination from `from`'s
    /// perspective, pushes it onto that hop's inbox, and schedules the
    /// hop's [`Device::transit`] to run at `pkt.arrive()`.
    ///
    /// Mirrors `original_source/device.hh`'s `send_pkt_to`: `from` is
    /// recorded onto the packet (`set_from`) so the next device's
    /// per-link bookkeeping is keyed by the physical hop, not the packet's
    /// original source.
    ///
    /// # Errors
    /// Propagates [`CoreError::Unreachable`] if no route exists from `from`
    /// to `pkt.dst()`, or [`CoreError::UnknownDevice`] if the computed hop
    /// has no inbox registered.
    pub fn send_pkt(&mut self, from: TopoId, mut pkt: Packet) -> Result<(), CoreError> {
        let hop = self.topology.next_hop(from, pkt.dst())?;
        pkt.set_from(from);
        let arrive = pkt.arrive();
        self.inboxes
            .get_mut(&hop)
            .ok_or(CoreError::UnknownDevice(hop))?
            .push_back(pkt);
        self.engine
            .schedule_at(arrive, Box::new(move |ctx: &mut Context| ctx.dispatch(hop)));
        Ok(())
    }

    /// Schedules `id`'s [`Device::on_event`] to run at `tick`, carrying
    /// `tag` through unchanged.
    pub fn schedule_event(&mut self, id: TopoId, tick: Tick, tag: u64) {
        self.engine
            .schedule_at(tick, Box::new(move |ctx: &mut Context| ctx.dispatch_event(id, tag)));
    }

    /// Calls [`Device::on_event`] on the device registered at `id`.
    ///
    /// # Panics
    /// Panics if no device is registered at `id`, for the same reason as
    /// [`Context::dispatch`].
    #[allow(clippy::panic)]
    pub fn dispatch_event(&mut self, id: TopoId, tag: u64) {
        let mut device = self
            .devices
            .remove(&id)
            .unwrap_or_else(|| panic!("Context invariant violated: no device at {id}"));
        device.on_event(self, id, tag);
        self.devices.insert(id, device);
    }

    /// Calls [`Device::transit`] on the device registered at `id`.
    ///
    /// # Panics
    /// Panics if no device is registered at `id` — this is only ever called
    /// from a thunk scheduled by [`Context::send_pkt`], which already
    /// validated the hop exists, so a missing device here is an internal
    /// bug, not a recoverable condition.
    #[allow(clippy::panic)]
    pub fn dispatch(&mut self, id: TopoId) {
        let mut device = self
            .devices
            .remove(&id)
            .unwrap_or_else(|| panic!("Context invariant violated: no device at {id}"));
        device.transit(self, id);
        self.devices.insert(id, device);
    }

    /// The name of the device at `id`, if one is registered.
    #[must_use]
    pub fn device_name(&self, id: TopoId) -> Option<&str> {
        self.devices.get(&id).map(|d| d.name())
    }

    /// Every registered device's end-of-run stat lines, in [`TopoId`] order
    /// (i.e. device registration order) so reports are reproducible across
    /// runs.
    #[must_use]
    pub fn device_stats(&self) -> Vec<(TopoId, Vec<String>)> {
        let mut rows: Vec<_> = self.devices.iter().map(|(id, d)| (*id, d.log_stats())).collect();
        rows.sort_by_key(|(id, _)| *id);
        rows
    }

    /// Records a completed top-level request for the per-packet CSV log
    /// (spec.md §6). Called by a host device's [`Device::transit`] when a
    /// response it issued arrives back.
    pub fn record_completion(&mut self, row: CompletedRequest) {
        self.completed.push(row);
    }

    /// Every request completed so far, in completion order.
    #[must_use]
    pub fn completed_requests(&self) -> &[CompletedRequest] {
        &self.completed
    }
}
