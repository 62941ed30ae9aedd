// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The packet model: request/response type tags, the packet envelope, and
//! the per-packet statistics side-table.
//!
//! Grounded on `original_source/def.hpp`'s `PacketType` enum and `Packet`
//! struct, and the stat accumulation pattern scattered across the device
//! headers (each device adds a named delay to the packet's row in the stat
//! table as it transits).

use std::collections::HashMap;

use crate::ident::{Addr, PktId, PktIdAllocator, Tick, TopoId};

/// The operation a packet carries, mirroring `original_source/def.hpp`
/// verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Coherent read.
    Rd,
    /// Non-coherent read (bypasses the snoop filter).
    NtRd,
    /// Coherent write.
    Wt,
    /// Non-coherent write (bypasses the snoop filter).
    NtWt,
    /// Coherence invalidation, generated by the snoop filter itself.
    Inv,
    /// A packet tagged as corrupted; carried through unmodified by every
    /// device (spec.md Non-goals: fault injection is limited to this tag).
    Corrupt,
}

impl PacketType {
    /// True for `Rd` and `NtRd`.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Rd | Self::NtRd)
    }

    /// True for `Wt` and `NtWt`.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Wt | Self::NtWt)
    }

    /// True for `Rd` and `Wt`; false for the `Nt*` variants, `Inv`, and
    /// `Corrupt`. A coherent packet is one the snoop filter is allowed to
    /// inspect and act on.
    #[must_use]
    pub const fn is_coherent(self) -> bool {
        matches!(self, Self::Rd | Self::Wt)
    }
}

/// The accounting buckets a device adds latency to as a packet transits.
///
/// Every variant corresponds to a named delay the original Xerxes devices
/// add to a packet's row in the global stat table (`original_source/def.hpp`,
/// `bus.hh`, `switch.hh`, `snoop.hh`, `requester.hh`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKind {
    /// Time a packet waited in a bus's input queue before transmission began.
    BusQueueDelay,
    /// Time spent on the wire, bandwidth-limited.
    BusTime,
    /// Per-packet framing overhead charged once per physical transmission.
    FramingTime,
    /// Time a packet waited in a switch port's queue.
    SwitchQueueDelay,
    /// Time spent being arbitrated and forwarded by a switch.
    SwitchTime,
    /// Time spent waiting to be coalesced into a packing shim's super-packet.
    PackagingDelay,
    /// Time a split burst's origin packet waited for every child to return.
    WaitAllBurst,
    /// Time a coherent request waited on an in-progress snoop eviction.
    SnoopEvictDelay,
    /// Time a host spent blocked on an outstanding invalidation.
    HostInvDelay,
    /// Time a request waited in the DRAM adapter's queue before issue.
    DramInterfaceQueuingDelay,
    /// Generic device-internal processing time not covered above.
    DeviceProcessTime,
    /// Time spent being serviced by the DRAM backend itself.
    DramTime,
}

impl StatKind {
    /// All stat kinds, in the order the original's `log_stats` prints them.
    pub const ALL: [Self; 12] = [
        Self::BusQueueDelay,
        Self::BusTime,
        Self::FramingTime,
        Self::SwitchQueueDelay,
        Self::SwitchTime,
        Self::PackagingDelay,
        Self::WaitAllBurst,
        Self::SnoopEvictDelay,
        Self::HostInvDelay,
        Self::DramInterfaceQueuingDelay,
        Self::DeviceProcessTime,
        Self::DramTime,
    ];

    /// The column header used by the CSV packet trace and the human-readable
    /// stats table.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::BusQueueDelay => "bus queue delay",
            Self::BusTime => "bus time",
            Self::FramingTime => "framing time",
            Self::SwitchQueueDelay => "switch queue delay",
            Self::SwitchTime => "switch time",
            Self::PackagingDelay => "packaging delay",
            Self::WaitAllBurst => "wait all burst",
            Self::SnoopEvictDelay => "snoop evict delay",
            Self::HostInvDelay => "host inv delay",
            Self::DramInterfaceQueuingDelay => "dram interface queuing delay",
            Self::DeviceProcessTime => "device process time",
            Self::DramTime => "dram time",
        }
    }
}

/// A single packet in flight.
///
/// `src`/`dst` are the fixed endpoints of the request-response round trip;
/// `from` is the rolling "last hop" a forwarding device overwrites on every
/// send, used to key per-link state (a bus's route table, a switch's port
/// queues) by the *physical* link a packet is currently crossing rather than
/// its eventual origin.
#[derive(Debug, Clone)]
pub struct Packet {
    id: PktId,
    ty: PacketType,
    src: TopoId,
    dst: TopoId,
    from: TopoId,
    addr: Addr,
    length: u32,
    burst: u32,
    is_rsp: bool,
    /// Set on child packets produced by burst splitting or trailing members
    /// of a packing shim's coalesced super-packet; such packets bypass
    /// per-transmission framing overhead.
    is_sub_pkt: bool,
    sent: Tick,
    /// Arrival tick at the packet's current hop, updated on every device
    /// transit; not the packet's creation tick.
    arrive: Tick,
}

impl Packet {
    /// Creates a new top-level request packet, allocating its id from
    /// `alloc`. `sent` and `arrive` both start at `sent`.
    pub fn new(
        alloc: &PktIdAllocator,
        ty: PacketType,
        src: TopoId,
        dst: TopoId,
        addr: Addr,
        length: u32,
        sent: Tick,
    ) -> Self {
        Self {
            id: alloc.next(),
            ty,
            src,
            dst,
            from: src,
            addr,
            length,
            burst: 1,
            is_rsp: false,
            is_sub_pkt: false,
            sent,
            arrive: sent,
        }
    }

    /// Builds a sub-packet (a burst child, or a packing shim's trailing
    /// zero-payload member) sharing a freshly allocated id but flagged so
    /// downstream devices skip per-transmission framing charges.
    #[must_use]
    pub fn as_sub_pkt(mut self, alloc: &PktIdAllocator) -> Self {
        self.id = alloc.next();
        self.is_sub_pkt = true;
        self
    }

    /// The packet's id.
    #[must_use]
    pub const fn id(&self) -> PktId {
        self.id
    }

    /// The packet's operation type.
    #[must_use]
    pub const fn ty(&self) -> PacketType {
        self.ty
    }

    /// The packet's original source device (fixed for the round trip).
    #[must_use]
    pub const fn src(&self) -> TopoId {
        self.src
    }

    /// The packet's current destination: the original target while this is
    /// a request, the original source once [`Packet::turn_around`] has made
    /// it a response.
    #[must_use]
    pub const fn dst(&self) -> TopoId {
        self.dst
    }

    /// The device this packet was most recently sent from — updated on
    /// every hop, used to key per-link device state.
    #[must_use]
    pub const fn from(&self) -> TopoId {
        self.from
    }

    /// Records the device a packet is being forwarded from. Called by
    /// [`crate::device::Context::send_pkt`] on every hop.
    pub fn set_from(&mut self, from: TopoId) {
        self.from = from;
    }

    /// Turns a request into its response in place: swaps `src`/`dst` and
    /// marks `is_rsp`. Mirrors `std::swap(pkt.src, pkt.dst); pkt.is_rsp =
    /// true;` in `original_source/dramsim3_interface.hh`'s completion
    /// callback.
    pub fn turn_around(&mut self) {
        std::mem::swap(&mut self.src, &mut self.dst);
        self.is_rsp = true;
    }

    /// True once [`Packet::turn_around`] has been called.
    #[must_use]
    pub const fn is_rsp(&self) -> bool {
        self.is_rsp
    }

    /// The memory address this packet targets.
    #[must_use]
    pub const fn addr(&self) -> Addr {
        self.addr
    }

    /// Payload length in bytes.
    #[must_use]
    pub const fn length(&self) -> u32 {
        self.length
    }

    /// Overrides the payload length; used by the packing shim to inflate
    /// the first member of a coalesced super-packet, and by the DRAM
    /// adapter to zero a write response's payload.
    pub fn set_length(&mut self, length: u32) {
        self.length = length;
    }

    /// The number of cache lines this request spans before burst splitting.
    #[must_use]
    pub const fn burst(&self) -> u32 {
        self.burst
    }

    /// Sets the burst span, and (overloaded, matching the original) is also
    /// used by the burst handler to tag a child sub-request with its parent
    /// origin for response filtering.
    pub fn set_burst(&mut self, burst: u32) {
        self.burst = burst;
    }

    /// True if this is a burst child or packing sub-packet.
    #[must_use]
    pub const fn is_sub_pkt(&self) -> bool {
        self.is_sub_pkt
    }

    /// Flags an already-allocated packet as a sub-packet in place, without
    /// reassigning its id — used by the packing shim, whose trailing members
    /// are the caller's own in-flight packets rather than new allocations.
    pub fn mark_sub_pkt(&mut self) {
        self.is_sub_pkt = true;
    }

    /// The tick this packet was originally sent.
    #[must_use]
    pub const fn sent(&self) -> Tick {
        self.sent
    }

    /// The tick this packet most recently arrived at a device.
    #[must_use]
    pub const fn arrive(&self) -> Tick {
        self.arrive
    }

    /// Records the packet's arrival at its current hop. Clamped to never
    /// move earlier than `sent`, matching the original constructor's
    /// `arrive(std::max(sent, arrive))`.
    pub fn set_arrive(&mut self, tick: Tick) {
        self.arrive = tick.max(self.sent);
    }
}

/// Per-packet accumulated latency, keyed by [`StatKind`].
///
/// One row is created per packet id at construction time and never removed;
/// `fabric-config`'s CSV sink reads the completed table back out after the
/// run to produce the per-packet trace (spec.md §6).
#[derive(Debug, Default)]
pub struct StatTable {
    rows: HashMap<PktId, HashMap<StatKind, f64>>,
}

impl StatTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a row exists for `id`, creating an all-zero row if absent.
    pub fn ensure_row(&mut self, id: PktId) {
        self.rows.entry(id).or_default();
    }

    /// Adds `delta` to `kind`'s accumulator in `id`'s row, creating the row
    /// if it doesn't exist yet.
    pub fn add(&mut self, id: PktId, kind: StatKind, delta: f64) {
        *self.rows.entry(id).or_default().entry(kind).or_insert(0.0) += delta;
    }

    /// Reads back the accumulated value for `kind` in `id`'s row (zero if
    /// never recorded).
    #[must_use]
    pub fn get(&self, id: PktId, kind: StatKind) -> f64 {
        self.rows
            .get(&id)
            .and_then(|row| row.get(&kind))
            .copied()
            .unwrap_or(0.0)
    }

    /// The sum across every [`StatKind`] for a packet — its total recorded
    /// latency.
    #[must_use]
    pub fn total(&self, id: PktId) -> f64 {
        self.rows
            .get(&id)
            .map(|row| row.values().sum())
            .unwrap_or(0.0)
    }

    /// Iterates every recorded packet id and its row, in no particular
    /// order; callers that need CSV-stable order should sort by [`PktId`]
    /// themselves.
    pub fn rows(&self) -> impl Iterator<Item = (PktId, &HashMap<StatKind, f64>)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_partition_the_type_space() {
        assert!(PacketType::Rd.is_read());
        assert!(PacketType::NtRd.is_read());
        assert!(!PacketType::Wt.is_read());

        assert!(PacketType::Wt.is_write());
        assert!(PacketType::NtWt.is_write());
        assert!(!PacketType::Rd.is_write());

        assert!(PacketType::Rd.is_coherent());
        assert!(PacketType::Wt.is_coherent());
        assert!(!PacketType::Inv.is_coherent());
        assert!(!PacketType::NtRd.is_coherent());
        assert!(!PacketType::NtWt.is_coherent());
        assert!(!PacketType::Corrupt.is_coherent());
    }

    #[test]
    fn turn_around_swaps_src_and_dst_and_marks_response() {
        let alloc = PktIdAllocator::new();
        let mut pkt = Packet::new(&alloc, PacketType::Rd, TopoId(1), TopoId(2), 0x1000, 64, 0);
        pkt.turn_around();
        assert_eq!(pkt.src(), TopoId(2));
        assert_eq!(pkt.dst(), TopoId(1));
        assert!(pkt.is_rsp());
    }

    #[test]
    fn set_arrive_never_moves_before_sent() {
        let alloc = PktIdAllocator::new();
        let mut pkt = Packet::new(&alloc, PacketType::Rd, TopoId(0), TopoId(1), 0, 64, 100);
        pkt.set_arrive(50);
        assert_eq!(pkt.arrive(), 100);
        pkt.set_arrive(150);
        assert_eq!(pkt.arrive(), 150);
    }

    #[test]
    fn stat_table_accumulates_per_kind() {
        let alloc = PktIdAllocator::new();
        let pkt = Packet::new(&alloc, PacketType::Rd, TopoId(0), TopoId(1), 0, 64, 0);
        let mut stats = StatTable::new();
        stats.add(pkt.id(), StatKind::BusTime, 10.0);
        stats.add(pkt.id(), StatKind::BusTime, 5.0);
        stats.add(pkt.id(), StatKind::SwitchTime, 2.0);
        assert!((stats.get(pkt.id(), StatKind::BusTime) - 15.0).abs() < f64::EPSILON);
        assert!((stats.total(pkt.id()) - 17.0).abs() < f64::EPSILON);
    }
}
