// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! fabric-core: discrete-event scheduling kernel, topology, and packet
//! model for the memory fabric simulator.
//!
//! This crate is deliberately silent on what a "device" *does* — it only
//! provides the [`Tick`]-ordered event queue, the routing graph, the packet
//! envelope and its per-packet stat table, and the [`Context`] that ties
//! them together. Concrete devices (buses, switches, the snoop filter, the
//! DRAM adapter, requesters) live in `fabric-devices` and implement the
//! [`Device`] trait exported here.
#![forbid(unsafe_code)]

mod device;
mod engine;
mod error;
mod ident;
mod packet;
mod timeline;
mod topology;

/// The device trait and the owning context devices are driven through.
pub use device::{CompletedRequest, Context, Device};
/// The scheduling kernel's event queue and scheduled-callback type.
pub use engine::{EventEngine, Thunk};
/// Recoverable error conditions raised by routing and device lookup.
pub use error::CoreError;
/// Dense identifier newtypes and the process-wide packet id allocator.
pub use ident::{Addr, PktId, PktIdAllocator, Tick, TopoId};
/// The packet envelope, its operation-type tag, and the per-packet stat
/// accumulator table.
pub use packet::{Packet, PacketType, StatKind, StatTable};
/// The earliest-fit interval allocator shared by serialized-resource
/// devices.
pub use timeline::Timeline;
/// The connectivity graph and its derived routing tables.
pub use topology::Topology;
