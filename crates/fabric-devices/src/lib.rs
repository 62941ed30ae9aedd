// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! fabric-devices: the concrete [`fabric_core::Device`] implementations
//! that make up a memory fabric — links, switches, the packing and burst
//! shims, the coherence filter, the DRAM adapter, and the traffic
//! generators that drive them.
//!
//! Each module is grounded on one header from `original_source/`; see
//! each module's doc comment for its source.
#![forbid(unsafe_code)]

mod buffer;
mod burst;
mod bus;
mod dram;
mod error;
mod packing;
mod requester;
mod switch;

pub mod snoop;

/// Capacity-bounded per-device request/response admission queue.
pub use buffer::{BufferConfig, DeviceBuffer};
/// Burst request splitter / response rejoiner.
pub use burst::BurstHandler;
/// The point-to-point duplex link.
pub use bus::{DuplexBus, DuplexBusConfig};
/// The DRAM adapter contract and its reference fixed-latency backend.
pub use dram::{DramAdapter, DramAdapterConfig, DramBackend, FixedLatencyBackend};
/// Setup-time device construction failures.
pub use error::DevicesError;
/// The multi-packet coalescing shim.
pub use packing::{Packing, PackingConfig};
/// The traffic-generating host.
pub use requester::{Requester, RequesterConfig};
/// The set-associative coherence filter.
pub use snoop::{Snoop, SnoopConfig};
/// The round-robin arbitrating switch.
pub use switch::{Switch, SwitchConfig};
