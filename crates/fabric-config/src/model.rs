// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The TOML document shape: spec.md §6's `general`/`devices`/`edges`
//! sections plus one untyped block per device name, resolved against its
//! declared `type` at build time.

use std::collections::HashMap;

use serde::Deserialize;

use fabric_core::Addr;

/// `general`: run-wide knobs not owned by any one device.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Engine tick the run stops at if the event queue hasn't already drained.
    pub max_clock: u64,
    /// Engine ticks per DRAM backend clock cycle tick, mirrored onto every
    /// `dram`/`ssd` device's own `tick_per_clock` unless the device block
    /// overrides it.
    pub clock_granu: u64,
    /// Path the per-packet CSV log is written to.
    pub log_name: String,
    /// Tracing verbosity.
    pub log_level: LogLevel,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            max_clock: 1_000_000,
            clock_granu: 1,
            log_name: "fabric.csv".to_string(),
            log_level: LogLevel::Info,
        }
    }
}

/// Maps onto a `tracing` level filter; `Temp` is the original Xerxes
/// logger's level between `Info` and `Debug`, carried here as a distinct
/// variant and mapped onto `tracing::Level::DEBUG` under its own target so
/// it can still be filtered independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// No tracing output at all.
    None,
    /// Coarse run progress.
    Info,
    /// The original logger's level between `Info` and `Debug`.
    Temp,
    /// Per-packet, per-device detail.
    Debug,
    /// Recoverable anomalies worth flagging.
    Warning,
    /// Unrecoverable anomalies (still followed by a panic, not silent exit).
    Error,
}

/// Recognized `devices` map values (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// A [`fabric_devices::Requester`] traffic generator.
    Host,
    /// A [`fabric_devices::Switch`].
    Switch,
    /// A [`fabric_devices::DuplexBus`].
    Bus,
    /// A [`fabric_devices::Snoop`] coherence filter.
    Snoop,
    /// A [`fabric_devices::Packing`] coalescing shim.
    Packing,
    /// A [`fabric_devices::BurstHandler`].
    Burst,
    /// A [`fabric_devices::DramAdapter`] over DRAM timing.
    Dram,
    /// A [`fabric_devices::DramAdapter`] over SSD timing — same adapter
    /// contract as `dram`; see DESIGN.md's Open Question resolution.
    Ssd,
}

/// One `edges` entry: an undirected link between two named devices.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    /// The first endpoint's device name.
    pub from: String,
    /// The second endpoint's device name.
    pub to: String,
}

/// One entry in a `host` block's `endpoints` list: a memory target this
/// requester can issue to.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// The target device's name (must resolve to a `dram`/`ssd`/other
    /// device elsewhere in `devices`).
    pub target_name: String,
    /// Base address of this endpoint's window into the target.
    pub start_addr: Addr,
    /// Size of this endpoint's address window.
    pub capacity: u64,
    /// Fraction of requests to this endpoint that are writes, in `[0, 1]`.
    pub write_ratio: f64,
}

/// A `host` block: [`fabric_devices::RequesterConfig`]'s fields plus the
/// `endpoints` list spec.md §6 documents, which names other devices and so
/// can't live inside `fabric_devices::RequesterConfig` itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Flattened onto [`fabric_devices::RequesterConfig`] at build time.
    #[serde(flatten)]
    pub requester: fabric_devices::RequesterConfig,
    /// Targets this host may issue requests to.
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            requester: fabric_devices::RequesterConfig::default(),
            endpoints: Vec::new(),
        }
    }
}

/// The full parsed document: the three required sections plus one untyped
/// block per device name, resolved against `devices[name]` at build time.
#[derive(Debug, Clone, Deserialize)]
pub struct FabricConfig {
    /// Run-wide knobs.
    pub general: GeneralConfig,
    /// Device name → type.
    pub devices: HashMap<String, DeviceType>,
    /// Undirected topology edges.
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
    /// Every top-level table not already captured above, keyed by device
    /// name — the per-device config block spec.md §6 describes. Devices with
    /// no block (e.g. a `switch` happy with defaults) simply have no entry
    /// here.
    #[serde(flatten)]
    pub device_blocks: HashMap<String, toml::Value>,
}
