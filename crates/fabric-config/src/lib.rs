// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! fabric-config: the TOML document shape (spec.md §6), the System builder
//! that wires a parsed config into a running [`fabric_core::Context`], and
//! the per-packet CSV / end-of-run stats reporting.
#![forbid(unsafe_code)]

mod build;
mod error;
mod log;
mod model;

/// Wires a parsed [`FabricConfig`] into a ready-to-run [`fabric_core::Context`].
/// `host_ids` recovers the [`fabric_core::TopoId`]s `build_context` assigned
/// to every `host`-typed device, for firing their initial issue events.
pub use build::{build_context, host_ids};
/// Config and System-build failures.
pub use error::ConfigError;
/// The CSV trace header, per-packet row formatting, and device-stats table
/// rendering.
pub use log::{render_device_stats, type_name, write_csv, CSV_HEADER};
/// The TOML document shape: `general`, `devices`, `edges`, and per-device
/// blocks.
pub use model::{DeviceType, EdgeConfig, EndpointConfig, FabricConfig, GeneralConfig, HostConfig, LogLevel};
