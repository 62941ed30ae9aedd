// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config and System-build failures — spec.md §7's "config error" and
//! "routing error" taxonomy.

use fabric_core::TopoId;
use fabric_devices::DevicesError;
use thiserror::Error;

/// Failures loading a TOML document or wiring it into a running [`fabric_core::Context`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document isn't valid TOML.
    #[error("malformed config: {0}")]
    Malformed(#[from] toml::de::Error),
    /// An edge or endpoint referenced a device name that isn't in `devices`.
    #[error("dangling reference to device {0:?}")]
    DanglingReference(String),
    /// `devices` named a `type` outside spec.md §6's recognized set.
    #[error("unknown device type: {0}")]
    UnknownDeviceType(String),
    /// A per-device config block was missing for a device that requires one.
    #[error("missing config block for device {0:?}")]
    MissingDeviceConfig(String),
    /// A device failed to construct from its (otherwise well-formed) config block.
    #[error("device {name:?} failed to construct: {source}")]
    DeviceConstruction {
        /// The device's configured name.
        name: String,
        /// The underlying construction failure.
        #[source]
        source: DevicesError,
    },
    /// No route exists between two devices joined by an `edges` entry — only
    /// surfaces if the topology graph itself rejects the edge (self-loop,
    /// out-of-range node).
    #[error("routing error: no path from {from} to {to}")]
    Unreachable {
        /// The edge's `from` endpoint.
        from: TopoId,
        /// The edge's `to` endpoint.
        to: TopoId,
    },
    /// Couldn't read the config document from disk.
    #[error("cannot read config file {path:?}: {source}")]
    Io {
        /// The path that was attempted.
        path: String,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}
