// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `fabric-sim`: the standalone driver binary.
//!
//! Grounded on `original_source/main.cc`: parse a config, wire a
//! [`fabric_core::Context`], kick every host's initial issue event, run the
//! event loop up to `general.max_clock`, then write the per-packet CSV trace
//! and print the end-of-run per-device stats table.
#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;

use fabric_config::{build_context, host_ids, render_device_stats, write_csv, FabricConfig, LogLevel};

/// Discrete-event simulator for a memory/storage fabric.
#[derive(Debug, Parser)]
#[command(name = "fabric-sim", version, about)]
struct Args {
    /// Path to the TOML fabric configuration.
    config: PathBuf,
}

/// Maps `general.log_level` onto a `tracing` filter. `Temp` sits between
/// `Info` and `Debug` in the original Xerxes logger; here it's just `Debug`
/// scoped to this crate's own target, so a config that asks for `Temp`
/// doesn't also turn on debug logging from every dependency.
fn init_tracing(level: LogLevel) {
    let filter = match level {
        LogLevel::None => "off",
        LogLevel::Error => "error",
        LogLevel::Warning => "warn",
        LogLevel::Info => "info",
        LogLevel::Temp => "fabric_cli=debug,warn",
        LogLevel::Debug => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

fn run(args: &Args) -> anyhow::Result<()> {
    let text = fs::read_to_string(&args.config)
        .with_context(|| format!("reading config {}", args.config.display()))?;
    let config: FabricConfig = toml::from_str(&text)
        .with_context(|| format!("parsing config {}", args.config.display()))?;

    init_tracing(config.general.log_level);
    info!(path = %args.config.display(), "loaded config");

    let mut ctx = build_context(&config).context("building fabric from config")?;

    for id in host_ids(&config) {
        ctx.schedule_event(id, 0, 0);
    }

    info!(max_clock = config.general.max_clock, "starting simulation");
    while ctx.now() < config.general.max_clock {
        if ctx.step().is_none() {
            break;
        }
    }
    info!(ticks = ctx.now(), "simulation finished");

    let mut out = fs::File::create(&config.general.log_name)
        .with_context(|| format!("creating log file {}", config.general.log_name))?;
    write_csv(&ctx, &mut out).context("writing CSV trace")?;

    println!("{}", render_device_stats(&ctx));
    println!("Wrote {} packet(s) to {}", ctx.completed_requests().len(), config.general.log_name);

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
