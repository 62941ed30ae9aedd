// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The per-packet CSV trace and the end-of-run human-readable stats block
//! (spec.md §6).
//!
//! Grounded on `original_source/main.cpp`'s `pkt_logger` lambda, which
//! builds exactly this row shape from a completed packet's `dst`/`src` (the
//! host and memory device once a response has turned the packet around) and
//! its `PktStatsTable` row.

use std::io::Write;

use fabric_core::{CompletedRequest, Context, PacketType, StatKind};

/// CSV header, column order fixed by spec.md §6.
pub const CSV_HEADER: &str = "id,host,type_name,mem_id,addr,sent,arrive,\
device_process_time,dram_q_time,dram_time,framing_time,packaging_delay,\
wait_burst,bus_q_time,bus_time,switch_q_time,switch_time,snoop_evict_time,\
host_inv_time,total_time";

/// The human-readable `type_name` column value for a packet type, matching
/// `original_source/def.hpp`'s `TypeName::of` (spec.md §6 reaffirms the
/// same six strings, correcting the original's `*Corruptted*` typo to
/// `*Corrupted*`).
#[must_use]
pub fn type_name(ty: PacketType) -> &'static str {
    match ty {
        PacketType::Rd => "Read",
        PacketType::NtRd => "Non-temporal read",
        PacketType::Wt => "Write",
        PacketType::NtWt => "Non-temporal write",
        PacketType::Inv => "Invalidate",
        PacketType::Corrupt => "*Corrupted*",
    }
}

fn csv_row(ctx: &Context, row: &CompletedRequest) -> String {
    let stat = |kind: StatKind| ctx.stats().get(row.id, kind);
    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        row.id,
        row.host,
        type_name(row.ty),
        row.mem_id,
        row.addr,
        row.sent,
        row.arrive,
        stat(StatKind::DeviceProcessTime),
        stat(StatKind::DramInterfaceQueuingDelay),
        stat(StatKind::DramTime),
        stat(StatKind::FramingTime),
        stat(StatKind::PackagingDelay),
        stat(StatKind::WaitAllBurst),
        stat(StatKind::BusQueueDelay),
        stat(StatKind::BusTime),
        stat(StatKind::SwitchQueueDelay),
        stat(StatKind::SwitchTime),
        stat(StatKind::SnoopEvictDelay),
        stat(StatKind::HostInvDelay),
        row.arrive.saturating_sub(row.sent),
    )
}

/// Writes the per-packet CSV trace (header plus one row per completed
/// top-level request) to `out`.
///
/// # Errors
/// Propagates any I/O failure writing to `out`.
pub fn write_csv(ctx: &Context, out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "{CSV_HEADER}")?;
    for row in ctx.completed_requests() {
        writeln!(out, "{}", csv_row(ctx, row))?;
    }
    Ok(())
}

/// Renders every registered device's end-of-run stat lines as an aligned
/// table, one row per line (spec.md §6 "Per-device stats"). Each device's
/// own `log_stats()` already produces a multi-line block; this just collects
/// them device by device in [`fabric_core::TopoId`] (registration) order.
#[must_use]
pub fn render_device_stats(ctx: &Context) -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    table.set_header(vec!["Device", "Stat"]);
    for (id, lines) in ctx.device_stats() {
        let name = ctx.device_name(id).unwrap_or("?").to_string();
        if lines.is_empty() {
            continue;
        }
        for line in lines {
            table.add_row(vec![name.clone(), line]);
        }
    }
    table
}
