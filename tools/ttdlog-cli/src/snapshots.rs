//! Snapshots command - list snapshots and verify checksums

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use ttdlog_core::{EventKind, EventPayload, LogBody};

use crate::load::read_log_file;

/// Arguments for the snapshots command
#[derive(Args)]
pub struct SnapshotsArgs {
    /// Log file (.bin)
    pub log: PathBuf,
}

/// Verification result for one snapshot
#[derive(Debug, PartialEq)]
pub struct SnapshotReport {
    pub event_time: i64,
    pub bytes: usize,
    pub ready_to_run: bool,
    /// Data still hashes to the stored checksum
    pub checksum_ok: bool,
    /// A snapshot entry with a matching checksum exists at this time.
    /// Ready-to-run snapshots have no entry of their own.
    pub entry_ok: bool,
}

pub fn verify_snapshots(body: &LogBody) -> Vec<SnapshotReport> {
    body.snapshots
        .iter()
        .map(|snap| {
            let entry = body
                .entries
                .binary_search_by_key(&snap.event_time, |e| e.event_time)
                .ok()
                .map(|index| &body.entries[index]);
            let entry_ok = match entry {
                Some(entry) if entry.kind == EventKind::Snapshot => matches!(
                    entry.payload,
                    EventPayload::Snapshot { checksum, .. } if checksum == snap.checksum
                ),
                Some(entry) => snap.ready_to_run && entry.kind == EventKind::CallExistingFunction,
                None => false,
            };
            SnapshotReport {
                event_time: snap.event_time,
                bytes: snap.len(),
                ready_to_run: snap.ready_to_run,
                checksum_ok: snap.verify(),
                entry_ok,
            }
        })
        .collect()
}

/// Execute the snapshots command
pub fn execute(args: SnapshotsArgs) -> Result<()> {
    let (_, body) = read_log_file(&args.log)?;
    let reports = verify_snapshots(&body);

    println!("=== Snapshots ({}) ===", reports.len());
    for report in &reports {
        println!(
            "  {:>8}  {:>10} bytes{}{}",
            report.event_time,
            report.bytes,
            if report.ready_to_run { "  rtr" } else { "" },
            match (report.checksum_ok, report.entry_ok) {
                (true, true) => "",
                (false, _) => "  CHECKSUM MISMATCH",
                (true, false) => "  NO MATCHING ENTRY",
            }
        );
    }

    let bad = reports
        .iter()
        .filter(|r| !r.checksum_ok || !r.entry_ok)
        .count();
    if bad > 0 {
        anyhow::bail!("{} damaged snapshot(s)", bad);
    }
    Ok(())
}
