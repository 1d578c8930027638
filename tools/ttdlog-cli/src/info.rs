//! Info command - header and summary counts of a log file

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use ttdlog_core::{ActionStatus, EventKind, LogBody, LogFlags, LogHeader};

use crate::load::read_log_file;

/// Arguments for the info command
#[derive(Args)]
pub struct InfoArgs {
    /// Log file (.bin)
    pub log: PathBuf,

    /// Also count entries per kind
    #[arg(long)]
    pub kinds: bool,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Summary of a log body
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct LogSummary {
    pub entries: usize,
    pub first_event_time: Option<i64>,
    pub last_event_time: Option<i64>,
    pub top_level_calls: usize,
    pub abandoned: usize,
    pub pending: usize,
    pub snapshots: usize,
    pub snapshot_bytes: usize,
    pub by_kind: BTreeMap<EventKind, usize>,
}

impl LogSummary {
    pub fn from_body(body: &LogBody) -> Self {
        let mut summary = Self {
            entries: body.entries.len(),
            first_event_time: body.entries.first().map(|e| e.event_time),
            last_event_time: body.entries.last().map(|e| e.event_time),
            snapshots: body.snapshots.len(),
            snapshot_bytes: body.snapshots.iter().map(|s| s.len()).sum(),
            ..Self::default()
        };
        for entry in &body.entries {
            *summary.by_kind.entry(entry.kind).or_default() += 1;
            match entry.status {
                ActionStatus::Abandoned => summary.abandoned += 1,
                ActionStatus::Pending => summary.pending += 1,
                ActionStatus::Complete => {}
            }
            if let ttdlog_core::EventPayload::CallFunction(data) = &entry.payload
                && entry.kind == EventKind::CallExistingFunction
                && data.root_depth == 0
            {
                summary.top_level_calls += 1;
            }
        }
        summary
    }
}

/// Execute the info command
pub fn execute(args: InfoArgs) -> Result<()> {
    let (header, body) = read_log_file(&args.log)?;
    let summary = LogSummary::from_body(&body);

    if args.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?;
        println!("{}", json);
        return Ok(());
    }

    println!("=== Time Travel Log ===");
    print_header(&header);
    println!();
    println!("Entries: {}", summary.entries);
    match (summary.first_event_time, summary.last_event_time) {
        (Some(first), Some(last)) => println!("Event times: {}..={}", first, last),
        _ => println!("Event times: (empty)"),
    }
    println!("Top-level calls: {}", summary.top_level_calls);
    if summary.abandoned > 0 {
        println!("Abandoned actions: {}", summary.abandoned);
    }
    if summary.pending > 0 {
        println!("Pending actions: {}", summary.pending);
    }
    println!(
        "Snapshots: {} ({} bytes)",
        summary.snapshots, summary.snapshot_bytes
    );
    println!("Property records: {}", body.property_records.len());
    println!("Top-level scripts: {}", body.top_level_scripts.len());

    if args.kinds {
        println!();
        println!("=== Entries by Kind ===");
        for (kind, count) in &summary.by_kind {
            println!("  {:<36} {}", format!("{:?}", kind), count);
        }
    }

    Ok(())
}

fn print_header(header: &LogHeader) {
    println!("Version: {}", header.version);
    println!(
        "Compressed: {}",
        if header.flags.contains(LogFlags::COMPRESSED) {
            "yes"
        } else {
            "no"
        }
    );
    println!("Last recorded event time: {}", header.last_event_time);
}
