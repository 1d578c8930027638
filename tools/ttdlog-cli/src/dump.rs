//! Dump command - print log entries

use anyhow::{Context, Result};
use clap::Args;
use std::io::Write;
use std::path::PathBuf;

use ttdlog_core::{EventLogEntry, EventPayload};

use crate::load::read_log_file;

/// Arguments for the dump command
#[derive(Args)]
pub struct DumpArgs {
    /// Log file (.bin)
    pub log: PathBuf,

    /// First event time to print
    #[arg(long)]
    pub from: Option<i64>,

    /// Last event time to print (inclusive)
    #[arg(long)]
    pub to: Option<i64>,

    /// Print one JSON object per line
    #[arg(long)]
    pub json: bool,
}

/// Entries whose event time falls in `from..=to`
pub fn entries_in_range(
    entries: &[EventLogEntry],
    from: Option<i64>,
    to: Option<i64>,
) -> impl Iterator<Item = &EventLogEntry> {
    let from = from.unwrap_or(i64::MIN);
    let to = to.unwrap_or(i64::MAX);
    entries
        .iter()
        .filter(move |entry| (from..=to).contains(&entry.event_time))
}

/// Execute the dump command
pub fn execute(args: DumpArgs) -> Result<()> {
    if let (Some(from), Some(to)) = (args.from, args.to)
        && from > to
    {
        anyhow::bail!("--from {} is after --to {}", from, to);
    }

    let (_, body) = read_log_file(&args.log)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for entry in entries_in_range(&body.entries, args.from, args.to) {
        if args.json {
            serde_json::to_writer(&mut out, entry).context("Failed to serialize entry")?;
            writeln!(out)?;
        } else {
            writeln!(out, "{}", describe_entry(entry))?;
        }
    }

    Ok(())
}

/// One-line human readable form of an entry
pub fn describe_entry(entry: &EventLogEntry) -> String {
    let marker = if entry.is_root() { '*' } else { ' ' };
    let mut line = format!(
        "{:>8} {} {:?} [{:?}]",
        entry.event_time, marker, entry.kind, entry.status
    );
    let detail = match &entry.payload {
        EventPayload::DateTime { time } => Some(format!("time={}", time)),
        EventPayload::DateString { value } => Some(format!("value={:?}", value)),
        EventPayload::Telemetry { info, .. } => Some(format!("info={:?}", info)),
        EventPayload::Snapshot { checksum, ready_to_run } => Some(format!(
            "checksum={:016x}{}",
            checksum,
            if *ready_to_run { " rtr" } else { "" }
        )),
        EventPayload::CallFunction(data) => Some(format!(
            "depth={} callback={} nested..={}",
            data.root_depth, data.host_callback_id, data.last_nested_event_time
        )),
        EventPayload::CallbackOperation(data) => Some(format!(
            "id={} create={} cancel={} registered@{}",
            data.callback_id, data.is_create, data.is_cancel, data.register_event_time
        )),
        _ => entry.payload.result().map(|var| format!("result={}", var.0)),
    };
    if let Some(detail) = detail {
        line.push_str("  ");
        line.push_str(&detail);
    }
    line
}
