//! Callbacks command - correlate host callback registrations and cancels

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use ttdlog_core::{EventLog, EventPayload};

use crate::load::load_event_log;

/// Arguments for the callbacks command
#[derive(Args)]
pub struct CallbacksArgs {
    /// Log file (.bin)
    pub log: PathBuf,

    /// Only show this callback id
    #[arg(long)]
    pub id: Option<i64>,
}

/// Lifetime of one host callback in the log
#[derive(Debug, PartialEq)]
pub struct CallbackHistory {
    pub callback_id: i64,
    pub registered_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub repeating: bool,
    /// Event times of top-level calls made for this callback
    pub invocations: Vec<i64>,
}

/// Callback ids in order of first appearance
fn callback_ids(log: &EventLog) -> Vec<i64> {
    let mut ids = Vec::new();
    for entry in log.events().iter() {
        if let EventPayload::CallbackOperation(data) = &entry.payload
            && !ids.contains(&data.callback_id)
        {
            ids.push(data.callback_id);
        }
    }
    ids
}

pub fn callback_history(log: &EventLog, callback_id: i64) -> CallbackHistory {
    let register = log.event_for_host_callback_id(true, callback_id);
    let cancel = log.event_for_host_callback_id(false, callback_id);
    let invocations = log
        .events()
        .iter()
        .filter_map(|entry| match &entry.payload {
            EventPayload::CallFunction(data)
                if data.root_depth == 0 && data.host_callback_id == callback_id =>
            {
                Some(entry.event_time)
            }
            _ => None,
        })
        .collect();
    CallbackHistory {
        callback_id,
        registered_at: register.map(|(time, _)| time),
        cancelled_at: cancel.map(|(time, _)| time),
        repeating: register.is_some_and(|(_, data)| data.is_repeating),
        invocations,
    }
}

/// Execute the callbacks command
pub fn execute(args: CallbacksArgs) -> Result<()> {
    let log = load_event_log(&args.log)?;
    let ids = match args.id {
        Some(id) => vec![id],
        None => callback_ids(&log),
    };

    if ids.is_empty() {
        println!("No host callbacks recorded.");
        return Ok(());
    }

    for id in ids {
        let history = callback_history(&log, id);
        let fmt_time = |time: Option<i64>| time.map_or_else(|| "-".to_string(), |t| t.to_string());
        println!(
            "callback {:>6}  registered@{:<8} cancelled@{:<8} calls={}{}",
            history.callback_id,
            fmt_time(history.registered_at),
            fmt_time(history.cancelled_at),
            history.invocations.len(),
            if history.repeating { "  repeating" } else { "" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::test_utils::write_sample_log;

    #[test]
    fn test_callback_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_log(dir.path());
        let log = load_event_log(&path).unwrap();

        assert_eq!(callback_ids(&log), vec![7]);
        let history = callback_history(&log, 7);
        assert_eq!(history.registered_at, Some(1));
        assert_eq!(history.cancelled_at, Some(3));
        assert!(!history.repeating);
        assert!(history.invocations.is_empty());
    }

    #[test]
    fn test_unknown_callback() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_log(dir.path());
        let log = load_event_log(&path).unwrap();

        let history = callback_history(&log, 99);
        assert_eq!(history.registered_at, None);
        assert_eq!(history.cancelled_at, None);
    }
}
