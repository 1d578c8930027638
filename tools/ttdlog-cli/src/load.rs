//! Log file loading shared by the commands

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ttdlog_core::{EventLog, LogBody, LogHeader, LogReader, TtdConfig};

/// Read the raw header and body of a log file
pub fn read_log_file(path: &Path) -> Result<(LogHeader, LogBody)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    LogReader::new(BufReader::new(file))
        .read_log()
        .with_context(|| format!("Failed to read log: {}", path.display()))
}

/// Load a log file into an event log without entering replay
pub fn load_event_log(path: &Path) -> Result<EventLog> {
    let mut log = EventLog::new(TtdConfig::default());
    log.parse_log_into(path)
        .with_context(|| format!("Failed to load log: {}", path.display()))?;
    Ok(log)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_utils::write_sample_log(dir.path());
        let (header, body) = read_log_file(&path).unwrap();
        assert_eq!(header.entry_count, 4);
        assert_eq!(header.last_event_time, 3);
        assert_eq!(body.entries.len(), 4);
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.bin");
        let err = read_log_file(&missing).unwrap_err();
        assert!(err.to_string().contains("missing.bin"));
    }
}
