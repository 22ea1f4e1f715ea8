//! Per-session transcript files.
//!
//! When a transcript directory is configured, every lifecycle step of a
//! session is appended to `{dir}/{session_id}.log`. This sits beside the
//! process-wide `log` output and is meant for auditing a single pairing.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{SecondsFormat, Utc};

/// Thread-safe handle to an append-only transcript. `None` inside means
/// transcripts are disabled and writes are dropped.
pub type TranscriptHandle = Arc<Mutex<Option<File>>>;

/// Current UTC time as RFC 3339 with milliseconds, e.g. `2026-02-04T10:15:30.123Z`.
fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Append a timestamped line.
pub fn log_line(handle: &TranscriptHandle, stage: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let _ = writeln!(file, "[{}] {}: {}", utc_timestamp(), stage, data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) `{dir}/{session_id}.log`. Any failure yields a disabled handle.
pub fn open_transcript(dir: Option<&Path>, session_id: &str) -> TranscriptHandle {
    let file = dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{}.log", session_id)))
            .ok()
    });
    Arc::new(Mutex::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn utc_timestamp_format() {
        let ts = utc_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), 24);
        assert_eq!(&ts[10..11], "T");
        assert_eq!(&ts[19..20], ".");
    }

    #[test]
    fn open_transcript_creates_file() {
        let dir = tempdir().unwrap();
        let handle = open_transcript(Some(dir.path()), "session-1");
        assert!(handle.lock().unwrap().is_some());
        assert!(dir.path().join("session-1.log").exists());
    }

    #[test]
    fn open_transcript_without_dir_is_disabled() {
        let handle = open_transcript(None, "session-1");
        assert!(handle.lock().unwrap().is_none());
    }

    #[test]
    fn log_line_appends() {
        let dir = tempdir().unwrap();
        let handle = open_transcript(Some(dir.path()), "session-1");

        log_line(&handle, "STATUS", "code_sent");
        log_line(&handle, "EVENT", "open");

        let contents = std::fs::read_to_string(dir.path().join("session-1.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("STATUS: code_sent"));
        assert!(lines[1].ends_with("EVENT: open"));
    }

    #[test]
    fn log_line_on_disabled_handle_is_a_no_op() {
        let handle: TranscriptHandle = Arc::new(Mutex::new(None));
        log_line(&handle, "STATUS", "closed");
    }
}
