//! Append-only transfer history, one JSON object per line, kept next
//! to the received content.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Complete,
    Cancelled,
    Failed,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub session_id: String,
    pub name: String,
    pub direction: String,
    pub status: HistoryStatus,
    pub bytes: u64,
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn now(
        session_id: String,
        name: String,
        direction: String,
        status: HistoryStatus,
        bytes: u64,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            session_id,
            name,
            direction,
            status,
            bytes,
            error,
        }
    }
}

pub struct TransferHistory {
    history_path: PathBuf,
}

impl TransferHistory {
    pub fn new(save_root: &Path) -> Self {
        let history_path = save_root.join(".lanbeam_history.jsonl");
        TransferHistory { history_path }
    }

    pub fn add_entry(&self, entry: &HistoryEntry) -> Result<()> {
        if let Some(parent) = self.history_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
            .context("open transfer history file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        if !self.history_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.history_path).context("open transfer history for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let history = TransferHistory::new(dir.path());
        assert!(history.read_all().unwrap().is_empty());

        history
            .add_entry(&HistoryEntry::now(
                "id-1".into(),
                "a.txt".into(),
                "receive".into(),
                HistoryStatus::Complete,
                1234,
                None,
            ))
            .unwrap();
        history
            .add_entry(&HistoryEntry::now(
                "id-2".into(),
                "b.txt".into(),
                "send".into(),
                HistoryStatus::Failed,
                0,
                Some("disk full".into()),
            ))
            .unwrap();

        let entries = history.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, HistoryStatus::Complete);
        assert_eq!(entries[1].error.as_deref(), Some("disk full"));
    }
}
