//! Journal Write-Ahead Log
//!
//! Append-only JSON-lines file of journal entry snapshots. Every insert and
//! every change appends the whole entry, flushed and synced before the call
//! returns. On open the highest revision of each transfer wins, so lines
//! written out of order by racing tasks replay correctly.
//!
//! Compaction rewrites the file with the live entries only (after purging
//! settled transfers, and once at open).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::journal::JournalEntry;
use super::types::TransferId;

#[derive(Debug)]
pub struct JournalWal {
    path: PathBuf,
    writer: BufWriter<File>,
    total_entries: u64,
}

impl JournalWal {
    /// Open the log, creating it and its parent directory if needed
    ///
    /// Returns the writer and the latest revision of every journaled transfer.
    pub fn open(path: impl AsRef<Path>) -> io::Result<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let entries = replay(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut wal = Self {
            path,
            writer: BufWriter::new(file),
            total_entries: 0,
        };
        // Drop superseded revisions left by the previous run
        wal.compact(&entries)?;

        info!(
            path = %wal.path.display(),
            transfers = entries.len(),
            "Journal log opened"
        );
        Ok((wal, entries))
    }

    /// Append one entry snapshot and sync it to disk
    pub fn append(&mut self, entry: &JournalEntry) -> io::Result<()> {
        let mut line = serde_json::to_string(entry).map_err(io::Error::other)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.total_entries += 1;
        Ok(())
    }

    /// Replace the log with exactly `entries`
    ///
    /// Written to a sibling file and renamed over the log, so a crash leaves
    /// either the old or the new file.
    pub fn compact(&mut self, entries: &[JournalEntry]) -> io::Result<()> {
        let tmp = self.path.with_extension("compact");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for entry in entries {
                serde_json::to_writer(&mut out, entry).map_err(io::Error::other)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            out.get_ref().sync_data()?;
        }
        fs::rename(&tmp, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.total_entries = entries.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines in the file since the last compaction
    pub fn total_entries(&self) -> u64 {
        self.total_entries
    }
}

/// Latest revision per transfer; a torn or unreadable line is skipped
fn replay(path: &Path) -> io::Result<Vec<JournalEntry>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut latest: HashMap<TransferId, JournalEntry> = HashMap::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(line = n + 1, error = %e, "Skipping undecodable journal line");
                continue;
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(&line) {
            Ok(entry) => match latest.get(&entry.transfer_id) {
                Some(seen) if seen.revision >= entry.revision => {}
                _ => {
                    latest.insert(entry.transfer_id, entry);
                }
            },
            Err(e) => warn!(line = n + 1, error = %e, "Skipping unreadable journal line"),
        }
    }

    let mut entries: Vec<JournalEntry> = latest.into_values().collect();
    entries.sort_by_key(|e| e.created_at);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::journal::tests::sample_entry;
    use crate::ledger::state::TransferState;

    #[test]
    fn test_reopen_keeps_latest_revision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("journal.wal");

        let mut entry = sample_entry();
        {
            let (mut wal, loaded) = JournalWal::open(&path).unwrap();
            assert!(loaded.is_empty());
            wal.append(&entry).unwrap();
            entry.state = TransferState::Debited;
            entry.revision = 1;
            wal.append(&entry).unwrap();
            // A late writer of an older revision must not win
            let mut stale = entry.clone();
            stale.state = TransferState::Init;
            stale.revision = 0;
            wal.append(&stale).unwrap();
            assert_eq!(wal.total_entries(), 3);
        }

        let (wal, loaded) = JournalWal::open(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].state, TransferState::Debited);
        assert_eq!(loaded[0].revision, 1);
        // Open compacted the file down to one line
        assert_eq!(wal.total_entries(), 1);
        assert_eq!(fs::read_to_string(wal.path()).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_torn_tail_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.wal");
        let entry = sample_entry();
        {
            let (mut wal, _) = JournalWal::open(&path).unwrap();
            wal.append(&entry).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"transfer_id\":\"01J").unwrap();

        let (_, loaded) = JournalWal::open(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].transfer_id, entry.transfer_id);
    }

    #[test]
    fn test_compact_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.wal");
        let (mut wal, _) = JournalWal::open(&path).unwrap();
        let kept = sample_entry();
        wal.append(&sample_entry()).unwrap();
        wal.append(&kept).unwrap();

        wal.compact(std::slice::from_ref(&kept)).unwrap();
        wal.append(&kept).unwrap();

        let (_, loaded) = JournalWal::open(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].transfer_id, kept.transfer_id);
    }
}
