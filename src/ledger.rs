use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::KiraError;
use crate::retention::{RetentionReport, remove_files};
use crate::store::write_bytes_atomic;

const SNAPSHOT_PREFIX: &str = "processed_ids_";
const SNAPSHOT_EXT: &str = "txt";

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub path: Utf8PathBuf,
    pub sequence: u64,
    pub total: usize,
    pub carried_over: usize,
}

/// Processed accessions across fetch runs, kept as numbered snapshot files
/// `processed_ids_<seq>.txt`. The highest sequence number is the most recent.
#[derive(Debug, Clone)]
pub struct RunLedger {
    dir: Utf8PathBuf,
}

impl RunLedger {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn snapshot_path(&self, sequence: u64) -> Utf8PathBuf {
        self.dir
            .join(format!("{SNAPSHOT_PREFIX}{sequence:06}.{SNAPSHOT_EXT}"))
    }

    /// Snapshots ordered by sequence number, newest first.
    pub fn snapshots(&self) -> Result<Vec<(u64, Utf8PathBuf)>, KiraError> {
        let entries = match self.dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(KiraError::Filesystem(format!("read {}: {err}", self.dir))),
        };
        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let path = entry.path();
            match parse_sequence(path) {
                Some(sequence) => snapshots.push((sequence, path.to_path_buf())),
                None => debug!(%path, "ignoring non-snapshot file in ledger directory"),
            }
        }
        snapshots.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(snapshots)
    }

    /// Accessions of the most recent snapshot; empty when there is none yet.
    pub fn load_most_recent(&self) -> Result<Vec<String>, KiraError> {
        let Some((_, path)) = self.snapshots()?.into_iter().next() else {
            warn!(dir = %self.dir, "no processed IDs snapshot found for soft restart");
            return Ok(Vec::new());
        };
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::corrupt(&path, err))?;
        let ids = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        info!(%path, count = ids.len(), "loaded processed accessions");
        Ok(ids)
    }

    /// Writes a new snapshot holding the previous one followed by `newly_processed`,
    /// first occurrence winning. Older snapshots are left in place.
    pub fn save(&self, newly_processed: &[String]) -> Result<LedgerSnapshot, KiraError> {
        let previous = self.load_most_recent()?;
        let carried_over = previous.len();
        let merged = ordered_union(previous, newly_processed);
        self.write_snapshot(merged, carried_over)
    }

    /// Drops accessions outside `keep` by writing a filtered snapshot.
    pub fn retain_accessions(&self, keep: &BTreeSet<String>) -> Result<usize, KiraError> {
        let current = self.load_most_recent()?;
        let before = current.len();
        let kept = current
            .into_iter()
            .filter(|id| keep.contains(id))
            .collect::<Vec<_>>();
        let removed = before - kept.len();
        if removed > 0 {
            let total = kept.len();
            self.write_snapshot(kept, total)?;
            info!(dir = %self.dir, removed, "removed ledger entries not in keep-set");
        }
        Ok(removed)
    }

    /// Keeps the `keep_last` newest snapshots.
    pub fn retain(&self, keep_last: usize) -> Result<RetentionReport, KiraError> {
        let mut snapshots = self.snapshots()?;
        if snapshots.len() <= keep_last {
            return Ok(RetentionReport {
                kept: snapshots.len(),
                ..RetentionReport::default()
            });
        }
        let stale = snapshots
            .split_off(keep_last)
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        let (removed, failures) = remove_files(stale);
        Ok(RetentionReport {
            kept: snapshots.len(),
            removed,
            failures,
        })
    }

    fn write_snapshot(
        &self,
        ids: Vec<String>,
        carried_over: usize,
    ) -> Result<LedgerSnapshot, KiraError> {
        let sequence = self
            .snapshots()?
            .first()
            .map(|(sequence, _)| sequence + 1)
            .unwrap_or(1);
        let path = self.snapshot_path(sequence);
        let mut content = String::new();
        for id in &ids {
            content.push_str(id);
            content.push('\n');
        }
        write_bytes_atomic(&path, content.as_bytes())?;
        info!(
            %path,
            total = ids.len(),
            carried_over,
            "saved processed accessions"
        );
        Ok(LedgerSnapshot {
            path,
            sequence,
            total: ids.len(),
            carried_over,
        })
    }
}

/// Candidates not yet in `processed`, in candidate order.
pub fn filter_unprocessed(candidates: &[String], processed: &[String]) -> Vec<String> {
    let done = processed.iter().map(String::as_str).collect::<HashSet<_>>();
    let pending = candidates
        .iter()
        .filter(|id| !done.contains(id.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    info!(
        skipped = candidates.len() - pending.len(),
        remaining = pending.len(),
        "filtered already-processed accessions"
    );
    pending
}

fn ordered_union(previous: Vec<String>, newly_processed: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    previous
        .into_iter()
        .chain(newly_processed.iter().cloned())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

fn parse_sequence(path: &Utf8Path) -> Option<u64> {
    if path.extension() != Some(SNAPSHOT_EXT) {
        return None;
    }
    path.file_stem()?
        .strip_prefix(SNAPSHOT_PREFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_keeps_first_occurrence() {
        let merged = ordered_union(
            vec!["A1.1".to_string(), "B2.3".to_string()],
            &["B2.3".to_string(), "C3.1".to_string()],
        );
        assert_eq!(merged, vec!["A1.1", "B2.3", "C3.1"]);
    }

    #[test]
    fn snapshot_names_parse() {
        assert_eq!(parse_sequence(Utf8Path::new("x/processed_ids_000012.txt")), Some(12));
        assert_eq!(parse_sequence(Utf8Path::new("x/processed_ids_2024-01-01.txt")), None);
        assert_eq!(parse_sequence(Utf8Path::new("x/processed_ids_000012.csv")), None);
    }
}
