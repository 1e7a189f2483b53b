use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::anomaly::Anomaly;
use crate::audit::AuditSink;
use crate::config::StoreConfig;
use crate::domain::{AccessionRow, DropReason, FetchBatch};
use crate::error::KiraError;
use crate::last_run::LastRun;
use crate::ledger::{LedgerSnapshot, RunLedger, filter_unprocessed};
use crate::pruner::{ConsistencyPruner, PruneSummary};
use crate::resolver::VersionResolver;
use crate::retention::{RetentionReport, retain_recent};
use crate::store::{MetadataTable, RecordStore, RemovedLog, VersionIndex};

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub accepted: usize,
    pub removed: usize,
    pub indexed: usize,
    pub dropped: usize,
    pub rejected: Vec<String>,
    pub anomalies: Vec<Anomaly>,
    pub metadata_appended: usize,
    pub ledger: LedgerSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostProcessResult {
    pub rows_before: usize,
    pub kept: usize,
    pub duplicates: usize,
    pub updates: usize,
    pub rejected: Vec<String>,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupResult {
    pub ledger: RetentionReport,
    pub debug: RetentionReport,
}

/// Runs the store operations of one fetch pipeline against a fixed set of paths.
#[derive(Debug, Clone)]
pub struct App {
    config: StoreConfig,
    version_index: VersionIndex,
    removed_log: RemovedLog,
    metadata: MetadataTable,
    ledger: RunLedger,
    last_run: LastRun,
}

impl App {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            version_index: VersionIndex::new(config.version_index.clone()),
            removed_log: RemovedLog::new(config.removed_log.clone()),
            metadata: MetadataTable::new(config.metadata.clone()),
            ledger: RunLedger::new(config.processed_ids_dir.clone()),
            last_run: LastRun::new(config.last_run.clone()),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn version_index(&self) -> &VersionIndex {
        &self.version_index
    }

    pub fn removed_log(&self) -> &RemovedLog {
        &self.removed_log
    }

    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    /// Persists one fetch batch. Store rewrites complete before the ledger
    /// records the batch, so an interrupted run resumes from the prior snapshot.
    pub fn save_batch(
        &self,
        batch: &FetchBatch,
        sink: &dyn AuditSink,
    ) -> Result<BatchResult, KiraError> {
        let existing = self.version_index.load()?;
        let mut indexed = existing.len();
        let mut dropped = 0;
        let mut rejected = Vec::new();
        let mut anomalies = Vec::new();

        if !batch.accepted.is_empty() {
            let mut merged = existing;
            merged.extend(batch.accepted.iter().cloned());
            let resolution = VersionResolver::resolve(merged);
            resolution.report(sink);
            self.version_index.overwrite(&resolution.kept)?;
            info!(path = %self.version_index.path(), "updated local versions");

            indexed = resolution.kept.len();
            dropped += resolution.dropped.len();
            rejected.extend(
                resolution
                    .rejected
                    .iter()
                    .map(|entry| entry.row.accession().to_string()),
            );
            anomalies.extend(resolution.anomalies);

            self.metadata.append_all(&batch.metadata)?;
        } else if !batch.metadata.is_empty() {
            warn!(
                count = batch.metadata.len(),
                "metadata supplied without accepted accessions; ignoring"
            );
        }

        if !batch.removed.is_empty() {
            let mut merged = self.removed_log.load()?;
            merged.extend(batch.removed.iter().cloned());
            let resolution = VersionResolver::resolve(merged);
            resolution.report(sink);
            self.removed_log.overwrite(&resolution.kept)?;
            info!(
                path = %self.removed_log.path(),
                count = batch.removed.len(),
                "saved removed entries"
            );

            dropped += resolution.dropped.len();
            rejected.extend(
                resolution
                    .rejected
                    .iter()
                    .map(|entry| entry.row.accession().to_string()),
            );
        }

        let ledger = self.ledger.save(&batch.processed())?;

        Ok(BatchResult {
            accepted: batch.accepted.len(),
            removed: batch.removed.len(),
            indexed,
            dropped,
            rejected,
            anomalies,
            metadata_appended: if batch.accepted.is_empty() {
                0
            } else {
                batch.metadata.len()
            },
            ledger,
        })
    }

    /// Candidates not yet recorded in the most recent ledger snapshot.
    pub fn pending(&self, candidates: &[String]) -> Result<Vec<String>, KiraError> {
        let processed = self.ledger.load_most_recent()?;
        Ok(filter_unprocessed(candidates, &processed))
    }

    /// Resolves the metadata table in place: one row per identifier, highest version.
    /// `None` when there is no metadata table yet.
    pub fn post_process_metadata(
        &self,
        sink: &dyn AuditSink,
    ) -> Result<Option<PostProcessResult>, KiraError> {
        if !self.metadata.exists() {
            warn!(path = %self.metadata.path(), "metadata file not found");
            return Ok(None);
        }
        let rows = self.metadata.load()?;
        let rows_before = rows.len();
        info!(rows = rows_before, "performing post-processing of metadata file");

        let resolution = VersionResolver::resolve(rows);
        resolution.report(sink);
        self.metadata.overwrite(&resolution.kept)?;
        info!(
            removed = rows_before - resolution.kept.len(),
            kept = resolution.kept.len(),
            "post-processing complete"
        );

        Ok(Some(PostProcessResult {
            rows_before,
            kept: resolution.kept.len(),
            duplicates: resolution
                .dropped_with(DropReason::Duplicate)
                .count(),
            updates: resolution
                .dropped_with(DropReason::Update)
                .count(),
            rejected: resolution
                .rejected
                .iter()
                .map(|entry| entry.row.accession().to_string())
                .collect(),
            anomalies: resolution.anomalies,
        }))
    }

    pub fn prune(&self, keep: &BTreeSet<String>) -> Result<PruneSummary, KiraError> {
        ConsistencyPruner::new(&self.config).prune(keep)
    }

    /// Applies the retention policy to ledger snapshots and debug dumps.
    pub fn cleanup(&self) -> Result<CleanupResult, KiraError> {
        let ledger = self.ledger.retain(self.config.keep_last)?;
        let debug = retain_recent(&self.config.debug_dir, self.config.keep_last)?;
        Ok(CleanupResult { ledger, debug })
    }

    pub fn last_run(&self) -> Result<Option<NaiveDate>, KiraError> {
        self.last_run.read()
    }

    pub fn stamp_run(&self, date: Option<NaiveDate>) -> Result<NaiveDate, KiraError> {
        self.last_run.write(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAudit;
    use crate::domain::{Record, RemovedEntry};
    use camino::Utf8PathBuf;

    #[test]
    fn batch_updates_index_and_ledger() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let app = App::new(StoreConfig::rooted_at(&root));

        let batch = FetchBatch {
            accepted: vec!["A1.1".to_string(), "B2.1".to_string()],
            removed: vec![RemovedEntry::new("C3.1", "length")],
            metadata: vec![Record::new("A1.1"), Record::new("B2.1")],
        };
        let result = app.save_batch(&batch, &TracingAudit).unwrap();
        assert_eq!(result.indexed, 2);
        assert_eq!(result.ledger.total, 3);

        let update = FetchBatch {
            accepted: vec!["A1.2".to_string()],
            metadata: vec![Record::new("A1.2")],
            ..FetchBatch::default()
        };
        let result = app.save_batch(&update, &TracingAudit).unwrap();
        assert_eq!(result.indexed, 2);
        assert_eq!(result.dropped, 1);
        assert_eq!(
            app.version_index().load().unwrap(),
            vec!["A1.2".to_string(), "B2.1".to_string()]
        );
        assert_eq!(app.pending(&["A1.2".to_string(), "D4.1".to_string()]).unwrap(), vec!["D4.1"]);
    }
}
