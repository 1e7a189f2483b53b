use std::collections::BTreeSet;

use serde::Serialize;
use tracing::info;

use crate::config::StoreConfig;
use crate::domain::identifier_root;
use crate::error::KiraError;
use crate::ledger::RunLedger;
use crate::retention::CleanupFailure;
use crate::seqs::SequenceDir;
use crate::store::{MetadataTable, RecordStore, RemovedLog, VersionIndex};

/// Rows or files removed per store by one pruning pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneSummary {
    pub version_index: usize,
    pub removed_log: usize,
    pub metadata: usize,
    pub ledger: usize,
    pub sequence_files: usize,
    pub cleanup_failures: Vec<CleanupFailure>,
}

impl PruneSummary {
    pub fn total(&self) -> usize {
        self.version_index + self.removed_log + self.metadata + self.ledger + self.sequence_files
    }
}

/// Brings every store and the sequence directory in line with an authoritative keep-set.
pub struct ConsistencyPruner {
    version_index: VersionIndex,
    removed_log: RemovedLog,
    metadata: MetadataTable,
    ledger: RunLedger,
    sequences: SequenceDir,
}

impl ConsistencyPruner {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            version_index: VersionIndex::new(config.version_index.clone()),
            removed_log: RemovedLog::new(config.removed_log.clone()),
            metadata: MetadataTable::new(config.metadata.clone()),
            ledger: RunLedger::new(config.processed_ids_dir.clone()),
            sequences: SequenceDir::new(config.sequences_dir.clone()),
        }
    }

    /// Store rewrites are whole-table overwrites and abort the pass on failure.
    /// Sequence file deletion is best effort. Pruning twice is a no-op.
    pub fn prune(&self, keep: &BTreeSet<String>) -> Result<PruneSummary, KiraError> {
        let mut summary = PruneSummary {
            version_index: self.version_index.retain_accessions(keep)?,
            removed_log: self.removed_log.retain_accessions(keep)?,
            metadata: self.metadata.retain_accessions(keep)?,
            ledger: self.ledger.retain_accessions(keep)?,
            ..PruneSummary::default()
        };

        let valid_roots = keep
            .iter()
            .map(|accession| identifier_root(accession).to_string())
            .collect::<BTreeSet<_>>();
        let (removed, failures) = self.sequences.remove_strays(&valid_roots)?;
        summary.sequence_files = removed;
        summary.cleanup_failures = failures;
        if removed > 0 {
            info!(
                dir = %self.sequences.dir(),
                removed,
                "removed FASTA files that are not in the keep-set"
            );
        }

        info!(total = summary.total(), "prune complete");
        Ok(summary)
    }
}
