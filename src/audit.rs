use std::cell::RefCell;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::anomaly::Anomaly;
use crate::domain::{ACCESSION_FIELD, DropReason, Record};
use crate::error::KiraError;
use crate::store::{MetadataTable, RecordStore};

pub type Fields = Vec<(String, Option<String>)>;

/// Operator-facing destination for resolution reports. Nothing reads these back.
pub trait AuditSink {
    fn dropped(&self, reason: DropReason, rows: &[Fields]);
    fn anomaly(&self, anomaly: &Anomaly);
    /// A row excluded because its accession did not parse.
    fn rejected(&self, row: &Fields, error: &KiraError);
}

/// `reason` written for rows whose accession did not parse.
pub const MALFORMED_REASON: &str = "malformed";

fn accession_of(fields: &Fields) -> Option<&str> {
    fields
        .iter()
        .find(|(name, _)| name == ACCESSION_FIELD)
        .and_then(|(_, value)| value.as_deref())
}

pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn dropped(&self, reason: DropReason, rows: &[Fields]) {
        let accessions = rows
            .iter()
            .filter_map(accession_of)
            .collect::<Vec<_>>();
        warn!(
            %reason,
            count = rows.len(),
            accessions = %accessions.join(","),
            "dropped rows"
        );
    }

    fn anomaly(&self, anomaly: &Anomaly) {
        warn!(
            identifier = %anomaly.identifier,
            kind = %anomaly.kind,
            "{}",
            anomaly.detail
        );
    }

    fn rejected(&self, row: &Fields, error: &KiraError) {
        warn!(
            accession = accession_of(row).unwrap_or_default(),
            %error,
            "rejected record"
        );
    }
}

/// Logs like [`TracingAudit`] and collects dropped and rejected rows for a
/// debug CSV with an extra `reason` column. Rows are written on
/// [`DebugCsvAudit::finish`].
pub struct DebugCsvAudit {
    table: MetadataTable,
    pending: RefCell<Vec<Record>>,
}

impl DebugCsvAudit {
    pub fn new(debug_dir: &Utf8Path, prefix: &str, timestamp: &str) -> Self {
        Self {
            table: MetadataTable::new(debug_dir.join(format!("{prefix}_{timestamp}.csv"))),
            pending: RefCell::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        self.table.path()
    }

    /// Appends the collected rows; `None` when nothing was dropped.
    pub fn finish(self) -> Result<Option<Utf8PathBuf>, KiraError> {
        let rows = self.pending.into_inner();
        if rows.is_empty() {
            return Ok(None);
        }
        self.table.append_all(&rows)?;
        info!(path = %self.table.path(), count = rows.len(), "saved dropped rows");
        Ok(Some(self.table.path().to_path_buf()))
    }

    fn collect(&self, fields: &Fields, reason: &str) {
        let Ok(mut record) = Record::from_fields(fields.clone()) else {
            return;
        };
        record.set("reason".to_string(), Some(reason.to_string()));
        self.pending.borrow_mut().push(record);
    }
}

impl AuditSink for DebugCsvAudit {
    fn dropped(&self, reason: DropReason, rows: &[Fields]) {
        TracingAudit.dropped(reason, rows);
        for fields in rows {
            self.collect(fields, &reason.to_string());
        }
    }

    fn anomaly(&self, anomaly: &Anomaly) {
        TracingAudit.anomaly(anomaly);
    }

    fn rejected(&self, row: &Fields, error: &KiraError) {
        TracingAudit.rejected(row, error);
        self.collect(row, MALFORMED_REASON);
    }
}

/// `YYYYmmdd-HHMMSS` in local time, used to stamp per-run debug files.
pub fn run_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_rows_carry_reason() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let audit = DebugCsvAudit::new(&root, "duplicates_debug", "20240101-000000");
        audit.dropped(
            DropReason::Update,
            &[vec![("accession".to_string(), Some("A1.1".to_string()))]],
        );
        let path = audit.finish().unwrap().unwrap();

        let rows = MetadataTable::new(path).load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("reason"), Some("update"));
    }

    #[test]
    fn rejected_rows_are_dumped_as_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let audit = DebugCsvAudit::new(&root, "removed_metadata_rows", "20240101-000000");
        audit.rejected(
            &vec![
                ("accession".to_string(), Some("BAD".to_string())),
                ("country".to_string(), Some("DE".to_string())),
            ],
            &KiraError::MalformedAccession("BAD".to_string()),
        );
        let path = audit.finish().unwrap().unwrap();

        let rows = MetadataTable::new(path).load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("accession"), Some("BAD"));
        assert_eq!(rows[0].get("country"), Some("DE"));
        assert_eq!(rows[0].get("reason"), Some(MALFORMED_REASON));
    }

    #[test]
    fn nothing_dropped_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let audit = DebugCsvAudit::new(&root, "duplicates_debug", "20240101-000000");
        let path = audit.path().to_path_buf();
        assert!(audit.finish().unwrap().is_none());
        assert!(!path.as_std_path().exists());
    }
}
