use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::anomaly::{Anomaly, AnomalyDetector, Candidate};
use crate::audit::AuditSink;
use crate::domain::{AccessionKey, AccessionRow, DropReason};
use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dropped<R> {
    pub row: R,
    pub reason: DropReason,
    pub insertion_index: usize,
}

/// A row whose accession did not parse. Excluded from resolution, never fatal;
/// [`Resolution::report`] hands the full row to the audit sink.
#[derive(Debug)]
pub struct Rejected<R> {
    pub row: R,
    pub insertion_index: usize,
    pub error: KiraError,
}

#[derive(Debug)]
pub struct Resolution<R> {
    /// One row per identifier, ordered by identifier.
    pub kept: Vec<R>,
    /// Ordered by insertion index.
    pub dropped: Vec<Dropped<R>>,
    pub rejected: Vec<Rejected<R>>,
    pub anomalies: Vec<Anomaly>,
}

impl<R: AccessionRow> Resolution<R> {
    pub fn dropped_with(&self, reason: DropReason) -> impl Iterator<Item = &Dropped<R>> {
        self.dropped.iter().filter(move |entry| entry.reason == reason)
    }

    pub fn report(&self, sink: &dyn AuditSink) {
        for rejected in &self.rejected {
            sink.rejected(&rejected.row.fields(), &rejected.error);
        }
        for reason in [DropReason::Duplicate, DropReason::Update] {
            let rows = self
                .dropped_with(reason)
                .map(|entry| entry.row.fields())
                .collect::<Vec<_>>();
            if !rows.is_empty() {
                sink.dropped(reason, &rows);
            }
        }
        for anomaly in &self.anomalies {
            sink.anomaly(anomaly);
        }
    }
}

struct Entry {
    key: AccessionKey,
    index: usize,
    populated_fields: usize,
}

pub struct VersionResolver;

impl VersionResolver {
    /// Selects exactly one row per identifier from `rows`, which must be ordered
    /// by arrival (existing store contents first, newly fetched rows after).
    ///
    /// Identical accessions keep the latest supplied row (`duplicate`), then
    /// each identifier keeps its highest version (`update`), ties broken by
    /// the latest insertion index. Pure function of the input order.
    pub fn resolve<R: AccessionRow>(rows: Vec<R>) -> Resolution<R> {
        let mut entries = Vec::with_capacity(rows.len());
        let mut slots = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();

        for (index, row) in rows.into_iter().enumerate() {
            match row.accession().parse::<AccessionKey>() {
                Ok(key) => {
                    entries.push(Entry {
                        key,
                        index,
                        populated_fields: row.populated_fields(),
                    });
                    slots.push(Some(row));
                }
                Err(error) => {
                    warn!(accession = row.accession(), %error, "skipping malformed accession");
                    rejected.push(Rejected {
                        row,
                        insertion_index: index,
                        error,
                    });
                    slots.push(None);
                }
            }
        }

        let mut latest_by_accession = HashMap::<&AccessionKey, usize>::new();
        for entry in &entries {
            latest_by_accession
                .entry(&entry.key)
                .and_modify(|latest| *latest = (*latest).max(entry.index))
                .or_insert(entry.index);
        }

        let mut groups = BTreeMap::<&str, Vec<&Entry>>::new();
        for entry in &entries {
            groups
                .entry(entry.key.identifier())
                .or_default()
                .push(entry);
        }

        let mut decisions = Vec::<(usize, DropReason)>::new();
        let mut kept_indices = Vec::with_capacity(groups.len());
        let mut anomalies = Vec::new();

        for (identifier, members) in &groups {
            let mut survivors = Vec::with_capacity(members.len());
            for entry in members {
                if latest_by_accession[&entry.key] == entry.index {
                    survivors.push(*entry);
                } else {
                    decisions.push((entry.index, DropReason::Duplicate));
                }
            }

            let Some(best) = survivors
                .iter()
                .copied()
                .max_by_key(|entry| (entry.key.version(), entry.index))
            else {
                continue;
            };
            for entry in &survivors {
                if entry.index != best.index {
                    decisions.push((entry.index, DropReason::Update));
                }
            }
            kept_indices.push(best.index);

            let accessions = members
                .iter()
                .map(|entry| entry.key.to_string())
                .collect::<Vec<_>>();
            let candidates = members
                .iter()
                .zip(&accessions)
                .map(|(entry, accession)| Candidate {
                    accession,
                    insertion_index: entry.index,
                    populated_fields: entry.populated_fields,
                })
                .collect::<Vec<_>>();
            let best_accession = best.key.to_string();
            let kept = Candidate {
                accession: &best_accession,
                insertion_index: best.index,
                populated_fields: best.populated_fields,
            };
            anomalies.extend(AnomalyDetector::inspect(identifier, kept, &candidates));
        }

        decisions.sort_by_key(|(index, _)| *index);

        let kept = kept_indices
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect();
        let dropped = decisions
            .into_iter()
            .filter_map(|(index, reason)| {
                slots[index].take().map(|row| Dropped {
                    row,
                    reason,
                    insertion_index: index,
                })
            })
            .collect();

        Resolution {
            kept,
            dropped,
            rejected,
            anomalies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalyKind;
    use crate::domain::Record;

    #[test]
    fn empty_input_resolves_to_nothing() {
        let resolution = VersionResolver::resolve(Vec::<String>::new());
        assert!(resolution.kept.is_empty());
        assert!(resolution.dropped.is_empty());
        assert!(resolution.anomalies.is_empty());
    }

    #[test]
    fn duplicate_then_update() {
        let rows = vec!["X1.1".to_string(), "X1.2".to_string(), "X1.2".to_string()];
        let resolution = VersionResolver::resolve(rows);
        assert_eq!(resolution.kept, vec!["X1.2".to_string()]);
        let dropped = resolution
            .dropped
            .iter()
            .map(|entry| (entry.insertion_index, entry.reason))
            .collect::<Vec<_>>();
        assert_eq!(
            dropped,
            vec![(0, DropReason::Update), (1, DropReason::Duplicate)]
        );
    }

    #[test]
    fn latest_identical_accession_wins_regardless_of_fields() {
        let rows = vec![
            Record::new("A1.1").with("country", Some("DE")),
            Record::new("A1.1").with("country", Some("FR")),
        ];
        let resolution = VersionResolver::resolve(rows);
        assert_eq!(resolution.kept[0].get("country"), Some("FR"));
        assert_eq!(resolution.dropped[0].reason, DropReason::Duplicate);
        assert_eq!(resolution.dropped[0].insertion_index, 0);
    }

    #[test]
    fn malformed_rows_are_isolated() {
        let rows = vec!["A1.1".to_string(), "bogus".to_string(), "B1.3".to_string()];
        let resolution = VersionResolver::resolve(rows);
        assert_eq!(resolution.kept, vec!["A1.1".to_string(), "B1.3".to_string()]);
        assert_eq!(resolution.rejected.len(), 1);
        assert_eq!(resolution.rejected[0].insertion_index, 1);
    }

    #[test]
    fn out_of_order_versions_keep_highest_and_warn() {
        let rows = vec![
            Record::new("Y9.2").with("country", Some("DE")),
            Record::new("Y9.1"),
        ];
        let resolution = VersionResolver::resolve(rows);
        assert_eq!(resolution.kept[0].get("accession"), Some("Y9.2"));
        assert_eq!(resolution.anomalies.len(), 1);
        assert_eq!(resolution.anomalies[0].kind, AnomalyKind::NonMonotonicVersion);
    }
}
