use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyKind {
    /// The highest version was not the most recently supplied member of its group.
    NonMonotonicVersion,
    /// A dropped member carries more populated fields than the kept one.
    RicherDroppedRecord,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::NonMonotonicVersion => write!(f, "non-monotonic-version"),
            AnomalyKind::RicherDroppedRecord => write!(f, "richer-dropped-record"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    pub identifier: String,
    pub kind: AnomalyKind,
    pub detail: String,
}

/// One input row of an identifier group, as seen by the detector.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub accession: &'a str,
    pub insertion_index: usize,
    pub populated_fields: usize,
}

pub struct AnomalyDetector;

impl AnomalyDetector {
    /// Inspects one identifier group. `members` is the whole group before
    /// deduplication, `kept` included. Advisory only.
    pub fn inspect(identifier: &str, kept: Candidate<'_>, members: &[Candidate<'_>]) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        let latest = members
            .iter()
            .map(|member| member.insertion_index)
            .max()
            .unwrap_or(kept.insertion_index);
        if kept.insertion_index != latest {
            let others = members
                .iter()
                .map(|member| format!("{}@{}", member.accession, member.insertion_index))
                .collect::<Vec<_>>()
                .join(", ");
            anomalies.push(Anomaly {
                identifier: identifier.to_string(),
                kind: AnomalyKind::NonMonotonicVersion,
                detail: format!(
                    "highest version {} (row {}) is not the most recently added row {latest}; \
                     present: {others}; keeping highest version anyway",
                    kept.accession, kept.insertion_index
                ),
            });
        }

        for member in members
            .iter()
            .filter(|member| member.insertion_index != kept.insertion_index)
        {
            if member.populated_fields > kept.populated_fields {
                anomalies.push(Anomaly {
                    identifier: identifier.to_string(),
                    kind: AnomalyKind::RicherDroppedRecord,
                    detail: format!(
                        "row {} ({}) has {} filled fields, kept {} (row {}) has {}",
                        member.insertion_index,
                        member.accession,
                        member.populated_fields,
                        kept.accession,
                        kept.insertion_index,
                        kept.populated_fields
                    ),
                });
            }
        }

        anomalies
    }
}
