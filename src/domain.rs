use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::KiraError;

pub const ACCESSION_FIELD: &str = "accession";

/// `identifier.version`, e.g. `AB123456.1`. Ordered by identifier, then by version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessionKey {
    identifier: String,
    version: u32,
}

impl AccessionKey {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Display for AccessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.identifier, self.version)
    }
}

impl FromStr for AccessionKey {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let parts = trimmed.split('.').collect::<Vec<_>>();
        let [identifier, version] = parts.as_slice() else {
            return Err(KiraError::MalformedAccession(value.to_string()));
        };
        let is_numeric = !version.is_empty() && version.chars().all(|ch| ch.is_ascii_digit());
        if identifier.is_empty() || !is_numeric {
            return Err(KiraError::MalformedAccession(value.to_string()));
        }
        let version = version
            .parse::<u32>()
            .map_err(|_| KiraError::MalformedAccession(value.to_string()))?;
        if version == 0 {
            return Err(KiraError::MalformedAccession(value.to_string()));
        }
        Ok(Self {
            identifier: identifier.to_string(),
            version,
        })
    }
}

/// Identifier root of an accession string, used to name sequence files.
pub fn identifier_root(accession: &str) -> &str {
    accession
        .trim()
        .split_once('.')
        .map(|(root, _)| root)
        .unwrap_or_else(|| accession.trim())
}

/// A row of one of the stores, keyed by its accession string.
pub trait AccessionRow: Clone {
    fn accession(&self) -> &str;

    /// Named fields in stable order, used for debug dumps.
    fn fields(&self) -> Vec<(String, Option<String>)>;

    fn populated_fields(&self) -> usize {
        self.fields().iter().filter(|(_, value)| value.is_some()).count()
    }
}

impl AccessionRow for String {
    fn accession(&self) -> &str {
        self
    }

    fn fields(&self) -> Vec<(String, Option<String>)> {
        vec![(ACCESSION_FIELD.to_string(), Some(self.clone()))]
    }
}

/// Ordered field map with a mandatory `accession` field. Empty values are nulls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, Option<String>)>,
}

impl Record {
    pub fn new(accession: impl Into<String>) -> Self {
        Self {
            fields: vec![(ACCESSION_FIELD.to_string(), Some(accession.into()))],
        }
    }

    pub fn from_fields(fields: Vec<(String, Option<String>)>) -> Result<Self, KiraError> {
        let has_accession = fields.iter().any(|(name, value)| {
            name == ACCESSION_FIELD && value.as_deref().is_some_and(|v| !v.trim().is_empty())
        });
        if !has_accession {
            return Err(KiraError::InvalidBatch(
                "record has no accession field".to_string(),
            ));
        }
        let mut record = Self { fields: Vec::new() };
        for (name, value) in fields {
            record.set(name, value);
        }
        Ok(record)
    }

    pub fn with(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.set(name.into(), value.map(str::to_string));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn set(&mut self, name: String, value: Option<String>) {
        let value = value.filter(|v| !v.is_empty());
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}

impl AccessionRow for Record {
    fn accession(&self) -> &str {
        self.get(ACCESSION_FIELD).unwrap_or_default()
    }

    fn fields(&self) -> Vec<(String, Option<String>)> {
        self.fields.clone()
    }

    fn populated_fields(&self) -> usize {
        self.fields.iter().filter(|(_, value)| value.is_some()).count()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a map of scalar fields including \"accession\"")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
                let mut fields = Vec::new();
                while let Some((name, value)) =
                    access.next_entry::<String, serde_json::Value>()?
                {
                    let value = match value {
                        serde_json::Value::Null => None,
                        serde_json::Value::String(text) => Some(text),
                        serde_json::Value::Bool(flag) => Some(flag.to_string()),
                        serde_json::Value::Number(number) => Some(number.to_string()),
                        other => {
                            return Err(serde::de::Error::custom(format!(
                                "field {name} is not a scalar: {other}"
                            )));
                        }
                    };
                    fields.push((name, value));
                }
                Record::from_fields(fields).map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// An accession excluded by fetch-time filtering, with the filter that rejected it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedEntry {
    pub accession: String,
    #[serde(alias = "filter")]
    pub filter_reason: String,
}

impl RemovedEntry {
    pub fn new(accession: impl Into<String>, filter_reason: impl Into<String>) -> Self {
        Self {
            accession: accession.into(),
            filter_reason: filter_reason.into(),
        }
    }
}

impl AccessionRow for RemovedEntry {
    fn accession(&self) -> &str {
        &self.accession
    }

    fn fields(&self) -> Vec<(String, Option<String>)> {
        vec![
            (ACCESSION_FIELD.to_string(), Some(self.accession.clone())),
            ("filter_reason".to_string(), Some(self.filter_reason.clone())),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropReason {
    /// Same accession string supplied again later.
    Duplicate,
    /// A higher version of the identifier exists.
    Update,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Duplicate => write!(f, "duplicate"),
            DropReason::Update => write!(f, "update"),
        }
    }
}

/// Output of one fetch batch as handed over by the fetch collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchBatch {
    #[serde(default)]
    pub accepted: Vec<String>,
    #[serde(default)]
    pub removed: Vec<RemovedEntry>,
    #[serde(default)]
    pub metadata: Vec<Record>,
}

impl FetchBatch {
    /// Every accession touched by the batch, removed ones first.
    pub fn processed(&self) -> Vec<String> {
        self.removed
            .iter()
            .map(|entry| entry.accession.clone())
            .chain(self.accepted.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_accession_valid() {
        let key: AccessionKey = "AB123456.1".parse().unwrap();
        assert_eq!(key.identifier(), "AB123456");
        assert_eq!(key.version(), 1);
        assert_eq!(key.to_string(), "AB123456.1");
    }

    #[test]
    fn parse_accession_rejects_malformed() {
        for bad in ["AB123456", "AB.1.2", "AB123456.x", ".3", "AB1.0", "AB1.", "AB1.-2"] {
            let err = bad.parse::<AccessionKey>().unwrap_err();
            assert_matches!(err, KiraError::MalformedAccession(_), "{}", bad);
        }
    }

    #[test]
    fn keys_order_by_identifier_then_numeric_version() {
        let a: AccessionKey = "A1.10".parse().unwrap();
        let b: AccessionKey = "A1.9".parse().unwrap();
        let c: AccessionKey = "B1.1".parse().unwrap();
        assert!(b < a);
        assert!(a < c);
    }

    #[test]
    fn record_counts_nulls() {
        let record = Record::new("X1.1")
            .with("country", Some("DE"))
            .with("haplogroup", None)
            .with("date", Some(""));
        assert_eq!(record.populated_fields(), 2);
        assert_eq!(record.accession(), "X1.1");
    }

    #[test]
    fn record_json_keeps_field_order() {
        let record: Record =
            serde_json::from_str(r#"{"accession":"X1.2","z":1,"a":null,"m":"x"}"#).unwrap();
        let names = record.field_names().collect::<Vec<_>>();
        assert_eq!(names, vec!["accession", "z", "a", "m"]);
        assert_eq!(record.get("z"), Some("1"));
        assert_eq!(record.get("a"), None);
    }

    #[test]
    fn record_without_accession_is_rejected() {
        let err = serde_json::from_str::<Record>(r#"{"country":"DE"}"#).unwrap_err();
        assert!(err.to_string().contains("accession"));
    }

    #[test]
    fn identifier_root_strips_version() {
        assert_eq!(identifier_root("A1.2"), "A1");
        assert_eq!(identifier_root("A1"), "A1");
    }
}
