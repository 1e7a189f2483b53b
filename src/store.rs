use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::{debug, info};

use crate::domain::{ACCESSION_FIELD, AccessionKey, AccessionRow, Record, RemovedEntry};
use crate::error::KiraError;

/// A single durable, row-oriented table keyed by accession.
pub trait RecordStore {
    type Row: AccessionRow;

    fn path(&self) -> &Utf8Path;

    /// Empty when the backing file is absent; `CorruptStore` when it cannot be parsed.
    fn load(&self) -> Result<Vec<Self::Row>, KiraError>;

    fn append_all(&self, rows: &[Self::Row]) -> Result<(), KiraError>;

    /// Replaces the whole table. The previous content survives a failed write.
    fn overwrite(&self, rows: &[Self::Row]) -> Result<(), KiraError>;

    fn exists(&self) -> bool {
        self.path().as_std_path().exists()
    }

    /// Drops every row whose accession is not in `keep`, returning the number removed.
    fn retain_accessions(&self, keep: &BTreeSet<String>) -> Result<usize, KiraError> {
        if !self.exists() {
            return Ok(0);
        }
        let rows = self.load()?;
        let before = rows.len();
        let kept = rows
            .into_iter()
            .filter(|row| keep.contains(row.accession()))
            .collect::<Vec<_>>();
        let removed = before - kept.len();
        if removed > 0 {
            self.overwrite(&kept)?;
            info!(path = %self.path(), removed, "removed rows not in keep-set");
        } else {
            debug!(path = %self.path(), "no rows removed; all in keep-set");
        }
        Ok(removed)
    }
}

/// Writes `content` next to `path` and renames it into place.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path()).map_err(|err| KiraError::write(path, err))?;
    let mut temp = Builder::new()
        .prefix(".kira-as")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::write(path, err))?;
    temp.write_all(content)
        .map_err(|err| KiraError::write(path, err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| KiraError::write(path, err))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::write(path, err.error))?;
    Ok(())
}

fn read_optional(path: &Utf8Path) -> Result<Option<String>, KiraError> {
    match fs::read_to_string(path.as_std_path()) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(KiraError::corrupt(path, err)),
    }
}

fn open_append(path: &Utf8Path) -> Result<fs::File, KiraError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        fs::create_dir_all(parent.as_std_path()).map_err(|err| KiraError::write(path, err))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| KiraError::write(path, err))
}

/// True when `path` is absent or zero-length. Any other metadata error is a write failure.
fn is_empty_file(path: &Utf8Path) -> Result<bool, KiraError> {
    match fs::metadata(path.as_std_path()) {
        Ok(meta) => Ok(meta.len() == 0),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(KiraError::write(path, err)),
    }
}

/// Latest-version index: one `identifier.version` per line.
#[derive(Debug, Clone)]
pub struct VersionIndex {
    path: Utf8PathBuf,
}

impl VersionIndex {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Identifier to version map of the current index.
    pub fn versions(&self) -> Result<BTreeMap<String, u32>, KiraError> {
        let mut versions = BTreeMap::new();
        for accession in self.load()? {
            let key: AccessionKey = accession
                .parse()
                .map_err(|err| KiraError::corrupt(&self.path, err))?;
            versions.insert(key.identifier().to_string(), key.version());
        }
        info!(count = versions.len(), "loaded local versions");
        Ok(versions)
    }
}

impl RecordStore for VersionIndex {
    type Row = String;

    fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<String>, KiraError> {
        let Some(content) = read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            line.parse::<AccessionKey>().map_err(|err| {
                KiraError::corrupt(&self.path, format!("line {}: {err}", number + 1))
            })?;
            rows.push(line.to_string());
        }
        Ok(rows)
    }

    fn append_all(&self, rows: &[String]) -> Result<(), KiraError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut file = open_append(&self.path)?;
        let mut buffer = String::new();
        for row in rows {
            buffer.push_str(row.trim());
            buffer.push('\n');
        }
        file.write_all(buffer.as_bytes())
            .map_err(|err| KiraError::write(&self.path, err))
    }

    fn overwrite(&self, rows: &[String]) -> Result<(), KiraError> {
        let mut buffer = String::new();
        for row in rows {
            buffer.push_str(row.trim());
            buffer.push('\n');
        }
        write_bytes_atomic(&self.path, buffer.as_bytes())
    }
}

const REMOVED_HEADER: [&str; 2] = [ACCESSION_FIELD, "filter_reason"];

/// Accessions excluded by fetch filters, stored as `accession,filter_reason`.
#[derive(Debug, Clone)]
pub struct RemovedLog {
    path: Utf8PathBuf,
}

impl RemovedLog {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn versions(&self) -> Result<BTreeMap<String, u32>, KiraError> {
        let mut versions = BTreeMap::new();
        for entry in self.load()? {
            let key: AccessionKey = entry
                .accession
                .parse()
                .map_err(|err| KiraError::corrupt(&self.path, err))?;
            versions.insert(key.identifier().to_string(), key.version());
        }
        info!(count = versions.len(), "loaded local removed versions");
        Ok(versions)
    }

    fn write_rows<W: Write>(
        &self,
        writer: &mut csv::Writer<W>,
        rows: &[RemovedEntry],
    ) -> Result<(), KiraError> {
        for row in rows {
            writer
                .write_record([row.accession.as_str(), row.filter_reason.as_str()])
                .map_err(|err| KiraError::write(&self.path, err))?;
        }
        writer.flush().map_err(|err| KiraError::write(&self.path, err))
    }
}

impl RecordStore for RemovedLog {
    type Row = RemovedEntry;

    fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<RemovedEntry>, KiraError> {
        let Some(content) = read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        reader
            .deserialize::<RemovedEntry>()
            .map(|row| row.map_err(|err| KiraError::corrupt(&self.path, err)))
            .collect()
    }

    fn append_all(&self, rows: &[RemovedEntry]) -> Result<(), KiraError> {
        if rows.is_empty() {
            return Ok(());
        }
        let needs_header = is_empty_file(&self.path)?;
        let file = open_append(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer
                .write_record(REMOVED_HEADER)
                .map_err(|err| KiraError::write(&self.path, err))?;
        }
        self.write_rows(&mut writer, rows)
    }

    fn overwrite(&self, rows: &[RemovedEntry]) -> Result<(), KiraError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record(REMOVED_HEADER)
            .map_err(|err| KiraError::write(&self.path, err))?;
        self.write_rows(&mut writer, rows)?;
        let content = writer
            .into_inner()
            .map_err(|err| KiraError::write(&self.path, err.error()))?;
        write_bytes_atomic(&self.path, &content)
    }
}

/// Metadata table: an `accession` column plus arbitrary fields.
#[derive(Debug, Clone)]
pub struct MetadataTable {
    path: Utf8PathBuf,
}

impl MetadataTable {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_header(&self) -> Result<Option<Vec<String>>, KiraError> {
        if is_empty_file(&self.path)? {
            return Ok(None);
        }
        let mut reader = csv::Reader::from_path(self.path.as_std_path())
            .map_err(|err| KiraError::corrupt(&self.path, err))?;
        let header = reader
            .headers()
            .map_err(|err| KiraError::corrupt(&self.path, err))?;
        Ok(Some(header.iter().map(str::to_string).collect()))
    }
}

impl RecordStore for MetadataTable {
    type Row = Record;

    fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<Record>, KiraError> {
        let Some(content) = read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        let header = reader
            .headers()
            .map_err(|err| KiraError::corrupt(&self.path, err))?
            .clone();
        if !header.iter().any(|name| name == ACCESSION_FIELD) {
            return Err(KiraError::corrupt(&self.path, "no accession column"));
        }
        let mut rows = Vec::new();
        for (number, row) in reader.records().enumerate() {
            let row = row.map_err(|err| KiraError::corrupt(&self.path, err))?;
            let fields = header
                .iter()
                .zip(row.iter())
                .map(|(name, value)| (name.to_string(), Some(value.to_string())))
                .collect();
            let record = Record::from_fields(fields).map_err(|err| {
                KiraError::corrupt(&self.path, format!("row {}: {err}", number + 1))
            })?;
            rows.push(record);
        }
        Ok(rows)
    }

    fn append_all(&self, rows: &[Record]) -> Result<(), KiraError> {
        if rows.is_empty() {
            return Ok(());
        }
        let Some(header) = self.read_header()? else {
            return self.overwrite(rows);
        };
        let fits = rows
            .iter()
            .all(|row| row.field_names().all(|name| header.iter().any(|h| h == name)));
        if !fits {
            info!(path = %self.path, "new metadata fields; rewriting table with widened header");
            let mut all = self.load()?;
            all.extend(rows.iter().cloned());
            return self.overwrite(&all);
        }
        let file = open_append(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        write_records(&mut writer, &header, rows).map_err(|err| KiraError::write(&self.path, err))?;
        info!(path = %self.path, count = rows.len(), "metadata entries appended");
        Ok(())
    }

    fn overwrite(&self, rows: &[Record]) -> Result<(), KiraError> {
        let header = union_header(rows);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record(&header)
            .map_err(|err| KiraError::write(&self.path, err))?;
        write_records(&mut writer, &header, rows).map_err(|err| KiraError::write(&self.path, err))?;
        let content = writer
            .into_inner()
            .map_err(|err| KiraError::write(&self.path, err.error()))?;
        write_bytes_atomic(&self.path, &content)
    }
}

/// Column names in first-seen order, `accession` always first.
pub fn union_header<R: AccessionRow>(rows: &[R]) -> Vec<String> {
    let mut header = vec![ACCESSION_FIELD.to_string()];
    for row in rows {
        for (name, _) in row.fields() {
            if !header.contains(&name) {
                header.push(name);
            }
        }
    }
    header
}

pub(crate) fn write_records<W: Write, R: AccessionRow>(
    writer: &mut csv::Writer<W>,
    header: &[String],
    rows: &[R],
) -> csv::Result<()> {
    for row in rows {
        let fields = row.fields();
        let values = header.iter().map(|column| {
            fields
                .iter()
                .find(|(name, _)| name == column)
                .and_then(|(_, value)| value.as_deref())
                .unwrap_or("")
        });
        writer.write_record(values)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn temp_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn missing_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = VersionIndex::new(temp_path(&dir, "ids.txt"));
        assert!(index.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_version_index_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "ids.txt");
        fs::write(path.as_std_path(), "A1.1\nnot-an-accession\n").unwrap();
        let err = VersionIndex::new(path).load().unwrap_err();
        assert_matches!(err, KiraError::CorruptStore { .. });
    }

    #[test]
    fn empty_file_check_surfaces_metadata_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = temp_path(&dir, "blocker");
        fs::write(blocker.as_std_path(), "x").unwrap();

        assert!(is_empty_file(&temp_path(&dir, "absent.csv")).unwrap());
        assert!(!is_empty_file(&blocker).unwrap());
        let err = is_empty_file(&blocker.join("removed.csv")).unwrap_err();
        assert_matches!(err, KiraError::StoreWrite { .. });
    }

    #[test]
    fn removed_log_append_fails_without_a_second_header() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = temp_path(&dir, "blocker");
        fs::write(blocker.as_std_path(), "x").unwrap();
        let log = RemovedLog::new(blocker.join("removed.csv"));

        let err = log
            .append_all(&[RemovedEntry::new("AB1.1", "length")])
            .unwrap_err();
        assert_matches!(err, KiraError::StoreWrite { .. });
        assert_eq!(fs::read_to_string(blocker.as_std_path()).unwrap(), "x");
    }

    #[test]
    fn metadata_append_widens_header() {
        let dir = tempfile::tempdir().unwrap();
        let table = MetadataTable::new(temp_path(&dir, "metadata.csv"));
        table
            .append_all(&[Record::new("A1.1").with("country", Some("DE"))])
            .unwrap();
        table
            .append_all(&[Record::new("B1.1").with("haplogroup", Some("H1"))])
            .unwrap();

        let rows = table.load().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("country"), Some("DE"));
        assert_eq!(rows[0].get("haplogroup"), None);
        assert_eq!(rows[1].get("haplogroup"), Some("H1"));
    }
}
