use std::collections::BTreeSet;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::identifier_root;
use crate::error::KiraError;
use crate::retention::{CleanupFailure, remove_files};
use crate::store::write_bytes_atomic;

const FASTA_EXT: &str = "fasta";
const LINE_WIDTH: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub accession: String,
    #[serde(default)]
    pub description: String,
    pub sequence: String,
}

/// Directory of `<identifier>.fasta` files, one per kept accession.
#[derive(Debug, Clone)]
pub struct SequenceDir {
    dir: Utf8PathBuf,
}

impl SequenceDir {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn path_for(&self, accession: &str) -> Utf8PathBuf {
        self.dir
            .join(format!("{}.{FASTA_EXT}", identifier_root(accession)))
    }

    /// `(root, path)` of every stored sequence file; the extension match ignores case.
    pub fn files(&self) -> Result<Vec<(String, Utf8PathBuf)>, KiraError> {
        let entries = match self.dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(KiraError::Filesystem(format!("read {}: {err}", self.dir))),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let path = entry.path();
            let is_fasta = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(FASTA_EXT));
            if !is_fasta {
                continue;
            }
            if let Some(root) = path.file_stem() {
                files.push((root.to_string(), path.to_path_buf()));
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn roots(&self) -> Result<BTreeSet<String>, KiraError> {
        Ok(self.files()?.into_iter().map(|(root, _)| root).collect())
    }

    /// Deletes every file whose root is not in `valid_roots`. Individual failures
    /// are reported and do not stop the remaining deletions.
    pub fn remove_strays(
        &self,
        valid_roots: &BTreeSet<String>,
    ) -> Result<(usize, Vec<CleanupFailure>), KiraError> {
        let strays = self
            .files()?
            .into_iter()
            .filter(|(root, _)| !valid_roots.contains(root))
            .map(|(_, path)| path)
            .collect::<Vec<_>>();
        for path in &strays {
            debug!(%path, "removing sequence file not in keep-set");
        }
        let (removed, failures) = remove_files(strays);
        Ok((removed.len(), failures))
    }

    /// Writes the record as FASTA, replacing every `D` residue with a gap.
    pub fn write_fasta(&self, record: &SequenceRecord) -> Result<Utf8PathBuf, KiraError> {
        let path = self.path_for(&record.accession);
        let mut content = String::new();
        content.push('>');
        content.push_str(&record.accession);
        if !record.description.is_empty() {
            content.push(' ');
            content.push_str(&record.description);
        }
        content.push('\n');
        let cleaned = clean_sequence(&record.sequence);
        for chunk in cleaned.as_bytes().chunks(LINE_WIDTH) {
            content.push_str(&String::from_utf8_lossy(chunk));
            content.push('\n');
        }
        write_bytes_atomic(&path, content.as_bytes())?;
        debug!(%path, accession = %record.accession, "FASTA written");
        Ok(path)
    }
}

pub fn clean_sequence(sequence: &str) -> String {
    sequence
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .map(|ch| if ch == 'D' { '-' } else { ch })
        .collect()
}
