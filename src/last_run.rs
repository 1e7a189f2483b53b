use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use tracing::info;

use crate::error::KiraError;
use crate::store::write_bytes_atomic;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Single-line `YYYY-MM-DD` stamp of the last completed fetch run.
#[derive(Debug, Clone)]
pub struct LastRun {
    path: Utf8PathBuf,
}

impl LastRun {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn read(&self) -> Result<Option<NaiveDate>, KiraError> {
        let content = match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(KiraError::corrupt(&self.path, err)),
        };
        let date = parse_date(content.trim())?;
        info!(%date, "last run date fetched");
        Ok(Some(date))
    }

    /// Stamps `date`, or today when `None`.
    pub fn write(&self, date: Option<NaiveDate>) -> Result<NaiveDate, KiraError> {
        let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
        let content = format!("{}\n", date.format(DATE_FORMAT));
        write_bytes_atomic(&self.path, content.as_bytes())?;
        info!(%date, path = %self.path, "last run date written");
        Ok(date)
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, KiraError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|err| KiraError::InvalidDate(format!("{value}: {err}")))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn missing_stamp_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("last_run.txt")).unwrap();
        assert_eq!(LastRun::new(path).read().unwrap(), None);
    }

    #[test]
    fn stamp_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("last_run.txt")).unwrap();
        let last_run = LastRun::new(path);
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        last_run.write(Some(date)).unwrap();
        assert_eq!(last_run.read().unwrap(), Some(date));
    }

    #[test]
    fn garbage_stamp_is_an_error() {
        assert_matches!(parse_date("09/03/2024"), Err(KiraError::InvalidDate(_)));
    }
}
