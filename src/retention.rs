use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{error, info};

use crate::error::KiraError;

pub const ARTIFACT_EXTENSIONS: [&str; 3] = ["txt", "csv", "log"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub kept: usize,
    pub removed: Vec<Utf8PathBuf>,
    pub failures: Vec<CleanupFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub path: Utf8PathBuf,
    pub message: String,
}

impl From<KiraError> for CleanupFailure {
    fn from(value: KiraError) -> Self {
        match value {
            KiraError::FileCleanup { path, message } => Self { path, message },
            other => Self {
                path: Utf8PathBuf::new(),
                message: other.to_string(),
            },
        }
    }
}

/// Deletes each path, continuing past failures.
pub fn remove_files(paths: Vec<Utf8PathBuf>) -> (Vec<Utf8PathBuf>, Vec<CleanupFailure>) {
    let mut removed = Vec::new();
    let mut failures = Vec::new();
    for path in paths {
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => {
                info!(%path, "removed old file");
                removed.push(path);
            }
            Err(err) => {
                let failure = KiraError::FileCleanup {
                    path: path.clone(),
                    message: err.to_string(),
                };
                error!(error = %failure, "cleanup failed");
                failures.push(CleanupFailure::from(failure));
            }
        }
    }
    (removed, failures)
}

/// Keeps the `keep_last` newest artifacts in `dir` and deletes the rest.
/// Artifact names embed their run stamp, so newest is the greatest file name;
/// modification times are not consulted. A missing directory is an empty report.
pub fn retain_recent(dir: &Utf8Path, keep_last: usize) -> Result<RetentionReport, KiraError> {
    if !dir.as_std_path().exists() {
        return Ok(RetentionReport::default());
    }
    let entries = dir
        .read_dir_utf8()
        .map_err(|err| KiraError::Filesystem(format!("read {dir}: {err}")))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let path = entry.path().to_path_buf();
        let is_artifact = path
            .extension()
            .is_some_and(|ext| ARTIFACT_EXTENSIONS.contains(&ext));
        if !is_artifact || !path.as_std_path().is_file() {
            continue;
        }
        files.push(path);
    }

    if files.len() <= keep_last {
        info!(%dir, found = files.len(), "no cleanup needed");
        return Ok(RetentionReport {
            kept: files.len(),
            ..RetentionReport::default()
        });
    }

    files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    let stale = files.split_off(keep_last);
    let (removed, failures) = remove_files(stale);
    info!(%dir, keep_last, removed = removed.len(), "cleanup complete");
    Ok(RetentionReport {
        kept: files.len(),
        removed,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_not_an_error() {
        let report = retain_recent(Utf8Path::new("/nonexistent/kira-as/debug"), 3).unwrap();
        assert!(report.removed.is_empty());
    }

    #[test]
    fn keeps_only_recent_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        for name in ["a.csv", "b.csv", "c.log", "d.txt", "keep.json"] {
            fs::write(root.join(name).as_std_path(), name).unwrap();
        }
        let report = retain_recent(&root, 2).unwrap();
        assert_eq!(report.kept, 2);
        assert_eq!(report.removed.len(), 2);
        assert!(root.join("keep.json").as_std_path().exists());
    }

    #[test]
    fn newest_run_stamp_survives_regardless_of_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        // Oldest stamp written last, so it has the newest modification time.
        for name in [
            "dbg_20240103-000000.csv",
            "dbg_20240102-000000.csv",
            "dbg_20240101-000000.csv",
        ] {
            fs::write(root.join(name).as_std_path(), name).unwrap();
        }

        let report = retain_recent(&root, 2).unwrap();

        assert_eq!(report.removed, vec![root.join("dbg_20240101-000000.csv")]);
        let mut left = fs::read_dir(root.as_std_path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        left.sort();
        assert_eq!(
            left,
            vec![
                "dbg_20240102-000000.csv".to_string(),
                "dbg_20240103-000000.csv".to_string()
            ]
        );
    }

    #[test]
    fn failed_deletion_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let stuck = root.join("stuck.csv");
        fs::create_dir(stuck.as_std_path()).unwrap();
        let plain = root.join("plain.csv");
        fs::write(plain.as_std_path(), "x").unwrap();

        let (removed, failures) = remove_files(vec![stuck.clone(), plain.clone()]);

        assert_eq!(removed, vec![plain.clone()]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, stuck);
        assert!(!plain.as_std_path().exists());
        assert!(stuck.as_std_path().exists());
    }
}
