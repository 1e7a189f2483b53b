use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-as.json";
pub const DEFAULT_KEEP_LAST: usize = 3;

/// On-disk shape of `kira-as.json`. Every path is optional and relative paths
/// resolve against the directory holding the config file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub processed_ids_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub version_index: Option<Utf8PathBuf>,
    #[serde(default)]
    pub removed_log: Option<Utf8PathBuf>,
    #[serde(default)]
    pub metadata: Option<Utf8PathBuf>,
    #[serde(default)]
    pub sequences_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub debug_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub last_run: Option<Utf8PathBuf>,
    #[serde(default)]
    pub retention: Option<RetentionEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetentionEntry {
    #[serde(default)]
    pub keep_last: Option<usize>,
}

/// Every path the engine reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreConfig {
    pub processed_ids_dir: Utf8PathBuf,
    pub version_index: Utf8PathBuf,
    pub removed_log: Utf8PathBuf,
    pub metadata: Utf8PathBuf,
    pub sequences_dir: Utf8PathBuf,
    pub debug_dir: Utf8PathBuf,
    pub last_run: Utf8PathBuf,
    pub keep_last: usize,
}

impl StoreConfig {
    pub fn rooted_at(root: impl AsRef<Utf8Path>) -> Self {
        let root = root.as_ref();
        Self {
            processed_ids_dir: root.join("processed_ids"),
            version_index: root.join("ids.txt"),
            removed_log: root.join("removed.csv"),
            metadata: root.join("metadata.csv"),
            sequences_dir: root.join("sequences"),
            debug_dir: root.join("debug"),
            last_run: root.join("last_run.txt"),
            keep_last: DEFAULT_KEEP_LAST,
        }
    }

    pub fn ensure_dirs(&self) -> Result<(), KiraError> {
        let parents = [
            self.version_index.parent(),
            self.removed_log.parent(),
            self.metadata.parent(),
            self.last_run.parent(),
        ];
        let dirs = [
            Some(self.processed_ids_dir.as_path()),
            Some(self.sequences_dir.as_path()),
            Some(self.debug_dir.as_path()),
        ];
        for dir in parents.into_iter().chain(dirs).flatten() {
            if dir.as_str().is_empty() {
                continue;
            }
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| KiraError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `kira-as.json` from the working directory when no path is given.
    pub fn resolve(path: Option<&str>) -> Result<StoreConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        let base = Utf8PathBuf::from_path_buf(config_path.clone())
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_default();

        Self::resolve_config(config, &base)
    }

    pub fn resolve_config(config: Config, base: &Utf8Path) -> Result<StoreConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(KiraError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let anchor = |path: Utf8PathBuf| -> Utf8PathBuf {
            if path.is_absolute() {
                path
            } else {
                base.join(path)
            }
        };

        let root = anchor(config.data_root.unwrap_or_else(|| Utf8PathBuf::from(".")));
        let defaults = StoreConfig::rooted_at(&root);

        let keep_last = config
            .retention
            .and_then(|retention| retention.keep_last)
            .unwrap_or(DEFAULT_KEEP_LAST);
        if keep_last == 0 {
            return Err(KiraError::ConfigParse(
                "retention.keep_last must be at least 1".to_string(),
            ));
        }

        Ok(StoreConfig {
            processed_ids_dir: config
                .processed_ids_dir
                .map(anchor)
                .unwrap_or(defaults.processed_ids_dir),
            version_index: config
                .version_index
                .map(anchor)
                .unwrap_or(defaults.version_index),
            removed_log: config.removed_log.map(anchor).unwrap_or(defaults.removed_log),
            metadata: config.metadata.map(anchor).unwrap_or(defaults.metadata),
            sequences_dir: config
                .sequences_dir
                .map(anchor)
                .unwrap_or(defaults.sequences_dir),
            debug_dir: config.debug_dir.map(anchor).unwrap_or(defaults.debug_dir),
            last_run: config.last_run.map(anchor).unwrap_or(defaults.last_run),
            keep_last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_defaults_under_data_root() {
        let config = Config {
            data_root: Some(Utf8PathBuf::from("data")),
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config, Utf8Path::new("/srv/mito")).unwrap();
        assert_eq!(resolved.version_index, Utf8PathBuf::from("/srv/mito/data/ids.txt"));
        assert_eq!(
            resolved.processed_ids_dir,
            Utf8PathBuf::from("/srv/mito/data/processed_ids")
        );
        assert_eq!(resolved.keep_last, DEFAULT_KEEP_LAST);
    }
}
