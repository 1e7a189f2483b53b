use std::path::PathBuf;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("malformed accession: {0}")]
    MalformedAccession(String),

    #[error("corrupt store at {path}: {message}")]
    #[diagnostic(help("the store file exists but could not be parsed; fix or move it aside"))]
    CorruptStore { path: Utf8PathBuf, message: String },

    #[error("failed to write store at {path}: {message}")]
    StoreWrite { path: Utf8PathBuf, message: String },

    #[error("failed to remove {path}: {message}")]
    FileCleanup { path: Utf8PathBuf, message: String },

    #[error("missing config file kira-as.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid fetch batch: {0}")]
    InvalidBatch(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    pub(crate) fn corrupt(path: &camino::Utf8Path, message: impl ToString) -> Self {
        KiraError::CorruptStore {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub(crate) fn write(path: &camino::Utf8Path, message: impl ToString) -> Self {
        KiraError::StoreWrite {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}
