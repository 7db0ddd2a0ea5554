use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures surfaced by the synchronization core.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("file not found: \"{}\"", .0.display())]
    NotFound(PathBuf),
    #[error("file type is not supported: \"{}\"", .0.display())]
    UnsupportedType(PathBuf),
    #[error("can not process file \"{}\": {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("can not read file \"{}\": {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can not write file \"{}\": {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed date/time: \"{0}\"")]
    MalformedDate(String),
}

impl SyncError {
    pub fn parse<T: Into<String>>(path: &Path, message: T) -> Self {
        SyncError::Parse {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn read(path: &Path, source: io::Error) -> Self {
        SyncError::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn write(path: &Path, source: io::Error) -> Self {
        SyncError::Write {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
