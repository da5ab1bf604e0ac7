//! Error taxonomy shared by the client, the stores and the streams.
//!
//! "Absent" is never an error: lookups return `Option`/`bool`. `NotFound` is
//! only produced where the caller requires the path to exist.

use reqwest::{Method, StatusCode};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("{method} {uri} failed with status {status}")]
    Connection {
        status: StatusCode,
        method: Method,
        uri: String,
    },

    #[error("{method} {uri} failed: {source}")]
    Transport {
        method: Method,
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("illegal path or locality request: {uri}")]
    IllegalLocality { uri: String },

    #[error("no such path: {0}")]
    NotFound(String),

    #[error("path already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("rename `{src}` -> `{dst}` stopped after {moved} objects: {source}")]
    PartialRename {
        src: String,
        dst: String,
        moved: usize,
        #[source]
        source: Box<FsError>,
    },

    #[error("checksum mismatch for `{key}`: expected {expected}, store returned {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("inconsistent store state: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

/// Host-framework view: `NotFound` becomes "no such path", the rest are I/O failures.
impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            FsError::AlreadyExists(_) => io::Error::new(io::ErrorKind::AlreadyExists, err),
            FsError::InvalidArgument(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            FsError::Io(inner) => inner,
            other => io::Error::other(other),
        }
    }
}
