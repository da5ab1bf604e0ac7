//! Filesystem-facing views computed on demand from store responses.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Status of one path. Never cached beyond the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    /// Absolute path, e.g. `/dir/file`.
    pub path: String,
    pub length: u64,
    pub is_directory: bool,
    pub block_size: u64,
    pub last_modified: DateTime<Utc>,
}

impl FileStatus {
    pub fn directory(path: impl Into<String>, block_size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            length: 0,
            is_directory: true,
            block_size,
            last_modified,
        }
    }

    pub fn file(
        path: impl Into<String>,
        length: u64,
        block_size: u64,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            path: path.into(),
            length,
            is_directory: false,
            block_size,
            last_modified,
        }
    }

    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }
}

/// Where a byte range of a file lives. Object stores expose no locality, so
/// hosts are nominal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockLocation {
    pub hosts: Vec<String>,
    pub names: Vec<String>,
    pub offset: u64,
    pub length: u64,
}

impl BlockLocation {
    pub const HOST: &'static str = "localhost";

    pub fn local(offset: u64, length: u64) -> Self {
        Self {
            hosts: vec![Self::HOST.to_string()],
            names: vec![format!("{}:{}", Self::HOST, 0)],
            offset,
            length,
        }
    }
}
