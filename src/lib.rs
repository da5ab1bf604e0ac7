//! POSIX-like filesystem over a Swift-style HTTP object store.

pub mod config;
pub mod errors;
pub mod fs;
pub mod models;
pub mod services;
pub mod streams;

pub use config::{FsConfig, Layout};
pub use errors::{FsError, FsResult};
pub use fs::{FileReader, FileWriter, ObjectFileSystem, Store};
pub use models::{
    key::ObjectKey,
    status::{BlockLocation, FileStatus},
};
