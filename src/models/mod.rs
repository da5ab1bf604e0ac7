//! Data types shared by the client, the stores and the streams.
//!
//! Nothing here performs I/O; keys, statuses and inodes are plain values
//! derived from paths and store responses.

pub mod auth;
pub mod headers;
pub mod inode;
pub mod key;
pub mod status;
