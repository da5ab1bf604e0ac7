//! Inode and block references of the block layout.

use crate::errors::{FsError, FsResult};
use serde::{Deserialize, Serialize};

/// Object-name prefix under which every block lives.
pub const BLOCK_PREFIX: &str = ".blocks/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InodeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Random identifier, always below 2^63.
    pub id: u64,
    pub length: u64,
}

impl BlockRef {
    pub fn object_name(&self) -> String {
        block_object_name(self.id)
    }
}

pub fn block_object_name(id: u64) -> String {
    format!("{BLOCK_PREFIX}block_{id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub kind: InodeKind,
    #[serde(default)]
    pub blocks: Vec<BlockRef>,
}

impl Inode {
    pub fn directory() -> Self {
        Self {
            kind: InodeKind::Directory,
            blocks: Vec::new(),
        }
    }

    pub fn file(blocks: Vec<BlockRef>) -> Self {
        Self {
            kind: InodeKind::File,
            blocks,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    pub fn length(&self) -> u64 {
        self.blocks.iter().map(|b| b.length).sum()
    }

    pub fn encode(&self) -> FsResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(name: &str, bytes: &[u8]) -> FsResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| FsError::Corrupt(format!("inode `{name}` is unreadable: {err}")))
    }

    /// Locate the block covering `offset`: `(block index, offset within block)`.
    ///
    /// Offsets on a boundary belong to the later block. `None` when no block
    /// covers the offset, which for `offset < length()` means the inode is
    /// inconsistent.
    pub fn locate(&self, offset: u64) -> Option<(usize, u64)> {
        let mut start = 0u64;
        for (idx, block) in self.blocks.iter().enumerate() {
            let end = start + block.length;
            if offset >= start && offset < end {
                return Some((idx, offset - start));
            }
            start = end;
        }
        None
    }

    /// Absolute start offset of block `idx`.
    pub fn block_start(&self, idx: usize) -> u64 {
        self.blocks.iter().take(idx).map(|b| b.length).sum()
    }
}
