//! BlockStore: files as inodes referencing fixed-size block objects.
//!
//! Every path is an inode object holding JSON; file contents live under
//! `.blocks/`, which is hidden from root listings. Renames only move inodes,
//! the blocks themselves stay where they are.

use crate::{
    config::FsConfig,
    errors::{FsError, FsResult},
    models::{
        inode::{BLOCK_PREFIX, Inode},
        key::ObjectKey,
        status::{BlockLocation, FileStatus},
    },
    services::{
        client::ObjectStoreClient,
        namespace::{self, ChildEntry},
    },
    streams::block_streams::{BlockReader, BlockWriter, write_inode},
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct BlockStore {
    client: ObjectStoreClient,
    block_size: u64,
    buffer_size: usize,
}

impl BlockStore {
    pub fn new(client: ObjectStoreClient, cfg: &FsConfig) -> Self {
        Self {
            client,
            block_size: cfg.block_size,
            buffer_size: cfg.buffer_size,
        }
    }

    pub fn client(&self) -> &ObjectStoreClient {
        &self.client
    }

    /// The inode at `key` with the time the store last modified it.
    pub async fn inode(&self, key: &ObjectKey) -> FsResult<Option<(Inode, DateTime<Utc>)>> {
        if key.is_root() {
            return Ok(self
                .client
                .head(key)
                .await?
                .map(|h| (Inode::directory(), h.last_modified)));
        }
        match self.client.get(key).await? {
            Some((headers, body)) => Ok(Some((
                Inode::decode(key.name(), &body)?,
                headers.last_modified,
            ))),
            None => Ok(None),
        }
    }

    pub async fn metadata(&self, key: &ObjectKey) -> FsResult<Option<FileStatus>> {
        match self.inode(key).await? {
            Some((inode, modified)) if inode.is_directory() => Ok(Some(FileStatus::directory(
                key.path(),
                self.block_size,
                modified,
            ))),
            Some((inode, modified)) => Ok(Some(FileStatus::file(
                key.path(),
                inode.length(),
                self.block_size,
                modified,
            ))),
            None if !key.is_root() && self.client.has_prefix(&key.child_prefix()).await? => Ok(
                Some(FileStatus::directory(key.path(), self.block_size, Utc::now())),
            ),
            None => Ok(None),
        }
    }

    pub async fn list(&self, key: &ObjectKey) -> FsResult<Vec<FileStatus>> {
        let mut statuses = Vec::new();
        for entry in namespace::list_children(&self.client, key, Some(BLOCK_PREFIX)).await? {
            match entry {
                ChildEntry::Object(child) => match self.metadata(&child).await? {
                    Some(status) => statuses.push(status),
                    None => debug!("{} vanished between listing and GET", child),
                },
                ChildEntry::Prefix(child) => statuses.push(FileStatus::directory(
                    child.path(),
                    self.block_size,
                    Utc::now(),
                )),
            }
        }
        Ok(statuses)
    }

    pub async fn exists(&self, key: &ObjectKey) -> FsResult<bool> {
        namespace::exists_exactly(&self.client, key).await
    }

    pub async fn mkdir(&self, key: &ObjectKey) -> FsResult<bool> {
        if key.is_root() {
            return Ok(false);
        }
        match self.metadata(key).await? {
            Some(status) if status.is_directory => Ok(false),
            Some(_) => Err(FsError::NotADirectory(key.path())),
            None => {
                write_inode(&self.client, key, &Inode::directory()).await?;
                debug!("created directory inode {}", key);
                Ok(true)
            }
        }
    }

    pub async fn mkdirs(&self, key: &ObjectKey) -> FsResult<bool> {
        for ancestor in key.lineage() {
            self.mkdir(&ancestor).await?;
        }
        Ok(true)
    }

    pub async fn delete(&self, key: &ObjectKey, recursive: bool) -> FsResult<bool> {
        let Some((inode, _)) = self.inode(key).await? else {
            // An implicit directory still has to honor `recursive`.
            if !key.is_root() && self.client.has_prefix(&key.child_prefix()).await? {
                return self.delete_children(key, recursive).await;
            }
            return Ok(false);
        };
        if !inode.is_directory() {
            for block in &inode.blocks {
                let block_key = self.client.key_for_name(&block.object_name());
                if !self.client.delete(&block_key).await? {
                    warn!("{}: block {} was already gone", key, block.id);
                }
            }
            return self.client.delete(key).await;
        }

        self.delete_children(key, recursive).await?;
        if !key.is_root() {
            self.client.delete(key).await?;
        }
        Ok(true)
    }

    async fn delete_children(&self, key: &ObjectKey, recursive: bool) -> FsResult<bool> {
        let children = namespace::list_children(&self.client, key, Some(BLOCK_PREFIX)).await?;
        if !children.is_empty() && !recursive {
            return Err(FsError::DirectoryNotEmpty(key.path()));
        }
        for child in children {
            Box::pin(self.delete(child.key(), true)).await?;
        }
        Ok(true)
    }

    pub async fn rename(&self, src: &ObjectKey, dst: &ObjectKey) -> FsResult<bool> {
        let Some(src_status) = self.metadata(src).await? else {
            debug!("rename source {} does not exist", src);
            return Ok(false);
        };
        let dst_is_dir = self.metadata(dst).await?.map(|s| s.is_directory);
        let Some(target) = namespace::rename_target(src, dst, dst_is_dir) else {
            debug!("rename {} -> {} refused", src, dst);
            return Ok(false);
        };
        if target != *dst && self.metadata(&target).await?.is_some() {
            debug!("rename target {} already exists", target);
            return Ok(false);
        }

        let mut moved = 0;
        let outcome = self
            .move_inodes(src, &target, src_status.is_directory, &mut moved)
            .await;
        match outcome {
            Ok(()) => {
                info!("renamed {} -> {} ({} inodes)", src, target, moved);
                Ok(true)
            }
            Err(err) if moved == 0 => Err(err),
            Err(err) => Err(FsError::PartialRename {
                src: src.path(),
                dst: target.path(),
                moved,
                source: Box::new(err),
            }),
        }
    }

    async fn move_inodes(
        &self,
        src: &ObjectKey,
        target: &ObjectKey,
        is_directory: bool,
        moved: &mut usize,
    ) -> FsResult<()> {
        if is_directory {
            for name in self.client.list_names(&src.child_prefix(), None).await? {
                let from = self.client.key_for_name(&name);
                let Some(to) = from.rebase(src, target) else {
                    continue;
                };
                if self.client.copy(&from, &to).await? {
                    self.client.delete(&from).await?;
                    *moved += 1;
                }
            }
        }
        // Implicit directories have no inode of their own.
        if self.client.copy(src, target).await? {
            self.client.delete(src).await?;
            *moved += 1;
        } else if !is_directory {
            return Err(FsError::NotFound(src.path()));
        }
        Ok(())
    }

    pub fn create(&self, key: &ObjectKey) -> FsResult<BlockWriter> {
        BlockWriter::new(
            self.client.clone(),
            key.clone(),
            self.block_size,
            self.buffer_size,
        )
    }

    pub async fn open(&self, key: &ObjectKey) -> FsResult<BlockReader> {
        match self.inode(key).await? {
            Some((inode, _)) if inode.is_directory() => Err(FsError::InvalidArgument(format!(
                "{} is a directory",
                key.path()
            ))),
            Some((inode, _)) => Ok(BlockReader::new(self.client.clone(), key.path(), inode)),
            None => Err(FsError::NotFound(key.path())),
        }
    }

    /// One location per block overlapping `[start, start + len)`.
    pub async fn block_locations(
        &self,
        status: &FileStatus,
        start: u64,
        len: u64,
    ) -> FsResult<Vec<BlockLocation>> {
        if status.is_directory || len == 0 || start >= status.length {
            return Ok(Vec::new());
        }
        let key = self.client.key_for_name(&status.path);
        let Some((inode, _)) = self.inode(&key).await? else {
            return Err(FsError::NotFound(status.path.clone()));
        };
        let end = start.saturating_add(len);
        let mut locations = Vec::new();
        let mut offset = 0;
        for block in &inode.blocks {
            let block_end = offset + block.length;
            if block_end > start && offset < end {
                locations.push(BlockLocation::local(offset, block.length));
            }
            offset = block_end;
        }
        Ok(locations)
    }
}
