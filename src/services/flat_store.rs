//! FlatNamespaceStore: one object per file, directories as marker objects.
//!
//! Metadata is derived from HEAD responses and never cached. Rename is
//! copy-then-delete, one object at a time, with no atomicity and no rollback:
//! a failure partway leaves both trees partially populated and is reported as
//! [`FsError::PartialRename`].

use crate::{
    config::FsConfig,
    errors::{FsError, FsResult},
    models::{
        headers::{DIRECTORY_CONTENT_TYPE, ObjectHeaders},
        key::ObjectKey,
        status::{BlockLocation, FileStatus},
    },
    services::{
        client::{ObjectStoreClient, Payload},
        namespace::{self, ChildEntry},
    },
    streams::{
        partitioned_writer::{PartitionedWriter, order_parts},
        stream_reader::{Segment, StreamReader},
    },
};
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct FlatNamespaceStore {
    client: ObjectStoreClient,
    block_size: u64,
    partition_size: u64,
    buffer_size: usize,
    lookahead: u64,
}

impl FlatNamespaceStore {
    pub fn new(client: ObjectStoreClient, cfg: &FsConfig) -> Self {
        Self {
            client,
            block_size: cfg.block_size,
            partition_size: cfg.partition_size,
            buffer_size: cfg.buffer_size,
            lookahead: cfg.lookahead,
        }
    }

    /// Override the per-object size threshold used by writers from this store.
    pub fn with_partition_size(mut self, partition_size: u64) -> Self {
        self.partition_size = partition_size;
        self
    }

    pub fn client(&self) -> &ObjectStoreClient {
        &self.client
    }

    pub async fn metadata(&self, key: &ObjectKey) -> FsResult<Option<FileStatus>> {
        match self.client.head(key).await? {
            Some(headers) => Ok(Some(self.status_from_headers(key, &headers).await?)),
            None if !key.is_root() && self.client.has_prefix(&key.child_prefix()).await? => Ok(
                Some(FileStatus::directory(key.path(), self.block_size, Utc::now())),
            ),
            None => Ok(None),
        }
    }

    async fn status_from_headers(
        &self,
        key: &ObjectKey,
        headers: &ObjectHeaders,
    ) -> FsResult<FileStatus> {
        let path = key.path();
        let modified = headers.last_modified;

        if key.is_root() || headers.is_container() {
            return Ok(FileStatus::directory(path, self.block_size, modified));
        }
        if let Some(manifest) = &headers.manifest {
            let length = match headers.length() {
                0 => self
                    .manifest_segments(key, manifest)
                    .await?
                    .iter()
                    .map(|s| s.length)
                    .sum(),
                reported => reported,
            };
            return Ok(FileStatus::file(path, length, self.block_size, modified));
        }
        if headers.is_directory_marker() {
            return Ok(FileStatus::directory(path, self.block_size, modified));
        }
        // A bare zero-length object is a directory only if something lives below it.
        if headers.length() == 0 && self.client.has_prefix(&key.child_prefix()).await? {
            return Ok(FileStatus::directory(path, self.block_size, modified));
        }
        Ok(FileStatus::file(path, headers.length(), self.block_size, modified))
    }

    /// Ordered, contiguous parts declared by a manifest value `container/prefix`.
    async fn manifest_segments(&self, key: &ObjectKey, manifest: &str) -> FsResult<Vec<Segment>> {
        let (container, prefix) = manifest.split_once('/').ok_or_else(|| {
            FsError::Corrupt(format!("{key}: malformed manifest `{manifest}`"))
        })?;
        if container != self.client.container() {
            return Err(FsError::Corrupt(format!(
                "{key}: manifest refers to foreign container `{container}`"
            )));
        }

        let mut names = self.client.list_names(prefix, None).await?;
        order_parts(&mut names);

        let mut segments = Vec::with_capacity(names.len());
        let mut start = 0;
        for name in names {
            let part = self.client.key_for_name(&name);
            let Some(headers) = self.client.head(&part).await? else {
                warn!("{}: part {} vanished while listing", key, part);
                continue;
            };
            segments.push(Segment {
                key: part,
                start,
                length: headers.length(),
            });
            start += headers.length();
        }
        Ok(segments)
    }

    /// Immediate children; entries that vanish before their HEAD are dropped.
    pub async fn list(&self, key: &ObjectKey) -> FsResult<Vec<FileStatus>> {
        let mut statuses = Vec::new();
        for entry in namespace::list_children(&self.client, key, None).await? {
            match entry {
                ChildEntry::Object(child) => match self.metadata(&child).await? {
                    Some(status) => statuses.push(status),
                    None => debug!("{} vanished between listing and HEAD", child),
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

    /// Create a marker for `key`; `false` if the directory already existed.
    pub async fn mkdir(&self, key: &ObjectKey) -> FsResult<bool> {
        if key.is_root() {
            return Ok(false);
        }
        match self.metadata(key).await? {
            Some(status) if status.is_directory => Ok(false),
            Some(_) => Err(FsError::NotADirectory(key.path())),
            None => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(DIRECTORY_CONTENT_TYPE));
                self.client.put(key, headers, Payload::Empty).await?;
                debug!("created directory marker {}", key);
                Ok(true)
            }
        }
    }

    /// `mkdir` every ancestor root-to-leaf, skipping the root itself.
    pub async fn mkdirs(&self, key: &ObjectKey) -> FsResult<bool> {
        for ancestor in key.lineage() {
            self.mkdir(&ancestor).await?;
        }
        Ok(true)
    }

    pub async fn delete(&self, key: &ObjectKey, recursive: bool) -> FsResult<bool> {
        let Some(status) = self.metadata(key).await? else {
            return Ok(false);
        };
        if !status.is_directory {
            return self.delete_file(key).await;
        }

        let children = namespace::list_children(&self.client, key, None).await?;
        if !children.is_empty() && !recursive {
            return Err(FsError::DirectoryNotEmpty(key.path()));
        }
        for child in children {
            Box::pin(self.delete(child.key(), true)).await?;
        }
        if !key.is_root() {
            // Implicit directories have no marker; a 404 here is fine.
            self.client.delete(key).await?;
        }
        Ok(true)
    }

    /// Delete one file, including every part when it is a manifest.
    async fn delete_file(&self, key: &ObjectKey) -> FsResult<bool> {
        let Some(headers) = self.client.head(key).await? else {
            return Ok(false);
        };
        if let Some(manifest) = &headers.manifest {
            for part in self.manifest_segments(key, manifest).await? {
                self.client.delete(&part.key).await?;
            }
        }
        self.client.delete(key).await
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
        let outcome = if src_status.is_directory {
            self.move_tree(src, &target, &mut moved).await
        } else {
            self.move_object(src, &target, &mut moved).await
        };
        match outcome {
            Ok(()) => {
                info!("renamed {} -> {} ({} objects)", src, target, moved);
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

    async fn move_tree(&self, src: &ObjectKey, target: &ObjectKey, moved: &mut usize) -> FsResult<()> {
        let descendants = self.client.list_names(&src.child_prefix(), None).await?;

        if self.client.head(src).await?.is_some() {
            self.client.copy(src, target).await?;
        }
        for name in descendants {
            let from = self.client.key_for_name(&name);
            let Some(to) = from.rebase(src, target) else {
                continue;
            };
            let Some(headers) = self.client.head(&from).await? else {
                debug!("{} vanished during rename", from);
                continue;
            };
            match &headers.manifest {
                // Parts are regular descendants and move on their own.
                Some(_) => {
                    self.write_manifest(&to).await?;
                    self.client.delete(&from).await?;
                }
                None => {
                    if self.client.copy(&from, &to).await? {
                        self.client.delete(&from).await?;
                    }
                }
            }
            *moved += 1;
        }
        self.client.delete(src).await?;
        Ok(())
    }

    /// Move one file; manifests take their parts along.
    async fn move_object(&self, src: &ObjectKey, target: &ObjectKey, moved: &mut usize) -> FsResult<()> {
        let Some(headers) = self.client.head(src).await? else {
            return Err(FsError::NotFound(src.path()));
        };

        if let Some(manifest) = &headers.manifest {
            let parts = self.manifest_segments(src, manifest).await?;
            for part in &parts {
                let to = part.key.rebase(src, target).ok_or_else(|| {
                    FsError::Corrupt(format!("{src}: part {} lies outside the file", part.key))
                })?;
                self.client.copy(&part.key, &to).await?;
                *moved += 1;
            }
            self.write_manifest(target).await?;
            for part in &parts {
                self.client.delete(&part.key).await?;
            }
            self.client.delete(src).await?;
            *moved += 1;
            return Ok(());
        }

        if !self.client.copy(src, target).await? {
            return Err(FsError::NotFound(src.path()));
        }
        *moved += 1;
        self.client.delete(src).await?;
        Ok(())
    }

    async fn write_manifest(&self, key: &ObjectKey) -> FsResult<()> {
        let value = format!("{}/{}", key.container(), key.child_prefix());
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-object-manifest"),
            HeaderValue::from_str(&value)
                .map_err(|_| FsError::InvalidArgument(format!("unusable manifest prefix `{value}`")))?,
        );
        self.client.put(key, headers, Payload::Empty).await?;
        Ok(())
    }

    pub fn create(&self, key: &ObjectKey) -> FsResult<PartitionedWriter> {
        PartitionedWriter::new(
            self.client.clone(),
            key.clone(),
            self.partition_size,
            self.buffer_size,
        )
    }

    pub async fn open(&self, key: &ObjectKey) -> FsResult<StreamReader> {
        let Some(headers) = self.client.head(key).await? else {
            return Err(FsError::NotFound(key.path()));
        };
        let segments = match &headers.manifest {
            Some(manifest) => self.manifest_segments(key, manifest).await?,
            None => {
                if self.status_from_headers(key, &headers).await?.is_directory {
                    return Err(FsError::InvalidArgument(format!("{} is a directory", key.path())));
                }
                vec![Segment {
                    key: key.clone(),
                    start: 0,
                    length: headers.length(),
                }]
            }
        };
        Ok(StreamReader::new(
            self.client.clone(),
            key.path(),
            segments,
            self.lookahead,
        ))
    }

    /// A flat file is one location; the store reports no locality.
    pub fn block_locations(&self, status: &FileStatus, start: u64, len: u64) -> Vec<BlockLocation> {
        if status.is_directory || len == 0 || start >= status.length {
            return Vec::new();
        }
        vec![BlockLocation::local(0, status.length)]
    }
}
