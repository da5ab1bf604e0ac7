//! PartitionedWriter: buffered upload that splits large files into parts.
//!
//! Bytes are buffered in a local temp file. Whenever a `write` call leaves
//! the current segment at or above `partition_size`, the segment is uploaded
//! as `key/<n>` (n counting from 1). On close:
//!
//! - no part uploaded yet: the buffer goes straight to `key`
//! - otherwise: the remainder becomes the last part (possibly empty) and a
//!   zero-length manifest declaring `container/key/` is written at `key`
//!
//! The temp file is removed on every exit path, including drops without close.

use crate::{
    errors::{FsError, FsResult},
    models::{headers::OBJECT_MANIFEST, key::ObjectKey},
    services::client::{ObjectStoreClient, Payload},
    streams::segment::SpoolFile,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

pub struct PartitionedWriter {
    client: ObjectStoreClient,
    key: ObjectKey,
    partition_size: u64,
    buffer_size: usize,
    segment: SpoolFile,
    partitions_written: u32,
    bytes_written: u64,
    closed: bool,
}

impl PartitionedWriter {
    pub fn new(
        client: ObjectStoreClient,
        key: ObjectKey,
        partition_size: u64,
        buffer_size: usize,
    ) -> FsResult<Self> {
        if partition_size == 0 {
            return Err(FsError::InvalidArgument("partition size must be positive".into()));
        }
        Ok(Self {
            client,
            key,
            partition_size,
            buffer_size,
            segment: SpoolFile::new(buffer_size)?,
            partitions_written: 0,
            bytes_written: 0,
            closed: false,
        })
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Parts uploaded so far, including the final one once closed.
    pub fn partitions_written(&self) -> u32 {
        self.partitions_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub async fn write(&mut self, data: &[u8]) -> FsResult<()> {
        if self.closed {
            return Err(FsError::InvalidArgument(format!(
                "write to closed stream {}",
                self.key
            )));
        }
        self.segment.write(data).await?;
        self.bytes_written += data.len() as u64;

        if self.segment.len() >= self.partition_size {
            self.upload_next_part().await?;
        }
        Ok(())
    }

    /// Finish the upload. Closing twice is a no-op.
    pub async fn close(&mut self) -> FsResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.partitions_written == 0 {
            let segment = std::mem::replace(&mut self.segment, SpoolFile::new(self.buffer_size)?);
            return upload_segment(&self.client, &self.key, segment).await;
        }

        self.upload_next_part().await?;
        let prefix = format!("{}/{}", self.key.container(), self.key.child_prefix());
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-object-manifest"),
            HeaderValue::from_str(&prefix).map_err(|_| {
                FsError::InvalidArgument(format!("cannot use `{prefix}` as {OBJECT_MANIFEST}"))
            })?,
        );
        self.client.put(&self.key, headers, Payload::Empty).await?;
        debug!(
            "wrote manifest {} over {} parts ({} bytes)",
            self.key, self.partitions_written, self.bytes_written
        );
        Ok(())
    }

    async fn upload_next_part(&mut self) -> FsResult<()> {
        let part = self.key.child(&(self.partitions_written + 1).to_string());
        let segment = std::mem::replace(&mut self.segment, SpoolFile::new(self.buffer_size)?);
        upload_segment(&self.client, &part, segment).await?;
        self.partitions_written += 1;
        Ok(())
    }
}

async fn upload_segment(client: &ObjectStoreClient, key: &ObjectKey, segment: SpoolFile) -> FsResult<()> {
    let spooled = segment.finish().await?;
    let length = spooled.length;
    let response = client
        .put(key, HeaderMap::new(), spooled.payload())
        .await?;
    spooled.verify(key, &response)?;
    debug!("uploaded {} ({} bytes)", key, length);
    Ok(())
}

impl Drop for PartitionedWriter {
    fn drop(&mut self) {
        if !self.closed && self.bytes_written > 0 {
            warn!(
                "writer for {} dropped without close, {} buffered bytes discarded",
                self.key,
                self.segment.len()
            );
        }
    }
}

/// Part objects of a manifest in concatenation order: numeric suffixes
/// numerically, anything else lexically after them.
pub fn order_parts(names: &mut [String]) {
    names.sort_by(|a, b| {
        let tail = |s: &str| s.rsplit('/').next().and_then(|t| t.parse::<u64>().ok());
        match (tail(a), tail(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    });
}
