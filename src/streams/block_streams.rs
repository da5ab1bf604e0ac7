//! Block-layout writer and reader.
//!
//! The writer cuts the byte stream into `block_size` blocks, uploads each
//! under a fresh random id and rewrites the inode after every block, so the
//! inode always lists exactly the committed blocks. The reader maps offsets
//! to blocks and pulls the covering block into a local temp file.

use crate::{
    errors::{FsError, FsResult},
    models::{
        inode::{BlockRef, Inode, block_object_name},
        key::ObjectKey,
    },
    services::client::{ObjectStoreClient, Payload},
    streams::segment::{SpoolFile, download_range},
};
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use tempfile::TempPath;
use tokio::{fs::File, io::AsyncReadExt};
use tracing::{debug, warn};

/// Give up allocating a block id after this many collisions in a row.
const MAX_ID_ATTEMPTS: usize = 16;

pub struct BlockWriter {
    client: ObjectStoreClient,
    key: ObjectKey,
    block_size: u64,
    buffer_size: usize,
    spool: SpoolFile,
    blocks: Vec<BlockRef>,
    closed: bool,
}

impl BlockWriter {
    pub fn new(
        client: ObjectStoreClient,
        key: ObjectKey,
        block_size: u64,
        buffer_size: usize,
    ) -> FsResult<Self> {
        if block_size == 0 {
            return Err(FsError::InvalidArgument("block size must be positive".into()));
        }
        Ok(Self {
            client,
            key,
            block_size,
            buffer_size,
            spool: SpoolFile::new(buffer_size)?,
            blocks: Vec::new(),
            closed: false,
        })
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Blocks committed so far.
    pub fn blocks(&self) -> &[BlockRef] {
        &self.blocks
    }

    pub async fn write(&mut self, mut data: &[u8]) -> FsResult<()> {
        if self.closed {
            return Err(FsError::InvalidArgument(format!(
                "write to closed stream {}",
                self.key
            )));
        }
        while !data.is_empty() {
            let room = (self.block_size - self.spool.len()) as usize;
            let take = room.min(data.len());
            self.spool.write(&data[..take]).await?;
            data = &data[take..];
            if self.spool.len() >= self.block_size {
                self.commit_block().await?;
            }
        }
        Ok(())
    }

    /// Commit the trailing partial block, if any, and write the final inode.
    pub async fn close(&mut self) -> FsResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.spool.is_empty() {
            self.commit_block().await?;
        } else {
            write_inode(&self.client, &self.key, &Inode::file(self.blocks.clone())).await?;
        }
        debug!("closed {} with {} blocks", self.key, self.blocks.len());
        Ok(())
    }

    async fn commit_block(&mut self) -> FsResult<()> {
        let spool = std::mem::replace(&mut self.spool, SpoolFile::new(self.buffer_size)?);
        let spooled = spool.finish().await?;
        let id = allocate_block_id(&self.client).await?;
        let block_key = self.client.key_for_name(&block_object_name(id));

        let response = self
            .client
            .put(&block_key, HeaderMap::new(), spooled.payload())
            .await?;
        spooled.verify(&block_key, &response)?;

        self.blocks.push(BlockRef {
            id,
            length: spooled.length,
        });
        write_inode(&self.client, &self.key, &Inode::file(self.blocks.clone())).await
    }
}

impl Drop for BlockWriter {
    fn drop(&mut self) {
        if !self.closed && !self.spool.is_empty() {
            warn!(
                "block writer for {} dropped without close, {} buffered bytes discarded",
                self.key,
                self.spool.len()
            );
        }
    }
}

/// Random 63-bit id not yet used by any block.
async fn allocate_block_id(client: &ObjectStoreClient) -> FsResult<u64> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let id = rand::random::<u64>() >> 1;
        let key = client.key_for_name(&block_object_name(id));
        if client.head(&key).await?.is_none() {
            return Ok(id);
        }
        debug!("block id {} already taken", id);
    }
    Err(FsError::Corrupt(format!(
        "no free block id after {MAX_ID_ATTEMPTS} attempts"
    )))
}

pub(crate) async fn write_inode(
    client: &ObjectStoreClient,
    key: &ObjectKey,
    inode: &Inode,
) -> FsResult<()> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    client
        .put(key, headers, Payload::Bytes(Bytes::from(inode.encode()?)))
        .await?;
    Ok(())
}

/// The block currently materialized on local disk.
struct LocalBlock {
    file: File,
    _path: TempPath,
    remaining: u64,
}

pub struct BlockReader {
    client: ObjectStoreClient,
    path: String,
    inode: Inode,
    length: u64,
    position: u64,
    current: Option<LocalBlock>,
}

impl BlockReader {
    pub fn new(client: ObjectStoreClient, path: String, inode: Inode) -> Self {
        let length = inode.length();
        Self {
            client,
            path,
            inode,
            length,
            position: 0,
            current: None,
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// Position at `target`, fetching the covering block from `target` onwards.
    pub async fn seek(&mut self, target: u64) -> FsResult<()> {
        if target > self.length {
            return Err(FsError::InvalidArgument(format!(
                "seek to {target} past end of {} ({} bytes)",
                self.path, self.length
            )));
        }
        if target == self.length {
            self.current = None;
            self.position = target;
            return Ok(());
        }

        let (idx, within) = self.inode.locate(target).ok_or_else(|| {
            FsError::Corrupt(format!("{}: no block covers offset {target}", self.path))
        })?;
        let block = self.inode.blocks[idx];
        let key = self.client.key_for_name(&block.object_name());
        let remaining = block.length - within;
        let (file, path) = download_range(&self.client, &key, within, remaining)
            .await?
            .ok_or_else(|| {
                FsError::Corrupt(format!("{}: block {} is missing", self.path, block.id))
            })?;
        debug!(
            "{}: block {} (#{} at {}) loaded from {}",
            self.path,
            block.id,
            idx,
            self.inode.block_start(idx),
            within
        );

        // Replacing the previous block drops (and deletes) its temp file.
        self.current = Some(LocalBlock {
            file,
            _path: path,
            remaining,
        });
        self.position = target;
        Ok(())
    }

    /// Read up to `buf.len()` bytes; `Ok(0)` at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        if buf.is_empty() || self.position >= self.length {
            return Ok(0);
        }
        if self.current.as_ref().is_none_or(|b| b.remaining == 0) {
            self.seek(self.position).await?;
        }
        let Some(block) = self.current.as_mut() else {
            return Ok(0);
        };

        let want = (buf.len() as u64).min(block.remaining) as usize;
        let n = block.file.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(FsError::Corrupt(format!(
                "{}: local copy of block ended early at {}",
                self.path, self.position
            )));
        }
        block.remaining -= n as u64;
        self.position += n as u64;
        Ok(n)
    }

    pub async fn read_fully(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    pub async fn read_to_end(&mut self) -> FsResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.length.saturating_sub(self.position) as usize);
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Release the local copy of the current block.
    pub fn close(&mut self) {
        self.current = None;
    }
}
