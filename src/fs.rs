//! ObjectFileSystem: the filesystem-facing surface over either layout.
//!
//! Paths are absolute (`/dir/file`) or full URIs; both map onto keys in the
//! configured container. Expected absence is reported as `Option`/`bool`;
//! operations that require a path to exist return [`FsError::NotFound`].

use crate::{
    config::{FsConfig, Layout},
    errors::{FsError, FsResult},
    models::{
        key::ObjectKey,
        status::{BlockLocation, FileStatus},
    },
    services::{block_store::BlockStore, client::ObjectStoreClient, flat_store::FlatNamespaceStore},
    streams::{
        block_streams::{BlockReader, BlockWriter},
        partitioned_writer::PartitionedWriter,
        stream_reader::StreamReader,
    },
};
use tracing::{error, info};
use url::Url;

/// Storage strategy; both variants share the key mapping and the client.
#[derive(Clone)]
pub enum Store {
    Flat(FlatNamespaceStore),
    Block(BlockStore),
}

impl Store {
    pub fn for_layout(client: ObjectStoreClient, cfg: &FsConfig) -> Self {
        match cfg.layout {
            Layout::Flat => Store::Flat(FlatNamespaceStore::new(client, cfg)),
            Layout::Block => Store::Block(BlockStore::new(client, cfg)),
        }
    }

    pub fn client(&self) -> &ObjectStoreClient {
        match self {
            Store::Flat(store) => store.client(),
            Store::Block(store) => store.client(),
        }
    }

    pub fn layout(&self) -> Layout {
        match self {
            Store::Flat(_) => Layout::Flat,
            Store::Block(_) => Layout::Block,
        }
    }

    pub async fn metadata(&self, key: &ObjectKey) -> FsResult<Option<FileStatus>> {
        match self {
            Store::Flat(store) => store.metadata(key).await,
            Store::Block(store) => store.metadata(key).await,
        }
    }

    pub async fn list(&self, key: &ObjectKey) -> FsResult<Vec<FileStatus>> {
        match self {
            Store::Flat(store) => store.list(key).await,
            Store::Block(store) => store.list(key).await,
        }
    }

    pub async fn exists(&self, key: &ObjectKey) -> FsResult<bool> {
        match self {
            Store::Flat(store) => store.exists(key).await,
            Store::Block(store) => store.exists(key).await,
        }
    }

    pub async fn mkdirs(&self, key: &ObjectKey) -> FsResult<bool> {
        match self {
            Store::Flat(store) => store.mkdirs(key).await,
            Store::Block(store) => store.mkdirs(key).await,
        }
    }

    pub async fn delete(&self, key: &ObjectKey, recursive: bool) -> FsResult<bool> {
        match self {
            Store::Flat(store) => store.delete(key, recursive).await,
            Store::Block(store) => store.delete(key, recursive).await,
        }
    }

    pub async fn rename(&self, src: &ObjectKey, dst: &ObjectKey) -> FsResult<bool> {
        match self {
            Store::Flat(store) => store.rename(src, dst).await,
            Store::Block(store) => store.rename(src, dst).await,
        }
    }

    pub fn create(&self, key: &ObjectKey) -> FsResult<FileWriter> {
        Ok(match self {
            Store::Flat(store) => FileWriter::Flat(store.create(key)?),
            Store::Block(store) => FileWriter::Block(store.create(key)?),
        })
    }

    pub async fn open(&self, key: &ObjectKey) -> FsResult<FileReader> {
        Ok(match self {
            Store::Flat(store) => FileReader::Flat(store.open(key).await?),
            Store::Block(store) => FileReader::Block(store.open(key).await?),
        })
    }

    pub async fn block_locations(
        &self,
        status: &FileStatus,
        start: u64,
        len: u64,
    ) -> FsResult<Vec<BlockLocation>> {
        match self {
            Store::Flat(store) => Ok(store.block_locations(status, start, len)),
            Store::Block(store) => store.block_locations(status, start, len).await,
        }
    }
}

/// Sequential, seekable reader returned by [`ObjectFileSystem::open`].
pub enum FileReader {
    Flat(StreamReader),
    Block(BlockReader),
}

impl FileReader {
    pub fn len(&self) -> u64 {
        match self {
            FileReader::Flat(reader) => reader.len(),
            FileReader::Block(reader) => reader.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> u64 {
        match self {
            FileReader::Flat(reader) => reader.position(),
            FileReader::Block(reader) => reader.position(),
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        match self {
            FileReader::Flat(reader) => reader.read(buf).await,
            FileReader::Block(reader) => reader.read(buf).await,
        }
    }

    pub async fn read_fully(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        match self {
            FileReader::Flat(reader) => reader.read_fully(buf).await,
            FileReader::Block(reader) => reader.read_fully(buf).await,
        }
    }

    pub async fn read_to_end(&mut self) -> FsResult<Vec<u8>> {
        match self {
            FileReader::Flat(reader) => reader.read_to_end().await,
            FileReader::Block(reader) => reader.read_to_end().await,
        }
    }

    pub async fn seek(&mut self, offset: u64) -> FsResult<()> {
        match self {
            FileReader::Flat(reader) => reader.seek(offset),
            FileReader::Block(reader) => reader.seek(offset).await,
        }
    }

    pub fn close(&mut self) {
        match self {
            FileReader::Flat(reader) => reader.close(),
            FileReader::Block(reader) => reader.close(),
        }
    }
}

/// Buffered writer returned by [`ObjectFileSystem::create`]; nothing is
/// visible in the store until `close` returns.
pub enum FileWriter {
    Flat(PartitionedWriter),
    Block(BlockWriter),
}

impl FileWriter {
    pub fn key(&self) -> &ObjectKey {
        match self {
            FileWriter::Flat(writer) => writer.key(),
            FileWriter::Block(writer) => writer.key(),
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> FsResult<()> {
        match self {
            FileWriter::Flat(writer) => writer.write(data).await,
            FileWriter::Block(writer) => writer.write(data).await,
        }
    }

    pub async fn close(&mut self) -> FsResult<()> {
        match self {
            FileWriter::Flat(writer) => writer.close().await,
            FileWriter::Block(writer) => writer.close().await,
        }
    }
}

pub struct ObjectFileSystem {
    uri: Url,
    store: Store,
}

impl ObjectFileSystem {
    /// Validate the config, authenticate, ensure the container and pick the layout.
    pub async fn initialize(uri: &str, cfg: FsConfig) -> FsResult<Self> {
        cfg.validate()?;
        let client = ObjectStoreClient::connect(&cfg).await?;
        let fs = Self::from_client(uri, client, &cfg)?;
        info!(
            "mounted {} on container `{}` ({:?} layout)",
            fs.uri,
            fs.client().container(),
            fs.store.layout()
        );
        Ok(fs)
    }

    /// Wrap an already connected client.
    pub fn from_client(uri: &str, client: ObjectStoreClient, cfg: &FsConfig) -> FsResult<Self> {
        let uri = Url::parse(uri)
            .map_err(|err| FsError::InvalidArgument(format!("bad filesystem uri `{uri}`: {err}")))?;
        Ok(Self {
            uri,
            store: Store::for_layout(client, cfg),
        })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn client(&self) -> &ObjectStoreClient {
        self.store.client()
    }

    pub fn key(&self, path: &str) -> FsResult<ObjectKey> {
        self.client().key(path)
    }

    /// Open a new file for writing, replacing an existing file only if `overwrite`.
    pub async fn create(&self, path: &str, overwrite: bool) -> FsResult<FileWriter> {
        let key = self.key(path)?;
        if key.is_root() {
            return Err(FsError::AlreadyExists(key.path()));
        }
        match self.store.metadata(&key).await? {
            Some(status) if status.is_directory => return Err(FsError::AlreadyExists(key.path())),
            Some(_) if !overwrite => return Err(FsError::AlreadyExists(key.path())),
            // Old parts or blocks must not outlive the file they belonged to.
            Some(_) => {
                self.store.delete(&key, false).await?;
            }
            None => {}
        }
        if let Some(parent) = key.parent().filter(|p| !p.is_root()) {
            self.store.mkdirs(&parent).await?;
        }
        self.store.create(&key)
    }

    pub async fn open(&self, path: &str) -> FsResult<FileReader> {
        self.store.open(&self.key(path)?).await
    }

    /// Object stores cannot append to an existing object.
    pub async fn append(&self, path: &str) -> FsResult<FileWriter> {
        Err(FsError::InvalidArgument(format!(
            "append is not supported on object stores: {path}"
        )))
    }

    pub async fn delete(&self, path: &str, recursive: bool) -> FsResult<bool> {
        self.store.delete(&self.key(path)?, recursive).await
    }

    /// `false` when the rename was refused or stopped partway; a partial move
    /// is logged and leaves both trees as they are.
    pub async fn rename(&self, src: &str, dst: &str) -> FsResult<bool> {
        let (src, dst) = (self.key(src)?, self.key(dst)?);
        match self.store.rename(&src, &dst).await {
            Err(err @ FsError::PartialRename { .. }) => {
                error!("{err}; namespace may be inconsistent");
                Ok(false)
            }
            other => other,
        }
    }

    pub async fn mkdirs(&self, path: &str) -> FsResult<bool> {
        self.store.mkdirs(&self.key(path)?).await
    }

    pub async fn exists(&self, path: &str) -> FsResult<bool> {
        self.store.exists(&self.key(path)?).await
    }

    /// Children of a directory, or the file's own status.
    pub async fn list_status(&self, path: &str) -> FsResult<Vec<FileStatus>> {
        let key = self.key(path)?;
        match self.store.metadata(&key).await? {
            Some(status) if status.is_directory => self.store.list(&key).await,
            Some(status) => Ok(vec![status]),
            None => Err(FsError::NotFound(key.path())),
        }
    }

    pub async fn get_file_status(&self, path: &str) -> FsResult<FileStatus> {
        let key = self.key(path)?;
        self.store
            .metadata(&key)
            .await?
            .ok_or_else(|| FsError::NotFound(key.path()))
    }

    pub async fn get_file_block_locations(
        &self,
        status: &FileStatus,
        start: u64,
        len: u64,
    ) -> FsResult<Vec<BlockLocation>> {
        self.store.block_locations(status, start, len).await
    }
}
