//! Local temp-file spools backing uploads and block downloads.
//!
//! Every spool owns a `TempPath`, so the file disappears when the spool is
//! dropped, whether the surrounding operation finished or failed.

use crate::{
    errors::{FsError, FsResult},
    models::{headers::ObjectHeaders, key::ObjectKey},
    services::client::{ObjectStoreClient, Payload},
};
use futures::StreamExt;
use md5::Context;
use reqwest::{Method, header::HeaderMap};
use std::io::SeekFrom;
use tempfile::{NamedTempFile, TempPath};
use tokio::{
    fs::File,
    io::{AsyncSeekExt, AsyncWriteExt, BufWriter},
};

/// Write side: bytes accumulate on disk while their MD5 is computed.
pub struct SpoolFile {
    writer: BufWriter<File>,
    path: TempPath,
    len: u64,
    digest: Context,
}

impl SpoolFile {
    pub fn new(buffer_size: usize) -> FsResult<Self> {
        let (file, path) = NamedTempFile::new()?.into_parts();
        Ok(Self {
            writer: BufWriter::with_capacity(buffer_size, File::from_std(file)),
            path,
            len: 0,
            digest: Context::new(),
        })
    }

    pub async fn write(&mut self, data: &[u8]) -> FsResult<()> {
        self.writer.write_all(data).await?;
        self.digest.consume(data);
        self.len += data.len() as u64;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Flush to disk and seal the spool for upload.
    pub async fn finish(mut self) -> FsResult<Spooled> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;
        Ok(Spooled {
            path: self.path,
            length: self.len,
            md5: format!("{:x}", self.digest.compute()),
        })
    }
}

/// A sealed spool, ready to be (re)sent.
pub struct Spooled {
    path: TempPath,
    pub length: u64,
    pub md5: String,
}

impl Spooled {
    pub fn payload(&self) -> Payload {
        Payload::File {
            path: self.path.to_path_buf(),
            length: self.length,
        }
    }

    /// Compare the store's ETag with the local digest when the store sent one.
    pub fn verify(&self, key: &ObjectKey, response: &HeaderMap) -> FsResult<()> {
        match ObjectHeaders::parse(response).etag {
            Some(etag) if !etag.eq_ignore_ascii_case(&self.md5) => Err(FsError::ChecksumMismatch {
                key: key.to_string(),
                expected: self.md5.clone(),
                actual: etag,
            }),
            _ => Ok(()),
        }
    }
}

/// Download `[offset, offset + length)` of `key` into a fresh temp file,
/// positioned at its start.
pub async fn download_range(
    client: &ObjectStoreClient,
    key: &ObjectKey,
    offset: u64,
    length: u64,
) -> FsResult<Option<(File, TempPath)>> {
    let (file, path) = NamedTempFile::new()?.into_parts();
    let mut file = File::from_std(file);
    if length == 0 {
        return Ok(Some((file, path)));
    }

    let Some(response) = client.get_range(key, offset, length).await? else {
        return Ok(None);
    };
    let uri = response.url().to_string();
    let mut body = response.bytes_stream();
    let mut received = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|source| FsError::Transport {
            method: Method::GET,
            uri: uri.clone(),
            source,
        })?;
        received += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    if received != length {
        return Err(FsError::Corrupt(format!(
            "{key}: expected {length} bytes at offset {offset}, received {received}"
        )));
    }
    file.flush().await?;
    file.seek(SeekFrom::Start(0)).await?;
    Ok(Some((file, path)))
}
