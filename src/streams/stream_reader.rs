//! StreamReader: positional reads over a flat-layout file.
//!
//! Bytes come from range GETs no larger than the look-ahead window. A
//! manifested file is read as the ordered concatenation of its parts, so
//! callers cannot tell the two apart. A broken transfer is reopened at the
//! current position once per `read` call; a second failure propagates.
//! A store that ignores `Range` for a partial window is rejected.
//! Seeking always drops the open transfer; nothing is cached locally.

use crate::{
    errors::{FsError, FsResult},
    models::key::ObjectKey,
    services::client::ObjectStoreClient,
};
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

/// One stored object contributing `[start, start + length)` of the file.
#[derive(Debug, Clone)]
pub struct Segment {
    pub key: ObjectKey,
    pub start: u64,
    pub length: u64,
}

struct OpenRange {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    pending: Bytes,
    /// Absolute file offset at which this transfer ends.
    end: u64,
    uri: String,
}

pub struct StreamReader {
    client: ObjectStoreClient,
    path: String,
    segments: Vec<Segment>,
    length: u64,
    lookahead: u64,
    position: u64,
    current: Option<OpenRange>,
}

impl StreamReader {
    /// Reader over the given segments, which must be contiguous and ordered.
    pub fn new(
        client: ObjectStoreClient,
        path: String,
        segments: Vec<Segment>,
        lookahead: u64,
    ) -> Self {
        let length = segments.last().map(|s| s.start + s.length).unwrap_or(0);
        Self {
            client,
            path,
            segments,
            length,
            lookahead: lookahead.max(1),
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

    /// Read up to `buf.len()` bytes; `Ok(0)` at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        if buf.is_empty() || self.position >= self.length {
            return Ok(0);
        }

        let mut reopened = false;
        loop {
            if self.current.is_none() {
                self.current = Some(self.open_range().await?);
            }
            let Some(open) = self.current.as_mut() else {
                continue;
            };

            if !open.pending.is_empty() {
                let n = open.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&open.pending.split_to(n));
                self.position += n as u64;
                return Ok(n);
            }

            let failure = match open.body.next().await {
                Some(Ok(chunk)) => {
                    open.pending = chunk;
                    continue;
                }
                None if self.position >= open.end => {
                    self.current = None;
                    continue;
                }
                None => FsError::Corrupt(format!(
                    "{}: transfer ended at {} before {}",
                    open.uri, self.position, open.end
                )),
                Some(Err(source)) => FsError::Transport {
                    method: Method::GET,
                    uri: open.uri.clone(),
                    source,
                },
            };

            self.current = None;
            if reopened {
                return Err(failure);
            }
            warn!(
                "read of {} broke at offset {} ({}), reopening",
                self.path, self.position, failure
            );
            reopened = true;
        }
    }

    /// Fill `buf` completely unless end of file comes first.
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

    /// Move to `offset`; seeking to the exact end is allowed, beyond it is not.
    pub fn seek(&mut self, offset: u64) -> FsResult<()> {
        if offset > self.length {
            return Err(FsError::InvalidArgument(format!(
                "seek to {offset} past end of {} ({} bytes)",
                self.path, self.length
            )));
        }
        self.current = None;
        self.position = offset;
        Ok(())
    }

    pub fn close(&mut self) {
        self.current = None;
    }

    async fn open_range(&self) -> FsResult<OpenRange> {
        let segment = self
            .segments
            .iter()
            .find(|s| self.position >= s.start && self.position < s.start + s.length)
            .ok_or_else(|| {
                FsError::Corrupt(format!(
                    "{}: no segment covers offset {}",
                    self.path, self.position
                ))
            })?;
        let within = self.position - segment.start;
        let length = self.lookahead.min(segment.length - within);
        debug!(
            "opening {} at {} (+{}) for {}",
            segment.key, within, length, self.path
        );

        let response = self
            .client
            .get_range(&segment.key, within, length)
            .await?
            .ok_or_else(|| FsError::NotFound(self.path.clone()))?;
        let uri = response.url().to_string();
        // A 200 carries the whole object; only usable when that is the range asked for.
        let whole_object = within == 0 && length == segment.length;
        if response.status() != StatusCode::PARTIAL_CONTENT && !whole_object {
            return Err(FsError::Connection {
                status: response.status(),
                method: Method::GET,
                uri,
            });
        }
        Ok(OpenRange {
            body: response.bytes_stream().boxed(),
            pending: Bytes::new(),
            end: self.position + length,
            uri,
        })
    }
}
