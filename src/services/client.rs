//! ObjectStoreClient: authenticated HTTP operations against the resolved endpoint.
//!
//! Every call resolves an [`ObjectKey`] against the session endpoint, attaches
//! the token and maps the status onto the error taxonomy:
//!
//! - 2xx: success
//! - 404: absent (`None`/`false`), callers decide whether that is an error
//! - 400: [`FsError::IllegalLocality`], never retried
//! - 401: re-authenticate once and retry once; a second 401 is fatal
//! - anything else: [`FsError::Connection`]
//!
//! Transport failures are retried up to `retry_count` times and then wrapped
//! once into [`FsError::Transport`].

use crate::{
    config::FsConfig,
    errors::{FsError, FsResult},
    models::{
        headers::{AUTH_TOKEN, DESTINATION, ObjectHeaders},
        key::{ObjectKey, encode_object_name},
    },
    services::auth::AuthSession,
};
use bytes::Bytes;
use futures::{TryStreamExt, stream};
use reqwest::{
    Method, RequestBuilder, Response, StatusCode,
    header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue, RANGE},
};
use std::{path::PathBuf, sync::Arc};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Upper bound of names the store returns per listing page.
pub const LISTING_PAGE_SIZE: usize = 10_000;

/// A request body that can be produced again for a retry.
#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    Bytes(Bytes),
    /// Streamed from a local file of known length.
    File { path: PathBuf, length: u64 },
}

impl Payload {
    fn apply(&self, builder: RequestBuilder) -> FsResult<RequestBuilder> {
        Ok(match self {
            Payload::Empty => builder.header(CONTENT_LENGTH, 0),
            Payload::Bytes(bytes) => builder.body(bytes.clone()),
            Payload::File { path, length } => {
                // Opened by the body stream once the request is polled.
                let body = stream::once(tokio::fs::File::open(path.clone()))
                    .map_ok(ReaderStream::new)
                    .try_flatten();
                builder
                    .header(CONTENT_LENGTH, *length)
                    .body(reqwest::Body::wrap_stream(body))
            }
        })
    }
}

/// Cheaply cloneable handle; clones share the HTTP pool and the auth session.
#[derive(Clone)]
pub struct ObjectStoreClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    auth: AuthSession,
    container: String,
    retry_count: u32,
}

impl ObjectStoreClient {
    /// Build the client without talking to the network.
    pub fn new(cfg: &FsConfig) -> FsResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(cfg.connect_timeout)
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|err| FsError::Configuration(format!("cannot build HTTP client: {err}")))?;
        let auth = AuthSession::new(http.clone(), cfg)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                auth,
                container: cfg.container.clone(),
                retry_count: cfg.retry_count,
            }),
        })
    }

    /// Build, authenticate and make sure the configured container exists.
    pub async fn connect(cfg: &FsConfig) -> FsResult<Self> {
        let client = Self::new(cfg)?;
        client.inner.auth.authenticate().await?;
        client.ensure_container().await?;
        Ok(client)
    }

    pub fn container(&self) -> &str {
        &self.inner.container
    }

    pub fn auth(&self) -> &AuthSession {
        &self.inner.auth
    }

    /// Key of the container itself (the filesystem root).
    pub fn root(&self) -> ObjectKey {
        ObjectKey::root(&self.inner.container)
    }

    pub fn key(&self, path: &str) -> FsResult<ObjectKey> {
        ObjectKey::from_path(&self.inner.container, path)
    }

    pub fn key_for_name(&self, name: &str) -> ObjectKey {
        ObjectKey::from_object_name(&self.inner.container, name)
    }

    async fn ensure_container(&self) -> FsResult<()> {
        let root = self.root();
        if self.head(&root).await?.is_none() {
            info!("container `{}` missing, creating it", root.container());
            self.put(&root, HeaderMap::new(), Payload::Empty).await?;
        }
        Ok(())
    }

    /// Issue one authenticated request; `Ok(None)` means the store answered 404.
    pub async fn request(
        &self,
        method: Method,
        key: &ObjectKey,
        query: &[(&str, String)],
        headers: &HeaderMap,
        payload: &Payload,
    ) -> FsResult<Option<Response>> {
        let mut reauthenticated = false;
        loop {
            let session = self.inner.auth.current().await?;
            let uri = format!(
                "{}/{}",
                session.endpoint.as_str().trim_end_matches('/'),
                key.encoded_suffix()
            );
            debug!("{} {}", method, uri);

            let token = HeaderValue::from_str(&session.token.id)
                .map_err(|_| FsError::Authentication("token is not a valid header value".into()))?;
            let response = send_with_retries(self.inner.retry_count, &method, &uri, || {
                let builder = self
                    .inner
                    .http
                    .request(method.clone(), &uri)
                    .query(query)
                    .headers(headers.clone())
                    .header(AUTH_TOKEN, token.clone());
                payload.apply(builder)
            })
            .await?;

            match response.status() {
                status if status.is_success() => return Ok(Some(response)),
                StatusCode::NOT_FOUND => return Ok(None),
                StatusCode::BAD_REQUEST => return Err(FsError::IllegalLocality { uri }),
                StatusCode::UNAUTHORIZED if !reauthenticated => {
                    warn!("{} {} rejected the token, re-authenticating", method, uri);
                    self.inner.auth.authenticate().await?;
                    reauthenticated = true;
                }
                StatusCode::UNAUTHORIZED => {
                    return Err(FsError::Authentication(format!(
                        "{method} {uri} rejected a freshly issued token"
                    )));
                }
                status => return Err(FsError::Connection { status, method, uri }),
            }
        }
    }

    /// Metadata only; `None` when the key is absent.
    pub async fn head(&self, key: &ObjectKey) -> FsResult<Option<ObjectHeaders>> {
        let response = self
            .request(Method::HEAD, key, &[], &HeaderMap::new(), &Payload::Empty)
            .await?;
        Ok(response.map(|r| ObjectHeaders::parse(r.headers())))
    }

    /// Whole object with its headers; `None` when absent.
    pub async fn get(&self, key: &ObjectKey) -> FsResult<Option<(ObjectHeaders, Bytes)>> {
        match self
            .request(Method::GET, key, &[], &HeaderMap::new(), &Payload::Empty)
            .await?
        {
            Some(response) => {
                let headers = ObjectHeaders::parse(response.headers());
                let body = read_body(response, &Method::GET, key).await?;
                Ok(Some((headers, body)))
            }
            None => Ok(None),
        }
    }

    /// Open a streaming GET over `[offset, offset + length)`; `None` when absent.
    pub async fn get_range(
        &self,
        key: &ObjectKey,
        offset: u64,
        length: u64,
    ) -> FsResult<Option<Response>> {
        if length == 0 {
            return Err(FsError::InvalidArgument(format!(
                "zero-length range requested from {key}"
            )));
        }
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, range_header(offset, length)?);
        self.request(Method::GET, key, &[], &headers, &Payload::Empty)
            .await
    }

    /// Upload; the response headers are returned so callers can check the ETag.
    pub async fn put(
        &self,
        key: &ObjectKey,
        headers: HeaderMap,
        payload: Payload,
    ) -> FsResult<HeaderMap> {
        match self
            .request(Method::PUT, key, &[], &headers, &payload)
            .await?
        {
            Some(response) => Ok(response.headers().clone()),
            None => Err(FsError::NotFound(key.path())),
        }
    }

    /// `true` if something was deleted.
    pub async fn delete(&self, key: &ObjectKey) -> FsResult<bool> {
        Ok(self
            .request(Method::DELETE, key, &[], &HeaderMap::new(), &Payload::Empty)
            .await?
            .is_some())
    }

    /// Server-side copy of one object; `false` when the source does not exist.
    pub async fn copy(&self, src: &ObjectKey, dst: &ObjectKey) -> FsResult<bool> {
        let destination = format!("{}/{}", dst.container(), encode_object_name(dst.name()));
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("destination"),
            HeaderValue::from_str(&destination).map_err(|_| {
                FsError::InvalidArgument(format!("cannot use {dst} as {DESTINATION} header"))
            })?,
        );
        Ok(self
            .request(copy_method(), src, &[], &headers, &Payload::Empty)
            .await?
            .is_some())
    }

    /// Raw newline-delimited listing of names starting with `prefix`.
    ///
    /// With a delimiter, names are rolled up at the first delimiter after the
    /// prefix (`dir/`). Pages are followed until the store runs out. An absent
    /// container or prefix yields an empty listing.
    pub async fn list_by_prefix(&self, prefix: &str, delimiter: Option<char>) -> FsResult<Bytes> {
        let root = self.root();
        let mut listing = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut query = vec![
                ("format", "plain".to_string()),
                ("prefix", prefix.to_string()),
                ("limit", LISTING_PAGE_SIZE.to_string()),
            ];
            if let Some(delimiter) = delimiter {
                query.push(("delimiter", delimiter.to_string()));
            }
            if let Some(marker) = &marker {
                query.push(("marker", marker.clone()));
            }

            let Some(response) = self
                .request(Method::GET, &root, &query, &HeaderMap::new(), &Payload::Empty)
                .await?
            else {
                break;
            };
            if response.status() == StatusCode::NO_CONTENT {
                break;
            }
            let page = read_body(response, &Method::GET, &root).await?;
            let names = split_listing(&page);
            let page_len = names.len();
            marker = names.last().cloned();
            listing.extend_from_slice(&page);
            if !page.ends_with(b"\n") && !page.is_empty() {
                listing.push(b'\n');
            }
            if page_len < LISTING_PAGE_SIZE {
                break;
            }
        }
        Ok(Bytes::from(listing))
    }

    /// Whether any object name starts with `prefix`, using a one-entry listing.
    pub async fn has_prefix(&self, prefix: &str) -> FsResult<bool> {
        let root = self.root();
        let query = [
            ("format", "plain".to_string()),
            ("prefix", prefix.to_string()),
            ("limit", "1".to_string()),
        ];
        match self
            .request(Method::GET, &root, &query, &HeaderMap::new(), &Payload::Empty)
            .await?
        {
            Some(response) if response.status() != StatusCode::NO_CONTENT => {
                let page = read_body(response, &Method::GET, &root).await?;
                Ok(!split_listing(&page).is_empty())
            }
            _ => Ok(false),
        }
    }

    /// [`Self::list_by_prefix`] tokenized into names.
    pub async fn list_names(&self, prefix: &str, delimiter: Option<char>) -> FsResult<Vec<String>> {
        Ok(split_listing(&self.list_by_prefix(prefix, delimiter).await?))
    }
}

/// Tokenize a newline-delimited listing. Names keep any trailing whitespace.
pub fn split_listing(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn copy_method() -> Method {
    Method::from_bytes(b"COPY").unwrap_or(Method::PUT)
}

fn range_header(offset: u64, length: u64) -> FsResult<HeaderValue> {
    let end = offset
        .checked_add(length - 1)
        .ok_or_else(|| FsError::InvalidArgument(format!("range {offset}+{length} overflows")))?;
    HeaderValue::from_str(&format!("bytes={offset}-{end}"))
        .map_err(|_| FsError::InvalidArgument("unrepresentable range".into()))
}

async fn read_body(response: Response, method: &Method, key: &ObjectKey) -> FsResult<Bytes> {
    let uri = response.url().to_string();
    response.bytes().await.map_err(|source| {
        debug!("reading body of {} failed", key);
        FsError::Transport {
            method: method.clone(),
            uri,
            source,
        }
    })
}

/// Send a freshly built request, retrying transport failures `retries` times.
pub(crate) async fn send_with_retries<F>(
    retries: u32,
    method: &Method,
    uri: &str,
    build: F,
) -> FsResult<Response>
where
    F: Fn() -> FsResult<RequestBuilder>,
{
    let mut attempt = 0;
    loop {
        match build()?.send().await {
            Ok(response) => return Ok(response),
            Err(source) if attempt < retries => {
                attempt += 1;
                warn!(
                    "{} {} failed ({}), retry {}/{}",
                    method, uri, source, attempt, retries
                );
            }
            Err(source) => {
                return Err(FsError::Transport {
                    method: method.clone(),
                    uri: uri.to_string(),
                    source,
                });
            }
        }
    }
}
