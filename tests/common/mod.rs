//! In-process Swift-style object store plus token service for integration tests.
//!
//! Routes:
//! - `POST /v2.0/tokens` issues a fresh token and a catalog pointing at itself
//! - everything under `/v1/AUTH_test/{container}[/{*object}]` is the store:
//!   HEAD, GET (with `Range`), PUT, DELETE, COPY and plain-text listings with
//!   `prefix`, `delimiter`, `marker` and `limit`
//!
//! Fault switches (`cut_reads`, `ignore_ranges`, `occupy_block_ids`,
//! `fail_copies_after`, `bad_request_next`) make the store misbehave on demand.

#![allow(dead_code)]

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use objectfs::{FsConfig, Layout, ObjectFileSystem};
use percent_encoding::percent_decode_str;
use serde_json::json;
use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::net::TcpListener;

pub const TENANT: &str = "test";
const STORE_ROOT: &str = "/v1/AUTH_test/";

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub manifest: Option<String>,
    pub modified: DateTime<Utc>,
}

#[derive(Default)]
struct MockState {
    endpoint: String,
    containers: Mutex<BTreeSet<String>>,
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    auth_calls: AtomicUsize,
    valid_token: Mutex<String>,
    reject_tokens: AtomicBool,
    requests: Mutex<Vec<(Method, String)>>,
    /// Remaining object GETs to break, and how many bytes each delivers first.
    cut_reads: Mutex<(usize, usize)>,
    ignore_ranges: AtomicBool,
    occupied_block_heads: AtomicUsize,
    copies_left: Mutex<Option<usize>>,
    bad_request_next: AtomicBool,
}

#[derive(Clone)]
pub struct MockStore {
    state: Arc<MockState>,
    pub addr: std::net::SocketAddr,
}

impl MockStore {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            endpoint: format!("http://{addr}/v1/AUTH_{TENANT}"),
            ..Default::default()
        });

        let app = Router::new()
            .route("/v2.0/tokens", post(issue_token))
            .fallback(store_request)
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state, addr }
    }

    pub fn config(&self) -> FsConfig {
        let mut cfg = FsConfig::new(
            format!("http://{}/v2.0/tokens", self.addr),
            TENANT,
            "tester",
            "secret",
        );
        cfg.retry_count = 0;
        cfg
    }

    pub async fn filesystem(&self, cfg: FsConfig) -> ObjectFileSystem {
        let uri = format!("swift://{}/", cfg.container);
        ObjectFileSystem::initialize(&uri, cfg).await.unwrap()
    }

    pub async fn flat(&self) -> ObjectFileSystem {
        self.filesystem(self.config()).await
    }

    pub async fn block(&self, block_size: u64) -> ObjectFileSystem {
        let mut cfg = self.config();
        cfg.layout = Layout::Block;
        cfg.block_size = block_size;
        self.filesystem(cfg).await
    }

    pub fn auth_calls(&self) -> usize {
        self.state.auth_calls.load(Ordering::SeqCst)
    }

    /// The next store request carrying the current token is answered with 401.
    pub fn invalidate_tokens(&self) {
        self.state.valid_token.lock().unwrap().clear();
    }

    /// Answer every store request with 401, even with freshly issued tokens.
    pub fn reject_tokens(&self, reject: bool) {
        self.state.reject_tokens.store(reject, Ordering::SeqCst);
    }

    pub fn object_names(&self, container: &str) -> Vec<String> {
        self.state
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn object(&self, container: &str, name: &str) -> Option<StoredObject> {
        self.state
            .objects
            .lock()
            .unwrap()
            .get(&(container.to_string(), name.to_string()))
            .cloned()
    }

    /// Store an object directly, bypassing the client.
    pub fn seed(&self, container: &str, name: &str, body: &[u8], content_type: Option<&str>) {
        self.state.containers.lock().unwrap().insert(container.to_string());
        self.state.objects.lock().unwrap().insert(
            (container.to_string(), name.to_string()),
            StoredObject {
                body: Bytes::copy_from_slice(body),
                content_type: content_type.map(str::to_string),
                manifest: None,
                modified: Utc::now(),
            },
        );
    }

    /// Break the next `count` object GETs after `keep` bytes of body.
    pub fn cut_reads(&self, count: usize, keep: usize) {
        *self.state.cut_reads.lock().unwrap() = (count, keep);
    }

    /// Answer ranged GETs with 200 and the whole object.
    pub fn ignore_ranges(&self, ignore: bool) {
        self.state.ignore_ranges.store(ignore, Ordering::SeqCst);
    }

    /// Report the next `count` probed block names as already taken.
    pub fn occupy_block_ids(&self, count: usize) {
        self.state.occupied_block_heads.store(count, Ordering::SeqCst);
    }

    /// Let `count` more COPYs succeed, then answer every COPY with 500.
    pub fn fail_copies_after(&self, count: usize) {
        *self.state.copies_left.lock().unwrap() = Some(count);
    }

    /// Answer the next store request with 400.
    pub fn bad_request_next(&self) {
        self.state.bad_request_next.store(true, Ordering::SeqCst);
    }

    /// Requests seen by the store, as `(method, path)`.
    pub fn requests(&self) -> Vec<(Method, String)> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn issue_token(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    let n = state.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("tok-{n}");
    *state.valid_token.lock().unwrap() = token.clone();
    Json(json!({
        "access": {
            "token": {
                "id": token,
                "expires": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
                "tenant": { "id": TENANT, "name": TENANT }
            },
            "serviceCatalog": [
                {
                    "name": "keystone",
                    "type": "identity",
                    "endpoints": [{ "region": "local", "publicURL": "http://127.0.0.1:1/v2.0" }]
                },
                {
                    "name": "swift",
                    "type": "object-store",
                    "endpoints": [{ "region": "local", "publicURL": state.endpoint }]
                }
            ]
        }
    }))
}

async fn store_request(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push((method.clone(), uri.path().to_string()));

    let authorized = headers
        .get("x-auth-token")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|t| !t.is_empty() && *state.valid_token.lock().unwrap() == t);
    if !authorized || state.reject_tokens.load(Ordering::SeqCst) {
        return status(StatusCode::UNAUTHORIZED);
    }
    if state.bad_request_next.swap(false, Ordering::SeqCst) {
        return status(StatusCode::BAD_REQUEST);
    }

    let Some(rest) = uri.path().strip_prefix(STORE_ROOT) else {
        return status(StatusCode::NOT_FOUND);
    };
    let (container, object) = match rest.split_once('/') {
        Some((c, o)) => (decode(c), decode(o)),
        None => (decode(rest), String::new()),
    };
    let query: BTreeMap<String, String> = url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes())
        .into_owned()
        .collect();

    if object.is_empty() {
        container_request(&state, &method, &container, &query)
    } else {
        object_request(&state, &method, &container, &object, &headers, body)
    }
}

fn container_request(
    state: &MockState,
    method: &Method,
    container: &str,
    query: &BTreeMap<String, String>,
) -> Response {
    let exists = state.containers.lock().unwrap().contains(container);
    match *method {
        Method::PUT => {
            state.containers.lock().unwrap().insert(container.to_string());
            status(StatusCode::CREATED)
        }
        _ if !exists => status(StatusCode::NOT_FOUND),
        Method::HEAD => {
            let objects = state.objects.lock().unwrap();
            let (count, bytes) = objects
                .iter()
                .filter(|((c, _), _)| c == container)
                .fold((0usize, 0usize), |(n, b), (_, o)| (n + 1, b + o.body.len()));
            let mut response = status(StatusCode::NO_CONTENT);
            let h = response.headers_mut();
            h.insert("x-container-object-count", count.into());
            h.insert("x-container-bytes-used", bytes.into());
            response
        }
        Method::GET => list(state, container, query),
        Method::DELETE => {
            state.containers.lock().unwrap().remove(container);
            status(StatusCode::NO_CONTENT)
        }
        _ => status(StatusCode::METHOD_NOT_ALLOWED),
    }
}

fn list(state: &MockState, container: &str, query: &BTreeMap<String, String>) -> Response {
    let prefix = query.get("prefix").cloned().unwrap_or_default();
    let delimiter = query.get("delimiter").and_then(|d| d.chars().next());
    let marker = query.get("marker").cloned().unwrap_or_default();
    let limit: usize = query
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(10_000);

    let objects = state.objects.lock().unwrap();
    let mut entries = BTreeSet::new();
    for (c, name) in objects.keys() {
        if c != container || !name.starts_with(&prefix) {
            continue;
        }
        let tail = &name[prefix.len()..];
        let entry = match delimiter.and_then(|d| tail.find(d)) {
            Some(idx) => format!("{prefix}{}", &tail[..=idx]),
            None => name.clone(),
        };
        entries.insert(entry);
    }
    let page: Vec<String> = entries
        .into_iter()
        .filter(|e| marker.is_empty() || *e > marker)
        .take(limit)
        .collect();

    if page.is_empty() {
        return status(StatusCode::NO_CONTENT);
    }
    let mut body = page.join("\n");
    body.push('\n');
    (StatusCode::OK, body).into_response()
}

fn object_request(
    state: &MockState,
    method: &Method,
    container: &str,
    object: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    if !state.containers.lock().unwrap().contains(container) {
        return status(StatusCode::NOT_FOUND);
    }
    let id = (container.to_string(), object.to_string());

    match method.as_str() {
        "PUT" => {
            let etag = format!("{:x}", md5::compute(&body));
            let stored = StoredObject {
                body,
                content_type: header_string(headers, header::CONTENT_TYPE.as_str()),
                manifest: header_string(headers, "x-object-manifest"),
                modified: Utc::now(),
            };
            state.objects.lock().unwrap().insert(id, stored);
            let mut response = status(StatusCode::CREATED);
            if let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\"")) {
                response.headers_mut().insert(header::ETAG, value);
            }
            response
        }
        "HEAD" if object.starts_with(".blocks/") && take_one(&state.occupied_block_heads) => {
            let mut response = status(StatusCode::OK);
            response.headers_mut().insert(header::CONTENT_LENGTH, 0.into());
            response
        }
        "HEAD" | "GET" => {
            let Some(stored) = state.objects.lock().unwrap().get(&id).cloned() else {
                return status(StatusCode::NOT_FOUND);
            };
            let range = header_string(headers, header::RANGE.as_str())
                .and_then(|r| parse_range(&r))
                .filter(|_| !state.ignore_ranges.load(Ordering::SeqCst));
            let (code, bytes) = match range {
                Some((start, end)) if start < stored.body.len() => {
                    let end = end.min(stored.body.len() - 1);
                    (StatusCode::PARTIAL_CONTENT, stored.body.slice(start..=end))
                }
                Some(_) => return status(StatusCode::RANGE_NOT_SATISFIABLE),
                None => (StatusCode::OK, stored.body.clone()),
            };
            let length = bytes.len();
            let mut response = if *method == Method::HEAD {
                Response::new(Body::empty())
            } else if let Some(keep) = take_cut(state) {
                Response::new(cut_body(bytes, keep))
            } else {
                Response::new(Body::from(bytes))
            };
            *response.status_mut() = code;
            let h = response.headers_mut();
            h.insert(header::CONTENT_LENGTH, length.into());
            if let Ok(value) = HeaderValue::from_str(&stored.modified.to_rfc2822()) {
                h.insert(header::LAST_MODIFIED, value);
            }
            if let Ok(value) = HeaderValue::from_str(&format!("\"{:x}\"", md5::compute(&stored.body))) {
                h.insert(header::ETAG, value);
            }
            if let Some(value) = stored.content_type.and_then(|v| HeaderValue::from_str(&v).ok()) {
                h.insert(header::CONTENT_TYPE, value);
            }
            if let Some(value) = stored.manifest.and_then(|v| HeaderValue::from_str(&v).ok()) {
                h.insert("x-object-manifest", value);
            }
            response
        }
        "DELETE" => match state.objects.lock().unwrap().remove(&id) {
            Some(_) => status(StatusCode::NO_CONTENT),
            None => status(StatusCode::NOT_FOUND),
        },
        "COPY" => {
            let Some(destination) = header_string(headers, "destination") else {
                return status(StatusCode::BAD_REQUEST);
            };
            let Some((dst_container, dst_object)) = destination.trim_start_matches('/').split_once('/')
            else {
                return status(StatusCode::BAD_REQUEST);
            };
            if let Some(left) = state.copies_left.lock().unwrap().as_mut() {
                if *left == 0 {
                    return status(StatusCode::INTERNAL_SERVER_ERROR);
                }
                *left -= 1;
            }
            let mut objects = state.objects.lock().unwrap();
            let Some(mut copied) = objects.get(&id).cloned() else {
                return status(StatusCode::NOT_FOUND);
            };
            if let Some(manifest) = header_string(headers, "x-object-manifest") {
                copied.manifest = Some(manifest);
            }
            copied.modified = Utc::now();
            objects.insert((decode(dst_container), decode(dst_object)), copied);
            status(StatusCode::CREATED)
        }
        _ => status(StatusCode::METHOD_NOT_ALLOWED),
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn take_cut(state: &MockState) -> Option<usize> {
    let mut cut = state.cut_reads.lock().unwrap();
    if cut.0 == 0 {
        return None;
    }
    cut.0 -= 1;
    Some(cut.1)
}

/// A body that delivers `keep` bytes, stalls, then drops the connection.
fn cut_body(bytes: Bytes, keep: usize) -> Body {
    let head = bytes.slice(..keep.min(bytes.len()));
    let chunks = stream::iter([Ok::<Bytes, io::Error>(head)]).chain(stream::once(async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err(io::Error::other("connection cut"))
    }));
    Body::from_stream(chunks)
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn status(code: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = code;
    response
}

/// Deterministic, position-dependent test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
