//! Wire header names and the typed view of a metadata (HEAD) response.

use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, LAST_MODIFIED};
use tracing::warn;

pub const AUTH_TOKEN: &str = "X-Auth-Token";
pub const CONTAINER_OBJECT_COUNT: &str = "X-Container-Object-Count";
pub const CONTAINER_BYTES_USED: &str = "X-Container-Bytes-Used";
pub const OBJECT_MANIFEST: &str = "X-Object-Manifest";
pub const DESTINATION: &str = "Destination";

/// Content type stamped on zero-length directory marker objects.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";

/// Metadata headers of one object or container, parsed once.
#[derive(Debug, Clone)]
pub struct ObjectHeaders {
    pub content_length: Option<u64>,
    pub object_count: Option<u64>,
    pub bytes_used: Option<u64>,
    /// `container/prefix` declared by a manifest object.
    pub manifest: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl ObjectHeaders {
    pub fn parse(headers: &HeaderMap) -> Self {
        Self {
            content_length: header_u64(headers, CONTENT_LENGTH.as_str()),
            object_count: header_u64(headers, CONTAINER_OBJECT_COUNT),
            bytes_used: header_u64(headers, CONTAINER_BYTES_USED),
            manifest: header_str(headers, OBJECT_MANIFEST),
            content_type: header_str(headers, CONTENT_TYPE.as_str()),
            etag: header_str(headers, ETAG.as_str()).map(|e| e.trim_matches('"').to_string()),
            last_modified: parse_last_modified(header_str(headers, LAST_MODIFIED.as_str())),
        }
    }

    /// Aggregate headers are only sent for containers.
    pub fn is_container(&self) -> bool {
        self.object_count.is_some() || self.bytes_used.is_some()
    }

    pub fn is_directory_marker(&self) -> bool {
        self.content_length.unwrap_or(0) == 0
            && self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.starts_with(DIRECTORY_CONTENT_TYPE))
    }

    pub fn length(&self) -> u64 {
        self.content_length.unwrap_or(0)
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name).and_then(|v| v.parse().ok())
}

/// RFC 1123 dates; anything unparsable degrades to "now" instead of failing.
pub fn parse_last_modified(value: Option<String>) -> DateTime<Utc> {
    let Some(raw) = value else {
        return Utc::now();
    };
    match DateTime::parse_from_rfc2822(&raw) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(err) => {
            warn!("unparsable Last-Modified `{}` ({}), using current time", raw, err);
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn container_headers_mark_a_container() {
        let parsed = ObjectHeaders::parse(&headers(&[
            ("x-container-object-count", "3"),
            ("x-container-bytes-used", "1024"),
            ("content-length", "0"),
        ]));
        assert!(parsed.is_container());
        assert_eq!(parsed.object_count, Some(3));
    }

    #[test]
    fn file_headers() {
        let parsed = ObjectHeaders::parse(&headers(&[
            ("content-length", "42"),
            ("etag", "\"abc123\""),
            ("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
        ]));
        assert!(!parsed.is_container());
        assert!(!parsed.is_directory_marker());
        assert_eq!(parsed.length(), 42);
        assert_eq!(parsed.etag.as_deref(), Some("abc123"));
        assert_eq!(parsed.last_modified.to_rfc3339(), "2015-10-21T07:28:00+00:00");
    }

    #[test]
    fn directory_marker_detected_by_content_type() {
        let parsed = ObjectHeaders::parse(&headers(&[
            ("content-length", "0"),
            ("content-type", "application/directory"),
        ]));
        assert!(parsed.is_directory_marker());
    }

    #[test]
    fn bad_date_falls_back_to_now() {
        let before = Utc::now();
        let parsed = ObjectHeaders::parse(&headers(&[("last-modified", "yesterday-ish")]));
        assert!(parsed.last_modified >= before);
    }

    #[test]
    fn manifest_header_is_kept_verbatim() {
        let parsed = ObjectHeaders::parse(&headers(&[
            ("content-length", "0"),
            ("x-object-manifest", "data/big.bin/"),
        ]));
        assert_eq!(parsed.manifest.as_deref(), Some("data/big.bin/"));
    }
}
