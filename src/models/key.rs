//! Mapping from hierarchical filesystem paths to `(container, object)` keys.

use crate::errors::{FsError, FsResult};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use std::{
    fmt,
    hash::{Hash, Hasher},
};

/// Path component prefix identifying a tenant-authentication segment.
pub const AUTH_SEGMENT_MARKER: &str = "AUTH_";

/// Characters escaped when an object name segment is placed into a URL path.
const OBJECT_NAME_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// An immutable `(container, object name)` pair.
///
/// The object name never carries a leading or trailing `/`; the empty name is
/// the container itself, i.e. the filesystem root.
#[derive(Debug, Clone)]
pub struct ObjectKey {
    container: String,
    name: String,
}

impl ObjectKey {
    /// Map a path or URI (`scheme://authority/...`) onto a key in `container`.
    ///
    /// Scheme and authority are dropped and repeated separators collapse. A
    /// leading `AUTH_<tenant>` component is removed; letter case is kept. Only
    /// URIs lose their query and fragment and are percent-decoded; a plain
    /// path keeps every character, so mapping [`ObjectKey::path`] again
    /// yields the same key.
    pub fn from_path(container: &str, path: &str) -> FsResult<Self> {
        let (raw_path, is_uri) = match uri_remainder(path) {
            Some(rest) => {
                let rest = rest.split(['?', '#']).next().unwrap_or_default();
                match rest.find('/') {
                    Some(slash) => (&rest[slash..], true),
                    None => ("/", true),
                }
            }
            None => (path, false),
        };

        let mut components = Vec::new();
        for part in raw_path.split('/').filter(|c| !c.is_empty()) {
            let component = if is_uri {
                let decoded = percent_decode_str(part).decode_utf8().map_err(|_| {
                    FsError::InvalidArgument(format!("path `{path}` is not UTF-8"))
                })?;
                if decoded.contains('/') {
                    return Err(FsError::InvalidArgument(format!(
                        "escaped separator in path `{path}`"
                    )));
                }
                decoded.into_owned()
            } else {
                part.to_string()
            };
            if component == "." || component == ".." {
                return Err(FsError::InvalidArgument(format!(
                    "relative component in path `{path}`"
                )));
            }
            components.push(component);
        }

        if components
            .first()
            .is_some_and(|c| c.starts_with(AUTH_SEGMENT_MARKER))
        {
            components.remove(0);
        }
        // A second leading tenant segment would be eaten by re-mapping the result.
        if components
            .first()
            .is_some_and(|c| c.starts_with(AUTH_SEGMENT_MARKER))
        {
            return Err(FsError::InvalidArgument(format!(
                "path `{path}` starts with more than one tenant segment"
            )));
        }

        Ok(Self {
            container: container.to_string(),
            name: components.join("/"),
        })
    }

    /// Build a key from an object name exactly as the store lists it.
    pub fn from_object_name(container: &str, name: &str) -> Self {
        Self {
            container: container.to_string(),
            name: name.trim_matches('/').to_string(),
        }
    }

    pub fn root(container: &str) -> Self {
        Self::from_object_name(container, "")
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.name.is_empty()
    }

    /// Filesystem path of this key, always absolute.
    pub fn path(&self) -> String {
        format!("/{}", self.name)
    }

    /// Canonical `/container/object` form used for equality and hashing.
    pub fn uri_path(&self) -> String {
        if self.name.is_empty() {
            format!("/{}", self.container)
        } else {
            format!("/{}/{}", self.container, self.name)
        }
    }

    /// URL-escaped `container/object` suffix appended to the store endpoint.
    pub fn encoded_suffix(&self) -> String {
        let mut out = utf8_percent_encode(&self.container, OBJECT_NAME_ENCODE_SET).to_string();
        if !self.name.is_empty() {
            out.push('/');
            out.push_str(&encode_object_name(&self.name));
        }
        out
    }

    /// Listing prefix that selects the children of this key.
    pub fn child_prefix(&self) -> String {
        if self.name.is_empty() {
            String::new()
        } else {
            format!("{}/", self.name)
        }
    }

    pub fn child(&self, segment: &str) -> Self {
        let segment = segment.trim_matches('/');
        let name = if self.name.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", self.name, segment)
        };
        Self {
            container: self.container.clone(),
            name,
        }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.name.is_empty() {
            return None;
        }
        let name = match self.name.rfind('/') {
            Some(idx) => self.name[..idx].to_string(),
            None => String::new(),
        };
        Some(Self {
            container: self.container.clone(),
            name,
        })
    }

    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    /// Every ancestor from just below the root down to `self`, inclusive.
    pub fn lineage(&self) -> Vec<Self> {
        let mut keys = Vec::new();
        let mut current = String::new();
        for segment in self.name.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            keys.push(Self {
                container: self.container.clone(),
                name: current.clone(),
            });
        }
        keys
    }

    /// True when `other` lies strictly below `self`.
    pub fn is_ancestor_of(&self, other: &ObjectKey) -> bool {
        self.container == other.container
            && other.name != self.name
            && other.name.starts_with(&self.child_prefix())
    }

    /// Re-home `self` from under `from` to under `to`, preserving the relative tail.
    pub fn rebase(&self, from: &ObjectKey, to: &ObjectKey) -> Option<Self> {
        if self == from {
            return Some(to.clone());
        }
        let tail = self.name.strip_prefix(&from.child_prefix())?;
        Some(to.child(tail))
    }
}

/// Everything after `scheme://` when `path` is a URI.
fn uri_remainder(path: &str) -> Option<&str> {
    let (scheme, rest) = path.split_once("://")?;
    let valid = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(rest)
}

pub(crate) fn encode_object_name(name: &str) -> String {
    name.split('/')
        .map(|segment| utf8_percent_encode(segment, OBJECT_NAME_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

impl PartialEq for ObjectKey {
    fn eq(&self, other: &Self) -> bool {
        self.uri_path() == other.uri_path()
    }
}

impl Eq for ObjectKey {}

impl Hash for ObjectKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri_path().hash(state);
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri_path())
    }
}
