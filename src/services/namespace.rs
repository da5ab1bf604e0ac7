//! Pseudo-directory mechanics shared by both layouts.
//!
//! The store has no directories: a directory is a marker object, a name
//! prefix with objects below it, or both. These helpers turn delimiter
//! listings into child entries and decide where a rename lands.

use crate::{
    errors::FsResult,
    models::key::ObjectKey,
    services::client::ObjectStoreClient,
};
use std::collections::BTreeMap;

/// One immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEntry {
    /// A real object exists at this key.
    Object(ObjectKey),
    /// Only a rolled-up `name/` prefix exists, i.e. a directory without marker.
    Prefix(ObjectKey),
}

impl ChildEntry {
    pub fn key(&self) -> &ObjectKey {
        match self {
            ChildEntry::Object(key) | ChildEntry::Prefix(key) => key,
        }
    }
}

/// Immediate children of `dir`, deduplicated and in name order.
///
/// `hidden` names a top-level prefix (e.g. the block area) that is never
/// reported as a child of the root.
pub async fn list_children(
    client: &ObjectStoreClient,
    dir: &ObjectKey,
    hidden: Option<&str>,
) -> FsResult<Vec<ChildEntry>> {
    let names = client.list_names(&dir.child_prefix(), Some('/')).await?;
    Ok(collapse_listing(client, dir, &names, hidden))
}

fn collapse_listing(
    client: &ObjectStoreClient,
    dir: &ObjectKey,
    names: &[String],
    hidden: Option<&str>,
) -> Vec<ChildEntry> {
    let mut entries: BTreeMap<String, ChildEntry> = BTreeMap::new();
    let mut prefixes = Vec::new();
    for name in names {
        if dir.is_root() && hidden.is_some_and(|h| name.starts_with(h)) {
            continue;
        }
        let trimmed = name.trim_end_matches('/');
        if trimmed.is_empty() || trimmed == dir.name() {
            continue;
        }
        if name.ends_with('/') {
            prefixes.push(trimmed.to_string());
        } else {
            entries.insert(
                trimmed.to_string(),
                ChildEntry::Object(client.key_for_name(trimmed)),
            );
        }
    }
    for prefix in prefixes {
        entries
            .entry(prefix.clone())
            .or_insert_with(|| ChildEntry::Prefix(client.key_for_name(&prefix)));
    }
    entries.into_values().collect()
}

/// True iff an object exists at exactly `key` or below `key/`. Names that merely
/// share the prefix (`/a` vs `/ab`) do not count.
pub async fn exists_exactly(client: &ObjectStoreClient, key: &ObjectKey) -> FsResult<bool> {
    if key.is_root() {
        return Ok(client.head(key).await?.is_some());
    }
    let names = client.list_names(key.name(), Some('/')).await?;
    let as_dir = key.child_prefix();
    Ok(names
        .iter()
        .any(|n| n == key.name() || n.as_str() == as_dir || n.starts_with(&as_dir)))
}

/// Where `src` should end up when renamed to `dst`, or `None` to refuse.
///
/// `dst_is_dir` is `None` when `dst` does not exist. An existing directory as
/// destination means "move into it"; the final target must not exist yet.
pub fn rename_target(
    src: &ObjectKey,
    dst: &ObjectKey,
    dst_is_dir: Option<bool>,
) -> Option<ObjectKey> {
    if src == dst || src.is_root() || src.is_ancestor_of(dst) {
        return None;
    }
    match dst_is_dir {
        None => Some(dst.clone()),
        Some(false) => None,
        Some(true) => {
            let target = dst.child(src.basename());
            (target != *src).then_some(target)
        }
    }
}
