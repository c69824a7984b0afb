//! Hierarchy snapshots: flatten a group tree to its metadata and rebuild it
//! in another store

use crate::array::Array;
use crate::error::{Result, ZarrError};
use crate::group::{Group, Node};
use crate::io::Store;
use crate::metadata::{GroupMetadata, NodeMetadata};
use crate::utils::{meta_key, normalize_path, parent_path, validate_prefix};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// One node of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Path relative to the snapshot root (`""` is the root itself)
    pub path: String,
    pub metadata: NodeMetadata,
}

/// Ordered path to metadata mapping of a group tree, without chunk data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn new(entries: Vec<SnapshotEntry>) -> Self {
        Self {
            taken_at: Utc::now(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths in snapshot order
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.path.as_str()).collect()
    }

    /// Metadata recorded for `path`
    pub fn get(&self, path: &str) -> Option<&NodeMetadata> {
        let path = normalize_path(path);
        self.entries
            .iter()
            .find(|entry| entry.path == path)
            .map(|entry| &entry.metadata)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse a snapshot document and validate every entry
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = serde_json::from_slice(bytes)
            .map_err(|e| ZarrError::Metadata(format!("snapshot: {}", e)))?;
        for entry in &snapshot.entries {
            entry.metadata.validate().map_err(|e| {
                ZarrError::Metadata(format!("snapshot entry {:?}: {}", entry.path, e))
            })?;
        }
        Ok(snapshot)
    }
}

/// Path of `path` relative to `root`
fn relative_path<'a>(root: &str, path: &'a str) -> &'a str {
    if root.is_empty() {
        path
    } else {
        path.strip_prefix(root)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(path)
    }
}

fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('/').count()
    }
}

/// Walk the tree under `root` depth-first, root first, children in name order
#[tracing::instrument(skip(root), fields(root = %root.path()))]
pub async fn snapshot(root: &Group) -> Result<Snapshot> {
    let mut entries = Vec::new();
    let mut stack = vec![Node::Group(root.clone())];

    while let Some(node) = stack.pop() {
        entries.push(SnapshotEntry {
            path: relative_path(root.path(), node.path()).to_string(),
            metadata: node.metadata(),
        });

        if let Node::Group(group) = &node {
            let names = group.children().await?;
            let children = try_join_all(names.iter().map(|name| group.child(name))).await?;
            stack.extend(children.into_iter().rev());
        }
    }

    info!(nodes = entries.len(), "snapshot taken");
    Ok(Snapshot::new(entries))
}

/// Make sure a group exists at `path`, creating an empty one if absent
async fn ensure_group(store: &Arc<dyn Store>, path: &str) -> Result<()> {
    let key = meta_key(path);
    match store.get(&key).await? {
        None => {
            Group::create(Arc::clone(store), path, GroupMetadata::new()).await?;
            debug!(path = %path, "created implicit parent group");
            Ok(())
        }
        Some(bytes) => match NodeMetadata::from_json(&bytes, &key)? {
            NodeMetadata::Group(_) => Ok(()),
            NodeMetadata::Array(_) => Err(ZarrError::HierarchyConflict(format!(
                "{}: an array is in the way of a group",
                key
            ))),
        },
    }
}

/// Rebuild the tree described by `snapshot` in `store` and return its root.
///
/// Parents missing from the snapshot become groups without attributes. A
/// node that already exists with equal metadata is left alone; any other
/// existing node at a snapshot path is a conflict. Chunk data is not copied.
#[tracing::instrument(skip(store, snapshot), fields(nodes = snapshot.len()))]
pub async fn materialize(store: Arc<dyn Store>, snapshot: &Snapshot) -> Result<Group> {
    let mut entries: Vec<&SnapshotEntry> = snapshot.entries.iter().collect();
    entries.sort_by_key(|entry| depth(&normalize_path(&entry.path)));

    let mut created = 0usize;
    for entry in entries {
        let path = normalize_path(&entry.path);
        validate_prefix(&path)?;

        if path.is_empty() && entry.metadata.is_array() {
            return Err(ZarrError::HierarchyConflict(
                "zarr.json: the root of a hierarchy must be a group".to_string(),
            ));
        }

        let mut ancestors = Vec::new();
        let mut current = parent_path(&path);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = parent_path(parent);
        }
        for ancestor in ancestors.into_iter().rev() {
            ensure_group(&store, ancestor).await?;
        }

        let key = meta_key(&path);
        if let Some(bytes) = store.get(&key).await? {
            let existing = NodeMetadata::from_json(&bytes, &key)?;
            if existing == entry.metadata {
                continue;
            }
            return Err(ZarrError::HierarchyConflict(format!(
                "{}: an existing {} differs from the snapshot {}",
                key,
                existing.node_type(),
                entry.metadata.node_type()
            )));
        }

        match &entry.metadata {
            NodeMetadata::Group(metadata) => {
                Group::create(Arc::clone(&store), &path, metadata.clone()).await?;
            }
            NodeMetadata::Array(metadata) => {
                Array::create(Arc::clone(&store), &path, metadata.clone()).await?;
            }
        }
        created += 1;
    }

    ensure_group(&store, "").await?;
    info!(created, "snapshot materialized");
    Group::open(store, "").await
}
