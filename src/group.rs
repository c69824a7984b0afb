//! Groups: namespace nodes that own arrays and sub-groups

use crate::array::Array;
use crate::attributes::Attributes;
use crate::error::{Result, ZarrError};
use crate::io::{ensure_writable, Store};
use crate::metadata::{ArrayMetadata, GroupMetadata, NodeMetadata};
use crate::utils::{
    join_path, meta_key, node_name, normalize_path, validate_node_name, validate_prefix, META_KEY,
};
use futures::future::try_join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Handle to a group node
#[derive(Debug, Clone)]
pub struct Group {
    store: Arc<dyn Store>,
    path: String,
    metadata: Arc<RwLock<GroupMetadata>>,
}

impl Group {
    /// Create a group at `path`; `""` creates the root
    #[tracing::instrument(skip(store, metadata))]
    pub async fn create(
        store: Arc<dyn Store>,
        path: &str,
        metadata: GroupMetadata,
    ) -> Result<Self> {
        let path = normalize_path(path);
        validate_prefix(&path)?;
        metadata.validate()?;

        let key = meta_key(&path);
        ensure_writable(store.mode(), &key)?;
        if store.exists(&key).await? {
            return Err(ZarrError::HierarchyConflict(format!(
                "{}: a node already exists",
                key
            )));
        }

        store.set(&key, &metadata.to_json()?).await?;
        debug!(key = %key, "created group");

        Ok(Self::from_metadata(store, path, metadata))
    }

    /// Open an existing group
    pub async fn open(store: Arc<dyn Store>, path: &str) -> Result<Self> {
        let path = normalize_path(path);
        validate_prefix(&path)?;

        let key = meta_key(&path);
        let bytes = store.get_required(&key).await?;
        let metadata = GroupMetadata::from_json(&bytes, &key)?;
        Ok(Self::from_metadata(store, path, metadata))
    }

    pub(crate) fn from_metadata(
        store: Arc<dyn Store>,
        path: String,
        metadata: GroupMetadata,
    ) -> Self {
        Self {
            store,
            path,
            metadata: Arc::new(RwLock::new(metadata)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        node_name(&self.path)
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn metadata(&self) -> GroupMetadata {
        self.metadata.read().clone()
    }

    pub fn attributes(&self) -> Attributes {
        self.metadata.read().attributes.clone()
    }

    fn child_path(&self, name: &str) -> Result<String> {
        validate_node_name(name)?;
        Ok(join_path(&self.path, name))
    }

    /// Create a child group
    pub async fn create_group(&self, name: &str, metadata: GroupMetadata) -> Result<Group> {
        let path = self.child_path(name)?;
        Group::create(Arc::clone(&self.store), &path, metadata).await
    }

    /// Create a child array
    pub async fn create_array(&self, name: &str, metadata: ArrayMetadata) -> Result<Array> {
        let path = self.child_path(name)?;
        Array::create(Arc::clone(&self.store), &path, metadata).await
    }

    /// Sorted names of the direct children that are nodes
    pub async fn children(&self) -> Result<Vec<String>> {
        let names: Vec<String> = self
            .store
            .list(&self.path)
            .await?
            .into_iter()
            .filter(|name| name != META_KEY)
            .collect();

        let present = try_join_all(names.iter().map(|name| {
            let key = meta_key(&join_path(&self.path, name));
            async move { self.store.exists(&key).await }
        }))
        .await?;

        Ok(names
            .into_iter()
            .zip(present)
            .filter_map(|(name, present)| present.then_some(name))
            .collect())
    }

    /// Open a direct child by name
    pub async fn child(&self, name: &str) -> Result<Node> {
        let path = self.child_path(name)?;
        Node::open(Arc::clone(&self.store), &path).await
    }

    /// Replace the attributes and rewrite the metadata document
    pub async fn set_attributes(&self, attributes: Attributes) -> Result<()> {
        let mut metadata = self.metadata();
        metadata.attributes = attributes;

        let key = meta_key(&self.path);
        self.store.set(&key, &metadata.to_json()?).await?;
        *self.metadata.write() = metadata;
        Ok(())
    }
}

/// An opened hierarchy node
#[derive(Debug, Clone)]
pub enum Node {
    Array(Array),
    Group(Group),
}

impl Node {
    /// Open whichever kind of node lives at `path`
    pub async fn open(store: Arc<dyn Store>, path: &str) -> Result<Self> {
        let path = normalize_path(path);
        validate_prefix(&path)?;

        let key = meta_key(&path);
        let bytes = store.get_required(&key).await?;
        match NodeMetadata::from_json(&bytes, &key)? {
            NodeMetadata::Array(metadata) => {
                Ok(Node::Array(Array::from_metadata(store, path, metadata)?))
            }
            NodeMetadata::Group(metadata) => {
                Ok(Node::Group(Group::from_metadata(store, path, metadata)))
            }
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Node::Array(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Node::Group(_))
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Node::Array(array) => Some(array),
            Node::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Group(group) => Some(group),
            Node::Array(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Array(array) => array.name(),
            Node::Group(group) => group.name(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Node::Array(array) => array.path(),
            Node::Group(group) => group.path(),
        }
    }

    /// The node's current metadata document
    pub fn metadata(&self) -> NodeMetadata {
        match self {
            Node::Array(array) => NodeMetadata::Array(array.metadata()),
            Node::Group(group) => NodeMetadata::Group(group.metadata()),
        }
    }
}
