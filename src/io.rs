//! Store abstraction and the directory and in-memory backends

use crate::archive::ZipStore;
use crate::error::{Result, ZarrError};
use crate::utils::{validate_key, validate_prefix};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Mode a store is opened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpenMode {
    /// Exclusive initialization; fails if the store is already populated
    Create,
    /// Create-or-update
    Write,
    /// Mutations fail with a capability error
    ReadOnly,
}

impl OpenMode {
    /// Whether `set` and `delete` are permitted
    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }
}

/// Storage backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One file per key under a directory
    Directory,
    /// Process-lifetime map
    Memory,
    /// Single zip archive file
    Archive,
}

impl StorageBackend {
    /// Parse storage backend from URL scheme
    pub fn from_url(url: &str) -> Result<Self> {
        if let Some(scheme_end) = url.find("://") {
            let scheme = &url[..scheme_end];
            match scheme {
                "file" => Ok(StorageBackend::Directory),
                "memory" => Ok(StorageBackend::Memory),
                "zip" => Ok(StorageBackend::Archive),
                _ => Err(ZarrError::Configuration(format!(
                    "{url}: unknown scheme {scheme}"
                ))),
            }
        } else if url.ends_with(".zip") {
            Ok(StorageBackend::Archive)
        } else {
            // Assume a directory if no scheme
            Ok(StorageBackend::Directory)
        }
    }
}

/// Store configuration: which backend, where, and in which mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub path: String,
    pub mode: OpenMode,
}

impl StoreConfig {
    /// Build a configuration from a URL such as `file:///data/x.zarr` or `zip://out.zip`
    pub fn from_url(url: &str, mode: OpenMode) -> Result<Self> {
        let backend = StorageBackend::from_url(url)?;
        let path = url
            .find("://")
            .map_or(url, |scheme_end| &url[scheme_end + 3..])
            .to_string();
        Ok(Self {
            backend,
            path,
            mode,
        })
    }
}

/// Uniform byte-oriented key/value store.
///
/// Keys are `/`-separated relative paths. Implementations never touch
/// anything outside the key they are given.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    /// Read the value at `key`, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write the value at `key`, replacing any previous value
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete the value at `key`; deleting an absent key is a no-op
    async fn delete(&self, key: &str) -> Result<()>;

    /// Sorted names of the direct children of `prefix` (`""` is the root)
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check if a value exists at `key`
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Size of the value at `key`
    async fn size(&self, key: &str) -> Result<Option<usize>> {
        Ok(self.get(key).await?.map(|value| value.len()))
    }

    /// Read a value that must exist
    async fn get_required(&self, key: &str) -> Result<Bytes> {
        self.get(key)
            .await?
            .ok_or_else(|| ZarrError::KeyNotFound(key.to_string()))
    }

    /// Release the store. Only archive stores do work here.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// The mode the store was opened in
    fn mode(&self) -> OpenMode;

    /// Get the backend type
    fn backend(&self) -> StorageBackend;
}

pub(crate) fn ensure_writable(mode: OpenMode, key: &str) -> Result<()> {
    if mode.is_writable() {
        Ok(())
    } else {
        Err(ZarrError::StoreCapability(format!(
            "{key}: store is opened read-only"
        )))
    }
}

/// Directory-backed store, one file per key
#[derive(Debug)]
pub struct FileSystemStore {
    base_path: PathBuf,
    mode: OpenMode,
}

impl FileSystemStore {
    /// Open a directory store
    pub async fn open(base_path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();

        match mode {
            OpenMode::Create => {
                if is_populated(&base_path).await? {
                    return Err(ZarrError::AlreadyExists(format!(
                        "{} is already populated",
                        base_path.display()
                    )));
                }
                fs::create_dir_all(&base_path).await?;
            }
            OpenMode::Write => fs::create_dir_all(&base_path).await?,
            OpenMode::ReadOnly => {
                if !fs::try_exists(&base_path).await? {
                    return Err(ZarrError::KeyNotFound(format!(
                        "{}: store root does not exist",
                        base_path.display()
                    )));
                }
            }
        }

        tracing::info!(path = %base_path.display(), ?mode, "opened directory store");
        Ok(Self { base_path, mode })
    }

    /// Root directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the full path for a key
    fn full_path(&self, key: &str) -> PathBuf {
        if key.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(key)
        }
    }
}

async fn is_populated(path: &Path) -> Result<bool> {
    match fs::read_dir(path).await {
        Ok(mut read_dir) => Ok(read_dir.next_entry().await?.is_some()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

async fn write_then_rename(tmp_path: &Path, full_path: &Path, value: &[u8]) -> Result<()> {
    let mut file = fs::File::create(tmp_path).await?;
    file.write_all(value).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp_path, full_path).await?;
    Ok(())
}

#[async_trait]
impl Store for FileSystemStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        match fs::read(self.full_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            // A key naming an intermediate directory holds no value
            Err(_) if self.full_path(key).is_dir() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        ensure_writable(self.mode, key)?;
        let full_path = self.full_path(key);

        // Create parent directories if they don't exist
        let parent = full_path
            .parent()
            .ok_or_else(|| ZarrError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent).await?;

        // Write beside the target and rename, so readers never see a partial value
        let tmp_path = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        if let Err(err) = write_then_rename(&tmp_path, &full_path, value).await {
            if let Err(cleanup) = fs::remove_file(&tmp_path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    tracing::warn!(
                        path = %tmp_path.display(),
                        error = %cleanup,
                        "temporary file left behind"
                    );
                }
            }
            return Err(err);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        ensure_writable(self.mode, key)?;
        match fs::remove_file(self.full_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;
        let full_path = self.full_path(prefix);
        let mut entries = Vec::new();

        if full_path.is_dir() {
            let mut read_dir = fs::read_dir(&full_path).await?;

            while let Some(entry) = read_dir.next_entry().await? {
                if let Some(name) = entry.file_name().to_str() {
                    // Hidden names are temporaries from in-flight writes
                    if !name.starts_with('.') {
                        entries.push(name.to_string());
                    }
                }
            }
        }

        entries.sort();
        Ok(entries)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.full_path(key).is_file())
    }

    async fn size(&self, key: &str) -> Result<Option<usize>> {
        validate_key(key)?;
        match fs::metadata(self.full_path(key)).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len() as usize)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Directory
    }
}

/// In-memory store. Clones share the same key space.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, Bytes>>>,
    mode: OpenMode,
}

impl MemoryStore {
    /// Create an empty writable store
    pub fn new() -> Self {
        Self::with_mode(OpenMode::Write)
    }

    /// Create an empty store in the given mode
    pub fn with_mode(mode: OpenMode) -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            mode,
        }
    }

    /// A read-only view sharing this store's key space
    pub fn read_only(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            mode: OpenMode::ReadOnly,
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        ensure_writable(self.mode, key)?;
        self.entries
            .write()
            .insert(key.to_string(), Bytes::copy_from_slice(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        ensure_writable(self.mode, key)?;
        self.entries.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;
        Ok(direct_children(self.entries.read().keys(), prefix))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.entries.read().contains_key(key))
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

/// Names of the direct children of `prefix` among a flat set of keys
pub(crate) fn direct_children<'a>(
    keys: impl Iterator<Item = &'a String>,
    prefix: &str,
) -> Vec<String> {
    let start = if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    };
    let names: BTreeSet<String> = keys
        .filter_map(|key| key.strip_prefix(start.as_str()))
        .filter_map(|rest| rest.split('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    names.into_iter().collect()
}

/// Open the store described by `config`
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config.backend {
        StorageBackend::Directory => {
            Ok(Arc::new(FileSystemStore::open(&config.path, config.mode).await?))
        }
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::with_mode(config.mode))),
        StorageBackend::Archive => Ok(Arc::new(ZipStore::open(&config.path, config.mode).await?)),
    }
}
