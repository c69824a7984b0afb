//! Single-file zip archive store.
//!
//! An archive opened for writing buffers its entries and is only written out,
//! central directory included, by [`ZipStore::close`]. Until then the file on
//! disk is empty and any attempt to open it read-only fails with
//! [`ZarrError::IncompleteArchive`]. Dropping a store that is still open for
//! writing does not finalize it.

use crate::error::{Result, ZarrError};
use crate::io::{direct_children, OpenMode, StorageBackend, Store};
use crate::utils::{validate_key, validate_prefix};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::future::Future;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Observable state of an archive store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Closed,
    OpenForWrite,
    OpenForRead,
}

enum Inner {
    Closed,
    Write(BTreeMap<String, Bytes>),
    Read {
        archive: ZipArchive<File>,
        names: BTreeSet<String>,
    },
}

impl Inner {
    fn state(&self) -> ArchiveState {
        match self {
            Inner::Closed => ArchiveState::Closed,
            Inner::Write(_) => ArchiveState::OpenForWrite,
            Inner::Read { .. } => ArchiveState::OpenForRead,
        }
    }
}

/// Zip archive store
pub struct ZipStore {
    path: PathBuf,
    mode: OpenMode,
    inner: Mutex<Inner>,
}

impl fmt::Debug for ZipStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipStore")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish()
    }
}

impl ZipStore {
    /// Open an archive.
    ///
    /// `Create` fails if a non-empty file exists, `Write` loads the entries of
    /// an existing finalized archive, `ReadOnly` requires a finalized archive.
    pub async fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let task_path = path.clone();
        let inner = tokio::task::spawn_blocking(move || open_inner(&task_path, mode))
            .await
            .map_err(|err| ZarrError::Io(std::io::Error::other(err)))??;

        tracing::info!(path = %path.display(), ?mode, "opened archive store");
        Ok(Self {
            path,
            mode,
            inner: Mutex::new(inner),
        })
    }

    /// Open an archive, run `f` with it, and close it on every exit path.
    ///
    /// An archive opened for writing is finalized even when `f` fails; the
    /// error from `f` takes precedence over an error from closing.
    pub async fn scoped<F, Fut, T>(path: impl AsRef<Path>, mode: OpenMode, f: F) -> Result<T>
    where
        F: FnOnce(Arc<ZipStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let store = Arc::new(Self::open(path, mode).await?);
        let result = f(Arc::clone(&store)).await;
        let closed = store.close().await;
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Path of the archive file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state
    pub fn state(&self) -> ArchiveState {
        self.inner.lock().state()
    }

    fn capability_error(&self, key: &str, state: ArchiveState) -> ZarrError {
        let reason = match state {
            ArchiveState::Closed => "archive is closed",
            ArchiveState::OpenForRead => "archive is opened read-only",
            ArchiveState::OpenForWrite => "archive is opened for writing",
        };
        ZarrError::StoreCapability(format!("{}: {key}: {reason}", self.path.display()))
    }
}

fn zip_error(path: &Path, err: ZipError) -> ZarrError {
    match err {
        ZipError::Io(err) => ZarrError::Io(err),
        err => ZarrError::IncompleteArchive(format!("{}: {err}", path.display())),
    }
}

fn open_inner(path: &Path, mode: OpenMode) -> Result<Inner> {
    let existing_len = match std::fs::metadata(path) {
        Ok(metadata) => Some(metadata.len()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };

    match mode {
        OpenMode::ReadOnly => {
            if existing_len.is_none() {
                return Err(ZarrError::KeyNotFound(format!(
                    "{}: archive does not exist",
                    path.display()
                )));
            }
            // An archive whose writer never closed is left empty on disk
            if existing_len == Some(0) {
                return Err(ZarrError::IncompleteArchive(format!(
                    "{}: archive was never finalized",
                    path.display()
                )));
            }
            let archive = ZipArchive::new(File::open(path)?).map_err(|err| {
                ZarrError::IncompleteArchive(format!("{}: {err}", path.display()))
            })?;
            let names = archive
                .file_names()
                .filter(|name| !name.ends_with('/'))
                .map(str::to_string)
                .collect();
            Ok(Inner::Read { archive, names })
        }
        OpenMode::Create | OpenMode::Write => {
            let populated = existing_len.is_some_and(|len| len > 0);
            if populated && mode == OpenMode::Create {
                return Err(ZarrError::AlreadyExists(format!(
                    "{} is already populated",
                    path.display()
                )));
            }
            let entries = if populated {
                read_all_entries(path)?
            } else {
                BTreeMap::new()
            };

            // Leave an empty file behind until close writes the real archive
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            File::create(path)?;
            Ok(Inner::Write(entries))
        }
    }
}

fn read_all_entries(path: &Path) -> Result<BTreeMap<String, Bytes>> {
    let mut archive = ZipArchive::new(File::open(path)?).map_err(|err| zip_error(path, err))?;
    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|err| zip_error(path, err))?;
        if file.is_dir() {
            continue;
        }
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        entries.insert(file.name().to_string(), Bytes::from(data));
    }
    Ok(entries)
}

fn finalize(path: &Path, entries: &BTreeMap<String, Bytes>) -> Result<()> {
    let mut writer = ZipWriter::new(File::create(path)?);
    // Chunks are already compressed by their codec chain
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (key, value) in entries {
        writer
            .start_file(key.as_str(), options)
            .map_err(|err| zip_error(path, err))?;
        writer.write_all(value)?;
    }
    writer
        .finish()
        .map_err(|err| zip_error(path, err))?
        .sync_all()?;
    Ok(())
}

#[async_trait]
impl Store for ZipStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Write(entries) => Ok(entries.get(key).cloned()),
            Inner::Read { archive, .. } => {
                let mut file = match archive.by_name(key) {
                    Ok(file) => file,
                    Err(ZipError::FileNotFound) => return Ok(None),
                    Err(err) => return Err(zip_error(&self.path, err)),
                };
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                Ok(Some(Bytes::from(data)))
            }
            Inner::Closed => Err(self.capability_error(key, ArchiveState::Closed)),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Write(entries) => {
                entries.insert(key.to_string(), Bytes::copy_from_slice(value));
                Ok(())
            }
            other => Err(self.capability_error(key, other.state())),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Write(entries) => {
                entries.remove(key);
                Ok(())
            }
            other => Err(self.capability_error(key, other.state())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;
        let inner = self.inner.lock();
        match &*inner {
            Inner::Write(entries) => Ok(direct_children(entries.keys(), prefix)),
            Inner::Read { names, .. } => Ok(direct_children(names.iter(), prefix)),
            Inner::Closed => Err(self.capability_error(prefix, ArchiveState::Closed)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let inner = self.inner.lock();
        match &*inner {
            Inner::Write(entries) => Ok(entries.contains_key(key)),
            Inner::Read { names, .. } => Ok(names.contains(key)),
            Inner::Closed => Err(self.capability_error(key, ArchiveState::Closed)),
        }
    }

    /// Finalize (when open for writing) and move to [`ArchiveState::Closed`].
    /// Closing a closed archive is a no-op.
    async fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.inner.lock(), Inner::Closed);
        match previous {
            Inner::Closed => Ok(()),
            Inner::Read { .. } => {
                tracing::info!(path = %self.path.display(), "closed archive store");
                Ok(())
            }
            Inner::Write(entries) => {
                let path = self.path.clone();
                let entries = Arc::new(entries);
                let task_entries = Arc::clone(&entries);
                let finalized =
                    tokio::task::spawn_blocking(move || finalize(&path, &task_entries))
                        .await
                        .map_err(|err| ZarrError::Io(std::io::Error::other(err)))
                        .and_then(|result| result);

                match finalized {
                    Ok(()) => {
                        tracing::info!(
                            path = %self.path.display(),
                            entries = entries.len(),
                            "finalized archive store"
                        );
                        Ok(())
                    }
                    Err(err) => {
                        // Stay open so the caller can retry
                        let entries =
                            Arc::try_unwrap(entries).unwrap_or_else(|shared| (*shared).clone());
                        *self.inner.lock() = Inner::Write(entries);
                        Err(err)
                    }
                }
            }
        }
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Archive
    }
}

impl Drop for ZipStore {
    fn drop(&mut self) {
        if self.inner.get_mut().state() == ArchiveState::OpenForWrite {
            tracing::warn!(
                path = %self.path.display(),
                "archive store dropped while open for writing; it was not finalized"
            );
        }
    }
}
