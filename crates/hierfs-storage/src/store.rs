//! File bytes kept under a local root directory.
//!
//! A distributed path `/a/b` lives at `<root>/a/b`. Directories exist only
//! to hold files: deleting the last file of a directory removes the
//! directory too.
//!
//! Incoming copies are filled under `<root>/:staging` and renamed into
//! place once complete. `:` is the path delimiter reserved by [`FsPath`],
//! so no distributed path can name the staging directory.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hierfs_naming::storage::StorageError;
use hierfs_naming::FsPath;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

const STAGING_DIR: &str = ":staging";

/// Local byte store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    staged: Arc<AtomicU64>,
}

/// A file being filled outside the visible tree.
#[derive(Debug)]
pub struct StagedFile {
    local: PathBuf,
}

impl LocalStore {
    /// Opens a store, creating the root directory if needed. Staged files
    /// left by an earlier run are removed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        match fs::remove_dir_all(root.join(STAGING_DIR)).await {
            Ok(()) => debug!(root = %root.display(), "Removed leftover staged files"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            root,
            staged: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Local root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn file_len(&self, path: &FsPath) -> Result<u64> {
        match fs::metadata(path.to_local(&self.root)).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StorageError::NotFound(path.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(path.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Size of a file.
    pub async fn size(&self, path: &FsPath) -> Result<u64> {
        self.file_len(path).await
    }

    /// Reads `length` bytes at `offset`; the range must lie within the file.
    pub async fn read(&self, path: &FsPath, offset: u64, length: u64) -> Result<Vec<u8>> {
        let size = self.file_len(path).await?;
        let in_bounds = offset.checked_add(length).is_some_and(|end| end <= size);
        if !in_bounds {
            return Err(StorageError::OutOfBounds {
                path: path.clone(),
                offset,
                length,
                size,
            });
        }
        let mut file = fs::File::open(path.to_local(&self.root)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut data = vec![0u8; length as usize];
        file.read_exact(&mut data).await?;
        Ok(data)
    }

    /// Writes `data` at `offset`, growing the file if needed.
    pub async fn write(&self, path: &FsPath, offset: u64, data: &[u8]) -> Result<()> {
        self.file_len(path).await?;
        let mut file = OpenOptions::new()
            .write(true)
            .open(path.to_local(&self.root))
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// Creates an empty file and its missing directories. Returns false if
    /// the path exists or is root.
    pub async fn create(&self, path: &FsPath) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        let local = path.to_local(&self.root);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&local).await {
            Ok(_) => {
                debug!(%path, "Created file");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes a file or directory tree and the directories it leaves
    /// empty. Returns false if nothing was there.
    pub async fn delete(&self, path: &FsPath) -> Result<bool> {
        if path.is_root() {
            return Err(StorageError::InvalidOperation("cannot delete the root directory".to_string()));
        }
        let local = path.to_local(&self.root);
        let meta = match fs::symlink_metadata(&local).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&local).await?;
        } else {
            fs::remove_file(&local).await?;
        }
        debug!(%path, "Deleted");

        let mut parent = path.parent().map_err(|e| StorageError::InvalidOperation(e.to_string()))?;
        while !parent.is_root() {
            let dir = parent.to_local(&self.root);
            let mut entries = fs::read_dir(&dir).await?;
            if entries.next_entry().await?.is_some() {
                break;
            }
            fs::remove_dir(&dir).await?;
            parent = parent
                .parent()
                .map_err(|e| StorageError::InvalidOperation(e.to_string()))?;
        }
        Ok(true)
    }

    /// Starts an empty staged file.
    pub async fn stage(&self) -> Result<StagedFile> {
        let dir = self.root.join(STAGING_DIR);
        fs::create_dir_all(&dir).await?;
        let local = dir.join(self.staged.fetch_add(1, Ordering::Relaxed).to_string());
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&local)
            .await?;
        Ok(StagedFile { local })
    }

    /// Appends `data` to a staged file.
    pub async fn append_staged(&self, staged: &StagedFile, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&staged.local).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// Moves a staged file to `path`, replacing whatever was there.
    pub async fn commit(&self, staged: &StagedFile, path: &FsPath) -> Result<()> {
        if path.is_root() {
            return Err(StorageError::InvalidOperation("cannot replace the root directory".to_string()));
        }
        let local = path.to_local(&self.root);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::symlink_metadata(&local).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&local).await?,
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::rename(&staged.local, &local).await?;
        debug!(%path, "Committed staged file");
        Ok(())
    }

    /// Drops a staged file that will not be committed.
    pub async fn discard(&self, staged: StagedFile) -> Result<()> {
        match fs::remove_file(&staged.local).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_staging(&self, local: &Path) -> bool {
        local == self.root.join(STAGING_DIR)
    }

    /// Every file under the root, ascending.
    pub async fn files(&self) -> Result<Vec<FsPath>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let kind = entry.file_type().await?;
                let local = entry.path();
                if kind.is_dir() {
                    if !self.is_staging(&local) {
                        pending.push(local);
                    }
                } else if kind.is_file() {
                    let relative = local
                        .strip_prefix(&self.root)
                        .map_err(|e| StorageError::Io(e.to_string()))?;
                    match FsPath::from_relative(relative) {
                        Ok(path) => files.push(path),
                        Err(e) => debug!(file = %local.display(), error = %e, "Skipping unrepresentable file"),
                    }
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Removes every directory below the root that holds no file.
    /// Returns how many were removed.
    pub async fn prune_empty_dirs(&self) -> Result<usize> {
        let mut dirs = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() && !self.is_staging(&entry.path()) {
                    dirs.push(entry.path());
                    pending.push(entry.path());
                }
            }
        }
        // Deepest first, so parents emptied by the loop go too.
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        let mut removed = 0;
        for dir in dirs {
            let mut entries = fs::read_dir(&dir).await?;
            if entries.next_entry().await?.is_none() {
                fs::remove_dir(&dir).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
