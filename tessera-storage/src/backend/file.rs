//! Storage on the local filesystem.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tessera_core::{Content, ReadAs, StorageError, TesseraResult, TextEncoding};
use tracing::{debug, warn};

use crate::{reshape, FindOptions, FindStream, Metadata, PipelineStorage};

/// Storage rooted at a directory. Keys are `/`-separated paths relative to
/// the root; parent directories are created on write.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    encoding: TextEncoding,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            encoding: TextEncoding::Utf8,
        }
    }

    /// Encoding used for text values written without an explicit one.
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> TesseraResult<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty() {
            return Err(invalid_key(key, "key is empty"));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(invalid_key(key, "key escapes the storage root"))
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid_key(key, "key must be relative"))
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

fn invalid_key(key: &str, reason: &str) -> tessera_core::TesseraError {
    StorageError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn io_error(path: &Path, err: &std::io::Error) -> tessera_core::TesseraError {
    StorageError::io(path.display().to_string(), err).into()
}

#[async_trait]
impl PipelineStorage for FileStorage {
    async fn get(&self, key: &str, read: ReadAs) -> TesseraResult<Option<Content>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => reshape(Content::Binary(bytes), read).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Content,
        encoding: Option<TextEncoding>,
    ) -> TesseraResult<()> {
        let path = self.path_for(key)?;
        let bytes = value.into_bytes(encoding.unwrap_or(self.encoding))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, &e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_error(&path, &e))
    }

    async fn has(&self, key: &str) -> TesseraResult<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    async fn delete(&self, key: &str) -> TesseraResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    async fn clear(&self) -> TesseraResult<()> {
        debug!(root = %self.root.display(), "Clearing file storage");
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.root, &e)),
        }
    }

    /// Files directly under the root. Subdirectories are not descended.
    async fn keys(&self) -> TesseraResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, &e)),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, &e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| io_error(&entry.path(), &e))?
                .is_file();
            if is_file {
                keys.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn find(&self, options: FindOptions) -> TesseraResult<FindStream<'_>> {
        let start = match options.base_dir.as_deref() {
            Some(dir) if !dir.is_empty() => self.path_for(dir)?,
            _ => self.root.clone(),
        };
        debug!(start = %start.display(), pattern = %options.pattern, "Searching file storage");
        let walk = Walk {
            root: self.root.clone(),
            dirs: vec![start],
            files: VecDeque::new(),
            remaining: options.limit(),
            options,
        };
        Ok(stream::unfold(walk, Walk::next_match).boxed())
    }

    /// Child rooted at `name` below this root. Only plain path segments of
    /// `name` are kept, so a child never leaves its parent's directory.
    fn child(&self, name: Option<&str>) -> Arc<dyn PipelineStorage> {
        let mut root = self.root.clone();
        if let Some(name) = name {
            let mut dropped = false;
            for component in Path::new(name).components() {
                match component {
                    Component::Normal(segment) => root.push(segment),
                    Component::CurDir => {}
                    _ => dropped = true,
                }
            }
            if dropped {
                warn!(name = %name, root = %root.display(), "Ignored non-relative segments of child name");
            }
        }
        Arc::new(Self {
            root,
            encoding: self.encoding,
        })
    }
}

/// Depth-first directory walk that yields matching keys one at a time.
struct Walk {
    root: PathBuf,
    dirs: Vec<PathBuf>,
    files: VecDeque<PathBuf>,
    remaining: usize,
    options: FindOptions,
}

impl Walk {
    async fn next_match(mut self) -> Option<(TesseraResult<(String, Metadata)>, Self)> {
        while self.remaining > 0 {
            if let Some(file) = self.files.pop_front() {
                let key = self.key_for(&file);
                if let Some(metadata) = self.options.matches(&key) {
                    self.remaining -= 1;
                    return Some((Ok((key, metadata)), self));
                }
                continue;
            }

            let dir = self.dirs.pop()?;
            if let Err(e) = self.read_dir(&dir).await {
                if e.kind() == ErrorKind::NotFound {
                    continue;
                }
                self.remaining = 0;
                return Some((Err(io_error(&dir, &e)), self));
            }
        }
        None
    }

    async fn read_dir(&mut self, dir: &Path) -> std::io::Result<()> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                dirs.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        dirs.sort();
        self.files.extend(files);
        // Popped from the back, so push in reverse to visit in order.
        self.dirs.extend(dirs.into_iter().rev());
        Ok(())
    }

    fn key_for(&self, file: &Path) -> String {
        let relative = file.strip_prefix(&self.root).unwrap_or(file);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}
