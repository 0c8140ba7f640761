use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// An uploaded file: its declared name and size plus a reader over the content.
pub struct FileBlob {
    pub name: String,
    pub size: i64,
    reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, size: i64, reader: impl AsyncRead + Send + 'static) -> Self {
        FileBlob {
            name: name.into(),
            size,
            reader: Box::pin(reader),
        }
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = bytes.len() as i64;
        FileBlob::new(name, size, Cursor::new(bytes))
    }

    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len() as i64;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FileBlob::new(name, size, file))
    }

    pub fn into_reader(self) -> Pin<Box<dyn AsyncRead + Send>> {
        self.reader
    }
}

impl fmt::Debug for FileBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBlob")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the blob and returns an opaque key for it.
    async fn upload(&self, file: FileBlob) -> Result<String>;
}

/// Object store rooted at a local directory. Keys are random and keep the
/// uploaded file's extension.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalBlobStore { root: root.into() }
    }

    pub fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, file: FileBlob) -> Result<String> {
        let key = match Path::new(&file.name).extension() {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_string_lossy()),
            None => Uuid::new_v4().to_string(),
        };
        debug!("Uploading {} ({} bytes) as {}", file.name, file.size, key);

        fs::create_dir_all(&self.root).await.map_err(Error::upload)?;
        let path = self.path_of(&key);
        let mut partial = PartialUpload::new(path.clone());
        let mut out = File::create(&path).await.map_err(Error::upload)?;
        let mut reader = file.into_reader();
        let written = tokio::io::copy(&mut reader, &mut out)
            .await
            .map_err(Error::upload)?;
        out.flush().await.map_err(Error::upload)?;
        partial.keep();

        debug!("Stored {} bytes at {}", written, path.display());
        Ok(key)
    }
}

/// Removes the file at `path` when dropped, unless [`keep`](Self::keep) was
/// called. Covers both copy errors and an upload future dropped midway.
struct PartialUpload {
    path: Option<PathBuf>,
}

impl PartialUpload {
    fn new(path: PathBuf) -> Self {
        PartialUpload { path: Some(path) }
    }

    fn keep(&mut self) {
        self.path = None;
    }
}

impl Drop for PartialUpload {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed partial upload {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Can't remove partial upload {}: {}", path.display(), err),
        }
    }
}
