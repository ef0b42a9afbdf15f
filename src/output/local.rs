//! Local file-based document sink.
//!
//! Writes the document, its digest and its payload files into a directory,
//! for local runs and for pipelines that pick the document up from disk.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{OutputError, Result, StratusError};
use crate::target::EmittedDocument;

use super::lock::{LOCK_EXPIRY_SECS, PassLock};
use super::sink::DocumentSink;
use super::{DIGEST_FILE, DOCUMENT_FILE, LOCK_FILE};

/// Default output directory name.
const OUTPUT_DIR: &str = ".stratus";

/// Local file-based document sink.
#[derive(Debug)]
pub struct LocalDocumentSink {
    /// Output directory.
    base_dir: PathBuf,
}

impl LocalDocumentSink {
    /// Creates a sink writing under `.stratus` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| StratusError::internal(format!("Cannot determine current directory: {e}")))?
            .join(OUTPUT_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a sink writing under a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Output directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Writes `content` to `path` through a temporary file and a rename.
    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        let failed = |message: String| {
            StratusError::from(OutputError::WriteFailed {
                path: path.to_path_buf(),
                message,
            })
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| failed(format!("Failed to create directory: {e}")))?;
        }

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| failed(format!("Failed to create temp file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| failed(format!("Failed to write file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| failed(format!("Failed to sync file: {e}")))?;

        // Atomic rename
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| failed(format!("Failed to rename file: {e}")))?;
        Ok(())
    }

    /// Creates the lock file exclusively. Returns false if it already exists.
    async fn create_lock_file(&self, content: &str) -> Result<bool> {
        let path = self.base_dir.join(LOCK_FILE);
        fs::create_dir_all(&self.base_dir).await?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        Ok(true)
    }

    async fn read_file(&self, name: &str) -> Result<Option<String>> {
        let path = self.base_dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path).await?))
    }
}

#[async_trait]
impl DocumentSink for LocalDocumentSink {
    async fn write(&self, document: &EmittedDocument) -> Result<()> {
        let path = self.base_dir.join(DOCUMENT_FILE);
        info!("Writing document to: {}", path.display());

        for (name, content) in &document.files {
            self.write_file(&self.base_dir.join(name), content).await?;
        }
        self.write_file(&path, &document.content).await?;
        self.write_file(&self.base_dir.join(DIGEST_FILE), &document.digest)
            .await?;

        debug!("Document written with digest {}", document.digest);
        Ok(())
    }

    async fn stored_digest(&self) -> Result<Option<String>> {
        Ok(self
            .read_file(DIGEST_FILE)
            .await?
            .map(|d| d.trim().to_string()))
    }

    async fn acquire_lock(&self, holder: &str) -> Result<PassLock> {
        let lock = PassLock::new(holder);
        let content = lock.to_json()?;

        if !self.create_lock_file(&content).await? {
            let existing = self.lock_info().await?;
            PassLock::ensure_free(existing.as_ref())?;
            debug!("Expired lock found, taking over");

            match fs::remove_file(self.base_dir.join(LOCK_FILE)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            // Another pass may have taken over first.
            if !self.create_lock_file(&content).await? {
                let current = self.lock_info().await?;
                PassLock::ensure_free(current.as_ref())?;
                return Err(StratusError::internal("Pass lock changed hands during takeover"));
            }
        }

        info!(
            "Acquired pass lock: {} (expires in {}s)",
            lock.lock_id, LOCK_EXPIRY_SECS
        );
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.lock_info().await? {
            if existing.lock_id == lock_id {
                fs::remove_file(self.base_dir.join(LOCK_FILE)).await?;
                info!("Released pass lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<PassLock>> {
        self.read_file(LOCK_FILE)
            .await?
            .map(|content| PassLock::parse(&content))
            .transpose()
    }

    fn location(&self) -> String {
        self.base_dir.join(DOCUMENT_FILE).display().to_string()
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
