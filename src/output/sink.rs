//! Document sink trait definition.

use async_trait::async_trait;

use crate::error::Result;
use crate::target::EmittedDocument;

use super::lock::PassLock;

/// Trait for document output backends.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Writes the document, its digest and its payload files.
    async fn write(&self, document: &EmittedDocument) -> Result<()>;

    /// Digest of the last written document, if any.
    async fn stored_digest(&self) -> Result<Option<String>>;

    /// Acquires the pass lock.
    ///
    /// An empty `holder` generates an identifier for the current process.
    async fn acquire_lock(&self, holder: &str) -> Result<PassLock>;

    /// Releases the pass lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Current lock, if any.
    async fn lock_info(&self) -> Result<Option<PassLock>>;

    /// Human-readable location of the document.
    fn location(&self) -> String;

    /// Backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl DocumentSink for Box<dyn DocumentSink> {
    async fn write(&self, document: &EmittedDocument) -> Result<()> {
        (**self).write(document).await
    }

    async fn stored_digest(&self) -> Result<Option<String>> {
        (**self).stored_digest().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<PassLock> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn lock_info(&self) -> Result<Option<PassLock>> {
        (**self).lock_info().await
    }

    fn location(&self) -> String {
        (**self).location()
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::LocalDocumentSink;

    #[test]
    fn test_boxed_sink_forwards() {
        let temp = tempfile::TempDir::new().unwrap();
        let sink: Box<dyn DocumentSink> = Box::new(LocalDocumentSink::with_base_dir(temp.path()));

        assert_eq!(sink.backend_type(), "local");
        assert!(sink.location().ends_with("stratus.json"));

        let lock = tokio_test::block_on(sink.acquire_lock("")).unwrap();
        assert!(!lock.holder.is_empty());
        let held = tokio_test::block_on(sink.lock_info()).unwrap();
        assert_eq!(held.map(|l| l.lock_id), Some(lock.lock_id.clone()));

        tokio_test::block_on(sink.release_lock(&lock.lock_id)).unwrap();
        assert!(tokio_test::block_on(sink.lock_info()).unwrap().is_none());
    }
}
