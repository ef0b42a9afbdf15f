//! S3-based document sink.
//!
//! Stores emitted documents in AWS S3 (or a compatible service) so a
//! separate apply stage can pick them up.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{OutputError, Result};
use crate::target::EmittedDocument;

use super::lock::{LOCK_EXPIRY_SECS, PassLock};
use super::sink::DocumentSink;
use super::{DIGEST_FILE, DOCUMENT_FILE, LOCK_FILE};

/// Status returned when a conditional put finds the key already present.
const PRECONDITION_FAILED: u16 = 412;

/// S3-based document sink.
#[derive(Debug)]
pub struct S3DocumentSink {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
}

impl S3DocumentSink {
    /// Creates a new S3 sink, loading AWS configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// Creates a new S3 sink with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the full S3 key for a file.
    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| OutputError::s3(format!("Failed to read S3 object: {e}")))?;

                let content = String::from_utf8(bytes.to_vec())
                    .map_err(|e| OutputError::s3(format!("Invalid UTF-8 in S3 object: {e}")))?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(OutputError::s3(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: &str, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| OutputError::s3(format!("S3 put error: {e}")))?;

        Ok(())
    }

    /// Puts an object only if the key does not exist yet. Returns false if
    /// it does.
    async fn put_object_if_absent(&self, key: &str, content: &str) -> Result<bool> {
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .if_none_match("*")
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.raw_response().map(|r| r.status().as_u16()) == Some(PRECONDITION_FAILED) => {
                Ok(false)
            }
            Err(e) => Err(OutputError::s3(format!("S3 put error: {e}")).into()),
        }
    }

    /// Deletes an object from S3.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| OutputError::s3(format!("S3 delete error: {e}")))?;

        Ok(())
    }
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

#[async_trait]
impl DocumentSink for S3DocumentSink {
    async fn write(&self, document: &EmittedDocument) -> Result<()> {
        info!("Writing document to {}", self.location());

        for (name, content) in &document.files {
            self.put_object(&self.key(name), content, "text/plain")
                .await?;
        }
        self.put_object(&self.key(DOCUMENT_FILE), &document.content, "application/json")
            .await?;
        self.put_object(&self.key(DIGEST_FILE), &document.digest, "text/plain")
            .await?;

        debug!("Document written to S3 with digest {}", document.digest);
        Ok(())
    }

    async fn stored_digest(&self) -> Result<Option<String>> {
        Ok(self
            .get_object(&self.key(DIGEST_FILE))
            .await?
            .map(|d| d.trim().to_string()))
    }

    async fn acquire_lock(&self, holder: &str) -> Result<PassLock> {
        let key = self.key(LOCK_FILE);
        let lock = PassLock::new(holder);
        let content = lock.to_json()?;

        if !self.put_object_if_absent(&key, &content).await? {
            let existing = self.lock_info().await?;
            PassLock::ensure_free(existing.as_ref())?;
            debug!("Expired lock found, taking over");

            self.delete_object(&key).await?;
            if !self.put_object_if_absent(&key, &content).await? {
                let current = self.lock_info().await?;
                PassLock::ensure_free(current.as_ref())?;
                return Err(OutputError::s3("Pass lock changed hands during takeover").into());
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
                self.delete_object(&self.key(LOCK_FILE)).await?;
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
        self.get_object(&self.key(LOCK_FILE))
            .await?
            .map(|content| PassLock::parse(&content))
            .transpose()
    }

    fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key(DOCUMENT_FILE))
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
