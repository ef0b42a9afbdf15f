//! Pass locking.
//!
//! A direct-apply pass holds a lock for its duration so that two passes
//! never mutate the same cluster concurrently. Locks expire on their own so
//! a crashed pass cannot block the cluster forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OutputError, ReconcileError, Result};

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300; // 5 minutes

/// A held pass lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassLock {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl PassLock {
    /// Creates a lock for `holder`, or for the current process when
    /// `holder` is empty.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder,
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Parses a stored lock.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::CorruptedLock`] if the content is not a lock.
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            OutputError::CorruptedLock {
                message: format!("Failed to parse lock: {e}"),
            }
            .into()
        })
    }

    /// Serializes the lock for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| OutputError::serialization(format!("Failed to serialize lock: {e}")).into())
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }

    /// Fails if `existing` is a live lock.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Locked`] naming the current holder.
    pub fn ensure_free(existing: Option<&Self>) -> Result<()> {
        match existing {
            Some(lock) if !lock.is_expired() => Err(ReconcileError::Locked {
                holder: lock.holder.clone(),
                since: lock.acquired_at.to_rfc3339(),
            }
            .into()),
            _ => Ok(()),
        }
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_creation() {
        let lock = PassLock::new("ci-runner");
        assert_eq!(lock.holder, "ci-runner");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
    }

    #[test]
    fn test_empty_holder_uses_process_id() {
        let lock = PassLock::new("");
        assert!(lock.holder.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_expired_lock_is_free() {
        let mut lock = PassLock::new("old");
        assert!(PassLock::ensure_free(Some(&lock)).is_err());

        lock.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(PassLock::ensure_free(Some(&lock)).is_ok());
        assert!(PassLock::ensure_free(None).is_ok());
    }

    #[test]
    fn test_corrupted_lock() {
        let err = PassLock::parse("not json").unwrap_err();
        assert!(err.to_string().contains("Lock file is corrupted"));
    }
}
