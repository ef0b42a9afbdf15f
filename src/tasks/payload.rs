//! Opaque bootstrap payloads embedded in tasks.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::TaskRef;

/// An opaque bootstrap blob (e.g. instance user data).
///
/// The engine never interprets the content. The payload declares which
/// tasks it references so that the embedding task is ordered after them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapPayload {
    /// Raw payload content.
    #[serde(default)]
    pub content: String,
    /// Tasks the payload content depends on.
    #[serde(default)]
    pub references: Vec<TaskRef>,
}

impl BootstrapPayload {
    /// Creates a payload with no references.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            references: Vec::new(),
        }
    }

    /// Adds a referenced task.
    #[must_use]
    pub fn with_reference(mut self, reference: TaskRef) -> Self {
        self.references.push(reference);
        self
    }

    /// Returns true if the payload has no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Base64 form sent to the provider.
    #[must_use]
    pub fn encoded(&self) -> String {
        STANDARD.encode(self.content.as_bytes())
    }

    /// Decodes a payload received from the provider.
    ///
    /// # Errors
    ///
    /// Returns an error message if the value is not valid base64 UTF-8.
    pub fn decode(encoded: &str) -> Result<Self, String> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| format!("invalid base64 user data: {e}"))?;
        let content =
            String::from_utf8(bytes).map_err(|e| format!("user data is not UTF-8: {e}"))?;
        Ok(Self::new(content))
    }
}

// Only the content is provider-visible; references exist for ordering.
impl PartialEq for BootstrapPayload {
    fn eq(&self, other: &Self) -> bool {
        self.content == other.content
    }
}

impl Eq for BootstrapPayload {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskKind;

    #[test]
    fn test_equality_ignores_references() {
        let a = BootstrapPayload::new("#!/bin/sh")
            .with_reference(TaskRef::new(TaskKind::SshKey, "admin"));
        let b = BootstrapPayload::new("#!/bin/sh");
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_encoded() {
        let payload = BootstrapPayload::new("echo hello");
        let decoded = BootstrapPayload::decode(&payload.encoded()).unwrap();
        assert_eq!(decoded.content, "echo hello");
        assert!(BootstrapPayload::decode("%%%").is_err());
    }
}
