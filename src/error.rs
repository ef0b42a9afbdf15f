//! Error types for the Stratus reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a
//! reconciliation pass: configuration, provider calls, discovery,
//! rendering, and document output.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::tasks::TaskRef;

/// The main error type for the Stratus engine.
#[derive(Debug, Error)]
pub enum StratusError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Raw provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderErrors),

    /// Discovery errors.
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Rendering errors.
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Output sink errors.
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors. All of them are fatal before execution.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate task identity.
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName {
        /// Kind of the task.
        kind: String,
        /// The duplicated name.
        name: String,
    },

    /// A field required before rendering is not set.
    #[error("Required field '{field}' is not set on {task}")]
    RequiredField {
        /// Task missing the field.
        task: TaskRef,
        /// Name of the field.
        field: String,
    },

    /// Circular dependency detected.
    #[error("Circular dependency detected between: {}", .members.join(", "))]
    CircularDependency {
        /// Tasks participating in the cycle.
        members: Vec<String>,
    },

    /// A task references another task absent from the set.
    #[error("{from} references {missing}, which is not declared")]
    UnresolvedReference {
        /// The referencing task.
        from: TaskRef,
        /// The missing task.
        missing: TaskRef,
    },
}

/// A single provider sub-error.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProviderSubError {
    /// Provider error code, when supplied.
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
}

/// Structured collection of errors returned by a provider call.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProviderErrors {
    /// The individual sub-errors.
    pub errors: Vec<ProviderSubError>,
}

/// Result alias for provider adapter calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderErrors>;

/// Discovery errors. Fatal for the whole pass.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// More than one live resource matched a task.
    #[error("{count} live resources match {task}")]
    AmbiguousMatch {
        /// The task being discovered.
        task: TaskRef,
        /// Number of matches.
        count: usize,
    },

    /// The lifecycle requires the resource to exist, but it does not.
    #[error("{task} must already exist but was not found")]
    MissingExisting {
        /// The task being discovered.
        task: TaskRef,
    },

    /// A validate-only task has drifted.
    #[error("{task} has drifted in fields: {}", .fields.join(", "))]
    ChangesRejected {
        /// The task being discovered.
        task: TaskRef,
        /// The drifted fields.
        fields: Vec<String>,
    },
}

/// Rendering errors, raised by either target.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The load balancer name resolved under both provider kinds.
    #[error("Load balancer '{name}' resolves to both classic ({classic}) and network ({network})")]
    AmbiguousLoadBalancer {
        /// The name tag looked up.
        name: String,
        /// Classic match.
        classic: String,
        /// Network match.
        network: String,
    },

    /// A group carries more than one role tag.
    #[error("Found multiple role tags {first:?} vs {second:?}")]
    MultipleRoleTags {
        /// First role.
        first: String,
        /// Second role.
        second: String,
    },

    /// The machine image could not be resolved.
    #[error("Unable to resolve image {name:?}: not found")]
    ImageNotFound {
        /// Image name.
        name: String,
    },

    /// The machine type is unknown to the provider.
    #[error("Unknown machine type {name:?}")]
    MachineTypeNotFound {
        /// Machine type name.
        name: String,
    },

    /// A referenced task has no live identifier yet.
    #[error("No live identifier for {reference}")]
    UnresolvedIdentifier {
        /// The referenced task.
        reference: TaskRef,
    },

    /// The retry budget was exhausted on a transient error.
    #[error("Gave up after {attempts} attempts (last error: {last})")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last provider error observed.
        last: ProviderErrors,
    },
}

/// Phase of task processing, used as error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Discovering actual state.
    Find,
    /// Checking preconditions on the desired spec.
    Validate,
    /// Creating a missing resource.
    Create,
    /// Updating an existing resource.
    Update,
    /// Emitting a declarative block.
    Emit,
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Processing a task failed; carries the task identity and phase.
    #[error("{phase} failed for {task}: {source}")]
    TaskFailed {
        /// The task being processed.
        task: TaskRef,
        /// The phase that failed.
        phase: Phase,
        /// The underlying error.
        #[source]
        source: Box<StratusError>,
    },

    /// Another pass holds the lock.
    #[error("Pass is locked by another process (lock holder: {holder}, since: {since})")]
    Locked {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },
}

/// Output sink errors.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Local file output failed.
    #[error("Failed to write {path}: {message}")]
    WriteFailed {
        /// Destination path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 output backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("Document serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Lock file is unreadable.
    #[error("Lock file is corrupted: {message}")]
    CorruptedLock {
        /// Description of the corruption.
        message: String,
    },
}

/// Result type alias for Stratus operations.
pub type Result<T> = std::result::Result<T, StratusError>;

impl StratusError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wraps this error with task identity and phase.
    #[must_use]
    pub fn in_task(self, task: TaskRef, phase: Phase) -> Self {
        Self::Reconcile(ReconcileError::TaskFailed {
            task,
            phase,
            source: Box::new(self),
        })
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl ProviderSubError {
    /// Creates a sub-error with a code.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl ProviderErrors {
    /// Creates an error collection holding a single message.
    #[must_use]
    pub fn single(message: impl Into<String>) -> Self {
        Self {
            errors: vec![ProviderSubError {
                code: None,
                message: message.into(),
            }],
        }
    }

    /// Creates an error collection holding a single coded message.
    #[must_use]
    pub fn coded(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![ProviderSubError::new(code, message)],
        }
    }

    /// Returns true if any sub-error message contains `pattern`.
    #[must_use]
    pub fn contains_message(&self, pattern: &str) -> bool {
        self.errors.iter().any(|e| e.message.contains(pattern))
    }

    /// Returns true if any sub-error carries the given code.
    #[must_use]
    pub fn has_code(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code.as_deref() == Some(code))
    }
}

impl fmt::Display for ProviderErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "unknown provider error");
        }
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            match &err.code {
                Some(code) => write!(f, "{code}: {}", err.message)?,
                None => write!(f, "{}", err.message)?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for ProviderErrors {}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Find => "find",
            Self::Validate => "validate",
            Self::Create => "create",
            Self::Update => "update",
            Self::Emit => "emit",
        };
        write!(f, "{s}")
    }
}

impl OutputError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskKind;

    #[test]
    fn test_provider_errors_display_joins_sub_errors() {
        let errs = ProviderErrors {
            errors: vec![
                ProviderSubError::new("E1", "first"),
                ProviderSubError {
                    code: None,
                    message: String::from("second"),
                },
            ],
        };
        assert_eq!(errs.to_string(), "E1: first; second");
        assert!(errs.contains_message("seco"));
        assert!(errs.has_code("E1"));
        assert!(!errs.has_code("E2"));
    }

    #[test]
    fn test_task_context_wrapping() {
        let task = TaskRef::new(TaskKind::ComputeGroup, "nodes");
        let err = StratusError::from(ProviderErrors::single("boom")).in_task(task, Phase::Create);
        let message = err.to_string();
        assert!(message.contains("create failed for compute_group/nodes"));
        assert!(message.contains("boom"));
    }

    #[test]
    fn test_cycle_message_names_members() {
        let err = ConfigError::CircularDependency {
            members: vec![String::from("subnet/a"), String::from("subnet/b")],
        };
        assert_eq!(
            err.to_string(),
            "Circular dependency detected between: subnet/a, subnet/b"
        );
    }
}
