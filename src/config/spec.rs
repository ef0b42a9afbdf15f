//! Cluster configuration types.
//!
//! This module defines the structs that map to the `stratus.cluster.yaml`
//! file: the cluster identity, engine settings, and the declared tasks.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::error::{ConfigError, Result};
use crate::target::{DEFAULT_ATTEMPTS, DEFAULT_DELAY_SECS, DEFAULT_TRANSIENT_PATTERN, RetryPolicy, TargetKind};
use crate::tasks::{ComputeGroup, SharedResource, Task, TaskSet};

/// The root configuration of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    /// Cluster identity.
    pub cluster: ClusterInfo,
    /// Engine settings.
    #[serde(default)]
    pub engine: EngineSettings,
    /// Shared resources referenced by groups.
    #[serde(default)]
    pub shared: Vec<SharedResource>,
    /// Compute groups.
    #[serde(default)]
    pub groups: Vec<ComputeGroup>,
}

/// Cluster identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Cluster name.
    pub name: String,
    /// Default region for groups that do not declare one.
    #[serde(default)]
    pub region: Option<String>,
}

/// Engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct EngineSettings {
    /// Target a `reconcile` pass renders to. `apply` refuses to run when
    /// this is declarative.
    #[serde(default)]
    pub target: TargetKind,
    /// Retry policy for provider mutations.
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetrySettings,
    /// Where emitted documents and the pass lock are stored.
    #[serde(default)]
    pub output: OutputSettings,
}

impl EngineSettings {
    /// Fails unless the configured target is `kind`.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming both targets.
    pub fn require_target(&self, kind: TargetKind) -> Result<()> {
        if self.target == kind {
            return Ok(());
        }
        Err(ConfigError::validation(
            format!("Configured target is {}, not {kind}", self.target),
            "engine.target",
        )
        .into())
    }
}

/// Retry settings for provider mutations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct RetrySettings {
    /// Attempts including the first.
    #[serde(default = "default_attempts")]
    #[validate(range(min = 1, max = 100))]
    pub attempts: u32,
    /// Delay between attempts in seconds.
    #[serde(default = "default_delay_secs")]
    #[validate(range(max = 600))]
    pub delay_secs: u64,
    /// Error message fragments that mark a failure as transient.
    #[serde(default = "default_transient_patterns")]
    pub transient_patterns: Vec<String>,
}

/// Output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputSettings {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: OutputBackend,
    /// Local output directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
}

/// Output backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    /// Local directory.
    #[default]
    Local,
    /// AWS S3 bucket.
    S3,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_secs: default_delay_secs(),
            transient_patterns: default_transient_patterns(),
        }
    }
}

impl RetrySettings {
    /// Builds the retry policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.attempts,
            Duration::from_secs(self.delay_secs),
            self.transient_patterns.clone(),
        )
    }
}

impl ClusterConfig {
    /// Builds the task set of the cluster.
    ///
    /// Shared resources come first, then groups, each in declaration order.
    /// Groups inherit the cluster region when they declare none, and an
    /// autoscaler without a cluster identifier uses the cluster name.
    ///
    /// # Errors
    ///
    /// Returns an error if two tasks of the same kind share a name.
    pub fn task_set(&self) -> Result<TaskSet> {
        let shared = self.shared.iter().cloned().map(Task::Shared);
        let groups = self.groups.iter().map(|group| {
            let mut group = group.clone();
            if group.region.is_none() {
                group.region.clone_from(&self.cluster.region);
            }
            if let Some(auto_scaler) = &mut group.auto_scaler
                && auto_scaler.cluster_id.is_none()
            {
                auto_scaler.cluster_id = Some(self.cluster.name.clone());
            }
            Task::Group(group)
        });
        shared.chain(groups).collect()
    }
}

const fn default_attempts() -> u32 {
    DEFAULT_ATTEMPTS
}

const fn default_delay_secs() -> u64 {
    DEFAULT_DELAY_SECS
}

fn default_transient_patterns() -> Vec<String> {
    vec![DEFAULT_TRANSIENT_PATTERN.to_string()]
}
