//! Task model for the reconciliation engine.
//!
//! A task is a declared unit of desired infrastructure state. Every task has
//! a kind, a name unique within that kind, a lifecycle, and a set of
//! dependencies on other tasks. Dependencies are never owned: they are
//! references looked up by identity in the [`TaskSet`].

mod group;
mod payload;
mod registry;
mod shared;

pub use group::{
    AutoScalerOpts, ComputeGroup, HeadroomOpts, Orientation, ROLE_TAG_PREFIX,
    ResourceLimitsOpts, RootVolumeOpts, ScaleDownOpts,
};
pub use payload::BootstrapPayload;
pub use registry::IdRegistry;
pub use shared::SharedResource;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ConfigError, Result};
use crate::planner::FieldSet;

/// Kinds of tasks the engine knows how to reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// An autoscaled group of compute instances.
    ComputeGroup,
    /// A network subnet.
    Subnet,
    /// A security group.
    SecurityGroup,
    /// An instance identity profile.
    InstanceProfile,
    /// An SSH key pair.
    SshKey,
    /// A load balancer.
    LoadBalancer,
}

/// Identity of a task: its kind plus its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskRef {
    /// Task kind.
    pub kind: TaskKind,
    /// Task name, unique within its kind.
    pub name: String,
}

/// Reconciliation mode of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    /// Create or update to converge on the desired state.
    #[default]
    Sync,
    /// The resource must exist; drift is logged but never corrected.
    WarnIfChanged,
    /// The resource must exist; drift fails the pass.
    ValidateOnly,
    /// The task is neither discovered nor rendered.
    Ignore,
}

/// A declared unit of desired state.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// A compute group.
    Group(ComputeGroup),
    /// A shared, referenced resource.
    Shared(SharedResource),
}

/// A task-shaped value that can be diffed and validated.
///
/// Implemented by every task type so the executor can walk desired,
/// actual, and delta representations the same way.
pub trait Reconcilable: Clone + Send + Sync {
    /// Identity of the task.
    fn task_ref(&self) -> TaskRef;

    /// Lifecycle of the task.
    fn lifecycle(&self) -> Lifecycle;

    /// Live provider identifier, when known (actual state only).
    fn live_id(&self) -> Option<&str>;

    /// Checks fields required before rendering, independent of provider state.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RequiredField`] or a validation error.
    fn check_required(&self) -> Result<()>;

    /// Computes the sparse delta of `self` (desired) against `actual`.
    #[must_use]
    fn delta(&self, actual: &Self) -> Self;

    /// Names of the fields populated in `self`, read as a delta.
    #[must_use]
    fn changed_fields(&self) -> FieldSet;
}

/// Registry of all tasks in a pass, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
    index: HashMap<TaskRef, usize>,
}

impl TaskKind {
    /// All task kinds.
    pub const ALL: [Self; 6] = [
        Self::ComputeGroup,
        Self::Subnet,
        Self::SecurityGroup,
        Self::InstanceProfile,
        Self::SshKey,
        Self::LoadBalancer,
    ];

    /// Returns the kind name used in identities and emitted documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ComputeGroup => "compute_group",
            Self::Subnet => "subnet",
            Self::SecurityGroup => "security_group",
            Self::InstanceProfile => "instance_profile",
            Self::SshKey => "ssh_key",
            Self::LoadBalancer => "load_balancer",
        }
    }

    /// Returns true for kinds modeled as [`SharedResource`].
    #[must_use]
    pub const fn is_shared(self) -> bool {
        !matches!(self, Self::ComputeGroup)
    }

    /// The attribute other tasks reference on this kind.
    #[must_use]
    pub const fn link_attribute(self) -> &'static str {
        match self {
            Self::InstanceProfile | Self::SshKey => "name",
            _ => "id",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TaskRef {
    /// Creates a new task identity.
    #[must_use]
    pub fn new(kind: TaskKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl Lifecycle {
    /// Returns true if the resource must already exist.
    #[must_use]
    pub const fn requires_existing(self) -> bool {
        matches!(self, Self::WarnIfChanged | Self::ValidateOnly)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sync => "sync",
            Self::WarnIfChanged => "warn-if-changed",
            Self::ValidateOnly => "validate-only",
            Self::Ignore => "ignore",
        };
        f.write_str(s)
    }
}

impl Task {
    /// Identity of the task.
    #[must_use]
    pub fn task_ref(&self) -> TaskRef {
        match self {
            Self::Group(g) => g.task_ref(),
            Self::Shared(s) => s.task_ref(),
        }
    }

    /// Lifecycle of the task.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        match self {
            Self::Group(g) => g.lifecycle,
            Self::Shared(s) => s.lifecycle,
        }
    }

    /// Tasks this task depends on, including those referenced by embedded
    /// resources.
    #[must_use]
    pub fn dependencies(&self) -> Vec<TaskRef> {
        match self {
            Self::Group(g) => g.dependencies(),
            Self::Shared(s) => s.depends_on.clone(),
        }
    }
}

impl TaskSet {
    /// Creates an empty task set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task.
    ///
    /// # Errors
    ///
    /// Returns an error if a task with the same identity already exists.
    pub fn insert(&mut self, task: Task) -> Result<()> {
        let key = task.task_ref();
        if self.index.contains_key(&key) {
            return Err(ConfigError::DuplicateName {
                kind: key.kind.to_string(),
                name: key.name,
            }
            .into());
        }
        self.index.insert(key, self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    /// Looks up a task by identity.
    #[must_use]
    pub fn get(&self, key: &TaskRef) -> Option<&Task> {
        self.index.get(key).map(|&i| &self.tasks[i])
    }

    /// Declaration position of a task.
    #[must_use]
    pub fn position(&self, key: &TaskRef) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Iterates over tasks in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if there are no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl FromIterator<Task> for Result<TaskSet> {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        let mut set = TaskSet::new();
        for task in iter {
            set.insert(task)?;
        }
        Ok(set)
    }
}
