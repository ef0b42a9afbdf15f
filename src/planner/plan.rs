//! Pass plan types.
//!
//! A plan is the dry-run result of a pass: what the executor would do with
//! every task, computed from discovery and deltas without rendering.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::tasks::{Lifecycle, TaskRef};

/// A complete dry-run plan.
#[derive(Debug, Clone, Serialize)]
pub struct PassPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Planned entries in execution order.
    pub entries: Vec<PlannedChange>,
}

/// What would happen to a single task.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedChange {
    /// The task.
    pub task: TaskRef,
    /// Lifecycle of the task.
    pub lifecycle: Lifecycle,
    /// Planned action.
    pub action: PlanAction,
    /// Changed fields, for updates, warnings and rejections.
    pub fields: Vec<String>,
}

/// Types of planned actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    /// The resource is missing and would be created.
    Create,
    /// The resource has drifted and would be updated.
    Update,
    /// The resource matches the desired state.
    Unchanged,
    /// Drift would be logged but not corrected.
    Warn,
    /// Drift would fail the pass.
    Reject,
    /// A required resource is missing; the pass would fail.
    Missing,
    /// The task is ignored.
    Skip,
}

impl PassPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Adds an entry.
    pub fn push(&mut self, task: TaskRef, lifecycle: Lifecycle, action: PlanAction, fields: Vec<String>) {
        self.entries.push(PlannedChange {
            task,
            lifecycle,
            action,
            fields,
        });
    }

    /// Returns true if applying the plan would not touch the provider.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|e| matches!(e.action, PlanAction::Create | PlanAction::Update))
    }

    /// Returns true if applying the plan would fail.
    #[must_use]
    pub fn has_blockers(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.action, PlanAction::Reject | PlanAction::Missing))
    }

    /// Number of entries with the given action.
    #[must_use]
    pub fn count(&self, action: PlanAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}

impl Default for PassPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Unchanged => "unchanged",
            Self::Warn => "warn",
            Self::Reject => "reject",
            Self::Missing => "missing",
            Self::Skip => "skip",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.task)?;
        if !self.fields.is_empty() {
            write!(f, " ({})", self.fields.join(", "))?;
        }
        Ok(())
    }
}

impl std::fmt::Display for PassPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_noop() && !self.has_blockers() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Pass Plan ({} tasks):", self.entries.len())?;
        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(f, "  {i}. {entry}")?;
        }
        Ok(())
    }
}
