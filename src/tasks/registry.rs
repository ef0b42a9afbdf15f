//! Live identifiers resolved during a pass.

use std::collections::HashMap;

use super::{TaskKind, TaskRef};

/// Maps tasks to the provider identifiers they resolved to in this pass.
///
/// Populated as tasks are discovered or created, so later tasks can resolve
/// their references. Never persisted across passes.
#[derive(Debug, Clone, Default)]
pub struct IdRegistry {
    ids: HashMap<TaskRef, String>,
}

impl IdRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the live identifier of a task.
    pub fn register(&mut self, task: TaskRef, id: impl Into<String>) {
        self.ids.insert(task, id.into());
    }

    /// Returns the live identifier of a task.
    #[must_use]
    pub fn id_of(&self, task: &TaskRef) -> Option<&str> {
        self.ids.get(task).map(String::as_str)
    }

    /// Maps a live identifier back to the name of the task that owns it.
    #[must_use]
    pub fn task_for_id(&self, kind: TaskKind, id: &str) -> Option<&str> {
        self.ids
            .iter()
            .find(|(task, task_id)| task.kind == kind && task_id.as_str() == id)
            .map(|(task, _)| task.name.as_str())
    }

    /// Translates live identifiers into task names, keeping unknown ids as-is.
    #[must_use]
    pub fn names_for_ids(&self, kind: TaskKind, ids: &[String]) -> Vec<String> {
        ids.iter()
            .map(|id| {
                self.task_for_id(kind, id)
                    .map_or_else(|| id.clone(), str::to_string)
            })
            .collect()
    }

    /// Number of registered identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_lookup_is_kind_scoped() {
        let mut registry = IdRegistry::new();
        registry.register(TaskRef::new(TaskKind::Subnet, "a"), "sub-1");
        registry.register(TaskRef::new(TaskKind::SecurityGroup, "a"), "sg-1");

        assert_eq!(registry.task_for_id(TaskKind::Subnet, "sub-1"), Some("a"));
        assert_eq!(registry.task_for_id(TaskKind::Subnet, "sg-1"), None);
        assert_eq!(
            registry.names_for_ids(TaskKind::Subnet, &[String::from("sub-1"), String::from("sub-9")]),
            vec![String::from("a"), String::from("sub-9")]
        );
    }
}
