//! Shared resource tasks: subnets, security groups, instance profiles, SSH
//! keys and load balancers referenced by compute groups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{ConfigError, DiscoveryError, Result};
use crate::planner::FieldSet;
use crate::provider::{ProviderAdapter, ProviderResource, SharedRecord};

use super::{Lifecycle, Reconcilable, TaskKind, TaskRef};

/// A shared resource referenced by other tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedResource {
    /// Resource kind.
    pub kind: TaskKind,
    /// Name, unique within the kind.
    pub name: String,
    /// Lifecycle.
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Known live identifier. Discovery matches by identifier when set.
    #[serde(default)]
    pub id: Option<String>,
    /// Free-form attributes reconciled key by key.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Explicit dependencies on other tasks.
    #[serde(default)]
    pub depends_on: Vec<TaskRef>,
}

impl SharedResource {
    /// Creates a resource with no attributes.
    #[must_use]
    pub fn new(kind: TaskKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            lifecycle: Lifecycle::Sync,
            id: None,
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Sets the lifecycle.
    #[must_use]
    pub const fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Sets the known live identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dependency: TaskRef) -> Self {
        self.depends_on.push(dependency);
        self
    }

    /// Provider record for this resource.
    #[must_use]
    pub fn to_record(&self, id: Option<String>) -> SharedRecord {
        SharedRecord {
            kind: self.kind,
            id,
            name: self.name.clone(),
            attributes: self.attributes.clone(),
        }
    }

    /// Discovers the live counterpart, by identifier when known and by name
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if more than one resource matches, or if the provider
    /// call fails.
    pub async fn find<P: ProviderAdapter + ?Sized>(
        &self,
        provider: &P,
    ) -> Result<Option<Self>> {
        let matches: Vec<SharedRecord> = provider
            .list(self.kind)
            .await?
            .into_iter()
            .filter_map(|r| match r {
                ProviderResource::Shared(record) if self.matches(&record) => Some(record),
                _ => None,
            })
            .collect();

        match matches.as_slice() {
            [] => Ok(None),
            [record] => {
                debug!("Found {} {} ({:?})", self.kind, self.name, record.id);
                Ok(Some(Self {
                    kind: self.kind,
                    name: self.name.clone(),
                    lifecycle: self.lifecycle,
                    id: record.id.clone(),
                    attributes: record.attributes.clone(),
                    depends_on: self.depends_on.clone(),
                }))
            }
            _ => Err(DiscoveryError::AmbiguousMatch {
                task: self.task_ref(),
                count: matches.len(),
            }
            .into()),
        }
    }

    fn matches(&self, record: &SharedRecord) -> bool {
        match &self.id {
            Some(id) => record.id.as_deref() == Some(id.as_str()),
            None => record.name == self.name,
        }
    }
}

impl Reconcilable for SharedResource {
    fn task_ref(&self) -> TaskRef {
        TaskRef::new(self.kind, &self.name)
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn live_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn check_required(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::validation(
                format!("{} name cannot be empty", self.kind),
                "name",
            )
            .into());
        }
        Ok(())
    }

    fn delta(&self, actual: &Self) -> Self {
        let attributes = self
            .attributes
            .iter()
            .filter(|(key, value)| actual.attributes.get(*key) != Some(*value))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            attributes,
            id: None,
            ..self.clone()
        }
    }

    fn changed_fields(&self) -> FieldSet {
        self.attributes
            .keys()
            .map(|key| format!("attributes.{key}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::InMemoryProvider;

    #[test]
    fn test_attribute_delta() {
        let desired = SharedResource::new(TaskKind::SecurityGroup, "nodes")
            .with_attribute("description", "node traffic")
            .with_attribute("vpc", "main");
        let actual = SharedResource::new(TaskKind::SecurityGroup, "nodes")
            .with_attribute("description", "old")
            .with_attribute("vpc", "main")
            .with_attribute("extra", "ignored");

        let fields: Vec<_> = desired.delta(&actual).changed_fields().into_iter().collect();
        assert_eq!(fields, vec![String::from("attributes.description")]);
    }

    #[tokio::test]
    async fn test_find_by_id_when_known() {
        let provider = InMemoryProvider::new()
            .with_shared(SharedRecord {
                kind: TaskKind::Subnet,
                id: Some(String::from("sub-1")),
                name: String::from("legacy-name"),
                attributes: BTreeMap::new(),
            })
            .with_shared(SharedRecord {
                kind: TaskKind::Subnet,
                id: Some(String::from("sub-2")),
                name: String::from("a"),
                attributes: BTreeMap::new(),
            });

        let by_id = SharedResource::new(TaskKind::Subnet, "a").with_id("sub-1");
        let found = by_id
            .find(&provider)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id.as_deref(), Some("sub-1"));
        assert_eq!(found.name, "a");

        let by_name = SharedResource::new(TaskKind::Subnet, "a");
        let found = by_name
            .find(&provider)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id.as_deref(), Some("sub-2"));
    }

    #[tokio::test]
    async fn test_missing_resource_is_none() {
        let provider = InMemoryProvider::new();
        let found = SharedResource::new(TaskKind::SshKey, "admin")
            .find(&provider)
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
