//! In-memory provider.
//!
//! Holds provider state in process, optionally seeded from a YAML fixture.
//! Used for offline dry runs and throughout the test suite.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::error::{ConfigError, ProviderErrors, ProviderResult, Result};
use crate::tasks::TaskKind;

use super::ProviderAdapter;
use super::types::{
    GroupResource, LoadBalancerClass, LoadBalancerInfo, MachineImage, MachineTypeInfo,
    ProviderResource, SharedRecord,
};

/// Seed data for an [`InMemoryProvider`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderFixture {
    /// Known machine images.
    #[serde(default)]
    pub images: Vec<MachineImage>,
    /// Known machine types.
    #[serde(default)]
    pub machine_types: Vec<MachineTypeInfo>,
    /// Known load balancers, keyed by name tag.
    #[serde(default)]
    pub load_balancers: Vec<FixtureLoadBalancer>,
    /// Existing compute groups.
    #[serde(default)]
    pub groups: Vec<GroupResource>,
    /// Existing shared resources.
    #[serde(default)]
    pub shared: Vec<SharedRecord>,
}

/// A load balancer entry in a fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureLoadBalancer {
    /// Name tag the balancer is found by.
    pub name_tag: String,
    /// Provider name and kind.
    #[serde(flatten)]
    pub info: LoadBalancerInfo,
}

#[derive(Debug, Default)]
struct Inner {
    fixture: ProviderFixture,
    create_failures: VecDeque<ProviderErrors>,
    next_id: u64,
    creates: usize,
    updates: usize,
    update_log: Vec<ProviderResource>,
}

/// Provider state held in memory.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
}

impl ProviderFixture {
    /// Loads a fixture from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                message: e.to_string(),
                location: e.location().map(|l| format!("line {}, column {}", l.line(), l.column())),
            }
            .into()
        })
    }
}

impl InMemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider seeded with a fixture.
    #[must_use]
    pub fn from_fixture(fixture: ProviderFixture) -> Self {
        Self {
            inner: Mutex::new(Inner {
                fixture,
                ..Inner::default()
            }),
        }
    }

    /// Adds a machine image.
    #[must_use]
    pub fn with_image(self, image: MachineImage) -> Self {
        self.lock().fixture.images.push(image);
        self
    }

    /// Adds a machine type.
    #[must_use]
    pub fn with_machine_type(self, machine_type: MachineTypeInfo) -> Self {
        self.lock().fixture.machine_types.push(machine_type);
        self
    }

    /// Adds a load balancer found under `name_tag`.
    #[must_use]
    pub fn with_load_balancer(
        self,
        name_tag: impl Into<String>,
        name: impl Into<String>,
        class: LoadBalancerClass,
    ) -> Self {
        self.lock().fixture.load_balancers.push(FixtureLoadBalancer {
            name_tag: name_tag.into(),
            info: LoadBalancerInfo {
                name: name.into(),
                class,
            },
        });
        self
    }

    /// Adds an existing compute group.
    #[must_use]
    pub fn with_group(self, group: GroupResource) -> Self {
        self.lock().fixture.groups.push(group);
        self
    }

    /// Adds an existing shared resource.
    #[must_use]
    pub fn with_shared(self, record: SharedRecord) -> Self {
        self.lock().fixture.shared.push(record);
        self
    }

    /// Queues an error returned by the next create call.
    pub fn fail_next_create(&self, error: ProviderErrors) {
        self.lock().create_failures.push_back(error);
    }

    /// Number of successful creates.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.lock().creates
    }

    /// Number of successful updates.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.lock().updates
    }

    /// Update requests received so far.
    #[must_use]
    pub fn updates(&self) -> Vec<ProviderResource> {
        self.lock().update_log.clone()
    }

    /// Returns a stored compute group by name.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<GroupResource> {
        self.lock()
            .fixture
            .groups
            .iter()
            .find(|g| g.name.as_deref() == Some(name))
            .cloned()
    }

    // A poisoned lock only means another test thread panicked; the data is
    // still usable.
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Inner {
    fn allocate_id(&mut self, kind: TaskKind) -> String {
        self.next_id += 1;
        format!("{}-{:06}", kind.as_str().replace('_', "-"), self.next_id)
    }
}

#[async_trait]
impl ProviderAdapter for InMemoryProvider {
    async fn list(&self, kind: TaskKind) -> ProviderResult<Vec<ProviderResource>> {
        let inner = self.lock();
        let resources = if kind.is_shared() {
            inner
                .fixture
                .shared
                .iter()
                .filter(|r| r.kind == kind)
                .cloned()
                .map(ProviderResource::Shared)
                .collect()
        } else {
            inner
                .fixture
                .groups
                .iter()
                .cloned()
                .map(ProviderResource::Group)
                .collect()
        };
        Ok(resources)
    }

    async fn create(&self, resource: &ProviderResource) -> ProviderResult<String> {
        let mut inner = self.lock();
        if let Some(error) = inner.create_failures.pop_front() {
            debug!("Injected create failure: {error}");
            return Err(error);
        }

        let id = inner.allocate_id(resource.kind());
        match resource {
            ProviderResource::Group(group) => {
                let mut stored = group.clone();
                stored.id = Some(id.clone());
                inner.fixture.groups.push(stored);
            }
            ProviderResource::Shared(record) => {
                let mut stored = record.clone();
                stored.id = Some(id.clone());
                inner.fixture.shared.push(stored);
            }
        }
        inner.creates += 1;
        debug!("Created {} {id}", resource.kind());
        Ok(id)
    }

    async fn update(&self, resource: &ProviderResource) -> ProviderResult<()> {
        let mut inner = self.lock();
        let Some(id) = resource.id().map(str::to_string) else {
            return Err(ProviderErrors::coded("INVALID_REQUEST", "update requires an id"));
        };

        let found = match resource {
            ProviderResource::Group(update) => inner
                .fixture
                .groups
                .iter_mut()
                .find(|g| g.id.as_deref() == Some(id.as_str()))
                .map(|stored| stored.apply_update(update))
                .is_some(),
            ProviderResource::Shared(update) => inner
                .fixture
                .shared
                .iter_mut()
                .find(|r| r.kind == update.kind && r.id.as_deref() == Some(id.as_str()))
                .map(|stored| {
                    for (key, value) in &update.attributes {
                        stored.attributes.insert(key.clone(), value.clone());
                    }
                })
                .is_some(),
        };

        if !found {
            return Err(ProviderErrors::coded(
                "NOT_FOUND",
                format!("{} {id} does not exist", resource.kind()),
            ));
        }
        inner.updates += 1;
        inner.update_log.push(resource.clone());
        Ok(())
    }

    async fn resolve_image(&self, name: &str) -> ProviderResult<Option<MachineImage>> {
        Ok(self
            .lock()
            .fixture
            .images
            .iter()
            .find(|i| i.name == name || i.id == name)
            .cloned())
    }

    async fn machine_type(&self, name: &str) -> ProviderResult<Option<MachineTypeInfo>> {
        Ok(self
            .lock()
            .fixture
            .machine_types
            .iter()
            .find(|m| m.name == name)
            .cloned())
    }

    async fn find_load_balancer(
        &self,
        class: LoadBalancerClass,
        name_tag: &str,
    ) -> ProviderResult<Option<LoadBalancerInfo>> {
        Ok(self
            .lock()
            .fixture
            .load_balancers
            .iter()
            .find(|lb| lb.name_tag == name_tag && lb.info.class == class)
            .map(|lb| lb.info.clone()))
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
