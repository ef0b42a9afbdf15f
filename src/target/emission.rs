//! Declarative emission target.
//!
//! Accumulates one resource block per synced task into a JSON document.
//! References to other tasks become deferred tokens such as
//! `${subnet.private-a.id}` because the referenced resource may not exist
//! when the document is written. Every map in the document is a `BTreeMap`,
//! so the same desired state always produces the same bytes.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::config::ConfigHasher;
use crate::error::{OutputError, RenderError, Result};
use crate::provider::{ProviderAdapter, Tag, resolve_load_balancer};
use crate::tasks::{
    AutoScalerOpts, ComputeGroup, IdRegistry, Lifecycle, Reconcilable, SharedResource, TaskKind,
    TaskRef, TaskSet,
};

use super::direct::CAPACITY_UNIT;
use super::layout::derive_layout;
use super::{Change, RenderOutcome};

/// Directory, relative to the document, holding bootstrap payload files.
const DATA_DIR: &str = "data";

/// Integration mode written for autoscaler blocks.
const INTEGRATION_MODE: &str = "pod";

/// A finished declarative document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedDocument {
    /// Document JSON.
    pub content: String,
    /// Payload files, by path relative to the document.
    pub files: BTreeMap<String, String>,
    /// SHA-256 hex digest of `content`.
    pub digest: String,
}

/// Accumulates a declarative document over a pass.
#[derive(Debug)]
pub struct EmissionTarget<'p, P: ProviderAdapter + ?Sized> {
    provider: &'p P,
    tasks: &'p TaskSet,
    resources: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    outputs: BTreeMap<String, BTreeSet<String>>,
    files: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct Document<'a> {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    files: BTreeMap<&'a str, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    output: BTreeMap<&'a str, OutputBlock<'a>>,
    resource: &'a BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

#[derive(Serialize)]
struct OutputBlock<'a> {
    value: &'a BTreeSet<String>,
}

#[derive(Serialize)]
struct GroupBlock {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    desired_capacity: Option<i64>,
    capacity_unit: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    spot_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    orientation: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_to_ondemand: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    utilize_reserved_instances: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    draining_timeout: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_types_ondemand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_types_spot: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    subnet_ids: Vec<String>,
    image_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    security_groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iam_instance_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_monitoring: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ebs_optimized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    health_check_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenancy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    associate_public_ip_address: Option<bool>,
    ebs_block_device: Vec<EbsBlock>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ephemeral_block_device: Vec<EphemeralBlock>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    load_balancers: Vec<LoadBalancerBlock>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<Tag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    integration: Option<IntegrationBlock>,
}

#[derive(Serialize)]
struct EbsBlock {
    device_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iops: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    throughput: Option<i64>,
    delete_on_termination: bool,
}

#[derive(Serialize)]
struct EphemeralBlock {
    device_name: String,
    virtual_name: String,
}

#[derive(Serialize)]
struct LoadBalancerBlock {
    name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    class: Option<&'static str>,
}

#[derive(Serialize)]
struct IntegrationBlock {
    integration_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cluster_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    autoscale_is_enabled: Option<bool>,
    autoscale_is_auto_config: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    autoscale_cooldown: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auto_headroom_percentage: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    autoscale_headroom: Option<crate::tasks::HeadroomOpts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    autoscale_down: Option<crate::tasks::ScaleDownOpts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    autoscale_labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_limits: Option<crate::tasks::ResourceLimitsOpts>,
}

#[derive(Serialize)]
struct SharedBlock<'a> {
    name: &'a str,
    #[serde(flatten)]
    attributes: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
}

impl<'p, P: ProviderAdapter + ?Sized> EmissionTarget<'p, P> {
    /// Creates an empty emission target for the tasks of a pass.
    #[must_use]
    pub const fn new(provider: &'p P, tasks: &'p TaskSet) -> Self {
        Self {
            provider,
            tasks,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    /// Emits the block of a compute group.
    ///
    /// The full desired state is written, never the delta.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference cannot be resolved, the group carries
    /// conflicting role tags, or the launch layout cannot be derived.
    pub async fn render_group(
        &mut self,
        registry: &IdRegistry,
        change: Change<'_, ComputeGroup>,
    ) -> Result<RenderOutcome> {
        let group = change.desired.with_defaults();
        let role = group.role()?;
        let layout = derive_layout(self.provider, &group).await?;

        let subnet_ids = self.references(registry, TaskKind::Subnet, group.subnets.as_deref())?;
        let security_groups =
            self.references(registry, TaskKind::SecurityGroup, group.security_groups.as_deref())?;

        if let Some(role) = &role {
            self.outputs
                .entry(format!("{role}_security_groups"))
                .or_default()
                .extend(security_groups.iter().cloned());
            self.outputs
                .entry(format!("{role}_subnet_ids"))
                .or_default()
                .extend(subnet_ids.iter().cloned());
        }

        let user_data = match group.user_data.as_ref().filter(|u| !u.is_empty()) {
            Some(payload) => {
                let path = format!("{DATA_DIR}/{}_{}_user_data", TaskKind::ComputeGroup, group.name);
                self.files.insert(path.clone(), payload.content.clone());
                Some(format!("${{file(\"{path}\")}}"))
            }
            None => None,
        };

        let load_balancers = match &group.load_balancer {
            Some(name) => self.load_balancer(registry, name).await?,
            None => Vec::new(),
        };

        let root = layout.root_device.ebs.clone().unwrap_or_default();
        let block = GroupBlock {
            name: group.name.clone(),
            description: group.name.clone(),
            region: group.region.clone(),
            product: group.product.clone(),
            min_size: group.min_size,
            max_size: group.max_size,
            desired_capacity: group.min_size,
            capacity_unit: CAPACITY_UNIT,
            spot_percentage: group.spot_percentage,
            orientation: group.normalized_orientation().map(|o| o.as_str()),
            fallback_to_ondemand: group.fallback_to_on_demand,
            utilize_reserved_instances: group.utilize_reserved_instances,
            draining_timeout: group.draining_timeout,
            instance_types_ondemand: group.on_demand_instance_type.clone(),
            instance_types_spot: group.spot_instance_types.clone(),
            subnet_ids,
            image_id: layout.image.id.clone(),
            key_name: group
                .ssh_key
                .as_deref()
                .map(|name| self.reference(registry, &TaskRef::new(TaskKind::SshKey, name)))
                .transpose()?,
            security_groups,
            user_data,
            iam_instance_profile: group
                .instance_profile
                .as_deref()
                .map(|name| self.reference(registry, &TaskRef::new(TaskKind::InstanceProfile, name)))
                .transpose()?,
            enable_monitoring: group.monitoring,
            ebs_optimized: group.root_volume.as_ref().and_then(|r| r.optimization),
            health_check_type: group.health_check_type.clone(),
            tenancy: group.tenancy.clone(),
            associate_public_ip_address: group.associate_public_ip,
            ebs_block_device: vec![EbsBlock {
                device_name: layout.root_device.device_name.clone(),
                volume_type: root.volume_type,
                volume_size: root.volume_size,
                iops: root.iops,
                throughput: root.throughput,
                delete_on_termination: root.delete_on_termination.unwrap_or(true),
            }],
            ephemeral_block_device: layout
                .ephemeral_devices
                .iter()
                .map(|d| EphemeralBlock {
                    device_name: d.device_name.clone(),
                    virtual_name: d.virtual_name.clone().unwrap_or_default(),
                })
                .collect(),
            load_balancers,
            tags: group.tags.as_ref().map(Tag::from_map).unwrap_or_default(),
            integration: group.auto_scaler.as_ref().map(integration),
        };

        self.insert(&group.task_ref(), &block)?;
        debug!("Emitted {}", group.task_ref());

        Ok(RenderOutcome {
            handled: change.delta.map(|delta| delta.changed_fields()).unwrap_or_default(),
            live_id: change.actual.and_then(|a| a.id.clone()),
            mutated: false,
        })
    }

    /// Emits the block of a shared resource.
    ///
    /// # Errors
    ///
    /// Returns an error if a dependency cannot be referenced.
    pub fn render_shared(
        &mut self,
        registry: &IdRegistry,
        change: Change<'_, SharedResource>,
    ) -> Result<RenderOutcome> {
        let desired = change.desired;
        let depends_on = desired
            .depends_on
            .iter()
            .map(|dep| self.reference(registry, dep))
            .collect::<Result<Vec<_>>>()?;
        let block = SharedBlock {
            name: &desired.name,
            attributes: &desired.attributes,
            depends_on,
        };
        self.insert(&desired.task_ref(), &block)?;

        Ok(RenderOutcome {
            handled: change.delta.map(|delta| delta.changed_fields()).unwrap_or_default(),
            live_id: change.actual.and_then(|a| a.id.clone()),
            mutated: false,
        })
    }

    /// Serializes the accumulated document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn finish(self) -> Result<EmittedDocument> {
        let document = Document {
            files: self
                .files
                .iter()
                .map(|(path, content)| (path.as_str(), ConfigHasher::hash_document(content)))
                .collect(),
            output: self
                .outputs
                .iter()
                .map(|(name, value)| (name.as_str(), OutputBlock { value }))
                .collect(),
            resource: &self.resources,
        };

        let content = serde_json::to_string_pretty(&document).map_err(|e| OutputError::serialization(e.to_string()))?;
        let digest = ConfigHasher::hash_document(&content);
        Ok(EmittedDocument {
            content,
            files: self.files,
            digest,
        })
    }

    fn insert<B: Serialize>(&mut self, task: &TaskRef, block: &B) -> Result<()> {
        let value = serde_json::to_value(block).map_err(|e| OutputError::serialization(e.to_string()))?;
        self.resources
            .entry(task.kind.to_string())
            .or_default()
            .insert(task.name.clone(), value);
        Ok(())
    }

    fn references(
        &self,
        registry: &IdRegistry,
        kind: TaskKind,
        names: Option<&[String]>,
    ) -> Result<Vec<String>> {
        names
            .unwrap_or_default()
            .iter()
            .map(|name| self.reference(registry, &TaskRef::new(kind, name)))
            .collect()
    }

    /// Renders a reference to another task.
    ///
    /// Synced tasks are emitted in the same document and are referenced by
    /// token. Anything else must already exist, so its live value is used.
    fn reference(&self, registry: &IdRegistry, target: &TaskRef) -> Result<String> {
        let attribute = target.kind.link_attribute();
        let synced = self
            .tasks
            .get(target)
            .is_some_and(|task| task.lifecycle() == Lifecycle::Sync);

        if synced {
            return Ok(format!("${{{}.{}.{attribute}}}", target.kind, target.name));
        }
        if attribute == "name" {
            return Ok(target.name.clone());
        }
        registry
            .id_of(target)
            .map(str::to_string)
            .ok_or_else(|| {
                RenderError::UnresolvedIdentifier {
                    reference: target.clone(),
                }
                .into()
            })
    }

    async fn load_balancer(&self, registry: &IdRegistry, name: &str) -> Result<Vec<LoadBalancerBlock>> {
        if let Some(found) = resolve_load_balancer(self.provider, name).await? {
            return Ok(vec![LoadBalancerBlock {
                name: found.name,
                class: Some(found.class.as_str()),
            }]);
        }

        let target = TaskRef::new(TaskKind::LoadBalancer, name);
        if self.tasks.get(&target).is_none() {
            warn!("Load balancer {name} not found and not declared; emitting without it");
            return Ok(Vec::new());
        }
        Ok(vec![LoadBalancerBlock {
            name: self.reference(registry, &target)?,
            class: None,
        }])
    }
}

fn integration(opts: &AutoScalerOpts) -> IntegrationBlock {
    let headroom = opts.headroom.as_ref().and_then(crate::tasks::HeadroomOpts::normalized);
    IntegrationBlock {
        integration_mode: INTEGRATION_MODE,
        cluster_identifier: opts.cluster_id.clone(),
        autoscale_is_enabled: opts.enabled,
        autoscale_is_auto_config: opts.auto_config.unwrap_or(headroom.is_none()),
        autoscale_cooldown: opts.cooldown,
        auto_headroom_percentage: opts.auto_headroom_percentage,
        autoscale_headroom: headroom,
        autoscale_down: opts.down.clone(),
        autoscale_labels: opts.labels.clone(),
        resource_limits: opts.resource_limits.clone(),
    }
}
