//! Compute group tasks.
//!
//! A compute group is an autoscaled set of instances. Its references to
//! shared resources (subnets, security groups, instance profile, SSH key,
//! load balancer) are held as task names and resolved to live identifiers
//! at render time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{ConfigError, DiscoveryError, RenderError, Result};
use crate::planner::delta::{
    Diff, FieldSet, changed, changed_map, changed_nested, changed_set, collect, collect_nested,
};
use crate::provider::{
    GroupResource, Integration, LaunchSpecification, ProviderAdapter, ProviderResource, Tag,
    resolve_image, resolve_load_balancer,
};

use super::{BootstrapPayload, IdRegistry, Lifecycle, Reconcilable, TaskKind, TaskRef};

/// Tag prefix marking the cluster role of a group.
pub const ROLE_TAG_PREFIX: &str = "k8s.io/role/";

/// Root volume options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootVolumeOpts {
    /// Volume type (`gp2`, `gp3`, `io1`, ...).
    #[serde(rename = "type", default)]
    pub volume_type: Option<String>,
    /// Size in GB.
    #[serde(default)]
    pub size: Option<i64>,
    /// Provisioned IOPS. Ignored for `gp2`.
    #[serde(default)]
    pub iops: Option<i64>,
    /// Provisioned throughput in MiB/s. Only used by `gp3`.
    #[serde(default)]
    pub throughput: Option<i64>,
    /// Storage-optimized networking.
    #[serde(default)]
    pub optimization: Option<bool>,
}

/// Manual headroom reserved by the autoscaler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadroomOpts {
    /// CPU per unit.
    #[serde(default)]
    pub cpu_per_unit: Option<i32>,
    /// GPU per unit.
    #[serde(default)]
    pub gpu_per_unit: Option<i32>,
    /// Memory per unit.
    #[serde(default)]
    pub mem_per_unit: Option<i32>,
    /// Number of units.
    #[serde(default)]
    pub num_of_units: Option<i32>,
}

/// Autoscaler scale-down policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleDownOpts {
    /// Maximum percentage scaled down at once.
    #[serde(default)]
    pub max_percentage: Option<f64>,
    /// Evaluation periods before scaling down.
    #[serde(default)]
    pub evaluation_periods: Option<i32>,
}

/// Autoscaler resource limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimitsOpts {
    /// Maximum vCPU.
    #[serde(default)]
    pub max_vcpu: Option<i32>,
    /// Maximum memory in GiB.
    #[serde(default)]
    pub max_memory: Option<i32>,
}

/// Autoscaler integration options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoScalerOpts {
    /// Autoscaler enabled.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Headroom computed automatically.
    #[serde(default)]
    pub auto_config: Option<bool>,
    /// Automatic headroom percentage.
    #[serde(default)]
    pub auto_headroom_percentage: Option<i32>,
    /// Cluster the autoscaler manages.
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Cooldown in seconds.
    #[serde(default)]
    pub cooldown: Option<i32>,
    /// Node labels.
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    /// Manual headroom.
    #[serde(default)]
    pub headroom: Option<HeadroomOpts>,
    /// Scale-down policy.
    #[serde(default)]
    pub down: Option<ScaleDownOpts>,
    /// Resource limits.
    #[serde(default)]
    pub resource_limits: Option<ResourceLimitsOpts>,
}

/// Capacity orientation of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Balance cost and availability.
    Balanced,
    /// Prefer the cheapest capacity.
    CostOriented,
    /// Prefer the most available capacity.
    AvailabilityOriented,
    /// Spread evenly across zones.
    EqualAzDistribution,
}

/// An autoscaled compute group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeGroup {
    /// Group name.
    pub name: String,
    /// Lifecycle.
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Live identifier (actual state only).
    #[serde(skip)]
    pub id: Option<String>,
    /// Current target size (actual state only).
    #[serde(skip)]
    pub target_size: Option<i64>,
    /// Region.
    #[serde(default)]
    pub region: Option<String>,
    /// Minimum instance count.
    #[serde(default)]
    pub min_size: Option<i64>,
    /// Maximum instance count.
    #[serde(default)]
    pub max_size: Option<i64>,
    /// Percentage of spot capacity.
    #[serde(default)]
    pub spot_percentage: Option<f64>,
    /// Use reserved capacity first.
    #[serde(default)]
    pub utilize_reserved_instances: Option<bool>,
    /// Fall back to on-demand capacity.
    #[serde(default)]
    pub fallback_to_on_demand: Option<bool>,
    /// Draining timeout in seconds.
    #[serde(default)]
    pub draining_timeout: Option<i64>,
    /// Health check type.
    #[serde(default)]
    pub health_check_type: Option<String>,
    /// Operating system product.
    #[serde(default)]
    pub product: Option<String>,
    /// Capacity orientation, raw as declared.
    #[serde(default)]
    pub orientation: Option<String>,
    /// Resource tags.
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    /// Bootstrap payload.
    #[serde(default)]
    pub user_data: Option<BootstrapPayload>,
    /// Machine image name.
    #[serde(default)]
    pub image: Option<String>,
    /// On-demand machine type.
    #[serde(default)]
    pub on_demand_instance_type: Option<String>,
    /// Spot machine types.
    #[serde(default)]
    pub spot_instance_types: Option<Vec<String>>,
    /// Instance profile task name.
    #[serde(default)]
    pub instance_profile: Option<String>,
    /// Load balancer task name.
    #[serde(default)]
    pub load_balancer: Option<String>,
    /// SSH key task name.
    #[serde(default)]
    pub ssh_key: Option<String>,
    /// Subnet task names.
    #[serde(default)]
    pub subnets: Option<Vec<String>>,
    /// Security group task names.
    #[serde(default)]
    pub security_groups: Option<Vec<String>>,
    /// Detailed monitoring.
    #[serde(default)]
    pub monitoring: Option<bool>,
    /// Associate a public address.
    #[serde(default)]
    pub associate_public_ip: Option<bool>,
    /// Placement tenancy.
    #[serde(default)]
    pub tenancy: Option<String>,
    /// Root volume options.
    #[serde(default)]
    pub root_volume: Option<RootVolumeOpts>,
    /// Autoscaler options.
    #[serde(default)]
    pub auto_scaler: Option<AutoScalerOpts>,
}

impl RootVolumeOpts {
    /// Lowercases the volume type and drops settings it ignores: IOPS on
    /// `gp2`, throughput on anything but `gp3`.
    #[must_use]
    pub fn effective(&self) -> Self {
        let volume_type = self.volume_type.as_deref().map(str::to_lowercase);
        let kind = volume_type.as_deref();
        Self {
            iops: self.iops.filter(|_| kind != Some("gp2")),
            throughput: self.throughput.filter(|_| kind == Some("gp3")),
            optimization: self.optimization,
            size: self.size,
            volume_type,
        }
    }
}

impl Diff for RootVolumeOpts {
    fn diff(&self, actual: &Self) -> Option<Self> {
        let d = self.effective();
        let delta = Self {
            volume_type: changed(d.volume_type.as_ref(), actual.volume_type.as_ref()),
            size: changed(d.size.as_ref(), actual.size.as_ref()),
            iops: changed(d.iops.as_ref(), actual.iops.as_ref()),
            throughput: changed(d.throughput.as_ref(), actual.throughput.as_ref()),
            optimization: changed(d.optimization.as_ref(), actual.optimization.as_ref()),
        };
        (delta != Self::default()).then_some(delta)
    }

    fn collect_fields(&self, prefix: &str, out: &mut FieldSet) {
        collect(self.volume_type.as_ref(), prefix, "type", out);
        collect(self.size.as_ref(), prefix, "size", out);
        collect(self.iops.as_ref(), prefix, "iops", out);
        collect(self.throughput.as_ref(), prefix, "throughput", out);
        collect(self.optimization.as_ref(), prefix, "optimization", out);
    }
}

impl HeadroomOpts {
    /// Treats zero sub-fields as absent; `None` if nothing remains.
    #[must_use]
    pub fn normalized(&self) -> Option<Self> {
        let nonzero = |v: Option<i32>| v.filter(|&n| n != 0);
        let h = Self {
            cpu_per_unit: nonzero(self.cpu_per_unit),
            gpu_per_unit: nonzero(self.gpu_per_unit),
            mem_per_unit: nonzero(self.mem_per_unit),
            num_of_units: nonzero(self.num_of_units),
        };
        (h != Self::default()).then_some(h)
    }
}

impl Diff for HeadroomOpts {
    fn diff(&self, actual: &Self) -> Option<Self> {
        let delta = Self {
            cpu_per_unit: changed(self.cpu_per_unit.as_ref(), actual.cpu_per_unit.as_ref()),
            gpu_per_unit: changed(self.gpu_per_unit.as_ref(), actual.gpu_per_unit.as_ref()),
            mem_per_unit: changed(self.mem_per_unit.as_ref(), actual.mem_per_unit.as_ref()),
            num_of_units: changed(self.num_of_units.as_ref(), actual.num_of_units.as_ref()),
        };
        (delta != Self::default()).then_some(delta)
    }

    fn collect_fields(&self, prefix: &str, out: &mut FieldSet) {
        collect(self.cpu_per_unit.as_ref(), prefix, "cpu_per_unit", out);
        collect(self.gpu_per_unit.as_ref(), prefix, "gpu_per_unit", out);
        collect(self.mem_per_unit.as_ref(), prefix, "mem_per_unit", out);
        collect(self.num_of_units.as_ref(), prefix, "num_of_units", out);
    }
}

impl Diff for ScaleDownOpts {
    fn diff(&self, actual: &Self) -> Option<Self> {
        let delta = Self {
            max_percentage: changed(self.max_percentage.as_ref(), actual.max_percentage.as_ref()),
            evaluation_periods: changed(
                self.evaluation_periods.as_ref(),
                actual.evaluation_periods.as_ref(),
            ),
        };
        (delta != Self::default()).then_some(delta)
    }

    fn collect_fields(&self, prefix: &str, out: &mut FieldSet) {
        collect(self.max_percentage.as_ref(), prefix, "max_percentage", out);
        collect(self.evaluation_periods.as_ref(), prefix, "evaluation_periods", out);
    }
}

impl Diff for ResourceLimitsOpts {
    fn diff(&self, actual: &Self) -> Option<Self> {
        let delta = Self {
            max_vcpu: changed(self.max_vcpu.as_ref(), actual.max_vcpu.as_ref()),
            max_memory: changed(self.max_memory.as_ref(), actual.max_memory.as_ref()),
        };
        (delta != Self::default()).then_some(delta)
    }

    fn collect_fields(&self, prefix: &str, out: &mut FieldSet) {
        collect(self.max_vcpu.as_ref(), prefix, "max_vcpu", out);
        collect(self.max_memory.as_ref(), prefix, "max_memory", out);
    }
}

impl Diff for AutoScalerOpts {
    fn diff(&self, actual: &Self) -> Option<Self> {
        let delta = Self {
            enabled: changed(self.enabled.as_ref(), actual.enabled.as_ref()),
            auto_config: changed(self.auto_config.as_ref(), actual.auto_config.as_ref()),
            auto_headroom_percentage: changed(
                self.auto_headroom_percentage.as_ref(),
                actual.auto_headroom_percentage.as_ref(),
            ),
            cluster_id: changed(self.cluster_id.as_ref(), actual.cluster_id.as_ref()),
            cooldown: changed(self.cooldown.as_ref(), actual.cooldown.as_ref()),
            labels: changed_map(self.labels.as_ref(), actual.labels.as_ref()),
            headroom: changed_nested(self.headroom.as_ref(), actual.headroom.as_ref()),
            down: changed_nested(self.down.as_ref(), actual.down.as_ref()),
            resource_limits: changed_nested(
                self.resource_limits.as_ref(),
                actual.resource_limits.as_ref(),
            ),
        };
        (delta != Self::default()).then_some(delta)
    }

    fn collect_fields(&self, prefix: &str, out: &mut FieldSet) {
        collect(self.enabled.as_ref(), prefix, "enabled", out);
        collect(self.auto_config.as_ref(), prefix, "auto_config", out);
        collect(
            self.auto_headroom_percentage.as_ref(),
            prefix,
            "auto_headroom_percentage",
            out,
        );
        collect(self.cluster_id.as_ref(), prefix, "cluster_id", out);
        collect(self.cooldown.as_ref(), prefix, "cooldown", out);
        collect(self.labels.as_ref(), prefix, "labels", out);
        collect_nested(self.headroom.as_ref(), prefix, "headroom", out);
        collect_nested(self.down.as_ref(), prefix, "down", out);
        collect_nested(self.resource_limits.as_ref(), prefix, "resource_limits", out);
    }
}

impl Orientation {
    /// Normalizes a declared orientation. Unknown values map to balanced.
    #[must_use]
    pub fn normalize(value: &str) -> Self {
        match value {
            "cost" | "costOriented" => Self::CostOriented,
            "availability" | "availabilityOriented" => Self::AvailabilityOriented,
            "equal-distribution" | "equalAzDistribution" => Self::EqualAzDistribution,
            _ => Self::Balanced,
        }
    }

    /// Provider spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::CostOriented => "costOriented",
            Self::AvailabilityOriented => "availabilityOriented",
            Self::EqualAzDistribution => "equalAzDistribution",
        }
    }

    /// Returns true if `value` is one of the recognized spellings.
    #[must_use]
    pub fn is_known(value: &str) -> bool {
        value == "balanced" || Self::normalize(value) != Self::Balanced
    }
}

impl ComputeGroup {
    /// Creates a group with only a name set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns a copy with provider defaults filled in for unset fields.
    #[must_use]
    pub fn with_defaults(&self) -> Self {
        let mut group = self.clone();
        group.fallback_to_on_demand.get_or_insert(true);
        group.utilize_reserved_instances.get_or_insert(true);
        group.product.get_or_insert_with(|| String::from("Linux/UNIX"));
        group.orientation.get_or_insert_with(|| String::from("balanced"));
        group.monitoring.get_or_insert(false);
        group.health_check_type.get_or_insert_with(|| String::from("K8S_NODE"));
        group
    }

    /// Normalized orientation, if declared.
    #[must_use]
    pub fn normalized_orientation(&self) -> Option<Orientation> {
        self.orientation.as_deref().map(Orientation::normalize)
    }

    /// Tasks this group references, in a stable order without duplicates.
    #[must_use]
    pub fn dependencies(&self) -> Vec<TaskRef> {
        let mut deps = Vec::new();
        let mut push = |dep: TaskRef| {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        };
        for name in self.subnets.iter().flatten() {
            push(TaskRef::new(TaskKind::Subnet, name));
        }
        for name in self.security_groups.iter().flatten() {
            push(TaskRef::new(TaskKind::SecurityGroup, name));
        }
        if let Some(name) = &self.instance_profile {
            push(TaskRef::new(TaskKind::InstanceProfile, name));
        }
        if let Some(name) = &self.ssh_key {
            push(TaskRef::new(TaskKind::SshKey, name));
        }
        if let Some(name) = &self.load_balancer {
            push(TaskRef::new(TaskKind::LoadBalancer, name));
        }
        for reference in self.user_data.iter().flat_map(|u| u.references.iter()) {
            push(reference.clone());
        }
        deps
    }

    /// Cluster role derived from tags carrying [`ROLE_TAG_PREFIX`].
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MultipleRoleTags`] if two different roles are
    /// tagged.
    pub fn role(&self) -> Result<Option<String>> {
        let mut role: Option<&str> = None;
        for key in self.tags.iter().flat_map(BTreeMap::keys) {
            let Some(found) = key.strip_prefix(ROLE_TAG_PREFIX) else {
                continue;
            };
            match role {
                Some(existing) if existing != found => {
                    return Err(RenderError::MultipleRoleTags {
                        first: existing.to_string(),
                        second: found.to_string(),
                    }
                    .into());
                }
                _ => role = Some(found),
            }
        }
        Ok(role.map(str::to_string))
    }

    /// Builds the actual state of a group from its provider representation.
    ///
    /// Subnet and security group identifiers known to `registry` are
    /// reported as task names.
    #[must_use]
    pub fn from_resource(resource: &GroupResource, registry: &IdRegistry) -> Self {
        let capacity = resource.capacity.clone().unwrap_or_default();
        let strategy = resource.strategy.clone().unwrap_or_default();
        let compute = resource.compute.clone().unwrap_or_default();
        let instance_types = compute.instance_types.clone().unwrap_or_default();

        let mut group = Self {
            name: resource.name.clone().unwrap_or_default(),
            id: resource.id.clone(),
            region: resource.region.clone(),
            min_size: capacity.minimum,
            max_size: capacity.maximum,
            target_size: capacity.target,
            spot_percentage: strategy.risk,
            orientation: strategy.availability_vs_cost,
            fallback_to_on_demand: strategy.fallback_to_on_demand,
            utilize_reserved_instances: strategy.utilize_reserved_instances,
            draining_timeout: strategy.draining_timeout,
            product: compute.product,
            on_demand_instance_type: instance_types.on_demand,
            spot_instance_types: instance_types.spot,
            subnets: compute
                .subnet_ids
                .map(|ids| registry.names_for_ids(TaskKind::Subnet, &ids)),
            ..Self::default()
        };

        if let Some(spec) = &compute.launch_specification {
            group.apply_launch_specification(spec, registry);
        }
        if let Some(integration) = &resource.integration {
            group.auto_scaler = Some(auto_scaler_from(integration));
        }
        group
    }

    fn apply_launch_specification(&mut self, spec: &LaunchSpecification, registry: &IdRegistry) {
        self.image.clone_from(&spec.image_id);
        self.ssh_key.clone_from(&spec.key_pair);
        self.instance_profile.clone_from(&spec.iam_instance_profile);
        self.monitoring = spec.monitoring;
        self.tenancy.clone_from(&spec.tenancy);
        self.health_check_type.clone_from(&spec.health_check_type);
        self.security_groups = spec
            .security_group_ids
            .as_ref()
            .map(|ids| registry.names_for_ids(TaskKind::SecurityGroup, ids));

        if let Some(encoded) = spec.user_data.as_deref().filter(|d| !d.is_empty()) {
            match BootstrapPayload::decode(encoded) {
                Ok(payload) => self.user_data = Some(payload),
                Err(e) => warn!("Ignoring unreadable user data on group {}: {e}", self.name),
            }
        }

        self.associate_public_ip = Some(
            spec.network_interfaces
                .iter()
                .flatten()
                .any(|iface| iface.associate_public_ip_address == Some(true)),
        );

        let root = spec
            .block_device_mappings
            .iter()
            .flatten()
            .filter_map(|m| m.ebs.as_ref())
            .find(|ebs| ebs.snapshot_id.is_none());
        if root.is_some() || spec.ebs_optimized.is_some() {
            let ebs = root.cloned().unwrap_or_default();
            self.root_volume = Some(RootVolumeOpts {
                volume_type: ebs.volume_type.map(|t| t.to_lowercase()),
                size: ebs.volume_size,
                iops: ebs.iops,
                throughput: ebs.throughput,
                optimization: spec.ebs_optimized,
            });
        }

        self.load_balancer = spec
            .load_balancers
            .iter()
            .flatten()
            .next()
            .map(|lb| lb.name.clone());

        self.tags = spec
            .tags
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(Tag::to_map);
    }

    /// Discovers the live counterpart of this group by name.
    ///
    /// Provider-side spellings are normalized to the desired representation
    /// when they denote the same thing, so an unchanged group yields an empty
    /// delta.
    ///
    /// # Errors
    ///
    /// Returns an error if more than one group matches, or if the provider
    /// call fails.
    pub async fn find<P: ProviderAdapter + ?Sized>(
        &self,
        provider: &P,
        registry: &IdRegistry,
    ) -> Result<Option<Self>> {
        let matches: Vec<GroupResource> = provider
            .list(TaskKind::ComputeGroup)
            .await?
            .into_iter()
            .filter_map(|r| match r {
                ProviderResource::Group(g) if g.name.as_deref() == Some(self.name.as_str()) => {
                    Some(g)
                }
                _ => None,
            })
            .collect();

        let resource = match matches.as_slice() {
            [] => return Ok(None),
            [one] => one,
            _ => {
                return Err(DiscoveryError::AmbiguousMatch {
                    task: self.task_ref(),
                    count: matches.len(),
                }
                .into());
            }
        };

        let mut actual = Self::from_resource(resource, registry);
        actual.lifecycle = self.lifecycle;

        if let (Some(desired), Some(live)) = (&self.subnets, &actual.subnets)
            && changed_set(Some(desired), Some(live)).is_none()
        {
            actual.subnets = Some(desired.clone());
        }

        if let (Some(desired), Some(live)) = (&self.image, &actual.image)
            && desired != live
        {
            let image = resolve_image(provider, desired).await?;
            if &image.id == live {
                actual.image = Some(desired.clone());
            }
        }

        if let (Some(desired), Some(live)) = (&self.load_balancer, &actual.load_balancer)
            && desired != live
            && let Some(found) = resolve_load_balancer(provider, desired).await?
            && &found.name == live
        {
            actual.load_balancer = Some(desired.clone());
        }

        debug!("Found compute group {} ({:?})", self.name, actual.id);
        Ok(Some(actual))
    }
}

fn auto_scaler_from(integration: &Integration) -> AutoScalerOpts {
    let mut opts = AutoScalerOpts {
        cluster_id: integration.cluster_identifier.clone(),
        ..AutoScalerOpts::default()
    };
    if let Some(auto) = &integration.auto_scale {
        opts.enabled = auto.is_enabled;
        opts.auto_config = auto.is_auto_config;
        opts.auto_headroom_percentage = auto.auto_headroom_percentage;
        opts.cooldown = auto.cooldown;
        opts.headroom = auto.headroom.as_ref().and_then(|h| {
            HeadroomOpts {
                cpu_per_unit: h.cpu_per_unit,
                gpu_per_unit: h.gpu_per_unit,
                mem_per_unit: h.memory_per_unit,
                num_of_units: h.num_of_units,
            }
            .normalized()
        });
        opts.down = auto.down.as_ref().map(|d| ScaleDownOpts {
            max_percentage: d.max_scale_down_percentage,
            evaluation_periods: d.evaluation_periods,
        });
        opts.labels = auto
            .labels
            .as_deref()
            .filter(|l| !l.is_empty())
            .map(Tag::to_map);
        opts.resource_limits = auto.resource_limits.as_ref().map(|r| ResourceLimitsOpts {
            max_vcpu: r.max_vcpu,
            max_memory: r.max_memory_gib,
        });
    }
    opts
}

impl Reconcilable for ComputeGroup {
    fn task_ref(&self) -> TaskRef {
        TaskRef::new(TaskKind::ComputeGroup, &self.name)
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn live_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn check_required(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::validation("Group name cannot be empty", "name").into());
        }
        let (Some(min), Some(max)) = (self.min_size, self.max_size) else {
            let field = if self.min_size.is_none() { "min_size" } else { "max_size" };
            return Err(ConfigError::RequiredField {
                task: self.task_ref(),
                field: field.to_string(),
            }
            .into());
        };
        if min > max {
            return Err(ConfigError::validation(
                format!("min_size ({min}) exceeds max_size ({max}) on group {}", self.name),
                "min_size",
            )
            .into());
        }
        Ok(())
    }

    fn delta(&self, actual: &Self) -> Self {
        let orientation = self.orientation.as_ref().filter(|o| {
            actual.orientation.as_deref() != Some(Orientation::normalize(o).as_str())
        });

        Self {
            name: self.name.clone(),
            lifecycle: self.lifecycle,
            id: None,
            target_size: None,
            region: changed(self.region.as_ref(), actual.region.as_ref()),
            min_size: changed(self.min_size.as_ref(), actual.min_size.as_ref()),
            max_size: changed(self.max_size.as_ref(), actual.max_size.as_ref()),
            spot_percentage: changed(self.spot_percentage.as_ref(), actual.spot_percentage.as_ref()),
            utilize_reserved_instances: changed(
                self.utilize_reserved_instances.as_ref(),
                actual.utilize_reserved_instances.as_ref(),
            ),
            fallback_to_on_demand: changed(
                self.fallback_to_on_demand.as_ref(),
                actual.fallback_to_on_demand.as_ref(),
            ),
            draining_timeout: changed(self.draining_timeout.as_ref(), actual.draining_timeout.as_ref()),
            health_check_type: changed(
                self.health_check_type.as_ref(),
                actual.health_check_type.as_ref(),
            ),
            product: changed(self.product.as_ref(), actual.product.as_ref()),
            orientation: orientation.cloned(),
            tags: changed_map(self.tags.as_ref(), actual.tags.as_ref()),
            // An empty payload and no payload are the same thing.
            user_data: changed(
                self.user_data
                    .as_ref()
                    .filter(|u| !u.is_empty() || actual.user_data.is_some()),
                actual.user_data.as_ref(),
            ),
            image: changed(self.image.as_ref(), actual.image.as_ref()),
            on_demand_instance_type: changed(
                self.on_demand_instance_type.as_ref(),
                actual.on_demand_instance_type.as_ref(),
            ),
            spot_instance_types: changed(
                self.spot_instance_types.as_ref(),
                actual.spot_instance_types.as_ref(),
            ),
            instance_profile: changed(self.instance_profile.as_ref(), actual.instance_profile.as_ref()),
            load_balancer: changed(self.load_balancer.as_ref(), actual.load_balancer.as_ref()),
            ssh_key: changed(self.ssh_key.as_ref(), actual.ssh_key.as_ref()),
            subnets: changed_set(self.subnets.as_ref(), actual.subnets.as_ref()),
            security_groups: changed_set(self.security_groups.as_ref(), actual.security_groups.as_ref()),
            monitoring: changed(self.monitoring.as_ref(), actual.monitoring.as_ref()),
            associate_public_ip: changed(
                self.associate_public_ip.as_ref(),
                actual.associate_public_ip.as_ref(),
            ),
            tenancy: changed(self.tenancy.as_ref(), actual.tenancy.as_ref()),
            root_volume: changed_nested(self.root_volume.as_ref(), actual.root_volume.as_ref()),
            auto_scaler: changed_nested(self.auto_scaler.as_ref(), actual.auto_scaler.as_ref()),
        }
    }

    fn changed_fields(&self) -> FieldSet {
        let mut out = FieldSet::new();
        collect(self.region.as_ref(), "", "region", &mut out);
        collect(self.min_size.as_ref(), "", "min_size", &mut out);
        collect(self.max_size.as_ref(), "", "max_size", &mut out);
        collect(self.spot_percentage.as_ref(), "", "spot_percentage", &mut out);
        collect(
            self.utilize_reserved_instances.as_ref(),
            "",
            "utilize_reserved_instances",
            &mut out,
        );
        collect(self.fallback_to_on_demand.as_ref(), "", "fallback_to_on_demand", &mut out);
        collect(self.draining_timeout.as_ref(), "", "draining_timeout", &mut out);
        collect(self.health_check_type.as_ref(), "", "health_check_type", &mut out);
        collect(self.product.as_ref(), "", "product", &mut out);
        collect(self.orientation.as_ref(), "", "orientation", &mut out);
        collect(self.tags.as_ref(), "", "tags", &mut out);
        collect(self.user_data.as_ref(), "", "user_data", &mut out);
        collect(self.image.as_ref(), "", "image", &mut out);
        collect(
            self.on_demand_instance_type.as_ref(),
            "",
            "on_demand_instance_type",
            &mut out,
        );
        collect(self.spot_instance_types.as_ref(), "", "spot_instance_types", &mut out);
        collect(self.instance_profile.as_ref(), "", "instance_profile", &mut out);
        collect(self.load_balancer.as_ref(), "", "load_balancer", &mut out);
        collect(self.ssh_key.as_ref(), "", "ssh_key", &mut out);
        collect(self.subnets.as_ref(), "", "subnets", &mut out);
        collect(self.security_groups.as_ref(), "", "security_groups", &mut out);
        collect(self.monitoring.as_ref(), "", "monitoring", &mut out);
        collect(self.associate_public_ip.as_ref(), "", "associate_public_ip", &mut out);
        collect(self.tenancy.as_ref(), "", "tenancy", &mut out);
        collect_nested(self.root_volume.as_ref(), "", "root_volume", &mut out);
        collect_nested(self.auto_scaler.as_ref(), "", "auto_scaler", &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        BlockDeviceMapping, Capacity, Compute, EbsVolume, InMemoryProvider, LoadBalancerAttachment,
        LoadBalancerClass, MachineImage,
    };

    fn sized(min: i64, max: i64) -> ComputeGroup {
        ComputeGroup {
            min_size: Some(min),
            max_size: Some(max),
            ..ComputeGroup::new("nodes")
        }
    }

    #[test]
    fn test_single_field_delta_is_minimal() {
        let desired = ComputeGroup {
            image: Some(String::from("base-image")),
            ..sized(2, 5)
        };
        let actual = ComputeGroup {
            image: Some(String::from("base-image")),
            target_size: Some(4),
            ..sized(2, 4)
        };

        let delta = desired.delta(&actual);
        let fields: Vec<_> = delta.changed_fields().into_iter().collect();
        assert_eq!(fields, vec![String::from("max_size")]);
        assert_eq!(delta.max_size, Some(5));
    }

    #[test]
    fn test_unset_desired_fields_are_not_changes() {
        let desired = ComputeGroup::new("nodes");
        let actual = ComputeGroup {
            tenancy: Some(String::from("dedicated")),
            ..sized(1, 3)
        };
        assert!(desired.delta(&actual).changed_fields().is_empty());
    }

    #[test]
    fn test_orientation_alias_matches_provider_spelling() {
        let desired = ComputeGroup {
            orientation: Some(String::from("cost")),
            ..ComputeGroup::new("nodes")
        };
        let actual = ComputeGroup {
            orientation: Some(String::from("costOriented")),
            ..ComputeGroup::new("nodes")
        };
        assert!(desired.delta(&actual).changed_fields().is_empty());
        assert_eq!(Orientation::normalize("sideways"), Orientation::Balanced);
        assert!(!Orientation::is_known("sideways"));
        assert!(Orientation::is_known("equal-distribution"));
    }

    #[test]
    fn test_gp2_iops_is_not_a_change() {
        let desired = ComputeGroup {
            root_volume: Some(RootVolumeOpts {
                volume_type: Some(String::from("gp2")),
                size: Some(64),
                iops: Some(3000),
                throughput: Some(125),
                optimization: None,
            }),
            ..ComputeGroup::new("nodes")
        };
        let actual = ComputeGroup {
            root_volume: Some(RootVolumeOpts {
                volume_type: Some(String::from("gp2")),
                size: Some(64),
                ..RootVolumeOpts::default()
            }),
            ..ComputeGroup::new("nodes")
        };
        assert!(desired.delta(&actual).changed_fields().is_empty());
    }

    #[test]
    fn test_volume_type_case_is_not_a_change() {
        let desired = ComputeGroup {
            root_volume: Some(RootVolumeOpts {
                volume_type: Some(String::from("GP3")),
                throughput: Some(250),
                ..RootVolumeOpts::default()
            }),
            ..ComputeGroup::new("nodes")
        };
        let actual = ComputeGroup {
            root_volume: Some(RootVolumeOpts {
                volume_type: Some(String::from("gp3")),
                throughput: Some(250),
                ..RootVolumeOpts::default()
            }),
            ..ComputeGroup::new("nodes")
        };
        assert!(desired.delta(&actual).changed_fields().is_empty());

        let effective = desired.root_volume.unwrap().effective();
        assert_eq!(effective.volume_type.as_deref(), Some("gp3"));
        assert_eq!(effective.throughput, Some(250));
    }

    #[test]
    fn test_empty_user_data_matches_absent_payload() {
        let desired = ComputeGroup {
            user_data: Some(BootstrapPayload::new("")),
            ..ComputeGroup::new("nodes")
        };
        let actual = ComputeGroup::new("nodes");
        assert!(desired.delta(&actual).changed_fields().is_empty());

        // Clearing a live payload is still a change.
        let live = ComputeGroup {
            user_data: Some(BootstrapPayload::new("#!/bin/sh")),
            ..ComputeGroup::new("nodes")
        };
        let delta = desired.delta(&live);
        assert_eq!(delta.user_data, Some(BootstrapPayload::new("")));
    }

    #[test]
    fn test_nested_delta_reports_leaf_paths() {
        let desired = ComputeGroup {
            auto_scaler: Some(AutoScalerOpts {
                enabled: Some(true),
                headroom: Some(HeadroomOpts {
                    cpu_per_unit: Some(200),
                    ..HeadroomOpts::default()
                }),
                ..AutoScalerOpts::default()
            }),
            ..ComputeGroup::new("nodes")
        };
        let actual = ComputeGroup {
            auto_scaler: Some(AutoScalerOpts {
                enabled: Some(true),
                ..AutoScalerOpts::default()
            }),
            ..ComputeGroup::new("nodes")
        };
        let fields: Vec<_> = desired.delta(&actual).changed_fields().into_iter().collect();
        assert_eq!(fields, vec![String::from("auto_scaler.headroom.cpu_per_unit")]);
    }

    #[test]
    fn test_required_fields() {
        assert!(sized(2, 5).check_required().is_ok());
        let err = ComputeGroup::new("nodes").check_required().unwrap_err();
        assert!(err.to_string().contains("min_size"));
        assert!(sized(5, 2).check_required().is_err());
    }

    #[test]
    fn test_dependencies_include_payload_references() {
        let group = ComputeGroup {
            subnets: Some(vec![String::from("a"), String::from("a")]),
            ssh_key: Some(String::from("admin")),
            user_data: Some(
                BootstrapPayload::new("#!/bin/sh")
                    .with_reference(TaskRef::new(TaskKind::InstanceProfile, "nodes")),
            ),
            ..ComputeGroup::new("nodes")
        };
        assert_eq!(
            group.dependencies(),
            vec![
                TaskRef::new(TaskKind::Subnet, "a"),
                TaskRef::new(TaskKind::SshKey, "admin"),
                TaskRef::new(TaskKind::InstanceProfile, "nodes"),
            ]
        );
    }

    #[test]
    fn test_role_from_tags() {
        let mut tags = BTreeMap::new();
        tags.insert(format!("{ROLE_TAG_PREFIX}node"), String::from("1"));
        tags.insert(String::from("team"), String::from("infra"));
        let mut group = ComputeGroup {
            tags: Some(tags),
            ..ComputeGroup::new("nodes")
        };
        assert_eq!(group.role().unwrap().as_deref(), Some("node"));

        if let Some(tags) = group.tags.as_mut() {
            tags.insert(format!("{ROLE_TAG_PREFIX}master"), String::from("1"));
        }
        let err = group.role().unwrap_err();
        assert!(err.to_string().contains("multiple role tags"));
    }

    #[test]
    fn test_with_defaults_keeps_declared_values() {
        let group = ComputeGroup {
            product: Some(String::from("Windows")),
            ..ComputeGroup::new("nodes")
        }
        .with_defaults();
        assert_eq!(group.product.as_deref(), Some("Windows"));
        assert_eq!(group.fallback_to_on_demand, Some(true));
        assert_eq!(group.orientation.as_deref(), Some("balanced"));
        assert_eq!(group.health_check_type.as_deref(), Some("K8S_NODE"));
    }

    #[tokio::test]
    async fn test_find_normalizes_provider_spellings() {
        let resource = GroupResource {
            id: Some(String::from("cg-1")),
            name: Some(String::from("nodes")),
            capacity: Some(Capacity {
                minimum: Some(2),
                maximum: Some(4),
                target: Some(4),
                unit: None,
            }),
            compute: Some(Compute {
                subnet_ids: Some(vec![String::from("sub-2"), String::from("sub-1")]),
                launch_specification: Some(LaunchSpecification {
                    image_id: Some(String::from("img-123")),
                    load_balancers: Some(vec![LoadBalancerAttachment {
                        name: String::from("api-elb"),
                        class: LoadBalancerClass::Classic,
                    }]),
                    block_device_mappings: Some(vec![BlockDeviceMapping {
                        device_name: String::from("/dev/xvda"),
                        virtual_name: None,
                        ebs: Some(EbsVolume {
                            volume_type: Some(String::from("GP3")),
                            volume_size: Some(64),
                            ..EbsVolume::default()
                        }),
                    }]),
                    ..LaunchSpecification::default()
                }),
                ..Compute::default()
            }),
            ..GroupResource::default()
        };
        let provider = InMemoryProvider::new()
            .with_group(resource)
            .with_image(MachineImage {
                id: String::from("img-123"),
                name: String::from("base-image"),
                root_device_name: String::from("/dev/xvda"),
            })
            .with_load_balancer("api", "api-elb", LoadBalancerClass::Classic);

        let mut registry = IdRegistry::new();
        registry.register(TaskRef::new(TaskKind::Subnet, "a"), "sub-1");
        registry.register(TaskRef::new(TaskKind::Subnet, "b"), "sub-2");

        let desired = ComputeGroup {
            lifecycle: Lifecycle::WarnIfChanged,
            image: Some(String::from("base-image")),
            load_balancer: Some(String::from("api")),
            subnets: Some(vec![String::from("a"), String::from("b")]),
            ..sized(2, 4)
        };

        let actual = desired.find(&provider, &registry).await.unwrap().unwrap();
        assert_eq!(actual.id.as_deref(), Some("cg-1"));
        assert_eq!(actual.target_size, Some(4));
        assert_eq!(actual.image.as_deref(), Some("base-image"));
        assert_eq!(actual.load_balancer.as_deref(), Some("api"));
        assert_eq!(actual.subnets, desired.subnets);
        assert_eq!(actual.lifecycle, Lifecycle::WarnIfChanged);
        assert_eq!(
            actual.root_volume.as_ref().and_then(|r| r.volume_type.as_deref()),
            Some("gp3")
        );
        assert!(desired.delta(&actual).changed_fields().is_empty());
    }

    #[tokio::test]
    async fn test_find_rejects_ambiguous_matches() {
        let named = GroupResource {
            name: Some(String::from("nodes")),
            ..GroupResource::default()
        };
        let provider = InMemoryProvider::new()
            .with_group(named.clone())
            .with_group(named);

        let err = ComputeGroup::new("nodes")
            .find(&provider, &IdRegistry::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 live resources match compute_group/nodes"));
    }
}
