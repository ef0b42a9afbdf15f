//! Provider control-plane types and data structures.
//!
//! Group resources mirror the provider's nested layout. Every field is
//! optional: create requests carry the full set, update requests carry only
//! the fields that changed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::tasks::TaskKind;

/// A live resource as seen by, or sent to, the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resource", rename_all = "snake_case")]
pub enum ProviderResource {
    /// A compute group.
    Group(GroupResource),
    /// Any shared resource kind.
    Shared(SharedRecord),
}

/// A shared resource record (subnet, security group, key, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedRecord {
    /// Resource kind.
    pub kind: TaskKind,
    /// Live identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Resource name.
    pub name: String,
    /// Free-form attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// An autoscaled compute group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResource {
    /// Live identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Group name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Group description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Capacity bounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Capacity>,
    /// Purchasing strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    /// Compute layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute: Option<Compute>,
    /// Autoscaler integration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<Integration>,
}

/// Capacity bounds of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    /// Minimum instance count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    /// Maximum instance count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    /// Current target instance count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<i64>,
    /// Unit the counts are expressed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Purchasing strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    /// Percentage of spot capacity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<f64>,
    /// Availability versus cost orientation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_vs_cost: Option<String>,
    /// Fall back to on-demand when spot is unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_to_on_demand: Option<bool>,
    /// Use reserved capacity first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utilize_reserved_instances: Option<bool>,
    /// Draining timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draining_timeout: Option<i64>,
}

/// Compute layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compute {
    /// Operating system product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Instance types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_types: Option<InstanceTypes>,
    /// Subnet identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_ids: Option<Vec<String>>,
    /// Launch specification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_specification: Option<LaunchSpecification>,
}

/// Instance types of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTypes {
    /// On-demand instance type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand: Option<String>,
    /// Spot instance types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot: Option<Vec<String>>,
}

/// Per-instance launch specification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSpecification {
    /// Machine image identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    /// SSH key pair name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pair: Option<String>,
    /// Security group identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_ids: Option<Vec<String>>,
    /// Base64-encoded user data. An empty string clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    /// Instance profile name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<String>,
    /// Detailed monitoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<bool>,
    /// Placement tenancy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenancy: Option<String>,
    /// Health check type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_type: Option<String>,
    /// Storage-optimized networking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs_optimized: Option<bool>,
    /// Block device mappings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_device_mappings: Option<Vec<BlockDeviceMapping>>,
    /// Network interfaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interfaces: Option<Vec<NetworkInterface>>,
    /// Attached load balancers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancers: Option<Vec<LoadBalancerAttachment>>,
    /// Resource tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

/// A block device mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceMapping {
    /// Device name.
    pub device_name: String,
    /// Virtual name for ephemeral devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_name: Option<String>,
    /// Block storage volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs: Option<EbsVolume>,
}

/// A block storage volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EbsVolume {
    /// Volume type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    /// Size in GB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<i64>,
    /// Provisioned IOPS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<i64>,
    /// Provisioned throughput in MiB/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<i64>,
    /// Delete the volume with the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_on_termination: Option<bool>,
    /// Source snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

/// A network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Interface description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Device index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_index: Option<i32>,
    /// Delete with the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_on_termination: Option<bool>,
    /// Associate a public address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associate_public_ip_address: Option<bool>,
}

/// Provider load balancer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadBalancerClass {
    /// Classic load balancer.
    Classic,
    /// Network load balancer (target group).
    Network,
}

/// A load balancer attached to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerAttachment {
    /// Provider name of the load balancer.
    pub name: String,
    /// Load balancer kind.
    #[serde(rename = "type")]
    pub class: LoadBalancerClass,
}

/// A key/value tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

/// Autoscaler integration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    /// Cluster the autoscaler manages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_identifier: Option<String>,
    /// Integration mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_mode: Option<String>,
    /// Autoscaler settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_scale: Option<AutoScale>,
}

/// Autoscaler settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScale {
    /// Autoscaler enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
    /// Headroom computed automatically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_auto_config: Option<bool>,
    /// Automatic headroom percentage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_headroom_percentage: Option<i32>,
    /// Cooldown in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<i32>,
    /// Manual headroom.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headroom: Option<Headroom>,
    /// Scale-down policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<ScaleDown>,
    /// Node labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<Tag>>,
    /// Resource limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimits>,
    /// Fields to clear explicitly on update.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub null_fields: Vec<String>,
}

/// Manual headroom.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Headroom {
    /// CPU per unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_per_unit: Option<i32>,
    /// GPU per unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_per_unit: Option<i32>,
    /// Memory per unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_per_unit: Option<i32>,
    /// Number of units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_of_units: Option<i32>,
}

/// Scale-down policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleDown {
    /// Maximum percentage scaled down at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scale_down_percentage: Option<f64>,
    /// Evaluation periods before scaling down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_periods: Option<i32>,
}

/// Resource limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    /// Maximum vCPU.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_vcpu: Option<i32>,
    /// Maximum memory in GiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_gib: Option<i32>,
}

/// A resolved machine image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineImage {
    /// Image identifier.
    pub id: String,
    /// Image name.
    pub name: String,
    /// Name of the root device.
    pub root_device_name: String,
}

/// Hardware facts about a machine type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineTypeInfo {
    /// Machine type name.
    pub name: String,
    /// Instance-local devices.
    #[serde(default)]
    pub ephemeral_devices: Vec<EphemeralDevice>,
}

/// An instance-local device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralDevice {
    /// Device name.
    pub device_name: String,
    /// Virtual name.
    pub virtual_name: String,
}

/// A load balancer known to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerInfo {
    /// Provider name.
    pub name: String,
    /// Kind.
    pub class: LoadBalancerClass,
}

impl ProviderResource {
    /// Kind of the resource.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        match self {
            Self::Group(_) => TaskKind::ComputeGroup,
            Self::Shared(record) => record.kind,
        }
    }

    /// Live identifier of the resource.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Group(group) => group.id.as_deref(),
            Self::Shared(record) => record.id.as_deref(),
        }
    }

    /// Name of the resource.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Group(group) => group.name.as_deref(),
            Self::Shared(record) => Some(record.name.as_str()),
        }
    }
}

impl LoadBalancerClass {
    /// Lowercase name used in query strings and documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Network => "network",
        }
    }
}

impl Tag {
    /// Creates a tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Converts a map into a key-ordered tag list.
    #[must_use]
    pub fn from_map(map: &BTreeMap<String, String>) -> Vec<Self> {
        map.iter().map(|(k, v)| Self::new(k, v)).collect()
    }

    /// Converts a tag list into a map.
    #[must_use]
    pub fn to_map(tags: &[Self]) -> BTreeMap<String, String> {
        tags.iter()
            .map(|t| (t.key.clone(), t.value.clone()))
            .collect()
    }
}

/// Overwrites `dst` with `src` when `src` is set.
fn patch<T: Clone>(dst: &mut Option<T>, src: Option<&T>) {
    if let Some(value) = src {
        *dst = Some(value.clone());
    }
}

/// Merges a nested sparse value into `dst`.
fn patch_with<T: Default>(dst: &mut Option<T>, src: Option<&T>, merge: impl FnOnce(&mut T, &T)) {
    if let Some(value) = src {
        merge(dst.get_or_insert_with(T::default), value);
    }
}

impl GroupResource {
    /// Applies a sparse update: every field set in `update` overwrites the
    /// stored value, nested structures are merged recursively.
    pub fn apply_update(&mut self, update: &Self) {
        patch(&mut self.name, update.name.as_ref());
        patch(&mut self.description, update.description.as_ref());
        patch(&mut self.region, update.region.as_ref());
        patch_with(&mut self.capacity, update.capacity.as_ref(), |dst, src| {
            patch(&mut dst.minimum, src.minimum.as_ref());
            patch(&mut dst.maximum, src.maximum.as_ref());
            patch(&mut dst.target, src.target.as_ref());
            patch(&mut dst.unit, src.unit.as_ref());
        });
        patch_with(&mut self.strategy, update.strategy.as_ref(), |dst, src| {
            patch(&mut dst.risk, src.risk.as_ref());
            patch(&mut dst.availability_vs_cost, src.availability_vs_cost.as_ref());
            patch(&mut dst.fallback_to_on_demand, src.fallback_to_on_demand.as_ref());
            patch(
                &mut dst.utilize_reserved_instances,
                src.utilize_reserved_instances.as_ref(),
            );
            patch(&mut dst.draining_timeout, src.draining_timeout.as_ref());
        });
        patch_with(&mut self.compute, update.compute.as_ref(), Compute::apply_update);
        patch_with(
            &mut self.integration,
            update.integration.as_ref(),
            Integration::apply_update,
        );
    }
}

impl Compute {
    fn apply_update(&mut self, src: &Self) {
        patch(&mut self.product, src.product.as_ref());
        patch(&mut self.subnet_ids, src.subnet_ids.as_ref());
        patch_with(&mut self.instance_types, src.instance_types.as_ref(), |dst, src| {
            patch(&mut dst.on_demand, src.on_demand.as_ref());
            patch(&mut dst.spot, src.spot.as_ref());
        });
        patch_with(
            &mut self.launch_specification,
            src.launch_specification.as_ref(),
            LaunchSpecification::apply_update,
        );
    }
}

impl LaunchSpecification {
    fn apply_update(&mut self, src: &Self) {
        patch(&mut self.image_id, src.image_id.as_ref());
        patch(&mut self.key_pair, src.key_pair.as_ref());
        patch(&mut self.security_group_ids, src.security_group_ids.as_ref());
        patch(&mut self.iam_instance_profile, src.iam_instance_profile.as_ref());
        patch(&mut self.monitoring, src.monitoring.as_ref());
        patch(&mut self.tenancy, src.tenancy.as_ref());
        patch(&mut self.health_check_type, src.health_check_type.as_ref());
        patch(&mut self.ebs_optimized, src.ebs_optimized.as_ref());
        patch(&mut self.block_device_mappings, src.block_device_mappings.as_ref());
        patch(&mut self.network_interfaces, src.network_interfaces.as_ref());
        patch(&mut self.load_balancers, src.load_balancers.as_ref());
        patch(&mut self.tags, src.tags.as_ref());
        match src.user_data.as_deref() {
            Some("") => self.user_data = None,
            Some(data) => self.user_data = Some(data.to_string()),
            None => {}
        }
    }
}

impl Integration {
    fn apply_update(&mut self, src: &Self) {
        patch(&mut self.cluster_identifier, src.cluster_identifier.as_ref());
        patch(&mut self.integration_mode, src.integration_mode.as_ref());
        patch_with(&mut self.auto_scale, src.auto_scale.as_ref(), AutoScale::apply_update);
    }
}

impl AutoScale {
    fn apply_update(&mut self, src: &Self) {
        patch(&mut self.is_enabled, src.is_enabled.as_ref());
        patch(&mut self.is_auto_config, src.is_auto_config.as_ref());
        patch(
            &mut self.auto_headroom_percentage,
            src.auto_headroom_percentage.as_ref(),
        );
        patch(&mut self.cooldown, src.cooldown.as_ref());
        patch(&mut self.headroom, src.headroom.as_ref());
        patch(&mut self.down, src.down.as_ref());
        patch(&mut self.labels, src.labels.as_ref());
        patch(&mut self.resource_limits, src.resource_limits.as_ref());
        for field in &src.null_fields {
            match field.as_str() {
                "headroom" => self.headroom = None,
                "down" => self.down = None,
                "labels" => self.labels = None,
                "resourceLimits" => self.resource_limits = None,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_update_keeps_unset_fields() {
        let mut stored = GroupResource {
            name: Some(String::from("nodes")),
            capacity: Some(Capacity {
                minimum: Some(2),
                maximum: Some(4),
                target: Some(4),
                unit: Some(String::from("instance")),
            }),
            ..GroupResource::default()
        };
        let update = GroupResource {
            capacity: Some(Capacity {
                maximum: Some(5),
                ..Capacity::default()
            }),
            ..GroupResource::default()
        };

        stored.apply_update(&update);

        let capacity = stored.capacity.unwrap();
        assert_eq!(capacity.minimum, Some(2));
        assert_eq!(capacity.maximum, Some(5));
        assert_eq!(capacity.target, Some(4));
        assert_eq!(stored.name.as_deref(), Some("nodes"));
    }

    #[test]
    fn test_null_fields_clear_autoscaler_parts() {
        let mut stored = AutoScale {
            headroom: Some(Headroom {
                cpu_per_unit: Some(100),
                ..Headroom::default()
            }),
            labels: Some(vec![Tag::new("a", "b")]),
            ..AutoScale::default()
        };
        let update = AutoScale {
            is_enabled: Some(true),
            null_fields: vec![String::from("headroom")],
            ..AutoScale::default()
        };

        stored.apply_update(&update);

        assert!(stored.headroom.is_none());
        assert!(stored.labels.is_some());
        assert_eq!(stored.is_enabled, Some(true));
    }

    #[test]
    fn test_resource_serializes_camel_case_and_skips_unset() {
        let group = GroupResource {
            compute: Some(Compute {
                subnet_ids: Some(vec![String::from("sub-1")]),
                ..Compute::default()
            }),
            ..GroupResource::default()
        };
        let json = serde_json::to_string(&ProviderResource::Group(group)).unwrap();
        assert_eq!(json, r#"{"resource":"group","compute":{"subnetIds":["sub-1"]}}"#);
    }
}
