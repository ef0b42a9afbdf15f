//! Direct-apply target.
//!
//! Renders tasks as provider calls: a full create when the resource is
//! missing, a sparse update carrying only changed fields otherwise. Every
//! field the update actually carries is reported as handled, so the executor
//! can warn about the ones it does not.

use tracing::{debug, info, warn};

use crate::error::{RenderError, Result};
use crate::planner::FieldSet;
use crate::planner::delta::Diff;
use crate::provider::{
    AutoScale, Capacity, Compute, GroupResource, Headroom, InstanceTypes, Integration,
    LaunchSpecification, LoadBalancerAttachment, NetworkInterface, ProviderAdapter,
    ProviderResource, ResourceLimits, ScaleDown, Strategy, Tag, resolve_image,
    resolve_load_balancer,
};
use crate::tasks::{
    AutoScalerOpts, ComputeGroup, HeadroomOpts, IdRegistry, Orientation, Reconcilable,
    ResourceLimitsOpts, ScaleDownOpts, SharedResource, TaskKind, TaskRef,
};

use super::layout::{LaunchLayout, derive_layout};
use super::retry::RetryPolicy;
use super::{Change, RenderOutcome};

/// Capacity unit reported to the provider.
pub const CAPACITY_UNIT: &str = "instance";

/// Renders changes as provider calls.
#[derive(Debug)]
pub struct DirectApply<'p, P: ProviderAdapter + ?Sized> {
    provider: &'p P,
    retry: RetryPolicy,
}

impl<'p, P: ProviderAdapter + ?Sized> DirectApply<'p, P> {
    /// Creates a direct-apply target.
    #[must_use]
    pub const fn new(provider: &'p P, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// Renders a compute group change.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference cannot be resolved or the provider
    /// rejects the call.
    pub async fn render_group(
        &self,
        registry: &IdRegistry,
        change: Change<'_, ComputeGroup>,
    ) -> Result<RenderOutcome> {
        match (change.actual, change.delta) {
            (Some(actual), Some(delta)) => self.update_group(registry, change.desired, actual, delta).await,
            _ => self.create_group(registry, change.desired).await,
        }
    }

    /// Renders a shared resource change.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the call.
    pub async fn render_shared(
        &self,
        change: Change<'_, SharedResource>,
    ) -> Result<RenderOutcome> {
        let task = change.desired.task_ref();
        match (change.actual, change.delta) {
            (Some(actual), Some(delta)) => {
                let record = ProviderResource::Shared(delta.to_record(actual.id.clone()));
                self.retry
                    .run(&format!("update {task}"), || self.provider.update(&record))
                    .await?;
                info!("Updated {task}");
                Ok(RenderOutcome {
                    handled: delta.changed_fields(),
                    live_id: actual.id.clone(),
                    mutated: true,
                })
            }
            _ => {
                let record = ProviderResource::Shared(change.desired.to_record(None));
                let id = self
                    .retry
                    .run(&format!("create {task}"), || self.provider.create(&record))
                    .await?;
                info!("Created {task} ({id})");
                Ok(RenderOutcome {
                    handled: FieldSet::new(),
                    live_id: Some(id),
                    mutated: true,
                })
            }
        }
    }

    async fn create_group(&self, registry: &IdRegistry, desired: &ComputeGroup) -> Result<RenderOutcome> {
        let group = desired.with_defaults();
        let layout = derive_layout(self.provider, &group).await?;
        let resource = self.build_group(registry, &group, &layout).await?;
        let task = group.task_ref();

        let request = ProviderResource::Group(resource);
        let id = self
            .retry
            .run(&format!("create {task}"), || self.provider.create(&request))
            .await?;
        info!("Created {task} ({id})");

        Ok(RenderOutcome {
            handled: FieldSet::new(),
            live_id: Some(id),
            mutated: true,
        })
    }

    /// Builds the full create request.
    async fn build_group(
        &self,
        registry: &IdRegistry,
        group: &ComputeGroup,
        layout: &LaunchLayout,
    ) -> Result<GroupResource> {
        let load_balancers = match &group.load_balancer {
            Some(name) => {
                let found = self.load_balancer(name).await?;
                if found.is_none() {
                    warn!("Load balancer {name} not found; creating {} without it", group.name);
                }
                found
            }
            None => None,
        };

        let spec = LaunchSpecification {
            image_id: Some(layout.image.id.clone()),
            key_pair: group.ssh_key.clone(),
            security_group_ids: group
                .security_groups
                .as_deref()
                .map(|names| resolve_ids(registry, TaskKind::SecurityGroup, names))
                .transpose()?,
            user_data: group
                .user_data
                .as_ref()
                .filter(|u| !u.is_empty())
                .map(crate::tasks::BootstrapPayload::encoded),
            iam_instance_profile: group.instance_profile.clone(),
            monitoring: group.monitoring,
            tenancy: group.tenancy.clone(),
            health_check_type: group.health_check_type.clone(),
            ebs_optimized: group.root_volume.as_ref().and_then(|r| r.optimization),
            block_device_mappings: Some(layout.block_devices()),
            network_interfaces: group.associate_public_ip.map(network_interfaces),
            load_balancers,
            tags: group.tags.as_ref().map(Tag::from_map),
        };

        Ok(GroupResource {
            id: None,
            name: Some(group.name.clone()),
            description: Some(group.name.clone()),
            region: group.region.clone(),
            capacity: Some(Capacity {
                minimum: group.min_size,
                maximum: group.max_size,
                target: group.min_size,
                unit: Some(CAPACITY_UNIT.to_string()),
            }),
            strategy: Some(Strategy {
                risk: group.spot_percentage,
                availability_vs_cost: group.normalized_orientation().map(|o| o.as_str().to_string()),
                fallback_to_on_demand: group.fallback_to_on_demand,
                utilize_reserved_instances: group.utilize_reserved_instances,
                draining_timeout: group.draining_timeout,
            }),
            compute: Some(Compute {
                product: group.product.clone(),
                instance_types: Some(InstanceTypes {
                    on_demand: group.on_demand_instance_type.clone(),
                    spot: group.spot_instance_types.clone(),
                }),
                subnet_ids: group
                    .subnets
                    .as_deref()
                    .map(|names| resolve_ids(registry, TaskKind::Subnet, names))
                    .transpose()?,
                launch_specification: Some(spec),
            }),
            integration: group.auto_scaler.as_ref().map(|opts| Integration {
                cluster_identifier: opts.cluster_id.clone(),
                integration_mode: None,
                auto_scale: Some(auto_scale(opts)),
            }),
        })
    }

    async fn update_group(
        &self,
        registry: &IdRegistry,
        desired: &ComputeGroup,
        actual: &ComputeGroup,
        delta: &ComputeGroup,
    ) -> Result<RenderOutcome> {
        let mut handled = FieldSet::new();
        let mut mark = |field: &str| {
            handled.insert(field.to_string());
        };

        let mut capacity = Capacity::default();
        let mut strategy = Strategy::default();
        let mut compute = Compute::default();
        let mut types = InstanceTypes::default();
        let mut spec = LaunchSpecification::default();

        let mut update = GroupResource {
            id: actual.id.clone(),
            ..GroupResource::default()
        };

        if let Some(region) = &delta.region {
            update.region = Some(region.clone());
            mark("region");
        }

        if let Some(min) = delta.min_size {
            capacity.minimum = Some(min);
            // Never leave the target below the new minimum.
            if actual.target_size.is_some_and(|target| min > target) {
                capacity.target = Some(min);
            }
            mark("min_size");
        }
        if let Some(max) = delta.max_size {
            capacity.maximum = Some(max);
            mark("max_size");
        }

        if let Some(risk) = delta.spot_percentage {
            strategy.risk = Some(risk);
            mark("spot_percentage");
        }
        if let Some(orientation) = &delta.orientation {
            strategy.availability_vs_cost = Some(Orientation::normalize(orientation).as_str().to_string());
            mark("orientation");
        }
        if let Some(fallback) = delta.fallback_to_on_demand {
            strategy.fallback_to_on_demand = Some(fallback);
            mark("fallback_to_on_demand");
        }
        if let Some(utilize) = delta.utilize_reserved_instances {
            strategy.utilize_reserved_instances = Some(utilize);
            mark("utilize_reserved_instances");
        }
        if let Some(timeout) = delta.draining_timeout {
            strategy.draining_timeout = Some(timeout);
            mark("draining_timeout");
        }

        if let Some(product) = &delta.product {
            compute.product = Some(product.clone());
            mark("product");
        }
        if let Some(on_demand) = &delta.on_demand_instance_type {
            types.on_demand = Some(on_demand.clone());
            mark("on_demand_instance_type");
        }
        if let Some(spot) = &delta.spot_instance_types {
            types.spot = Some(spot.clone());
            mark("spot_instance_types");
        }
        if let Some(subnets) = &delta.subnets {
            compute.subnet_ids = Some(resolve_ids(registry, TaskKind::Subnet, subnets)?);
            mark("subnets");
        }

        if let Some(image) = &delta.image {
            spec.image_id = Some(resolve_image(self.provider, image).await?.id);
            mark("image");
        }
        if let Some(key) = &delta.ssh_key {
            spec.key_pair = Some(key.clone());
            mark("ssh_key");
        }
        if let Some(groups) = &delta.security_groups {
            spec.security_group_ids = Some(resolve_ids(registry, TaskKind::SecurityGroup, groups)?);
            mark("security_groups");
        }
        if let Some(user_data) = &delta.user_data {
            // An empty string clears the payload.
            spec.user_data = Some(if user_data.is_empty() {
                String::new()
            } else {
                user_data.encoded()
            });
            mark("user_data");
        }
        if let Some(profile) = &delta.instance_profile {
            spec.iam_instance_profile = Some(profile.clone());
            mark("instance_profile");
        }
        if let Some(monitoring) = delta.monitoring {
            spec.monitoring = Some(monitoring);
            mark("monitoring");
        }
        if let Some(tenancy) = &delta.tenancy {
            spec.tenancy = Some(tenancy.clone());
            mark("tenancy");
        }
        if let Some(check) = &delta.health_check_type {
            spec.health_check_type = Some(check.clone());
            mark("health_check_type");
        }
        if let Some(public_ip) = delta.associate_public_ip {
            spec.network_interfaces = Some(network_interfaces(public_ip));
            mark("associate_public_ip");
        }
        if let Some(tags) = &delta.tags {
            spec.tags = Some(Tag::from_map(tags));
            mark("tags");
        }
        if let Some(name) = &delta.load_balancer {
            match self.load_balancer(name).await? {
                Some(attachments) => {
                    spec.load_balancers = Some(attachments);
                    mark("load_balancer");
                }
                None => warn!("Load balancer {name} not found; leaving {} attachments as-is", desired.name),
            }
        }

        if let Some(root) = &delta.root_volume {
            let layout_fields = [
                ("type", root.volume_type.is_some()),
                ("size", root.size.is_some()),
                ("iops", root.iops.is_some()),
                ("throughput", root.throughput.is_some()),
            ];
            if layout_fields.iter().any(|(_, changed)| *changed) {
                let layout = derive_layout(self.provider, desired).await?;
                spec.block_device_mappings = Some(layout.block_devices());
                for (field, changed) in layout_fields {
                    if changed {
                        mark(format!("root_volume.{field}").as_str());
                    }
                }
            }
            if let Some(optimization) = root.optimization {
                spec.ebs_optimized = Some(optimization);
                mark("root_volume.optimization");
            }
        }

        if let (Some(changed), Some(opts)) = (&delta.auto_scaler, &desired.auto_scaler) {
            let mut fields = FieldSet::new();
            changed.collect_fields("auto_scaler", &mut fields);
            // The cluster identifier is fixed once the integration exists.
            fields.remove("auto_scaler.cluster_id");
            if !fields.is_empty() {
                update.integration = Some(Integration {
                    auto_scale: Some(auto_scale_update(changed, opts, actual.auto_scaler.as_ref())),
                    ..Integration::default()
                });
                for field in &fields {
                    mark(field.as_str());
                }
            }
        }

        if capacity != Capacity::default() {
            update.capacity = Some(capacity);
        }
        if strategy != Strategy::default() {
            update.strategy = Some(strategy);
        }
        if types != InstanceTypes::default() {
            compute.instance_types = Some(types);
        }
        if spec != LaunchSpecification::default() {
            compute.launch_specification = Some(spec);
        }
        if compute != Compute::default() {
            update.compute = Some(compute);
        }

        let task = desired.task_ref();
        if handled.is_empty() {
            debug!("No renderable changes for {task}");
            return Ok(RenderOutcome {
                handled,
                live_id: actual.id.clone(),
                mutated: false,
            });
        }

        let request = ProviderResource::Group(update);
        self.retry
            .run(&format!("update {task}"), || self.provider.update(&request))
            .await?;
        info!("Updated {task}: {}", handled.iter().cloned().collect::<Vec<_>>().join(", "));

        Ok(RenderOutcome {
            handled,
            live_id: actual.id.clone(),
            mutated: true,
        })
    }

    async fn load_balancer(&self, name: &str) -> Result<Option<Vec<LoadBalancerAttachment>>> {
        Ok(resolve_load_balancer(self.provider, name)
            .await?
            .map(|found| {
                vec![LoadBalancerAttachment {
                    name: found.name,
                    class: found.class,
                }]
            }))
    }
}

/// Resolves task names of `kind` to live identifiers.
fn resolve_ids(registry: &IdRegistry, kind: TaskKind, names: &[String]) -> Result<Vec<String>> {
    names
        .iter()
        .map(|name| {
            let reference = TaskRef::new(kind, name);
            registry
                .id_of(&reference)
                .map(str::to_string)
                .ok_or_else(|| RenderError::UnresolvedIdentifier { reference }.into())
        })
        .collect()
}

/// The single primary interface, deleted with the instance.
fn network_interfaces(associate_public_ip: bool) -> Vec<NetworkInterface> {
    vec![NetworkInterface {
        description: Some(String::from("eth0")),
        device_index: Some(0),
        delete_on_termination: Some(true),
        associate_public_ip_address: Some(associate_public_ip),
    }]
}

/// Builds the autoscaler settings from the full desired options.
fn auto_scale(opts: &AutoScalerOpts) -> AutoScale {
    let headroom = opts.headroom.as_ref().map(headroom);
    AutoScale {
        is_enabled: opts.enabled,
        // Manual headroom turns automatic configuration off.
        is_auto_config: opts.auto_config.or(Some(headroom.is_none())),
        auto_headroom_percentage: opts.auto_headroom_percentage,
        cooldown: opts.cooldown,
        headroom,
        down: opts.down.as_ref().map(scale_down),
        labels: opts.labels.as_ref().map(Tag::from_map),
        resource_limits: opts.resource_limits.as_ref().map(resource_limits),
        null_fields: Vec::new(),
    }
}

/// Builds a sparse autoscaler update.
///
/// Scalars come from `changed`. A nested structure is sent whole, from
/// `desired`, only when one of its own fields changed. Structures the desired
/// state omits but `actual` still carries are cleared explicitly.
fn auto_scale_update(
    changed: &AutoScalerOpts,
    desired: &AutoScalerOpts,
    actual: Option<&AutoScalerOpts>,
) -> AutoScale {
    let removed = |declared: bool, live: fn(&AutoScalerOpts) -> bool| {
        !declared && actual.is_some_and(live)
    };

    let mut update = AutoScale {
        is_enabled: changed.enabled,
        is_auto_config: changed.auto_config,
        auto_headroom_percentage: changed.auto_headroom_percentage,
        cooldown: changed.cooldown,
        ..AutoScale::default()
    };

    if changed.headroom.is_some() {
        update.headroom = desired.headroom.as_ref().map(headroom);
        update.is_auto_config = update.is_auto_config.or(Some(false));
    } else if removed(desired.headroom.is_some(), |a| a.headroom.is_some()) {
        update.null_fields.push(String::from("headroom"));
        update.is_auto_config = update.is_auto_config.or(Some(true));
    }

    if changed.down.is_some() {
        update.down = desired.down.as_ref().map(scale_down);
    } else if removed(desired.down.is_some(), |a| a.down.is_some()) {
        update.null_fields.push(String::from("down"));
    }

    if changed.labels.is_some() {
        update.labels = desired.labels.as_ref().map(Tag::from_map);
    } else if removed(desired.labels.is_some(), |a| a.labels.is_some()) {
        update.null_fields.push(String::from("labels"));
    }

    if changed.resource_limits.is_some() {
        update.resource_limits = desired.resource_limits.as_ref().map(resource_limits);
    } else if removed(desired.resource_limits.is_some(), |a| a.resource_limits.is_some()) {
        update.null_fields.push(String::from("resourceLimits"));
    }

    update
}

fn headroom(h: &HeadroomOpts) -> Headroom {
    Headroom {
        cpu_per_unit: h.cpu_per_unit,
        gpu_per_unit: h.gpu_per_unit,
        memory_per_unit: h.mem_per_unit,
        num_of_units: h.num_of_units,
    }
}

fn scale_down(d: &ScaleDownOpts) -> ScaleDown {
    ScaleDown {
        max_scale_down_percentage: d.max_percentage,
        evaluation_periods: d.evaluation_periods,
    }
}

fn resource_limits(r: &ResourceLimitsOpts) -> ResourceLimits {
    ResourceLimits {
        max_vcpu: r.max_vcpu,
        max_memory_gib: r.max_memory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrors;
    use crate::provider::{InMemoryProvider, MachineImage, MockProviderAdapter};
    use std::time::Duration;

    fn image() -> MachineImage {
        MachineImage {
            id: String::from("img-123"),
            name: String::from("base-image"),
            root_device_name: String::from("/dev/xvda"),
        }
    }

    fn desired() -> ComputeGroup {
        ComputeGroup {
            min_size: Some(2),
            max_size: Some(5),
            image: Some(String::from("base-image")),
            subnets: Some(vec![String::from("a")]),
            ..ComputeGroup::new("nodes")
        }
    }

    fn registry() -> IdRegistry {
        let mut registry = IdRegistry::new();
        registry.register(TaskRef::new(TaskKind::Subnet, "a"), "sub-1");
        registry
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default().with_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_create_sets_target_to_min_and_applies_defaults() {
        let provider = InMemoryProvider::new().with_image(image());
        let target = DirectApply::new(&provider, fast_retry());
        let desired = desired();

        let outcome = target
            .render_group(
                &registry(),
                Change {
                    actual: None,
                    desired: &desired,
                    delta: None,
                },
            )
            .await
            .unwrap();
        assert!(outcome.mutated);
        assert!(outcome.live_id.is_some());

        let stored = provider.group("nodes").unwrap();
        let capacity = stored.capacity.unwrap();
        assert_eq!(capacity.target, Some(2));
        assert_eq!(capacity.unit.as_deref(), Some(CAPACITY_UNIT));
        let strategy = stored.strategy.unwrap();
        assert_eq!(strategy.fallback_to_on_demand, Some(true));
        assert_eq!(strategy.availability_vs_cost.as_deref(), Some("balanced"));
        let compute = stored.compute.unwrap();
        assert_eq!(compute.subnet_ids, Some(vec![String::from("sub-1")]));
        assert_eq!(compute.product.as_deref(), Some("Linux/UNIX"));
    }

    #[tokio::test]
    async fn test_create_without_subnet_id_fails() {
        let provider = InMemoryProvider::new().with_image(image());
        let target = DirectApply::new(&provider, fast_retry());
        let desired = desired();

        let err = target
            .render_group(
                &IdRegistry::new(),
                Change {
                    actual: None,
                    desired: &desired,
                    delta: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No live identifier for subnet/a"));
        assert_eq!(provider.create_count(), 0);
    }

    #[tokio::test]
    async fn test_create_retries_transient_error_exactly_budget_times() {
        let mut provider = MockProviderAdapter::new();
        provider.expect_resolve_image().returning(|_| Ok(Some(image())));
        provider
            .expect_create()
            .times(10)
            .returning(|_| Err(ProviderErrors::single("Invalid IAM Instance Profile name")));

        let target = DirectApply::new(&provider, fast_retry());
        let desired = desired();
        let err = target
            .render_group(
                &registry(),
                Change {
                    actual: None,
                    desired: &desired,
                    delta: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Gave up after 10 attempts"));
    }

    #[tokio::test]
    async fn test_create_fails_fast_on_other_errors() {
        let mut provider = MockProviderAdapter::new();
        provider.expect_resolve_image().returning(|_| Ok(Some(image())));
        provider
            .expect_create()
            .times(1)
            .returning(|_| Err(ProviderErrors::coded("QUOTA", "instance limit reached")));

        let target = DirectApply::new(&provider, fast_retry());
        let desired = desired();
        let err = target
            .render_group(
                &registry(),
                Change {
                    actual: None,
                    desired: &desired,
                    delta: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("instance limit reached"));
    }

    #[tokio::test]
    async fn test_update_raises_target_when_min_exceeds_it() {
        let provider = InMemoryProvider::new().with_group(GroupResource {
            id: Some(String::from("cg-1")),
            name: Some(String::from("nodes")),
            capacity: Some(Capacity {
                minimum: Some(2),
                maximum: Some(4),
                target: Some(4),
                unit: Some(String::from("instance")),
            }),
            ..GroupResource::default()
        });
        let target = DirectApply::new(&provider, fast_retry());

        let desired = ComputeGroup {
            min_size: Some(5),
            max_size: Some(5),
            ..ComputeGroup::new("nodes")
        };
        let actual = ComputeGroup {
            id: Some(String::from("cg-1")),
            min_size: Some(2),
            max_size: Some(4),
            target_size: Some(4),
            ..ComputeGroup::new("nodes")
        };
        let delta = desired.delta(&actual);

        let outcome = target
            .render_group(
                &IdRegistry::new(),
                Change {
                    actual: Some(&actual),
                    desired: &desired,
                    delta: Some(&delta),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.handled, delta.changed_fields());

        let capacity = provider.group("nodes").unwrap().capacity.unwrap();
        assert_eq!(capacity.minimum, Some(5));
        assert_eq!(capacity.maximum, Some(5));
        assert_eq!(capacity.target, Some(5));
    }

    #[tokio::test]
    async fn test_update_leaves_target_when_min_is_below_it() {
        let provider = InMemoryProvider::new().with_group(GroupResource {
            id: Some(String::from("cg-1")),
            name: Some(String::from("nodes")),
            ..GroupResource::default()
        });
        let target = DirectApply::new(&provider, fast_retry());
        let desired = ComputeGroup {
            min_size: Some(2),
            max_size: Some(5),
            ..ComputeGroup::new("nodes")
        };
        let actual = ComputeGroup {
            id: Some(String::from("cg-1")),
            min_size: Some(1),
            max_size: Some(4),
            target_size: Some(4),
            ..ComputeGroup::new("nodes")
        };
        let delta = desired.delta(&actual);

        target
            .render_group(
                &IdRegistry::new(),
                Change {
                    actual: Some(&actual),
                    desired: &desired,
                    delta: Some(&delta),
                },
            )
            .await
            .unwrap();

        let sent = provider.updates();
        let ProviderResource::Group(update) = &sent[0] else {
            panic!("expected a group update");
        };
        let capacity = update.capacity.as_ref().unwrap();
        assert_eq!(capacity.minimum, Some(2));
        assert_eq!(capacity.maximum, Some(5));
        assert_eq!(capacity.target, None);
        assert!(update.compute.is_none());
    }

    #[tokio::test]
    async fn test_cluster_id_change_is_left_unhandled() {
        let provider = InMemoryProvider::new();
        let target = DirectApply::new(&provider, fast_retry());
        let desired = ComputeGroup {
            auto_scaler: Some(AutoScalerOpts {
                cluster_id: Some(String::from("new")),
                ..AutoScalerOpts::default()
            }),
            ..ComputeGroup::new("nodes")
        };
        let actual = ComputeGroup {
            id: Some(String::from("cg-1")),
            auto_scaler: Some(AutoScalerOpts {
                cluster_id: Some(String::from("old")),
                ..AutoScalerOpts::default()
            }),
            ..ComputeGroup::new("nodes")
        };
        let delta = desired.delta(&actual);

        let outcome = target
            .render_group(
                &IdRegistry::new(),
                Change {
                    actual: Some(&actual),
                    desired: &desired,
                    delta: Some(&delta),
                },
            )
            .await
            .unwrap();
        assert!(outcome.handled.is_empty());
        assert!(!outcome.mutated);
        assert_eq!(provider.update_count(), 0);
    }

    fn scaled(enabled: bool) -> ComputeGroup {
        ComputeGroup {
            id: Some(String::from("cg-1")),
            auto_scaler: Some(AutoScalerOpts {
                enabled: Some(enabled),
                cluster_id: Some(String::from("prod")),
                headroom: Some(HeadroomOpts {
                    cpu_per_unit: Some(100),
                    num_of_units: Some(2),
                    ..HeadroomOpts::default()
                }),
                labels: Some([(String::from("a"), String::from("b"))].into()),
                ..AutoScalerOpts::default()
            }),
            ..ComputeGroup::new("nodes")
        }
    }

    #[tokio::test]
    async fn test_autoscaler_update_sends_only_changed_structures() {
        let provider = InMemoryProvider::new().with_group(GroupResource {
            id: Some(String::from("cg-1")),
            name: Some(String::from("nodes")),
            ..GroupResource::default()
        });
        let target = DirectApply::new(&provider, fast_retry());
        let desired = scaled(true);
        let actual = scaled(false);
        let delta = desired.delta(&actual);

        let outcome = target
            .render_group(
                &IdRegistry::new(),
                Change {
                    actual: Some(&actual),
                    desired: &desired,
                    delta: Some(&delta),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.handled.into_iter().collect::<Vec<_>>(),
            vec![String::from("auto_scaler.enabled")]
        );

        let sent = provider.updates();
        let ProviderResource::Group(update) = &sent[0] else {
            panic!("expected a group update");
        };
        let auto = update
            .integration
            .as_ref()
            .and_then(|i| i.auto_scale.as_ref())
            .unwrap();
        assert_eq!(auto.is_enabled, Some(true));
        assert!(auto.headroom.is_none());
        assert!(auto.labels.is_none());
        assert!(auto.is_auto_config.is_none());
        assert!(auto.null_fields.is_empty());
    }

    #[test]
    fn test_changed_headroom_is_sent_whole() {
        let desired = scaled(true).auto_scaler.unwrap();
        let mut actual = desired.clone();
        actual.headroom = Some(HeadroomOpts {
            cpu_per_unit: Some(50),
            num_of_units: Some(2),
            ..HeadroomOpts::default()
        });
        let changed = desired.diff(&actual).unwrap();

        let sent = auto_scale_update(&changed, &desired, Some(&actual));
        let headroom = sent.headroom.unwrap();
        assert_eq!(headroom.cpu_per_unit, Some(100));
        assert_eq!(headroom.num_of_units, Some(2));
        assert_eq!(sent.is_auto_config, Some(false));
        assert!(sent.is_enabled.is_none());
        assert!(sent.labels.is_none());
    }

    #[test]
    fn test_removed_headroom_is_cleared() {
        let desired = AutoScalerOpts {
            enabled: Some(true),
            ..AutoScalerOpts::default()
        };
        let actual = AutoScalerOpts {
            enabled: Some(false),
            headroom: Some(HeadroomOpts {
                cpu_per_unit: Some(100),
                ..HeadroomOpts::default()
            }),
            ..AutoScalerOpts::default()
        };
        let changed = desired.diff(&actual).unwrap();

        let sent = auto_scale_update(&changed, &desired, Some(&actual));
        assert_eq!(sent.null_fields, vec![String::from("headroom")]);
        assert_eq!(sent.is_auto_config, Some(true));

        let with_headroom = auto_scale(&actual);
        assert_eq!(with_headroom.is_auto_config, Some(false));
        assert!(with_headroom.null_fields.is_empty());
    }
}
