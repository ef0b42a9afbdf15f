//! Reconciler for converging declared tasks on live state.
//!
//! A pass walks the task graph in dependency order. Every task is validated,
//! discovered, diffed against its live counterpart, and handed to the active
//! target according to its lifecycle. Live identifiers found or created along
//! the way are recorded so later tasks can reference earlier ones.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DiscoveryError, Phase, Result, StratusError};
use crate::planner::{FieldSet, PassPlan, PlanAction, TaskGraph};
use crate::provider::ProviderAdapter;
use crate::target::{AnyChange, Change, Target, TargetKind};
use crate::tasks::{
    ComputeGroup, IdRegistry, Lifecycle, Reconcilable, SharedResource, Task, TaskRef, TaskSet,
};

/// Reconciler for one cluster.
pub struct Reconciler<'a, P: ProviderAdapter + ?Sized> {
    /// Provider adapter.
    provider: &'a P,
    /// Declared tasks.
    tasks: &'a TaskSet,
    /// Execution order.
    graph: TaskGraph,
    /// Live identifiers discovered or created so far.
    registry: IdRegistry,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    /// Unique pass identifier.
    pub pass_id: Uuid,
    /// Target the pass rendered to.
    pub target: TargetKind,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Per-task outcomes in execution order.
    pub outcomes: Vec<TaskOutcome>,
    /// Changed fields the target did not carry.
    pub coverage_gaps: Vec<CoverageGap>,
}

/// Outcome for a single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    /// The task.
    pub task: TaskRef,
    /// What happened.
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

/// What happened to a task during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The resource was created.
    Created {
        /// Identifier assigned by the provider.
        id: Option<String>,
    },
    /// The resource was updated.
    Updated {
        /// Fields carried by the update.
        fields: Vec<String>,
    },
    /// Nothing to do.
    Unchanged,
    /// Drift was logged but not corrected.
    Warned {
        /// Drifted fields.
        fields: Vec<String>,
    },
    /// The task is ignored.
    Skipped,
    /// A declarative block was written.
    Emitted,
}

/// A changed field the target could not carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageGap {
    /// The task.
    pub task: TaskRef,
    /// The field path.
    pub field: String,
}

/// A task paired with its discovered state.
enum Discovered<'t> {
    Group(&'t ComputeGroup, Option<ComputeGroup>),
    Shared(&'t SharedResource, Option<SharedResource>),
}

impl<'a, P: ProviderAdapter + ?Sized> Reconciler<'a, P> {
    /// Creates a reconciler for a task set.
    ///
    /// # Errors
    ///
    /// Returns an error if the tasks reference undeclared tasks or contain a
    /// dependency cycle.
    pub fn new(provider: &'a P, tasks: &'a TaskSet) -> Result<Self> {
        let graph = TaskGraph::build(tasks)?;
        Ok(Self {
            provider,
            tasks,
            graph,
            registry: IdRegistry::new(),
        })
    }

    /// Live identifiers known so far.
    #[must_use]
    pub const fn registry(&self) -> &IdRegistry {
        &self.registry
    }

    /// Runs a full pass against `target`.
    ///
    /// Every pass starts from an empty registry. The pass stops at the first failing task; tasks already processed keep
    /// their effects.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ReconcileError::TaskFailed`] naming the task
    /// and phase that failed.
    pub async fn run(&mut self, target: &mut Target<'_, P>) -> Result<PassReport> {
        self.registry = IdRegistry::new();
        let mut report = PassReport::new(target.kind());
        info!(
            "Starting {} pass {} over {} tasks",
            report.target,
            report.pass_id,
            self.graph.len()
        );

        let order: Vec<TaskRef> = self.graph.order().cloned().collect();
        for task_ref in order {
            let task = self.task(&task_ref)?;
            let Some(discovered) = self.discover(task).await? else {
                report.record(task_ref, OutcomeStatus::Skipped);
                continue;
            };
            match discovered {
                Discovered::Group(desired, actual) => {
                    self.converge(desired, actual, target, &mut report).await?;
                }
                Discovered::Shared(desired, actual) => {
                    self.converge(desired, actual, target, &mut report).await?;
                }
            }
        }

        report.finished_at = Some(Utc::now());
        info!(
            "Pass {} finished: {} mutations, {} coverage gaps",
            report.pass_id,
            report.mutations(),
            report.coverage_gaps.len()
        );
        Ok(report)
    }

    /// Computes what a pass would do, without rendering anything.
    ///
    /// # Errors
    ///
    /// Returns an error if validation or discovery fails.
    pub async fn plan(&mut self) -> Result<PassPlan> {
        self.registry = IdRegistry::new();
        let mut plan = PassPlan::new();
        let order: Vec<TaskRef> = self.graph.order().cloned().collect();
        for task_ref in order {
            let task = self.task(&task_ref)?;
            let lifecycle = task.lifecycle();
            let Some(discovered) = self.discover(task).await? else {
                plan.push(task_ref, lifecycle, PlanAction::Skip, Vec::new());
                continue;
            };
            let (action, fields) = match discovered {
                Discovered::Group(desired, actual) => assess(desired, actual.as_ref()),
                Discovered::Shared(desired, actual) => assess(desired, actual.as_ref()),
            };
            plan.push(task_ref, lifecycle, action, fields.into_iter().collect());
        }
        Ok(plan)
    }

    fn task(&self, task_ref: &TaskRef) -> Result<&'a Task> {
        self.tasks
            .get(task_ref)
            .ok_or_else(|| StratusError::internal(format!("{task_ref} is ordered but not declared")))
    }

    /// Validates and discovers a task. Returns `None` for ignored tasks.
    async fn discover(&mut self, task: &'a Task) -> Result<Option<Discovered<'a>>> {
        let task_ref = task.task_ref();
        if task.lifecycle() == Lifecycle::Ignore {
            // Ignored tasks are never discovered, but a declared identifier
            // still lets other tasks reference them.
            if let Task::Shared(shared) = task
                && let Some(id) = &shared.id
            {
                self.registry.register(task_ref.clone(), id.clone());
            }
            debug!("Skipping ignored task {task_ref}");
            return Ok(None);
        }

        let discovered = match task {
            Task::Group(desired) => {
                desired
                    .check_required()
                    .map_err(|e| e.in_task(task_ref.clone(), Phase::Validate))?;
                let actual = desired
                    .find(self.provider, &self.registry)
                    .await
                    .map_err(|e| e.in_task(task_ref.clone(), Phase::Find))?;
                Discovered::Group(desired, actual)
            }
            Task::Shared(desired) => {
                desired
                    .check_required()
                    .map_err(|e| e.in_task(task_ref.clone(), Phase::Validate))?;
                let actual = desired
                    .find(self.provider)
                    .await
                    .map_err(|e| e.in_task(task_ref.clone(), Phase::Find))?;
                Discovered::Shared(desired, actual)
            }
        };

        let live_id = match &discovered {
            Discovered::Group(_, actual) => actual.as_ref().and_then(|a| a.live_id()),
            Discovered::Shared(_, actual) => actual.as_ref().and_then(|a| a.live_id()),
        };
        if let Some(id) = live_id {
            self.registry.register(task_ref, id);
        }
        Ok(Some(discovered))
    }

    async fn converge<T>(
        &mut self,
        desired: &T,
        actual: Option<T>,
        target: &mut Target<'_, P>,
        report: &mut PassReport,
    ) -> Result<()>
    where
        T: Reconcilable,
        for<'t> AnyChange<'t>: From<Change<'t, T>>,
    {
        let task = desired.task_ref();
        let lifecycle = desired.lifecycle();

        let Some(actual) = actual else {
            if lifecycle.requires_existing() {
                return Err(StratusError::from(DiscoveryError::MissingExisting { task: task.clone() })
                    .in_task(task, Phase::Find));
            }
            let phase = match target.kind() {
                TargetKind::Direct => Phase::Create,
                TargetKind::Declarative => Phase::Emit,
            };
            let change = Change {
                actual: None,
                desired,
                delta: None,
            };
            let outcome = target
                .render(&self.registry, change.into())
                .await
                .map_err(|e| e.in_task(task.clone(), phase))?;
            if let Some(id) = &outcome.live_id {
                self.registry.register(task.clone(), id.clone());
            }
            let status = match target.kind() {
                TargetKind::Direct => OutcomeStatus::Created { id: outcome.live_id },
                TargetKind::Declarative => OutcomeStatus::Emitted,
            };
            report.record(task, status);
            return Ok(());
        };

        let delta = desired.delta(&actual);
        let fields = delta.changed_fields();

        match lifecycle {
            Lifecycle::WarnIfChanged => {
                let status = if fields.is_empty() {
                    OutcomeStatus::Unchanged
                } else {
                    for field in &fields {
                        warn!("{task} has drifted in {field}; leaving it as-is");
                    }
                    OutcomeStatus::Warned {
                        fields: fields.into_iter().collect(),
                    }
                };
                report.record(task, status);
                return Ok(());
            }
            Lifecycle::ValidateOnly => {
                if !fields.is_empty() {
                    return Err(StratusError::from(DiscoveryError::ChangesRejected {
                        task: task.clone(),
                        fields: fields.into_iter().collect(),
                    })
                    .in_task(task, Phase::Validate));
                }
                report.record(task, OutcomeStatus::Unchanged);
                return Ok(());
            }
            Lifecycle::Sync | Lifecycle::Ignore => {}
        }

        if fields.is_empty() && !target.renders_unchanged() {
            debug!("{task} is up to date");
            report.record(task, OutcomeStatus::Unchanged);
            return Ok(());
        }

        let phase = match target.kind() {
            TargetKind::Direct => Phase::Update,
            TargetKind::Declarative => Phase::Emit,
        };
        let change = Change {
            actual: Some(&actual),
            desired,
            delta: Some(&delta),
        };
        let outcome = target
            .render(&self.registry, change.into())
            .await
            .map_err(|e| e.in_task(task.clone(), phase))?;

        report.record_gaps(&task, fields.difference(&outcome.handled));

        let status = match target.kind() {
            TargetKind::Declarative => OutcomeStatus::Emitted,
            TargetKind::Direct if outcome.mutated => OutcomeStatus::Updated {
                fields: outcome.handled.into_iter().collect(),
            },
            TargetKind::Direct => OutcomeStatus::Unchanged,
        };
        report.record(task, status);
        Ok(())
    }
}

/// Plans a discovered task without rendering it.
fn assess<T: Reconcilable>(desired: &T, actual: Option<&T>) -> (PlanAction, FieldSet) {
    let lifecycle = desired.lifecycle();
    let Some(actual) = actual else {
        let action = if lifecycle.requires_existing() {
            PlanAction::Missing
        } else {
            PlanAction::Create
        };
        return (action, FieldSet::new());
    };

    let fields = desired.delta(actual).changed_fields();
    let action = match (lifecycle, fields.is_empty()) {
        (_, true) => PlanAction::Unchanged,
        (Lifecycle::WarnIfChanged, false) => PlanAction::Warn,
        (Lifecycle::ValidateOnly, false) => PlanAction::Reject,
        _ => PlanAction::Update,
    };
    (action, fields)
}

impl PassReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(target: TargetKind) -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            target,
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::new(),
            coverage_gaps: Vec::new(),
        }
    }

    /// Number of creates and updates issued.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Created { .. } | OutcomeStatus::Updated { .. }))
            .count()
    }

    /// Returns the outcome recorded for a task.
    #[must_use]
    pub fn outcome(&self, task: &TaskRef) -> Option<&OutcomeStatus> {
        self.outcomes
            .iter()
            .find(|o| &o.task == task)
            .map(|o| &o.status)
    }

    fn record(&mut self, task: TaskRef, status: OutcomeStatus) {
        debug!("{task}: {status:?}");
        self.outcomes.push(TaskOutcome { task, status });
    }

    fn record_gaps<'f>(&mut self, task: &TaskRef, fields: impl Iterator<Item = &'f String>) {
        for field in fields {
            warn!("Change to {field} on {task} was not applied by the target");
            self.coverage_gaps.push(CoverageGap {
                task: task.clone(),
                field: field.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Capacity, GroupResource, InMemoryProvider, MachineImage, ProviderResource};
    use crate::target::{DirectApply, EmissionTarget, RetryPolicy};
    use crate::provider::{MockProviderAdapter, SharedRecord};
    use crate::tasks::{AutoScalerOpts, BootstrapPayload, HeadroomOpts, TaskKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn provider() -> InMemoryProvider {
        InMemoryProvider::new().with_image(MachineImage {
            id: String::from("img-123"),
            name: String::from("base-image"),
            root_device_name: String::from("/dev/xvda"),
        })
    }

    fn retry() -> RetryPolicy {
        RetryPolicy::default().with_delay(Duration::ZERO)
    }

    fn nodes() -> ComputeGroup {
        ComputeGroup {
            min_size: Some(2),
            max_size: Some(5),
            image: Some(String::from("base-image")),
            orientation: Some(String::from("cost")),
            subnets: Some(vec![String::from("b"), String::from("a")]),
            security_groups: Some(vec![String::from("nodes")]),
            spot_instance_types: Some(vec![String::from("m5.large"), String::from("m5a.large")]),
            tags: Some(BTreeMap::from([(String::from("team"), String::from("infra"))])),
            auto_scaler: Some(AutoScalerOpts {
                enabled: Some(true),
                headroom: Some(HeadroomOpts {
                    cpu_per_unit: Some(100),
                    num_of_units: Some(2),
                    ..HeadroomOpts::default()
                }),
                ..AutoScalerOpts::default()
            }),
            ..ComputeGroup::new("nodes")
        }
    }

    fn task_set(group: ComputeGroup) -> TaskSet {
        [
            Task::Group(group),
            Task::Shared(SharedResource::new(TaskKind::Subnet, "a").with_attribute("cidr", "10.0.1.0/24")),
            Task::Shared(SharedResource::new(TaskKind::Subnet, "b").with_attribute("cidr", "10.0.2.0/24")),
            Task::Shared(SharedResource::new(TaskKind::SecurityGroup, "nodes")),
        ]
        .into_iter()
        .collect::<Result<TaskSet>>()
        .unwrap()
    }

    async fn apply(provider: &InMemoryProvider, tasks: &TaskSet) -> Result<PassReport> {
        let mut reconciler = Reconciler::new(provider, tasks)?;
        let mut target = Target::Direct(DirectApply::new(provider, retry()));
        reconciler.run(&mut target).await
    }

    fn seeded_group(min: i64, max: i64, target: i64) -> GroupResource {
        GroupResource {
            id: Some(String::from("cg-1")),
            name: Some(String::from("nodes")),
            capacity: Some(Capacity {
                minimum: Some(min),
                maximum: Some(max),
                target: Some(target),
                unit: Some(String::from("instance")),
            }),
            ..GroupResource::default()
        }
    }

    fn capacity_only(min: i64, max: i64) -> TaskSet {
        [Task::Group(ComputeGroup {
            min_size: Some(min),
            max_size: Some(max),
            ..ComputeGroup::new("nodes")
        })]
        .into_iter()
        .collect::<Result<TaskSet>>()
        .unwrap()
    }

    #[tokio::test]
    async fn test_second_pass_is_a_noop() {
        let provider = provider();
        let tasks = task_set(nodes());

        let first = apply(&provider, &tasks).await.unwrap();
        assert_eq!(first.mutations(), 4);
        assert_eq!(provider.create_count(), 4);

        // Shared resources are created before the group that references them.
        let order: Vec<_> = first.outcomes.iter().map(|o| o.task.to_string()).collect();
        assert_eq!(order.last().map(String::as_str), Some("compute_group/nodes"));

        let second = apply(&provider, &tasks).await.unwrap();
        assert_eq!(second.mutations(), 0);
        assert!(second.coverage_gaps.is_empty());
        assert_eq!(provider.create_count(), 4);
        assert_eq!(provider.update_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_user_data_converges() {
        let provider = provider();
        let tasks = task_set(ComputeGroup {
            user_data: Some(BootstrapPayload::new("")),
            ..nodes()
        });

        apply(&provider, &tasks).await.unwrap();
        let second = apply(&provider, &tasks).await.unwrap();
        let third = apply(&provider, &tasks).await.unwrap();
        assert_eq!(second.mutations(), 0);
        assert_eq!(third.mutations(), 0);
        assert_eq!(provider.update_count(), 0);
    }

    #[tokio::test]
    async fn test_max_size_change_updates_only_max() {
        let provider = InMemoryProvider::new().with_group(seeded_group(2, 4, 4));
        let tasks = capacity_only(2, 5);

        let report = apply(&provider, &tasks).await.unwrap();
        let task = TaskRef::new(TaskKind::ComputeGroup, "nodes");
        assert_eq!(
            report.outcome(&task),
            Some(&OutcomeStatus::Updated {
                fields: vec![String::from("max_size")]
            })
        );

        let updates = provider.updates();
        assert_eq!(updates.len(), 1);
        let ProviderResource::Group(update) = &updates[0] else {
            panic!("expected a group update");
        };
        assert_eq!(
            update.capacity,
            Some(Capacity {
                maximum: Some(5),
                ..Capacity::default()
            })
        );
    }

    #[tokio::test]
    async fn test_raising_min_above_target_raises_target() {
        let provider = InMemoryProvider::new().with_group(seeded_group(2, 4, 4));
        let tasks = capacity_only(5, 5);

        apply(&provider, &tasks).await.unwrap();
        let capacity = provider.group("nodes").unwrap().capacity.unwrap();
        assert_eq!(capacity.minimum, Some(5));
        assert_eq!(capacity.maximum, Some(5));
        assert_eq!(capacity.target, Some(5));
    }

    #[tokio::test]
    async fn test_unhandled_field_is_reported_as_gap() {
        let provider = InMemoryProvider::new().with_group(GroupResource {
            integration: Some(crate::provider::Integration {
                cluster_identifier: Some(String::from("old")),
                ..crate::provider::Integration::default()
            }),
            ..seeded_group(2, 4, 2)
        });
        let tasks = [Task::Group(ComputeGroup {
            min_size: Some(2),
            max_size: Some(4),
            auto_scaler: Some(AutoScalerOpts {
                cluster_id: Some(String::from("new")),
                ..AutoScalerOpts::default()
            }),
            ..ComputeGroup::new("nodes")
        })]
        .into_iter()
        .collect::<Result<TaskSet>>()
        .unwrap();

        let report = apply(&provider, &tasks).await.unwrap();
        assert_eq!(
            report.coverage_gaps,
            vec![CoverageGap {
                task: TaskRef::new(TaskKind::ComputeGroup, "nodes"),
                field: String::from("auto_scaler.cluster_id"),
            }]
        );
        assert_eq!(provider.update_count(), 0);
    }

    #[tokio::test]
    async fn test_warn_if_changed_never_mutates() {
        let provider = InMemoryProvider::new().with_group(seeded_group(2, 4, 2));
        let tasks = [Task::Group(ComputeGroup {
            lifecycle: Lifecycle::WarnIfChanged,
            min_size: Some(3),
            max_size: Some(4),
            ..ComputeGroup::new("nodes")
        })]
        .into_iter()
        .collect::<Result<TaskSet>>()
        .unwrap();

        let report = apply(&provider, &tasks).await.unwrap();
        assert_eq!(
            report.outcome(&TaskRef::new(TaskKind::ComputeGroup, "nodes")),
            Some(&OutcomeStatus::Warned {
                fields: vec![String::from("min_size")]
            })
        );
        assert_eq!(provider.update_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_resource_with_existing_lifecycle_fails() {
        let provider = InMemoryProvider::new();
        let tasks = [Task::Shared(
            SharedResource::new(TaskKind::Subnet, "a").with_lifecycle(Lifecycle::WarnIfChanged),
        )]
        .into_iter()
        .collect::<Result<TaskSet>>()
        .unwrap();

        let err = apply(&provider, &tasks).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Reconciliation error: find failed for subnet/a: Discovery error: subnet/a must already exist but was not found"
        );
        assert_eq!(provider.create_count(), 0);
    }

    #[tokio::test]
    async fn test_validate_only_drift_is_rejected() {
        let provider = InMemoryProvider::new().with_shared(crate::provider::SharedRecord {
            kind: TaskKind::SecurityGroup,
            id: Some(String::from("sg-1")),
            name: String::from("nodes"),
            attributes: BTreeMap::from([(String::from("description"), String::from("old"))]),
        });
        let tasks = [Task::Shared(
            SharedResource::new(TaskKind::SecurityGroup, "nodes")
                .with_lifecycle(Lifecycle::ValidateOnly)
                .with_attribute("description", "node traffic"),
        )]
        .into_iter()
        .collect::<Result<TaskSet>>()
        .unwrap();

        let err = apply(&provider, &tasks).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("validate failed for security_group/nodes"));
        assert!(message.contains("has drifted in fields: attributes.description"));
    }

    #[tokio::test]
    async fn test_ignored_tasks_are_skipped() {
        let provider = InMemoryProvider::new();
        let tasks = [Task::Shared(
            SharedResource::new(TaskKind::Subnet, "a")
                .with_lifecycle(Lifecycle::Ignore)
                .with_id("subnet-1"),
        )]
        .into_iter()
        .collect::<Result<TaskSet>>()
        .unwrap();

        let mut reconciler = Reconciler::new(&provider, &tasks).unwrap();
        let mut target = Target::Direct(DirectApply::new(&provider, retry()));
        let report = reconciler.run(&mut target).await.unwrap();
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Skipped);
        assert_eq!(
            reconciler.registry().id_of(&TaskRef::new(TaskKind::Subnet, "a")),
            Some("subnet-1")
        );
    }

    #[tokio::test]
    async fn test_emission_and_direct_agree_on_derived_values() {
        let tasks = task_set(nodes());

        let direct = provider();
        apply(&direct, &tasks).await.unwrap();
        let created = direct.group("nodes").unwrap();
        let spec = created.compute.unwrap().launch_specification.unwrap();

        let emitting = provider();
        let mut reconciler = Reconciler::new(&emitting, &tasks).unwrap();
        let mut target = Target::Declarative(EmissionTarget::new(&emitting, &tasks));
        let report = reconciler.run(&mut target).await.unwrap();
        assert_eq!(report.mutations(), 0);
        assert_eq!(emitting.create_count(), 0);

        let document = target.into_document().unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&document.content).unwrap();
        let block = &json["resource"]["compute_group"]["nodes"];

        assert_eq!(block["image_id"], spec.image_id.unwrap());
        let root = &spec.block_device_mappings.unwrap()[0];
        assert_eq!(block["ebs_block_device"][0]["device_name"], root.device_name);
        assert_eq!(block["desired_capacity"], created.capacity.unwrap().target.unwrap());
        assert_eq!(block["orientation"], "costOriented");
        assert_eq!(
            created.strategy.unwrap().availability_vs_cost.as_deref(),
            Some("costOriented")
        );
    }

    #[tokio::test]
    async fn test_plan_reports_actions_without_mutating() {
        let provider = InMemoryProvider::new().with_group(seeded_group(2, 4, 4));
        let tasks = capacity_only(2, 5);

        let mut reconciler = Reconciler::new(&provider, &tasks).unwrap();
        let plan = reconciler.plan().await.unwrap();
        assert_eq!(plan.count(PlanAction::Update), 1);
        assert_eq!(plan.entries[0].fields, vec![String::from("max_size")]);
        assert_eq!(provider.update_count(), 0);
    }

    #[tokio::test]
    async fn test_run_does_not_reuse_identifiers_from_plan() {
        let calls = AtomicUsize::new(0);
        let mut provider = MockProviderAdapter::new();
        provider.expect_list().returning(move |kind| {
            // Only the first listing sees the subnet.
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![ProviderResource::Shared(SharedRecord {
                    kind,
                    id: Some(String::from("subnet-1")),
                    name: String::from("a"),
                    attributes: BTreeMap::new(),
                })])
            } else {
                Ok(Vec::new())
            }
        });
        let tasks = [Task::Shared(SharedResource::new(TaskKind::Subnet, "a"))]
            .into_iter()
            .collect::<Result<TaskSet>>()
            .unwrap();
        let subnet = TaskRef::new(TaskKind::Subnet, "a");

        let mut reconciler = Reconciler::new(&provider, &tasks).unwrap();
        reconciler.plan().await.unwrap();
        assert_eq!(reconciler.registry().id_of(&subnet), Some("subnet-1"));

        let mut target = Target::Declarative(EmissionTarget::new(&provider, &tasks));
        reconciler.run(&mut target).await.unwrap();
        assert_eq!(reconciler.registry().id_of(&subnet), None);
    }
}
