//! Configuration validation for cluster configurations.
//!
//! Catches mistakes before any provider call is made: malformed names,
//! duplicates, references to undeclared tasks, and inconsistent sizes.

use crate::error::{ConfigError, Result, StratusError};
use crate::tasks::{ComputeGroup, Orientation, TaskKind, TaskRef};
use std::collections::HashSet;
use tracing::debug;
use validator::Validate;

use super::spec::{ClusterConfig, OutputBackend, OutputSettings};

/// Volume types the provider accepts.
const KNOWN_VOLUME_TYPES: &[&str] = &["standard", "gp2", "gp3", "io1", "io2", "st1", "sc1"];

/// Validator for cluster configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Known volume types.
    known_volume_types: HashSet<String>,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

impl ConfigValidator {
    /// Creates a new validator with the default known volume types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            known_volume_types: KNOWN_VOLUME_TYPES.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Adds a custom volume type to the known list.
    pub fn add_volume_type(&mut self, volume_type: impl Into<String>) {
        self.known_volume_types.insert(volume_type.into());
    }

    /// Validates a cluster configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, config: &ClusterConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_cluster(config, &mut result);
        Self::validate_engine(config, &mut result);
        let declared = Self::validate_names(config, &mut result);
        Self::validate_shared(config, &declared, &mut result);
        for (index, group) in config.groups.iter().enumerate() {
            self.validate_group(index, group, &declared, &mut result);
        }

        if result.errors.is_empty() {
            debug!(
                "Configuration validation passed with {} warnings",
                result.warnings.len()
            );
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StratusError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_cluster(config: &ClusterConfig, result: &mut ValidationResult) {
        let name = &config.cluster.name;
        if name.is_empty() {
            result.error("cluster.name", "Cluster name cannot be empty");
        } else if !is_valid_name(name) {
            result.error(
                "cluster.name",
                format!("Cluster name '{name}' is invalid. Must be lowercase alphanumeric with hyphens."),
            );
        }
    }

    fn validate_engine(config: &ClusterConfig, result: &mut ValidationResult) {
        if let Err(errors) = config.engine.validate() {
            result.error("engine", format!("Invalid engine settings: {errors}"));
        }

        let OutputSettings { backend, bucket, .. } = &config.engine.output;
        if *backend == OutputBackend::S3 && bucket.as_ref().is_none_or(String::is_empty) {
            result.error(
                "engine.output.bucket",
                "S3 bucket name is required when using S3 backend",
            );
        }
    }

    /// Checks names and duplicates; returns the set of declared tasks.
    fn validate_names(config: &ClusterConfig, result: &mut ValidationResult) -> HashSet<TaskRef> {
        let refs = config
            .shared
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("shared[{i}].name"), TaskRef::new(s.kind, &s.name)))
            .chain(config.groups.iter().enumerate().map(|(i, g)| {
                (
                    format!("groups[{i}].name"),
                    TaskRef::new(TaskKind::ComputeGroup, &g.name),
                )
            }));

        let mut declared = HashSet::new();
        for (field, task) in refs {
            if !is_valid_name(&task.name) {
                result.error(
                    &field,
                    format!(
                        "{} name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        task.kind, task.name
                    ),
                );
            }
            if !declared.insert(task.clone()) {
                result.error(
                    field,
                    ConfigError::DuplicateName {
                        kind: task.kind.to_string(),
                        name: task.name,
                    }
                    .to_string(),
                );
            }
        }
        declared
    }

    fn validate_shared(
        config: &ClusterConfig,
        declared: &HashSet<TaskRef>,
        result: &mut ValidationResult,
    ) {
        for (index, shared) in config.shared.iter().enumerate() {
            let from = TaskRef::new(shared.kind, &shared.name);
            for dependency in &shared.depends_on {
                check_reference(
                    &from,
                    dependency,
                    declared,
                    &format!("shared[{index}].depends_on"),
                    result,
                );
            }
        }
    }

    fn validate_group(
        &self,
        index: usize,
        group: &ComputeGroup,
        declared: &HashSet<TaskRef>,
        result: &mut ValidationResult,
    ) {
        let prefix = format!("groups[{index}]");
        let from = TaskRef::new(TaskKind::ComputeGroup, &group.name);

        if let (Some(min), Some(max)) = (group.min_size, group.max_size)
            && min > max
        {
            result.error(
                format!("{prefix}.min_size"),
                format!("min_size ({min}) cannot be greater than max_size ({max})"),
            );
        }
        if group.min_size.is_some_and(|min| min < 0) {
            result.error(format!("{prefix}.min_size"), "min_size cannot be negative");
        }

        if let Some(spot) = group.spot_percentage
            && !(0.0..=100.0).contains(&spot)
        {
            result.error(
                format!("{prefix}.spot_percentage"),
                format!("spot_percentage must be between 0 and 100, got {spot}"),
            );
        }

        if let Some(orientation) = &group.orientation
            && !Orientation::is_known(orientation)
        {
            result.warnings.push(format!(
                "{prefix}.orientation: unknown orientation '{orientation}', balanced will be used"
            ));
        }

        if let Some(volume_type) = group.root_volume.as_ref().and_then(|r| r.volume_type.as_ref())
            && !self.known_volume_types.contains(&volume_type.to_lowercase())
        {
            result.warnings.push(format!(
                "{prefix}.root_volume.type: unknown volume type '{volume_type}'"
            ));
        }

        if group.subnets.as_ref().is_none_or(Vec::is_empty) {
            result
                .warnings
                .push(format!("{prefix}.subnets: group '{}' declares no subnets", group.name));
        }

        for dependency in group.dependencies() {
            let field = format!("{prefix}.{}", reference_field(dependency.kind));
            check_reference(&from, &dependency, declared, &field, result);
        }
    }
}

fn check_reference(
    from: &TaskRef,
    to: &TaskRef,
    declared: &HashSet<TaskRef>,
    field: &str,
    result: &mut ValidationResult,
) {
    if !declared.contains(to) {
        result.error(
            field,
            ConfigError::UnresolvedReference {
                from: from.clone(),
                missing: to.clone(),
            }
            .to_string(),
        );
    }
}

const fn reference_field(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Subnet => "subnets",
        TaskKind::SecurityGroup => "security_groups",
        TaskKind::InstanceProfile => "instance_profile",
        TaskKind::SshKey => "ssh_key",
        TaskKind::LoadBalancer => "load_balancer",
        TaskKind::ComputeGroup => "user_data",
    }
}

/// Checks if a name is valid (lowercase alphanumeric with hyphens).
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let first_char = name.chars().next();
    if !first_char.is_some_and(|c| c.is_ascii_lowercase()) {
        return false;
    }

    if name.ends_with('-') || name.contains("--") {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
