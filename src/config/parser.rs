//! Configuration parser for loading cluster configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result};
use crate::target::TargetKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::spec::{ClusterConfig, OutputBackend};

/// Environment variable holding the provider API base URL.
pub const PROVIDER_URL_VAR: &str = "STRATUS_PROVIDER_URL";

/// Environment variable holding the provider API token.
pub const PROVIDER_TOKEN_VAR: &str = "STRATUS_PROVIDER_TOKEN";

/// Credentials for the provider control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    /// API base URL.
    pub url: String,
    /// Bearer token.
    pub token: String,
}

/// Configuration parser for loading cluster configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ClusterConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ClusterConfig> {
        debug!("Parsing YAML configuration");

        let config: ClusterConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })?;

        debug!(
            "Parsed cluster {} with {} shared resources and {} groups",
            config.cluster.name,
            config.shared.len(),
            config.groups.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Overrides use the `STRATUS_` prefix, e.g. `STRATUS_CLUSTER_NAME`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// override has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ClusterConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies environment variable overrides read through `var`.
    fn apply_env_overrides(
        config: &mut ClusterConfig,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(name) = var("STRATUS_CLUSTER_NAME") {
            debug!("Overriding cluster.name from environment");
            config.cluster.name = name;
        }

        if let Some(region) = var("STRATUS_REGION") {
            debug!("Overriding cluster.region from environment");
            config.cluster.region = Some(region);
        }

        if let Some(target) = var("STRATUS_TARGET") {
            debug!("Overriding engine.target from environment");
            config.engine.target = match target.to_lowercase().as_str() {
                "direct" => TargetKind::Direct,
                "declarative" => TargetKind::Declarative,
                other => {
                    return Err(ConfigError::validation(
                        format!("Unknown target '{other}' (expected direct or declarative)"),
                        "engine.target",
                    )
                    .into());
                }
            };
        }

        if let Some(bucket) = var("STRATUS_OUTPUT_BUCKET") {
            debug!("Overriding engine.output.bucket from environment");
            config.engine.output.backend = OutputBackend::S3;
            config.engine.output.bucket = Some(bucket);
        }

        if let Some(prefix) = var("STRATUS_OUTPUT_PREFIX") {
            debug!("Overriding engine.output.prefix from environment");
            config.engine.output.prefix = Some(prefix);
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the provider credentials.
    ///
    /// The environment wins; otherwise `stratus/credentials.env` in the user
    /// configuration directory is consulted.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL or token is not set anywhere.
    pub fn provider_credentials() -> Result<ProviderCredentials> {
        let file = credentials_file()
            .filter(|path| path.exists())
            .map(|path| read_env_file(&path))
            .unwrap_or_default();
        let lookup = |name: &str| {
            std::env::var(name).ok().or_else(|| {
                file.iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.clone())
            })
        };

        let url = lookup(PROVIDER_URL_VAR).ok_or_else(|| ConfigError::MissingEnvVar {
            name: PROVIDER_URL_VAR.to_string(),
        })?;
        let token = lookup(PROVIDER_TOKEN_VAR).ok_or_else(|| ConfigError::MissingEnvVar {
            name: PROVIDER_TOKEN_VAR.to_string(),
        })?;
        Ok(ProviderCredentials { url, token })
    }
}

/// Location of the fallback credentials file.
#[must_use]
pub fn credentials_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stratus").join("credentials.env"))
}

fn read_env_file(path: &Path) -> Vec<(String, String)> {
    match dotenvy::from_path_iter(path) {
        Ok(iter) => iter.filter_map(std::result::Result::ok).collect(),
        Err(e) => {
            warn!("Ignoring unreadable credentials file {}: {e}", path.display());
            Vec::new()
        }
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["stratus.cluster.yaml", "stratus.cluster.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Lifecycle, TaskKind};
    use std::collections::HashMap;

    const CLUSTER: &str = r#"
cluster:
  name: prod
  region: us-east-1

engine:
  target: declarative
  retry:
    attempts: 5
    delay_secs: 2
  output:
    backend: s3
    bucket: stratus-documents
    prefix: prod

shared:
  - kind: subnet
    name: private-a
    lifecycle: warn-if-changed
    id: subnet-0a1b
  - kind: security_group
    name: nodes
    attributes:
      description: node traffic

groups:
  - name: nodes
    min_size: 2
    max_size: 10
    image: base-image
    orientation: cost
    subnets: [private-a]
    security_groups: [nodes]
    tags:
      k8s.io/role/node: "1"
    root_volume:
      type: gp3
      size: 64
    auto_scaler:
      enabled: true
      headroom:
        cpu_per_unit: 1000
        num_of_units: 2
"#;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
cluster:
  name: dev
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(config.cluster.name, "dev");
        assert_eq!(config.engine.target, TargetKind::Direct);
        assert_eq!(config.engine.retry.attempts, 10);
        assert!(config.groups.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config = ConfigParser::new().parse_yaml(CLUSTER, None).unwrap();
        assert_eq!(config.engine.target, TargetKind::Declarative);
        assert_eq!(config.engine.retry.attempts, 5);
        assert_eq!(config.engine.output.backend, OutputBackend::S3);

        assert_eq!(config.shared.len(), 2);
        assert_eq!(config.shared[0].kind, TaskKind::Subnet);
        assert_eq!(config.shared[0].lifecycle, Lifecycle::WarnIfChanged);
        assert_eq!(config.shared[0].id.as_deref(), Some("subnet-0a1b"));

        let group = &config.groups[0];
        assert_eq!(group.max_size, Some(10));
        assert_eq!(
            group.root_volume.as_ref().and_then(|r| r.volume_type.as_deref()),
            Some("gp3")
        );
        assert_eq!(config.task_set().unwrap().len(), 3);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new().parse_yaml(CLUSTER, None).unwrap();
        let env = HashMap::from([
            ("STRATUS_CLUSTER_NAME", "staging"),
            ("STRATUS_TARGET", "direct"),
            ("STRATUS_OUTPUT_PREFIX", "staging"),
        ]);
        ConfigParser::apply_env_overrides(&mut config, |name| {
            env.get(name).map(ToString::to_string)
        })
        .unwrap();

        assert_eq!(config.cluster.name, "staging");
        assert_eq!(config.engine.target, TargetKind::Direct);
        assert_eq!(config.engine.output.prefix.as_deref(), Some("staging"));
    }

    #[test]
    fn test_unknown_target_override_fails() {
        let mut config = ConfigParser::new().parse_yaml(CLUSTER, None).unwrap();
        let err = ConfigParser::apply_env_overrides(&mut config, |name| {
            (name == "STRATUS_TARGET").then(|| String::from("terraform"))
        })
        .unwrap_err();
        assert!(err.to_string().contains("Unknown target 'terraform'"));
    }

    #[test]
    fn test_find_config_file_searches_upward() {
        let root = tempfile::TempDir::new().unwrap();
        std::fs::write(root.path().join("stratus.cluster.yaml"), "cluster:\n  name: x\n").unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, root.path().join("stratus.cluster.yaml"));
    }
}
