//! Configuration module for the reconciliation engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stratus.cluster.yaml`
//! - Validation of configuration values
//! - Hashing emitted documents for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, PROVIDER_TOKEN_VAR, PROVIDER_URL_VAR, ProviderCredentials,
    credentials_file, find_config_file,
};
pub use spec::{ClusterConfig, ClusterInfo, EngineSettings, OutputBackend, OutputSettings, RetrySettings};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
