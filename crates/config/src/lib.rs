//! Configuration loading, validation and env substitution.
//!
//! Config files: `switchboard.toml`, `switchboard.yaml`, or `switchboard.json`
//! Searched in `./` then `~/.config/switchboard/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, data_dir, discover_and_load, load_config},
    schema::{
        DatabaseConfig, DistributionConfig, MetricsConfig, ServerConfig, SessionsConfig,
        SwitchboardConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
