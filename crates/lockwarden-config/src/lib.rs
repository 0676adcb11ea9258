//! Configuration parsing and validation for lockwarden
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Environment overrides supplied by the caller
//! - Range validation that reports every problem at once
//! - A validated `GovernanceConfig` and its printable summary

mod overrides;
mod policy;
mod schema;
mod validation;

pub use overrides::*;
pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors. Every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {}", format_errors(.errors))]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(
    path: impl AsRef<Path>,
    overrides: &EnvOverrides,
) -> ConfigResult<GovernanceConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, overrides)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str, overrides: &EnvOverrides) -> ConfigResult<GovernanceConfig> {
    let raw: RawConfig = toml::from_str(content)?;

    // Check version
    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    finish(raw, overrides)
}

/// Build configuration from defaults and environment overrides alone
pub fn config_from_overrides(overrides: &EnvOverrides) -> ConfigResult<GovernanceConfig> {
    finish(RawConfig::empty(), overrides)
}

fn finish(mut raw: RawConfig, overrides: &EnvOverrides) -> ConfigResult<GovernanceConfig> {
    overrides.apply(&mut raw);

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(GovernanceConfig::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;
