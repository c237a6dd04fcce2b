//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into an [`OrchestratorConfig`],
//! overlay credentials from the environment, and run validation before
//! returning. This is the primary entry point for loading configuration at
//! startup and on hot reload.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//! - Keys present in the file are never overwritten by the environment
//!
//! ## NOT Responsible For
//! - Hot-reloading on file changes (that belongs to `watcher`)
//! - Defining the config schema (that belongs to `mod.rs`)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::OrchestratorConfig;
use crate::provider::ProviderId;

/// Environment variable overriding `orchestration.routing_strategy`.
pub const ROUTING_STRATEGY_ENV: &str = "ORCH_ROUTING_STRATEGY";

/// Load an [`OrchestratorConfig`] from a TOML file.
///
/// # Returns
///
/// - `Ok(OrchestratorConfig)` if the file is readable, well-formed, and valid.
/// - `Err(ConfigError::Io)` if the file cannot be read.
/// - `Err(ConfigError::Parse)` if the TOML is malformed.
/// - `Err(ConfigError::Validation)` if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_file(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load an [`OrchestratorConfig`] from a TOML string, overlaying the
/// process environment.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<OrchestratorConfig, ConfigError> {
    load_with_env(content, source_name, |key| std::env::var(key).ok())
}

/// Load from a TOML string with an explicit environment lookup.
///
/// Split out from [`load_from_str`] so tests never touch the real process
/// environment.
///
/// # Panics
///
/// This function never panics.
pub fn load_with_env<F>(
    content: &str,
    source_name: &str,
    env: F,
) -> Result<OrchestratorConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: OrchestratorConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            file: source_name.to_string(),
            source: e,
        })?;

    apply_env_overrides(&mut config, env)?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

/// Fill missing API keys from `<PROVIDER>_API_KEY` variables and apply the
/// routing strategy override.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] if the routing strategy override
/// names an unknown strategy.
pub fn apply_env_overrides<F>(config: &mut OrchestratorConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for provider in ProviderId::ALL {
        if config.has_credentials(provider) {
            continue;
        }
        if let Some(key) = env(provider.api_key_env()).filter(|k| !k.trim().is_empty()) {
            config.providers.entry(provider).or_default().api_key = Some(key);
        }
    }

    if let Some(raw) = env(ROUTING_STRATEGY_ENV) {
        config.orchestration.routing_strategy =
            raw.parse().map_err(|_| ConfigError::InvalidField {
                field: ROUTING_STRATEGY_ENV.into(),
                value: raw.clone(),
                reason: "expected round_robin, load_balanced, random or priority".into(),
            })?;
    }

    Ok(())
}
