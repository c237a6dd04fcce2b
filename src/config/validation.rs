//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`OrchestratorConfig`] that
//! cannot be expressed through the type system alone (range checks,
//! cross-field invariants such as "failures cost more than successes earn").
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use std::collections::HashSet;

use super::OrchestratorConfig;
use crate::provider::ProviderId;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "dwa.failure_step").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn check_unit_interval(errors: &mut Vec<ConfigError>, field: &str, v: f64) {
    if !(0.0..=1.0).contains(&v) {
        errors.push(invalid(field, v, "must be between 0.0 and 1.0"));
    }
}

fn check_open_unit_interval(errors: &mut Vec<ConfigError>, field: &str, v: f64) {
    if !(v > 0.0 && v <= 1.0) {
        errors.push(invalid(field, v, "must be in (0.0, 1.0]"));
    }
}

/// Validate all semantic constraints on an [`OrchestratorConfig`].
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &OrchestratorConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Orchestration ────────────────────────────────────────────────
    let orch = &config.orchestration;
    if orch.max_concurrent_requests == 0 {
        errors.push(invalid(
            "orchestration.max_concurrent_requests",
            0,
            "must be at least 1",
        ));
    }
    if orch.request_timeout_ms == 0 {
        errors.push(invalid(
            "orchestration.request_timeout_ms",
            0,
            "must be at least 1ms",
        ));
    }
    if orch.max_fanout == 0 || orch.max_fanout > ProviderId::ALL.len() {
        errors.push(invalid(
            "orchestration.max_fanout",
            orch.max_fanout,
            "must be between 1 and the number of known providers",
        ));
    }

    // ── DWA ──────────────────────────────────────────────────────────
    let dwa = &config.dwa;
    let w = &dwa.weights;
    check_unit_interval(&mut errors, "dwa.weights.accuracy", w.accuracy);
    check_unit_interval(&mut errors, "dwa.weights.speed", w.speed);
    check_unit_interval(&mut errors, "dwa.weights.availability", w.availability);
    let sum = w.accuracy + w.speed + w.availability;
    if (sum - 1.0).abs() > 1e-6 {
        errors.push(invalid("dwa.weights", sum, "weights must sum to 1.0"));
    }

    if dwa.failure_threshold == 0 {
        errors.push(invalid("dwa.failure_threshold", 0, "must be at least 1"));
    }
    if !(0.0..1.0).contains(&dwa.availability_floor) {
        errors.push(invalid(
            "dwa.availability_floor",
            dwa.availability_floor,
            "must be in [0.0, 1.0)",
        ));
    }
    if !(0.0..1.0).contains(&dwa.validation_floor) {
        errors.push(invalid(
            "dwa.validation_floor",
            dwa.validation_floor,
            "must be in [0.0, 1.0)",
        ));
    }
    check_open_unit_interval(&mut errors, "dwa.success_step", dwa.success_step);
    check_open_unit_interval(&mut errors, "dwa.failure_step", dwa.failure_step);
    if dwa.failure_step <= dwa.success_step {
        errors.push(invalid(
            "dwa.failure_step",
            dwa.failure_step,
            "must be greater than dwa.success_step",
        ));
    }
    check_open_unit_interval(&mut errors, "dwa.accuracy_alpha", dwa.accuracy_alpha);
    check_open_unit_interval(&mut errors, "dwa.latency_alpha", dwa.latency_alpha);
    if dwa.reference_latency_ms <= 0.0 || !dwa.reference_latency_ms.is_finite() {
        errors.push(invalid(
            "dwa.reference_latency_ms",
            dwa.reference_latency_ms,
            "must be a positive number",
        ));
    }
    check_unit_interval(&mut errors, "dwa.initial_accuracy", dwa.initial_accuracy);

    if dwa.priority_order.is_empty() {
        errors.push(invalid(
            "dwa.priority_order",
            "[]",
            "must name at least one provider",
        ));
    }
    let mut seen = HashSet::new();
    for p in &dwa.priority_order {
        if !seen.insert(*p) {
            errors.push(invalid(
                "dwa.priority_order",
                p,
                "provider listed more than once",
            ));
        }
    }

    // ── Cache ────────────────────────────────────────────────────────
    if config.cache.enabled && config.cache.ttl_s == 0 {
        errors.push(invalid(
            "cache.ttl_s",
            0,
            "must be at least 1 second when the cache is enabled",
        ));
    }
    if let Some(url) = &config.cache.redis_url {
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            errors.push(invalid(
                "cache.redis_url",
                url,
                "must start with redis:// or rediss://",
            ));
        }
    }

    // ── Providers ────────────────────────────────────────────────────
    for (id, p) in &config.providers {
        if p.max_load == Some(0) {
            errors.push(invalid(
                &format!("providers.{id}.max_load"),
                0,
                "must be at least 1",
            ));
        }
        if p.cost_per_1k_tokens < 0.0 {
            errors.push(invalid(
                &format!("providers.{id}.cost_per_1k_tokens"),
                p.cost_per_1k_tokens,
                "must be >= 0",
            ));
        }
        if p.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            errors.push(invalid(
                &format!("providers.{id}.model"),
                "",
                "model name must not be empty",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn field_errors(config: &OrchestratorConfig) -> Vec<String> {
        match validate(config) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .into_iter()
                .filter_map(|e| match e {
                    ConfigError::InvalidField { field, .. } => Some(field),
                    _ => None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&OrchestratorConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.orchestration.max_concurrent_requests = 0;
        assert!(field_errors(&cfg).contains(&"orchestration.max_concurrent_requests".into()));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.orchestration.request_timeout_ms = 0;
        assert!(field_errors(&cfg).contains(&"orchestration.request_timeout_ms".into()));
    }

    #[test]
    fn test_fanout_out_of_range_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.orchestration.max_fanout = 0;
        assert!(field_errors(&cfg).contains(&"orchestration.max_fanout".into()));
        cfg.orchestration.max_fanout = 5;
        assert!(field_errors(&cfg).contains(&"orchestration.max_fanout".into()));
    }

    #[test]
    fn test_weights_not_summing_to_one_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.dwa.weights.accuracy = 0.9;
        assert!(field_errors(&cfg).contains(&"dwa.weights".into()));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.dwa.weights.accuracy = -0.1;
        cfg.dwa.weights.speed = 0.8;
        assert!(field_errors(&cfg).contains(&"dwa.weights.accuracy".into()));
    }

    #[test]
    fn test_zero_failure_threshold_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.dwa.failure_threshold = 0;
        assert!(field_errors(&cfg).contains(&"dwa.failure_threshold".into()));
    }

    #[test]
    fn test_floors_must_be_below_one() {
        let mut cfg = OrchestratorConfig::default();
        cfg.dwa.availability_floor = 1.0;
        cfg.dwa.validation_floor = -0.5;
        let errs = field_errors(&cfg);
        assert!(errs.contains(&"dwa.availability_floor".into()));
        assert!(errs.contains(&"dwa.validation_floor".into()));
    }

    #[test]
    fn test_failure_step_must_exceed_success_step() {
        let mut cfg = OrchestratorConfig::default();
        cfg.dwa.success_step = 0.2;
        cfg.dwa.failure_step = 0.1;
        assert!(field_errors(&cfg).contains(&"dwa.failure_step".into()));
    }

    #[test]
    fn test_step_out_of_range_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.dwa.success_step = 0.0;
        assert!(field_errors(&cfg).contains(&"dwa.success_step".into()));
    }

    #[test]
    fn test_alphas_must_be_in_open_unit_interval() {
        let mut cfg = OrchestratorConfig::default();
        cfg.dwa.accuracy_alpha = 0.0;
        cfg.dwa.latency_alpha = 1.5;
        let errs = field_errors(&cfg);
        assert!(errs.contains(&"dwa.accuracy_alpha".into()));
        assert!(errs.contains(&"dwa.latency_alpha".into()));
    }

    #[test]
    fn test_reference_latency_must_be_positive() {
        let mut cfg = OrchestratorConfig::default();
        cfg.dwa.reference_latency_ms = 0.0;
        assert!(field_errors(&cfg).contains(&"dwa.reference_latency_ms".into()));
    }

    #[test]
    fn test_initial_accuracy_out_of_range_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.dwa.initial_accuracy = 1.2;
        assert!(field_errors(&cfg).contains(&"dwa.initial_accuracy".into()));
    }

    #[test]
    fn test_empty_priority_order_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.dwa.priority_order.clear();
        assert!(field_errors(&cfg).contains(&"dwa.priority_order".into()));
    }

    #[test]
    fn test_duplicate_priority_entry_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.dwa.priority_order = vec![ProviderId::Grok, ProviderId::Grok];
        assert!(field_errors(&cfg).contains(&"dwa.priority_order".into()));
    }

    #[test]
    fn test_zero_ttl_rejected_only_when_cache_enabled() {
        let mut cfg = OrchestratorConfig::default();
        cfg.cache.ttl_s = 0;
        assert!(field_errors(&cfg).contains(&"cache.ttl_s".into()));
        cfg.cache.enabled = false;
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_bad_redis_url_rejected() {
        let mut cfg = OrchestratorConfig::default();
        cfg.cache.redis_url = Some("http://localhost:6379".into());
        assert!(field_errors(&cfg).contains(&"cache.redis_url".into()));
    }

    #[test]
    fn test_provider_fields_validated() {
        let mut cfg = OrchestratorConfig::default();
        cfg.providers.insert(
            ProviderId::Gemini,
            ProviderConfig {
                api_key: Some("k".into()),
                model: Some(" ".into()),
                max_load: Some(0),
                cost_per_1k_tokens: -1.0,
            },
        );
        let errs = field_errors(&cfg);
        assert!(errs.contains(&"providers.gemini.max_load".into()));
        assert!(errs.contains(&"providers.gemini.model".into()));
        assert!(errs.contains(&"providers.gemini.cost_per_1k_tokens".into()));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut cfg = OrchestratorConfig::default();
        cfg.orchestration.max_concurrent_requests = 0;
        cfg.dwa.failure_threshold = 0;
        cfg.cache.ttl_s = 0;
        assert!(field_errors(&cfg).len() >= 3);
    }

    #[test]
    fn test_config_error_display_includes_field() {
        let err = invalid("dwa.success_step", 0, "must be in (0.0, 1.0]");
        assert!(err.to_string().contains("dwa.success_step"));
    }
}
