//! # Stage: Declarative Orchestrator Configuration
//!
//! ## Responsibility
//! Parse, validate, and hot-reload TOML orchestrator configuration files:
//! provider credentials and load caps, DWA tuning, selection policy, cache
//! settings and observability.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `OrchestratorConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Total: every section and field has a documented default, so an empty
//!   file is a valid configuration
//! - Hot-reloadable: file changes are detected and validated before applying
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Applying a config to a running orchestrator (that belongs to `dispatcher`)
//! - Talking to providers (that belongs to `worker`)

pub mod loader;
pub mod validation;
pub mod watcher;

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dwa::SelectionPolicy;
use crate::provider::ProviderId;
use crate::routing::RoutingStrategy;

// ── Default value functions ──────────────────────────────────────────────

fn default_max_concurrent_requests() -> u32 {
    5
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_fanout() -> usize {
    3
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_availability_floor() -> f64 {
    0.1
}

fn default_validation_floor() -> f64 {
    0.1
}

fn default_success_step() -> f64 {
    0.05
}

fn default_failure_step() -> f64 {
    0.15
}

fn default_accuracy_alpha() -> f64 {
    0.2
}

fn default_latency_alpha() -> f64 {
    0.3
}

fn default_reference_latency_ms() -> f64 {
    1000.0
}

fn default_initial_accuracy() -> f64 {
    1.0
}

fn default_priority_order() -> Vec<ProviderId> {
    ProviderId::ALL.to_vec()
}

fn default_cache_ttl_s() -> u64 {
    3600
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for an orchestrator instance.
///
/// # Example
///
/// ```toml
/// [orchestration]
/// max_concurrent_requests = 8
/// routing_strategy = "priority"
///
/// [dwa]
/// policy = "max_accuracy"
///
/// [providers.open_ai]
/// api_key = "sk-..."
/// model = "gpt-4o"
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OrchestratorConfig {
    /// Fan-out, timeouts and the non-DWA routing strategy.
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    /// Dynamic weight algorithm tuning.
    #[serde(default)]
    pub dwa: DwaConfig,
    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Per-provider credentials, models, load caps and pricing.
    #[serde(default)]
    pub providers: BTreeMap<ProviderId, ProviderConfig>,
    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl OrchestratorConfig {
    /// Settings for `provider`, falling back to an empty entry.
    pub fn provider(&self, provider: ProviderId) -> ProviderConfig {
        self.providers.get(&provider).cloned().unwrap_or_default()
    }

    /// Model name that requests to `provider` resolve to.
    pub fn model_for(&self, provider: ProviderId) -> String {
        self.providers
            .get(&provider)
            .and_then(|p| p.model.clone())
            .unwrap_or_else(|| provider.default_model().to_string())
    }

    /// Whether `provider` has a non-empty API key configured.
    pub fn has_credentials(&self, provider: ProviderId) -> bool {
        self.providers
            .get(&provider)
            .and_then(|p| p.api_key.as_deref())
            .is_some_and(|k| !k.trim().is_empty())
    }

    /// Effective in-flight cap for `provider`.
    ///
    /// An explicit `max_load` wins; otherwise the global concurrency budget
    /// is split evenly across the known providers, never below one.
    pub fn max_load_for(&self, provider: ProviderId) -> u32 {
        self.providers
            .get(&provider)
            .and_then(|p| p.max_load)
            .unwrap_or_else(|| {
                (self.orchestration.max_concurrent_requests / ProviderId::ALL.len() as u32).max(1)
            })
    }
}

// ── Orchestration ────────────────────────────────────────────────────────

/// Dispatcher-level settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OrchestrationConfig {
    /// Global concurrency budget, split across providers for default load caps.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,
    /// Per-provider call timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Strategy used when the dynamic weight algorithm is disabled.
    #[serde(default)]
    pub routing_strategy: RoutingStrategy,
    /// Upper bound on providers dispatched for one multi-provider request.
    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_ms: default_request_timeout_ms(),
            routing_strategy: RoutingStrategy::default(),
            max_fanout: default_max_fanout(),
        }
    }
}

// ── DWA ──────────────────────────────────────────────────────────────────

/// Dynamic weight algorithm settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DwaConfig {
    /// When false, the dispatcher falls back to `orchestration.routing_strategy`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ranking rule applied by `select_best_provider`.
    #[serde(default)]
    pub policy: SelectionPolicy,
    /// Weights of the built-in composite score.
    #[serde(default)]
    pub weights: CompositeWeights,
    /// Consecutive failures after which a provider is marked unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Availability below which a failing provider is marked unhealthy.
    #[serde(default = "default_availability_floor")]
    pub availability_floor: f64,
    /// Availability a single explicitly requested provider must exceed.
    #[serde(default = "default_validation_floor")]
    pub validation_floor: f64,
    /// Availability gained per success.
    #[serde(default = "default_success_step")]
    pub success_step: f64,
    /// Availability lost per failure. Must exceed `success_step`.
    #[serde(default = "default_failure_step")]
    pub failure_step: f64,
    /// Smoothing factor of the accuracy moving average.
    #[serde(default = "default_accuracy_alpha")]
    pub accuracy_alpha: f64,
    /// Smoothing factor of the response-time moving average.
    #[serde(default = "default_latency_alpha")]
    pub latency_alpha: f64,
    /// Latency (ms) at which the speed score equals 0.5.
    #[serde(default = "default_reference_latency_ms")]
    pub reference_latency_ms: f64,
    /// Accuracy assigned to a fresh or reset provider.
    #[serde(default = "default_initial_accuracy")]
    pub initial_accuracy: f64,
    /// Static order used by the `priority` policy.
    #[serde(default = "default_priority_order")]
    pub priority_order: Vec<ProviderId>,
}

impl Default for DwaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: SelectionPolicy::default(),
            weights: CompositeWeights::default(),
            failure_threshold: default_failure_threshold(),
            availability_floor: default_availability_floor(),
            validation_floor: default_validation_floor(),
            success_step: default_success_step(),
            failure_step: default_failure_step(),
            accuracy_alpha: default_accuracy_alpha(),
            latency_alpha: default_latency_alpha(),
            reference_latency_ms: default_reference_latency_ms(),
            initial_accuracy: default_initial_accuracy(),
            priority_order: default_priority_order(),
        }
    }
}

/// Weights of the built-in composite score. Must sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CompositeWeights {
    /// Weight of the accuracy term.
    pub accuracy: f64,
    /// Weight of the speed term.
    pub speed: f64,
    /// Weight of the availability term.
    pub availability: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.4,
            speed: 0.3,
            availability: 0.3,
        }
    }
}

// ── Cache ────────────────────────────────────────────────────────────────

/// Response cache settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CacheConfig {
    /// Whether responses are cached at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Entry time-to-live in seconds.
    #[serde(default = "default_cache_ttl_s")]
    pub ttl_s: u64,
    /// Capacity of the in-memory backend.
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    /// Redis connection URL. Only honoured with the `caching` feature.
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_s: default_cache_ttl_s(),
            max_entries: default_cache_max_entries(),
            redis_url: None,
        }
    }
}

// ── Providers ────────────────────────────────────────────────────────────

/// Per-provider settings. Every field is optional.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProviderConfig {
    /// API key. A provider without one is never eligible.
    pub api_key: Option<String>,
    /// Model name; defaults to [`ProviderId::default_model`].
    pub model: Option<String>,
    /// In-flight cap overriding the evenly split global budget.
    pub max_load: Option<u32>,
    /// Estimated USD cost per 1 000 tokens, used for cost accounting.
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
}

// ── Observability ────────────────────────────────────────────────────────

/// Observability configuration.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Whether the Prometheus registry is initialised at startup.
    #[serde(default)]
    pub metrics_enabled: bool,
}

/// Log output format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    #[default]
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

impl LogFormat {
    /// Value understood by [`crate::init_tracing`] via `LOG_FORMAT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

/// Export the JSON Schema for `OrchestratorConfig`.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(OrchestratorConfig);
    serde_json::to_string_pretty(&schema)
}
