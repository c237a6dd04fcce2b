//! # dwa-orchestrator
//!
//! Routes a prompt to one of several interchangeable LLM providers, fans it
//! out concurrently when several are requested, and keeps adjusting routing
//! preference from observed provider performance.
//!
//! ## Architecture
//!
//! ```text
//! OrchestrationRequest
//!   → Registry (credentials, load caps)
//!   → DWA selection (policy-ranked shortlist)
//!   → Cache (per provider, non-streaming only)
//!   → concurrent ProviderWorker calls on misses
//!   → outcomes fed back to DWA + Registry
//!   → OrchestrationOutcome { successes, failures }
//! ```

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod dwa;
pub mod metrics;
pub mod provider;
pub mod registry;
pub mod routing;
pub mod worker;

// Re-exports for convenience
pub use cache::{CachedResponse, MemoryCache, ResponseCache};
pub use config::OrchestratorConfig;
pub use dispatcher::{DwaStatistics, OrchestrationHandle, Orchestrator};
pub use dwa::{DynamicWeightAlgorithm, ProviderMetrics, SelectionPolicy};
pub use provider::ProviderId;
pub use registry::{LoadGuard, ProviderRegistry};
pub use routing::RoutingStrategy;
pub use worker::{EchoWorker, ProviderReply, ProviderWorker, WorkerTable};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```no_run
/// # use dwa_orchestrator::{init_tracing, OrchestratorError};
/// # fn example() -> Result<(), OrchestratorError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), OrchestratorError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level orchestrator errors.
///
/// Only [`NoProvidersAvailable`](Self::NoProvidersAvailable) ever escapes
/// [`Orchestrator::orchestrate`]; the other variants describe a single
/// provider branch or collaborator and travel as data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    /// No provider has credentials and spare capacity.
    #[error("no LLM providers are configured or available")]
    NoProvidersAvailable,

    /// A provider call failed (network, API, or parsing error).
    #[error("{provider} call failed: {reason}")]
    ProviderCall {
        /// Provider whose call failed.
        provider: ProviderId,
        /// Human-readable cause.
        reason: String,
    },

    /// A provider call exceeded the configured request timeout.
    #[error("{provider} timed out after {after_ms}ms")]
    Timeout {
        /// Provider that timed out.
        provider: ProviderId,
        /// Timeout that elapsed.
        after_ms: u64,
    },

    /// A provider was full when its call was about to be admitted.
    #[error("{provider} is at its load cap of {max_load}")]
    AtCapacity {
        /// Provider that refused the call.
        provider: ProviderId,
        /// Cap in force at the time.
        max_load: u32,
    },

    /// The response cache could not be read or written.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// A prompt to route to one or more providers. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestrationRequest {
    /// Unique identifier used for trace correlation.
    pub request_id: String,
    /// The raw user-supplied prompt text.
    pub prompt: String,
    /// Providers the caller would like to use. Empty means "any".
    pub providers: Vec<ProviderId>,
    /// Upper bound on generated tokens, passed through to workers.
    pub max_tokens: Option<u32>,
    /// Streaming requests bypass the response cache.
    pub stream: bool,
}

impl OrchestrationRequest {
    /// Non-streaming request with a fresh UUID and no token hint.
    pub fn new(prompt: impl Into<String>, providers: Vec<ProviderId>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            providers,
            max_tokens: None,
            stream: false,
        }
    }

    /// Set the token hint.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Mark the request as streaming.
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// One provider's successful answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSuccess {
    /// Provider that answered.
    pub provider: ProviderId,
    /// Response text.
    pub response: String,
    /// Wall-clock latency of the call (or of the original call for cache hits).
    pub latency: Duration,
    /// Tokens reported or estimated for the call.
    pub tokens_used: f64,
    /// Model the request resolved to.
    pub model: String,
    /// True when served from the response cache.
    pub cached: bool,
}

/// One provider's failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderFailure {
    /// Provider that failed.
    pub provider: ProviderId,
    /// Error description.
    pub error: String,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
}

/// Result of one orchestration: successes and failures, each in completion
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrchestrationOutcome {
    /// Providers that answered.
    pub successes: Vec<ProviderSuccess>,
    /// Providers that failed.
    pub failures: Vec<ProviderFailure>,
}

impl OrchestrationOutcome {
    /// True when at least one provider answered.
    pub fn has_success(&self) -> bool {
        !self.successes.is_empty()
    }
}
