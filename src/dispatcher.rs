//! # Stage: Orchestration Dispatcher
//!
//! ## Responsibility
//! Resolve which providers serve a request, consult the response cache, fan
//! the remaining calls out concurrently, feed every outcome back into the
//! [`DynamicWeightAlgorithm`] and the [`ProviderRegistry`], and hand the
//! caller one [`OrchestrationOutcome`].
//!
//! ## Guarantees
//! - Join-all: `orchestrate` returns only after every dispatched call has
//!   finished; no first-result short-circuit.
//! - Isolation: each provider call runs in its own task. An error, timeout
//!   or panic in one branch becomes a failure entry and never touches its
//!   siblings.
//! - No leaked load: admission is held by a [`LoadGuard`](crate::LoadGuard)
//!   inside the task, so it is returned even when the caller stops awaiting.
//! - Cache hits are not performance signal: they reach neither the DWA nor
//!   the registry.
//! - Only [`OrchestratorError::NoProvidersAvailable`] escapes `orchestrate`.
//!
//! ## NOT Responsible For
//! - Retrying a failed call (the next selection simply ranks it lower)
//! - Transport: the embedding application owns HTTP and real clients

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

use crate::cache::{build_cache, cache_key, CachedResponse, ResponseCache};
use crate::config::{validation, OrchestratorConfig};
use crate::dwa::{DynamicWeightAlgorithm, ProviderMetrics, SelectionPolicy};
use crate::metrics::{self, CacheLookup};
use crate::provider::ProviderId;
use crate::registry::{ProviderLoadSnapshot, ProviderRegistry};
use crate::routing::{RoutingStrategy, StrategyRouter};
use crate::worker::{ProviderReply, ProviderWorker, WorkerTable};
use crate::{
    OrchestrationOutcome, OrchestrationRequest, OrchestratorError, ProviderFailure, ProviderSuccess,
};

/// Lifecycle of one dispatched provider call.
///
/// `Pending → Admitted → InFlight → {Succeeded | Failed}`. A cache hit goes
/// straight from `Pending` to `Succeeded`; a call refused at the load cap
/// goes straight from `Pending` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Selected, not yet admitted.
    Pending,
    /// Load admitted with the registry.
    Admitted,
    /// Provider call running.
    InFlight,
    /// Answered (live or from cache).
    Succeeded,
    /// Errored, timed out, panicked or refused at the cap.
    Failed,
}

impl DispatchState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance(self, next: DispatchState) -> bool {
        use DispatchState::*;
        matches!(
            (self, next),
            (Pending, Admitted)
                | (Pending, Succeeded)
                | (Pending, Failed)
                | (Admitted, InFlight)
                | (Admitted, Failed)
                | (InFlight, Succeeded)
                | (InFlight, Failed)
        )
    }

    /// Terminal states have no successor.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Admitted => "admitted",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-provider view in [`DwaStatistics`].
#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    /// Raw DWA metrics.
    #[serde(flatten)]
    pub metrics: ProviderMetrics,
    /// Score under the weighted composite policy.
    pub composite_score: f64,
    /// `successful_requests / total_requests`.
    pub success_rate: f64,
    /// Calls currently in flight.
    pub current_load: u32,
    /// Admission cap.
    pub max_load: u32,
    /// Whether an API key is configured.
    pub has_credentials: bool,
}

/// Snapshot returned by [`Orchestrator::dwa_statistics`].
#[derive(Debug, Clone, Serialize)]
pub struct DwaStatistics {
    /// Per-provider report keyed by provider name.
    pub provider_stats: BTreeMap<String, ProviderReport>,
    /// Active DWA policy.
    pub selection_policy: SelectionPolicy,
    /// Strategy used when the DWA is disabled.
    pub routing_strategy: RoutingStrategy,
    /// Whether selection goes through the DWA.
    pub dwa_enabled: bool,
    /// Providers currently marked healthy.
    pub active_provider_count: usize,
    /// Every known provider.
    pub total_provider_count: usize,
}

/// Routes prompts across providers.
///
/// Cheap to clone: every field is shared. Clones observe the same metrics,
/// loads and configuration.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    dwa: Arc<DynamicWeightAlgorithm>,
    router: Arc<StrategyRouter>,
    workers: WorkerTable,
    cache: Option<Arc<dyn ResponseCache>>,
    config: Arc<RwLock<Arc<OrchestratorConfig>>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("dwa", &self.dwa)
            .field("router", &self.router)
            .field("workers", &self.workers)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator with fresh registry and DWA state and no cache.
    pub fn new(config: OrchestratorConfig, workers: WorkerTable) -> Self {
        let registry = Arc::new(ProviderRegistry::from_config(&config));
        let dwa = Arc::new(DynamicWeightAlgorithm::from_config(&config));
        Self::with_state(config, registry, dwa, workers)
    }

    /// Build an orchestrator over injected registry and DWA state.
    pub fn with_state(
        config: OrchestratorConfig,
        registry: Arc<ProviderRegistry>,
        dwa: Arc<DynamicWeightAlgorithm>,
        workers: WorkerTable,
    ) -> Self {
        let router = Arc::new(StrategyRouter::new(config.orchestration.routing_strategy));
        Self {
            registry,
            dwa,
            router,
            workers,
            cache: None,
            config: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Build an orchestrator and the cache its configuration describes.
    pub async fn from_config(config: OrchestratorConfig, workers: WorkerTable) -> Self {
        let cache = build_cache(&config.cache).await;
        let mut orchestrator = Self::new(config, workers);
        orchestrator.cache = cache;
        orchestrator
    }

    /// Attach a response cache.
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Shared load registry.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Shared dynamic weight algorithm.
    pub fn dwa(&self) -> &Arc<DynamicWeightAlgorithm> {
        &self.dwa
    }

    /// Configuration currently in effect.
    pub fn config(&self) -> Arc<OrchestratorConfig> {
        Arc::clone(&self.config.read())
    }

    /// Route `request` and wait for every dispatched provider.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NoProvidersAvailable`] when no provider
    /// has credentials and spare capacity. Every per-provider problem is
    /// reported inside the returned outcome instead.
    pub async fn orchestrate(
        &self,
        request: OrchestrationRequest,
    ) -> Result<OrchestrationOutcome, OrchestratorError> {
        let span = tracing::info_span!("orchestrate", request_id = %request.request_id);
        self.run(Arc::new(request)).instrument(span).await
    }

    /// Run `request` on a background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(&self, request: OrchestrationRequest) -> OrchestrationHandle {
        let request_id = request.request_id.clone();
        let this = self.clone();
        let task = tokio::spawn(async move { this.orchestrate(request).await });
        OrchestrationHandle { request_id, task }
    }

    async fn run(
        &self,
        request: Arc<OrchestrationRequest>,
    ) -> Result<OrchestrationOutcome, OrchestratorError> {
        let config = self.config();
        let candidates = self.resolve_candidates(&request.providers)?;
        let shortlist = self.shortlist(&request.providers, &candidates, &config);

        tracing::info!(
            requested = request.providers.len(),
            ?candidates,
            ?shortlist,
            stream = request.stream,
            "orchestrating"
        );

        let timeout = Duration::from_millis(config.orchestration.request_timeout_ms);
        let mut pending: FuturesUnordered<_> = shortlist
            .iter()
            .map(|&provider| {
                let unit = Unit {
                    provider,
                    model: config.model_for(provider),
                    request: Arc::clone(&request),
                    registry: Arc::clone(&self.registry),
                    dwa: Arc::clone(&self.dwa),
                    worker: self.workers.get(provider),
                    cache: self.cache.clone(),
                    timeout,
                    state: DispatchState::Pending,
                };
                let started = Instant::now();
                let task = tokio::spawn(unit.run().in_current_span());
                async move { (provider, started, task.await) }
            })
            .collect();

        let mut outcome = OrchestrationOutcome::default();
        while let Some((provider, started, joined)) = pending.next().await {
            match joined {
                Ok(UnitOutcome::Succeeded(success)) => outcome.successes.push(success),
                Ok(UnitOutcome::Failed(failure)) => outcome.failures.push(failure),
                Err(e) => outcome
                    .failures
                    .push(self.record_crash(provider, started.elapsed(), &e)),
            }
        }

        self.write_back(&request, &outcome, &config).await;

        tracing::info!(
            successes = outcome.successes.len(),
            failures = outcome.failures.len(),
            "orchestration finished"
        );
        Ok(outcome)
    }

    /// Requested ∩ eligible, else every eligible provider.
    fn resolve_candidates(
        &self,
        requested: &[ProviderId],
    ) -> Result<Vec<ProviderId>, OrchestratorError> {
        let eligible = self.registry.eligible_providers();
        let preferred: Vec<ProviderId> = eligible
            .iter()
            .copied()
            .filter(|p| requested.contains(p))
            .collect();
        if !preferred.is_empty() {
            return Ok(preferred);
        }
        if eligible.is_empty() {
            tracing::warn!("no providers are configured or below their load cap");
            return Err(OrchestratorError::NoProvidersAvailable);
        }
        if !requested.is_empty() {
            tracing::debug!(?requested, "requested providers unavailable, falling back");
        }
        Ok(eligible)
    }

    fn shortlist(
        &self,
        requested: &[ProviderId],
        candidates: &[ProviderId],
        config: &OrchestratorConfig,
    ) -> Vec<ProviderId> {
        if !config.dwa.enabled {
            return self
                .router
                .select(candidates, |p| self.registry.current_load(p))
                .into_iter()
                .collect();
        }

        let distinct = distinct_count(requested);

        if distinct == 1 && candidates.contains(&requested[0]) {
            let wanted = requested[0];
            if self.dwa.is_viable(wanted) {
                return vec![wanted];
            }
            let pool = self.registry.eligible_providers();
            if let Some(substitute) = self.dwa.select_among(&pool, &[wanted]) {
                metrics::record_selection(substitute);
                tracing::info!(
                    requested = %wanted,
                    substitute = %substitute,
                    "requested provider below availability floor, substituting"
                );
                return vec![substitute];
            }
            return self.recovery_probe(&pool);
        }

        let fanout = distinct.clamp(1, config.orchestration.max_fanout.max(1));
        let mut chosen = Vec::with_capacity(fanout);
        while chosen.len() < fanout {
            match self.dwa.select_among(candidates, &chosen) {
                Some(p) => chosen.push(p),
                None => break,
            }
        }
        if chosen.is_empty() {
            return self.recovery_probe(candidates);
        }
        for p in &chosen {
            metrics::record_selection(*p);
        }
        chosen
    }

    /// One call to the candidate whose metrics are stalest, so an unhealthy
    /// provider can earn the success that restores it.
    fn recovery_probe(&self, pool: &[ProviderId]) -> Vec<ProviderId> {
        let probe = self.dwa.least_recently_updated(pool);
        if let Some(p) = probe {
            metrics::record_selection(p);
            tracing::info!(provider = %p, "no healthy provider, dispatching recovery probe");
        }
        probe.into_iter().collect()
    }

    fn record_crash(
        &self,
        provider: ProviderId,
        elapsed: Duration,
        error: &JoinError,
    ) -> ProviderFailure {
        let reason = if error.is_panic() {
            "provider task panicked"
        } else {
            "provider task cancelled"
        };
        let err = OrchestratorError::ProviderCall {
            provider,
            reason: reason.to_string(),
        };
        let message = err.to_string();
        self.dwa
            .record_request_result(provider, false, elapsed, Some(&message), None);
        self.registry.record_outcome(provider, false, elapsed);
        metrics::record_provider_outcome(provider, false, elapsed);
        tracing::error!(provider = %provider, error = %message, "provider task crashed");
        ProviderFailure {
            provider,
            error: message,
            timestamp: Utc::now(),
        }
    }

    /// Best-effort write of fresh, non-streaming successes.
    async fn write_back(
        &self,
        request: &OrchestrationRequest,
        outcome: &OrchestrationOutcome,
        config: &OrchestratorConfig,
    ) {
        if request.stream {
            return;
        }
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let ttl = config.cache.ttl_s;

        let writes = outcome.successes.iter().filter(|s| !s.cached).filter_map(|s| {
            let entry = CachedResponse {
                response: s.response.clone(),
                provider: s.provider,
                model: s.model.clone(),
                tokens_used: s.tokens_used,
                response_time: s.latency.as_secs_f64(),
                cached_at: Utc::now(),
            };
            let value = match serde_json::to_string(&entry) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(provider = %s.provider, error = %e, "cache entry not encodable");
                    return None;
                }
            };
            let key = cache_key(&request.prompt, s.provider, &s.model);
            let cache = Arc::clone(cache);
            let provider = s.provider;
            Some(async move {
                if !cache.set(&key, &value, ttl).await {
                    tracing::warn!(provider = %provider, key = %key, "cache write failed");
                }
            })
        });
        futures::future::join_all(writes).await;
    }

    /// Metrics, policy and health summary across every provider.
    pub fn dwa_statistics(&self) -> DwaStatistics {
        let config = self.config();
        let provider_stats = ProviderId::ALL
            .into_iter()
            .map(|p| {
                let metrics = self.dwa.metrics(p);
                let report = ProviderReport {
                    composite_score: self.dwa.composite_score(p),
                    success_rate: metrics.success_rate(),
                    current_load: self.registry.current_load(p),
                    max_load: self.registry.max_load(p),
                    has_credentials: self.registry.has_credentials(p),
                    metrics,
                };
                (p.as_str().to_string(), report)
            })
            .collect();

        DwaStatistics {
            provider_stats,
            selection_policy: self.dwa.policy(),
            routing_strategy: self.router.strategy(),
            dwa_enabled: config.dwa.enabled,
            active_provider_count: self.dwa.active_providers().len(),
            total_provider_count: ProviderId::ALL.len(),
        }
    }

    /// Reset DWA metrics for `provider`, or for every provider when `None`.
    pub fn reset_dwa_metrics(&self, provider: Option<ProviderId>) {
        self.dwa.reset_provider_metrics(provider);
    }

    /// Provider the DWA would pick right now, ignoring load.
    pub fn select_best_provider(&self) -> Option<ProviderId> {
        self.dwa.select_best_provider(&[])
    }

    /// Load accounting for every provider.
    pub fn provider_stats(&self) -> BTreeMap<String, ProviderLoadSnapshot> {
        self.registry.provider_stats()
    }

    /// Apply a reloaded configuration.
    ///
    /// Updates credentials, load caps, DWA tuning and policy, the routing
    /// strategy, timeouts and fan-out. Metrics and in-flight work are kept.
    /// Cache backend changes need a restart.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] if `config` fails
    /// validation; nothing is applied in that case.
    pub fn apply_config(&self, config: OrchestratorConfig) -> Result<(), OrchestratorError> {
        if let Err(errors) = validation::validate(&config) {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(OrchestratorError::ConfigError(joined));
        }

        self.registry.apply_config(&config);
        self.dwa.configure(&config);
        self.router.set_strategy(config.orchestration.routing_strategy);
        tracing::info!(
            policy = %config.dwa.policy,
            strategy = %config.orchestration.routing_strategy,
            dwa_enabled = config.dwa.enabled,
            "configuration applied"
        );
        *self.config.write() = Arc::new(config);
        Ok(())
    }

    /// Apply every config broadcast on `updates` until the sender closes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn follow_config(
        &self,
        mut updates: broadcast::Receiver<Arc<OrchestratorConfig>>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(config) => {
                        if let Err(e) = this.apply_config((*config).clone()) {
                            tracing::warn!(error = %e, "config update rejected");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "config updates lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn distinct_count(providers: &[ProviderId]) -> usize {
    ProviderId::ALL
        .iter()
        .filter(|p| providers.contains(p))
        .count()
}

/// Background orchestration started by [`Orchestrator::spawn`].
///
/// Await it with [`join`](Self::join) or let it run to completion on its own
/// with [`detach`](Self::detach). Either way every provider outcome still
/// reaches the DWA and the registry.
#[derive(Debug)]
pub struct OrchestrationHandle {
    request_id: String,
    task: JoinHandle<Result<OrchestrationOutcome, OrchestratorError>>,
}

impl OrchestrationHandle {
    /// Request this handle belongs to.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Whether the orchestration has completed.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the outcome.
    ///
    /// # Errors
    ///
    /// The orchestration's own error, or [`OrchestratorError::Other`] if the
    /// background task itself was cancelled or panicked.
    pub async fn join(self) -> Result<OrchestrationOutcome, OrchestratorError> {
        self.task
            .await
            .map_err(|e| OrchestratorError::Other(format!("orchestration task failed: {e}")))?
    }

    /// Stop tracking the orchestration and let it finish in the background.
    pub fn detach(self) {
        tracing::debug!(request_id = %self.request_id, "orchestration detached");
    }
}

// ── Per-provider unit ──────────────────────────────────────────────────────

enum UnitOutcome {
    Succeeded(ProviderSuccess),
    Failed(ProviderFailure),
}

struct Unit {
    provider: ProviderId,
    model: String,
    request: Arc<OrchestrationRequest>,
    registry: Arc<ProviderRegistry>,
    dwa: Arc<DynamicWeightAlgorithm>,
    worker: Option<Arc<dyn ProviderWorker>>,
    cache: Option<Arc<dyn ResponseCache>>,
    timeout: Duration,
    state: DispatchState,
}

impl Unit {
    fn advance(&mut self, next: DispatchState) {
        if !self.state.can_advance(next) {
            tracing::error!(provider = %self.provider, from = %self.state, to = %next, "illegal dispatch transition");
        }
        tracing::trace!(provider = %self.provider, from = %self.state, to = %next, "dispatch state");
        self.state = next;
    }

    async fn run(mut self) -> UnitOutcome {
        if let Some(hit) = self.lookup_cache().await {
            self.advance(DispatchState::Succeeded);
            return UnitOutcome::Succeeded(hit);
        }

        let Some(guard) = self.registry.try_admit(self.provider) else {
            return self.refuse();
        };
        self.advance(DispatchState::Admitted);

        let Some(worker) = self.worker.clone() else {
            drop(guard);
            let err = OrchestratorError::ProviderCall {
                provider: self.provider,
                reason: "no worker registered".to_string(),
            };
            return self.fail(Duration::ZERO, &err);
        };

        self.advance(DispatchState::InFlight);
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.timeout,
            worker.call(self.provider, &self.model, &self.request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Timeout {
                provider: self.provider,
                after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        let elapsed = started.elapsed();
        drop(guard);

        match result {
            Ok(reply) => self.succeed(elapsed, reply),
            Err(e) => self.fail(elapsed, &e),
        }
    }

    async fn lookup_cache(&self) -> Option<ProviderSuccess> {
        if self.request.stream {
            return None;
        }
        let cache = self.cache.as_ref()?;
        let key = cache_key(&self.request.prompt, self.provider, &self.model);

        match cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CachedResponse>(&raw) {
                Ok(entry) => {
                    metrics::record_cache_lookup(CacheLookup::Hit);
                    tracing::debug!(provider = %self.provider, key = %key, "cache hit");
                    Some(ProviderSuccess {
                        provider: self.provider,
                        response: entry.response,
                        latency: Duration::try_from_secs_f64(entry.response_time)
                            .unwrap_or_default(),
                        tokens_used: entry.tokens_used,
                        model: entry.model,
                        cached: true,
                    })
                }
                Err(e) => {
                    metrics::record_cache_lookup(CacheLookup::Miss);
                    tracing::warn!(key = %key, error = %e, "undecodable cache entry, treating as miss");
                    None
                }
            },
            Ok(None) => {
                metrics::record_cache_lookup(CacheLookup::Miss);
                tracing::debug!(provider = %self.provider, key = %key, "cache miss");
                None
            }
            Err(e) => {
                metrics::record_cache_lookup(CacheLookup::Error);
                tracing::warn!(provider = %self.provider, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    fn succeed(mut self, elapsed: Duration, reply: ProviderReply) -> UnitOutcome {
        let tokens = reply.tokens_or_estimate();
        self.dwa
            .record_request_result(self.provider, true, elapsed, None, Some(tokens));
        self.registry.record_outcome(self.provider, true, elapsed);
        metrics::record_provider_outcome(self.provider, true, elapsed);
        self.advance(DispatchState::Succeeded);
        tracing::debug!(
            provider = %self.provider,
            latency_ms = elapsed.as_millis() as u64,
            tokens,
            "provider answered"
        );
        UnitOutcome::Succeeded(ProviderSuccess {
            provider: self.provider,
            response: reply.text,
            latency: elapsed,
            tokens_used: tokens,
            model: self.model,
            cached: false,
        })
    }

    /// Full at admission time. Not the provider's fault, so neither the DWA
    /// nor the registry stats hear about it.
    fn refuse(mut self) -> UnitOutcome {
        let err = OrchestratorError::AtCapacity {
            provider: self.provider,
            max_load: self.registry.max_load(self.provider),
        };
        let message = err.to_string();
        self.advance(DispatchState::Failed);
        tracing::warn!(provider = %self.provider, error = %message, "admission refused");
        UnitOutcome::Failed(ProviderFailure {
            provider: self.provider,
            error: message,
            timestamp: Utc::now(),
        })
    }

    fn fail(mut self, elapsed: Duration, err: &OrchestratorError) -> UnitOutcome {
        let message = err.to_string();
        self.dwa
            .record_request_result(self.provider, false, elapsed, Some(&message), None);
        self.registry.record_outcome(self.provider, false, elapsed);
        metrics::record_provider_outcome(self.provider, false, elapsed);
        self.advance(DispatchState::Failed);
        tracing::warn!(
            provider = %self.provider,
            latency_ms = elapsed.as_millis() as u64,
            error = %message,
            "provider call failed"
        );
        UnitOutcome::Failed(ProviderFailure {
            provider: self.provider,
            error: message,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::worker::EchoWorker;
    use ProviderId::*;

    fn config_with(providers: &[ProviderId]) -> OrchestratorConfig {
        let mut cfg = OrchestratorConfig::default();
        cfg.orchestration.max_concurrent_requests = 40;
        for p in providers {
            cfg.providers.insert(
                *p,
                ProviderConfig {
                    api_key: Some(format!("{p}-key")),
                    ..ProviderConfig::default()
                },
            );
        }
        cfg
    }

    fn echo_orchestrator(providers: &[ProviderId]) -> Orchestrator {
        let worker = Arc::new(EchoWorker::with_delay(Duration::from_millis(1)));
        Orchestrator::new(config_with(providers), WorkerTable::uniform(worker))
    }

    #[test]
    fn test_dispatch_state_transitions() {
        use DispatchState::*;
        assert!(Pending.can_advance(Admitted));
        assert!(Pending.can_advance(Succeeded));
        assert!(Pending.can_advance(Failed));
        assert!(InFlight.can_advance(Failed));
        assert!(!Pending.can_advance(InFlight));
        assert!(!Succeeded.can_advance(Failed));
        assert!(Failed.is_terminal());
        assert!(!Admitted.is_terminal());
    }

    #[test]
    fn test_resolve_candidates_intersects_requested() {
        let orch = echo_orchestrator(&[OpenAi, Gemini]);
        let got = orch.resolve_candidates(&[Gemini, Grok]).expect("test: candidates");
        assert_eq!(got, vec![Gemini]);
    }

    #[test]
    fn test_resolve_candidates_falls_back_to_all_eligible() {
        let orch = echo_orchestrator(&[OpenAi, Gemini]);
        let got = orch.resolve_candidates(&[Grok]).expect("test: candidates");
        assert_eq!(got, vec![OpenAi, Gemini]);
    }

    #[test]
    fn test_resolve_candidates_none_configured_is_terminal() {
        let orch = echo_orchestrator(&[]);
        assert_eq!(
            orch.resolve_candidates(&[OpenAi]),
            Err(OrchestratorError::NoProvidersAvailable)
        );
    }

    #[test]
    fn test_shortlist_caps_fanout() {
        let orch = echo_orchestrator(&ProviderId::ALL);
        let cfg = orch.config();
        let got = orch.shortlist(&ProviderId::ALL, &ProviderId::ALL, &cfg);
        assert_eq!(got.len(), 3);
        let mut dedup = got.clone();
        dedup.dedup();
        assert_eq!(dedup.len(), 3);
    }

    #[test]
    fn test_shortlist_single_viable_provider_is_kept() {
        let orch = echo_orchestrator(&ProviderId::ALL);
        let cfg = orch.config();
        assert_eq!(orch.shortlist(&[Grok], &[Grok], &cfg), vec![Grok]);
    }

    #[test]
    fn test_shortlist_single_unviable_provider_is_substituted() {
        let orch = echo_orchestrator(&ProviderId::ALL);
        for _ in 0..7 {
            orch.dwa()
                .record_request_result(Grok, false, Duration::ZERO, Some("down"), None);
        }
        let cfg = orch.config();
        assert_eq!(orch.shortlist(&[Grok], &[Grok], &cfg), vec![OpenAi]);
    }

    #[test]
    fn test_shortlist_all_unhealthy_dispatches_one_probe() {
        let orch = echo_orchestrator(&[OpenAi, Anthropic]);
        for p in [OpenAi, Anthropic] {
            for _ in 0..3 {
                orch.dwa()
                    .record_request_result(p, false, Duration::ZERO, None, None);
            }
        }
        let cfg = orch.config();
        let got = orch.shortlist(&[OpenAi, Anthropic], &[OpenAi, Anthropic], &cfg);
        assert_eq!(got, vec![OpenAi]);
    }

    #[test]
    fn test_shortlist_uses_router_when_dwa_disabled() {
        let orch = echo_orchestrator(&ProviderId::ALL);
        let mut cfg = (*orch.config()).clone();
        cfg.dwa.enabled = false;
        cfg.orchestration.routing_strategy = RoutingStrategy::Priority;
        orch.apply_config(cfg.clone()).expect("test: apply");
        let got = orch.shortlist(&[Grok, Gemini], &[Gemini, Grok], &cfg);
        assert_eq!(got, vec![Gemini]);
    }

    #[test]
    fn test_apply_config_rejects_invalid() {
        let orch = echo_orchestrator(&[OpenAi]);
        let mut cfg = (*orch.config()).clone();
        cfg.dwa.failure_threshold = 0;
        let err = orch.apply_config(cfg).expect_err("test: invalid config");
        assert!(matches!(err, OrchestratorError::ConfigError(_)));
        assert_eq!(orch.config().dwa.failure_threshold, 3);
    }

    #[tokio::test]
    async fn test_orchestrate_single_provider_echo() {
        let orch = echo_orchestrator(&[Anthropic]);
        let outcome = orch
            .orchestrate(OrchestrationRequest::new("hello there", vec![Anthropic]))
            .await
            .expect("test: orchestrate");
        assert_eq!(outcome.successes.len(), 1);
        let s = &outcome.successes[0];
        assert_eq!(s.provider, Anthropic);
        assert_eq!(s.model, "claude-3-sonnet");
        assert!(s.response.starts_with("[Anthropic Claude] Response to: hello there"));
        assert!(!s.cached);
        assert_eq!(orch.registry().current_load(Anthropic), 0);
        assert_eq!(orch.dwa().metrics(Anthropic).successful_requests, 1);
    }

    #[tokio::test]
    async fn test_missing_worker_is_a_failure_not_an_error() {
        let orch = Orchestrator::new(config_with(&[Gemini]), WorkerTable::new());
        let outcome = orch
            .orchestrate(OrchestrationRequest::new("hi", vec![Gemini]))
            .await
            .expect("test: orchestrate");
        assert!(outcome.successes.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].error.contains("no worker registered"));
        assert_eq!(orch.registry().current_load(Gemini), 0);
    }
}
