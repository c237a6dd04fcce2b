//! Prometheus metrics for the orchestrator.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`record_provider_outcome`, `record_selection`, …) are no-ops if
//! `init_metrics` was never called, so the orchestrator is always safe to
//! run — observability simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `dwa_provider_requests_total` | Counter | `provider`, `outcome` |
//! | `dwa_provider_latency_seconds` | Histogram | `provider` |
//! | `dwa_cache_lookups_total` | Counter | `result` |
//! | `dwa_provider_in_flight` | Gauge | `provider` |
//! | `dwa_selections_total` | Counter | `provider` |

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::provider::ProviderId;
use crate::OrchestratorError;

/// Result label of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// Live entry found.
    Hit,
    /// Nothing usable stored.
    Miss,
    /// Backend unreachable; treated as a miss.
    Error,
}

impl CacheLookup {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Error => "error",
        }
    }
}

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the orchestrator, bundled together so they can
/// be stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Provider calls by provider and outcome (`success` / `failure`).
    pub provider_requests: CounterVec,
    /// Wall-clock latency of provider calls.
    pub provider_latency: HistogramVec,
    /// Cache lookups by result.
    pub cache_lookups: CounterVec,
    /// Calls currently admitted per provider.
    pub in_flight: IntGaugeVec,
    /// Providers picked by the dynamic weight algorithm.
    pub selections: CounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn register<C>(registry: &Registry, collector: Result<C, prometheus::Error>) -> Result<C, OrchestratorError>
where
    C: Collector + Clone + 'static,
{
    let collector =
        collector.map_err(|e| OrchestratorError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| OrchestratorError::Other(format!("metrics registration failed: {e}")))?;
    Ok(collector)
}

fn build(prefix: &str) -> Result<Metrics, OrchestratorError> {
    let registry = Registry::new();

    let provider_requests = register(
        &registry,
        CounterVec::new(
            Opts::new(format!("{prefix}_provider_requests_total"), "Provider calls by outcome"),
            &["provider", "outcome"],
        ),
    )?;
    let provider_latency = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                format!("{prefix}_provider_latency_seconds"),
                "Wall-clock latency of provider calls",
            ),
            &["provider"],
        ),
    )?;
    let cache_lookups = register(
        &registry,
        CounterVec::new(
            Opts::new(format!("{prefix}_cache_lookups_total"), "Response cache lookups"),
            &["result"],
        ),
    )?;
    let in_flight = register(
        &registry,
        IntGaugeVec::new(
            Opts::new(format!("{prefix}_provider_in_flight"), "Admitted provider calls"),
            &["provider"],
        ),
    )?;
    let selections = register(
        &registry,
        CounterVec::new(
            Opts::new(format!("{prefix}_selections_total"), "DWA provider selections"),
            &["provider"],
        ),
    )?;

    Ok(Metrics {
        registry,
        provider_requests,
        provider_latency,
        cache_lookups,
        in_flight,
        selections,
    })
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let bundle = build("dwa")?;
    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(bundle);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one provider call and observe its latency.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_provider_outcome(provider: ProviderId, success: bool, latency: Duration) {
    if let Some(m) = metrics() {
        let outcome = if success { "success" } else { "failure" };
        if let Ok(c) = m
            .provider_requests
            .get_metric_with_label_values(&[provider.as_str(), outcome])
        {
            c.inc();
        }
        if let Ok(h) = m
            .provider_latency
            .get_metric_with_label_values(&[provider.as_str()])
        {
            h.observe(latency.as_secs_f64());
        }
    }
}

/// Count one cache lookup.
///
/// No-op if metrics have not been initialised.
pub fn record_cache_lookup(result: CacheLookup) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.cache_lookups.get_metric_with_label_values(&[result.as_str()]) {
            c.inc();
        }
    }
}

/// Set the in-flight gauge for `provider`.
///
/// No-op if metrics have not been initialised.
pub fn set_in_flight(provider: ProviderId, load: u32) {
    if let Some(m) = metrics() {
        if let Ok(g) = m.in_flight.get_metric_with_label_values(&[provider.as_str()]) {
            g.set(i64::from(load));
        }
    }
}

/// Count one DWA selection of `provider`.
///
/// No-op if metrics have not been initialised.
pub fn record_selection(provider: ProviderId) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.selections.get_metric_with_label_values(&[provider.as_str()]) {
            c.inc();
        }
    }
}

/// Gather all registered metrics as a raw list of metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// A structured snapshot of key metric counters.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Provider call counts keyed by `"provider:outcome"`.
    pub provider_requests: HashMap<String, u64>,
    /// Cache lookups keyed by result.
    pub cache_lookups: HashMap<String, u64>,
    /// Selection counts keyed by provider.
    pub selections: HashMap<String, u64>,
}

fn label<'a>(metric: &'a prometheus::proto::Metric, name: &str) -> &'a str {
    metric
        .get_label()
        .iter()
        .find(|l| l.get_name() == name)
        .map_or("unknown", |l| l.get_value())
}

fn summarize(m: &Metrics) -> MetricsSummary {
    let mut summary = MetricsSummary::default();

    for family in m.provider_requests.collect() {
        for metric in family.get_metric() {
            let key = format!("{}:{}", label(metric, "provider"), label(metric, "outcome"));
            summary
                .provider_requests
                .insert(key, metric.get_counter().get_value() as u64);
        }
    }
    for family in m.cache_lookups.collect() {
        for metric in family.get_metric() {
            summary.cache_lookups.insert(
                label(metric, "result").to_string(),
                metric.get_counter().get_value() as u64,
            );
        }
    }
    for family in m.selections.collect() {
        for metric in family.get_metric() {
            summary.selections.insert(
                label(metric, "provider").to_string(),
                metric.get_counter().get_value() as u64,
            );
        }
    }

    summary
}

/// Return a structured summary of current metric counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been initialised.
pub fn get_metrics_summary() -> MetricsSummary {
    metrics().map_or_else(MetricsSummary::default, summarize)
}
