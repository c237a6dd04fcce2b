//! Rolling per-provider performance metrics and their update rules.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::DwaConfig;

/// Observed performance of one provider.
///
/// Owned by the [`DynamicWeightAlgorithm`](super::DynamicWeightAlgorithm);
/// callers only ever see clones.
///
/// # Invariants
///
/// - `accuracy`, `availability` ∈ `[0, 1]`, `speed` ∈ `(0, 1]`
/// - `successful_requests <= total_requests`
/// - `consecutive_failures` is 0 after any success
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMetrics {
    /// Exponentially weighted success ratio.
    pub accuracy: f64,
    /// `reference / (reference + avg_response_time_ms)`.
    pub speed: f64,
    /// Reliability score: rises slowly on success, falls fast on failure.
    pub availability: f64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Every recorded outcome.
    pub total_requests: u64,
    /// Recorded successes.
    pub successful_requests: u64,
    /// Tokens reported by completed calls.
    pub total_tokens_used: f64,
    /// `total_tokens_used / 1000 * cost_per_1k_tokens`.
    pub estimated_cost: f64,
    /// False once the failure threshold or availability floor is crossed.
    pub is_healthy: bool,
    /// Time of the last update or reset.
    pub last_updated: DateTime<Utc>,
    /// Moving average of successful response times.
    pub avg_response_time_ms: f64,
    /// Description of the most recent failure.
    pub last_error: Option<String>,
}

impl ProviderMetrics {
    /// Neutral metrics for a fresh or reset provider.
    pub fn neutral(initial_accuracy: f64) -> Self {
        Self {
            accuracy: initial_accuracy.clamp(0.0, 1.0),
            speed: 1.0,
            availability: 1.0,
            consecutive_failures: 0,
            total_requests: 0,
            successful_requests: 0,
            total_tokens_used: 0.0,
            estimated_cost: 0.0,
            is_healthy: true,
            last_updated: Utc::now(),
            avg_response_time_ms: 0.0,
            last_error: None,
        }
    }

    /// `successful_requests / total_requests`, or 1.0 before any request.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    /// Weighted composite of accuracy, speed and availability.
    pub fn weighted_score(&self, rules: &DwaConfig) -> f64 {
        let w = rules.weights;
        w.accuracy * self.accuracy + w.speed * self.speed + w.availability * self.availability
    }

    pub(crate) fn record_success(&mut self, rules: &DwaConfig, response_time_ms: f64) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.consecutive_failures = 0;
        self.accuracy = ema(self.accuracy, 1.0, rules.accuracy_alpha).clamp(0.0, 1.0);

        let sample = response_time_ms.max(0.0);
        self.avg_response_time_ms = if self.successful_requests == 1 {
            sample
        } else {
            ema(self.avg_response_time_ms, sample, rules.latency_alpha)
        };
        self.speed = speed_score(self.avg_response_time_ms, rules.reference_latency_ms);

        self.availability = (self.availability + rules.success_step).clamp(0.0, 1.0);
        self.is_healthy = true;
        self.last_updated = Utc::now();
    }

    pub(crate) fn record_failure(&mut self, rules: &DwaConfig, error: Option<&str>) {
        self.total_requests += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.accuracy = ema(self.accuracy, 0.0, rules.accuracy_alpha).clamp(0.0, 1.0);
        self.availability = (self.availability - rules.failure_step).clamp(0.0, 1.0);
        if self.consecutive_failures >= rules.failure_threshold
            || self.availability < rules.availability_floor
        {
            self.is_healthy = false;
        }
        if let Some(e) = error {
            self.last_error = Some(e.to_string());
        }
        self.last_updated = Utc::now();
    }

    pub(crate) fn add_tokens(&mut self, tokens: f64, cost_per_1k_tokens: f64) {
        if tokens.is_finite() && tokens > 0.0 {
            self.total_tokens_used += tokens;
            self.estimated_cost = self.total_tokens_used / 1000.0 * cost_per_1k_tokens.max(0.0);
        }
    }
}

fn ema(prev: f64, sample: f64, alpha: f64) -> f64 {
    alpha * sample + (1.0 - alpha) * prev
}

fn speed_score(avg_ms: f64, reference_ms: f64) -> f64 {
    let reference = reference_ms.max(f64::MIN_POSITIVE);
    (reference / (reference + avg_ms.max(0.0))).clamp(f64::MIN_POSITIVE, 1.0)
}
