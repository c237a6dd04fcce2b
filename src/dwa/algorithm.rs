//! The dynamic weight algorithm: metric bookkeeping plus policy-driven
//! selection.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::metrics::ProviderMetrics;
use super::policy::{SelectionPolicy, WeightingFn};
use crate::config::{DwaConfig, OrchestratorConfig};
use crate::provider::ProviderId;

/// Scores closer than this are treated as equal.
const SCORE_EPSILON: f64 = 1e-9;

/// Ranks providers from observed performance.
///
/// One metrics slot exists per [`ProviderId`] for the lifetime of the value.
/// Each slot has its own lock, so outcomes for different providers never
/// contend. Tuning, cost rates and the custom scoring function live behind
/// separate locks that are never held while a slot lock is taken.
///
/// # Panics
///
/// No method panics.
pub struct DynamicWeightAlgorithm {
    slots: [RwLock<ProviderMetrics>; 4],
    rules: RwLock<Arc<DwaConfig>>,
    cost_rates: RwLock<[f64; 4]>,
    weighting: RwLock<Option<WeightingFn>>,
    cursor: AtomicUsize,
}

impl fmt::Debug for DynamicWeightAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicWeightAlgorithm")
            .field("policy", &self.policy())
            .field("custom_weighting", &self.weighting.read().is_some())
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for DynamicWeightAlgorithm {
    fn default() -> Self {
        Self::new(DwaConfig::default())
    }
}

impl DynamicWeightAlgorithm {
    /// Create an algorithm with neutral metrics for every provider and no
    /// token pricing.
    pub fn new(rules: DwaConfig) -> Self {
        let initial = rules.initial_accuracy;
        Self {
            slots: ProviderId::ALL.map(|_| RwLock::new(ProviderMetrics::neutral(initial))),
            rules: RwLock::new(Arc::new(rules)),
            cost_rates: RwLock::new([0.0; 4]),
            weighting: RwLock::new(None),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Create an algorithm from a full configuration, including per-provider
    /// token pricing.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let dwa = Self::new(config.dwa.clone());
        *dwa.cost_rates.write() = cost_rates(config);
        dwa
    }

    /// Swap in new tuning and pricing. Existing metrics are kept.
    pub fn configure(&self, config: &OrchestratorConfig) {
        *self.rules.write() = Arc::new(config.dwa.clone());
        *self.cost_rates.write() = cost_rates(config);
    }

    /// Current tuning.
    pub fn rules(&self) -> Arc<DwaConfig> {
        Arc::clone(&self.rules.read())
    }

    /// Active selection policy.
    pub fn policy(&self) -> SelectionPolicy {
        self.rules.read().policy
    }

    /// Change the selection policy. Affects subsequent selections only.
    pub fn set_policy(&self, policy: SelectionPolicy) {
        let mut rules = self.rules.write();
        if rules.policy != policy {
            tracing::info!(from = %rules.policy, to = %policy, "selection policy changed");
            Arc::make_mut(&mut rules).policy = policy;
        }
    }

    /// Replace the scoring function used by
    /// [`SelectionPolicy::WeightedComposite`]. Affects subsequent selections
    /// only.
    pub fn set_custom_weighting_strategy<F>(&self, f: F)
    where
        F: Fn(&ProviderMetrics) -> f64 + Send + Sync + 'static,
    {
        *self.weighting.write() = Some(Arc::new(f));
        tracing::info!("custom weighting strategy installed");
    }

    /// Go back to the configured weighted sum.
    pub fn clear_custom_weighting_strategy(&self) {
        *self.weighting.write() = None;
    }

    /// Best provider among all known providers that are not in `exclude`.
    pub fn select_best_provider(&self, exclude: &[ProviderId]) -> Option<ProviderId> {
        self.select_among(&ProviderId::ALL, exclude)
    }

    /// Best provider among `candidates` that is not in `exclude`.
    ///
    /// Only healthy providers with `availability > 0` are considered.
    /// Returns `None` when nothing qualifies. Selection has no side effects
    /// beyond the round-robin cursor; routing counters are kept by the caller.
    pub fn select_among(
        &self,
        candidates: &[ProviderId],
        exclude: &[ProviderId],
    ) -> Option<ProviderId> {
        let eligible: Vec<(ProviderId, ProviderMetrics)> = ProviderId::ALL
            .into_iter()
            .filter(|p| candidates.contains(p) && !exclude.contains(p))
            .map(|p| (p, self.metrics(p)))
            .filter(|(_, m)| m.is_healthy && m.availability > 0.0)
            .collect();

        if eligible.is_empty() {
            tracing::debug!(?exclude, "no healthy provider to select");
            return None;
        }

        let rules = self.rules();
        let chosen = match rules.policy {
            SelectionPolicy::WeightedComposite => {
                let weighting = self.weighting.read().clone();
                best_by(&eligible, |m| {
                    let score = match &weighting {
                        Some(f) => f(m),
                        None => m.weighted_score(&rules),
                    };
                    let tie = -f64::from(m.consecutive_failures);
                    (finite_or_min(score), tie)
                })
            }
            SelectionPolicy::MaxAccuracy => best_by(&eligible, |m| (m.accuracy, m.availability)),
            SelectionPolicy::RoundRobin => {
                let i = self.cursor.fetch_add(1, Ordering::Relaxed);
                eligible[i % eligible.len()].0
            }
            SelectionPolicy::Priority => rules
                .priority_order
                .iter()
                .copied()
                .find(|p| eligible.iter().any(|(e, _)| e == p))
                .unwrap_or(eligible[0].0),
        };

        tracing::debug!(provider = %chosen, policy = %rules.policy, "provider selected");
        Some(chosen)
    }

    /// Fold one call outcome into `provider`'s metrics.
    ///
    /// `tokens_used` is added to the token total whether or not the call
    /// succeeded; the estimated cost follows the provider's configured rate.
    pub fn record_request_result(
        &self,
        provider: ProviderId,
        success: bool,
        response_time: Duration,
        error: Option<&str>,
        tokens_used: Option<f64>,
    ) {
        let rules = self.rules();
        let rate = self.cost_rates.read()[provider.index()];
        let response_ms = response_time.as_secs_f64() * 1000.0;

        let (was_healthy, now_healthy, failures, availability) = {
            let mut m = self.slots[provider.index()].write();
            let was_healthy = m.is_healthy;
            if success {
                m.record_success(&rules, response_ms);
            } else {
                m.record_failure(&rules, error);
            }
            if let Some(tokens) = tokens_used {
                m.add_tokens(tokens, rate);
            }
            (was_healthy, m.is_healthy, m.consecutive_failures, m.availability)
        };

        tracing::debug!(
            provider = %provider,
            success,
            latency_ms = response_ms,
            consecutive_failures = failures,
            availability,
            "outcome recorded"
        );
        if was_healthy && !now_healthy {
            tracing::warn!(
                provider = %provider,
                consecutive_failures = failures,
                availability,
                "provider marked unhealthy"
            );
        } else if !was_healthy && now_healthy {
            tracing::info!(provider = %provider, "provider recovered");
        }
    }

    /// Providers currently marked healthy, in enumeration order.
    pub fn active_providers(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|p| self.slots[p.index()].read().is_healthy)
            .collect()
    }

    /// Restore neutral metrics for `provider`, or for every provider when
    /// `None`.
    pub fn reset_provider_metrics(&self, provider: Option<ProviderId>) {
        let initial = self.rules.read().initial_accuracy;
        let targets: Vec<ProviderId> = match provider {
            Some(p) => vec![p],
            None => ProviderId::ALL.to_vec(),
        };
        for p in targets {
            *self.slots[p.index()].write() = ProviderMetrics::neutral(initial);
            tracing::info!(provider = %p, "provider metrics reset");
        }
    }

    /// Snapshot of `provider`'s metrics.
    pub fn metrics(&self, provider: ProviderId) -> ProviderMetrics {
        self.slots[provider.index()].read().clone()
    }

    /// Snapshot of every provider's metrics.
    pub fn all_metrics(&self) -> BTreeMap<ProviderId, ProviderMetrics> {
        ProviderId::ALL
            .into_iter()
            .map(|p| (p, self.metrics(p)))
            .collect()
    }

    /// Score `provider` would receive under the weighted composite policy.
    pub fn composite_score(&self, provider: ProviderId) -> f64 {
        let m = self.metrics(provider);
        let custom = self.weighting.read().clone();
        match custom {
            Some(f) => f(&m),
            None => m.weighted_score(&self.rules()),
        }
    }

    /// Whether an explicitly requested `provider` is good enough to keep:
    /// its availability exceeds the validation floor.
    pub fn is_viable(&self, provider: ProviderId) -> bool {
        let floor = self.rules.read().validation_floor;
        self.slots[provider.index()].read().availability > floor
    }

    /// Candidate whose metrics changed longest ago. Ties go to enumeration
    /// order.
    pub fn least_recently_updated(&self, candidates: &[ProviderId]) -> Option<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|p| candidates.contains(p))
            .min_by_key(|p| self.slots[p.index()].read().last_updated)
    }
}

fn cost_rates(config: &OrchestratorConfig) -> [f64; 4] {
    ProviderId::ALL.map(|p| config.provider(p).cost_per_1k_tokens)
}

fn finite_or_min(score: f64) -> f64 {
    if score.is_finite() {
        score
    } else {
        f64::MIN
    }
}

/// Highest `(primary, secondary)` key wins; keys within [`SCORE_EPSILON`]
/// count as equal; full ties keep the earlier entry.
fn best_by<K>(eligible: &[(ProviderId, ProviderMetrics)], key: K) -> ProviderId
where
    K: Fn(&ProviderMetrics) -> (f64, f64),
{
    let mut best = eligible[0].0;
    let mut best_key = key(&eligible[0].1);
    for (p, m) in &eligible[1..] {
        let k = key(m);
        let better = if (k.0 - best_key.0).abs() > SCORE_EPSILON {
            k.0 > best_key.0
        } else {
            k.1 > best_key.1 + SCORE_EPSILON
        };
        if better {
            best = *p;
            best_key = k;
        }
    }
    best
}
