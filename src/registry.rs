//! # Stage: Provider Registry & Load Tracker
//!
//! ## Responsibility
//! Track, per provider, whether credentials are configured and how many
//! calls are in flight, and answer "may this provider take more work?".
//!
//! ## Guarantees
//! - Lock-free accounting: `current_load` is an atomic; concurrent admits and
//!   releases never lose updates.
//! - Never negative: release saturates at zero.
//! - Capped: [`try_admit`](ProviderRegistry::try_admit) checks and increments
//!   in one atomic step, so concurrent callers cannot overshoot `max_load`.
//! - Scoped: [`LoadGuard`] releases on drop, so load is returned on success,
//!   error, timeout, panic and cancellation alike.
//! - Never blocks and never errors.
//!
//! ## NOT Responsible For
//! - Ranking providers (that belongs to `dwa`)
//! - Calling providers (that belongs to `dispatcher` / `worker`)

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::OrchestratorConfig;
use crate::metrics;
use crate::provider::ProviderId;

/// Smoothed outcome statistics kept next to the load counter.
#[derive(Debug, Default, Clone, Copy)]
struct LoadStats {
    response_time_secs: f64,
    error_rate: f64,
}

#[derive(Debug)]
struct ProviderSlot {
    has_credentials: AtomicBool,
    current_load: AtomicU32,
    max_load: AtomicU32,
    stats: Mutex<LoadStats>,
}

impl ProviderSlot {
    fn new(has_credentials: bool, max_load: u32) -> Self {
        Self {
            has_credentials: AtomicBool::new(has_credentials),
            current_load: AtomicU32::new(0),
            max_load: AtomicU32::new(max_load.max(1)),
            stats: Mutex::new(LoadStats::default()),
        }
    }
}

/// Point-in-time view of one provider's load accounting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderLoadSnapshot {
    /// Calls currently admitted and not yet released.
    pub current_load: u32,
    /// Admission cap.
    pub max_load: u32,
    /// Smoothed response time in seconds.
    pub response_time: f64,
    /// Smoothed error rate in `[0, 1]`.
    pub error_rate: f64,
    /// Whether the provider is eligible right now.
    pub available: bool,
}

/// Per-provider credential and in-flight load registry.
///
/// Created once with a slot for every [`ProviderId`]; slots are never
/// removed. Share it behind an `Arc`.
#[derive(Debug)]
pub struct ProviderRegistry {
    slots: [ProviderSlot; 4],
}

impl ProviderRegistry {
    /// Build a registry from configuration.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            slots: ProviderId::ALL
                .map(|p| ProviderSlot::new(config.has_credentials(p), config.max_load_for(p))),
        }
    }

    /// Build a registry where `credentialed` providers have keys and every
    /// provider shares the same cap.
    pub fn with_providers(credentialed: &[ProviderId], max_load: u32) -> Self {
        Self {
            slots: ProviderId::ALL.map(|p| ProviderSlot::new(credentialed.contains(&p), max_load)),
        }
    }

    fn slot(&self, provider: ProviderId) -> &ProviderSlot {
        &self.slots[provider.index()]
    }

    /// True iff `provider` has credentials and `current_load < max_load`.
    pub fn is_eligible(&self, provider: ProviderId) -> bool {
        let slot = self.slot(provider);
        slot.has_credentials.load(Ordering::Acquire)
            && slot.current_load.load(Ordering::Acquire) < slot.max_load.load(Ordering::Acquire)
    }

    /// Every eligible provider, in enumeration order.
    pub fn eligible_providers(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|p| self.is_eligible(*p))
            .collect()
    }

    /// Whether `provider` has credentials, regardless of load.
    pub fn has_credentials(&self, provider: ProviderId) -> bool {
        self.slot(provider).has_credentials.load(Ordering::Acquire)
    }

    /// Admit one call for `provider` if it is below its cap.
    ///
    /// The comparison against `max_load` and the increment are a single
    /// compare-and-swap. Returns `None` when the provider is full; nothing
    /// is counted in that case.
    pub fn try_admit(self: &Arc<Self>, provider: ProviderId) -> Option<LoadGuard> {
        let slot = self.slot(provider);
        let max = slot.max_load.load(Ordering::Acquire);
        let prev = slot
            .current_load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            });
        match prev {
            Ok(prev) => {
                let now = prev + 1;
                metrics::set_in_flight(provider, now);
                tracing::trace!(provider = %provider, current_load = now, "load admitted");
                Some(LoadGuard {
                    registry: Arc::clone(self),
                    provider,
                })
            }
            Err(current) => {
                tracing::debug!(provider = %provider, current_load = current, max_load = max, "admission refused at cap");
                None
            }
        }
    }

    /// Count one more in-flight call for `provider` regardless of its cap.
    ///
    /// The returned guard performs the matching [`release`](Self::release)
    /// when dropped. Use [`try_admit`](Self::try_admit) on the request path.
    pub fn admit(self: &Arc<Self>, provider: ProviderId) -> LoadGuard {
        let now = self.slot(provider).current_load.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_in_flight(provider, now);
        tracing::trace!(provider = %provider, current_load = now, "load admitted");
        LoadGuard {
            registry: Arc::clone(self),
            provider,
        }
    }

    /// Return one unit of load for `provider`. Saturates at zero.
    pub fn release(&self, provider: ProviderId) {
        let prev = self.slot(provider).current_load.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |n| Some(n.saturating_sub(1)),
        );
        let now = prev.unwrap_or(0).saturating_sub(1);
        metrics::set_in_flight(provider, now);
        tracing::trace!(provider = %provider, current_load = now, "load released");
    }

    /// Calls currently in flight for `provider`.
    pub fn current_load(&self, provider: ProviderId) -> u32 {
        self.slot(provider).current_load.load(Ordering::Acquire)
    }

    /// Admission cap for `provider`.
    pub fn max_load(&self, provider: ProviderId) -> u32 {
        self.slot(provider).max_load.load(Ordering::Acquire)
    }

    /// Fold one call outcome into the smoothed response time and error rate.
    ///
    /// Success halves the distance to the new latency and shaves 0.01 off the
    /// error rate; failure adds 0.1 to it.
    pub fn record_outcome(&self, provider: ProviderId, success: bool, response_time: Duration) {
        let mut stats = self.slot(provider).stats.lock();
        if success {
            stats.response_time_secs = (stats.response_time_secs + response_time.as_secs_f64()) / 2.0;
            stats.error_rate = (stats.error_rate - 0.01).max(0.0);
        } else {
            stats.error_rate = (stats.error_rate + 0.1).min(1.0);
        }
    }

    /// Toggle credentials, e.g. after a config reload.
    pub fn set_credentials(&self, provider: ProviderId, present: bool) {
        self.slot(provider)
            .has_credentials
            .store(present, Ordering::Release);
    }

    /// Change the admission cap. Work already admitted is unaffected.
    pub fn set_max_load(&self, provider: ProviderId, max_load: u32) {
        self.slot(provider)
            .max_load
            .store(max_load.max(1), Ordering::Release);
    }

    /// Re-read credentials and caps from a (reloaded) configuration.
    pub fn apply_config(&self, config: &OrchestratorConfig) {
        for p in ProviderId::ALL {
            self.set_credentials(p, config.has_credentials(p));
            self.set_max_load(p, config.max_load_for(p));
        }
    }

    /// Load snapshot for one provider.
    pub fn snapshot(&self, provider: ProviderId) -> ProviderLoadSnapshot {
        let slot = self.slot(provider);
        let stats = *slot.stats.lock();
        ProviderLoadSnapshot {
            current_load: slot.current_load.load(Ordering::Acquire),
            max_load: slot.max_load.load(Ordering::Acquire),
            response_time: (stats.response_time_secs * 1000.0).round() / 1000.0,
            error_rate: (stats.error_rate * 1000.0).round() / 1000.0,
            available: self.is_eligible(provider),
        }
    }

    /// Load snapshots for every provider, keyed by provider name.
    pub fn provider_stats(&self) -> BTreeMap<String, ProviderLoadSnapshot> {
        ProviderId::ALL
            .into_iter()
            .map(|p| (p.as_str().to_string(), self.snapshot(p)))
            .collect()
    }
}

/// Scoped load admission. Dropping it releases the load.
#[derive(Debug)]
#[must_use = "dropping the guard releases the load immediately"]
pub struct LoadGuard {
    registry: Arc<ProviderRegistry>,
    provider: ProviderId,
}

impl LoadGuard {
    /// Provider this guard holds load for.
    pub fn provider(&self) -> ProviderId {
        self.provider
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.registry.release(self.provider);
    }
}
