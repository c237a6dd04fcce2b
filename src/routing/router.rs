//! Strategy-based provider router.
//!
//! The [`StrategyRouter`] applies a [`RoutingStrategy`] to a candidate set.
//! The active strategy can be swapped at runtime (config hot reload) without
//! disturbing in-flight selections.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use rand::Rng;

use super::strategy::RoutingStrategy;
use crate::provider::ProviderId;

/// Applies the configured [`RoutingStrategy`].
///
/// Thread-safe: the strategy sits behind a `RwLock` that is only held for
/// a copy, and the round-robin cursor is atomic.
#[derive(Debug)]
pub struct StrategyRouter {
    strategy: RwLock<RoutingStrategy>,
    cursor: AtomicUsize,
}

impl StrategyRouter {
    /// Create a router using `strategy`.
    pub fn new(strategy: RoutingStrategy) -> Self {
        Self {
            strategy: RwLock::new(strategy),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Currently active strategy.
    pub fn strategy(&self) -> RoutingStrategy {
        *self.strategy.read()
    }

    /// Replace the active strategy. Affects subsequent selections only.
    pub fn set_strategy(&self, strategy: RoutingStrategy) {
        *self.strategy.write() = strategy;
    }

    /// Pick one provider from `candidates`.
    ///
    /// `load_of` reports the current in-flight count of a provider; it is only
    /// consulted by [`RoutingStrategy::LoadBalanced`]. Returns `None` only
    /// when `candidates` is empty.
    pub fn select<F>(&self, candidates: &[ProviderId], load_of: F) -> Option<ProviderId>
    where
        F: Fn(ProviderId) -> u32,
    {
        if candidates.is_empty() {
            return None;
        }

        let chosen = match self.strategy() {
            RoutingStrategy::RoundRobin => {
                let i = self.cursor.fetch_add(1, Ordering::Relaxed);
                candidates[i % candidates.len()]
            }
            // min_by_key keeps the first of equal keys, so ties go to
            // enumeration order.
            RoutingStrategy::LoadBalanced => candidates
                .iter()
                .copied()
                .min_by_key(|p| (load_of(*p), p.index()))?,
            RoutingStrategy::Random => {
                candidates[rand::thread_rng().gen_range(0..candidates.len())]
            }
            RoutingStrategy::Priority => candidates.iter().copied().min_by_key(|p| p.index())?,
        };

        Some(chosen)
    }
}

impl Default for StrategyRouter {
    fn default() -> Self {
        Self::new(RoutingStrategy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProviderId::*;

    #[test]
    fn test_empty_candidates_returns_none() {
        let router = StrategyRouter::default();
        assert_eq!(router.select(&[], |_| 0), None);
    }

    #[test]
    fn test_round_robin_cycles_candidates() {
        let router = StrategyRouter::new(RoutingStrategy::RoundRobin);
        let picks: Vec<_> = (0..4)
            .filter_map(|_| router.select(&[OpenAi, Gemini, Grok], |_| 0))
            .collect();
        assert_eq!(picks, vec![OpenAi, Gemini, Grok, OpenAi]);
    }

    #[test]
    fn test_load_balanced_picks_least_loaded() {
        let router = StrategyRouter::new(RoutingStrategy::LoadBalanced);
        let load = |p: ProviderId| match p {
            OpenAi => 3,
            Anthropic => 1,
            _ => 2,
        };
        assert_eq!(router.select(&ProviderId::ALL, load), Some(Anthropic));
    }

    #[test]
    fn test_load_balanced_ties_go_to_enumeration_order() {
        let router = StrategyRouter::new(RoutingStrategy::LoadBalanced);
        assert_eq!(router.select(&[Grok, Gemini], |_| 0), Some(Gemini));
    }

    #[test]
    fn test_priority_picks_earliest_provider() {
        let router = StrategyRouter::new(RoutingStrategy::Priority);
        assert_eq!(router.select(&[Grok, Anthropic], |_| 0), Some(Anthropic));
    }

    #[test]
    fn test_random_stays_within_candidates() {
        let router = StrategyRouter::new(RoutingStrategy::Random);
        for _ in 0..50 {
            let pick = router.select(&[Gemini, Grok], |_| 0);
            assert!(matches!(pick, Some(Gemini) | Some(Grok)));
        }
    }

    #[test]
    fn test_set_strategy_takes_effect() {
        let router = StrategyRouter::new(RoutingStrategy::Priority);
        router.set_strategy(RoutingStrategy::LoadBalanced);
        assert_eq!(router.strategy(), RoutingStrategy::LoadBalanced);
        let load = |p: ProviderId| if p == OpenAi { 5 } else { 0 };
        assert_eq!(router.select(&[OpenAi, Grok], load), Some(Grok));
    }
}
