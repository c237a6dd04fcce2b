//! Randomised invariants of the dynamic weight algorithm.
//!
//! Outcome sequences come from a seeded [`StdRng`] so failures reproduce.

use std::time::Duration;

use dwa_orchestrator::config::DwaConfig;
use dwa_orchestrator::{DynamicWeightAlgorithm, ProviderId, SelectionPolicy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ProviderId::*;

fn random_outcome(dwa: &DynamicWeightAlgorithm, rng: &mut StdRng) -> ProviderId {
    let provider = ProviderId::ALL[rng.gen_range(0..ProviderId::ALL.len())];
    let success = rng.gen_bool(0.6);
    let latency = Duration::from_millis(rng.gen_range(0..5_000));
    let tokens = rng.gen_bool(0.5).then(|| rng.gen_range(0.0..2_000.0));
    dwa.record_request_result(provider, success, latency, Some("random failure"), tokens);
    provider
}

#[test]
fn test_metrics_stay_bounded_under_random_outcomes() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let dwa = DynamicWeightAlgorithm::default();

    for _ in 0..2_000 {
        let p = random_outcome(&dwa, &mut rng);
        let m = dwa.metrics(p);
        assert!((0.0..=1.0).contains(&m.accuracy), "accuracy {}", m.accuracy);
        assert!(
            (0.0..=1.0).contains(&m.availability),
            "availability {}",
            m.availability
        );
        assert!(m.speed > 0.0 && m.speed <= 1.0);
        assert!(m.successful_requests <= m.total_requests);
        assert!(m.total_tokens_used >= 0.0);
    }
}

#[test]
fn test_success_always_resets_failures_and_restores_health() {
    let mut rng = StdRng::seed_from_u64(42);
    let threshold = DwaConfig::default().failure_threshold;

    for _ in 0..50 {
        let dwa = DynamicWeightAlgorithm::default();
        let failures = rng.gen_range(threshold..threshold + 10);
        for _ in 0..failures {
            dwa.record_request_result(Gemini, false, Duration::ZERO, None, None);
        }
        let m = dwa.metrics(Gemini);
        assert_eq!(m.consecutive_failures, failures);
        assert!(!m.is_healthy);

        dwa.record_request_result(Gemini, true, Duration::from_millis(80), None, None);
        let m = dwa.metrics(Gemini);
        assert_eq!(m.consecutive_failures, 0);
        assert!(m.is_healthy);
    }
}

#[test]
fn test_selection_never_returns_unhealthy_or_excluded() {
    let mut rng = StdRng::seed_from_u64(7);
    for policy in [
        SelectionPolicy::WeightedComposite,
        SelectionPolicy::RoundRobin,
        SelectionPolicy::MaxAccuracy,
        SelectionPolicy::Priority,
    ] {
        let dwa = DynamicWeightAlgorithm::default();
        dwa.set_policy(policy);

        for _ in 0..500 {
            random_outcome(&dwa, &mut rng);
            let exclude: Vec<ProviderId> = ProviderId::ALL
                .into_iter()
                .filter(|_| rng.gen_bool(0.3))
                .collect();

            match dwa.select_best_provider(&exclude) {
                Some(p) => {
                    let m = dwa.metrics(p);
                    assert!(m.is_healthy, "{policy} picked unhealthy {p}");
                    assert!(m.availability > 0.0);
                    assert!(!exclude.contains(&p), "{policy} picked excluded {p}");
                }
                None => assert!(ProviderId::ALL
                    .into_iter()
                    .filter(|p| !exclude.contains(p))
                    .all(|p| {
                        let m = dwa.metrics(p);
                        !m.is_healthy || m.availability <= 0.0
                    })),
            }
        }
    }
}

#[test]
fn test_everything_excluded_selects_none() {
    let dwa = DynamicWeightAlgorithm::default();
    assert_eq!(dwa.select_best_provider(&ProviderId::ALL), None);
}

#[test]
fn test_round_robin_over_three_providers_is_cyclic() {
    let dwa = DynamicWeightAlgorithm::default();
    dwa.set_policy(SelectionPolicy::RoundRobin);
    let picks: Vec<_> = (0..4)
        .filter_map(|_| dwa.select_among(&[OpenAi, Anthropic, Gemini], &[]))
        .collect();
    assert_eq!(picks, vec![OpenAi, Anthropic, Gemini, OpenAi]);
}

#[test]
fn test_weighted_composite_prefers_consistently_better_provider() {
    let mut rng = StdRng::seed_from_u64(99);
    let dwa = DynamicWeightAlgorithm::default();
    for _ in 0..100 {
        let fast = Duration::from_millis(rng.gen_range(50..150));
        let slow = Duration::from_millis(rng.gen_range(2_000..3_000));
        dwa.record_request_result(Grok, true, fast, None, None);
        dwa.record_request_result(OpenAi, rng.gen_bool(0.7), slow, None, None);
    }
    assert_eq!(dwa.select_among(&[OpenAi, Grok], &[]), Some(Grok));
}
