//! DWA benchmarks — selection, bookkeeping and dispatch overhead.
//!
//! EchoWorker with zero delay is the floor: what remains is pure
//! orchestration cost (candidate resolution, admission, spawning, joining).

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dwa_orchestrator::config::{DwaConfig, ProviderConfig};
use dwa_orchestrator::{
    DynamicWeightAlgorithm, EchoWorker, OrchestrationRequest, Orchestrator, OrchestratorConfig,
    ProviderId, SelectionPolicy, WorkerTable,
};
use tokio::runtime::Runtime;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn warmed_dwa(policy: SelectionPolicy) -> DynamicWeightAlgorithm {
    let dwa = DynamicWeightAlgorithm::new(DwaConfig {
        policy,
        ..DwaConfig::default()
    });
    for (i, p) in ProviderId::ALL.into_iter().enumerate() {
        for j in 0..20u64 {
            let success = (i as u64 + j) % 5 != 0;
            let latency = Duration::from_millis(100 * (i as u64 + 1));
            dwa.record_request_result(p, success, latency, None, Some(50.0));
        }
    }
    dwa
}

fn bench_config() -> OrchestratorConfig {
    let mut cfg = OrchestratorConfig::default();
    cfg.orchestration.max_concurrent_requests = 4_000;
    for p in ProviderId::ALL {
        cfg.providers.insert(
            p,
            ProviderConfig {
                api_key: Some("bench".to_string()),
                ..ProviderConfig::default()
            },
        );
    }
    cfg
}

// ---------------------------------------------------------------------------
// Bench: select_best_provider per policy
// ---------------------------------------------------------------------------

fn bench_select_best_provider(c: &mut Criterion) {
    let mut group = c.benchmark_group("dwa_select_best_provider");
    for policy in [
        SelectionPolicy::WeightedComposite,
        SelectionPolicy::RoundRobin,
        SelectionPolicy::MaxAccuracy,
        SelectionPolicy::Priority,
    ] {
        let dwa = warmed_dwa(policy);
        group.bench_with_input(BenchmarkId::new("policy", policy), &dwa, |b, dwa| {
            b.iter(|| black_box(dwa.select_best_provider(black_box(&[]))))
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Bench: record_request_result
// ---------------------------------------------------------------------------

fn bench_record_request_result(c: &mut Criterion) {
    let dwa = warmed_dwa(SelectionPolicy::WeightedComposite);
    let mut n = 0u64;

    c.bench_function("dwa_record_request_result", |b| {
        b.iter(|| {
            n += 1;
            dwa.record_request_result(
                black_box(ProviderId::Gemini),
                n % 4 != 0,
                Duration::from_millis(120),
                None,
                Some(30.0),
            );
        })
    });
}

// ---------------------------------------------------------------------------
// Bench: orchestrate end-to-end with EchoWorker (zero-delay)
// ---------------------------------------------------------------------------

fn bench_orchestrate_echo(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let worker = Arc::new(EchoWorker::with_delay(Duration::ZERO));
    let orch = Orchestrator::new(bench_config(), WorkerTable::uniform(worker));

    let mut group = c.benchmark_group("orchestrate_echo");
    group.sample_size(30);

    for fanout in [1usize, 2, 4] {
        let providers: Vec<ProviderId> = ProviderId::ALL.into_iter().take(fanout).collect();
        group.bench_with_input(
            BenchmarkId::new("providers", fanout),
            &providers,
            |b, providers| {
                b.to_async(&rt).iter(|| async {
                    let outcome = orch
                        .orchestrate(OrchestrationRequest::new(
                            black_box("benchmark prompt"),
                            providers.clone(),
                        ))
                        .await;
                    let _ = black_box(outcome);
                })
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_select_best_provider,
    bench_record_request_result,
    bench_orchestrate_echo
);
criterion_main!(benches);
