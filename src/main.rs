//! Demo binary for dwa-orchestrator
//!
//! Builds an orchestrator over simulated providers, sends a handful of
//! requests and prints the resulting DWA statistics.
//!
//! ## Usage
//!
//! ```text
//! dwa-orchestrator [path/to/orchestrator.toml]
//! ```
//!
//! Without a path, `ORCH_CONFIG` is consulted; without either, defaults plus
//! the `*_API_KEY` environment variables are used. A given config file is
//! watched and reloaded while the demo runs.
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` — structured JSON output (production)
//! - `RUST_LOG=info` — log level filter
//! - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GEMINI_API_KEY`, `GROK_API_KEY`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dwa_orchestrator::config::loader;
use dwa_orchestrator::config::watcher::ConfigWatcher;
use dwa_orchestrator::{
    init_tracing, metrics, EchoWorker, OrchestrationRequest, Orchestrator, ProviderId, WorkerTable,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = init_tracing();
    metrics::init_metrics()?;

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ORCH_CONFIG").ok())
        .map(PathBuf::from);

    let config = match &path {
        Some(p) => loader::load_from_file(p)?,
        None => loader::load_from_str("", "<defaults>")?,
    };

    info!(
        policy = %config.dwa.policy,
        strategy = %config.orchestration.routing_strategy,
        "starting dwa-orchestrator demo"
    );

    let metrics_enabled = config.observability.metrics_enabled;
    let worker = Arc::new(EchoWorker::with_delay(Duration::from_millis(100)));
    let orchestrator = Orchestrator::from_config(config, WorkerTable::uniform(worker)).await;

    // Keep the watcher alive for the whole demo.
    let _watcher = match path {
        Some(p) => {
            let (watcher, updates) = ConfigWatcher::new(p)?;
            orchestrator.follow_config(updates);
            Some(watcher)
        }
        None => None,
    };

    let demo_requests = [
        ("What is the capital of France?", vec![ProviderId::OpenAi]),
        (
            "Explain quantum computing in simple terms",
            vec![ProviderId::Anthropic, ProviderId::Gemini],
        ),
        ("Write a haiku about programming", ProviderId::ALL.to_vec()),
        ("What is the capital of France?", vec![ProviderId::OpenAi]),
        ("Describe the water cycle", vec![]),
    ];

    info!(count = demo_requests.len(), "sending demo requests");

    for (prompt, providers) in demo_requests {
        match orchestrator
            .orchestrate(OrchestrationRequest::new(prompt, providers))
            .await
        {
            Ok(outcome) => {
                for s in &outcome.successes {
                    info!(provider = %s.provider, cached = s.cached, response = %s.response, "answer");
                }
                for f in &outcome.failures {
                    tracing::warn!(provider = %f.provider, error = %f.error, "failure");
                }
            }
            Err(e) => tracing::error!(error = %e, "orchestration failed"),
        }
    }

    let background = orchestrator.spawn(OrchestrationRequest::new(
        "How does photosynthesis work?",
        vec![ProviderId::Gemini, ProviderId::Grok],
    ));
    info!(request_id = %background.request_id(), "background orchestration spawned");
    if let Err(e) = background.join().await {
        tracing::error!(error = %e, "background orchestration failed");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&orchestrator.dwa_statistics())?
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&orchestrator.provider_stats())?
    );
    if let Some(best) = orchestrator.select_best_provider() {
        info!(provider = %best, "best provider");
    }

    let summary = metrics::get_metrics_summary();
    info!(
        provider_requests = ?summary.provider_requests,
        cache_lookups = ?summary.cache_lookups,
        selections = ?summary.selections,
        "metrics summary"
    );
    if metrics_enabled {
        println!("{}", metrics::gather_metrics());
    }

    info!("demo complete");
    Ok(())
}
