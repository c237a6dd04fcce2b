//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dwa_orchestrator::config::ProviderConfig;
use dwa_orchestrator::{
    OrchestrationRequest, OrchestratorConfig, OrchestratorError, ProviderId, ProviderReply,
    ProviderWorker,
};

/// What a [`ScriptedWorker`] does for one provider.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer after `delay` with `tokens` reported tokens.
    Answer { delay: Duration, tokens: Option<f64> },
    /// Fail after `delay`.
    Fail { delay: Duration },
    /// Panic inside the call.
    Panic,
}

impl Behavior {
    pub fn ok() -> Self {
        Self::Answer {
            delay: Duration::from_millis(5),
            tokens: Some(10.0),
        }
    }

    pub fn slow(ms: u64) -> Self {
        Self::Answer {
            delay: Duration::from_millis(ms),
            tokens: None,
        }
    }

    pub fn fail() -> Self {
        Self::Fail {
            delay: Duration::from_millis(5),
        }
    }
}

/// Worker with per-provider scripted behavior and call counting.
pub struct ScriptedWorker {
    behaviors: HashMap<ProviderId, Behavior>,
    calls: HashMap<ProviderId, AtomicUsize>,
}

impl ScriptedWorker {
    /// Every provider answers quickly unless overridden.
    pub fn new(overrides: &[(ProviderId, Behavior)]) -> Arc<Self> {
        let mut behaviors: HashMap<ProviderId, Behavior> =
            ProviderId::ALL.iter().map(|p| (*p, Behavior::ok())).collect();
        for (p, b) in overrides {
            behaviors.insert(*p, b.clone());
        }
        let calls = ProviderId::ALL
            .iter()
            .map(|p| (*p, AtomicUsize::new(0)))
            .collect();
        Arc::new(Self { behaviors, calls })
    }

    pub fn calls(&self, provider: ProviderId) -> usize {
        self.calls
            .get(&provider)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }

    pub fn total_calls(&self) -> usize {
        ProviderId::ALL.iter().map(|p| self.calls(*p)).sum()
    }
}

#[async_trait]
impl ProviderWorker for ScriptedWorker {
    async fn call(
        &self,
        provider: ProviderId,
        model: &str,
        request: &OrchestrationRequest,
    ) -> Result<ProviderReply, OrchestratorError> {
        if let Some(c) = self.calls.get(&provider) {
            c.fetch_add(1, Ordering::SeqCst);
        }
        match self.behaviors.get(&provider).cloned().unwrap_or_else(Behavior::ok) {
            Behavior::Answer { delay, tokens } => {
                tokio::time::sleep(delay).await;
                Ok(ProviderReply {
                    text: format!("{provider}/{model}: {}", request.prompt),
                    tokens_used: tokens,
                })
            }
            Behavior::Fail { delay } => {
                tokio::time::sleep(delay).await;
                Err(OrchestratorError::ProviderCall {
                    provider,
                    reason: "upstream returned 503".to_string(),
                })
            }
            Behavior::Panic => panic!("scripted panic for {provider}"),
        }
    }
}

/// Config with credentials for `providers` and room for 10 in-flight calls each.
pub fn config_with(providers: &[ProviderId]) -> OrchestratorConfig {
    let mut cfg = OrchestratorConfig::default();
    cfg.orchestration.max_concurrent_requests = 40;
    for p in providers {
        cfg.providers.insert(
            *p,
            ProviderConfig {
                api_key: Some(format!("{p}-test-key")),
                ..ProviderConfig::default()
            },
        );
    }
    cfg
}
