//! Provider call abstraction.
//!
//! The orchestrator treats "call provider X" as an opaque, unreliable async
//! operation. [`ProviderWorker`] is that seam; [`WorkerTable`] maps every
//! [`ProviderId`] to its implementation once, at construction.
//!
//! [`EchoWorker`] is the simulated backend used by the demo binary and the
//! tests. Real network clients are supplied by the embedding application.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::provider::ProviderId;
use crate::{OrchestrationRequest, OrchestratorError};

/// What a provider call returns on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    /// Generated text.
    pub text: String,
    /// Tokens consumed, when the backend reports them.
    pub tokens_used: Option<f64>,
}

impl ProviderReply {
    /// Reply without token accounting.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_used: None,
        }
    }

    /// Reported tokens, or an estimate of 1.3 tokens per word.
    pub fn tokens_or_estimate(&self) -> f64 {
        self.tokens_used
            .unwrap_or_else(|| estimate_tokens(&self.text))
    }
}

/// Rough token count for text a backend did not meter.
pub fn estimate_tokens(text: &str) -> f64 {
    text.split_whitespace().count() as f64 * 1.3
}

/// Trait for provider call implementations.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via `Arc<dyn ProviderWorker>`.
#[async_trait]
pub trait ProviderWorker: Send + Sync {
    /// Answer `request` as `provider` using `model`.
    ///
    /// # Errors
    ///
    /// Any error is recorded as a failure for `provider`; it never affects
    /// sibling calls.
    async fn call(
        &self,
        provider: ProviderId,
        model: &str,
        request: &OrchestrationRequest,
    ) -> Result<ProviderReply, OrchestratorError>;
}

// ============================================================================
// Echo Worker (Testing)
// ============================================================================

/// Simulated backend.
///
/// Sleeps for `delay`, then answers `"[<label>] Response to: <first 50 chars>..."`.
#[derive(Debug, Clone)]
pub struct EchoWorker {
    /// Simulated inference delay.
    pub delay: Duration,
}

impl EchoWorker {
    /// Worker with the default 100ms delay.
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(100),
        }
    }

    /// Worker with a custom delay.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for EchoWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderWorker for EchoWorker {
    async fn call(
        &self,
        provider: ProviderId,
        _model: &str,
        request: &OrchestrationRequest,
    ) -> Result<ProviderReply, OrchestratorError> {
        tokio::time::sleep(self.delay).await;
        let head: String = request.prompt.chars().take(50).collect();
        Ok(ProviderReply::text(format!(
            "[{}] Response to: {head}...",
            provider.display_label()
        )))
    }
}

// ============================================================================
// Worker table
// ============================================================================

/// Capability-indexed mapping from provider to call implementation.
///
/// Resolved once; lookups never allocate or branch on strings.
#[derive(Clone, Default)]
pub struct WorkerTable {
    workers: BTreeMap<ProviderId, Arc<dyn ProviderWorker>>,
}

impl std::fmt::Debug for WorkerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerTable")
            .field("providers", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WorkerTable {
    /// Empty table. Providers without a worker fail every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same worker for every provider.
    pub fn uniform(worker: Arc<dyn ProviderWorker>) -> Self {
        let workers = ProviderId::ALL
            .into_iter()
            .map(|p| (p, Arc::clone(&worker)))
            .collect();
        Self { workers }
    }

    /// Register `worker` for `provider`, replacing any previous one.
    pub fn with(mut self, provider: ProviderId, worker: Arc<dyn ProviderWorker>) -> Self {
        self.workers.insert(provider, worker);
        self
    }

    /// Worker for `provider`, if registered.
    pub fn get(&self, provider: ProviderId) -> Option<Arc<dyn ProviderWorker>> {
        self.workers.get(&provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_worker_formats_response() {
        let worker = EchoWorker::with_delay(Duration::from_millis(1));
        let req = OrchestrationRequest::new("Explain borrow checking", vec![]);
        let reply = worker
            .call(ProviderId::Anthropic, "claude-3-sonnet", &req)
            .await
            .expect("test: echo call");
        assert_eq!(
            reply.text,
            "[Anthropic Claude] Response to: Explain borrow checking..."
        );
        assert!(reply.tokens_used.is_none());
    }

    #[tokio::test]
    async fn test_echo_worker_truncates_prompt_to_50_chars() {
        let worker = EchoWorker::with_delay(Duration::ZERO);
        let req = OrchestrationRequest::new("x".repeat(80), vec![]);
        let reply = worker
            .call(ProviderId::Grok, "grok-1", &req)
            .await
            .expect("test: echo call");
        assert_eq!(reply.text, format!("[xAI Grok] Response to: {}...", "x".repeat(50)));
    }

    #[test]
    fn test_token_estimate_is_words_times_1_3() {
        let reply = ProviderReply::text("one two three four five six seven eight nine ten");
        assert!((reply.tokens_or_estimate() - 13.0).abs() < 1e-9);
        let metered = ProviderReply {
            text: "a b".into(),
            tokens_used: Some(42.0),
        };
        assert_eq!(metered.tokens_or_estimate(), 42.0);
    }

    #[test]
    fn test_worker_table_lookup() {
        let table = WorkerTable::new().with(ProviderId::Gemini, Arc::new(EchoWorker::new()));
        assert!(table.get(ProviderId::Gemini).is_some());
        assert!(table.get(ProviderId::OpenAi).is_none());

        let uniform = WorkerTable::uniform(Arc::new(EchoWorker::new()));
        assert!(ProviderId::ALL.iter().all(|p| uniform.get(*p).is_some()));
    }
}
