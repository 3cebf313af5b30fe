//! FixAgent: cache lookup, fast path, then the full investigation loop.

mod machine;
pub mod state;

pub use state::{
    transition, AgentPhase, AgentState, Event, FailureReason, InvestigationEntry, ProposalStatus,
    FAILURE_SUGGESTIONS,
};

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::ProviderError;
use crate::fast_path::{self, fix::generate_fast_fix};
use crate::llm::{OpenRouterProvider, ReasoningClient, ReasoningProvider, RetryPolicy};
use crate::tools::ToolExecutor;
use crate::types::{FailureSignature, FixResult};
use machine::AgentRunner;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One request to repair one failure.
#[derive(Debug, Clone)]
pub struct FixRequest {
    pub signature: FailureSignature,
    pub project_context: Option<String>,
    /// Read and write the response cache.
    pub use_cache: bool,
}

impl FixRequest {
    pub fn new(signature: FailureSignature) -> Self {
        Self {
            signature,
            project_context: None,
            use_cache: true,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.project_context = Some(context.into());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

pub struct FixAgent {
    config: Config,
    executor: ToolExecutor,
    client: ReasoningClient,
    cache: ResponseCache,
}

impl FixAgent {
    pub fn new(project_root: impl Into<PathBuf>, config: Config, provider: Arc<dyn ReasoningProvider>) -> Self {
        let root = project_root.into();
        let executor = ToolExecutor::new(root, config.tools.clone());
        let cache = ResponseCache::new(executor.root(), &config.cache);
        let client = ReasoningClient::new(provider, RetryPolicy::from_config(&config.retry))
            .with_max_tokens(config.max_completion_tokens);
        Self {
            config,
            executor,
            client,
            cache,
        }
    }

    /// Agent backed by OpenRouter; fails when no API key is configured.
    pub fn from_config(project_root: impl Into<PathBuf>, config: Config) -> Result<Self, ProviderError> {
        let provider = OpenRouterProvider::from_config(&config)?;
        Ok(Self::new(project_root, config, Arc::new(provider)))
    }

    /// Replace the retry policy, keeping the provider.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.client = self.client.with_retry(retry);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn client(&self) -> &ReasoningClient {
        &self.client
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub async fn request_fix(&self, request: &FixRequest) -> FixResult {
        self.request_fix_with_cancel(request, CancellationToken::new()).await
    }

    pub async fn request_fix_with_cancel(&self, request: &FixRequest, cancel: CancellationToken) -> FixResult {
        let signature = &request.signature;
        let context = request.project_context.as_deref();

        if request.use_cache {
            if let Some(hit) = self.cache.get(signature, context) {
                tracing::info!(category = %signature.category, "cache hit");
                return hit;
            }
        }

        if let Some(diagnosis) = fast_path::diagnose(&signature.message, &signature.raw_output) {
            if diagnosis.confidence >= self.config.fast_path_threshold {
                tracing::info!(
                    issue = %diagnosis.issue_type,
                    confidence = diagnosis.confidence,
                    "fast path diagnosis"
                );
                if let Some(fix) = generate_fast_fix(&diagnosis, &self.executor).await {
                    self.remember(request, &fix);
                    return fix;
                }
                tracing::info!(issue = %diagnosis.issue_type, "fast path produced no fix, running agent");
            } else {
                tracing::debug!(
                    issue = %diagnosis.issue_type,
                    confidence = diagnosis.confidence,
                    "diagnosis below fast path threshold"
                );
            }
        }

        let state = self.run_agent(request, cancel).await;
        let result = state.to_fix_result();
        self.remember(request, &result);
        result
    }

    /// Run the investigation loop alone, skipping cache and fast path.
    pub async fn run_agent(&self, request: &FixRequest, cancel: CancellationToken) -> AgentState {
        let state = AgentState::new(self.config.max_iterations, self.config.max_token_budget);
        AgentRunner::new(&self.client, &self.executor, cancel)
            .run(&request.signature, request.project_context.as_deref(), state)
            .await
    }

    fn remember(&self, request: &FixRequest, result: &FixResult) {
        if request.use_cache && result.is_cacheable() {
            self.cache
                .set(&request.signature, request.project_context.as_deref(), result);
        }
    }
}
