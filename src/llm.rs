//! Text-completion boundary: the [`CompletionClient`] trait, its production
//! implementation over `edgequake-llm`, and the retry/parsing helpers shared
//! by the pipeline stages that call a model.
//!
//! Every stage talks to `dyn CompletionClient`, never to a concrete provider.
//! Tests inject scripted clients; production resolves a provider through
//! [`resolve_client`].

use crate::config::ScreenConfig;
use crate::error::{CompletionError, ScreenError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default model when the caller names a provider but no model.
const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// A single-turn text completion service.
///
/// One system message, one user message, one text response. That is all the
/// pipeline ever needs, so that is all the trait exposes.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Identifier recorded in output metadata (e.g. "gpt-4.1-mini").
    fn model_id(&self) -> &str;

    /// Run one completion. Failures carry the retryable/invalid-request tag.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: usize,
    ) -> Result<String, CompletionError>;
}

/// Production [`CompletionClient`] over an `edgequake-llm` provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: f32,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
        }
    }
}

#[async_trait]
impl CompletionClient for ProviderClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: usize,
    ) -> Result<String, CompletionError> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_provider_error(&format!("{e}")))?;

        debug!(
            model = %self.model,
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            "completion finished"
        );
        Ok(response.content)
    }
}

/// Tag a provider error message as retryable or not.
///
/// Providers surface errors as display strings, so classification is by
/// marker: anything that looks like a 4xx-class rejection of the request
/// itself is `InvalidRequest`, everything else (timeouts, rate limits,
/// 5xx) is `Transient`.
pub fn classify_provider_error(message: &str) -> CompletionError {
    let lower = message.to_lowercase();
    let invalid = ["invalid request", "invalid_request", "bad request", "400", "content_filter", "content policy"];
    if invalid.iter().any(|marker| lower.contains(marker)) {
        CompletionError::InvalidRequest(message.to_string())
    } else {
        CompletionError::Transient(message.to_string())
    }
}

/// Strip a markdown code fence from a strict-JSON response.
///
/// Models wrap JSON in ```` ```json ```` fences despite instructions not to;
/// parsing must tolerate it.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let inner = trimmed.trim_start_matches('`');
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    let inner = match inner.find("```") {
        Some(end) => &inner[..end],
        None => inner,
    };
    inner.trim()
}

/// Bounded exponential backoff: doubles per failed attempt, clamped to
/// `[base_secs, cap_secs]`. `attempt` is the number of failures so far (≥ 1).
pub fn backoff_delay(attempt: u32, base_secs: u64, cap_secs: u64) -> Duration {
    let raw = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(raw.clamp(base_secs, cap_secs))
}

/// Resolve the completion client, from most-specific to least-specific.
///
/// 1. **Pre-built client** (`config.completion`) — used as-is. This is how
///    tests run the full pipeline without network access.
/// 2. **Named provider** (`config.provider_name`) — instantiated via
///    [`ProviderFactory::create_llm_provider`], which reads the matching API
///    key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`) —
///    provider and model chosen at the execution-environment level.
/// 4. **Full auto-detection** ([`ProviderFactory::from_env`]) — first
///    provider whose API key variable is present.
pub fn resolve_client(config: &ScreenConfig) -> Result<Arc<dyn CompletionClient>, ScreenError> {
    if let Some(ref client) = config.completion {
        return Ok(Arc::clone(client));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let provider = named_provider(name, model)?;
        return Ok(Arc::new(ProviderClient::new(
            provider,
            model,
            config.temperature,
        )));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            let provider = named_provider(&prov, &model)?;
            return Ok(Arc::new(ProviderClient::new(
                provider,
                model,
                config.temperature,
            )));
        }
    }

    let (provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        ScreenError::ClientNotConfigured(format!("auto-detection failed: {e}"))
    })?;
    let model = config.model.clone().unwrap_or_else(|| "auto".to_string());
    Ok(Arc::new(ProviderClient::new(
        provider,
        model,
        config.temperature,
    )))
}

fn named_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ScreenError> {
    ProviderFactory::create_llm_provider(name, model)
        .map_err(|e| ScreenError::ClientNotConfigured(format!("provider '{name}': {e}")))
}
