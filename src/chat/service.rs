//! the completion service seam.
//!
//! [`ChatPipeline`](super::ChatPipeline) only sees [`CompletionService`]; the
//! live implementation sits on top of the `llm` crate and tests plug in a
//! scripted one.
//!
//! api docs for the provider side: https://docs.rs/llm
//!   - chat provider:   `llm::chat::ChatProvider`
//!   - streaming:       `llm::chat::{StreamResponse, StreamChoice, StreamDelta}`

use std::any::type_name_of_val;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bevy::prelude::*;
use futures_lite::{Stream, StreamExt, stream};
use llm::{
    LLMProvider,
    builder::{LLMBackend, LLMBuilder},
    chat::{ChatMessage, ChatProvider, StreamChoice, StreamResponse},
};

use super::transcript::ConversationTurn;
use crate::config::ChatConfig;
use crate::error::ChatError;

/// one incremental piece of a streamed reply. `None` (or empty) deltas are
/// skipped by the pipeline, not treated as errors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fragment {
    pub delta: Option<String>,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self { delta: Some(text.into()) }
    }

    pub fn empty() -> Self {
        Self { delta: None }
    }

    pub fn from_response(StreamResponse { choices, .. }: StreamResponse) -> Self {
        Self::from_choices(choices)
    }

    /// the first choice's text delta; tool calls are not used by the assistant.
    pub fn from_choices(choices: Vec<StreamChoice>) -> Self {
        let delta = choices
            .into_iter()
            .next()
            .and_then(|StreamChoice { delta }| delta.content);
        Self { delta }
    }

    /// the delta, if it carries any text.
    pub fn as_text(&self) -> Option<&str> {
        self.delta.as_deref().filter(|t| !t.is_empty())
    }
}

/// fragments in arrival order; exhaustion means the reply is complete.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, ChatError>> + Send>>;

/// everything a completion call carries on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    /// fixed instruction sent ahead of the conversation.
    pub system: String,
    /// prior transcript followed by the new user message.
    pub messages: Vec<ConversationTurn>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages.last().map(|m| m.content.as_str())
    }

    fn chat_messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(ConversationTurn::to_chat_message).collect()
    }
}

/// a remote text-completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// opens a reply stream. errors here count as setup failures; errors
    /// yielded by the stream count as mid-stream failures.
    async fn complete(&self, request: &CompletionRequest) -> Result<FragmentStream, ChatError>;
}

/// the provider settings that are fixed at build time in `llm`.
#[derive(Clone, Debug, PartialEq)]
struct ProviderProfile {
    model: String,
    system: String,
    max_tokens: u32,
    temperature: f32,
}

impl ProviderProfile {
    fn of_config(config: &ChatConfig) -> Self {
        Self {
            model: config.model.clone(),
            system: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn of_request(request: &CompletionRequest) -> Self {
        Self {
            model: request.model.clone(),
            system: request.system.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

/// [`CompletionService`] backed by an openai-compatible `llm` provider.
///
/// the provider is built once from the config. a request asking for different
/// model settings gets a one-off provider instead of silently using the wrong
/// ones.
pub struct LlmCompletionService {
    config: ChatConfig,
    profile: ProviderProfile,
    provider: Arc<dyn LLMProvider>,
}

impl LlmCompletionService {
    pub fn from_config(config: &ChatConfig) -> Result<Self, ChatError> {
        let profile = ProviderProfile::of_config(config);
        let provider = build_provider(config, &profile)?;
        info!(target: "linetab::chat",
            "completion provider ready: base_url='{}', model='{}'",
            config.provider_base_url(), profile.model
        );
        Ok(Self { config: config.clone(), profile, provider })
    }

    fn provider_for(&self, request: &CompletionRequest) -> Result<Arc<dyn LLMProvider>, ChatError> {
        let wanted = ProviderProfile::of_request(request);
        if wanted == self.profile {
            return Ok(self.provider.clone());
        }
        debug!(target: "linetab::chat", "request overrides provider settings (model='{}'), building one-off provider", wanted.model);
        build_provider(&self.config, &wanted)
    }
}

fn build_provider(config: &ChatConfig, profile: &ProviderProfile) -> Result<Arc<dyn LLMProvider>, ChatError> {
    let key = config
        .credential()
        .ok_or_else(|| ChatError::Config("no api key configured".into()))?;
    // the provider panics on a base it can't parse, so reject it here
    let base_url = config.provider_base_url();
    url::Url::parse(&base_url)
        .map_err(|e| ChatError::Config(format!("invalid base url '{}': {e}", config.base_url)))?;
    let provider = LLMBuilder::new()
        .backend(LLMBackend::OpenAI)
        .base_url(base_url)
        .api_key(key)
        .model(profile.model.clone())
        .max_tokens(profile.max_tokens)
        .temperature(profile.temperature)
        .system(profile.system.clone())
        .build()?;
    Ok(provider.into())
}

#[async_trait]
impl CompletionService for LlmCompletionService {
    async fn complete(&self, request: &CompletionRequest) -> Result<FragmentStream, ChatError> {
        let provider = self.provider_for(request)?;
        let messages = request.chat_messages();
        let pty = type_name_of_val(provider.as_ref());

        if request.stream {
            match provider.chat_stream_struct(&messages).await {
                Ok(s) => {
                    let fragments = s.map(|item| item.map(Fragment::from_response).map_err(ChatError::from));
                    return Ok(Box::pin(fragments));
                }
                Err(err) => {
                    warn!(target: "linetab::chat",
                        "structured streaming failed for provider {}: {err}. falling back to one-shot chat()",
                        pty
                    );
                }
            }
        }

        // one-shot reply delivered as a single fragment
        let resp = provider.chat(&messages).await?;
        let text = resp.text().unwrap_or_default();
        debug!(target: "linetab::chat", "one-shot chat completed: len={}", text.len());
        Ok(Box::pin(stream::once(Ok(Fragment::text(text)))))
    }
}

/// the service the config asks for: `None` when no credential is set, which
/// puts the pipeline on its offline fallback path.
pub fn connect(config: &ChatConfig) -> Result<Option<Arc<dyn CompletionService>>, ChatError> {
    if !config.has_credential() {
        info!(target: "linetab::chat", "no api key configured; chat runs in offline fallback mode");
        return Ok(None);
    }
    let service: Arc<dyn CompletionService> = Arc::new(LlmCompletionService::from_config(config)?);
    Ok(Some(service))
}
