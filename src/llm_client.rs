use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client as AsyncOpenAiClient};
use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::config::LlmConfig;

pub type SharedLlmClient = Arc<dyn LlmClient>;

/// One call to the completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String>;
}

/// Used when no API key is configured: every call fails, so filenames that
/// need the model end up as degraded records instead of aborting the run.
#[derive(Debug, Default, Clone)]
pub struct OfflineLlmClient;

#[async_trait]
impl LlmClient for OfflineLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String> {
        Err(anyhow!(
            "completion service not configured (model {} unavailable offline)",
            request.model
        ))
    }
}

impl OfflineLlmClient {
    pub fn shared() -> SharedLlmClient {
        Arc::new(Self)
    }
}

/// OpenAI-compatible client; `OPENAI_BASE_URL` can point it at any compatible backend.
pub struct OpenAiLlmClient {
    client: AsyncOpenAiClient<OpenAIConfig>,
    timeout: Duration,
}

impl OpenAiLlmClient {
    pub fn shared_from_config(config: &LlmConfig) -> anyhow::Result<SharedLlmClient> {
        Ok(Arc::new(Self::from_config(config)?))
    }

    fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("Set OPENAI_KEY (or OPENAI_API_KEY) to use the OpenAI client")?;

        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url.clone());
        }

        Ok(Self {
            client: AsyncOpenAiClient::with_config(openai_config),
            timeout: config.timeout(),
        })
    }

    #[instrument(level = "debug", skip_all, fields(model = %request.model))]
    async fn chat(&self, request: &CompletionRequest) -> anyhow::Result<String> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.as_str())
                    .build()?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt.as_str())
                .build()?
                .into(),
        );

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&request.model)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .messages(messages)
            .build()?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(chat_request))
            .await
            .map_err(|_| {
                anyhow!(
                    "completion timed out after {} ms",
                    self.timeout.as_millis()
                )
            })??;

        let choice = response
            .choices
            .first()
            .context("LLM response did not contain any choices")?;

        choice
            .message
            .content
            .clone()
            .context("LLM response choice had no content")
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String> {
        self.chat(request).await
    }
}

/// Build the OpenAI client, optionally falling back to the offline client
/// when the key is missing.
pub fn build_llm_client(
    config: &LlmConfig,
    default_to_offline: bool,
) -> anyhow::Result<SharedLlmClient> {
    match OpenAiLlmClient::shared_from_config(config) {
        Ok(client) => Ok(client),
        Err(err) if default_to_offline => {
            warn!(?err, "Falling back to OfflineLlmClient; model parses will degrade");
            Ok(OfflineLlmClient::shared())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
pub use scripted::ScriptedLlmClient;
