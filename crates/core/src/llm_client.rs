use crate::error::{Error, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

/// A stream of narration text fragments from the LLM.
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Generation knobs that vary per call site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallProfile {
    /// Sampling temperature; `None` leaves the provider default.
    pub temperature: Option<f32>,
    /// Token budget for extended deliberation. `Some(0)` disables it.
    pub thinking_budget: Option<u32>,
    /// Let the model ground its answer with a web search.
    pub web_search: bool,
}

/// A single-turn request to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// System instruction, carrying the persona.
    pub system: String,
    /// The user turn.
    pub prompt: String,
    /// Ask the provider for a JSON-only payload where it supports that.
    pub json_output: bool,
    pub profile: CallProfile,
}

/// The text of a non-streaming generation plus any grounding URIs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub sources: Vec<String>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
        }
    }
}

/// A generic client for interacting with an LLM.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Makes a single, non-streaming call and returns the whole response.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;

    /// Makes a streaming call. Empty fragments are never yielded.
    async fn stream(&self, request: CompletionRequest) -> Result<LLMStream>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
///
/// Thinking budgets and web search have no equivalent on this API and are
/// ignored, so completions from this client never carry sources.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4o").
    /// * `request_timeout` - Upper bound on a single HTTP request.
    pub fn new(config: OpenAIConfig, model: String, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client: Client::with_config(config).with_http_client(http),
            model,
        })
    }

    fn build_request(
        &self,
        request: CompletionRequest,
        stream: bool,
    ) -> std::result::Result<CreateChatCompletionRequest, OpenAIError> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system)
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt)
                .build()?
                .into(),
        ];

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages);
        if let Some(temperature) = request.profile.temperature {
            args.temperature(temperature);
        }
        if request.json_output {
            args.response_format(ResponseFormat::JsonObject);
        }
        if stream {
            args.stream(true);
        }
        args.build()
    }
}

fn upstream_error(err: OpenAIError) -> Error {
    match err {
        OpenAIError::Reqwest(e) if e.is_timeout() => Error::UpstreamTimeout(e.to_string()),
        other => Error::UpstreamUnavailable(other.to_string()),
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let request = self.build_request(request, false).map_err(upstream_error)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(upstream_error)?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                Error::MalformedResponse("LLM response had no text content".to_string())
            })?;

        Ok(Completion::text(text))
    }

    async fn stream(&self, request: CompletionRequest) -> Result<LLMStream> {
        let request = self.build_request(request, true).map_err(upstream_error)?;
        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(upstream_error)?;

        Ok(Box::pin(stream.filter_map(|result| async move {
            match result {
                Ok(response) => response
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.clone())
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(upstream_error(e))),
            }
        })))
    }
}
