//! Native client for the Google Generative Language REST API.
//!
//! Unlike the OpenAI-compatible endpoint, the native API exposes thinking
//! budgets, search grounding and the grounding metadata the explore step turns
//! into hop sources.

use crate::error::{Error, Result};
use crate::llm_client::{Completion, CompletionRequest, LLMClient, LLMStream};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// --- Wire types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Serialize)]
struct GoogleSearch {}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ErrorStatus>,
}

/// An error object; inside a stream it arrives with an HTTP 200 status.
#[derive(Deserialize, Debug)]
struct ErrorStatus {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl ErrorStatus {
    fn into_error(self) -> Error {
        Error::UpstreamUnavailable(format!(
            "Gemini reported {} {}: {}",
            self.code, self.status, self.message
        ))
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize, Debug)]
struct GroundingChunk {
    web: Option<WebChunk>,
}

#[derive(Deserialize, Debug)]
struct WebChunk {
    uri: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated answer text of the first candidate, skipping thought parts.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|part| !part.thought)
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Web URIs from the grounding metadata, deduplicated in first-seen order.
    fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        let chunks = self
            .candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|meta| meta.grounding_chunks.as_slice())
            .unwrap_or_default();
        for uri in chunks
            .iter()
            .filter_map(|chunk| chunk.web.as_ref()?.uri.as_ref())
        {
            if !sources.contains(uri) {
                sources.push(uri.clone());
            }
        }
        sources
    }
}

/// Splits a server-sent-event byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// Turns one stream event into a fragment. Events without answer text yield
/// nothing; error events and unreadable events end the stream with an error.
fn stream_event_text(data: &str) -> Option<Result<String>> {
    match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(GenerateContentResponse {
            error: Some(status),
            ..
        }) => Some(Err(status.into_error())),
        Ok(event) => Some(event.text()).filter(|text| !text.is_empty()).map(Ok),
        Err(e) => {
            warn!(error = %e, "Unparseable stream event from Gemini");
            Some(Err(Error::MalformedResponse(format!(
                "unreadable Gemini stream event: {}",
                e
            ))))
        }
    }
}

/// Decodes an SSE body into narration fragments.
fn decode_fragments<S, B>(bytes: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let mut decoder = SseDecoder::default();
    bytes
        .map(move |chunk| {
            let items: Vec<Result<String>> = match chunk {
                Ok(chunk) => decoder
                    .push(chunk.as_ref())
                    .iter()
                    .filter_map(|data| stream_event_text(data))
                    .collect(),
                Err(e) => vec![Err(transport_error(e))],
            };
            futures::stream::iter(items)
        })
        .flatten()
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::UpstreamTimeout(err.to_string())
    } else {
        Error::UpstreamUnavailable(err.to_string())
    }
}

/// An implementation of `LLMClient` for the native Gemini API.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    /// Creates a new Gemini client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - The Gemini API key, sent as `x-goog-api-key`.
    /// * `model` - Model identifier (e.g., "gemini-2.5-flash").
    /// * `request_timeout` - Upper bound on a single HTTP request.
    pub fn new(api_key: String, model: String, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Points the client at a different API root, e.g. a regional proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn body<'a>(request: &'a CompletionRequest) -> GenerateContentRequest<'a> {
        let profile = &request.profile;
        // Gemini rejects a JSON mime type when a tool is attached; the prompt
        // asks for JSON in that case instead.
        let response_mime_type =
            (request.json_output && !profile.web_search).then_some("application/json");
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &request.system,
                }],
            },
            generation_config: GenerationConfig {
                temperature: profile.temperature,
                response_mime_type,
                thinking_config: profile
                    .thinking_budget
                    .map(|thinking_budget| ThinkingConfig { thinking_budget }),
            },
            tools: if profile.web_search {
                vec![Tool {
                    google_search: GoogleSearch {},
                }]
            } else {
                Vec::new()
            },
        }
    }

    async fn post(&self, url: String, request: &CompletionRequest) -> Result<reqwest::Response> {
        debug!(model = %self.model, prompt_len = request.prompt.len(), "Calling Gemini");
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            return Err(Error::UpstreamUnavailable(format!(
                "Gemini returned {}: {}",
                status, excerpt
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LLMClient for GeminiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let mut response: GenerateContentResponse = self
            .post(url, &request)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        if let Some(status) = response.error.take() {
            return Err(status.into_error());
        }

        Ok(Completion {
            text: response.text(),
            sources: response.sources(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<LLMStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );
        let bytes = self.post(url, &request).await?.bytes_stream();
        Ok(Box::pin(decode_fragments(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::CallProfile;

    #[test]
    fn test_response_text_skips_thoughts() {
        let json = r#"{"candidates":[{"content":{"parts":[
            {"text":"pondering","thought":true},
            {"text":"{\"summary\":"},
            {"text":"\"x\"}"}
        ]}}]}"#;
        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text(), "{\"summary\":\"x\"}");
    }

    #[test]
    fn test_sources_from_grounding_chunks() {
        let json = r#"{"candidates":[{
            "content":{"parts":[{"text":"hi"}]},
            "groundingMetadata":{"groundingChunks":[
                {"web":{"uri":"https://a.example","title":"A"}},
                {"web":{"uri":"https://b.example"}},
                {"web":{"uri":"https://a.example"}},
                {"retrievedContext":{}}
            ]}
        }]}"#;
        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            response.sources(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn test_missing_grounding_yields_no_sources() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#)
                .unwrap();
        assert!(response.sources().is_empty());

        let empty = GenerateContentResponse::default();
        assert_eq!(empty.text(), "");
        assert!(empty.sources().is_empty());
    }

    #[test]
    fn test_sse_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let payloads = decoder.push(b"1}\r\n\r\ndata: {\"b\":2}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
    }

    #[test]
    fn test_sse_decoder_handles_split_utf8() {
        let mut decoder = SseDecoder::default();
        let line = "data: café\n".as_bytes();
        let (head, tail) = line.split_at(10);
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec!["café".to_string()]);
    }

    fn sse_body(events: &[&str]) -> Vec<std::result::Result<Vec<u8>, reqwest::Error>> {
        let body: String = events.iter().map(|e| format!("data: {}\r\n\r\n", e)).collect();
        vec![Ok(body.into_bytes())]
    }

    #[tokio::test]
    async fn test_stream_surfaces_in_band_error() {
        let body = sse_body(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"I set off"}]}}]}"#,
            r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#,
        ]);
        let items: Vec<Result<String>> =
            decode_fragments(futures::stream::iter(body)).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "I set off");
        match &items[1] {
            Err(Error::UpstreamUnavailable(message)) => {
                assert!(message.contains("503"));
                assert!(message.contains("overloaded"));
            }
            other => panic!("expected UpstreamUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_rejects_unreadable_event() {
        let body = sse_body(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"Once"}]}}]}"#,
            "{not json",
        ]);
        let items: Vec<Result<String>> =
            decode_fragments(futures::stream::iter(body)).collect().await;

        assert_eq!(items[0].as_deref().unwrap(), "Once");
        assert!(matches!(items[1], Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_stream_skips_events_without_text() {
        assert!(stream_event_text(r#"{"candidates":[]}"#).is_none());
        assert!(stream_event_text(r#"{"usageMetadata":{"totalTokenCount":3}}"#).is_none());
    }

    #[test]
    fn test_body_maps_profile() {
        let request = CompletionRequest {
            system: "You are a foodie.".into(),
            prompt: "Research tea".into(),
            json_output: true,
            profile: CallProfile {
                temperature: None,
                thinking_budget: Some(0),
                web_search: true,
            },
        };
        let body = serde_json::to_value(GeminiClient::body(&request)).unwrap();
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 0);
        assert!(body["generationConfig"].get("responseMimeType").is_none());
        assert!(body["tools"][0]["googleSearch"].is_object());
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are a foodie.");
        assert_eq!(body["contents"][0]["role"], "user");

        let plain = CompletionRequest {
            profile: CallProfile {
                temperature: Some(1.4),
                ..CallProfile::default()
            },
            ..request
        };
        let body = serde_json::to_value(GeminiClient::body(&plain)).unwrap();
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert!(body.get("tools").is_none());
        assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 1.4).abs() < 1e-6);
    }
}
