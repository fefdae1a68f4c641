//! OpenAI chat-completions adapter implementing [`BaseAI`].
//!
//! Failures are reported as [`ProviderError`] so the pipeline can tell
//! transient from permanent errors.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::provider_error::ProviderError;
use super::traits::{BaseAI, CompletionOptions, TextStream};

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct OpenAiProvider {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChoiceRaw>,
}

#[derive(Debug, Deserialize)]
struct ChoiceRaw {
    message: MessageRaw,
}

#[derive(Debug, Deserialize)]
struct MessageRaw {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
        })
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
        options: &'a CompletionOptions,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: options.model.as_deref().unwrap_or(&self.model),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: options.json.then_some(ResponseFormat {
                kind: "json_object",
            }),
            stream,
        }
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(header::CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OpenAI request failed");
                ProviderError::from_reqwest(PROVIDER, &e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "OpenAI API error");
            return Err(ProviderError::from_status(PROVIDER, status, &error_text));
        }
        Ok(response)
    }
}

#[async_trait]
impl BaseAI for OpenAiProvider {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        let start = std::time::Instant::now();
        let request = self.request(system, user, options, false);
        let response = self.send(&request).await?;

        let raw: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, &e))?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse {
                provider: PROVIDER,
                message: "response contained no choices".into(),
            })?;

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis(),
            "OpenAI chat completion"
        );
        Ok(content)
    }

    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<TextStream> {
        let request = self.request(system, user, options, true);
        let response = self.send(&request).await?;

        let deltas = SseDeltaStream::new(response.bytes_stream())
            .map(|item| item.map_err(anyhow::Error::from));
        Ok(Box::pin(deltas))
    }
}

// =============================================================================
// SSE streaming
// =============================================================================

#[derive(Debug, Deserialize)]
struct StreamChunkRaw {
    choices: Vec<StreamChoiceRaw>,
}

#[derive(Debug, Deserialize)]
struct StreamChoiceRaw {
    delta: DeltaRaw,
}

#[derive(Debug, Deserialize)]
struct DeltaRaw {
    #[serde(default)]
    content: Option<String>,
}

/// What one SSE line carried.
#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// Converts a raw byte stream into text deltas, ending at `data: [DONE]`.
struct SseDeltaStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    /// Bytes not yet terminated by a newline. Kept as bytes so multi-byte
    /// characters split across chunks survive.
    buffer: Vec<u8>,
    done: bool,
}

impl SseDeltaStream {
    fn new(byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: Vec::new(),
            done: false,
        }
    }

    fn next_event(&mut self) -> Option<Result<SseEvent, ProviderError>> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            match std::str::from_utf8(&line) {
                Ok(text) => {
                    if let Some(event) = parse_sse_line(text) {
                        return Some(event);
                    }
                }
                Err(e) => {
                    return Some(Err(ProviderError::Parse {
                        provider: PROVIDER,
                        message: format!("invalid UTF-8 in stream: {}", e),
                    }))
                }
            }
        }
        None
    }
}

impl Stream for SseDeltaStream {
    type Item = Result<String, ProviderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            match this.next_event() {
                Some(Ok(SseEvent::Delta(delta))) if delta.is_empty() => continue,
                Some(Ok(SseEvent::Delta(delta))) => return Poll::Ready(Some(Ok(delta))),
                Some(Ok(SseEvent::Done)) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => {}
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(ProviderError::from_reqwest(PROVIDER, &e))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    // A final line without a trailing newline
                    if !this.buffer.is_empty() {
                        this.buffer.push(b'\n');
                        if let Some(Ok(SseEvent::Delta(delta))) = this.next_event() {
                            if !delta.is_empty() {
                                return Poll::Ready(Some(Ok(delta)));
                            }
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Parse one SSE line. Blank lines and non-data fields yield `None`.
fn parse_sse_line(line: &str) -> Option<Result<SseEvent, ProviderError>> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(Ok(SseEvent::Done));
    }

    Some(
        serde_json::from_str::<StreamChunkRaw>(data)
            .map(|raw| {
                SseEvent::Delta(
                    raw.choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content)
                        .unwrap_or_default(),
                )
            })
            .map_err(|e| ProviderError::Parse {
                provider: PROVIDER,
                message: format!(
                    "failed to parse stream chunk: {} (data: {})",
                    e,
                    data.chars().take(200).collect::<String>()
                ),
            }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A base URL on a local port nothing listens on.
    fn closed_local_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}/v1", port)
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let provider = OpenAiProvider::new("sk-test", "gpt-4o")
            .unwrap()
            .with_base_url(closed_local_url());

        let err = provider
            .generate("system", "user", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(crate::kernel::provider_error::is_transient(&err), "{:#}", err);

        let err = match provider
            .generate_stream("system", "user", &CompletionOptions::default())
            .await
        {
            Ok(_) => panic!("stream opened against a closed port"),
            Err(e) => e,
        };
        assert!(err
            .downcast_ref::<ProviderError>()
            .is_some_and(ProviderError::is_transient));
    }

    fn byte_stream(chunks: Vec<&'static [u8]>) -> SseDeltaStream {
        let items: Vec<Result<Bytes, reqwest::Error>> =
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))).collect();
        SseDeltaStream::new(futures::stream::iter(items))
    }

    #[test]
    fn test_parse_data_line() {
        let event = parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#);
        assert_eq!(event, Some(Ok(SseEvent::Delta("Hi".into()))));
    }

    #[test]
    fn test_parse_done_and_ignored_lines() {
        assert_eq!(parse_sse_line("data: [DONE]"), Some(Ok(SseEvent::Done)));
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line("event: ping"), None);
    }

    #[test]
    fn test_parse_bad_json_is_parse_error() {
        let event = parse_sse_line("data: {not json").unwrap();
        assert!(matches!(event, Err(ProviderError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_stream_joins_split_chunks() {
        let stream = byte_stream(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi".as_slice(),
            b"ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n".as_slice(),
            b"data: [DONE]\n\n".as_slice(),
        ]);

        let deltas: Vec<String> = stream.map(|d| d.unwrap()).collect().await;
        assert_eq!(deltas, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_keeps_multibyte_characters_split_across_chunks() {
        // "é" is 0xC3 0xA9
        let stream = byte_stream(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"caf\xC3".as_slice(),
            b"\xA9\"}}]}\n".as_slice(),
            b"data: [DONE]\n".as_slice(),
        ]);

        let deltas: Vec<String> = stream.map(|d| d.unwrap()).collect().await;
        assert_eq!(deltas, vec!["café".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_skips_role_only_chunks() {
        let stream = byte_stream(vec![
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n".as_slice(),
            b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n".as_slice(),
        ]);

        let deltas: Vec<String> = stream.map(|d| d.unwrap()).collect().await;
        assert_eq!(deltas, vec!["x".to_string()]);
    }

    #[test]
    fn test_json_option_sets_response_format() {
        let provider = OpenAiProvider::new("key", "gpt-4o").unwrap();
        let options = CompletionOptions::json();
        let request = provider.request("s", "u", &options, false);

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["model"], "gpt-4o");
        assert!(body.get("stream").is_none());
    }
}
