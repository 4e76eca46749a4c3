use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::completion::{ChunkStream, CompletionService};
use super::config_service::EffectiveConfig;
use super::prompts;
use crate::error::{AssistError, Result};
use crate::models::{CompletionRequest, ImageResult, ServiceErrorBody};

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// One `data:` payload of a streamed chat completion
#[derive(Debug, Deserialize)]
struct StreamChunkPayload {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    n: u32,
}

/// OpenAI image response
#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

/// Map a transport failure onto the user-facing taxonomy.
fn classify_transport_error(err: &reqwest::Error) -> AssistError {
    if err.is_connect() || err.is_timeout() {
        AssistError::ServiceUnavailable(err.to_string())
    } else {
        AssistError::service(err.status().map(|s| s.as_u16()), format!("Request failed: {}", err))
    }
}

/// Turn a non-2xx response into an error carrying `error ?? details ?? "unknown"`.
async fn error_from_response(response: Response) -> AssistError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ServiceErrorBody>(&body)
        .map(|parsed| parsed.message())
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                "unknown".to_string()
            } else {
                body.trim().to_string()
            }
        });

    if status == StatusCode::UNAUTHORIZED {
        AssistError::Authentication(message)
    } else {
        AssistError::service(Some(status.as_u16()), message)
    }
}

fn parse_size(size: &str) -> (u32, u32) {
    size.split_once('x')
        .and_then(|(w, h)| Some((w.trim().parse().ok()?, h.trim().parse().ok()?)))
        .unwrap_or((1024, 1024))
}

fn aspect_ratio(width: u32, height: u32) -> String {
    fn gcd(a: u32, b: u32) -> u32 {
        if b == 0 { a } else { gcd(b, a % b) }
    }
    let divisor = gcd(width, height).max(1);
    format!("{}:{}", width / divisor, height / divisor)
}

/// What one decoded line of a response body means.
#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Error(String),
    Ignore,
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        // Comments, `event:`/`id:` fields and blank separators.
        return SseLine::Ignore;
    };
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamChunkPayload>(data) {
        Ok(payload) => {
            if let Some(error) = payload.error {
                let body = ServiceErrorBody {
                    error: Some(error),
                    ..ServiceErrorBody::default()
                };
                return SseLine::Error(body.message());
            }
            let text: String = payload
                .choices
                .into_iter()
                .filter_map(|choice| choice.delta.content)
                .collect();
            if text.is_empty() {
                SseLine::Ignore
            } else {
                SseLine::Delta(text)
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed stream payload");
            SseLine::Ignore
        }
    }
}

/// Decodes a response body into text chunks.
///
/// Bytes are buffered until a full line (SSE) or a full UTF-8 sequence
/// (plain text) is available, so multi-byte characters split across network
/// reads are never corrupted.
#[derive(Debug)]
enum BodyDecoder {
    Sse { buffer: Vec<u8>, done: bool },
    Text { buffer: Vec<u8> },
}

impl BodyDecoder {
    fn for_content_type(content_type: &str) -> Self {
        if content_type.starts_with("text/event-stream") {
            BodyDecoder::Sse {
                buffer: Vec::new(),
                done: false,
            }
        } else {
            BodyDecoder::Text { buffer: Vec::new() }
        }
    }

    fn is_done(&self) -> bool {
        matches!(self, BodyDecoder::Sse { done: true, .. })
    }

    fn feed(&mut self, bytes: &[u8]) -> Vec<Result<String>> {
        match self {
            BodyDecoder::Sse { buffer, done } => {
                if *done {
                    return Vec::new();
                }
                buffer.extend_from_slice(bytes);
                let mut out = Vec::new();
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                    match parse_sse_line(&line) {
                        SseLine::Delta(text) => out.push(Ok(text)),
                        SseLine::Error(message) => {
                            out.push(Err(AssistError::service(None, message)));
                            *done = true;
                        }
                        SseLine::Done => *done = true,
                        SseLine::Ignore => {}
                    }
                    if *done {
                        buffer.clear();
                        break;
                    }
                }
                out
            }
            BodyDecoder::Text { buffer } => {
                buffer.extend_from_slice(bytes);
                let checked = std::str::from_utf8(buffer.as_slice())
                    .map(|s| s.len())
                    .map_err(|e| (e.valid_up_to(), e.error_len()));
                let valid = match checked {
                    Ok(len) => len,
                    // Incomplete sequence at the end: wait for the next read.
                    Err((valid_up_to, None)) => valid_up_to,
                    Err((_, Some(_))) => {
                        let text = String::from_utf8_lossy(buffer).into_owned();
                        buffer.clear();
                        return vec![Ok(text)];
                    }
                };
                if valid == 0 {
                    return Vec::new();
                }
                let rest = buffer.split_off(valid);
                let text = String::from_utf8_lossy(buffer).into_owned();
                *buffer = rest;
                vec![Ok(text)]
            }
        }
    }

    /// Body ended: decode any trailing bytes. An event stream that closes
    /// before `[DONE]` was cut off and reports an interruption.
    fn finish(&mut self) -> Vec<Result<String>> {
        match self {
            BodyDecoder::Sse { buffer, done } => {
                if *done {
                    return Vec::new();
                }
                let line = String::from_utf8_lossy(buffer).into_owned();
                buffer.clear();
                *done = true;
                let mut out = Vec::new();
                match parse_sse_line(&line) {
                    SseLine::Delta(text) => out.push(Ok(text)),
                    SseLine::Error(message) => return vec![Err(AssistError::service(None, message))],
                    SseLine::Done => return Vec::new(),
                    SseLine::Ignore => {}
                }
                tracing::warn!("event stream closed before [DONE]");
                out.push(Err(AssistError::StreamInterrupted {
                    message: "the response ended before it was complete".to_string(),
                    partial: String::new(),
                }));
                out
            }
            BodyDecoder::Text { buffer } => {
                if buffer.is_empty() {
                    return Vec::new();
                }
                let text = String::from_utf8_lossy(buffer).into_owned();
                buffer.clear();
                vec![Ok(text)]
            }
        }
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct BodyState {
    body: ByteStream,
    decoder: BodyDecoder,
    queue: VecDeque<Result<String>>,
    ended: bool,
}

fn decode_body(response: Response) -> ChunkStream {
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let state = BodyState {
        body: Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()))),
        decoder: BodyDecoder::for_content_type(&content_type),
        queue: VecDeque::new(),
        ended: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }
            if state.ended {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let items = state.decoder.feed(&bytes);
                    state.queue.extend(items);
                    state.ended = state.decoder.is_done();
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "response body failed mid-stream");
                    state.ended = true;
                    state.queue.push_back(Err(AssistError::StreamInterrupted {
                        message: e.to_string(),
                        partial: String::new(),
                    }));
                }
                None => {
                    state.ended = true;
                    let items = state.decoder.finish();
                    state.queue.extend(items);
                }
            }
        }
    });

    Box::pin(stream)
}

/// LLM Client for OpenAI-compatible APIs
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    image_model: String,
    image_size: String,
    temperature: f32,
}

impl LlmClient {
    /// Create a new LLM client with the given configuration
    pub fn new(config: &EffectiveConfig) -> Result<Self> {
        Url::parse(&config.base_url)
            .map_err(|e| AssistError::config(format!("Invalid base URL '{}': {}", config.base_url, e)))?;

        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AssistError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            image_model: config.image_model.clone(),
            image_size: config.image_size.clone(),
            temperature: config.temperature,
        })
    }

    /// Create a new LLM client from the app's configuration
    pub fn from_config() -> Result<Self> {
        let config = super::config_service::get_effective_config()?;

        if config.api_key.is_empty() {
            return Err(AssistError::config(
                "No API key configured. Please add your API key in Settings.",
            ));
        }

        Self::new(&config)
    }

    /// Build the full URL - append /chat/completions if base_url doesn't already include it
    fn chat_url(&self) -> String {
        if self.base_url.contains("/chat/completions") {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
        }
    }

    fn images_url(&self) -> String {
        let root = self
            .base_url
            .trim_end_matches('/')
            .trim_end_matches("/chat/completions");
        format!("{}/images/generations", root.trim_end_matches('/'))
    }

    async fn post<T: Serialize>(&self, url: &str, body: &T) -> Result<Response> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response)
    }

    /// Start a streamed chat completion
    pub async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChunkStream> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(self.temperature),
            stream: true,
        };

        let response = self.post(&self.chat_url(), &request).await?;
        tracing::debug!(model = %self.model, status = %response.status(), "stream opened");
        Ok(decode_body(response))
    }

    /// Helper to create a system message
    pub fn system_message(content: &str) -> ChatMessage {
        ChatMessage {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    /// Helper to create a user message
    pub fn user_message(content: &str) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        self.stream_chat(prompts::build_messages(request)).await
    }

    async fn generate_image(&self, request: &CompletionRequest) -> Result<ImageResult> {
        let body = ImageGenerationRequest {
            model: &self.image_model,
            prompt: &request.prompt,
            size: &self.image_size,
            n: 1,
        };
        let response = self.post(&self.images_url(), &body).await?;
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistError::service(None, format!("Failed to parse image response: {}", e)))?;

        parse_image_payload(payload, &self.image_size)
    }
}

/// Accepts `{imageUrl, width, height, aspectRatio}` or the OpenAI `data[0]` shape.
fn parse_image_payload(payload: serde_json::Value, requested_size: &str) -> Result<ImageResult> {
    if payload.get("imageUrl").is_some() {
        return serde_json::from_value(payload)
            .map_err(|e| AssistError::service(None, format!("Malformed image response: {}", e)));
    }

    let parsed: ImageGenerationResponse = serde_json::from_value(payload)
        .map_err(|e| AssistError::service(None, format!("Malformed image response: {}", e)))?;
    let image = parsed
        .data
        .into_iter()
        .next()
        .ok_or_else(|| AssistError::service(None, "No image returned"))?;
    let image_url = match (image.url, image.b64_json) {
        (Some(url), _) => url,
        (None, Some(b64)) => format!("data:image/png;base64,{}", b64),
        (None, None) => return Err(AssistError::service(None, "No image returned")),
    };

    let (width, height) = parse_size(requested_size);
    Ok(ImageResult {
        image_url,
        width,
        height,
        aspect_ratio: Some(aspect_ratio(width, height)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_lines_yield_deltas_and_done() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Bon"}}]}"#),
            SseLine::Delta("Bon".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Ignore);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Ignore
        );
        assert_eq!(
            parse_sse_line(r#"data: {"error":{"message":"overloaded"}}"#),
            SseLine::Error("overloaded".into())
        );
    }

    #[test]
    fn sse_decoder_reassembles_split_lines() {
        let mut decoder = BodyDecoder::for_content_type("text/event-stream; charset=utf-8");
        let first = decoder.feed(b"data: {\"choices\":[{\"delta\":{\"con");
        assert!(first.is_empty());
        let second = decoder.feed(b"tent\":\"Hi\"}}]}\n\ndata: [DONE]\n\ndata: ignored\n");
        let texts: Vec<String> = second.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(texts, vec!["Hi".to_string()]);
        assert!(decoder.is_done());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn sse_body_closing_without_done_is_interrupted() {
        let mut decoder = BodyDecoder::for_content_type("text/event-stream");
        let fed: Vec<String> = decoder
            .feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"Half\"}}]}\n\ndata: {\"choi")
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(fed, vec!["Half".to_string()]);

        let finished = decoder.finish();
        assert_eq!(finished.len(), 1);
        assert!(matches!(finished[0], Err(AssistError::StreamInterrupted { .. })));
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn sse_done_without_trailing_newline_completes() {
        let mut decoder = BodyDecoder::for_content_type("text/event-stream");
        assert!(decoder.feed(b"data: [DONE]").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn text_decoder_holds_split_utf8_sequences() {
        let mut decoder = BodyDecoder::for_content_type("text/plain");
        let bytes = "é!".as_bytes();
        assert!(decoder.feed(&bytes[..1]).is_empty());
        let out: Vec<String> = decoder.feed(&bytes[1..]).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(out, vec!["é!".to_string()]);
    }

    #[test]
    fn image_payload_accepts_both_shapes() {
        let direct = serde_json::json!({
            "imageUrl": "https://img/x.png", "width": 512, "height": 256, "aspectRatio": "2:1"
        });
        let image = parse_image_payload(direct, "1024x1024").unwrap();
        assert_eq!(image.width, 512);

        let openai = serde_json::json!({"data": [{"url": "https://img/y.png"}]});
        let image = parse_image_payload(openai, "1792x1024").unwrap();
        assert_eq!(image.image_url, "https://img/y.png");
        assert_eq!((image.width, image.height), (1792, 1024));
        assert_eq!(image.aspect_ratio.as_deref(), Some("7:4"));
    }

    #[test]
    fn urls_are_derived_from_base() {
        let config = super::super::config_service::resolve(Default::default(), |_| None);
        let client = LlmClient::new(&EffectiveConfig {
            base_url: "http://localhost:8080/v1/".into(),
            ..config.clone()
        })
        .unwrap();
        assert_eq!(client.chat_url(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(client.images_url(), "http://localhost:8080/v1/images/generations");

        assert!(LlmClient::new(&EffectiveConfig {
            base_url: "not a url".into(),
            ..config
        })
        .is_err());
    }
}
