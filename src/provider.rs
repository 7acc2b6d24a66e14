//! Inference backends
//!
//! Every backend implements [`InferenceProvider`]; the runner only ever
//! talks to the trait. [`OpenAiCompatibleProvider`] covers vLLM and any
//! other server exposing `/v1/completions`.

use crate::config::ProviderConfig;
use crate::decoder::{LineBuffer, StreamDecoder, MAX_LINE_BYTES};
use crate::error::CallError;
use crate::tracker::{LatencyTracker, StreamingCall};
use anyhow::{anyhow, Result};
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Parameters of one inference call
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Model alias, resolved through [`InferenceProvider::model_name`]
    pub model: String,
    pub prompt: String,
    pub max_output: u32,
    /// Log generated tokens and per-call timings at `info`
    pub verbose: bool,
}

/// Capability interface of a benchmarked backend
#[async_trait::async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Display name, used as the provider key in results
    fn name(&self) -> &str;

    /// Resolve a model alias to the backend's model id
    fn model_name(&self, model: &str) -> String;

    /// Single-shot call; returns the elapsed seconds for the full round trip
    async fn perform_inference(&self, request: &InferenceRequest) -> Result<f64, CallError>;

    /// Streaming call, timed token by token
    async fn perform_inference_streaming(
        &self,
        request: &InferenceRequest,
    ) -> Result<StreamingCall, CallError>;
}

fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))
}

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    stream: bool,
}

/// Backend speaking the OpenAI completions protocol
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    api_key: String,
    model_map: HashMap<String, String>,
    default_model: String,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self> {
        Ok(OpenAiCompatibleProvider {
            name: config.name.clone(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model_map: config.models.clone(),
            default_model: config.default_model.clone(),
            client: build_http_client(timeout)?,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/completions", self.base_url.trim_end_matches('/'))
    }

    fn post(&self, body: &CompletionRequest<'_>) -> RequestBuilder {
        let mut req_builder = self
            .client
            .post(self.completions_url())
            .header("Content-Type", "application/json");

        if !self.api_key.is_empty() {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        req_builder.json(body)
    }

    async fn send(&self, request: &InferenceRequest, stream: bool) -> Result<reqwest::Response, CallError> {
        let model_id = self.model_name(&request.model);
        let body = CompletionRequest {
            model: &model_id,
            prompt: &request.prompt,
            max_tokens: request.max_output,
            stream,
        };

        let response = self.post(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Status {
                status: status.as_u16(),
                body: preview(&body),
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl InferenceProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self, model: &str) -> String {
        self.model_map
            .get(model)
            .cloned()
            .unwrap_or_else(|| self.default_model.clone())
    }

    async fn perform_inference(&self, request: &InferenceRequest) -> Result<f64, CallError> {
        let start_time = Instant::now();
        let response = self.send(request, false).await?;
        let body = response.bytes().await?;
        let elapsed = start_time.elapsed().as_secs_f64();

        let completion: Value =
            serde_json::from_slice(&body).map_err(|e| CallError::MalformedResponse {
                message: format!("{}: {}", e, preview(&String::from_utf8_lossy(&body))),
            })?;

        if request.verbose {
            let text = completion
                .pointer("/choices/0/text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            info!("{} generated in {:.2}s: {}", self.name, elapsed, text);
        }

        Ok(elapsed)
    }

    async fn perform_inference_streaming(
        &self,
        request: &InferenceRequest,
    ) -> Result<StreamingCall, CallError> {
        let start_time = Instant::now();
        let response = self.send(request, true).await?;
        let call = track_byte_stream(start_time, response.bytes_stream(), request.verbose).await?;

        if request.verbose {
            info!(
                "{}: {} tokens, TTFT {:.4}s, total {:.4}s",
                self.name,
                call.token_count(),
                call.ttft,
                call.total_time
            );
            info!("Generated text: {}", call.generated_text());
        }

        Ok(call)
    }
}

/// Decode and time a streaming response body
///
/// Each line is stamped with the arrival time of the chunk that completed
/// it. Reading stops at the termination sentinel; the rest of the body is
/// never pulled. A body that ends without the sentinel, including one cut
/// off mid-line, is an `IncompleteStream`.
pub async fn track_byte_stream<S, B, E>(
    start: Instant,
    stream: S,
    verbose: bool,
) -> Result<StreamingCall, CallError>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<CallError>,
{
    let mut stream = std::pin::pin!(stream);
    let mut lines = LineBuffer::new();
    let mut decoder = StreamDecoder::new();
    let mut tracker = LatencyTracker::new(start);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::<CallError>::into)?;
        let at = Instant::now();

        for line in lines.push(chunk.as_ref()) {
            let event = decoder.decode_line(at, &line)?;
            if let Some(text) = event.token_text() {
                if verbose {
                    info!("token #{}: {:?}", tracker.tokens_seen() + 1, text);
                } else {
                    debug!("token #{}: {:?}", tracker.tokens_seen() + 1, text);
                }
            }
            if tracker.observe(event) {
                return tracker.finish();
            }
        }

        if lines.pending_len() > MAX_LINE_BYTES {
            return Err(CallError::MalformedResponse {
                message: format!(
                    "{} bytes received without a line break (limit {})",
                    lines.pending_len(),
                    MAX_LINE_BYTES
                ),
            });
        }
    }

    // Only a sentinel can still complete the call; a truncated tail cannot
    if let Some(line) = lines.finish() {
        match decoder.decode_line(Instant::now(), &line) {
            Ok(event) => {
                tracker.observe(event);
            }
            Err(e) => {
                debug!("Discarding truncated final line: {}", e);
                return Err(CallError::IncompleteStream {
                    tokens: tracker.tokens_seen(),
                });
            }
        }
    }

    tracker.finish()
}

fn preview(body: &str) -> String {
    if body.chars().count() > 200 {
        format!("{}...", body.chars().take(200).collect::<String>())
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn provider() -> OpenAiCompatibleProvider {
        let config = ProviderConfig {
            name: "vLLM".to_string(),
            base_url: "http://localhost:8000/".to_string(),
            api_key: String::new(),
            models: HashMap::from([(
                "common-model".to_string(),
                "facebook/opt-125m".to_string(),
            )]),
            default_model: "facebook/opt-350m".to_string(),
        };
        OpenAiCompatibleProvider::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn body(chunks: &[&str]) -> Vec<Result<Vec<u8>, CallError>> {
        chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect()
    }

    #[test]
    fn test_model_alias_resolution() {
        let p = provider();
        assert_eq!(p.model_name("common-model"), "facebook/opt-125m");
        assert_eq!(p.model_name("unknown"), "facebook/opt-350m");
        assert_eq!(p.name(), "vLLM");
    }

    #[test]
    fn test_completions_url_trims_slash() {
        assert_eq!(
            provider().completions_url(),
            "http://localhost:8000/v1/completions"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let body = CompletionRequest {
            model: "m",
            prompt: "hi",
            max_tokens: 16,
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "m", "prompt": "hi", "max_tokens": 16, "stream": true})
        );
    }

    #[tokio::test]
    async fn test_track_byte_stream_with_split_chunks() {
        let chunks = body(&[
            "data: {\"choices\":[{\"te",
            "xt\":\"Hel\"}]}\n\ndata: {\"choices\":[{\"text\":\"lo\"}]}\n",
            "\ndata: [DONE]\n\n",
        ]);

        let call = track_byte_stream(Instant::now(), stream::iter(chunks), false)
            .await
            .unwrap();

        assert_eq!(call.tokens, vec!["Hel".to_string(), "lo".to_string()]);
        assert_eq!(call.inter_token_latencies.len(), 1);
        assert!(call.total_time >= call.ttft);
    }

    #[tokio::test]
    async fn test_track_byte_stream_sentinel_without_newline() {
        let chunks = body(&["data: {\"choices\":[{\"text\":\"x\"}]}\ndata: [DONE]"]);

        let call = track_byte_stream(Instant::now(), stream::iter(chunks), false)
            .await
            .unwrap();
        assert_eq!(call.generated_text(), "x");
    }

    #[tokio::test]
    async fn test_track_byte_stream_truncated_body() {
        let chunks = body(&["data: {\"choices\":[{\"text\":\"x\"}]}\n"]);

        let err = track_byte_stream(Instant::now(), stream::iter(chunks), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::IncompleteStream { tokens: 1 }));
    }

    #[tokio::test]
    async fn test_track_byte_stream_cut_off_mid_line_is_incomplete() {
        let chunks = body(&[
            "data: {\"choices\":[{\"text\":\"x\"}]}\n",
            "data: {\"choices\":[{\"te",
        ]);

        let err = track_byte_stream(Instant::now(), stream::iter(chunks), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::IncompleteStream { tokens: 1 }));
    }

    #[tokio::test]
    async fn test_track_byte_stream_rejects_unbounded_line() {
        let long = "x".repeat(MAX_LINE_BYTES + 1);
        let chunks: Vec<Result<Vec<u8>, CallError>> = vec![
            Ok(b"data: {\"choices\":[{\"text\":\"x\"}]}\n".to_vec()),
            Ok(long.into_bytes()),
            Ok(b"\ndata: [DONE]\n".to_vec()),
        ];

        let err = track_byte_stream(Instant::now(), stream::iter(chunks), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_track_byte_stream_transport_error_mid_body() {
        let chunks: Vec<Result<Vec<u8>, CallError>> = vec![
            Ok(b"data: {\"choices\":[{\"text\":\"x\"}]}\n".to_vec()),
            Err(CallError::Transport {
                message: "connection reset".to_string(),
            }),
        ];

        let err = track_byte_stream(Instant::now(), stream::iter(chunks), true)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_track_byte_stream_does_not_read_past_sentinel() {
        let chunks = body(&[
            "data: {\"choices\":[{\"text\":\"x\"}]}\ndata: [DONE]\n",
            "this would fail to decode\n",
        ]);

        let call = track_byte_stream(Instant::now(), stream::iter(chunks), false)
            .await
            .unwrap();
        assert_eq!(call.token_count(), 1);
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(300);
        assert_eq!(preview(&long).len(), 203);
        assert_eq!(preview("short"), "short");
    }
}
