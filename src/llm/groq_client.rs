//! Groq chat-completions client.
//!
//! The API is always called in streaming mode; the server-sent events are folded into a
//! single reply before returning, so callers see one blocking call with a timeout.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CompletionClient, CompletionFuture};
use crate::conversation::core::config::LlmConfig;
use crate::conversation::core::errors::{ChatError, ChatResult};
use crate::conversation::core::records::ChatTurn;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}

/// Folds a `text/event-stream` body into the concatenated delta content.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; only complete lines are parsed.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pending: Vec<u8>,
    text: String,
    done: bool,
}

impl StreamAccumulator {
    /// Feed the next body chunk.
    ///
    /// # Errors
    /// Returns `ChatError::Serialization` on a malformed event and `ChatError::Upstream` on
    /// an in-stream error.
    pub fn feed(&mut self, bytes: &[u8]) -> ChatResult<()> {
        if self.done {
            return Ok(());
        }
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.handle_line(&line)?;
            if self.done {
                self.pending.clear();
                break;
            }
        }
        Ok(())
    }

    /// Whether the `[DONE]` sentinel has been seen.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Flush any unterminated last line and return the reply.
    ///
    /// # Errors
    /// Returns `ChatError::Serialization` if the trailing event is malformed.
    pub fn finish(mut self) -> ChatResult<String> {
        if !self.done && !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.handle_line(&rest)?;
        }
        Ok(self.text)
    }

    fn handle_line(&mut self, raw: &[u8]) -> ChatResult<()> {
        let line = std::str::from_utf8(raw)
            .map_err(|err| ChatError::Upstream(format!("invalid utf-8 in stream: {err}")))?
            .trim_end_matches(['\r', '\n']);

        // Blank separators, comments and `event:` lines carry no content.
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let chunk: StreamChunk = serde_json::from_str(data)?;
        if let Some(error) = chunk.error {
            return Err(ChatError::Upstream(error.message));
        }
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                self.text.push_str(&content);
            }
        }
        Ok(())
    }
}

/// Streaming client for Groq's OpenAI-compatible endpoint.
pub struct GroqCompletionClient {
    http: Client,
    endpoint: String,
    model: String,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
}

impl GroqCompletionClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    /// Returns an error if the API key is missing or the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> ChatResult<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ChatError::InvalidConfig("missing completion API key".to_string()))?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|err| ChatError::InvalidConfig(format!("invalid API key format: {err}")))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|err| ChatError::InvalidConfig(format!("http client: {err}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        })
    }

    /// Model name sent with every request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

fn upstream(err: reqwest::Error) -> ChatError {
    ChatError::Upstream(format!("Error with Groq API: {err}"))
}

impl CompletionClient for GroqCompletionClient {
    fn complete(&self, messages: Vec<ChatTurn>) -> CompletionFuture<'_, ChatResult<String>> {
        Box::pin(async move {
            let request = CompletionRequest {
                model: &self.model,
                messages: &messages,
                temperature: self.temperature,
                top_p: self.top_p,
                max_tokens: self.max_tokens,
                stream: true,
            };

            debug!("Requesting completion over {} turns", messages.len());
            let mut response = self
                .http
                .post(&self.endpoint)
                .json(&request)
                .send()
                .await
                .map_err(upstream)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!("Completion API returned {status}");
                return Err(ChatError::Upstream(format!(
                    "Error with Groq API: status {status}: {body}"
                )));
            }

            let mut stream = StreamAccumulator::default();
            while let Some(chunk) = response.chunk().await.map_err(upstream)? {
                stream.feed(&chunk)?;
                if stream.is_done() {
                    break;
                }
            }
            stream.finish()
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::conversation::core::role::Role;

    fn sse(parts: &[&str]) -> String {
        let mut body = String::new();
        for part in parts {
            body.push_str(&format!(
                "data: {{\"choices\":[{{\"delta\":{{\"content\":{}}},\"finish_reason\":null}}]}}\n\n",
                serde_json::to_string(part).unwrap()
            ));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn config(base_url: String) -> LlmConfig {
        LlmConfig {
            api_key: Some("gsk-test".to_string()),
            base_url,
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_accumulator_handles_split_lines() {
        let body = sse(&["Hel", "lo ", "wörld"]);
        let bytes = body.as_bytes();
        let mut acc = StreamAccumulator::default();
        // Feed in 7-byte slices so lines and the multi-byte 'ö' get split.
        for piece in bytes.chunks(7) {
            acc.feed(piece).unwrap();
        }
        assert!(acc.is_done());
        assert_eq!(acc.finish().unwrap(), "Hello wörld");
    }

    #[test]
    fn test_accumulator_ignores_role_only_and_comment_lines() {
        let mut acc = StreamAccumulator::default();
        acc.feed(b": keep-alive\n").unwrap();
        acc.feed(b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n")
            .unwrap();
        acc.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}")
            .unwrap();
        assert!(!acc.is_done());
        assert_eq!(acc.finish().unwrap(), "ok");
    }

    #[test]
    fn test_accumulator_rejects_garbage_and_stream_errors() {
        let mut acc = StreamAccumulator::default();
        assert!(matches!(
            acc.feed(b"data: {not json}\n"),
            Err(ChatError::Serialization(_))
        ));

        let mut acc = StreamAccumulator::default();
        let result = acc.feed(b"data: {\"error\":{\"message\":\"rate limited\"}}\n");
        assert!(matches!(result, Err(ChatError::Upstream(msg)) if msg == "rate limited"));
    }

    #[test]
    fn test_new_requires_api_key() {
        let result = GroqCompletionClient::new(&LlmConfig::default());
        assert!(matches!(result, Err(ChatError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_complete_buffers_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer gsk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama-3.1-8b-instant",
                "stream": true,
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "Hello there"}
                ]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse(&["General ", "Kenobi"]), "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = GroqCompletionClient::new(&config(server.uri())).unwrap();
        assert_eq!(client.model(), "llama-3.1-8b-instant");
        let reply = client
            .complete(vec![
                ChatTurn::system("sys"),
                ChatTurn::new(Role::User, "Hello there"),
            ])
            .await
            .unwrap();
        assert_eq!(reply, "General Kenobi");
    }

    #[tokio::test]
    async fn test_complete_maps_error_status_to_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let client = GroqCompletionClient::new(&config(format!("{}/", server.uri()))).unwrap();
        let result = client
            .complete(vec![ChatTurn::new(Role::User, "hi")])
            .await;
        match result {
            Err(ChatError::Upstream(msg)) => assert!(msg.contains("401")),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }
}
