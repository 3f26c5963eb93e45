#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::Config;

const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

/// One turn of a conversation, in the wire shape the chat endpoint accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Generation model client for an OpenAI-compatible `/v1/chat/completions`
/// endpoint, supporting both buffered and streamed completions.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct DeltaResponse {
    choices: Vec<DeltaChoice>,
}

#[derive(Debug, Deserialize)]
struct DeltaChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

impl ChatClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .model_base_url()
            .context("Failed to build model base URL from config")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.model_api_key.clone(),
            model: config.model.chat_model.clone(),
        })
    }

    /// Run a buffered completion and return the full answer text.
    #[inline]
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = self.completions_url()?;

        let body = CompletionRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send completion request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Completion request failed: HTTP {status}: {body}");
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .context("Failed to parse completion response")?;

        let answer = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Completion response contained no choices"))?;

        debug!("Received completion of {} chars", answer.len());
        Ok(answer)
    }

    /// Run a streamed completion, yielding answer text deltas as they
    /// arrive over the server-sent-event wire format.
    #[inline]
    pub async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let url = self.completions_url()?;

        let body = CompletionRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send streaming completion request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Streaming completion failed: HTTP {status}: {body}");
        }

        struct SseState {
            bytes: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
            buffer: String,
            pending: VecDeque<String>,
            done: bool,
        }

        let state = SseState {
            bytes: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(token) = st.pending.pop_front() {
                    return Some((Ok(token), st));
                }
                if st.done {
                    return None;
                }

                match st.bytes.next().await {
                    None => {
                        st.done = true;
                    }
                    Some(Err(error)) => {
                        st.done = true;
                        return Some((
                            Err(anyhow::anyhow!("Stream transport error: {error}")),
                            st,
                        ));
                    }
                    Some(Ok(chunk)) => {
                        st.buffer.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(pos) = st.buffer.find('\n') {
                            let line = st.buffer[..pos].trim().to_string();
                            st.buffer.drain(..=pos);

                            let Some(data) = line.strip_prefix("data:") else {
                                continue;
                            };
                            let data = data.trim();
                            if data == "[DONE]" {
                                st.done = true;
                                break;
                            }
                            if let Some(token) = parse_delta(data) {
                                if !token.is_empty() {
                                    st.pending.push_back(token);
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn completions_url(&self) -> Result<Url> {
        self.base_url
            .join("/v1/chat/completions")
            .context("Failed to build completions URL")
    }
}

/// Extract the text delta from one SSE data payload. Malformed payloads are
/// skipped rather than failing the stream.
fn parse_delta(data: &str) -> Option<String> {
    let parsed: DeltaResponse = serde_json::from_str(data).ok()?;
    parsed.choices.into_iter().next()?.delta.content
}
