use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::chat::Message;

/// Incremental text fragments from one completion call, in arrival order,
/// terminated by the stream ending.
pub type TokenStream = BoxStream<'static, anyhow::Result<String>>;

/// The upstream completion API: a black-box streaming text generator.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream_chat(&self, model: &str, messages: &[Message]) -> anyhow::Result<TokenStream>;
}

/// OpenAI-style `/chat/completions` provider (DeepSeek speaks the same
/// protocol).
#[derive(Clone)]
pub struct OpenAICompatible {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

pub const DEFAULT_MODEL: &str = "deepseek-chat";

impl OpenAICompatible {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), api_key }
    }

    pub fn from_env() -> Self {
        let base_url = std::env::var("DEEPSEEK_BASE_URL")
            .or_else(|_| std::env::var("OPENAI_BASE_URL"))
            .unwrap_or_else(|_| "https://api.deepseek.com".into());
        let api_key = std::env::var("DEEPSEEK_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();
        Self::new(base_url, api_key)
    }
}

impl Default for OpenAICompatible {
    fn default() -> Self {
        Self::from_env()
    }
}

#[derive(Debug, Serialize)]
struct OaiChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OaiStreamChunk {
    choices: Vec<OaiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OaiStreamChoice {
    delta: OaiDelta,
}

#[derive(Debug, Deserialize, Default)]
struct OaiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAICompatible {
    async fn stream_chat(&self, model: &str, messages: &[Message]) -> anyhow::Result<TokenStream> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = OaiChatRequest { model, messages, stream: true };
        let mut rb = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("completion call failed: {}", resp.status());
        }

        let stream = try_stream! {
            let mut bytes = resp.bytes_stream();
            // SSE events can split across network chunks, and so can
            // multi-byte codepoints; carry raw bytes and decode only once a
            // full line has arrived.
            let mut buf: Vec<u8> = Vec::new();
            while let Some(next) = bytes.next().await {
                let chunk = next?;
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let Some(data) = line.trim().strip_prefix("data:") else { continue };
                    let data = data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }
                    match serde_json::from_str::<OaiStreamChunk>(data) {
                        Ok(chunk) => {
                            let fragment = chunk
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content)
                                .unwrap_or_default();
                            if !fragment.is_empty() {
                                yield fragment;
                            }
                        }
                        Err(e) => tracing::warn!("failed to parse stream chunk: {e}, data: {data}"),
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}
