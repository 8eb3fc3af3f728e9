//! OpenAI adapter (chat completions + image generation).
//!
//! Implements the `sgb-core` CompletionPort over the OpenAI HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use sgb_core::{
    errors::Error,
    ports::{Completion, CompletionPort},
    Result,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
const IMAGE_SIZE: &str = "256x256";

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    n: u32,
    size: &'a str,
    response_format: &'a str,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("openai client build error: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::External(format!("openai request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "openai {path} failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::External(format!("openai json error: {e}")))
    }
}

#[async_trait]
impl CompletionPort for OpenAiClient {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<Completion> {
        let req = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: preamble,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let v = self.post_json("chat/completions", &req).await?;
        let completion = parse_chat_completion(&v)?;
        tracing::debug!(
            model = %self.model,
            total_tokens = completion.total_tokens,
            "openai completion received"
        );
        Ok(completion)
    }

    async fn create_image(&self, prompt: &str) -> Result<String> {
        let req = ImageRequest {
            prompt,
            n: 1,
            size: IMAGE_SIZE,
            response_format: "url",
        };
        let v = self.post_json("images/generations", &req).await?;
        parse_image_url(&v)
    }
}

/// First choice's content (empty when there are no choices) and `usage.total_tokens`.
pub fn parse_chat_completion(v: &serde_json::Value) -> Result<Completion> {
    if let Some(msg) = v.pointer("/error/message").and_then(|m| m.as_str()) {
        return Err(Error::External(format!("openai error: {msg}")));
    }

    let text = v
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();
    let total_tokens = v
        .pointer("/usage/total_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(0);

    Ok(Completion { text, total_tokens })
}

pub fn parse_image_url(v: &serde_json::Value) -> Result<String> {
    v.pointer("/data/0/url")
        .and_then(|u| u.as_str())
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::External("openai image response had no url".to_string()))
}
