//! Slack adapter.
//!
//! `SlackMessenger` implements the `sgb-core` MessagingPort over the Slack Web
//! API; `router` serves the Events API endpoint that feeds the orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::sleep;

pub mod events;
pub mod router;

use sgb_core::{
    domain::{ConversationMessage, ThreadRef, UserId},
    errors::Error,
    ports::MessagingPort,
    Result,
};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";
const REPLIES_PAGE_LIMIT: u32 = 200;

#[derive(Clone, Debug)]
pub struct SlackMessenger {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl SlackMessenger {
    pub fn new(
        token: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("slack client build error: {e}")))?;
        Ok(Self {
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    /// Send a Web API request, honoring one `429 Retry-After` before giving up.
    async fn with_retry(
        &self,
        method: &str,
        mut build: impl FnMut() -> reqwest::RequestBuilder,
    ) -> Result<serde_json::Value> {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            let resp = build()
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| Error::External(format!("slack {method} request error: {e}")))?;

            if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS && attempts < MAX_RETRIES {
                attempts += 1;
                let wait = retry_after(resp.headers()).unwrap_or(Duration::from_secs(1));
                tracing::warn!(method, wait_secs = wait.as_secs(), "slack rate limited");
                sleep(wait).await;
                continue;
            }

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::External(format!(
                    "slack {method} failed: {status} {}",
                    body.chars().take(200).collect::<String>()
                )));
            }

            let v: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| Error::External(format!("slack {method} json error: {e}")))?;
            return check_ok(method, v);
        }
    }
}

#[async_trait]
impl MessagingPort for SlackMessenger {
    async fn fetch_thread_history(&self, thread: &ThreadRef) -> Result<Vec<ConversationMessage>> {
        let method = "conversations.replies";
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![
                ("channel", thread.channel.0.clone()),
                ("ts", thread.thread_ts.clone()),
                ("limit", REPLIES_PAGE_LIMIT.to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let v = self
                .with_retry(method, || self.http.get(self.url(method)).query(&query))
                .await?;
            let (page, next) = parse_replies_page(&v);
            messages.extend(page);

            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(messages)
    }

    async fn post_reply(&self, thread: &ThreadRef, text: &str) -> Result<()> {
        let method = "chat.postMessage";
        let body = json!({
            "channel": thread.channel.0,
            "thread_ts": thread.thread_ts,
            "text": text,
        });
        self.with_retry(method, || self.http.post(self.url(method)).json(&body))
            .await?;
        Ok(())
    }

    async fn resolve_self_identity(&self) -> Result<UserId> {
        let method = "auth.test";
        let v = self
            .with_retry(method, || self.http.post(self.url(method)))
            .await?;
        v.get("user_id")
            .and_then(|u| u.as_str())
            .filter(|u| !u.is_empty())
            .map(|u| UserId(u.to_string()))
            .ok_or_else(|| Error::External("slack auth.test returned no user_id".to_string()))
    }
}

/// Web API responses carry `ok: false` plus an error code on failure.
fn check_ok(method: &str, v: serde_json::Value) -> Result<serde_json::Value> {
    if v.get("ok").and_then(|ok| ok.as_bool()) == Some(true) {
        return Ok(v);
    }
    let code = v
        .get("error")
        .and_then(|e| e.as_str())
        .unwrap_or("unknown_error");
    Err(Error::External(format!("slack {method} error: {code}")))
}

/// Messages of one `conversations.replies` page and the cursor of the next, if any.
fn parse_replies_page(v: &serde_json::Value) -> (Vec<ConversationMessage>, Option<String>) {
    let messages = v
        .get("messages")
        .and_then(|m| m.as_array())
        .map(|arr| {
            arr.iter()
                .map(|m| {
                    let field = |k: &str| {
                        m.get(k)
                            .and_then(|x| x.as_str())
                            .unwrap_or("")
                            .to_string()
                    };
                    ConversationMessage {
                        text: field("text"),
                        speaker_id: field("user"),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let has_more = v.get("has_more").and_then(|h| h.as_bool()).unwrap_or(false);
    let next = v
        .pointer("/response_metadata/next_cursor")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    (messages, if has_more { next } else { None })
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
