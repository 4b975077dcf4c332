//! HTTP transport seam for the aggregator and market data calls.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// Raw HTTP response, kept unparsed so callers can inspect error bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    /// 200 reply with a JSON body.
    pub fn json_ok(body: &Value) -> Self {
        Self::new(200, Some("application/json"), body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// Parse the body as JSON, rejecting HTML error pages and plain-text
    /// errors before handing anything to the parser.
    pub fn json(&self) -> std::result::Result<Value, String> {
        let trimmed = self.body.trim_start();
        if trimmed.is_empty() {
            return Err("empty response body".to_string());
        }
        if trimmed.starts_with('<') {
            return Err("HTML response instead of JSON".to_string());
        }
        if trimmed.starts_with("Invalid") {
            return Err(format!("plain-text error: {}", snippet(trimmed)));
        }
        if let Some(content_type) = &self.content_type {
            let json_like = trimmed.starts_with('{') || trimmed.starts_with('[');
            if !content_type.contains("json") && !json_like {
                return Err(format!("non-JSON content type {}", content_type));
            }
        }
        serde_json::from_str(trimmed).map_err(|e| format!("malformed JSON: {}", e))
    }

    /// `error` or `message` field of a JSON error body.
    pub fn error_message(&self) -> Option<String> {
        let body = self.json().ok()?;
        ["error", "message"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .map(|message| snippet(message).to_string())
    }
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(80)
        .map(|(idx, _)| idx)
        .unwrap_or(body.len());
    &body[..end]
}

/// Minimal HTTP surface used by the sweeper.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpReply>;

    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpReply>;
}

/// `HttpTransport` backed by reqwest.
pub struct ReqwestTransport {
    client: Client,
    api_key: Option<String>,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, api_key })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    async fn into_reply(response: reqwest::Response) -> Result<HttpReply> {
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.context("Failed to read response body")?;
        Ok(HttpReply {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, query), fields(url = %url))]
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpReply> {
        let request = self.authorize(self.client.get(url).query(query));
        let response = request
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        let reply = Self::into_reply(response).await?;
        debug!("GET {} -> {}", url, reply.status);
        Ok(reply)
    }

    #[instrument(skip(self, body), fields(url = %url))]
    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpReply> {
        let request = self.authorize(self.client.post(url).json(body));
        let response = request
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        let reply = Self::into_reply(response).await?;
        debug!("POST {} -> {}", url, reply.status);
        Ok(reply)
    }
}
