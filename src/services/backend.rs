//! Backend integrations that queries are dispatched to.
//!
//! Every backend implements [`BotBackend`]. The registry stores one
//! `Arc<dyn BotBackend>` per registered service; [`create_backend`] picks the
//! implementation from the endpoint scheme:
//!
//! - `echo://...` -> [`EchoBackend`], an in-process echo bot
//! - `http://...` / `https://...` -> [`HttpBackend`], a JSON-over-HTTP bot

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::{AppError, Result};
use crate::services::conversation::Message;

/// Endpoint scheme served by [`EchoBackend`].
pub const ECHO_SCHEME: &str = "echo";

/// Capability interface implemented by every downstream bot.
#[async_trait]
pub trait BotBackend: Send + Sync {
    /// Answer a query with a JSON payload.
    ///
    /// `history` holds earlier messages of the conversation, oldest first,
    /// and is empty for one-off queries.
    async fn process_query(&self, query: &str, history: &[Message]) -> Result<Value>;

    /// Whether the backend is reachable and willing to take queries.
    async fn health_check(&self) -> bool;

    /// Capability tags the backend advertises by itself.
    fn capabilities(&self) -> Vec<String>;
}

/// Echo bot used for demos and smoke tests.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    name: String,
    response_time: Duration,
}

impl EchoBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response_time: Duration::from_millis(100),
        }
    }

    /// Set the simulated response time.
    #[must_use]
    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = response_time;
        self
    }
}

#[async_trait]
impl BotBackend for EchoBackend {
    async fn process_query(&self, query: &str, history: &[Message]) -> Result<Value> {
        if !self.response_time.is_zero() {
            tokio::time::sleep(self.response_time).await;
        }
        Ok(json!({
            "service": self.name,
            "query": query,
            "response": format!("Echo: {}", query),
            "confidence": 1.0,
            "history_length": history.len()
        }))
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["echo".to_string(), "repeat".to_string(), "mirror".to_string()]
    }
}

/// Bot reachable over HTTP.
///
/// Queries are sent as `POST <endpoint>` with body `{"query": "..."}` and the
/// JSON response body is returned as-is. When the query belongs to a
/// conversation, earlier turns are added as
/// `"conversation_history": [{"role", "content"}]`. Health is
/// `GET <endpoint>/health`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    name: String,
    endpoint: Url,
    client: Client,
}

impl HttpBackend {
    pub fn new(name: impl Into<String>, endpoint: Url, client: Client) -> Self {
        Self {
            name: name.into(),
            endpoint,
            client,
        }
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.endpoint.as_str().trim_end_matches('/'))
    }

    fn dispatch_error(&self, message: impl Into<String>) -> AppError {
        AppError::Dispatch {
            service: self.name.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl BotBackend for HttpBackend {
    async fn process_query(&self, query: &str, history: &[Message]) -> Result<Value> {
        let mut body = json!({ "query": query });
        if !history.is_empty() {
            body["conversation_history"] = history
                .iter()
                .map(|m| json!({ "role": m.role, "content": m.content }))
                .collect();
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(
                    service = %self.name,
                    endpoint = %self.endpoint,
                    error = %e,
                    is_timeout = e.is_timeout(),
                    is_connect = e.is_connect(),
                    "HTTP request to backend failed"
                );
                self.dispatch_error(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.dispatch_error(format!("backend returned {}: {}", status, body)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| self.dispatch_error(format!("invalid JSON response: {}", e)))
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.health_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Build the backend for a service from its endpoint.
///
/// # Errors
///
/// Returns [`AppError::BadRequest`] if the endpoint is not a valid URL or uses
/// an unsupported scheme.
pub fn create_backend(name: &str, endpoint: &str, client: &Client) -> Result<Arc<dyn BotBackend>> {
    let url = Url::parse(endpoint)
        .map_err(|e| AppError::BadRequest(format!("Invalid endpoint '{}': {}", endpoint, e)))?;

    match url.scheme() {
        ECHO_SCHEME => Ok(Arc::new(EchoBackend::new(name))),
        "http" | "https" => Ok(Arc::new(HttpBackend::new(name, url, client.clone()))),
        other => Err(AppError::BadRequest(format!(
            "Unsupported endpoint scheme '{}' for service {}",
            other, name
        ))),
    }
}
