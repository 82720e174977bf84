//! REST clients for the relay and the overview service
//!
//! ```text
//!   HttpRelay            GET  {base}/messages?recipientKey=..&limit=..&offset=..
//!                        POST {base}/messages         {recipientKey, ciphertext, kind}
//!   HttpOverviewService  POST {base}/notes/overview   {notes, checkOnChain}
//! ```
//!
//! Both send the configured bearer token as-is.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use nocta_note::{MessageKind, Note};

use crate::error::UpstreamError;
use crate::services::{
    MessageFilter, MessagePage, MessagingRelay, OverviewResponse, OverviewService, PostAck,
};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL, e.g. "http://localhost:8080/api"
    pub base_url: String,
    /// Bearer token passed through on every request
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpClientConfig {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

/// Shared plumbing for both services
#[derive(Debug, Clone)]
struct RestClient {
    service: &'static str,
    config: HttpClientConfig,
    client: reqwest::Client,
}

impl RestClient {
    fn new(service: &'static str, config: HttpClientConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::Transport {
                service,
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            service,
            config,
            client,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, UpstreamError> {
        let service = self.service;
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                service,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { service, status, body });
        }

        response.json().await.map_err(|e| UpstreamError::Decode {
            service,
            message: e.to_string(),
        })
    }
}

// ============================================================================
// Relay
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageRequest<'a> {
    recipient_key: &'a str,
    ciphertext: &'a str,
    kind: MessageKind,
}

#[derive(Debug, Clone)]
pub struct HttpRelay {
    rest: RestClient,
}

impl HttpRelay {
    pub fn new(config: HttpClientConfig) -> Result<Self, UpstreamError> {
        Ok(Self {
            rest: RestClient::new("relay", config)?,
        })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.rest.config
    }
}

#[async_trait]
impl MessagingRelay for HttpRelay {
    async fn fetch_messages(&self, filter: &MessageFilter) -> Result<MessagePage, UpstreamError> {
        let url = self.rest.config.url("messages");
        debug!("GET {} (limit={}, offset={})", url, filter.limit, filter.offset);
        self.rest.send(self.rest.client.get(&url).query(filter)).await
    }

    async fn post_message(
        &self,
        recipient_key: &str,
        envelope: &str,
        kind: MessageKind,
    ) -> Result<PostAck, UpstreamError> {
        let url = self.rest.config.url("messages");
        let body = PostMessageRequest {
            recipient_key,
            ciphertext: envelope,
            kind,
        };
        self.rest.send(self.rest.client.post(&url).json(&body)).await
    }
}

// ============================================================================
// Overview service
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OverviewRequest<'a> {
    notes: &'a [Note],
    check_on_chain: bool,
}

#[derive(Debug, Clone)]
pub struct HttpOverviewService {
    rest: RestClient,
}

impl HttpOverviewService {
    pub fn new(config: HttpClientConfig) -> Result<Self, UpstreamError> {
        Ok(Self {
            rest: RestClient::new("overview", config)?,
        })
    }
}

#[async_trait]
impl OverviewService for HttpOverviewService {
    async fn compute_overview(
        &self,
        notes: &[Note],
        check_on_chain: bool,
    ) -> Result<OverviewResponse, UpstreamError> {
        let url = self.rest.config.url("notes/overview");
        debug!("POST {} ({} notes, checkOnChain={})", url, notes.len(), check_on_chain);
        let body = OverviewRequest { notes, check_on_chain };
        self.rest.send(self.rest.client.post(&url).json(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let config = HttpClientConfig {
            base_url: "http://relay.local/api/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.url("messages"), "http://relay.local/api/messages");
        assert_eq!(config.url("/notes/overview"), "http://relay.local/api/notes/overview");
    }

    #[test]
    fn test_post_body_shape() {
        let body = PostMessageRequest {
            recipient_key: "cGs=",
            ciphertext: "ZW52",
            kind: MessageKind::Transfer,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"recipientKey": "cGs=", "ciphertext": "ZW52", "kind": "transfer"})
        );
    }

    #[test]
    fn test_filter_query_shape() {
        let filter = MessageFilter::for_recipient("cGs=", 25).with_offset(50);
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["recipientKey"], "cGs=");
        assert_eq!(json["limit"], 25);
        assert_eq!(json["offset"], 50);
        assert!(json.get("senderKey").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_transport_error() {
        let relay = HttpRelay::new(HttpClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            token: Some("secret".to_string()),
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        let err = relay
            .fetch_messages(&MessageFilter::for_recipient("cGs=", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Transport { service: "relay", .. }));
    }
}
