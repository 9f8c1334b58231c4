//! HTTP collaborator seam and Matrix-specific request shaping.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use sync_core::{
    MatrixErrorBody, SyncError, SyncErrorCategory, SyncResponse, classify_errcode,
    classify_http_status,
};

use crate::config::SyncConfig;

/// Failure at the HTTP layer, before any protocol interpretation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
}

/// Raw HTTP response handed back by the collaborator.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// The external HTTP collaborator: a client capable of long-timeout GET
/// with a per-request timeout.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: Url, timeout: Duration) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().build().map_err(|err| {
            SyncError::new(
                SyncErrorCategory::Config,
                "http_client_build_error",
                err.to_string(),
            )
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: Url, timeout: Duration) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(err.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?
            .to_vec();

        Ok(HttpResponse { status, body })
    }
}

/// Wraps the HTTP collaborator with `/sync`-specific request shaping and
/// error classification.
pub struct SyncTransport {
    http: Arc<dyn HttpTransport>,
    sync_url: Url,
    access_token: String,
    server_timeout_ms: u64,
    client_timeout: Duration,
    filter: Option<String>,
}

impl std::fmt::Debug for SyncTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTransport")
            .field("sync_url", &self.sync_url)
            .field("server_timeout_ms", &self.server_timeout_ms)
            .field("client_timeout", &self.client_timeout)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl SyncTransport {
    pub fn new(http: Arc<dyn HttpTransport>, config: &SyncConfig) -> Result<Self, SyncError> {
        let base = Url::parse(&config.homeserver).map_err(|err| {
            SyncError::new(
                SyncErrorCategory::Config,
                "invalid_homeserver_url",
                format!("invalid homeserver url '{}': {err}", config.homeserver),
            )
        })?;
        let sync_url = base.join("/_matrix/client/r0/sync").map_err(|err| {
            SyncError::new(
                SyncErrorCategory::Config,
                "invalid_homeserver_url",
                err.to_string(),
            )
        })?;

        Ok(Self {
            http,
            sync_url,
            access_token: config.access_token.clone(),
            server_timeout_ms: config.server_timeout_ms,
            client_timeout: config.client_timeout(),
            filter: config.filter.to_query_value(),
        })
    }

    /// Issue one long-poll and classify the outcome.
    ///
    /// A 200 body parses into a [`SyncResponse`]; everything else becomes a
    /// [`SyncError`] whose category tells the loop whether to retry.
    pub async fn poll(&self, since: Option<&str>) -> Result<SyncResponse, SyncError> {
        let url = self.sync_request_url(since);
        let response = self
            .http
            .get(url, self.client_timeout)
            .await
            .map_err(|err| match err {
                TransportError::Timeout => SyncError::new(
                    SyncErrorCategory::Network,
                    "request_timeout",
                    "long-poll request timed out",
                ),
                TransportError::Network(message) => {
                    SyncError::new(SyncErrorCategory::Network, "network_error", message)
                }
            })?;

        if response.status == 200 {
            serde_json::from_slice::<SyncResponse>(&response.body).map_err(|err| {
                SyncError::new(
                    SyncErrorCategory::Malformed,
                    "malformed_sync_body",
                    err.to_string(),
                )
            })
        } else {
            Err(classify_sync_failure(response.status, &response.body))
        }
    }

    fn sync_request_url(&self, since: Option<&str>) -> Url {
        let mut url = self.sync_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("access_token", &self.access_token);
            if let Some(since) = since {
                query.append_pair("since", since);
                query.append_pair("full_state", "false");
            }
            query.append_pair("timeout", &self.server_timeout_ms.to_string());
            if let Some(filter) = &self.filter {
                query.append_pair("filter", filter);
            }
        }
        url
    }
}

/// Build a [`SyncError`] from a non-200 response, preferring the Matrix
/// `errcode` over the bare HTTP status when both are present.
fn classify_sync_failure(status: u16, body: &[u8]) -> SyncError {
    let parsed: MatrixErrorBody = serde_json::from_slice(body).unwrap_or_default();

    let category = parsed
        .errcode
        .as_deref()
        .and_then(classify_errcode)
        .unwrap_or_else(|| classify_http_status(status));
    let code = parsed
        .errcode
        .clone()
        .unwrap_or_else(|| format!("http_{status}"));
    let message = parsed
        .error
        .clone()
        .unwrap_or_else(|| format!("sync request failed with status {status}"));

    let mut err = SyncError::new(category, code, message);
    err.retry_after_ms = parsed.retry_after_ms;
    err
}
