#![doc = "Indexing service client: bridges the core `Indexer` trait to the AI service's bulk endpoints."]
//
//! # Indexing service integration (CLI <-> Core)
//!
//! [`IndexingClient`] implements [`Indexer`] with `reqwest` for the upload
//! pipeline and the purge command in `apim_migrate_core::upload`.
//!
//! - Construct it with the service endpoint from the environment config and
//!   the key from `APIM_AI_KEY` (or `--key`).
//! - Requests go to `<endpoint>/ai/spec-populator/bulk-upload` and
//!   `<endpoint>/ai/spec-populator/bulk-remove`.
//! - Status codes are returned untouched; the pipeline decides what to retry.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use apim_migrate_core::contract::{Indexer, IndexerResponse, TransportError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};

pub const APIM_AI_KEY_ENV: &str = "APIM_AI_KEY";
const SPEC_POPULATOR_PATH: &str = "ai/spec-populator";
// Sent as `API-KEY` and `TENANT-DOMAIN`; header names are case-insensitive.
const API_KEY_HEADER: &str = "api-key";
const TENANT_DOMAIN_HEADER: &str = "tenant-domain";
const CLIENT_USER_AGENT: &str = concat!("apim-migrate/", env!("CARGO_PKG_VERSION"));

/// Resolves the service key: an explicit `--key` wins over the environment.
pub fn resolve_ai_key(cli_key: Option<String>) -> Result<String> {
    if let Some(key) = cli_key.filter(|k| !k.is_empty()) {
        return Ok(key);
    }
    env::var(APIM_AI_KEY_ENV).map_err(|e| {
        tracing::error!(error = ?e, "{APIM_AI_KEY_ENV} missing in environment");
        anyhow::anyhow!("{APIM_AI_KEY_ENV} must be set, or pass --key")
    })
}

/// `<endpoint>/ai/spec-populator/<operation>`
pub fn service_url(endpoint: &str, operation: &str) -> String {
    format!(
        "{}/{SPEC_POPULATOR_PATH}/{operation}",
        endpoint.trim_end_matches('/')
    )
}

pub fn request_headers(key: &str, tenant: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(API_KEY_HEADER),
        HeaderValue::from_str(key).context("API key contains characters not allowed in a header")?,
    );
    headers.insert(
        HeaderName::from_static(TENANT_DOMAIN_HEADER),
        HeaderValue::from_str(tenant).context("tenant domain is not a valid header value")?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
    Ok(headers)
}

pub struct IndexingClient {
    http: reqwest::Client,
    endpoint: String,
    key: String,
}

impl IndexingClient {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        tracing::info!(%endpoint, "Initialized indexing service client");
        Ok(Self {
            http,
            endpoint,
            key: key.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<IndexerResponse, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(IndexerResponse {
            status,
            body: body.to_vec(),
        })
    }

    fn headers(&self, tenant: &str) -> Result<HeaderMap, TransportError> {
        request_headers(&self.key, tenant).map_err(|e| TransportError(format!("{e:#}")))
    }
}

#[async_trait]
impl Indexer for IndexingClient {
    async fn bulk_upload(&self, tenant: &str, body: Vec<u8>) -> Result<IndexerResponse, TransportError> {
        let url = service_url(&self.endpoint, "bulk-upload");
        tracing::debug!(%url, tenant, size = body.len(), "POST bulk-upload");
        let request = self.http.post(url).headers(self.headers(tenant)?).body(body);
        self.send(request).await
    }

    async fn bulk_remove(&self, tenant: &str) -> Result<IndexerResponse, TransportError> {
        let url = service_url(&self.endpoint, "bulk-remove");
        tracing::debug!(%url, tenant, "DELETE bulk-remove");
        let request = self.http.delete(url).headers(self.headers(tenant)?);
        self.send(request).await
    }
}
