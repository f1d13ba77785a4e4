//! # Management service catalogs
//!
//! `reqwest` implementations of [`ArtifactCatalog`] for the publisher and
//! admin REST APIs. Each catalog lists one collection with
//! `?limit=<N>&offset=<M>[&tenantDomain=<t>]` and exports single artifacts as
//! zip archives.
//!
//! MCP servers are exported revision by revision: only deployed revisions by
//! default, or the working copy plus every revision with
//! [`ExportOptions::all_revisions`].
//!
//! All requests carry the bearer token from `APIM_ACCESS_TOKEN`. Obtaining
//! that token is left to the operator.

use std::env;
use std::marker::PhantomData;
use std::time::Duration;

use anyhow::{Context, Result};
use apim_migrate_core::artifact::{
    ApiDescriptor, ApplicationDescriptor, ArtifactDescriptor, ArtifactKind, McpServerDescriptor,
};
use apim_migrate_core::contract::{
    ArtifactCatalog, ArtifactPage, CatalogError, ExportUnit, ExportedArchive,
};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Url;
use serde::Deserialize;

pub const APIM_ACCESS_TOKEN_ENV: &str = "APIM_ACCESS_TOKEN";

/// Archive flavour requested from the export endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExportFormat {
    #[default]
    #[value(name = "YAML", alias = "yaml")]
    Yaml,
    #[value(name = "JSON", alias = "json")]
    Json,
}

impl ExportFormat {
    pub fn as_query_value(&self) -> &'static str {
        match self {
            ExportFormat::Yaml => "YAML",
            ExportFormat::Json => "JSON",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub preserve_status: bool,
    /// MCP servers: keep endpoint credentials in the archive.
    pub preserve_credentials: bool,
    /// MCP servers: working copy and every revision, not just deployed ones.
    pub all_revisions: bool,
    /// Applications: include consumer keys.
    pub with_keys: bool,
}

/// Authenticated HTTP client shared by every catalog of one environment.
#[derive(Clone)]
pub struct ManagementClient {
    http: reqwest::Client,
    token: String,
}

impl ManagementClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            token: token.into(),
        })
    }

    pub fn new_from_env(timeout: Duration) -> Result<Self> {
        let token = env::var(APIM_ACCESS_TOKEN_ENV).map_err(|e| {
            tracing::error!(error = ?e, "{APIM_ACCESS_TOKEN_ENV} missing in environment");
            anyhow::anyhow!("{APIM_ACCESS_TOKEN_ENV} must be set to a management service access token")
        })?;
        tracing::info!(
            token_set = !token.is_empty(),
            "Initialized management client from environment"
        );
        Self::new(token, timeout)
    }

    async fn get(&self, url: Url, accept: Option<&str>) -> Result<Vec<u8>, CatalogError> {
        tracing::debug!(%url, "GET");
        let mut request = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token));
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        check_status(status.as_u16(), &body)?;
        Ok(body.to_vec())
    }
}

fn check_status(status: u16, body: &[u8]) -> Result<(), CatalogError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(CatalogError::Status {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default)]
    count: usize,
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

fn decode_page<T: ArtifactDescriptor>(body: &[u8]) -> Result<ArtifactPage<T>, CatalogError> {
    let parsed: ListResponse<T> =
        serde_json::from_slice(body).map_err(|e| CatalogError::Decode(e.to_string()))?;
    Ok(ArtifactPage {
        count: parsed.count,
        list: parsed.list,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevisionSummary {
    revision_number: String,
}

/// Revision names come back as `Revision <n>`; exports want `<n>`.
fn revision_number(name: &str) -> String {
    name.trim_start_matches("Revision").trim().to_string()
}

fn decode_revisions(body: &[u8]) -> Result<Vec<String>, CatalogError> {
    let parsed: ListResponse<RevisionSummary> =
        serde_json::from_slice(body).map_err(|e| CatalogError::Decode(e.to_string()))?;
    Ok(parsed
        .list
        .iter()
        .map(|r| revision_number(&r.revision_number))
        .collect())
}

/// Deployed revisions only, or the working copy followed by every revision.
fn revision_units(revisions: Vec<String>, all_revisions: bool) -> Vec<ExportUnit> {
    let working_copy = all_revisions.then_some(ExportUnit::WorkingCopy);
    working_copy
        .into_iter()
        .chain(revisions.into_iter().map(ExportUnit::Revision))
        .collect()
}

fn join(base: &str, path: &str) -> Result<Url, CatalogError> {
    let joined = format!("{}/{}", base.trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| CatalogError::Transport(format!("invalid URL {joined}: {e}")))
}

/// `<base>/<path>?limit=<limit>&offset=<offset>[&tenantDomain=<tenant>]`
pub fn list_url(
    base: &str,
    path: &str,
    limit: usize,
    offset: usize,
    tenant: Option<&str>,
) -> Result<Url, CatalogError> {
    let mut url = join(base, path)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        if let Some(tenant) = tenant.filter(|t| !t.is_empty()) {
            query.append_pair("tenantDomain", tenant);
        }
    }
    Ok(url)
}

pub fn export_url(base: &str, path: &str, params: &[(&str, String)]) -> Result<Url, CatalogError> {
    let mut url = join(base, path)?;
    url.query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
    Ok(url)
}

/// How a descriptor type is listed and exported.
pub trait RemoteArtifact: ArtifactDescriptor {
    const LIST_PATH: &'static str;
    const EXPORT_PATH: &'static str;

    fn export_params(&self, options: &ExportOptions) -> Vec<(&'static str, String)>;

    /// Path of the revision list, for kinds exported revision by revision.
    fn revisions_path(&self) -> Option<String> {
        None
    }
}

fn versioned_params(
    name: &str,
    version: &str,
    provider: &str,
    options: &ExportOptions,
) -> Vec<(&'static str, String)> {
    vec![
        ("name", name.to_string()),
        ("version", version.to_string()),
        ("providerName", provider.to_string()),
        ("preserveStatus", options.preserve_status.to_string()),
        ("format", options.format.as_query_value().to_string()),
    ]
}

impl RemoteArtifact for ApiDescriptor {
    const LIST_PATH: &'static str = "apis";
    const EXPORT_PATH: &'static str = "apis/export";

    fn export_params(&self, options: &ExportOptions) -> Vec<(&'static str, String)> {
        versioned_params(&self.name, &self.version, &self.provider, options)
    }
}

impl RemoteArtifact for McpServerDescriptor {
    const LIST_PATH: &'static str = "mcp-servers";
    const EXPORT_PATH: &'static str = "mcp-servers/export";

    fn export_params(&self, options: &ExportOptions) -> Vec<(&'static str, String)> {
        let mut params = versioned_params(&self.name, &self.version, &self.provider, options);
        params.push(("preserveCredentials", options.preserve_credentials.to_string()));
        params
    }

    fn revisions_path(&self) -> Option<String> {
        Some(format!("mcp-servers/{}/revisions", self.id))
    }
}

impl RemoteArtifact for ApplicationDescriptor {
    const LIST_PATH: &'static str = "applications";
    const EXPORT_PATH: &'static str = "export/applications";

    fn export_params(&self, options: &ExportOptions) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("appName", self.name.clone()),
            ("appOwner", self.owner.clone()),
        ];
        if options.with_keys {
            params.push(("withKeys", "true".to_string()));
        }
        params
    }
}

/// One remote collection. API Products reuse [`ApiDescriptor`] with their
/// own paths, so the paths live on the catalog rather than the item type.
pub struct RemoteCatalog<T> {
    client: ManagementClient,
    kind: ArtifactKind,
    base: String,
    list_path: &'static str,
    export_path: &'static str,
    tenant: Option<String>,
    options: ExportOptions,
    _item: PhantomData<fn() -> T>,
}

impl<T: RemoteArtifact> RemoteCatalog<T> {
    pub fn new(client: ManagementClient, kind: ArtifactKind, base: impl Into<String>) -> Self {
        Self {
            client,
            kind,
            base: base.into(),
            list_path: T::LIST_PATH,
            export_path: T::EXPORT_PATH,
            tenant: None,
            options: ExportOptions::default(),
            _item: PhantomData,
        }
    }

    pub fn with_tenant(mut self, tenant: Option<String>) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }
}

impl RemoteCatalog<ApiDescriptor> {
    pub fn apis(client: ManagementClient, publisher: &str) -> Self {
        Self::new(client, ArtifactKind::Api, publisher)
    }

    pub fn api_products(client: ManagementClient, publisher: &str) -> Self {
        let mut catalog = Self::new(client, ArtifactKind::ApiProduct, publisher);
        catalog.list_path = "api-products";
        catalog.export_path = "api-products/export";
        catalog
    }
}

impl RemoteCatalog<McpServerDescriptor> {
    pub fn mcp_servers(client: ManagementClient, publisher: &str) -> Self {
        Self::new(client, ArtifactKind::McpServer, publisher)
    }
}

impl RemoteCatalog<ApplicationDescriptor> {
    pub fn applications(client: ManagementClient, admin: &str) -> Self {
        Self::new(client, ArtifactKind::Application, admin)
    }
}

#[async_trait]
impl<T: RemoteArtifact> ArtifactCatalog for RemoteCatalog<T> {
    type Item = T;

    fn kind(&self) -> ArtifactKind {
        self.kind
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<ArtifactPage<T>, CatalogError> {
        let url = list_url(&self.base, self.list_path, limit, offset, self.tenant.as_deref())?;
        let body = self.client.get(url, None).await?;
        decode_page(&body)
    }

    async fn export_one(&self, item: &T) -> Result<ExportedArchive, CatalogError> {
        let url = export_url(&self.base, self.export_path, &item.export_params(&self.options))?;
        let bytes = self.client.get(url, Some("application/zip")).await?;
        Ok(ExportedArchive { bytes })
    }

    async fn export_units(&self, item: &T) -> Result<Vec<ExportUnit>, CatalogError> {
        let Some(path) = item.revisions_path() else {
            return Ok(vec![ExportUnit::WorkingCopy]);
        };
        let mut url = join(&self.base, &path)?;
        if !self.options.all_revisions {
            url.query_pairs_mut().append_pair("query", "deployed:true");
        }
        let body = self.client.get(url, None).await?;
        let revisions = decode_revisions(&body)?;
        tracing::debug!(
            artifact = %item.display_name(),
            revisions = ?revisions,
            all_revisions = self.options.all_revisions,
            "Listed revisions"
        );
        Ok(revision_units(revisions, self.options.all_revisions))
    }

    async fn export_revision(&self, item: &T, revision: &str) -> Result<ExportedArchive, CatalogError> {
        let mut params = item.export_params(&self.options);
        params.push(("revisionNumber", revision.to_string()));
        let url = export_url(&self.base, self.export_path, &params)?;
        let bytes = self.client.get(url, Some("application/zip")).await?;
        Ok(ExportedArchive { bytes })
    }
}
