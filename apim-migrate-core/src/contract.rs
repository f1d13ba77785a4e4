//! # contract: the seams between the migration core and remote services
//!
//! The core never talks HTTP itself. Everything remote sits behind one of two
//! traits defined here:
//!
//! - [`ArtifactCatalog`]: the management service, seen as one artifact
//!   collection. It lists a page at an offset and exports a single artifact
//!   as zip bytes. One implementation per artifact kind (APIs, Applications,
//!   MCP Servers, API Products).
//! - [`Indexer`]: the external indexing service with its bulk-upload and
//!   bulk-remove endpoints. Implementations return the raw status and body;
//!   deciding what counts as retryable is left to the upload pipeline.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall` so consumers can generate
//!   deterministic mocks for unit/integration tests (enabled by the
//!   `test-export-mocks` feature for downstream crates).

use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;

use crate::artifact::{ApiDescriptor, ArtifactDescriptor, ArtifactKind};

/// One page of a remote artifact collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPage<T> {
    /// Number of items the service reports for this page.
    pub count: usize,
    pub list: Vec<T>,
}

impl<T> ArtifactPage<T> {
    pub fn empty() -> Self {
        Self {
            count: 0,
            list: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

/// Zip archive bytes returned by a single-artifact export call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedArchive {
    pub bytes: Vec<u8>,
}

/// One archive to produce for an artifact: its current working copy, or one
/// of its revisions by number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExportUnit {
    WorkingCopy,
    Revision(String),
}

impl ExportUnit {
    /// `<stem>` for the working copy, `<stem>_Revision-<n>` for a revision.
    pub fn archive_stem(&self, item_stem: &str) -> String {
        match self {
            ExportUnit::WorkingCopy => item_stem.to_string(),
            ExportUnit::Revision(number) => format!("{item_stem}_Revision-{number}"),
        }
    }
}

/// Failures reported by a catalog implementation.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("service responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode service response: {0}")]
    Decode(String),
    #[error("{0}")]
    Unsupported(String),
}

/// Transport-level failure talking to the indexing service.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Raw indexing service response; the pipeline interprets status and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl IndexerResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A remote collection of artifacts of one kind.
///
/// `list` takes the offset and page-size limit exactly as the service's
/// `?limit=<N>&offset=<M>` query does. `export_one` returns the archive the
/// service produced for one descriptor; a non-success response is an error.
///
/// Kinds with revisions override `export_units` and `export_revision`; the
/// defaults export the working copy only.
#[cfg_attr(
    any(test, feature = "test-export-mocks"),
    automock(type Item = ApiDescriptor;)
)]
#[async_trait]
pub trait ArtifactCatalog: Send + Sync {
    type Item: ArtifactDescriptor;

    fn kind(&self) -> ArtifactKind;

    async fn list(&self, offset: usize, limit: usize)
        -> Result<ArtifactPage<Self::Item>, CatalogError>;

    async fn export_one(&self, item: &Self::Item) -> Result<ExportedArchive, CatalogError>;

    /// The archives to produce for `item`, in export order. May be empty.
    async fn export_units(&self, _item: &Self::Item) -> Result<Vec<ExportUnit>, CatalogError> {
        Ok(vec![ExportUnit::WorkingCopy])
    }

    async fn export_revision(
        &self,
        item: &Self::Item,
        revision: &str,
    ) -> Result<ExportedArchive, CatalogError> {
        Err(CatalogError::Unsupported(format!(
            "{} has no revision {revision} to export",
            item.display_name()
        )))
    }
}

/// The external indexing service.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Indexer: Send + Sync {
    /// `POST <endpoint>/bulk-upload` with an already-serialised JSON body.
    async fn bulk_upload(
        &self,
        tenant: &str,
        body: Vec<u8>,
    ) -> Result<IndexerResponse, TransportError>;

    /// `DELETE <endpoint>/bulk-remove` for every artifact of a tenant.
    async fn bulk_remove(&self, tenant: &str) -> Result<IndexerResponse, TransportError>;
}
