//! Bulk upload of API payloads to the external indexing service.
//!
//! A single producer walks one or more catalogs (APIs, then optionally API
//! Products), exports every publishable artifact, extracts its indexable
//! fields, and packs the results into batches of at most `batch_size`
//! payloads. Batches go onto a bounded queue; the producer blocks while the
//! queue is full.
//!
//! A fixed pool of workers drains the queue. Each batch is POSTed once, and
//! retried once more on a transport error or non-2xx status. A batch that
//! still fails is logged and dropped; the run carries on with the others.
//! `total_candidates` counts payloads when a batch is formed,
//! `total_uploaded` sums the service's upsert counts, so the final report
//! shows any shortfall.
//!
//! Delivery is at-least-once per batch attempt, not exactly-once. The
//! pipeline is not resumable across process restarts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::archive::{extract_index_payload, ApiPayload};
use crate::artifact::{ApiDescriptor, ArtifactKind, MAX_APIS_TO_EXPORT_ONCE};
use crate::contract::{ArtifactCatalog, CatalogError, Indexer};
use crate::pagination::PageWalker;
use crate::retry::{retry_with_backoff, AttemptError, RetryOutcome, RetryPolicy};

pub const DEFAULT_UPLOAD_WORKERS: usize = 3;
pub const DEFAULT_UPLOAD_BATCH_SIZE: usize = MAX_APIS_TO_EXPORT_ONCE;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
/// Tenant assumed when the username carries no `@tenant` suffix.
pub const DEFAULT_TENANT: &str = "carbon.super";

/// One upload call's worth of payloads.
pub type UploadBatch = Vec<ApiPayload>;

/// Tenant domain of a `user@tenant` username, or the super tenant.
pub fn tenant_from_username(username: &str) -> String {
    match username.split_once('@') {
        Some((_, tenant)) if !tenant.is_empty() => tenant.to_string(),
        _ => DEFAULT_TENANT.to_string(),
    }
}

/// Which collections the producer walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadScope {
    #[default]
    Apis,
    ApiProducts,
    /// APIs first, then API Products.
    All,
}

impl UploadScope {
    pub fn kinds(&self) -> Vec<ArtifactKind> {
        match self {
            UploadScope::Apis => vec![ArtifactKind::Api],
            UploadScope::ApiProducts => vec![ArtifactKind::ApiProduct],
            UploadScope::All => vec![ArtifactKind::Api, ArtifactKind::ApiProduct],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub workers: usize,
    /// Limit sent with every list call of the producer.
    pub page_size: usize,
    pub batch_size: usize,
    pub queue_capacity: usize,
    pub tenant: String,
    pub retry: RetryPolicy,
}

impl UploadSettings {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            workers: DEFAULT_UPLOAD_WORKERS,
            page_size: MAX_APIS_TO_EXPORT_ONCE,
            batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tenant: tenant.into(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to list {kind}: {source}")]
    Listing {
        kind: ArtifactKind,
        source: CatalogError,
    },
    #[error("removing existing APIs and API Products failed: {0}")]
    Purge(String),
    #[error("upload worker failed: {0}")]
    Worker(String),
}

/// Counters shared by the producer and every worker of one run.
#[derive(Debug, Default)]
pub struct UploadRunState {
    total_candidates: AtomicU64,
    total_uploaded: AtomicU64,
    batches_sent: AtomicU64,
    batches_dropped: AtomicU64,
}

impl UploadRunState {
    pub fn snapshot(&self) -> UploadReport {
        UploadReport {
            total_candidates: self.total_candidates.load(Ordering::SeqCst),
            total_uploaded: self.total_uploaded.load(Ordering::SeqCst),
            batches_sent: self.batches_sent.load(Ordering::SeqCst),
            batches_dropped: self.batches_dropped.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub total_candidates: u64,
    pub total_uploaded: u64,
    pub batches_sent: u64,
    pub batches_dropped: u64,
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    apis: &'a [ApiPayload],
}

#[derive(Deserialize)]
struct UpsertResponse {
    message: UpsertMessage,
}

#[derive(Deserialize)]
struct UpsertMessage {
    upsert_count: u64,
}

#[derive(Deserialize)]
struct DeleteResponse {
    message: DeleteMessage,
}

#[derive(Deserialize)]
struct DeleteMessage {
    delete_count: u64,
}

pub struct UploadPipeline<I: Indexer + 'static> {
    indexer: Arc<I>,
    settings: UploadSettings,
}

impl<I: Indexer + 'static> UploadPipeline<I> {
    pub fn new(indexer: Arc<I>, settings: UploadSettings) -> Self {
        Self { indexer, settings }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Walks `catalogs` in order and uploads every public, publishable API
    /// they contain. Returns once all workers have drained the queue.
    pub async fn run(
        &self,
        catalogs: &[&dyn ArtifactCatalog<Item = ApiDescriptor>],
    ) -> Result<UploadReport, UploadError> {
        let worker_count = self.settings.workers.max(1);
        let state = Arc::new(UploadRunState::default());
        let (tx, rx) = mpsc::channel::<UploadBatch>(self.settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        info!(
            workers = worker_count,
            batch_size = self.settings.batch_size,
            tenant = %self.settings.tenant,
            "Starting upload pipeline"
        );

        let workers: Vec<_> = (0..worker_count)
            .map(|worker| {
                tokio::spawn(consume_batches(
                    worker,
                    Arc::clone(&rx),
                    Arc::clone(&self.indexer),
                    self.settings.clone(),
                    Arc::clone(&state),
                ))
            })
            .collect();

        // `tx` is moved into the producer and dropped when it returns, which
        // closes the queue for the workers.
        let produced = produce_batches(catalogs, &self.settings, &state, tx).await;

        let mut worker_failure = None;
        for joined in join_all(workers).await {
            if let Err(e) = joined {
                error!(error = %e, "Upload worker terminated abnormally");
                worker_failure.get_or_insert_with(|| e.to_string());
            }
        }
        produced?;
        if let Some(reason) = worker_failure {
            return Err(UploadError::Worker(reason));
        }

        let report = state.snapshot();
        info!(
            total_candidates = report.total_candidates,
            total_uploaded = report.total_uploaded,
            batches_dropped = report.batches_dropped,
            "Upload pipeline finished"
        );
        Ok(report)
    }
}

async fn produce_batches(
    catalogs: &[&dyn ArtifactCatalog<Item = ApiDescriptor>],
    settings: &UploadSettings,
    state: &UploadRunState,
    tx: mpsc::Sender<UploadBatch>,
) -> Result<(), UploadError> {
    let batch_size = settings.batch_size.max(1);
    let mut batch: UploadBatch = Vec::with_capacity(batch_size);

    for catalog in catalogs {
        let kind = catalog.kind();
        let mut walker = PageWalker::new(*catalog, settings.page_size.max(1));
        let mut pages = 0;
        while let Some(page) = walker
            .next_page()
            .await
            .map_err(|source| UploadError::Listing { kind, source })?
        {
            pages += 1;
            for item in &page {
                let Some(payload) = build_payload(*catalog, item, &settings.tenant).await else {
                    continue;
                };
                batch.push(payload);
                if batch.len() == batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    enqueue(&tx, state, full).await?;
                }
            }
        }
        if pages == 0 {
            info!(kind = %kind, "No artifacts available to be uploaded");
        }
    }

    if !batch.is_empty() {
        enqueue(&tx, state, batch).await?;
    }
    Ok(())
}

async fn enqueue(
    tx: &mpsc::Sender<UploadBatch>,
    state: &UploadRunState,
    batch: UploadBatch,
) -> Result<(), UploadError> {
    let size = batch.len() as u64;
    state.total_candidates.fetch_add(size, Ordering::SeqCst);
    debug!(size, "Queueing upload batch");
    tx.send(batch)
        .await
        .map_err(|_| UploadError::Worker("all upload workers stopped before the queue was drained".into()))
}

/// Exports one API and extracts its payload. Unpublished or non-public APIs
/// are filtered out; export or extraction failures skip the API.
async fn build_payload(
    catalog: &dyn ArtifactCatalog<Item = ApiDescriptor>,
    item: &ApiDescriptor,
    tenant: &str,
) -> Option<ApiPayload> {
    if !item.is_publishable() {
        debug!(api = %item.name, state = %item.life_cycle_status, "Skipping unpublished artifact");
        return None;
    }
    let archive = match catalog.export_one(item).await {
        Ok(archive) => archive,
        Err(e) => {
            warn!(api = %item.name, version = %item.version, error = %e, "Error exporting API, skipping");
            return None;
        }
    };
    match extract_index_payload(&archive.bytes, &item.archive_dir_name(), tenant) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(api = %item.name, version = %item.version, error = %e, "Error reading exported API, skipping");
            None
        }
    }
}

async fn consume_batches<I: Indexer>(
    worker: usize,
    queue: Arc<Mutex<mpsc::Receiver<UploadBatch>>>,
    indexer: Arc<I>,
    settings: UploadSettings,
    state: Arc<UploadRunState>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(batch) = next else {
            debug!(worker, "Queue closed, worker exiting");
            return;
        };
        upload_batch(worker, indexer.as_ref(), &settings, &state, batch).await;
    }
}

async fn upload_batch<I: Indexer + ?Sized>(
    worker: usize,
    indexer: &I,
    settings: &UploadSettings,
    state: &UploadRunState,
    batch: UploadBatch,
) {
    let size = batch.len();
    let body = match serde_json::to_vec(&UploadRequest { apis: &batch }) {
        Ok(body) => body,
        Err(e) => {
            error!(worker, size, error = %e, "Error in marshalling payload, dropping batch");
            state.batches_dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    info!(worker, size, tenant = %settings.tenant, "Uploading APIs");

    let outcome = retry_with_backoff(&settings.retry, "bulk-upload", |_attempt| {
        let body = body.clone();
        async move {
            let response = indexer
                .bulk_upload(&settings.tenant, body)
                .await
                .map_err(|e| AttemptError::Transient(e.to_string()))?;
            if !response.is_success() {
                return Err(AttemptError::Transient(format!(
                    "status {} {}",
                    response.status,
                    response.body_text()
                )));
            }
            serde_json::from_slice::<UpsertResponse>(&response.body)
                .map(|parsed| parsed.message.upsert_count)
                .map_err(|e| AttemptError::Permanent(format!("error in unmarshalling response: {e}")))
        }
    })
    .await;

    match outcome {
        RetryOutcome::Succeeded { value, attempts } => {
            state.total_uploaded.fetch_add(value, Ordering::SeqCst);
            state.batches_sent.fetch_add(1, Ordering::SeqCst);
            info!(worker, size, upserted = value, attempts, tenant = %settings.tenant, "APIs uploaded successfully");
        }
        RetryOutcome::Exhausted { error, attempts } | RetryOutcome::Aborted { error, attempts } => {
            state.batches_dropped.fetch_add(1, Ordering::SeqCst);
            error!(worker, size, attempts, reason = %error, "API upload failed after retry, dropping batch");
        }
    }
}

/// Removes every indexed API and API Product of `tenant`. Unlike a failed
/// upload batch, a failed purge is fatal.
pub async fn purge_index<I: Indexer + ?Sized>(
    indexer: &I,
    tenant: &str,
    policy: &RetryPolicy,
) -> Result<u64, UploadError> {
    info!(tenant, "Removing existing APIs and API Products from the index");
    let outcome = retry_with_backoff(policy, "bulk-remove", |_attempt| async move {
        let response = indexer
            .bulk_remove(tenant)
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;
        if !response.is_success() {
            return Err(AttemptError::Transient(format!(
                "status {} {}",
                response.status,
                response.body_text()
            )));
        }
        serde_json::from_slice::<DeleteResponse>(&response.body)
            .map(|parsed| parsed.message.delete_count)
            .map_err(|e| AttemptError::Permanent(format!("error in unmarshalling response: {e}")))
    })
    .await;

    let count = outcome.into_result().map_err(UploadError::Purge)?;
    info!(tenant, deleted = count, "Removed existing APIs and API Products");
    Ok(count)
}
