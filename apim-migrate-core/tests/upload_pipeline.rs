mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apim_migrate_core::artifact::{ApiDescriptor, ArtifactKind};
use apim_migrate_core::contract::{
    ArtifactCatalog, Indexer, IndexerResponse, MockIndexer, TransportError,
};
use async_trait::async_trait;
use apim_migrate_core::retry::RetryPolicy;
use apim_migrate_core::upload::{UploadError, UploadPipeline, UploadSettings};
use common::{api_archive, apis, FakeCatalog};

fn settings(page_size: usize, batch_size: usize) -> UploadSettings {
    UploadSettings {
        page_size,
        batch_size,
        retry: RetryPolicy::new(2, Duration::ZERO),
        ..UploadSettings::new("wso2.com")
    }
}

fn public_catalog(kind: ArtifactKind, items: Vec<ApiDescriptor>) -> FakeCatalog<ApiDescriptor> {
    FakeCatalog::new(kind, items).with_archive(|item| api_archive(item, "PUBLIC"))
}

/// Indexer that upserts everything it is sent and counts calls.
fn echo_indexer(calls: Arc<AtomicUsize>) -> MockIndexer {
    let mut indexer = MockIndexer::new();
    indexer.expect_bulk_upload().returning(move |tenant, body| {
        assert_eq!(tenant, "wso2.com");
        calls.fetch_add(1, Ordering::SeqCst);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let count = parsed["apis"].as_array().unwrap().len();
        Ok(IndexerResponse {
            status: 200,
            body: format!(r#"{{"message":{{"upsert_count":{count}}}}}"#).into_bytes(),
        })
    });
    indexer
}

#[tokio::test]
async fn uploads_every_api_in_ceil_n_over_b_batches() {
    let catalog = public_catalog(ArtifactKind::Api, apis(125));
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = UploadPipeline::new(Arc::new(echo_indexer(calls.clone())), settings(50, 50));

    let catalogs: [&dyn ArtifactCatalog<Item = ApiDescriptor>; 1] = [&catalog];
    let report = pipeline.run(&catalogs).await.unwrap();

    assert_eq!(report.total_candidates, 125);
    assert_eq!(report.total_uploaded, 125);
    assert_eq!(report.batches_sent, 3);
    assert_eq!(report.batches_dropped, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(catalog.list_offsets(), vec![0, 50, 100, 150]);
}

#[tokio::test]
async fn unpublished_and_non_public_apis_are_filtered() {
    let mut items = apis(10);
    items[1].life_cycle_status = "CREATED".into();
    items[2].life_cycle_status = "PROTOTYPED".into();
    items[3].life_cycle_status = "DEPRECATED".into();
    let catalog = FakeCatalog::new(ArtifactKind::Api, items).with_archive(|item| {
        let visibility = if item.name == "Api004" { "RESTRICTED" } else { "PUBLIC" };
        api_archive(item, visibility)
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = UploadPipeline::new(Arc::new(echo_indexer(calls)), settings(20, 50));

    let catalogs: [&dyn ArtifactCatalog<Item = ApiDescriptor>; 1] = [&catalog];
    let report = pipeline.run(&catalogs).await.unwrap();

    // 10 minus CREATED, DEPRECATED and the restricted one.
    assert_eq!(report.total_candidates, 7);
    assert_eq!(report.total_uploaded, 7);
    // Unpublished artifacts are never exported.
    assert_eq!(catalog.take_exported().len(), 8);
}

#[tokio::test]
async fn broken_archive_skips_only_that_api() {
    let catalog = FakeCatalog::new(ArtifactKind::Api, apis(4)).with_archive(|item| {
        if item.name == "Api002" {
            b"not a zip".to_vec()
        } else {
            api_archive(item, "PUBLIC")
        }
    });
    catalog.fail_export_once("Api003 1.0.0 (provider: admin)");
    let pipeline = UploadPipeline::new(
        Arc::new(echo_indexer(Arc::new(AtomicUsize::new(0)))),
        settings(20, 50),
    );

    let catalogs: [&dyn ArtifactCatalog<Item = ApiDescriptor>; 1] = [&catalog];
    let report = pipeline.run(&catalogs).await.unwrap();

    assert_eq!(report.total_candidates, 2);
    assert_eq!(report.total_uploaded, 2);
}

#[tokio::test]
async fn failing_batches_are_tried_twice_then_dropped() {
    let catalog = public_catalog(ArtifactKind::Api, apis(30));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut indexer = MockIndexer::new();
    indexer.expect_bulk_upload().returning(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(IndexerResponse {
            status: 502,
            body: b"bad gateway".to_vec(),
        })
    });
    let pipeline = UploadPipeline::new(Arc::new(indexer), settings(20, 10));

    let catalogs: [&dyn ArtifactCatalog<Item = ApiDescriptor>; 1] = [&catalog];
    let report = pipeline.run(&catalogs).await.unwrap();

    assert_eq!(report.total_candidates, 30);
    assert_eq!(report.total_uploaded, 0);
    assert_eq!(report.batches_dropped, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn listing_failure_is_fatal_after_draining_queued_batches() {
    let catalog = public_catalog(ArtifactKind::Api, apis(60));
    catalog.fail_list_once_at(20);
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = UploadPipeline::new(Arc::new(echo_indexer(calls.clone())), settings(20, 20));

    let catalogs: [&dyn ArtifactCatalog<Item = ApiDescriptor>; 1] = [&catalog];
    let err = pipeline.run(&catalogs).await.unwrap_err();

    assert!(matches!(
        err,
        UploadError::Listing {
            kind: ArtifactKind::Api,
            ..
        }
    ));
    // The first page formed a full batch before the failure and was uploaded.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn apis_then_products_share_batches() {
    let api_catalog = public_catalog(ArtifactKind::Api, apis(15));
    let product_catalog = public_catalog(ArtifactKind::ApiProduct, apis(7));
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = UploadPipeline::new(Arc::new(echo_indexer(calls.clone())), settings(20, 10));

    let catalogs: [&dyn ArtifactCatalog<Item = ApiDescriptor>; 2] = [&api_catalog, &product_catalog];
    let report = pipeline.run(&catalogs).await.unwrap();

    assert_eq!(report.total_candidates, 22);
    assert_eq!(report.total_uploaded, 22);
    assert_eq!(report.batches_sent, 3);
    assert_eq!(product_catalog.list_offsets(), vec![0, 20]);
}

#[tokio::test]
async fn empty_collection_sends_nothing() {
    let catalog = public_catalog(ArtifactKind::Api, Vec::new());
    let mut indexer = MockIndexer::new();
    indexer.expect_bulk_upload().never();
    let pipeline = UploadPipeline::new(Arc::new(indexer), settings(20, 20));

    let catalogs: [&dyn ArtifactCatalog<Item = ApiDescriptor>; 1] = [&catalog];
    let report = pipeline.run(&catalogs).await.unwrap();

    assert_eq!(report, Default::default());
}

/// Indexer that takes a while per call and tracks how many calls overlap and
/// how far the producer has run ahead of finished uploads.
struct SlowIndexer {
    catalog: Arc<FakeCatalog<ApiDescriptor>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    finished: AtomicUsize,
    peak_backlog: AtomicUsize,
}

impl SlowIndexer {
    fn new(catalog: Arc<FakeCatalog<ApiDescriptor>>) -> Self {
        Self {
            catalog,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            peak_backlog: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Indexer for SlowIndexer {
    async fn bulk_upload(&self, _tenant: &str, body: Vec<u8>) -> Result<IndexerResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let exported = self.catalog.exported.lock().unwrap().len();
        let backlog = exported - self.finished.load(Ordering::SeqCst);
        self.peak_backlog.fetch_max(backlog, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(100)).await;

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let count = parsed["apis"].as_array().unwrap().len();
        self.finished.fetch_add(count, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(IndexerResponse {
            status: 200,
            body: format!(r#"{{"message":{{"upsert_count":{count}}}}}"#).into_bytes(),
        })
    }

    async fn bulk_remove(&self, _tenant: &str) -> Result<IndexerResponse, TransportError> {
        unreachable!("upload never removes")
    }
}

#[tokio::test(start_paused = true)]
async fn workers_upload_concurrently_and_the_queue_holds_back_the_producer() {
    let catalog = Arc::new(public_catalog(ArtifactKind::Api, apis(12)));
    let indexer = Arc::new(SlowIndexer::new(Arc::clone(&catalog)));
    let settings = UploadSettings {
        workers: 3,
        queue_capacity: 1,
        ..settings(20, 1)
    };
    let pipeline = UploadPipeline::new(Arc::clone(&indexer), settings);

    let catalogs: [&dyn ArtifactCatalog<Item = ApiDescriptor>; 1] = [catalog.as_ref()];
    let report = pipeline.run(&catalogs).await.unwrap();

    assert_eq!(report.total_uploaded, 12);
    assert_eq!(report.batches_sent, 12);
    assert_eq!(indexer.peak_in_flight.load(Ordering::SeqCst), 3);
    // Exported but not yet uploaded: at most the batches in flight, the one
    // queued slot, and the one the producer is waiting to enqueue.
    let backlog = indexer.peak_backlog.load(Ordering::SeqCst);
    assert!(backlog <= 3 + 1 + 1, "producer ran {backlog} batches ahead");
}
