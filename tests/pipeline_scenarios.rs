use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use workshop_ingest::app::content_store::{ContentStore, NegativeCache};
use workshop_ingest::app::fetch_use_case::{FetchOutcome, FetchUseCase};
use workshop_ingest::app::ports::{AnalyzeSinkPort, FetcherPort};
use workshop_ingest::app::reconcile_use_case::{ReconcileOutcome, ReconcilePolicy, Reconciler};
use workshop_ingest::domain::{AnalyzeRequest, ExternalFileId, FetchRequest, FetchResult, FetchedContent, LinkableRecord};
use workshop_ingest::error::{IngestError, Result};
use workshop_ingest::infra::blob_memory::MemoryBlobStore;
use workshop_ingest::infra::clock::FakeClock;
use workshop_ingest::infra::record_store::InMemoryRecordStore;

enum Step {
    Found(&'static [u8]),
    NotFound,
    Transient,
}

/// Replays a fixed script of fetch results and counts calls.
#[derive(Default)]
struct ScriptedFetcher {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn with(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(steps.into()), calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetcherPort for ScriptedFetcher {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch(&self, id: &ExternalFileId) -> Result<FetchResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Found(bytes)) => Ok(FetchResult::Found(FetchedContent {
                bytes: bytes.to_vec(),
                display_name: format!("{}.zip", id),
            })),
            Some(Step::NotFound) => Ok(FetchResult::NotFound),
            Some(Step::Transient) | None => Err(IngestError::transient(id.as_str(), "upstream 503")),
        }
    }
}

#[derive(Default)]
struct VecSink(Mutex<Vec<AnalyzeRequest>>);

impl VecSink {
    fn emitted(&self) -> Vec<AnalyzeRequest> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalyzeSinkPort for VecSink {
    async fn emit(&self, request: AnalyzeRequest) -> Result<()> {
        self.0.lock().unwrap().push(request);
        Ok(())
    }
}

struct World {
    content_blobs: Arc<MemoryBlobStore>,
    missing_blobs: Arc<MemoryBlobStore>,
    records: Arc<InMemoryRecordStore>,
    fetcher: Arc<ScriptedFetcher>,
    sink: Arc<VecSink>,
    use_case: FetchUseCase<ScriptedFetcher>,
}

impl World {
    fn new(steps: Vec<Step>) -> Self {
        let content_blobs = Arc::new(MemoryBlobStore::new("https://cdn.test/workshop"));
        let missing_blobs = Arc::new(MemoryBlobStore::new("https://cdn.test/workshop-missing"));
        let records = Arc::new(InMemoryRecordStore::new());
        let fetcher = ScriptedFetcher::with(steps);
        let sink = Arc::new(VecSink::default());
        let use_case = FetchUseCase::new(
            NegativeCache::new(missing_blobs.clone()),
            ContentStore::new(content_blobs.clone(), "zip"),
            fetcher.clone(),
            Reconciler::new(
                records.clone(),
                Arc::new(FakeClock::default()),
                ReconcilePolicy::new(Duration::from_secs(10), Duration::from_secs(60)),
            ),
            sink.clone(),
            Duration::from_secs(30),
        );
        Self { content_blobs, missing_blobs, records, fetcher, sink, use_case }
    }

    fn with_record(self, id: u64) -> Self {
        self.records.insert(LinkableRecord { external_file_id: ExternalFileId::from(id), content_url: None });
        self
    }

    async fn handle(&self, id: u64, force: bool) -> Result<FetchOutcome> {
        let request = FetchRequest::new(ExternalFileId::from(id), force);
        self.use_case.handle(&request, &CancellationToken::new()).await
    }

    fn has_artifact(&self, id: u64) -> bool {
        self.content_blobs.get(&format!("{}.zip", id)).is_some()
    }

    fn has_marker(&self, id: u64) -> bool {
        self.missing_blobs.get(&format!("{}.missing", id)).is_some()
    }
}

#[tokio::test]
async fn found_item_is_stored_linked_and_analyzed() {
    let world = World::new(vec![Step::Found(b"PK-42")]).with_record(42);

    let outcome = world.handle(42, false).await.unwrap();

    assert!(world.has_artifact(42));
    assert!(!world.has_marker(42));
    assert_eq!(world.content_blobs.get("42.zip").unwrap(), b"PK-42".to_vec());
    assert_eq!(
        world.records.all()[0].content_url.as_deref(),
        Some("https://cdn.test/workshop/42.zip")
    );
    assert_eq!(
        world.sink.emitted(),
        vec![AnalyzeRequest { artifact_key: "42.zip".into(), force: true }]
    );
    match outcome {
        FetchOutcome::Analyzed { changed, reconcile, .. } => {
            assert!(changed);
            assert_eq!(reconcile, ReconcileOutcome::Linked { updated: 1, attempts: 1 });
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn not_found_writes_marker_and_reports_failure() {
    let world = World::new(vec![Step::NotFound]).with_record(42);

    let outcome = world.handle(42, false).await.unwrap();

    assert_eq!(outcome, FetchOutcome::MarkedMissing);
    assert!(outcome.is_reported_failure());
    assert!(world.has_marker(42));
    assert!(!world.has_artifact(42));
    assert!(world.sink.emitted().is_empty());
    assert_eq!(world.records.all()[0].content_url, None);
}

#[tokio::test]
async fn second_unforced_run_is_idempotent() {
    let world = World::new(vec![Step::Found(b"PK-42")]).with_record(42);

    world.handle(42, false).await.unwrap();
    let writes_after_first = world.content_blobs.write_count();
    let outcome = world.handle(42, false).await.unwrap();

    assert_eq!(world.fetcher.calls(), 1);
    assert_eq!(world.content_blobs.write_count(), writes_after_first);
    assert!(matches!(outcome, FetchOutcome::Analyzed { changed: false, .. }));
    assert_eq!(
        world.sink.emitted().last(),
        Some(&AnalyzeRequest { artifact_key: "42.zip".into(), force: false })
    );
}

#[tokio::test]
async fn negative_marker_suppresses_unforced_fetch() {
    let world = World::new(vec![Step::Found(b"never")]);
    world.use_case.negative_cache().mark(&ExternalFileId::from(7)).await.unwrap();

    let outcome = world.handle(7, false).await.unwrap();

    assert_eq!(outcome, FetchOutcome::KnownMissing);
    assert!(!outcome.is_reported_failure());
    assert_eq!(world.fetcher.calls(), 0);
    assert!(world.sink.emitted().is_empty());
    assert!(world.has_marker(7));
}

#[tokio::test]
async fn forced_fetch_clears_marker_and_fetches_once() {
    let world = World::new(vec![Step::Found(b"PK-7")]).with_record(7);
    world.use_case.negative_cache().mark(&ExternalFileId::from(7)).await.unwrap();

    let outcome = world.handle(7, true).await.unwrap();

    assert_eq!(world.fetcher.calls(), 1);
    assert!(!world.has_marker(7));
    assert!(world.has_artifact(7));
    assert_eq!(outcome.analyze_request(), Some(&AnalyzeRequest { artifact_key: "7.zip".into(), force: true }));
}

#[tokio::test]
async fn transient_failure_leaves_stores_untouched() {
    let world = World::new(vec![Step::Transient]).with_record(42);

    let err = world.handle(42, false).await.unwrap_err();

    assert!(matches!(err, IngestError::TransientFetch { .. }));
    assert!(err.is_transient());
    assert_eq!(world.content_blobs.write_count(), 0);
    assert_eq!(world.missing_blobs.write_count(), 0);
    assert!(world.sink.emitted().is_empty());
    assert_eq!(world.records.all()[0].content_url, None);
}

#[tokio::test]
async fn transient_failure_on_forced_refetch_keeps_cached_artifact() {
    let world = World::new(vec![Step::Found(b"v1"), Step::Transient]).with_record(42);

    world.handle(42, false).await.unwrap();
    assert!(world.handle(42, true).await.is_err());

    assert_eq!(world.content_blobs.get("42.zip").unwrap(), b"v1".to_vec());
}

#[tokio::test]
async fn artifact_and_marker_are_never_both_present() {
    let world = World::new(vec![
        Step::Found(b"v1"),
        Step::NotFound,
        Step::Found(b"v2"),
    ])
    .with_record(5);

    world.handle(5, false).await.unwrap();
    assert!(world.has_artifact(5) ^ world.has_marker(5));

    // Forced re-fetch finds the item gone upstream
    assert_eq!(world.handle(5, true).await.unwrap(), FetchOutcome::MarkedMissing);
    assert!(world.has_artifact(5) ^ world.has_marker(5));
    assert!(world.has_marker(5));

    world.handle(5, true).await.unwrap();
    assert!(world.has_artifact(5) ^ world.has_marker(5));
    assert_eq!(world.content_blobs.get("5.zip").unwrap(), b"v2".to_vec());
}

#[tokio::test]
async fn missing_record_times_out_but_still_requests_analysis() {
    let world = World::new(vec![Step::Found(b"PK")]);

    let outcome = world.handle(11, false).await.unwrap();

    match outcome {
        FetchOutcome::Analyzed { reconcile, .. } => {
            assert!(matches!(reconcile, ReconcileOutcome::TimedOut { .. }))
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(world.sink.emitted().len(), 1);
}

#[tokio::test]
async fn artifact_carries_metadata_tags() {
    let world = World::new(vec![Step::Found(b"PK-42")]).with_record(42);
    world.handle(42, false).await.unwrap();

    let tags = world
        .use_case
        .content_store()
        .metadata(&ExternalFileId::from(42))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tags.get("externalFileId").map(String::as_str), Some("42"));
    assert_eq!(tags.get("displayName").map(String::as_str), Some("42.zip"));
    assert_eq!(tags.get("sha256").map(String::len), Some(64));
}
