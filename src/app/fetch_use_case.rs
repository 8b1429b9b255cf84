//! Per-message handler: negative cache, content store, fetch, link, emit.
//!
//! One implementation serves every fetcher backend. Steps before the fetch
//! only read or clear markers, so redelivering a message after any failure
//! restarts the sequence safely.

use crate::app::content_store::{ContentStore, NegativeCache};
use crate::app::ports::{AnalyzeSinkPort, FetcherPort};
use crate::app::reconcile_use_case::{ReconcileOutcome, Reconciler};
use crate::domain::{AnalyzeRequest, ExternalFileId, FetchRequest, FetchResult};
use crate::error::{IngestError, Result};
use crate::metrics::PipelineMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// How a fetch request was handled. Errors are returned separately and mean
/// "redeliver".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Artifact is cached and downstream analysis was requested.
    Analyzed {
        request: AnalyzeRequest,
        changed: bool,
        reconcile: ReconcileOutcome,
    },
    /// A negative marker already exists; nothing was done.
    KnownMissing,
    /// Upstream has no such item; a negative marker was just written.
    MarkedMissing,
}

impl FetchOutcome {
    /// `MarkedMissing` is surfaced to operators as a failed message, but the
    /// negative marker already prevents repeat work so it is not redelivered.
    pub fn is_reported_failure(&self) -> bool {
        matches!(self, FetchOutcome::MarkedMissing)
    }

    pub fn analyze_request(&self) -> Option<&AnalyzeRequest> {
        match self {
            FetchOutcome::Analyzed { request, .. } => Some(request),
            _ => None,
        }
    }
}

pub struct FetchUseCase<F: FetcherPort + ?Sized> {
    negative: NegativeCache,
    content: ContentStore,
    fetcher: Arc<F>,
    reconciler: Reconciler,
    sink: Arc<dyn AnalyzeSinkPort>,
    fetch_timeout: Duration,
}

impl<F: FetcherPort + ?Sized> FetchUseCase<F> {
    pub fn new(
        negative: NegativeCache,
        content: ContentStore,
        fetcher: Arc<F>,
        reconciler: Reconciler,
        sink: Arc<dyn AnalyzeSinkPort>,
        fetch_timeout: Duration,
    ) -> Self {
        Self { negative, content, fetcher, reconciler, sink, fetch_timeout }
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.content
    }

    pub fn negative_cache(&self) -> &NegativeCache {
        &self.negative
    }

    pub async fn handle(&self, request: &FetchRequest, cancel: &CancellationToken) -> Result<FetchOutcome> {
        let span = info_span!(
            "fetch_request",
            external_file_id = %request.external_file_id,
            force = request.force,
            fetcher = self.fetcher.name()
        );
        self.handle_inner(request, cancel).instrument(span).await
    }

    async fn handle_inner(&self, request: &FetchRequest, cancel: &CancellationToken) -> Result<FetchOutcome> {
        let id = &request.external_file_id;
        PipelineMetrics::record_request();

        if self.negative.exists(id).await? {
            if !request.force {
                PipelineMetrics::record_negative_cache_hit();
                info!("item is known to be missing; skipping");
                return Ok(FetchOutcome::KnownMissing);
            }
            debug!("forced request; clearing negative marker");
            self.negative.clear(id).await?;
        }

        let cached = self.content.exists(id).await?;
        let changed = if cached && !request.force {
            PipelineMetrics::record_cache_hit();
            debug!("artifact already cached; relinking only");
            false
        } else {
            match self.fetch(id, cancel).await? {
                FetchResult::NotFound => {
                    // A forced re-fetch may find the item gone; never keep both.
                    if cached {
                        self.content.delete(id).await?;
                    }
                    self.negative.mark(id).await?;
                    PipelineMetrics::record_not_found();
                    warn!("upstream has no such item; negative marker written");
                    return Ok(FetchOutcome::MarkedMissing);
                }
                FetchResult::Found(fetched) => {
                    let size = fetched.bytes.len();
                    if cached {
                        self.content.delete(id).await?;
                    }
                    let key = self.content.put(id, fetched).await?;
                    PipelineMetrics::record_artifact_stored(size);
                    info!(key = %key, size, "artifact stored");
                    true
                }
            }
        };

        let locator = self.content.locator(id);
        let reconcile = self.reconciler.reconcile(id, &locator, cancel).await?;

        let analyze = AnalyzeRequest {
            artifact_key: self.content.key(id),
            force: changed || request.force,
        };
        self.sink.emit(analyze.clone()).await?;
        info!(artifact_key = %analyze.artifact_key, force = analyze.force, "analysis requested");

        Ok(FetchOutcome::Analyzed { request: analyze, changed, reconcile })
    }

    async fn fetch(&self, id: &ExternalFileId, cancel: &CancellationToken) -> Result<FetchResult> {
        let started = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            timed = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(id)) => match timed {
                Ok(result) => result,
                Err(_) => Err(IngestError::transient(
                    id.as_str(),
                    format!("fetch timed out after {}s", self.fetch_timeout.as_secs()),
                )),
            },
        };
        PipelineMetrics::record_fetch_duration(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            if matches!(e, IngestError::TransientFetch { .. }) {
                PipelineMetrics::record_transient_error();
            }
            warn!("fetch failed: {}", e);
        }
        result
    }
}
