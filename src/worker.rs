//! Queue consumer that drives the fetch pipeline.

use crate::app::fetch_use_case::{FetchOutcome, FetchUseCase};
use crate::app::ports::FetcherPort;
use crate::config::WorkerConfig;
use crate::constants::{FETCH_CONSUMER, FETCH_POISON_QUEUE, FETCH_QUEUE};
use crate::domain::FetchRequest;
use crate::error::{IngestError, Result};
use crate::infra::message_log::{Envelope, MessageLog};
use crate::metrics::PipelineMetrics;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Counts for one processed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub analyzed: usize,
    pub known_missing: usize,
    pub marked_missing: usize,
    pub redelivered: usize,
    pub poisoned: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.analyzed + self.known_missing + self.marked_missing + self.redelivered + self.poisoned
    }
}

pub struct QueueWorker<F: FetcherPort + ?Sized> {
    log: Arc<MessageLog>,
    use_case: Arc<FetchUseCase<F>>,
    config: WorkerConfig,
}

impl<F: FetcherPort + ?Sized + 'static> QueueWorker<F> {
    pub fn new(log: Arc<MessageLog>, use_case: Arc<FetchUseCase<F>>, config: WorkerConfig) -> Self {
        Self { log, use_case, config }
    }

    /// Process batches until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            concurrency = self.config.concurrency,
            max_deliveries = self.config.max_deliveries,
            "fetch worker started"
        );
        while !cancel.is_cancelled() {
            let report = self.run_once(&cancel).await?;
            if report.total() == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.idle_poll()) => {}
                }
            }
        }
        info!("fetch worker stopped");
        Ok(())
    }

    /// Handle one batch from the fetch queue and commit its offset.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<BatchReport> {
        let batch = self
            .log
            .read_batch::<FetchRequest>(FETCH_QUEUE, FETCH_CONSUMER, self.config.batch_size)?;
        let mut report = BatchReport::default();
        if batch.messages.is_empty() {
            if batch.malformed > 0 {
                self.log.commit(FETCH_CONSUMER, FETCH_QUEUE, batch.next_offset)?;
            }
            return Ok(report);
        }
        debug!(size = batch.messages.len(), "processing batch");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut pending: HashMap<Uuid, Envelope<FetchRequest>> = HashMap::new();
        let mut tasks = JoinSet::new();
        for envelope in batch.messages {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| IngestError::Transport(e.to_string()))?;
            let use_case = self.use_case.clone();
            let cancel = cancel.clone();
            let message_id = envelope.message_id;
            let request = envelope.body.clone();
            pending.insert(message_id, envelope);
            tasks.spawn(async move {
                let _permit = permit;
                (message_id, use_case.handle(&request, &cancel).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (message_id, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // The envelope stays in `pending` and is requeued below.
                    error!("fetch task panicked: {}", e);
                    continue;
                }
            };
            let Some(envelope) = pending.remove(&message_id) else {
                continue;
            };
            match result {
                Ok(FetchOutcome::Analyzed { .. }) => report.analyzed += 1,
                Ok(FetchOutcome::KnownMissing) => report.known_missing += 1,
                Ok(FetchOutcome::MarkedMissing) => {
                    report.marked_missing += 1;
                    error!(
                        message_id = %message_id,
                        external_file_id = %envelope.body.external_file_id,
                        "no data upstream; negative marker prevents repeat attempts"
                    );
                }
                Err(IngestError::Cancelled) => {
                    // Shutdown is not the message's fault.
                    self.log.append_envelope(FETCH_QUEUE, &envelope)?;
                    report.redelivered += 1;
                }
                Err(e) => self.requeue(envelope, &e, &mut report)?,
            }
        }
        for (_, envelope) in pending.drain() {
            let e = IngestError::Transport("handler task did not complete".to_string());
            self.requeue(envelope, &e, &mut report)?;
        }

        self.log.commit(FETCH_CONSUMER, FETCH_QUEUE, batch.next_offset)?;
        Ok(report)
    }

    fn requeue(&self, envelope: Envelope<FetchRequest>, cause: &IngestError, report: &mut BatchReport) -> Result<()> {
        let next = envelope.redelivery();
        if !cause.is_transient() || next.delivery_count >= self.config.max_deliveries {
            PipelineMetrics::record_poisoned();
            error!(
                message_id = %next.message_id,
                external_file_id = %next.body.external_file_id,
                deliveries = next.delivery_count,
                "moving message to poison queue: {}",
                cause
            );
            self.log.append_envelope(FETCH_POISON_QUEUE, &next)?;
            report.poisoned += 1;
        } else {
            warn!(
                message_id = %next.message_id,
                external_file_id = %next.body.external_file_id,
                deliveries = next.delivery_count,
                "processing failed, will redeliver: {}",
                cause
            );
            self.log.append_envelope(FETCH_QUEUE, &next)?;
            report.redelivered += 1;
        }
        Ok(())
    }
}
