//! Bounded-wait linking of resolved content URLs onto domain records.
//!
//! The records are created by an independent import process that may run
//! after the fetch finishes, so an empty lookup is retried on a fixed interval
//! until a record shows up or the wait budget is spent. Giving up is not an
//! error: the record keeps its stale URL until something else corrects it.
//!
//! A [`RecordReadySignal`] lets a creator in the same process wake waiting
//! reconcilers immediately. Records created elsewhere are only seen by polling.

use crate::app::ports::{ClockPort, RecordStorePort};
use crate::domain::ExternalFileId;
use crate::error::Result;
use crate::metrics::PipelineMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl ReconcilePolicy {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self { poll_interval, max_wait }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Records were found; `updated` of them needed the new URL.
    Linked { updated: usize, attempts: u32 },
    /// No record referenced the id before the deadline.
    TimedOut { attempts: u32 },
    Cancelled,
}

/// Broadcast channel announcing that records for an id now exist.
#[derive(Clone)]
pub struct RecordReadySignal {
    sender: broadcast::Sender<ExternalFileId>,
}

impl RecordReadySignal {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, id: ExternalFileId) {
        // No subscribers just means nobody is waiting.
        let _ = self.sender.send(id);
    }

    fn subscribe(&self) -> broadcast::Receiver<ExternalFileId> {
        self.sender.subscribe()
    }
}

impl Default for RecordReadySignal {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct Reconciler {
    records: Arc<dyn RecordStorePort>,
    clock: Arc<dyn ClockPort>,
    policy: ReconcilePolicy,
    ready: Option<RecordReadySignal>,
}

impl Reconciler {
    pub fn new(records: Arc<dyn RecordStorePort>, clock: Arc<dyn ClockPort>, policy: ReconcilePolicy) -> Self {
        Self { records, clock, policy, ready: None }
    }

    pub fn with_ready_signal(mut self, signal: RecordReadySignal) -> Self {
        self.ready = Some(signal);
        self
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Point every record referencing `id` at `locator`, waiting for at least
    /// one record to exist.
    pub async fn reconcile(
        &self,
        id: &ExternalFileId,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        let max_wait = chrono::Duration::from_std(self.policy.max_wait).unwrap_or(chrono::Duration::zero());
        let deadline = self.clock.now() + max_wait;
        let mut ready = self.ready.as_ref().map(|s| s.subscribe());
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(ReconcileOutcome::Cancelled);
            }
            attempts += 1;

            let records = self.records.find_records(id).await?;
            if !records.is_empty() {
                let updated = self.records.set_content_url(id, locator).await?;
                if updated > 0 {
                    PipelineMetrics::record_records_linked(updated);
                    info!(external_file_id = %id, updated, attempts, "linked records to content");
                } else {
                    debug!(external_file_id = %id, "records already linked");
                }
                return Ok(ReconcileOutcome::Linked { updated, attempts });
            }

            if self.clock.now() >= deadline {
                PipelineMetrics::record_reconcile_timeout();
                warn!(
                    external_file_id = %id,
                    attempts,
                    max_wait_secs = self.policy.max_wait.as_secs(),
                    "no record references this file; giving up on linking"
                );
                return Ok(ReconcileOutcome::TimedOut { attempts });
            }

            debug!(external_file_id = %id, attempts, "no records yet; waiting");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(ReconcileOutcome::Cancelled),
                _ = self.clock.sleep(self.policy.poll_interval) => {}
                _ = wait_for_ready(&mut ready, id) => {
                    debug!(external_file_id = %id, "record ready signal received");
                }
            }
        }
    }
}

/// Resolves when `id` is announced; never resolves without a subscription.
async fn wait_for_ready(ready: &mut Option<broadcast::Receiver<ExternalFileId>>, id: &ExternalFileId) {
    let Some(rx) = ready.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(announced) if &announced == id => return,
            Ok(_) => continue,
            // Missed announcements might include ours; poll now.
            Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => {
                *ready = None;
                return std::future::pending().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LinkableRecord;
    use crate::infra::clock::FakeClock;
    use crate::infra::record_store::InMemoryRecordStore;
    use async_trait::async_trait;

    fn policy() -> ReconcilePolicy {
        ReconcilePolicy::new(Duration::from_secs(10), Duration::from_secs(60))
    }

    fn record(id: &ExternalFileId, url: Option<&str>) -> LinkableRecord {
        LinkableRecord { external_file_id: id.clone(), content_url: url.map(str::to_string) }
    }

    /// Record store whose record appears once the clock passes `appear_after`.
    struct LateRecords {
        inner: InMemoryRecordStore,
        clock: Arc<FakeClock>,
        start: chrono::DateTime<chrono::Utc>,
        appear_after: chrono::Duration,
        id: ExternalFileId,
        inserted: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl RecordStorePort for LateRecords {
        async fn find_records(&self, id: &ExternalFileId) -> Result<Vec<LinkableRecord>> {
            let due = self.clock.now() - self.start >= self.appear_after;
            if due && !self.inserted.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.inner.insert(record(&self.id, None));
            }
            self.inner.find_records(id).await
        }

        async fn set_content_url(&self, id: &ExternalFileId, locator: &str) -> Result<usize> {
            self.inner.set_content_url(id, locator).await
        }
    }

    #[tokio::test]
    async fn existing_record_is_linked_without_waiting() {
        let id = ExternalFileId::from(42);
        let records = Arc::new(InMemoryRecordStore::new());
        records.insert(record(&id, None));
        let clock = Arc::new(FakeClock::default());
        let reconciler = Reconciler::new(records.clone(), clock.clone(), policy());

        let outcome = reconciler.reconcile(&id, "https://cdn/42.zip", &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Linked { updated: 1, attempts: 1 });
        assert_eq!(clock.sleep_count(), 0);
        assert_eq!(records.all()[0].content_url.as_deref(), Some("https://cdn/42.zip"));
    }

    #[tokio::test]
    async fn already_linked_record_returns_immediately() {
        let id = ExternalFileId::from(42);
        let records = Arc::new(InMemoryRecordStore::new());
        records.insert(record(&id, Some("u")));
        let clock = Arc::new(FakeClock::default());
        let reconciler = Reconciler::new(records, clock.clone(), policy());

        let outcome = reconciler.reconcile(&id, "u", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Linked { updated: 0, attempts: 1 });
        assert_eq!(clock.sleep_count(), 0);
    }

    #[tokio::test]
    async fn gives_up_within_max_wait_plus_one_interval() {
        let id = ExternalFileId::from(42);
        let other = ExternalFileId::from(99);
        let records = Arc::new(InMemoryRecordStore::new());
        records.insert(record(&other, None));
        let clock = Arc::new(FakeClock::default());
        let start = clock.now();
        let reconciler = Reconciler::new(records.clone(), clock.clone(), policy());

        let outcome = reconciler.reconcile(&id, "u", &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::TimedOut { .. }));
        let waited = (clock.now() - start).to_std().unwrap();
        assert!(waited >= Duration::from_secs(60));
        assert!(waited <= Duration::from_secs(70));
        assert_eq!(records.all()[0].content_url, None);
    }

    #[tokio::test]
    async fn record_created_after_polling_starts_is_linked() {
        let id = ExternalFileId::from(42);
        let clock = Arc::new(FakeClock::default());
        let records = Arc::new(LateRecords {
            inner: InMemoryRecordStore::new(),
            clock: clock.clone(),
            start: clock.now(),
            appear_after: chrono::Duration::seconds(5),
            id: id.clone(),
            inserted: Default::default(),
        });
        let reconciler = Reconciler::new(records.clone(), clock.clone(), policy());

        let outcome = reconciler.reconcile(&id, "u", &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Linked { updated: 1, attempts: 2 });
        assert_eq!(records.inner.all()[0].content_url.as_deref(), Some("u"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_wait() {
        let id = ExternalFileId::from(42);
        let reconciler = Reconciler::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(FakeClock::default()),
            policy(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = reconciler.reconcile(&id, "u", &cancel).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Cancelled);
    }

    #[tokio::test]
    async fn ready_signal_wakes_a_real_time_wait() {
        let id = ExternalFileId::from(42);
        let records = Arc::new(InMemoryRecordStore::new());
        let signal = RecordReadySignal::default();
        // Real clock with a long interval: only the signal can finish this quickly.
        let reconciler = Reconciler::new(
            records.clone(),
            Arc::new(crate::infra::clock::SystemClock),
            ReconcilePolicy::new(Duration::from_secs(3600), Duration::from_secs(7200)),
        )
        .with_ready_signal(signal.clone());

        let publisher = {
            let records = records.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                records.insert(record(&id, None));
                signal.publish(ExternalFileId::from(7));
                signal.publish(id);
            })
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            reconciler.reconcile(&id, "u", &CancellationToken::new()),
        )
        .await
        .expect("signal should end the wait")
        .unwrap();
        publisher.await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Linked { updated: 1, attempts: 2 });
    }
}
