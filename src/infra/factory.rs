//! Builds concrete adapters from [`PipelineConfig`].

use crate::app::content_store::{ContentStore, NegativeCache};
use crate::app::fetch_use_case::FetchUseCase;
use crate::app::ports::{BlobStorePort, ClockPort, FetcherPort, RecordStorePort};
use crate::app::reconcile_use_case::{RecordReadySignal, ReconcilePolicy, Reconciler};
use crate::config::{FetcherKind, PipelineConfig, StoreBackend};
use crate::domain::ExternalFileId;
use crate::error::{IngestError, Result};
use crate::infra::blob_fs::FsBlobStore;
use crate::infra::blob_http::HttpBlobStore;
use crate::infra::cli_fetcher::CliFetcher;
use crate::infra::clock::SystemClock;
use crate::infra::message_log::{LogAnalyzeSink, MessageLog};
use crate::infra::record_store::SqliteRecordStore;
use crate::infra::remote_fetcher::RemoteFetcher;
use std::sync::Arc;
use tracing::info;

pub fn blob_store(config: &PipelineConfig, container: &str) -> Result<Arc<dyn BlobStorePort>> {
    match config.store.backend {
        StoreBackend::Fs => Ok(Arc::new(FsBlobStore::new(
            &config.store.root,
            container,
            &config.public_base_url,
        ))),
        StoreBackend::Http => {
            let url = config
                .store
                .url
                .as_deref()
                .ok_or_else(|| IngestError::Config("store.url is required for the http backend".into()))?;
            let key = config
                .store
                .service_key
                .as_deref()
                .ok_or_else(|| IngestError::Config("store.service_key is required for the http backend".into()))?;
            Ok(Arc::new(HttpBlobStore::new(url, container, key, &config.public_base_url)))
        }
    }
}

pub fn content_store(config: &PipelineConfig) -> Result<ContentStore> {
    Ok(ContentStore::new(
        blob_store(config, &config.store.content_container)?,
        config.store.artifact_extension.clone(),
    ))
}

pub fn negative_cache(config: &PipelineConfig) -> Result<NegativeCache> {
    Ok(NegativeCache::new(blob_store(config, &config.store.missing_container)?))
}

pub fn fetcher(config: &PipelineConfig) -> Result<Arc<dyn FetcherPort>> {
    match config.fetcher.kind {
        FetcherKind::Remote => Ok(Arc::new(RemoteFetcher::new(
            &config.fetcher.remote.api_base,
            config.fetcher.remote.api_key.clone(),
        ))),
        FetcherKind::Cli => {
            let cli = &config.fetcher.cli;
            let program = cli
                .program
                .as_deref()
                .ok_or_else(|| IngestError::Config("fetcher.cli.program is required for the cli fetcher".into()))?;
            Ok(Arc::new(CliFetcher::new(
                program,
                cli.args.clone(),
                &cli.work_dir,
                cli.not_found_exit_code,
            )))
        }
    }
}

/// Everything a worker or one-shot command needs.
pub struct Pipeline {
    pub log: Arc<MessageLog>,
    pub records: Arc<SqliteRecordStore>,
    pub use_case: Arc<FetchUseCase<dyn FetcherPort>>,
    /// Wakes in-process reconcilers waiting on a record.
    pub ready: RecordReadySignal,
}

impl Pipeline {
    /// Insert a record for `id` and wake any fetch in this process that is
    /// waiting to link it.
    pub fn register_record(&self, id: &ExternalFileId) -> Result<i64> {
        let row = self.records.insert_record(id)?;
        self.ready.publish(id.clone());
        Ok(row)
    }
}

pub fn build_pipeline(config: &PipelineConfig) -> Result<Pipeline> {
    let log = Arc::new(MessageLog::open(&config.transport.dir)?);
    let records = Arc::new(SqliteRecordStore::open(&config.records_db)?);
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);
    let record_port: Arc<dyn RecordStorePort> = records.clone();
    let ready = RecordReadySignal::default();
    let reconciler = Reconciler::new(
        record_port,
        clock,
        ReconcilePolicy::new(config.reconcile.poll_interval(), config.reconcile.max_wait()),
    )
    .with_ready_signal(ready.clone());
    let fetcher = fetcher(config)?;
    info!(
        fetcher = fetcher.name(),
        store = ?config.store.backend,
        transport = %config.transport.dir.display(),
        "pipeline assembled"
    );
    let use_case = FetchUseCase::new(
        negative_cache(config)?,
        content_store(config)?,
        fetcher,
        reconciler,
        Arc::new(LogAnalyzeSink::new(log.clone())),
        config.fetcher.timeout(),
    );
    Ok(Pipeline { log, records, use_case: Arc::new(use_case), ready })
}
