use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use workshop_ingest::app::fetch_use_case::FetchOutcome;
use workshop_ingest::config::PipelineConfig;
use workshop_ingest::constants::FETCH_QUEUE;
use workshop_ingest::domain::{ExternalFileId, FetchRequest};
use workshop_ingest::infra::factory::build_pipeline;
use workshop_ingest::logging;
use workshop_ingest::worker::QueueWorker;

#[derive(Parser)]
#[command(name = "workshop-ingest")]
#[command(about = "Fetch, cache and link workshop files")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML config file (defaults to ./workshop-ingest.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume fetch requests until interrupted
    Worker,
    /// Queue a fetch request
    Enqueue {
        external_file_id: String,
        /// Re-fetch even if cached or marked missing
        #[arg(long)]
        force: bool,
    },
    /// Handle one fetch request in-process, bypassing the queue
    Process {
        external_file_id: String,
        #[arg(long)]
        force: bool,
    },
    /// Register a record that references a workshop file
    LinkRecord { external_file_id: String },
    /// Show cache, marker and record state for a workshop file
    Status { external_file_id: String },
}

fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received; finishing in-flight work");
                trigger.cancel();
            }
            Err(e) => error!("failed to listen for ctrl-c: {}", e),
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = PipelineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let _log_guard = logging::init_logging(&config.log_dir);
    if let Some(addr) = cli.metrics_addr {
        workshop_ingest::metrics::init_metrics(addr);
    }

    let pipeline = build_pipeline(&config).context("assembling pipeline")?;

    match cli.command {
        Commands::Worker => {
            let worker = QueueWorker::new(pipeline.log.clone(), pipeline.use_case.clone(), config.worker.clone());
            worker.run(shutdown_token()).await?;
        }
        Commands::Enqueue { external_file_id, force } => {
            let id = ExternalFileId::parse(external_file_id)?;
            let envelope = pipeline.log.append(FETCH_QUEUE, FetchRequest::new(id, force))?;
            info!(message_id = %envelope.message_id, "fetch request queued");
            println!("📥 Queued {} (message {})", envelope.body.external_file_id, envelope.message_id);
        }
        Commands::Process { external_file_id, force } => {
            let id = ExternalFileId::parse(external_file_id)?;
            let request = FetchRequest::new(id, force);
            match pipeline.use_case.handle(&request, &shutdown_token()).await {
                Ok(FetchOutcome::Analyzed { request, changed, reconcile }) => {
                    println!("✅ {} ready (changed: {}, force: {})", request.artifact_key, changed, request.force);
                    println!("   reconcile: {:?}", reconcile);
                }
                Ok(FetchOutcome::KnownMissing) => {
                    println!("⏭️  {} is marked missing; use --force to retry", request.external_file_id);
                }
                Ok(FetchOutcome::MarkedMissing) => {
                    anyhow::bail!("{} not found upstream; marked missing", request.external_file_id);
                }
                Err(e) => {
                    error!("processing failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::LinkRecord { external_file_id } => {
            let id = ExternalFileId::parse(external_file_id)?;
            let row = pipeline.register_record(&id)?;
            println!("📝 Record {} now references {}", row, id);
        }
        Commands::Status { external_file_id } => {
            let id = ExternalFileId::parse(external_file_id)?;
            let content = pipeline.use_case.content_store();
            println!("🔎 {}", id);
            match content.metadata(&id).await? {
                Some(tags) => {
                    println!("   artifact: {}", content.locator(&id));
                    for (k, v) in tags {
                        println!("     {} = {}", k, v);
                    }
                }
                None => println!("   artifact: none"),
            }
            println!("   marked missing: {}", pipeline.use_case.negative_cache().exists(&id).await?);
            let records = pipeline.records.records_for(&id)?;
            println!("   records: {}", records.len());
            for record in records {
                println!("     content_url = {}", record.content_url.as_deref().unwrap_or("-"));
            }
        }
    }
    Ok(())
}
