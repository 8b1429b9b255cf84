//! Metrics for the workshop ingestion pipeline
//!
//! Counters and histograms are emitted through the `metrics` facade. Nothing is
//! recorded until a recorder is installed, so library users and tests pay nothing.

pub mod pipeline;

pub use pipeline::PipelineMetrics;

use std::net::SocketAddr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called inside a Tokio runtime. Idempotent: later calls are ignored.
pub fn init_metrics(addr: SocketAddr) {
    INIT.call_once(|| {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        match builder.install() {
            Ok(()) => {
                info!("Prometheus exporter listening on http://{}/metrics", addr);
                PipelineMetrics::describe();
            }
            Err(e) => {
                warn!("Prometheus exporter install failed: {}", e);
            }
        }
    });
}
