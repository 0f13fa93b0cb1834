use crate::transport::Output;
use anyhow::{Context, Result};
use flow_pipeline::Metrics;
use flow_pipeline::metrics::counter_total;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Logs a counter summary every `interval` and, when configured, rewrites
/// the metrics file. Runs one last report on shutdown.
pub(crate) async fn run_reporter(
    metrics: Arc<Metrics>,
    output: Arc<Output>,
    interval: Duration,
    file: Option<PathBuf>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                report(&metrics, &output, file.as_deref());
                break;
            }
            _ = ticker.tick() => {
                report(&metrics, &output, file.as_deref());
            }
        }
    }
}

fn report(metrics: &Metrics, output: &Output, file: Option<&Path>) {
    tracing::info!(
        "flow stats: received={} bytes={} decoder_errors={} netflow={} sflow={} transform_errors={}",
        counter_total(&metrics.traffic_packets),
        counter_total(&metrics.traffic_bytes),
        counter_total(&metrics.decoder_errors),
        counter_total(&metrics.netflow_stats),
        counter_total(&metrics.sflow_stats),
        counter_total(&metrics.transform_errors),
    );
    output.log_stats();

    if let Some(path) = file
        && let Err(err) = write_metrics_file(metrics, path)
    {
        tracing::warn!("{:#}", err);
    }
}

/// Replaces `path` in one rename so readers never see a partial file.
fn write_metrics_file(metrics: &Metrics, path: &Path) -> Result<()> {
    let text = metrics
        .render_text()
        .context("failed to render metrics")?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    tmp.write_all(text.as_bytes())
        .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to move metrics into {}", path.display()))?;
    Ok(())
}
