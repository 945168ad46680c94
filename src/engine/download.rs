use crate::engine::client::ProbeClient;
use crate::engine::throughput::{
    aggregate_workers, corrected_median, fan_out, log_reports, WorkerReport,
};
use crate::error::EngineResult;
use crate::model::RunConfig;
use crate::stats::mbps;
use std::time::Instant;

/// One large transfer from the CDN over a single connection.
pub async fn single_connection(client: &ProbeClient, cfg: &RunConfig) -> EngineResult<f64> {
    let url = cfg.down_url();
    let start = Instant::now();
    let mut received = 0u64;
    client
        .download_into(&url, cfg.download_timeout, &mut received)
        .await?;
    let elapsed = start.elapsed();

    tracing::debug!(
        %url,
        bytes = received,
        elapsed_ms = elapsed.as_millis() as u64,
        "single download finished"
    );
    Ok(mbps(received, elapsed))
}

/// Parallel transfers spread round-robin over the test servers.
pub async fn multi_connection(client: &ProbeClient, cfg: &RunConfig) -> EngineResult<f64> {
    let bytes_per_worker = cfg.multi_download_bytes;
    let timeout = cfg.worker_timeout;

    let (reports, elapsed) = fan_out(cfg.workers, |index| {
        let client = client.clone();
        let url = cfg.server_for(index).map(|s| s.down_url(bytes_per_worker));
        async move {
            let Some(url) = url else {
                return WorkerReport::failed(index, "no test servers configured");
            };
            let mut bytes = 0u64;
            let error = client
                .download_into(&url, timeout, &mut bytes)
                .await
                .err()
                .map(|e| e.to_string());
            WorkerReport { index, bytes, error }
        }
    })
    .await;

    log_reports("download", &reports);
    aggregate_workers(&reports, elapsed)
}

/// Small downloads from well-known sources, one after another.
pub async fn alternatives(client: &ProbeClient, cfg: &RunConfig) -> EngineResult<f64> {
    let mut rates = Vec::with_capacity(cfg.download_fallback_urls.len());

    for url in &cfg.download_fallback_urls {
        let start = Instant::now();
        let mut received = 0u64;
        let outcome = client
            .download_into(url, cfg.fallback_timeout, &mut received)
            .await;
        let elapsed = start.elapsed();

        if let Err(e) = &outcome {
            tracing::debug!(%url, bytes = received, error = %e, "alternative download failed");
        }
        // A body cut short still measured something.
        if received > 0 {
            rates.push(mbps(received, elapsed));
        }
    }

    corrected_median(&rates, cfg.fallback_correction, cfg.download_fallback_urls.len())
}
