use crate::engine::client::{random_payload, ProbeClient};
use crate::engine::throughput::{
    aggregate_workers, corrected_median, fan_out, log_reports, WorkerReport,
};
use crate::error::EngineResult;
use crate::model::RunConfig;
use crate::stats::mbps;
use std::time::Instant;

/// One random payload POSTed to the CDN over a single connection.
///
/// The rate uses the configured payload size; the body is generated to
/// exactly that length.
pub async fn single_connection(client: &ProbeClient, cfg: &RunConfig) -> EngineResult<f64> {
    let url = cfg.up_url();
    let payload = random_payload(cfg.upload_bytes)?;

    let start = Instant::now();
    client
        .upload(&url, payload, cfg.upload_timeout, false)
        .await?;
    let elapsed = start.elapsed();

    tracing::debug!(
        %url,
        bytes = cfg.upload_bytes,
        elapsed_ms = elapsed.as_millis() as u64,
        "single upload finished"
    );
    Ok(mbps(cfg.upload_bytes, elapsed))
}

/// Parallel uploads spread round-robin over the test servers. A worker's
/// payload counts once its response has arrived.
pub async fn multi_connection(client: &ProbeClient, cfg: &RunConfig) -> EngineResult<f64> {
    let bytes_per_worker = cfg.multi_upload_bytes;
    let timeout = cfg.worker_timeout;

    let (reports, elapsed) = fan_out(cfg.workers, |index| {
        let client = client.clone();
        let url = cfg.server_for(index).map(|s| s.up_url());
        async move {
            let Some(url) = url else {
                return WorkerReport::failed(index, "no test servers configured");
            };
            let payload = match random_payload(bytes_per_worker) {
                Ok(p) => p,
                Err(e) => return WorkerReport::failed(index, e.to_string()),
            };
            match client.upload(&url, payload, timeout, true).await {
                Ok(()) => WorkerReport {
                    index,
                    bytes: bytes_per_worker,
                    error: None,
                },
                Err(e) => WorkerReport::failed(index, e.to_string()),
            }
        }
    })
    .await;

    log_reports("upload", &reports);
    aggregate_workers(&reports, elapsed)
}

/// Smaller payloads POSTed to generic echo endpoints, one after another.
pub async fn alternatives(client: &ProbeClient, cfg: &RunConfig) -> EngineResult<f64> {
    let mut rates = Vec::with_capacity(cfg.upload_fallback_urls.len());

    for url in &cfg.upload_fallback_urls {
        let payload = random_payload(cfg.fallback_upload_bytes)?;
        let start = Instant::now();
        match client
            .upload(url, payload, cfg.fallback_timeout, true)
            .await
        {
            Ok(()) => rates.push(mbps(cfg.fallback_upload_bytes, start.elapsed())),
            Err(e) => tracing::debug!(%url, error = %e, "alternative upload failed"),
        }
    }

    corrected_median(&rates, cfg.fallback_correction, cfg.upload_fallback_urls.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{
        closed_addr, dead_server, local_config, unreachable_config, MockCdn,
    };
    use crate::error::EngineError;

    #[tokio::test]
    async fn test_single_connection_sends_full_payload() {
        let cdn = MockCdn::start().await;
        let cfg = local_config(&cdn);
        let client = ProbeClient::new(&cfg).unwrap();
        let rate = single_connection(&client, &cfg).await.unwrap();
        assert!(rate.is_finite() && rate > 0.0);
        assert_eq!(cdn.uploaded_bytes(), cfg.upload_bytes);
    }

    #[tokio::test]
    async fn test_multi_connection_counts_only_successful_workers() {
        let cdn = MockCdn::start().await;
        let dead = closed_addr().await;
        let cfg = RunConfig {
            servers: vec![cdn.server("live"), dead_server(dead)],
            ..local_config(&cdn)
        };
        let client = ProbeClient::new(&cfg).unwrap();
        let rate = multi_connection(&client, &cfg).await.unwrap();
        assert!(rate > 0.0);
        // Workers 0 and 2 hit the live server.
        assert_eq!(cdn.uploaded_bytes(), 2 * cfg.multi_upload_bytes);
    }

    #[tokio::test]
    async fn test_multi_connection_all_dead() {
        let cfg = unreachable_config().await;
        let client = ProbeClient::new(&cfg).unwrap();
        let err = multi_connection(&client, &cfg).await.unwrap_err();
        assert!(matches!(err, EngineError::AllConnectionsFailed { attempted: 4 }));
    }

    #[tokio::test]
    async fn test_alternatives() {
        let cdn = MockCdn::start().await;
        let dead = closed_addr().await;
        let mut cfg = local_config(&cdn);
        cfg.upload_fallback_urls.push(format!("http://{dead}/post"));
        let client = ProbeClient::new(&cfg).unwrap();
        let rate = alternatives(&client, &cfg).await.unwrap();
        assert!(rate > 0.0);
        assert_eq!(cdn.uploaded_bytes(), cfg.fallback_upload_bytes);
    }

    #[tokio::test]
    async fn test_alternatives_all_failed() {
        let cfg = unreachable_config().await;
        let client = ProbeClient::new(&cfg).unwrap();
        let err = alternatives(&client, &cfg).await.unwrap_err();
        assert!(matches!(err, EngineError::AllAlternativesFailed { attempted: 1 }));
    }
}
