use crate::engine::client::ProbeClient;
use crate::error::{EngineError, EngineResult};
use crate::model::{LatencySummary, RunConfig};
use crate::stats::latency_summary_from_samples;

/// How a single RTT sample is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyMethod {
    /// Time to complete a TCP handshake.
    TcpConnect,
    /// Time for an HTTP HEAD round trip.
    HttpHead,
}

impl LatencyMethod {
    pub fn name(self) -> &'static str {
        match self {
            LatencyMethod::TcpConnect => "tcp-connect",
            LatencyMethod::HttpHead => "http-head",
        }
    }

    fn targets(self, cfg: &RunConfig) -> &[String] {
        match self {
            LatencyMethod::TcpConnect => &cfg.tcp_probe_targets,
            LatencyMethod::HttpHead => &cfg.http_probe_urls,
        }
    }
}

/// Probe every target `probe_attempts` times and summarise all successes
/// as one sample set.
pub async fn run_latency_probes(
    client: &ProbeClient,
    cfg: &RunConfig,
    method: LatencyMethod,
) -> EngineResult<LatencySummary> {
    let mut samples = Vec::<f64>::new();

    for target in method.targets(cfg) {
        for attempt in 0..cfg.probe_attempts {
            let r = match method {
                LatencyMethod::TcpConnect => client.tcp_rtt_ms(target, cfg.probe_timeout).await,
                LatencyMethod::HttpHead => client.head_rtt_ms(target, cfg.probe_timeout).await,
            };
            match r {
                Ok(ms) => {
                    tracing::debug!(
                        %target,
                        attempt,
                        rtt_ms = ms,
                        method = method.name(),
                        "latency sample"
                    );
                    samples.push(ms);
                    tokio::time::sleep(cfg.probe_interval).await;
                }
                Err(e) => {
                    tracing::debug!(
                        %target,
                        attempt,
                        error = %e,
                        method = method.name(),
                        "latency probe failed"
                    );
                }
            }
        }
    }

    summarize(&samples, cfg.min_latency_samples)
}

fn summarize(samples: &[f64], needed: usize) -> EngineResult<LatencySummary> {
    if samples.len() < needed {
        return Err(EngineError::InsufficientSamples {
            needed,
            have: samples.len(),
        });
    }
    latency_summary_from_samples(samples).ok_or(EngineError::InsufficientSamples {
        needed,
        have: 0,
    })
}
