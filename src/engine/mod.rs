mod client;
mod download;
mod latency;
mod network_bind;
mod simulated;
mod throughput;
mod upload;
#[cfg(test)]
pub(crate) mod testing;

pub use latency::LatencyMethod;

use client::ProbeClient;

use crate::error::{EngineError, EngineResult};
use crate::model::{
    LatencyMeasurement, Measurements, RunConfig, SimRange, ThroughputMeasurement, Tier,
};
use anyhow::Result;

/// Latency strategies in the order they are tried.
pub const LATENCY_PLAN: [LatencyMethod; 2] = [LatencyMethod::TcpConnect, LatencyMethod::HttpHead];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub fn name(self) -> &'static str {
        match self {
            Direction::Download => "download",
            Direction::Upload => "upload",
        }
    }

    fn simulated_range(self, cfg: &RunConfig) -> SimRange {
        match self {
            Direction::Download => cfg.simulated.download_mbps,
            Direction::Upload => cfg.simulated.upload_mbps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThroughputStrategy {
    SingleConnection,
    MultiConnection,
    Alternatives,
}

impl ThroughputStrategy {
    pub fn name(self) -> &'static str {
        match self {
            ThroughputStrategy::SingleConnection => "single-connection",
            ThroughputStrategy::MultiConnection => "multi-connection",
            ThroughputStrategy::Alternatives => "alternatives",
        }
    }
}

/// Throughput strategies in the order they are tried for a connection mode.
pub fn throughput_plan(multi_connection: bool) -> [ThroughputStrategy; 2] {
    let primary = if multi_connection {
        ThroughputStrategy::MultiConnection
    } else {
        ThroughputStrategy::SingleConnection
    };
    [primary, ThroughputStrategy::Alternatives]
}

fn tier_at(position: usize) -> Tier {
    if position == 0 {
        Tier::Primary
    } else {
        Tier::Fallback
    }
}

/// Runs latency, download and upload in sequence, walking each metric's
/// fallback plan until something answers.
pub struct TestEngine {
    cfg: RunConfig,
    client: ProbeClient,
}

impl TestEngine {
    pub fn new(cfg: RunConfig) -> Result<Self> {
        let client = ProbeClient::new(&cfg)?;
        Ok(Self { cfg, client })
    }

    pub fn config(&self) -> &RunConfig {
        &self.cfg
    }

    pub async fn run(&self, multi_connection: bool) -> EngineResult<Measurements> {
        tracing::info!(multi_connection, "starting measurement run");

        let latency = self.measure_latency().await?;
        let download = self
            .measure_throughput(Direction::Download, multi_connection)
            .await?;
        let upload = self
            .measure_throughput(Direction::Upload, multi_connection)
            .await?;

        Ok(Measurements {
            latency,
            download,
            upload,
        })
    }

    pub async fn measure_latency(&self) -> EngineResult<LatencyMeasurement> {
        for (position, method) in LATENCY_PLAN.into_iter().enumerate() {
            match latency::run_latency_probes(&self.client, &self.cfg, method).await {
                Ok(summary) => {
                    let tier = tier_at(position);
                    tracing::info!(
                        method = method.name(),
                        %tier,
                        samples = summary.samples,
                        ping_ms = summary.mean_ms,
                        jitter = summary.jitter,
                        "latency measured"
                    );
                    return Ok(LatencyMeasurement {
                        ping_ms: summary.mean_ms,
                        jitter: summary.jitter,
                        tier,
                    });
                }
                Err(e) => {
                    tracing::warn!(method = method.name(), error = %e, "latency strategy failed")
                }
            }
        }

        if !self.cfg.allow_simulated {
            return Err(EngineError::MeasurementUnavailable { metric: "latency" });
        }
        let m = simulated::latency(&self.cfg.simulated);
        tracing::warn!(ping_ms = m.ping_ms, jitter = m.jitter, "latency simulated");
        Ok(m)
    }

    pub async fn measure_throughput(
        &self,
        direction: Direction,
        multi_connection: bool,
    ) -> EngineResult<ThroughputMeasurement> {
        for (position, strategy) in throughput_plan(multi_connection).into_iter().enumerate() {
            match self.attempt(direction, strategy).await {
                Ok(mbps) => {
                    let tier = tier_at(position);
                    tracing::info!(
                        direction = direction.name(),
                        strategy = strategy.name(),
                        %tier,
                        mbps,
                        "throughput measured"
                    );
                    return Ok(ThroughputMeasurement { mbps, tier });
                }
                Err(e) => tracing::warn!(
                    direction = direction.name(),
                    strategy = strategy.name(),
                    error = %e,
                    "throughput strategy failed"
                ),
            }
        }

        if !self.cfg.allow_simulated {
            return Err(EngineError::MeasurementUnavailable {
                metric: direction.name(),
            });
        }
        let m = simulated::throughput(direction.simulated_range(&self.cfg));
        tracing::warn!(direction = direction.name(), mbps = m.mbps, "throughput simulated");
        Ok(m)
    }

    async fn attempt(
        &self,
        direction: Direction,
        strategy: ThroughputStrategy,
    ) -> EngineResult<f64> {
        let (client, cfg) = (&self.client, &self.cfg);
        match (direction, strategy) {
            (Direction::Download, ThroughputStrategy::SingleConnection) => {
                download::single_connection(client, cfg).await
            }
            (Direction::Download, ThroughputStrategy::MultiConnection) => {
                download::multi_connection(client, cfg).await
            }
            (Direction::Download, ThroughputStrategy::Alternatives) => {
                download::alternatives(client, cfg).await
            }
            (Direction::Upload, ThroughputStrategy::SingleConnection) => {
                upload::single_connection(client, cfg).await
            }
            (Direction::Upload, ThroughputStrategy::MultiConnection) => {
                upload::multi_connection(client, cfg).await
            }
            (Direction::Upload, ThroughputStrategy::Alternatives) => {
                upload::alternatives(client, cfg).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{closed_addr, local_config, unreachable_config, MockCdn};

    #[test]
    fn test_plans() {
        assert_eq!(
            throughput_plan(false),
            [ThroughputStrategy::SingleConnection, ThroughputStrategy::Alternatives]
        );
        assert_eq!(
            throughput_plan(true),
            [ThroughputStrategy::MultiConnection, ThroughputStrategy::Alternatives]
        );
        assert_eq!(LATENCY_PLAN[0], LatencyMethod::TcpConnect);
    }

    #[tokio::test]
    async fn test_all_primary_against_local_cdn() {
        let cdn = MockCdn::start().await;
        let engine = TestEngine::new(local_config(&cdn)).unwrap();

        for multi in [false, true] {
            let m = engine.run(multi).await.unwrap();
            assert_eq!(m.latency.tier, Tier::Primary);
            assert_eq!(m.download.tier, Tier::Primary);
            assert_eq!(m.upload.tier, Tier::Primary);
            assert!(m.download.mbps > 0.0 && m.upload.mbps > 0.0);
            assert!(!m.any_simulated());
        }
    }

    #[tokio::test]
    async fn test_secondary_tiers_when_primaries_fail() {
        let cdn = MockCdn::start().await;
        let dead = closed_addr().await;
        let cfg = RunConfig {
            tcp_probe_targets: vec![dead.to_string()],
            cdn_base_url: format!("http://{dead}"),
            ..local_config(&cdn)
        };
        let engine = TestEngine::new(cfg).unwrap();

        let m = engine.run(false).await.unwrap();
        assert_eq!(m.latency.tier, Tier::Fallback);
        assert_eq!(m.download.tier, Tier::Fallback);
        assert_eq!(m.upload.tier, Tier::Fallback);
    }

    #[tokio::test]
    async fn test_everything_down_is_simulated() {
        let engine = TestEngine::new(unreachable_config().await).unwrap();

        for multi in [false, true] {
            let m = engine.run(multi).await.unwrap();
            assert_eq!(m.latency.tier, Tier::Simulated);
            assert_eq!(m.download.tier, Tier::Simulated);
            assert_eq!(m.upload.tier, Tier::Simulated);
            assert!((15.0..25.0).contains(&m.latency.ping_ms));
            assert!((2.0..7.0).contains(&m.latency.jitter));
            assert!((80.0..120.0).contains(&m.download.mbps));
            assert!((5.0..20.0).contains(&m.upload.mbps));
        }
    }

    #[tokio::test]
    async fn test_without_simulation_run_fails() {
        let cfg = RunConfig {
            allow_simulated: false,
            ..unreachable_config().await
        };
        let engine = TestEngine::new(cfg).unwrap();
        let err = engine.run(false).await.unwrap_err();
        assert!(matches!(err, EngineError::MeasurementUnavailable { metric: "latency" }));
    }
}
