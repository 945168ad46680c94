use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;

/// User ID recorded for runs without an authenticated caller.
pub const ANONYMOUS_USER: &str = "anonymous";

/// A remote endpoint used to fan out multi-connection transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestServer {
    pub name: String,
    pub base_url: String,
    pub location: String,
}

impl TestServer {
    fn new(name: &str, base_url: &str, location: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            location: location.to_string(),
        }
    }

    pub fn down_url(&self, bytes: u64) -> String {
        format!("{}/__down?bytes={bytes}", self.base_url.trim_end_matches('/'))
    }

    pub fn up_url(&self) -> String {
        format!("{}/__up", self.base_url.trim_end_matches('/'))
    }
}

/// Half-open `[low, high)` range a simulated value is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimRange {
    pub low: f64,
    pub high: f64,
}

impl SimRange {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedRanges {
    pub ping_ms: SimRange,
    pub jitter: SimRange,
    pub download_mbps: SimRange,
    pub upload_mbps: SimRange,
}

impl Default for SimulatedRanges {
    fn default() -> Self {
        Self {
            ping_ms: SimRange::new(15.0, 25.0),
            jitter: SimRange::new(2.0, 7.0),
            download_mbps: SimRange::new(80.0, 120.0),
            upload_mbps: SimRange::new(5.0, 20.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub user_agent: String,
    /// Local address every probe binds to, if set.
    pub source_ip: Option<String>,

    // Latency
    pub tcp_probe_targets: Vec<String>,
    pub http_probe_urls: Vec<String>,
    pub probe_attempts: usize,
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,
    pub min_latency_samples: usize,

    // Throughput
    pub cdn_base_url: String,
    pub download_bytes: u64,
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,
    pub upload_bytes: u64,
    #[serde(with = "humantime_serde")]
    pub upload_timeout: Duration,
    pub workers: usize,
    pub multi_download_bytes: u64,
    pub multi_upload_bytes: u64,
    #[serde(with = "humantime_serde")]
    pub worker_timeout: Duration,
    pub servers: Vec<TestServer>,
    pub download_fallback_urls: Vec<String>,
    pub upload_fallback_urls: Vec<String>,
    pub fallback_upload_bytes: u64,
    #[serde(with = "humantime_serde")]
    pub fallback_timeout: Duration,
    /// Multiplier applied to the median of small-transfer rates.
    pub fallback_correction: f64,

    /// Substitute simulated values when every real strategy fails; when
    /// off, the run fails with `MeasurementUnavailable` instead.
    pub allow_simulated: bool,
    pub simulated: SimulatedRanges,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("speedtest-backend/{}", env!("CARGO_PKG_VERSION")),
            source_ip: None,
            tcp_probe_targets: vec![
                "8.8.8.8:80".into(),
                "1.1.1.1:80".into(),
                "208.67.222.222:80".into(),
            ],
            http_probe_urls: vec!["https://8.8.8.8".into(), "https://1.1.1.1".into()],
            probe_attempts: 5,
            probe_timeout: Duration::from_secs(2),
            probe_interval: Duration::from_millis(100),
            min_latency_samples: 3,
            cdn_base_url: "https://speed.cloudflare.com".into(),
            download_bytes: 25_000_000,
            download_timeout: Duration::from_secs(30),
            upload_bytes: 5_000_000,
            upload_timeout: Duration::from_secs(30),
            workers: 4,
            multi_download_bytes: 10_000_000,
            multi_upload_bytes: 2_000_000,
            worker_timeout: Duration::from_secs(20),
            servers: vec![
                TestServer::new("Cloudflare", "https://speed.cloudflare.com", "Global CDN"),
                TestServer::new("Turksat", "http://speedtest.turksat.com.tr", "Ankara, Turkey"),
                TestServer::new(
                    "Turk Telekom",
                    "http://speedtest.turktelekom.com.tr",
                    "Istanbul, Turkey",
                ),
                TestServer::new("Google", "https://www.google.com", "Global CDN"),
                TestServer::new("Microsoft", "https://www.microsoft.com", "Global CDN"),
            ],
            download_fallback_urls: vec![
                "https://www.google.com/images/branding/googlelogo/1x/googlelogo_color_272x92dp.png"
                    .into(),
                "https://www.microsoft.com/favicon.ico".into(),
                "https://speed.cloudflare.com/__down?bytes=1000000".into(),
            ],
            upload_fallback_urls: vec![
                "https://httpbin.org/post".into(),
                "https://postman-echo.com/post".into(),
            ],
            fallback_upload_bytes: 1_000_000,
            fallback_timeout: Duration::from_secs(15),
            fallback_correction: 1.5,
            allow_simulated: true,
            simulated: SimulatedRanges::default(),
        }
    }
}

impl RunConfig {
    pub fn down_url(&self) -> String {
        format!(
            "{}/__down?bytes={}",
            self.cdn_base_url.trim_end_matches('/'),
            self.download_bytes
        )
    }

    pub fn up_url(&self) -> String {
        format!("{}/__up", self.cdn_base_url.trim_end_matches('/'))
    }

    /// Server assigned to worker `index` (round-robin).
    pub fn server_for(&self, index: usize) -> Option<&TestServer> {
        if self.servers.is_empty() {
            None
        } else {
            self.servers.get(index % self.servers.len())
        }
    }
}

/// Which rung of the fallback ladder produced a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Primary,
    Fallback,
    Simulated,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Primary => write!(f, "primary"),
            Tier::Fallback => write!(f, "fallback"),
            Tier::Simulated => write!(f, "simulated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean_ms: f64,
    /// Sample variance of the RTTs (ms²), reported as jitter.
    pub jitter: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyMeasurement {
    pub ping_ms: f64,
    pub jitter: f64,
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThroughputMeasurement {
    pub mbps: f64,
    pub tier: Tier,
}

/// Everything one engine run produced, before it is tied to a user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurements {
    pub latency: LatencyMeasurement,
    pub download: ThroughputMeasurement,
    pub upload: ThroughputMeasurement,
}

impl Measurements {
    pub fn any_simulated(&self) -> bool {
        [self.latency.tier, self.download.tier, self.upload.tier].contains(&Tier::Simulated)
    }
}

/// The persisted outcome of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestResult {
    pub id: String,
    pub user_id: String,
    pub download_speed: f64,
    pub upload_speed: f64,
    pub ping: f64,
    pub jitter: f64,
    pub isp: String,
    pub ip_address: String,
    pub country: String,
    pub region: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Caller-supplied network context; only `ip`, `isp`, `country` and
/// `region` are read, missing keys become empty strings.
pub type NetworkMetadata = HashMap<String, String>;

pub(crate) fn metadata_field(meta: &NetworkMetadata, key: &str) -> String {
    meta.get(key).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_urls() {
        let server = TestServer::new("Local", "http://127.0.0.1:8080/", "here");
        assert_eq!(server.down_url(10), "http://127.0.0.1:8080/__down?bytes=10");
        assert_eq!(server.up_url(), "http://127.0.0.1:8080/__up");
    }

    #[test]
    fn test_round_robin_wraps() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.server_for(0).unwrap().name, "Cloudflare");
        assert_eq!(cfg.server_for(5).unwrap().name, "Cloudflare");
        assert_eq!(cfg.server_for(3).unwrap().name, "Google");

        let empty = RunConfig {
            servers: vec![],
            ..RunConfig::default()
        };
        assert!(empty.server_for(0).is_none());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: RunConfig =
            serde_json::from_str(r#"{"workers": 8, "probe_timeout": "500ms"}"#).unwrap();
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.probe_timeout, Duration::from_millis(500));
        assert_eq!(cfg.download_bytes, 25_000_000);
        assert_eq!(cfg.tcp_probe_targets.len(), 3);
    }

    #[test]
    fn test_metadata_missing_keys_are_empty() {
        let mut meta = NetworkMetadata::new();
        meta.insert("ip".into(), "203.0.113.7".into());
        assert_eq!(metadata_field(&meta, "ip"), "203.0.113.7");
        assert_eq!(metadata_field(&meta, "isp"), "");
    }

    #[test]
    fn test_result_json_shape() {
        let result = SpeedTestResult {
            id: "1".into(),
            user_id: ANONYMOUS_USER.into(),
            download_speed: 100.0,
            upload_speed: 10.0,
            ping: 12.0,
            jitter: 2.5,
            isp: String::new(),
            ip_address: String::new(),
            country: String::new(),
            region: String::new(),
            created_at: time::macros::datetime!(2025-01-02 03:04:05 UTC),
        };
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["created_at"], "2025-01-02T03:04:05Z");
        assert_eq!(v["download_speed"], 100.0);
        let back: SpeedTestResult = serde_json::from_value(v).unwrap();
        assert_eq!(back, result);
    }
}
