//! Local stand-ins for the remote endpoints, used by the engine tests.

use crate::model::{RunConfig, TestServer};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Deserialize)]
struct DownQuery {
    bytes: u64,
}

async fn down(Query(q): Query<DownQuery>) -> Vec<u8> {
    vec![0u8; q.bytes as usize]
}

async fn up(State(uploaded): State<Arc<AtomicU64>>, body: Bytes) -> &'static str {
    uploaded.fetch_add(body.len() as u64, Ordering::Relaxed);
    "ok"
}

/// Minimal speed-test CDN: `/__down?bytes=N`, `/__up` and an echo `/post`.
pub struct MockCdn {
    pub addr: SocketAddr,
    uploaded: Arc<AtomicU64>,
}

impl MockCdn {
    pub async fn start() -> Self {
        let uploaded = Arc::new(AtomicU64::new(0));
        let app = Router::new()
            .route("/__down", get(down))
            .route("/__up", post(up))
            .route("/post", post(up))
            .layer(DefaultBodyLimit::disable())
            .with_state(uploaded.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, uploaded }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn down_url(&self, bytes: u64) -> String {
        self.url(&format!("/__down?bytes={bytes}"))
    }

    pub fn up_url(&self) -> String {
        self.url("/__up")
    }

    pub fn server(&self, name: &str) -> TestServer {
        TestServer {
            name: name.to_string(),
            base_url: self.base_url(),
            location: "loopback".to_string(),
        }
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }
}

/// An address on loopback that refuses connections.
pub async fn closed_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn dead_server(addr: SocketAddr) -> TestServer {
    TestServer {
        name: "dead".to_string(),
        base_url: format!("http://{addr}"),
        location: "nowhere".to_string(),
    }
}

/// Config whose every endpoint points at `cdn`, with small payloads and
/// short timeouts.
pub fn local_config(cdn: &MockCdn) -> RunConfig {
    RunConfig {
        tcp_probe_targets: vec![cdn.addr.to_string(), cdn.addr.to_string()],
        http_probe_urls: vec![cdn.base_url()],
        probe_timeout: Duration::from_secs(1),
        probe_interval: Duration::from_millis(1),
        cdn_base_url: cdn.base_url(),
        download_bytes: 400_000,
        upload_bytes: 200_000,
        download_timeout: Duration::from_secs(5),
        upload_timeout: Duration::from_secs(5),
        multi_download_bytes: 100_000,
        multi_upload_bytes: 50_000,
        worker_timeout: Duration::from_secs(5),
        servers: vec![cdn.server("a"), cdn.server("b")],
        download_fallback_urls: vec![cdn.down_url(20_000), cdn.down_url(30_000)],
        upload_fallback_urls: vec![cdn.url("/post")],
        fallback_upload_bytes: 10_000,
        fallback_timeout: Duration::from_secs(5),
        ..RunConfig::default()
    }
}

/// Config whose every endpoint refuses connections.
pub async fn unreachable_config() -> RunConfig {
    let dead = closed_addr().await;
    RunConfig {
        tcp_probe_targets: vec![dead.to_string()],
        http_probe_urls: vec![format!("http://{dead}")],
        probe_timeout: Duration::from_millis(500),
        probe_interval: Duration::from_millis(1),
        cdn_base_url: format!("http://{dead}"),
        download_timeout: Duration::from_secs(1),
        upload_timeout: Duration::from_secs(1),
        multi_upload_bytes: 1_000,
        upload_bytes: 1_000,
        worker_timeout: Duration::from_secs(1),
        servers: vec![dead_server(dead)],
        download_fallback_urls: vec![format!("http://{dead}/favicon.ico")],
        upload_fallback_urls: vec![format!("http://{dead}/post")],
        fallback_upload_bytes: 1_000,
        fallback_timeout: Duration::from_secs(1),
        ..RunConfig::default()
    }
}
