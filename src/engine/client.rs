use crate::engine::network_bind;
use crate::error::{EngineError, EngineResult};
use crate::model::RunConfig;
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use rand::RngCore;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::net::lookup_host;

/// Shared HTTP client plus the socket options every probe uses.
#[derive(Clone)]
pub struct ProbeClient {
    pub http: reqwest::Client,
    bind_ip: Option<IpAddr>,
}

impl ProbeClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let bind_ip = network_bind::resolve_bind_ip(cfg.source_ip.as_deref())?;

        let mut builder = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(15));
        if let Some(ip) = bind_ip {
            tracing::debug!(%ip, "binding HTTP connections to source IP");
            builder = builder.local_address(ip);
        }

        let http = builder.build().context("failed to build http client")?;
        Ok(Self { http, bind_ip })
    }

    /// Time a TCP handshake to `target` (`host:port`), in milliseconds.
    ///
    /// Name resolution happens before the clock starts; the connection is
    /// dropped as soon as it is established.
    pub async fn tcp_rtt_ms(&self, target: &str, timeout: Duration) -> EngineResult<f64> {
        let addr = tokio::time::timeout(timeout, lookup_host(target))
            .await??
            .next()
            .ok_or_else(|| EngineError::Transport(format!("no address for {target}")))?;

        let start = Instant::now();
        let stream =
            tokio::time::timeout(timeout, network_bind::connect_from(addr, self.bind_ip)).await??;
        let elapsed = start.elapsed();
        drop(stream);

        Ok(elapsed.as_secs_f64() * 1000.0)
    }

    /// Time a HEAD request to `url`, in milliseconds. Any HTTP status counts.
    pub async fn head_rtt_ms(&self, url: &str, timeout: Duration) -> EngineResult<f64> {
        let start = Instant::now();
        let resp = self.http.head(url).timeout(timeout).send().await?;
        let elapsed = start.elapsed();
        drop(resp);
        Ok(elapsed.as_secs_f64() * 1000.0)
    }

    /// GET `url` and stream the body, adding every chunk to `received`.
    ///
    /// On error `received` keeps whatever arrived before the failure.
    pub async fn download_into(
        &self,
        url: &str,
        timeout: Duration,
        received: &mut u64,
    ) -> EngineResult<()> {
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            *received += chunk?.len() as u64;
        }
        Ok(())
    }

    /// POST `payload` to `url` and wait for the response headers.
    ///
    /// With `drain` the response body is read and discarded as well.
    pub async fn upload(
        &self,
        url: &str,
        payload: Bytes,
        timeout: Duration,
        drain: bool,
    ) -> EngineResult<()> {
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .timeout(timeout)
            .body(payload)
            .send()
            .await?
            .error_for_status()?;

        if drain {
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                chunk?;
            }
        }
        Ok(())
    }
}

fn payload_len(size: u64) -> EngineResult<usize> {
    usize::try_from(size).map_err(|_| {
        EngineError::Transport(format!("payload of {size} bytes exceeds address space"))
    })
}

/// `size` bytes of random data.
pub fn random_payload(size: u64) -> EngineResult<Bytes> {
    let mut buf = vec![0u8; payload_len(size)?];
    rand::thread_rng().fill_bytes(&mut buf);
    Ok(Bytes::from(buf))
}
