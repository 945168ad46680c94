use crate::engine::TestEngine;
use crate::model::{metadata_field, NetworkMetadata, RunConfig, SpeedTestResult, ANONYMOUS_USER};
use crate::storage::ResultStore;
use anyhow::{bail, Context, Result};
use rand::Rng;
use time::OffsetDateTime;

/// Runs measurements on behalf of users and keeps their results.
pub struct SpeedTestService<S> {
    engine: TestEngine,
    store: S,
}

impl<S: ResultStore> SpeedTestService<S> {
    pub fn new(cfg: RunConfig, store: S) -> Result<Self> {
        let engine = TestEngine::new(cfg).context("build test engine")?;
        Ok(Self { engine, store })
    }

    pub fn config(&self) -> &RunConfig {
        self.engine.config()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Measure latency, download and upload, then persist the result.
    ///
    /// An empty `user_id` is recorded as [`ANONYMOUS_USER`]. Only a storage
    /// failure (or a config with simulation disabled) makes this fail.
    pub async fn run_speed_test(
        &self,
        user_id: &str,
        meta: &NetworkMetadata,
        multi_connection: bool,
    ) -> Result<SpeedTestResult> {
        let user_id = if user_id.is_empty() {
            ANONYMOUS_USER
        } else {
            user_id
        };

        let m = self
            .engine
            .run(multi_connection)
            .await
            .context("measurement run")?;

        let result = SpeedTestResult {
            id: new_result_id(),
            user_id: user_id.to_string(),
            download_speed: m.download.mbps,
            upload_speed: m.upload.mbps,
            ping: m.latency.ping_ms,
            jitter: m.latency.jitter,
            isp: metadata_field(meta, "isp"),
            ip_address: metadata_field(meta, "ip"),
            country: metadata_field(meta, "country"),
            region: metadata_field(meta, "region"),
            created_at: OffsetDateTime::now_utc(),
        };

        self.store.save_result(&result).context("save result")?;
        tracing::info!(
            id = %result.id,
            user_id,
            download_mbps = result.download_speed,
            upload_mbps = result.upload_speed,
            ping_ms = result.ping,
            jitter = result.jitter,
            simulated = m.any_simulated(),
            "speed test saved"
        );
        Ok(result)
    }

    /// A user's results, newest first.
    pub fn user_history(&self, user_id: &str) -> Result<Vec<SpeedTestResult>> {
        let mut results = self.store.results_by_user(user_id)?;
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    pub fn result(&self, id: &str) -> Result<SpeedTestResult> {
        self.store.result_by_id(id)
    }

    /// Delete `result_id` if it belongs to `user_id`.
    pub fn delete_result(&self, result_id: &str, user_id: &str) -> Result<()> {
        let existing = self.store.result_by_id(result_id)?;
        if existing.user_id != user_id {
            bail!("result {result_id} is not owned by {user_id}");
        }
        self.store.delete_result(result_id)?;
        tracing::info!(id = result_id, user_id, "result deleted");
        Ok(())
    }
}

/// Nanosecond timestamp plus a random suffix, both hex.
fn new_result_id() -> String {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    let suffix: u32 = rand::thread_rng().gen();
    format!("{nanos:x}-{suffix:08x}")
}
