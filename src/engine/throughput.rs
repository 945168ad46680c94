use crate::error::{EngineError, EngineResult};
use crate::stats::{mbps, upper_median};
use futures::future::join_all;
use std::future::Future;
use std::time::{Duration, Instant};

/// What one multi-connection worker hands back to the join point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerReport {
    pub index: usize,
    /// Bytes moved before the worker finished or failed.
    pub bytes: u64,
    pub error: Option<String>,
}

impl WorkerReport {
    pub fn failed(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            bytes: 0,
            error: Some(error.into()),
        }
    }
}

/// Spawn `workers` tasks built by `job`, wait for every one of them, and
/// return their reports with the time from first dispatch to last
/// completion.
pub async fn fan_out<F, Fut>(workers: usize, job: F) -> (Vec<WorkerReport>, Duration)
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = WorkerReport> + Send + 'static,
{
    let start = Instant::now();
    let handles: Vec<_> = (0..workers).map(|i| tokio::spawn(job(i))).collect();

    let reports = join_all(handles)
        .await
        .into_iter()
        .enumerate()
        .map(|(i, joined)| {
            joined.unwrap_or_else(|e| WorkerReport::failed(i, format!("worker task failed: {e}")))
        })
        .collect();

    (reports, start.elapsed())
}

/// Aggregate rate over every worker's bytes, partial ones included.
///
/// Fails only when no worker finished cleanly.
pub fn aggregate_workers(reports: &[WorkerReport], elapsed: Duration) -> EngineResult<f64> {
    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    if failed == reports.len() {
        return Err(EngineError::AllConnectionsFailed {
            attempted: reports.len(),
        });
    }
    let total: u64 = reports.iter().map(|r| r.bytes).sum();
    Ok(mbps(total, elapsed))
}

pub(crate) fn log_reports(direction: &'static str, reports: &[WorkerReport]) {
    for r in reports {
        match &r.error {
            None => {
                tracing::debug!(direction, worker = r.index, bytes = r.bytes, "worker finished")
            }
            Some(e) => tracing::debug!(
                direction,
                worker = r.index,
                bytes = r.bytes,
                error = %e,
                "worker failed"
            ),
        }
    }
}

/// Median of the per-source rates, scaled by `correction` to offset the
/// setup overhead that dominates small transfers.
pub fn corrected_median(rates: &[f64], correction: f64, attempted: usize) -> EngineResult<f64> {
    upper_median(rates)
        .map(|m| m * correction)
        .ok_or(EngineError::AllAlternativesFailed { attempted })
}
