use crate::model::LatencySummary;
use std::time::Duration;

/// Megabits per second for `bytes` moved in `elapsed`.
///
/// Elapsed time is floored at 1ns so an instantaneous transfer yields a
/// large finite rate instead of infinity.
pub fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(1e-9);
    (bytes as f64) * 8.0 / 1_000_000.0 / secs
}

pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Sample variance, `Σ(x - mean)² / (n - 1)`; 0 for fewer than two samples.
pub fn sample_variance(samples: &[f64]) -> f64 {
    let Some(m) = mean(samples) else { return 0.0 };
    if samples.len() < 2 {
        return 0.0;
    }
    let ss: f64 = samples.iter().map(|x| (x - m) * (x - m)).sum();
    ss / (samples.len() - 1) as f64
}

/// Element at sorted index `n / 2`, i.e. the upper-middle for even counts.
pub fn upper_median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(sorted[sorted.len() / 2])
}

pub fn latency_summary_from_samples(samples_ms: &[f64]) -> Option<LatencySummary> {
    Some(LatencySummary {
        samples: samples_ms.len(),
        mean_ms: mean(samples_ms)?,
        jitter: sample_variance(samples_ms),
    })
}
