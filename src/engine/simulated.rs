//! Placeholder values used when every real strategy for a metric failed.

use crate::model::{LatencyMeasurement, SimRange, SimulatedRanges, ThroughputMeasurement, Tier};
use rand::Rng;

fn draw(range: SimRange) -> f64 {
    if range.low < range.high {
        rand::thread_rng().gen_range(range.low..range.high)
    } else {
        range.low
    }
}

pub fn latency(ranges: &SimulatedRanges) -> LatencyMeasurement {
    LatencyMeasurement {
        ping_ms: draw(ranges.ping_ms),
        jitter: draw(ranges.jitter),
        tier: Tier::Simulated,
    }
}

pub fn throughput(range: SimRange) -> ThroughputMeasurement {
    ThroughputMeasurement {
        mbps: draw(range),
        tier: Tier::Simulated,
    }
}
