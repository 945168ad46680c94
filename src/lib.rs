//! Network speed measurement with tiered fallback.
//!
//! [`service::SpeedTestService`] runs latency, download and upload
//! measurements through [`engine::TestEngine`], which degrades from the
//! primary strategy to alternative endpoints and finally to simulated values,
//! so every run yields all four metrics. Results are kept in a
//! [`storage::ResultStore`].

pub mod engine;
pub mod error;
pub mod model;
pub mod service;
pub mod stats;
pub mod storage;
