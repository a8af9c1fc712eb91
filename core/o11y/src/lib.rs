//! Observability helpers for the gateway crates: prometheus metric
//! registration and logging bootstrap for tests.

pub mod metrics;
pub mod testonly;
