//! File input and output: time-series loading, telemetry export.

pub mod export;
pub mod loader;
