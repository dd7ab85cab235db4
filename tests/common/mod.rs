//! Shared test fixtures for integration tests.

use plaza_sim::config::PlazaConfig;
use plaza_sim::data::TimeSeriesBundle;
use plaza_sim::env::PlazaEnv;

/// Default synthetic-year seed used across the integration suites.
pub const SEED: u64 = 42;

/// Baseline configuration.
pub fn default_config() -> PlazaConfig {
    PlazaConfig::baseline()
}

/// Deterministic synthetic input year.
pub fn synthetic_bundle() -> TimeSeriesBundle {
    TimeSeriesBundle::synthetic(SEED)
}

/// Environment over the default synthetic year and baseline config.
pub fn default_env() -> PlazaEnv {
    PlazaEnv::new(synthetic_bundle(), &default_config())
        .expect("baseline env over synthetic data must build")
}

/// Environment with a custom configuration over the default synthetic year.
pub fn env_with_config(cfg: &PlazaConfig) -> PlazaEnv {
    PlazaEnv::new(synthetic_bundle(), cfg).expect("env over synthetic data must build")
}
