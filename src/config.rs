//! TOML-based plaza configuration and preset definitions.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::SOCKET_COUNT;
use crate::sim::reward::RewardWeights;

/// Top-level configuration parsed from TOML.
///
/// All fields have defaults matching the Iquitos deployment. Load from
/// TOML with [`PlazaConfig::from_toml_file`] or use
/// [`PlazaConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlazaConfig {
    /// Battery storage parameters and operating windows.
    #[serde(default)]
    pub bess: BessConfig,
    /// Grid emission factors and tariff schedule.
    #[serde(default)]
    pub grid: GridConfig,
    /// Reward weighting and normalization.
    #[serde(default)]
    pub reward: RewardConfig,
    /// Environment surface parameters.
    #[serde(default)]
    pub env: EnvConfig,
    /// Charger plaza topology and vehicle fleet.
    #[serde(default)]
    pub chargers: ChargerConfig,
    /// Input file locations and unit checks.
    #[serde(default)]
    pub data: DataConfig,
}

/// Battery storage parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BessConfig {
    /// Total energy capacity (kWh).
    pub capacity_kwh: f64,
    /// Maximum charge/discharge power (kW).
    pub power_kw: f64,
    /// Minimum state of charge (% of capacity).
    pub soc_min_pct: f64,
    /// Maximum state of charge (% of capacity).
    pub soc_max_pct: f64,
    /// State of charge at episode reset (% of capacity).
    pub soc_initial_pct: f64,
    /// Round-trip efficiency; split as sqrt per direction.
    pub eff_roundtrip: f64,
    /// Charging window start hour (inclusive).
    pub charge_window_start: u32,
    /// Charging window end hour (exclusive).
    pub charge_window_end: u32,
    /// Discharging window start hour (inclusive).
    pub discharge_window_start: u32,
    /// Discharging window end hour (exclusive).
    pub discharge_window_end: u32,
    /// Allow topping up the battery from the grid after the cascade.
    pub grid_charging: bool,
    /// Mall demand above which peak shaving may discharge (kW).
    pub peak_shave_threshold_kw: f64,
}

impl Default for BessConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: 2000.0,
            power_kw: 400.0,
            soc_min_pct: 20.0,
            soc_max_pct: 100.0,
            soc_initial_pct: 80.0,
            eff_roundtrip: 0.95,
            charge_window_start: 6,
            charge_window_end: 15,
            discharge_window_start: 15,
            discharge_window_end: 22,
            grid_charging: false,
            peak_shave_threshold_kw: 2000.0,
        }
    }
}

/// Grid emission factors and tariff schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    /// Grid carbon intensity (kg CO₂/kWh) when no hourly series is given.
    pub co2_factor: f64,
    /// Tailpipe emissions displaced per EV kWh charged (kg CO₂/kWh).
    pub ev_displacement_factor: f64,
    /// Whether exported PV counts toward indirect CO₂ avoidance.
    pub credit_export: bool,
    /// OSINERGMIN tariff periods and prices.
    pub tariff: TariffConfig,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            co2_factor: 0.4521,
            ev_displacement_factor: 2.146,
            credit_export: false,
            tariff: TariffConfig::default(),
        }
    }
}

/// Time-of-day tariff: peak (HP) window and prices in soles/kWh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TariffConfig {
    /// Peak-period price (soles/kWh).
    pub hp_soles: f64,
    /// Off-peak price (soles/kWh).
    pub hfp_soles: f64,
    /// Peak window start hour (inclusive).
    pub hp_start: u32,
    /// Peak window end hour (exclusive).
    pub hp_end: u32,
}

impl Default for TariffConfig {
    fn default() -> Self {
        Self {
            hp_soles: 0.45,
            hfp_soles: 0.28,
            hp_start: 18,
            hp_end: 23,
        }
    }
}

/// Reward weighting and normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RewardConfig {
    /// Per-objective weights; must sum to 1.0.
    pub weights: RewardWeights,
    /// Per-step CO₂ normalization baseline (kg); 0 derives it from a
    /// battery-locked reference year.
    pub co2_baseline_kg: f64,
    /// Per-step cost normalization baseline (soles); 0 derives it.
    pub cost_baseline_soles: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            weights: RewardWeights::default(),
            co2_baseline_kg: 0.0,
            cost_baseline_soles: 0.0,
        }
    }
}

/// Environment surface parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvConfig {
    /// Grid-import level treated as full stress in the reward (kW).
    pub peak_limit_kw: f64,
    /// Hours of solar/mall look-ahead in the observation (0 disables).
    pub lookahead_hours: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            peak_limit_kw: 2500.0,
            lookahead_hours: 24,
        }
    }
}

/// Charger plaza topology and vehicle fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChargerConfig {
    /// Total socket count; fixed by the observation/action layout.
    pub sockets: usize,
    /// Rated power per socket (kW).
    pub socket_rated_kw: f64,
    /// Sockets 0..moto_sockets serve motos, the rest mototaxis.
    pub moto_sockets: usize,
    /// Moto battery pack size (kWh), full-charge threshold.
    pub moto_battery_kwh: f64,
    /// Mototaxi battery pack size (kWh).
    pub mototaxi_battery_kwh: f64,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            sockets: SOCKET_COUNT,
            socket_rated_kw: 7.4,
            moto_sockets: 30,
            moto_battery_kwh: 2.0,
            mototaxi_battery_kwh: 4.0,
        }
    }
}

/// Input file locations and unit checks.
///
/// Each series has a primary path and an optional fallback tried when
/// the primary is absent. Empty strings mean "not configured"; the
/// loader then fails rather than inventing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    pub solar_path: String,
    pub solar_fallback: String,
    pub mall_path: String,
    pub mall_fallback: String,
    pub chargers_path: String,
    pub chargers_fallback: String,
    /// Optional hourly carbon-intensity series; empty uses `grid.co2_factor`.
    pub co2_path: String,
    /// Column max above this level logs a unit-suspicion warning (kW).
    pub unit_ceiling_kw: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            solar_path: "data/solar_hourly.csv".into(),
            solar_fallback: String::new(),
            mall_path: "data/mall_hourly.csv".into(),
            mall_fallback: String::new(),
            chargers_path: "data/chargers_hourly.csv".into(),
            chargers_fallback: String::new(),
            co2_path: String::new(),
            unit_ceiling_kw: 5000.0,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Error)]
#[error("config error: {field} — {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"bess.capacity_kwh"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl PlazaConfig {
    /// Returns the baseline Iquitos configuration.
    pub fn baseline() -> Self {
        Self {
            bess: BessConfig::default(),
            grid: GridConfig::default(),
            reward: RewardConfig::default(),
            env: EnvConfig::default(),
            chargers: ChargerConfig::default(),
            data: DataConfig::default(),
        }
    }

    /// Returns the grid-charging preset: baseline plus grid top-up of the
    /// battery inside the charge window.
    pub fn grid_charging() -> Self {
        Self {
            bess: BessConfig {
                grid_charging: true,
                ..BessConfig::default()
            },
            ..Self::baseline()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "grid-charging"];

    /// Loads a configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "grid-charging" => Ok(Self::grid_charging()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let b = &self.bess;
        if b.capacity_kwh <= 0.0 {
            errors.push(ConfigError::new("bess.capacity_kwh", "must be > 0"));
        }
        if b.power_kw <= 0.0 {
            errors.push(ConfigError::new("bess.power_kw", "must be > 0"));
        }
        if !(0.0..100.0).contains(&b.soc_min_pct) {
            errors.push(ConfigError::new("bess.soc_min_pct", "must be in [0, 100)"));
        }
        if b.soc_max_pct <= b.soc_min_pct || b.soc_max_pct > 100.0 {
            errors.push(ConfigError::new(
                "bess.soc_max_pct",
                "must be in (soc_min_pct, 100]",
            ));
        }
        if b.soc_initial_pct < b.soc_min_pct || b.soc_initial_pct > b.soc_max_pct {
            errors.push(ConfigError::new(
                "bess.soc_initial_pct",
                "must lie within [soc_min_pct, soc_max_pct]",
            ));
        }
        if b.eff_roundtrip <= 0.0 || b.eff_roundtrip > 1.0 {
            errors.push(ConfigError::new("bess.eff_roundtrip", "must be in (0, 1]"));
        }
        for (field, start, end) in [
            (
                "bess.charge_window",
                b.charge_window_start,
                b.charge_window_end,
            ),
            (
                "bess.discharge_window",
                b.discharge_window_start,
                b.discharge_window_end,
            ),
        ] {
            if start > 23 || end > 24 {
                errors.push(ConfigError::new(field, "hours must be within 0..24"));
            }
            if start == end {
                errors.push(ConfigError::new(field, "window must not be empty"));
            }
        }
        if b.peak_shave_threshold_kw < 0.0 {
            errors.push(ConfigError::new(
                "bess.peak_shave_threshold_kw",
                "must be >= 0",
            ));
        }

        let g = &self.grid;
        if g.co2_factor < 0.0 {
            errors.push(ConfigError::new("grid.co2_factor", "must be >= 0"));
        }
        if g.ev_displacement_factor < 0.0 {
            errors.push(ConfigError::new(
                "grid.ev_displacement_factor",
                "must be >= 0",
            ));
        }
        let t = &g.tariff;
        if t.hp_soles < 0.0 || t.hfp_soles < 0.0 {
            errors.push(ConfigError::new("grid.tariff", "prices must be >= 0"));
        }
        if t.hp_start >= t.hp_end || t.hp_end > 24 {
            errors.push(ConfigError::new(
                "grid.tariff.hp_start",
                "peak window must be non-empty and within 0..24",
            ));
        }

        let w = &self.reward.weights;
        if let Err(msg) = w.check() {
            errors.push(ConfigError::new("reward.weights", msg));
        }
        if self.reward.co2_baseline_kg < 0.0 || self.reward.cost_baseline_soles < 0.0 {
            errors.push(ConfigError::new("reward", "baselines must be >= 0"));
        }

        let e = &self.env;
        if e.peak_limit_kw <= 0.0 {
            errors.push(ConfigError::new("env.peak_limit_kw", "must be > 0"));
        }
        // 124 fixed dims + 2 per look-ahead hour must fit in the 394-dim vector.
        if e.lookahead_hours > 135 {
            errors.push(ConfigError::new(
                "env.lookahead_hours",
                "must be <= 135 to fit the observation vector",
            ));
        }

        let c = &self.chargers;
        if c.sockets == 128 {
            errors.push(ConfigError::new(
                "chargers.sockets",
                "128-socket datasets belong to the legacy plaza topology; \
                 this simulator is fixed at 38 sockets",
            ));
        } else if c.sockets != SOCKET_COUNT {
            errors.push(ConfigError::new(
                "chargers.sockets",
                format!("must be {SOCKET_COUNT}"),
            ));
        }
        if c.moto_sockets > c.sockets {
            errors.push(ConfigError::new(
                "chargers.moto_sockets",
                "must be <= chargers.sockets",
            ));
        }
        if c.socket_rated_kw <= 0.0 {
            errors.push(ConfigError::new("chargers.socket_rated_kw", "must be > 0"));
        }
        if c.moto_battery_kwh <= 0.0 || c.mototaxi_battery_kwh <= 0.0 {
            errors.push(ConfigError::new(
                "chargers.moto_battery_kwh",
                "battery sizes must be > 0",
            ));
        }

        if self.data.unit_ceiling_kw <= 0.0 {
            errors.push(ConfigError::new("data.unit_ceiling_kw", "must be > 0"));
        }

        errors
    }
}
