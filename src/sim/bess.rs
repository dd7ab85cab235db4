//! Battery energy storage state machine.
//!
//! SOC is the only mutable quantity and lives with the caller; every
//! operation here is a pure function of `(params, soc, hour)`. Charge
//! and discharge windows act as hard masks on the feasibility queries,
//! so the dispatch engine never needs to consult the clock itself.

use crate::config::BessConfig;
use crate::error::BessOverflowError;

/// Tolerance on SOC bound checks after a transition (kWh).
const SOC_EPS: f64 = 1e-9;

/// Half-open hour-of-day window `[start, end)`; wraps past midnight
/// when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Whether `hour` (0–23) lies inside the window.
    pub fn contains(&self, hour: u32) -> bool {
        if self.start < self.end {
            (self.start..self.end).contains(&hour)
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Immutable battery parameters derived from configuration.
///
/// The round-trip efficiency is split as the square root per direction,
/// so a full cycle loses exactly `1 - eff_roundtrip`.
#[derive(Debug, Clone, PartialEq)]
pub struct BessParams {
    pub capacity_kwh: f64,
    pub power_kw: f64,
    pub soc_min_kwh: f64,
    pub soc_max_kwh: f64,
    pub soc_initial_kwh: f64,
    pub eff_charge: f64,
    pub eff_discharge: f64,
    pub charge_window: HourWindow,
    pub discharge_window: HourWindow,
}

impl BessParams {
    /// Derives the parameter block from a validated configuration.
    pub fn from_config(cfg: &BessConfig) -> Self {
        let eff = cfg.eff_roundtrip.sqrt();
        Self {
            capacity_kwh: cfg.capacity_kwh,
            power_kw: cfg.power_kw,
            soc_min_kwh: cfg.capacity_kwh * cfg.soc_min_pct / 100.0,
            soc_max_kwh: cfg.capacity_kwh * cfg.soc_max_pct / 100.0,
            soc_initial_kwh: cfg.capacity_kwh * cfg.soc_initial_pct / 100.0,
            eff_charge: eff,
            eff_discharge: eff,
            charge_window: HourWindow::new(cfg.charge_window_start, cfg.charge_window_end),
            discharge_window: HourWindow::new(
                cfg.discharge_window_start,
                cfg.discharge_window_end,
            ),
        }
    }

    /// SOC expressed as a percentage of capacity.
    pub fn soc_pct(&self, soc_kwh: f64) -> f64 {
        100.0 * soc_kwh / self.capacity_kwh
    }

    /// Source-side energy the battery can absorb this hour (kWh).
    ///
    /// Zero outside the charge window. Otherwise limited by the power
    /// rating over one hour and by the SOC headroom divided by the
    /// charge efficiency (stored energy is `kwh_in × eff_charge`).
    pub fn max_charge_in_kwh(&self, soc_kwh: f64, hour: u32) -> f64 {
        if !self.charge_window.contains(hour) {
            return 0.0;
        }
        let headroom = ((self.soc_max_kwh - soc_kwh) / self.eff_charge).max(0.0);
        self.power_kw.min(headroom)
    }

    /// Load-side energy the battery can deliver this hour (kWh).
    ///
    /// Zero outside the discharge window. Otherwise limited by the power
    /// rating and by the energy above `soc_min` times the discharge
    /// efficiency.
    pub fn max_discharge_out_kwh(&self, soc_kwh: f64, hour: u32) -> f64 {
        if !self.discharge_window.contains(hour) {
            return 0.0;
        }
        let available = ((soc_kwh - self.soc_min_kwh) * self.eff_discharge).max(0.0);
        self.power_kw.min(available)
    }

    /// Applies a charge of `kwh_in` source-side kWh and returns the new SOC.
    ///
    /// # Errors
    ///
    /// Returns [`BessOverflowError`] if the transition would exceed the
    /// SOC ceiling; the caller must have consulted
    /// [`Self::max_charge_in_kwh`], so this indicates a dispatch bug.
    pub fn apply_charge(&self, soc_kwh: f64, kwh_in: f64) -> Result<f64, BessOverflowError> {
        let next = soc_kwh + kwh_in * self.eff_charge;
        if kwh_in < 0.0 || next > self.soc_max_kwh + SOC_EPS {
            return Err(BessOverflowError {
                direction: "charge",
                requested_kwh: kwh_in,
                soc_kwh,
                limit_kwh: ((self.soc_max_kwh - soc_kwh) / self.eff_charge).max(0.0),
            });
        }
        Ok(next.min(self.soc_max_kwh))
    }

    /// Applies a discharge of `kwh_out` load-side kWh and returns the new SOC.
    ///
    /// # Errors
    ///
    /// Returns [`BessOverflowError`] if the transition would cross the
    /// SOC floor.
    pub fn apply_discharge(&self, soc_kwh: f64, kwh_out: f64) -> Result<f64, BessOverflowError> {
        let next = soc_kwh - kwh_out / self.eff_discharge;
        if kwh_out < 0.0 || next < self.soc_min_kwh - SOC_EPS {
            return Err(BessOverflowError {
                direction: "discharge",
                requested_kwh: kwh_out,
                soc_kwh,
                limit_kwh: ((soc_kwh - self.soc_min_kwh) * self.eff_discharge).max(0.0),
            });
        }
        Ok(next.max(self.soc_min_kwh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BessConfig;

    fn params() -> BessParams {
        BessParams::from_config(&BessConfig::default())
    }

    #[test]
    fn derived_fields_match_config() {
        let p = params();
        assert_eq!(p.capacity_kwh, 2000.0);
        assert_eq!(p.soc_min_kwh, 400.0);
        assert_eq!(p.soc_max_kwh, 2000.0);
        assert_eq!(p.soc_initial_kwh, 1600.0);
        assert!((p.eff_charge - 0.95_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn window_contains_plain_and_wrapping() {
        let plain = HourWindow::new(6, 15);
        assert!(plain.contains(6));
        assert!(plain.contains(14));
        assert!(!plain.contains(15));
        assert!(!plain.contains(3));

        let wrap = HourWindow::new(22, 5);
        assert!(wrap.contains(23));
        assert!(wrap.contains(0));
        assert!(wrap.contains(4));
        assert!(!wrap.contains(5));
        assert!(!wrap.contains(12));
    }

    #[test]
    fn charge_limited_by_power_then_headroom() {
        let p = params();
        // Plenty of headroom at 50%: power rating binds.
        assert_eq!(p.max_charge_in_kwh(1000.0, 10), 400.0);
        // Near full: headroom binds. (2000-1950)/eff ≈ 51.3 kWh.
        let near_full = p.max_charge_in_kwh(1950.0, 10);
        assert!((near_full - 50.0 / p.eff_charge).abs() < 1e-9);
        // Full: nothing.
        assert_eq!(p.max_charge_in_kwh(2000.0, 10), 0.0);
    }

    #[test]
    fn discharge_limited_by_power_then_floor() {
        let p = params();
        assert_eq!(p.max_discharge_out_kwh(1600.0, 18), 400.0);
        // Just above floor: (450-400)*eff ≈ 48.7 kWh.
        let near_floor = p.max_discharge_out_kwh(450.0, 18);
        assert!((near_floor - 50.0 * p.eff_discharge).abs() < 1e-9);
        assert_eq!(p.max_discharge_out_kwh(400.0, 18), 0.0);
    }

    #[test]
    fn windows_mask_feasibility() {
        let p = params();
        // 03:00 is outside both default windows.
        assert_eq!(p.max_charge_in_kwh(1000.0, 3), 0.0);
        assert_eq!(p.max_discharge_out_kwh(1600.0, 3), 0.0);
        // 10:00 charge-only, 18:00 discharge-only.
        assert!(p.max_charge_in_kwh(1000.0, 10) > 0.0);
        assert_eq!(p.max_discharge_out_kwh(1600.0, 10), 0.0);
        assert_eq!(p.max_charge_in_kwh(1000.0, 18), 0.0);
        assert!(p.max_discharge_out_kwh(1600.0, 18) > 0.0);
    }

    #[test]
    fn apply_charge_tracks_efficiency() {
        let p = params();
        let soc = p.apply_charge(1000.0, 100.0).unwrap();
        assert!((soc - (1000.0 + 100.0 * p.eff_charge)).abs() < 1e-12);
    }

    #[test]
    fn apply_discharge_tracks_efficiency() {
        let p = params();
        let soc = p.apply_discharge(1000.0, 100.0).unwrap();
        assert!((soc - (1000.0 - 100.0 / p.eff_discharge)).abs() < 1e-12);
    }

    #[test]
    fn overcharge_is_an_error() {
        let p = params();
        let feasible = p.max_charge_in_kwh(1950.0, 10);
        assert!(p.apply_charge(1950.0, feasible + 1.0).is_err());
        assert!(p.apply_charge(1950.0, feasible).is_ok());
    }

    #[test]
    fn overdischarge_is_an_error() {
        let p = params();
        let feasible = p.max_discharge_out_kwh(450.0, 18);
        assert!(p.apply_discharge(450.0, feasible + 1.0).is_err());
        assert!(p.apply_discharge(450.0, feasible).is_ok());
    }

    #[test]
    fn round_trip_loses_roundtrip_fraction() {
        let p = params();
        // Charge 100 kWh in, then pull back out everything above start.
        let start = 1000.0;
        let soc = p.apply_charge(start, 100.0).unwrap();
        let stored = soc - start;
        let out = stored * p.eff_discharge;
        let back = p.apply_discharge(soc, out).unwrap();
        assert!((back - start).abs() < 1e-9);
        assert!((out - 100.0 * 0.95).abs() < 1e-9);
    }
}
