//! Immutable hourly time-series bundle and calendar helpers.

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::error::DataValidationError;

/// Hours in one simulated (non-leap) year.
pub const HOURS_PER_YEAR: usize = 8760;

/// Number of charger sockets in the plaza (19 chargers × 2 sockets).
///
/// The socket count is structural: observation and action layouts depend
/// on it, so datasets with a different width are rejected at load time
/// rather than reshaped.
pub const SOCKET_COUNT: usize = 38;

/// Default grid carbon intensity for the Iquitos thermal grid (kg CO₂/kWh).
pub const DEFAULT_GRID_CO2_KG_PER_KWH: f64 = 0.4521;

/// Days per month of the simulated non-leap year.
const DAYS_PER_MONTH: [usize; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Validated, immutable bundle of the four hourly input series.
///
/// Created once by the loader (or the synthetic builder) and shared
/// read-only for the lifetime of an episode. All series hold exactly
/// [`HOURS_PER_YEAR`] finite, non-negative values.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesBundle {
    solar_kw: Vec<f64>,
    mall_kw: Vec<f64>,
    socket_kw: Vec<[f64; SOCKET_COUNT]>,
    grid_ci_kg_per_kwh: Vec<f64>,
}

impl TimeSeriesBundle {
    /// Assembles a bundle from pre-parsed series.
    ///
    /// The loader performs file-level validation with row/column context;
    /// this constructor re-checks the structural invariants so a bundle
    /// can never exist in an invalid state, whatever produced the vectors.
    ///
    /// # Errors
    ///
    /// Returns a [`DataValidationError`] on wrong length, non-finite, or
    /// negative values.
    pub fn new(
        solar_kw: Vec<f64>,
        mall_kw: Vec<f64>,
        socket_kw: Vec<[f64; SOCKET_COUNT]>,
        grid_ci_kg_per_kwh: Vec<f64>,
    ) -> Result<Self, DataValidationError> {
        check_series("solar", &solar_kw)?;
        check_series("mall", &mall_kw)?;
        check_series("grid_co2", &grid_ci_kg_per_kwh)?;
        if socket_kw.len() != HOURS_PER_YEAR {
            return Err(DataValidationError::RowCount {
                file: "chargers".into(),
                expected: HOURS_PER_YEAR,
                found: socket_kw.len(),
                hint: row_count_hint(socket_kw.len()),
            });
        }
        for (row, sockets) in socket_kw.iter().enumerate() {
            for (i, &kw) in sockets.iter().enumerate() {
                if !kw.is_finite() || kw < 0.0 {
                    return Err(DataValidationError::Value {
                        file: "chargers".into(),
                        row,
                        column: format!("socket_{i}"),
                        reason: format!("expected finite non-negative kW, got {kw}"),
                    });
                }
            }
        }
        Ok(Self {
            solar_kw,
            mall_kw,
            socket_kw,
            grid_ci_kg_per_kwh,
        })
    }

    /// PV generation at hour `h` (kW).
    pub fn solar_kw(&self, h: usize) -> f64 {
        self.solar_kw[h]
    }

    /// Mall demand at hour `h` (kW).
    pub fn mall_kw(&self, h: usize) -> f64 {
        self.mall_kw[h]
    }

    /// Per-socket charger demand at hour `h` (kW).
    pub fn socket_kw(&self, h: usize) -> &[f64; SOCKET_COUNT] {
        &self.socket_kw[h]
    }

    /// Grid carbon intensity at hour `h` (kg CO₂/kWh).
    pub fn grid_ci(&self, h: usize) -> f64 {
        self.grid_ci_kg_per_kwh[h]
    }

    /// Total unconstrained EV demand at hour `h` (kW).
    pub fn ev_total_kw(&self, h: usize) -> f64 {
        self.socket_kw[h].iter().sum()
    }

    /// Full solar series, for loader diagnostics and export.
    pub fn solar_series(&self) -> &[f64] {
        &self.solar_kw
    }

    /// Full mall series.
    pub fn mall_series(&self) -> &[f64] {
        &self.mall_kw
    }

    /// Full charger matrix.
    pub fn socket_rows(&self) -> &[[f64; SOCKET_COUNT]] {
        &self.socket_kw
    }

    /// Full carbon-intensity series.
    pub fn grid_ci_series(&self) -> &[f64] {
        &self.grid_ci_kg_per_kwh
    }

    /// Builds a seeded synthetic year for tests and demo runs.
    ///
    /// Profiles follow the same procedural shapes as real Iquitos data:
    /// a half-sine PV day with weather noise, a sinusoidal mall load with
    /// evening peak, and per-socket EV sessions with random arrival,
    /// dwell, and energy need. This is an explicit constructor; the
    /// loader never falls back to it.
    pub fn synthetic(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut solar = Vec::with_capacity(HOURS_PER_YEAR);
        let mut mall = Vec::with_capacity(HOURS_PER_YEAR);
        for h in 0..HOURS_PER_YEAR {
            let hod = hour_of_day(h) as f64;
            let day = day_of_year(h) as f64;

            // PV: half-sine between 06:00 and 18:00, mild seasonal swing.
            let pv = if (6.0..18.0).contains(&hod) {
                let frac = ((hod - 6.0) / 12.0 * std::f64::consts::PI).sin();
                let seasonal = 1.0 + 0.08 * (2.0 * std::f64::consts::PI * day / 365.0).sin();
                let noise = 1.0 + gaussian(&mut rng, 0.05);
                (4000.0 * frac * seasonal * noise).max(0.0)
            } else {
                0.0
            };
            solar.push(pv);

            // Mall: base + daily sinusoid peaking in the evening, weekend lift.
            let phase = 2.0 * std::f64::consts::PI * (hod - 14.0) / 24.0;
            let weekend = if is_weekend(h) { 1.15 } else { 1.0 };
            let load = (1200.0 + 700.0 * phase.cos().max(-0.6)) * weekend
                + gaussian(&mut rng, 40.0);
            mall.push(load.max(0.0));
        }

        // EV sessions: each socket samples one session per day with random
        // arrival, dwell, and energy need, delivered evenly over the dwell.
        let mut sockets = vec![[0.0_f64; SOCKET_COUNT]; HOURS_PER_YEAR];
        for day in 0..HOURS_PER_YEAR / 24 {
            for s in 0..SOCKET_COUNT {
                // Sockets 0..29 serve motos (2 kWh packs), 30..37 mototaxis (4 kWh).
                let pack_kwh = if s < 30 { 2.0 } else { 4.0 };
                let dwell: usize = rng.random_range(1..=3);
                let arrival: usize = rng.random_range(7..=20 - dwell);
                // Roughly half the vehicles arrive near empty and ask for a
                // full pack plus charging overhead; the rest top up.
                let need_kwh: f64 = if rng.random_bool(0.5) {
                    pack_kwh * 1.05
                } else {
                    rng.random_range(0.3..=0.9) * pack_kwh
                };
                let kw = (need_kwh / dwell as f64).min(7.4);
                for t in 0..dwell {
                    sockets[day * 24 + arrival + t][s] = kw;
                }
            }
        }

        let ci = vec![DEFAULT_GRID_CO2_KG_PER_KWH; HOURS_PER_YEAR];
        Self::new(solar, mall, sockets, ci)
            .unwrap_or_else(|e| unreachable!("synthetic bundle is valid by construction: {e}"))
    }
}

fn check_series(name: &str, values: &[f64]) -> Result<(), DataValidationError> {
    if values.len() != HOURS_PER_YEAR {
        return Err(DataValidationError::RowCount {
            file: name.into(),
            expected: HOURS_PER_YEAR,
            found: values.len(),
            hint: row_count_hint(values.len()),
        });
    }
    for (row, &v) in values.iter().enumerate() {
        if !v.is_finite() || v < 0.0 {
            return Err(DataValidationError::Value {
                file: name.into(),
                row,
                column: name.into(),
                reason: format!("expected finite non-negative value, got {v}"),
            });
        }
    }
    Ok(())
}

/// Hint text for common wrong row counts (sub-hourly inputs).
pub fn row_count_hint(found: usize) -> String {
    match found {
        17_520 | 35_040 => {
            "; input looks sub-hourly — resample to hourly means before loading".into()
        }
        _ => String::new(),
    }
}

/// Hour of day (0–23) for an hour-of-year index.
pub fn hour_of_day(h: usize) -> u32 {
    (h % 24) as u32
}

/// Day of year (0–364) for an hour-of-year index.
pub fn day_of_year(h: usize) -> usize {
    h / 24
}

/// Day of week (0 = Monday … 6 = Sunday).
///
/// The simulated year starts on a Monday; only the weekday/weekend
/// rhythm matters, not alignment with any real calendar year.
pub fn day_of_week(h: usize) -> usize {
    day_of_year(h) % 7
}

/// Whether the hour falls on a Saturday or Sunday.
pub fn is_weekend(h: usize) -> bool {
    day_of_week(h) >= 5
}

/// Month (1–12) for an hour-of-year index.
pub fn month_of_year(h: usize) -> usize {
    let day = day_of_year(h);
    let mut acc = 0;
    for (m, &len) in DAYS_PER_MONTH.iter().enumerate() {
        acc += len;
        if day < acc {
            return m + 1;
        }
    }
    12
}

/// Box–Muller Gaussian sample with mean 0 and the given standard deviation.
fn gaussian(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z0 * std_dev
}
