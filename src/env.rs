//! Gym-style environment adapter over the dispatch engine.
//!
//! One episode is one pass over the 8,760-hour year. The environment
//! owns the battery SOC, the episode metrics, and the per-socket session
//! state; the time-series bundle is shared read-only. Dynamics are fully
//! deterministic — the reset seed only tags the episode for reporting.

use std::f64::consts::TAU;

use crate::config::PlazaConfig;
use crate::data::{
    self, HOURS_PER_YEAR, SOCKET_COUNT, TimeSeriesBundle, hour_of_day,
};
use crate::error::{ActionShapeError, PlazaError};
use crate::sim::bess::BessParams;
use crate::sim::dispatch::{DispatchInputs, DispatchResult, DispatchSettings, dispatch_hour};
use crate::sim::metrics::{EpisodeMetrics, FleetSpec, SocketSessions};
use crate::sim::reward::{RewardComponents, RewardNorms, RewardWeights, compute_reward};
use crate::sim::tariff::TariffSchedule;

/// Fixed observation dimension, padded with zeros past the active features.
pub const OBS_DIM: usize = 394;

/// Action dimension: one battery authorization + one fraction per socket.
pub const ACTION_DIM: usize = 1 + SOCKET_COUNT;

/// Number of observation dims before the optional look-ahead block.
const OBS_FIXED_DIMS: usize = 3 + SOCKET_COUNT * 3 + 7;

/// Validated continuous action in `[0, 1]^39`.
///
/// Component 0 authorizes the battery; components 1..39 are per-socket
/// charging fractions. Construction is the only validation point: a
/// built `Action` is always well-formed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Action {
    values: [f64; ACTION_DIM],
}

impl Action {
    /// Builds an action from a flat slice, checking shape and finiteness
    /// and clamping each component into `[0, 1]`.
    ///
    /// # Errors
    ///
    /// [`ActionShapeError`] on wrong length or non-finite components.
    pub fn from_slice(raw: &[f64]) -> Result<Self, ActionShapeError> {
        if raw.len() != ACTION_DIM {
            return Err(ActionShapeError::Length {
                expected: ACTION_DIM,
                got: raw.len(),
            });
        }
        let mut values = [0.0; ACTION_DIM];
        for (i, &v) in raw.iter().enumerate() {
            if !v.is_finite() {
                return Err(ActionShapeError::NonFinite { index: i, value: v });
            }
            values[i] = v.clamp(0.0, 1.0);
        }
        Ok(Self { values })
    }

    /// The pure rule-based policy: everything authorized.
    pub fn baseline() -> Self {
        Self {
            values: [1.0; ACTION_DIM],
        }
    }

    /// Battery locked, all sockets authorized.
    pub fn bess_locked() -> Self {
        let mut values = [1.0; ACTION_DIM];
        values[0] = 0.0;
        Self { values }
    }

    /// Battery authorization component.
    pub fn bess_authorization(&self) -> f64 {
        self.values[0]
    }

    /// Per-socket charging fractions.
    pub fn socket_fractions(&self) -> [f64; SOCKET_COUNT] {
        let mut out = [0.0; SOCKET_COUNT];
        out.copy_from_slice(&self.values[1..]);
        out
    }

    /// Raw components, in layout order.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Everything `step` returns for one hour.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub components: RewardComponents,
    pub terminated: bool,
    pub truncated: bool,
    /// Full dispatch record, for logging and telemetry.
    pub result: DispatchResult,
}

/// The RL-facing environment.
#[derive(Debug, Clone)]
pub struct PlazaEnv {
    bundle: TimeSeriesBundle,
    params: BessParams,
    settings: DispatchSettings,
    tariff: TariffSchedule,
    fleet: FleetSpec,
    weights: RewardWeights,
    norms: RewardNorms,
    lookahead_hours: usize,

    hour: usize,
    soc_kwh: f64,
    metrics: EpisodeMetrics,
    sessions: SocketSessions,
    seed: u64,
}

impl PlazaEnv {
    /// Builds an environment from a validated configuration and bundle.
    ///
    /// When the configuration does not pin reward baselines, a
    /// battery-locked reference year is simulated once here to derive
    /// the per-step CO₂ and cost normalizers.
    ///
    /// # Errors
    ///
    /// Propagates dispatch failures from the reference pass.
    pub fn new(bundle: TimeSeriesBundle, cfg: &PlazaConfig) -> Result<Self, PlazaError> {
        let params = BessParams::from_config(&cfg.bess);
        let settings = DispatchSettings {
            peak_shave_threshold_kw: cfg.bess.peak_shave_threshold_kw,
            grid_charging: cfg.bess.grid_charging,
            ev_displacement_factor: cfg.grid.ev_displacement_factor,
            credit_export: cfg.grid.credit_export,
        };
        let tariff = TariffSchedule::from_config(&cfg.grid.tariff);

        let pinned_co2 = cfg.reward.co2_baseline_kg;
        let pinned_cost = cfg.reward.cost_baseline_soles;
        let derived = if pinned_co2 > 0.0 && pinned_cost > 0.0 {
            (0.0, 0.0)
        } else {
            let derived = reference_baselines(&bundle, &params, &settings, &tariff)?;
            tracing::info!(
                co2_kg_per_step = derived.0,
                cost_soles_per_step = derived.1,
                "derived reward baselines from battery-locked reference year"
            );
            derived
        };
        let co2_baseline = if pinned_co2 > 0.0 { pinned_co2 } else { derived.0 };
        let cost_baseline = if pinned_cost > 0.0 { pinned_cost } else { derived.1 };
        if co2_baseline <= 0.0 || cost_baseline <= 0.0 {
            tracing::warn!(
                co2_baseline,
                cost_baseline,
                "zero reward baseline; the affected components stay neutral"
            );
        }

        let norms = RewardNorms {
            co2_baseline_kg_per_step: co2_baseline,
            cost_baseline_soles_per_step: cost_baseline,
            peak_limit_kw: cfg.env.peak_limit_kw,
        };

        Ok(Self {
            bundle,
            soc_kwh: params.soc_initial_kwh,
            params,
            settings,
            tariff,
            fleet: FleetSpec::from_config(&cfg.chargers),
            weights: cfg.reward.weights,
            norms,
            lookahead_hours: cfg.env.lookahead_hours,
            hour: 0,
            metrics: EpisodeMetrics::default(),
            sessions: SocketSessions::default(),
            seed: 0,
        })
    }

    /// Rewinds to hour 0 with a fresh SOC, metrics, and session state.
    ///
    /// Valid at any point of an episode; nothing leaks across resets.
    pub fn reset(&mut self, seed: u64) -> Vec<f64> {
        self.hour = 0;
        self.soc_kwh = self.params.soc_initial_kwh;
        self.metrics = EpisodeMetrics::default();
        self.sessions = SocketSessions::default();
        self.seed = seed;
        self.observation()
    }

    /// Advances one hour under the given action.
    ///
    /// # Errors
    ///
    /// [`PlazaError::EpisodeComplete`] when called after termination,
    /// or a dispatch failure (both balance and overflow kinds are
    /// implementation bugs and fatal).
    pub fn step(&mut self, action: &Action) -> Result<StepOutcome, PlazaError> {
        if self.hour >= HOURS_PER_YEAR {
            return Err(PlazaError::EpisodeComplete { hour: self.hour });
        }
        let h = self.hour;
        let hod = hour_of_day(h);

        let inputs = DispatchInputs {
            hour: h,
            solar_kw: self.bundle.solar_kw(h),
            mall_kw: self.bundle.mall_kw(h),
            socket_kw: *self.bundle.socket_kw(h),
            bess_auth: action.bess_authorization(),
            socket_auth: action.socket_fractions(),
            soc_kwh: self.soc_kwh,
            grid_ci_kg_per_kwh: self.bundle.grid_ci(h),
            tariff_price_soles: self.tariff.price_soles(hod),
        };
        let result = dispatch_hour(&inputs, &self.params, &self.settings)?;
        self.soc_kwh = result.soc_after_kwh;

        let edges = self.sessions.update(
            self.bundle.socket_kw(h),
            &result.ev_delivered_kw,
            &self.fleet,
        );
        self.metrics.record(&result, self.tariff.is_peak(hod), edges);

        let (reward, components) = compute_reward(&result, &self.weights, &self.norms);

        self.hour += 1;
        let terminated = self.hour == HOURS_PER_YEAR;
        Ok(StepOutcome {
            observation: self.observation(),
            reward,
            components,
            terminated,
            truncated: false,
            result,
        })
    }

    /// Shape-checking convenience over [`Self::step`] for flat-vector callers.
    ///
    /// # Errors
    ///
    /// [`PlazaError::Action`] on malformed input, plus everything
    /// [`Self::step`] can return.
    pub fn step_slice(&mut self, raw_action: &[f64]) -> Result<StepOutcome, PlazaError> {
        let action = Action::from_slice(raw_action)?;
        self.step(&action)
    }

    /// Episode metrics accumulated so far.
    pub fn metrics(&self) -> &EpisodeMetrics {
        &self.metrics
    }

    /// Current state of charge (kWh).
    pub fn soc_kwh(&self) -> f64 {
        self.soc_kwh
    }

    /// Current hour cursor (0–8760; 8760 means terminated).
    pub fn hour(&self) -> usize {
        self.hour
    }

    /// Seed recorded at the last reset.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Reward weights in force.
    pub fn weights(&self) -> &RewardWeights {
        &self.weights
    }

    /// Normalization constants in force.
    pub fn norms(&self) -> &RewardNorms {
        &self.norms
    }

    /// Builds the fixed-size observation for the current hour.
    ///
    /// Layout: 3 plaza scalars, 38 × [demand, session fraction, active],
    /// 7 temporal features, optional solar/mall look-ahead, zero padding
    /// up to [`OBS_DIM`]. Past the final hour the per-hour features read
    /// as zeros, matching a plaza at rest.
    pub fn observation(&self) -> Vec<f64> {
        let mut obs = Vec::with_capacity(OBS_DIM);
        let h = self.hour;
        let live = h < HOURS_PER_YEAR;

        // Plaza scalars.
        obs.push(if live { self.bundle.solar_kw(h) } else { 0.0 });
        obs.push(if live { self.bundle.mall_kw(h) } else { 0.0 });
        obs.push(self.params.soc_pct(self.soc_kwh));

        // Per-socket block.
        for i in 0..SOCKET_COUNT {
            let demand = if live { self.bundle.socket_kw(h)[i] } else { 0.0 };
            let fraction = (self.sessions.session_delivered_kwh(i)
                / self.fleet.battery_kwh(i))
            .clamp(0.0, 1.0);
            obs.push(demand);
            obs.push(fraction);
            obs.push(if demand > 0.0 { 1.0 } else { 0.0 });
        }

        // Temporal features, computed at the cursor (clamped at year end).
        let th = h.min(HOURS_PER_YEAR - 1);
        let hod = hour_of_day(th) as f64;
        obs.push(hod / 24.0);
        obs.push((TAU * hod / 24.0).sin());
        obs.push((TAU * hod / 24.0).cos());
        obs.push(data::day_of_week(th) as f64 / 7.0);
        obs.push(data::month_of_year(th) as f64 / 12.0);
        obs.push(if self.tariff.is_peak(hour_of_day(th)) {
            1.0
        } else {
            0.0
        });
        obs.push(if data::is_weekend(th) { 1.0 } else { 0.0 });
        debug_assert_eq!(obs.len(), OBS_FIXED_DIMS);

        // Look-ahead: upcoming solar then mall, zeros past year end.
        for k in 1..=self.lookahead_hours {
            let ahead = h + k;
            obs.push(if ahead < HOURS_PER_YEAR {
                self.bundle.solar_kw(ahead)
            } else {
                0.0
            });
        }
        for k in 1..=self.lookahead_hours {
            let ahead = h + k;
            obs.push(if ahead < HOURS_PER_YEAR {
                self.bundle.mall_kw(ahead)
            } else {
                0.0
            });
        }

        obs.resize(OBS_DIM, 0.0);
        obs
    }
}

/// Mean per-step grid CO₂ and cost of the battery-locked reference year.
fn reference_baselines(
    bundle: &TimeSeriesBundle,
    params: &BessParams,
    settings: &DispatchSettings,
    tariff: &TariffSchedule,
) -> Result<(f64, f64), PlazaError> {
    let action = Action::bess_locked();
    let socket_auth = action.socket_fractions();
    let mut co2_sum = 0.0;
    let mut cost_sum = 0.0;
    let mut soc = params.soc_initial_kwh;
    for h in 0..HOURS_PER_YEAR {
        let hod = hour_of_day(h);
        let inputs = DispatchInputs {
            hour: h,
            solar_kw: bundle.solar_kw(h),
            mall_kw: bundle.mall_kw(h),
            socket_kw: *bundle.socket_kw(h),
            bess_auth: action.bess_authorization(),
            socket_auth,
            soc_kwh: soc,
            grid_ci_kg_per_kwh: bundle.grid_ci(h),
            tariff_price_soles: tariff.price_soles(hod),
        };
        let r = dispatch_hour(&inputs, params, settings)?;
        soc = r.soc_after_kwh;
        co2_sum += r.co2_grid_kg;
        cost_sum += r.cost_soles;
    }
    let n = HOURS_PER_YEAR as f64;
    Ok((co2_sum / n, cost_sum / n))
}
