//! Multi-objective reward: five normalized components, one scalar.

use serde::{Deserialize, Serialize};

use crate::sim::dispatch::DispatchResult;

/// Guard against division by a vanishing PV denominator.
const DENOM_EPS: f64 = 1e-9;

/// Non-negative per-objective weights summing to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RewardWeights {
    pub co2: f64,
    pub ev_satisfaction: f64,
    pub solar: f64,
    pub cost: f64,
    pub grid_stability: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            co2: 0.35,
            ev_satisfaction: 0.30,
            solar: 0.20,
            cost: 0.10,
            grid_stability: 0.05,
        }
    }
}

impl RewardWeights {
    pub fn sum(&self) -> f64 {
        self.co2 + self.ev_satisfaction + self.solar + self.cost + self.grid_stability
    }

    /// Checks non-negativity and unit sum.
    pub fn check(&self) -> Result<(), String> {
        let all = [
            self.co2,
            self.ev_satisfaction,
            self.solar,
            self.cost,
            self.grid_stability,
        ];
        if all.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err("weights must be finite and >= 0".into());
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!("weights must sum to 1.0, got {sum:.6}"));
        }
        Ok(())
    }
}

/// Normalization constants for the co2/cost/grid components.
///
/// The baselines are per-step means of a battery-locked reference year
/// (or pinned values from configuration); `peak_limit_kw` is the grid
/// import treated as full stress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardNorms {
    pub co2_baseline_kg_per_step: f64,
    pub cost_baseline_soles_per_step: f64,
    pub peak_limit_kw: f64,
}

/// The five normalized components of one step's reward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RewardComponents {
    pub co2: f64,
    pub cost: f64,
    pub solar: f64,
    pub ev_satisfaction: f64,
    pub grid_stability: f64,
}

/// Computes the scalar reward and its components for one resolved hour.
///
/// Components are approximately in [−1, 1]; any zero denominator
/// neutralizes its component to 0 rather than producing NaN. The
/// emissions component uses grid emissions only — the tailpipe
/// displacement credit is tracked in metrics but deliberately kept out
/// of the gradient so EV charging is not rewarded twice.
pub fn compute_reward(
    r: &DispatchResult,
    weights: &RewardWeights,
    norms: &RewardNorms,
) -> (f64, RewardComponents) {
    let co2 = if norms.co2_baseline_kg_per_step > 0.0 {
        (-r.co2_grid_kg / norms.co2_baseline_kg_per_step).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    let cost = if norms.cost_baseline_soles_per_step > 0.0 {
        (-r.cost_soles / norms.cost_baseline_soles_per_step).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    let solar = if r.solar_kw > DENOM_EPS {
        (r.pv_self_consumed_kwh() / r.solar_kw).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut with_demand = 0_usize;
    let mut satisfaction_sum = 0.0;
    for i in 0..r.ev_demand_kw.len() {
        if r.ev_demand_kw[i] > 0.0 {
            with_demand += 1;
            satisfaction_sum += (r.ev_delivered_kw[i] / r.ev_demand_kw[i]).min(1.0);
        }
    }
    let ev_satisfaction = if with_demand > 0 {
        satisfaction_sum / with_demand as f64
    } else {
        0.0
    };

    let grid_stability = if norms.peak_limit_kw > 0.0 {
        1.0 - ((r.grid_to_ev + r.grid_to_mall) / norms.peak_limit_kw).min(1.0)
    } else {
        0.0
    };

    let components = RewardComponents {
        co2,
        cost,
        solar,
        ev_satisfaction,
        grid_stability,
    };
    let reward = weights.co2 * co2
        + weights.cost * cost
        + weights.solar * solar
        + weights.ev_satisfaction * ev_satisfaction
        + weights.grid_stability * grid_stability;
    (reward, components)
}
