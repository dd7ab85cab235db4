//! Episode metrics accumulation and KPI reporting.

use std::fmt;

use serde::Serialize;

use crate::data::SOCKET_COUNT;
use crate::sim::dispatch::DispatchResult;

/// Vehicle fleet mapping for the socket bank.
///
/// Sockets `0..moto_sockets` serve motos, the rest mototaxis; the pack
/// size is the full-charge threshold for the session counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FleetSpec {
    pub moto_sockets: usize,
    pub moto_battery_kwh: f64,
    pub mototaxi_battery_kwh: f64,
}

impl FleetSpec {
    pub fn from_config(cfg: &crate::config::ChargerConfig) -> Self {
        Self {
            moto_sockets: cfg.moto_sockets,
            moto_battery_kwh: cfg.moto_battery_kwh,
            mototaxi_battery_kwh: cfg.mototaxi_battery_kwh,
        }
    }

    /// Full-charge threshold for a socket index (kWh).
    pub fn battery_kwh(&self, socket: usize) -> f64 {
        if socket < self.moto_sockets {
            self.moto_battery_kwh
        } else {
            self.mototaxi_battery_kwh
        }
    }

    /// Whether the socket serves a moto (as opposed to a mototaxi).
    pub fn is_moto(&self, socket: usize) -> bool {
        socket < self.moto_sockets
    }
}

/// Per-socket charging-session state.
///
/// A session is the contiguous run of hours a socket shows demand; it
/// ends when demand disappears (the vehicle left). Energy delivered
/// accumulates within the session, and crossing the pack size once
/// counts one fully charged vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketSessions {
    delivered_kwh: [f64; SOCKET_COUNT],
    counted: [bool; SOCKET_COUNT],
}

impl Default for SocketSessions {
    fn default() -> Self {
        Self {
            delivered_kwh: [0.0; SOCKET_COUNT],
            counted: [false; SOCKET_COUNT],
        }
    }
}

/// Full-charge events observed in one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FullCharges {
    pub motos: u64,
    pub mototaxis: u64,
}

impl SocketSessions {
    /// Advances session state with one hour of demand and delivery.
    ///
    /// Demand is the raw socket series (vehicle presence), not the
    /// action-scaled value: a throttled charger still has a vehicle
    /// plugged in.
    pub fn update(
        &mut self,
        raw_demand_kw: &[f64; SOCKET_COUNT],
        delivered_kwh: &[f64; SOCKET_COUNT],
        fleet: &FleetSpec,
    ) -> FullCharges {
        let mut edges = FullCharges::default();
        for i in 0..SOCKET_COUNT {
            if raw_demand_kw[i] <= 0.0 {
                // Vehicle departed; next arrival starts a fresh session.
                self.delivered_kwh[i] = 0.0;
                self.counted[i] = false;
                continue;
            }
            self.delivered_kwh[i] += delivered_kwh[i];
            // Small slack so a pack filled in equal hourly slices is not
            // missed by accumulated rounding.
            if !self.counted[i] && self.delivered_kwh[i] >= fleet.battery_kwh(i) - 1e-9 {
                self.counted[i] = true;
                if fleet.is_moto(i) {
                    edges.motos += 1;
                } else {
                    edges.mototaxis += 1;
                }
            }
        }
        edges
    }

    /// Cumulative delivery within the current session for one socket (kWh).
    pub fn session_delivered_kwh(&self, socket: usize) -> f64 {
        self.delivered_kwh[socket]
    }
}

/// Additive episode accumulator.
///
/// All energy fields are field-wise sums over steps, making
/// [`EpisodeMetrics::merge`] a commutative monoid; the peak takes the
/// max and the counters add.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EpisodeMetrics {
    pub steps: usize,

    pub solar_kwh: f64,
    pub mall_kwh: f64,
    pub ev_demand_kwh: f64,
    pub ev_delivered_kwh: f64,

    pub pv_to_ev_kwh: f64,
    pub pv_to_bess_kwh: f64,
    pub pv_to_mall_kwh: f64,
    pub pv_to_grid_kwh: f64,
    pub bess_to_ev_kwh: f64,
    pub bess_to_mall_kwh: f64,
    pub grid_to_ev_kwh: f64,
    pub grid_to_mall_kwh: f64,
    pub grid_to_bess_kwh: f64,

    pub bess_charge_in_kwh: f64,
    pub bess_discharge_out_kwh: f64,

    pub grid_import_kwh: f64,
    pub grid_export_kwh: f64,
    pub peak_grid_import_kw: f64,

    pub co2_grid_kg: f64,
    pub co2_avoided_indirect_kg: f64,
    pub co2_avoided_direct_kg: f64,
    pub co2_net_kg: f64,

    pub cost_soles: f64,
    pub cost_hp_soles: f64,
    pub cost_hfp_soles: f64,

    pub motos_fully_charged: u64,
    pub mototaxis_fully_charged: u64,
}

impl EpisodeMetrics {
    /// Folds one resolved step into the accumulator.
    pub fn record(&mut self, r: &DispatchResult, is_peak_hour: bool, edges: FullCharges) {
        self.steps += 1;

        self.solar_kwh += r.solar_kw;
        self.mall_kwh += r.mall_kw;
        self.ev_demand_kwh += r.ev_total_kw;
        self.ev_delivered_kwh += r.ev_delivered_kwh();

        self.pv_to_ev_kwh += r.pv_to_ev;
        self.pv_to_bess_kwh += r.pv_to_bess;
        self.pv_to_mall_kwh += r.pv_to_mall;
        self.pv_to_grid_kwh += r.pv_to_grid;
        self.bess_to_ev_kwh += r.bess_to_ev;
        self.bess_to_mall_kwh += r.bess_to_mall;
        self.grid_to_ev_kwh += r.grid_to_ev;
        self.grid_to_mall_kwh += r.grid_to_mall;
        self.grid_to_bess_kwh += r.grid_to_bess;

        self.bess_charge_in_kwh += r.bess_charge_in;
        self.bess_discharge_out_kwh += r.bess_discharge_out;

        let import = r.grid_import_kwh();
        self.grid_import_kwh += import;
        self.grid_export_kwh += r.grid_export_kwh();
        self.peak_grid_import_kw = self.peak_grid_import_kw.max(import);

        self.co2_grid_kg += r.co2_grid_kg;
        self.co2_avoided_indirect_kg += r.co2_avoided_indirect_kg;
        self.co2_avoided_direct_kg += r.co2_avoided_direct_kg;
        self.co2_net_kg += r.co2_net_kg;

        self.cost_soles += r.cost_soles;
        if is_peak_hour {
            self.cost_hp_soles += r.cost_soles;
        } else {
            self.cost_hfp_soles += r.cost_soles;
        }

        self.motos_fully_charged += edges.motos;
        self.mototaxis_fully_charged += edges.mototaxis;
    }

    /// Field-wise combination of two accumulators.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            steps: self.steps + other.steps,
            solar_kwh: self.solar_kwh + other.solar_kwh,
            mall_kwh: self.mall_kwh + other.mall_kwh,
            ev_demand_kwh: self.ev_demand_kwh + other.ev_demand_kwh,
            ev_delivered_kwh: self.ev_delivered_kwh + other.ev_delivered_kwh,
            pv_to_ev_kwh: self.pv_to_ev_kwh + other.pv_to_ev_kwh,
            pv_to_bess_kwh: self.pv_to_bess_kwh + other.pv_to_bess_kwh,
            pv_to_mall_kwh: self.pv_to_mall_kwh + other.pv_to_mall_kwh,
            pv_to_grid_kwh: self.pv_to_grid_kwh + other.pv_to_grid_kwh,
            bess_to_ev_kwh: self.bess_to_ev_kwh + other.bess_to_ev_kwh,
            bess_to_mall_kwh: self.bess_to_mall_kwh + other.bess_to_mall_kwh,
            grid_to_ev_kwh: self.grid_to_ev_kwh + other.grid_to_ev_kwh,
            grid_to_mall_kwh: self.grid_to_mall_kwh + other.grid_to_mall_kwh,
            grid_to_bess_kwh: self.grid_to_bess_kwh + other.grid_to_bess_kwh,
            bess_charge_in_kwh: self.bess_charge_in_kwh + other.bess_charge_in_kwh,
            bess_discharge_out_kwh: self.bess_discharge_out_kwh + other.bess_discharge_out_kwh,
            grid_import_kwh: self.grid_import_kwh + other.grid_import_kwh,
            grid_export_kwh: self.grid_export_kwh + other.grid_export_kwh,
            peak_grid_import_kw: self.peak_grid_import_kw.max(other.peak_grid_import_kw),
            co2_grid_kg: self.co2_grid_kg + other.co2_grid_kg,
            co2_avoided_indirect_kg: self.co2_avoided_indirect_kg
                + other.co2_avoided_indirect_kg,
            co2_avoided_direct_kg: self.co2_avoided_direct_kg + other.co2_avoided_direct_kg,
            co2_net_kg: self.co2_net_kg + other.co2_net_kg,
            cost_soles: self.cost_soles + other.cost_soles,
            cost_hp_soles: self.cost_hp_soles + other.cost_hp_soles,
            cost_hfp_soles: self.cost_hfp_soles + other.cost_hfp_soles,
            motos_fully_charged: self.motos_fully_charged + other.motos_fully_charged,
            mototaxis_fully_charged: self.mototaxis_fully_charged
                + other.mototaxis_fully_charged,
        }
    }
}

/// Aggregate key performance indicators derived from a complete episode.
///
/// Computed post-hoc from the accumulated metrics to keep step data and
/// reported figures consistent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiReport {
    /// Fraction of PV generation consumed on site (%).
    pub solar_self_consumption_pct: f64,
    /// Fraction of EV demand actually delivered (%).
    pub ev_satisfaction_pct: f64,
    /// Grid-import reduction against the battery-locked reference (%).
    pub grid_reduction_pct: f64,
    pub grid_import_kwh: f64,
    pub peak_grid_import_kw: f64,
    pub co2_net_kg: f64,
    pub cost_soles: f64,
    pub motos_fully_charged: u64,
    pub mototaxis_fully_charged: u64,
}

impl KpiReport {
    /// Derives KPIs from episode sums.
    ///
    /// `reference_grid_import_kwh` is the annual import of the
    /// battery-locked reference run; `None` leaves the reduction at 0.
    pub fn from_metrics(m: &EpisodeMetrics, reference_grid_import_kwh: Option<f64>) -> Self {
        let pct = |num: f64, den: f64| if den > 0.0 { 100.0 * num / den } else { 0.0 };
        let grid_reduction_pct = match reference_grid_import_kwh {
            Some(reference) if reference > 0.0 => {
                100.0 * (reference - m.grid_import_kwh) / reference
            }
            _ => 0.0,
        };
        Self {
            solar_self_consumption_pct: pct(m.solar_kwh - m.pv_to_grid_kwh, m.solar_kwh),
            ev_satisfaction_pct: pct(m.ev_delivered_kwh, m.ev_demand_kwh),
            grid_reduction_pct,
            grid_import_kwh: m.grid_import_kwh,
            peak_grid_import_kw: m.peak_grid_import_kw,
            co2_net_kg: m.co2_net_kg,
            cost_soles: m.cost_soles,
            motos_fully_charged: m.motos_fully_charged,
            mototaxis_fully_charged: m.mototaxis_fully_charged,
        }
    }
}

impl fmt::Display for KpiReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Episode KPI Report ---")?;
        writeln!(
            f,
            "Solar self-consumption: {:.1}%",
            self.solar_self_consumption_pct
        )?;
        writeln!(f, "EV satisfaction:        {:.1}%", self.ev_satisfaction_pct)?;
        writeln!(f, "Grid import:            {:.0} kWh", self.grid_import_kwh)?;
        writeln!(
            f,
            "Grid reduction vs ref.: {:.1}%",
            self.grid_reduction_pct
        )?;
        writeln!(
            f,
            "Peak grid import:       {:.1} kW",
            self.peak_grid_import_kw
        )?;
        writeln!(f, "Net CO2:                {:.0} kg", self.co2_net_kg)?;
        writeln!(f, "Energy cost:            S/ {:.2}", self.cost_soles)?;
        write!(
            f,
            "Fully charged:          {} motos, {} mototaxis",
            self.motos_fully_charged, self.mototaxis_fully_charged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChargerConfig;
    use crate::data::SOCKET_COUNT;

    fn fleet() -> FleetSpec {
        FleetSpec::from_config(&ChargerConfig::default())
    }

    fn result_with(grid_to_mall: f64, pv_to_mall: f64, cost: f64) -> DispatchResult {
        DispatchResult {
            hour: 0,
            solar_kw: pv_to_mall,
            mall_kw: grid_to_mall + pv_to_mall,
            ev_total_kw: 0.0,
            pv_to_ev: 0.0,
            pv_to_bess: 0.0,
            pv_to_mall,
            pv_to_grid: 0.0,
            bess_to_ev: 0.0,
            bess_to_mall: 0.0,
            grid_to_ev: 0.0,
            grid_to_mall,
            grid_to_bess: 0.0,
            bess_charge_in: 0.0,
            bess_discharge_out: 0.0,
            soc_before_kwh: 1600.0,
            soc_after_kwh: 1600.0,
            ev_demand_kw: [0.0; SOCKET_COUNT],
            ev_delivered_kw: [0.0; SOCKET_COUNT],
            co2_grid_kg: grid_to_mall * 0.4521,
            co2_avoided_indirect_kg: pv_to_mall * 0.4521,
            co2_avoided_direct_kg: 0.0,
            co2_net_kg: (grid_to_mall - pv_to_mall) * 0.4521,
            cost_soles: cost,
        }
    }

    #[test]
    fn record_accumulates_and_splits_tariff() {
        let mut m = EpisodeMetrics::default();
        m.record(&result_with(100.0, 0.0, 45.0), true, FullCharges::default());
        m.record(&result_with(50.0, 0.0, 14.0), false, FullCharges::default());
        assert_eq!(m.steps, 2);
        assert!((m.grid_import_kwh - 150.0).abs() < 1e-9);
        assert!((m.cost_hp_soles - 45.0).abs() < 1e-9);
        assert!((m.cost_hfp_soles - 14.0).abs() < 1e-9);
        assert!((m.peak_grid_import_kw - 100.0).abs() < 1e-9);
    }

    #[test]
    fn merge_is_field_wise_sum_with_peak_max() {
        let mut a = EpisodeMetrics::default();
        a.record(&result_with(100.0, 0.0, 45.0), true, FullCharges::default());
        let mut b = EpisodeMetrics::default();
        b.record(&result_with(50.0, 200.0, 14.0), false, FullCharges::default());

        let ab = a.merge(&b);
        let ba = b.merge(&a);
        assert_eq!(ab, ba);
        assert_eq!(ab.steps, 2);
        assert!((ab.grid_import_kwh - 150.0).abs() < 1e-9);
        assert!((ab.peak_grid_import_kw - 100.0).abs() < 1e-9);
    }

    #[test]
    fn session_counts_on_rising_edge_only() {
        let mut sessions = SocketSessions::default();
        let fleet = fleet();
        let mut demand = [0.0; SOCKET_COUNT];
        demand[0] = 2.0; // moto socket
        let mut delivered = [0.0; SOCKET_COUNT];
        delivered[0] = 1.5;

        // First hour: 1.5 of 2.0 kWh, not full yet.
        let e = sessions.update(&demand, &delivered, &fleet);
        assert_eq!(e.motos, 0);
        // Second hour crosses the threshold: one event.
        let e = sessions.update(&demand, &delivered, &fleet);
        assert_eq!(e.motos, 1);
        // Third hour, still plugged: no double counting.
        let e = sessions.update(&demand, &delivered, &fleet);
        assert_eq!(e.motos, 0);
    }

    #[test]
    fn session_resets_when_vehicle_leaves() {
        let mut sessions = SocketSessions::default();
        let fleet = fleet();
        let mut demand = [0.0; SOCKET_COUNT];
        demand[35] = 4.0; // mototaxi socket
        let mut delivered = [0.0; SOCKET_COUNT];
        delivered[35] = 4.0;

        let e = sessions.update(&demand, &delivered, &fleet);
        assert_eq!(e.mototaxis, 1);

        // Vehicle leaves, new one arrives and charges fully again.
        let idle = [0.0; SOCKET_COUNT];
        sessions.update(&idle, &idle, &fleet);
        let e = sessions.update(&demand, &delivered, &fleet);
        assert_eq!(e.mototaxis, 1);
    }

    #[test]
    fn kpi_from_metrics() {
        let mut m = EpisodeMetrics::default();
        m.record(&result_with(100.0, 300.0, 28.0), false, FullCharges::default());
        let kpi = KpiReport::from_metrics(&m, Some(200.0));
        assert!((kpi.solar_self_consumption_pct - 100.0).abs() < 1e-9);
        assert!((kpi.grid_reduction_pct - 50.0).abs() < 1e-9);
        // No EV demand: satisfaction neutral at 0, not NaN.
        assert_eq!(kpi.ev_satisfaction_pct, 0.0);
    }

    #[test]
    fn kpi_display_does_not_panic() {
        let kpi = KpiReport::from_metrics(&EpisodeMetrics::default(), None);
        let s = format!("{kpi}");
        assert!(s.contains("KPI Report"));
    }
}
