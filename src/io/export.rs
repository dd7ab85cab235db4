//! Telemetry export: per-step CSV and the JSON episode summary.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::data::TimeSeriesBundle;
use crate::runner::StepRecord;
use crate::sim::metrics::{EpisodeMetrics, KpiReport};
use crate::sim::reward::RewardWeights;

/// Column header for the per-step telemetry export.
const HEADER: &str = "hour,hour_of_day,solar_kw,mall_kw,ev_demand_kw,\
                      pv_to_ev,pv_to_bess,pv_to_mall,pv_to_grid,\
                      bess_to_ev,bess_to_mall,grid_to_ev,grid_to_mall,grid_to_bess,\
                      bess_charge_in,bess_discharge_out,soc_kwh,\
                      grid_import_kwh,grid_export_kwh,\
                      co2_grid_kg,co2_avoided_indirect_kg,co2_avoided_direct_kg,co2_net_kg,\
                      cost_soles,reward,r_co2,r_cost,r_solar,r_ev,r_grid";

/// Exports the per-step records to a CSV file at the given path.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_timeseries(records: &[StepRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_timeseries(records, BufWriter::new(file))
}

/// Writes the per-step records as CSV to any writer.
///
/// One row per step in hour order; identical inputs produce identical
/// bytes, so two runs can be compared with a plain file diff.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_timeseries(records: &[StepRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for rec in records {
        let r = &rec.result;
        let c = &rec.components;
        wtr.write_record(&[
            r.hour.to_string(),
            (r.hour % 24).to_string(),
            format!("{:.4}", r.solar_kw),
            format!("{:.4}", r.mall_kw),
            format!("{:.4}", r.ev_total_kw),
            format!("{:.4}", r.pv_to_ev),
            format!("{:.4}", r.pv_to_bess),
            format!("{:.4}", r.pv_to_mall),
            format!("{:.4}", r.pv_to_grid),
            format!("{:.4}", r.bess_to_ev),
            format!("{:.4}", r.bess_to_mall),
            format!("{:.4}", r.grid_to_ev),
            format!("{:.4}", r.grid_to_mall),
            format!("{:.4}", r.grid_to_bess),
            format!("{:.4}", r.bess_charge_in),
            format!("{:.4}", r.bess_discharge_out),
            format!("{:.4}", r.soc_after_kwh),
            format!("{:.4}", r.grid_import_kwh()),
            format!("{:.4}", r.grid_export_kwh()),
            format!("{:.4}", r.co2_grid_kg),
            format!("{:.4}", r.co2_avoided_indirect_kg),
            format!("{:.4}", r.co2_avoided_direct_kg),
            format!("{:.4}", r.co2_net_kg),
            format!("{:.4}", r.cost_soles),
            format!("{:.6}", rec.reward),
            format!("{:.6}", c.co2),
            format!("{:.6}", c.cost),
            format!("{:.6}", c.solar),
            format!("{:.6}", c.ev_satisfaction),
            format!("{:.6}", c.grid_stability),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Episode-level summary document.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeSummary {
    pub policy: String,
    pub seed: u64,
    pub weights: RewardWeights,
    pub kpi: KpiReport,
    pub metrics: EpisodeMetrics,
}

/// Exports the episode summary as pretty-printed JSON.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or serialization fails.
pub fn export_summary(summary: &EpisodeSummary, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_summary(summary, BufWriter::new(file))
}

/// Writes the episode summary as JSON to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if serialization or writing fails.
pub fn write_summary(summary: &EpisodeSummary, mut writer: impl Write) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut writer, summary).map_err(io::Error::other)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Writes a bundle back to disk as the four loader-compatible CSV files
/// (`solar.csv`, `mall.csv`, `chargers.csv`, `co2.csv`).
///
/// # Errors
///
/// Returns an `io::Error` if any file cannot be written.
pub fn write_bundle(bundle: &TimeSeriesBundle, dir: &Path) -> io::Result<()> {
    write_series(&dir.join("solar.csv"), "solar_kw", bundle.solar_series())?;
    write_series(&dir.join("mall.csv"), "mall_kw", bundle.mall_series())?;
    write_series(&dir.join("co2.csv"), "co2_kg_per_kwh", bundle.grid_ci_series())?;

    let file = File::create(dir.join("chargers.csv"))?;
    let mut wtr = csv::WriterBuilder::new().from_writer(BufWriter::new(file));
    let headers: Vec<String> = (0..bundle.socket_rows()[0].len())
        .map(|i| format!("socket_{i}"))
        .collect();
    wtr.write_record(&headers)?;
    for row in bundle.socket_rows() {
        let fields: Vec<String> = row.iter().map(|v| format!("{v}")).collect();
        wtr.write_record(&fields)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_series(path: &Path, header: &str, values: &[f64]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    writeln!(w, "{header}")?;
    for v in values {
        writeln!(w, "{v}")?;
    }
    w.flush()
}
