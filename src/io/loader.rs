//! CSV loading and validation for the hourly input series.
//!
//! The loader is the only place file contents are trusted into a
//! [`TimeSeriesBundle`]. It reads, validates, and reports violations
//! with file, row, and column context — it never writes and never
//! substitutes synthetic data for missing inputs.

use std::path::{Path, PathBuf};

use crate::config::PlazaConfig;
use crate::data::{HOURS_PER_YEAR, SOCKET_COUNT, TimeSeriesBundle, row_count_hint};
use crate::error::DataValidationError;

/// Slack allowed over the rated socket power before a value is rejected (kW).
const RATED_EPS: f64 = 1e-6;

/// Loads and validates the full input bundle described by the configuration.
///
/// Each series resolves its path with two-arm logic: the primary path is
/// tried first, then the fallback; if both are absent the load fails.
/// The optional carbon-intensity series falls back to the scalar
/// `grid.co2_factor` when unconfigured.
///
/// # Errors
///
/// [`DataValidationError`] on missing files, wrong row counts (with a
/// resampling hint for sub-hourly inputs), wrong charger-matrix width,
/// NaN, negative values, or per-socket demand above the rated power.
pub fn load_bundle(cfg: &PlazaConfig) -> Result<TimeSeriesBundle, DataValidationError> {
    let d = &cfg.data;

    let solar_path = resolve_path(&d.solar_path, &d.solar_fallback)?;
    let mall_path = resolve_path(&d.mall_path, &d.mall_fallback)?;
    let chargers_path = resolve_path(&d.chargers_path, &d.chargers_fallback)?;

    let solar = read_series(&solar_path)?;
    check_row_count(&solar_path, solar.len())?;
    check_series_values(&solar_path, "solar_kw", &solar)?;
    warn_on_unit_ceiling(&solar_path, "solar_kw", &solar, d.unit_ceiling_kw);
    warn_on_single_spike(&solar_path, &solar);

    let mall = read_series(&mall_path)?;
    check_row_count(&mall_path, mall.len())?;
    check_series_values(&mall_path, "mall_kw", &mall)?;
    warn_on_unit_ceiling(&mall_path, "mall_kw", &mall, d.unit_ceiling_kw);

    let sockets = read_matrix(&chargers_path)?;
    check_row_count(&chargers_path, sockets.len())?;
    check_socket_values(&chargers_path, &sockets, cfg.chargers.socket_rated_kw)?;

    let ci = if d.co2_path.is_empty() {
        vec![cfg.grid.co2_factor; HOURS_PER_YEAR]
    } else {
        let path = PathBuf::from(&d.co2_path);
        let series = read_series(&path)?;
        check_row_count(&path, series.len())?;
        check_series_values(&path, "grid_co2", &series)?;
        series
    };

    TimeSeriesBundle::new(solar, mall, sockets, ci)
}

/// Two-arm path resolution: primary, then fallback, then failure.
pub fn resolve_path(primary: &str, fallback: &str) -> Result<PathBuf, DataValidationError> {
    if !primary.is_empty() && Path::new(primary).exists() {
        return Ok(PathBuf::from(primary));
    }
    if !fallback.is_empty() && Path::new(fallback).exists() {
        return Ok(PathBuf::from(fallback));
    }
    Err(DataValidationError::Missing {
        primary: primary.to_string(),
        fallback: if fallback.is_empty() {
            "<none>".to_string()
        } else {
            fallback.to_string()
        },
    })
}

/// Reads a single hourly series from a CSV file.
///
/// A leading header row is skipped when its value column does not parse
/// as a number. Rows may carry a leading timestamp column; the value is
/// taken from the last field.
pub fn read_series(path: &Path) -> Result<Vec<f64>, DataValidationError> {
    let file = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_open_error(&file, e))?;

    let mut values = Vec::with_capacity(HOURS_PER_YEAR);
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DataValidationError::Value {
            file: file.clone(),
            row: idx,
            column: "<record>".into(),
            reason: e.to_string(),
        })?;
        let raw = record.iter().last().unwrap_or("").trim();
        match raw.parse::<f64>() {
            Ok(v) => values.push(v),
            Err(_) if idx == 0 => continue, // header row
            Err(_) => {
                return Err(DataValidationError::Value {
                    file,
                    row: idx,
                    column: "value".into(),
                    reason: format!("cannot parse \"{raw}\" as a number"),
                });
            }
        }
    }
    Ok(values)
}

/// Reads the 38-column charger matrix from a CSV file.
///
/// A header row is skipped like in [`read_series`]. A leading timestamp
/// column is detected on the first data row and dropped consistently.
pub fn read_matrix(path: &Path) -> Result<Vec<[f64; SOCKET_COUNT]>, DataValidationError> {
    let file = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_open_error(&file, e))?;

    let mut rows: Vec<[f64; SOCKET_COUNT]> = Vec::with_capacity(HOURS_PER_YEAR);
    let mut skip_first_column: Option<bool> = None;

    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DataValidationError::Value {
            file: file.clone(),
            row: idx,
            column: "<record>".into(),
            reason: e.to_string(),
        })?;
        let fields: Vec<&str> = record.iter().map(str::trim).collect();
        if fields.is_empty() {
            continue;
        }

        // Header detection: a first row whose last field is non-numeric.
        if rows.is_empty()
            && skip_first_column.is_none()
            && fields.last().is_some_and(|f| f.parse::<f64>().is_err())
        {
            continue;
        }

        // Timestamp detection on the first data row, applied uniformly.
        let skip = *skip_first_column
            .get_or_insert_with(|| fields[0].parse::<f64>().is_err() && fields.len() > 1);
        let data = if skip { &fields[1..] } else { &fields[..] };

        if data.len() != SOCKET_COUNT {
            let hint = if data.len() == 128 {
                "; 128-socket files belong to the legacy plaza topology".to_string()
            } else {
                String::new()
            };
            return Err(DataValidationError::ColumnCount {
                file,
                expected: SOCKET_COUNT,
                found: data.len(),
                hint,
            });
        }

        let mut row = [0.0_f64; SOCKET_COUNT];
        for (i, raw) in data.iter().enumerate() {
            row[i] = raw.parse::<f64>().map_err(|_| DataValidationError::Value {
                file: file.clone(),
                row: idx,
                column: format!("socket_{i}"),
                reason: format!("cannot parse \"{raw}\" as a number"),
            })?;
        }
        rows.push(row);
    }
    Ok(rows)
}

fn csv_open_error(file: &str, e: csv::Error) -> DataValidationError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => DataValidationError::Io {
            file: file.to_string(),
            source: io,
        },
        other => DataValidationError::Value {
            file: file.to_string(),
            row: 0,
            column: "<file>".into(),
            reason: format!("{other:?}"),
        },
    }
}

fn check_row_count(path: &Path, found: usize) -> Result<(), DataValidationError> {
    if found != HOURS_PER_YEAR {
        return Err(DataValidationError::RowCount {
            file: path.display().to_string(),
            expected: HOURS_PER_YEAR,
            found,
            hint: row_count_hint(found),
        });
    }
    Ok(())
}

fn check_series_values(
    path: &Path,
    column: &str,
    values: &[f64],
) -> Result<(), DataValidationError> {
    for (row, &v) in values.iter().enumerate() {
        if !v.is_finite() || v < 0.0 {
            return Err(DataValidationError::Value {
                file: path.display().to_string(),
                row,
                column: column.to_string(),
                reason: format!("expected finite non-negative kW, got {v}"),
            });
        }
    }
    Ok(())
}

fn check_socket_values(
    path: &Path,
    rows: &[[f64; SOCKET_COUNT]],
    rated_kw: f64,
) -> Result<(), DataValidationError> {
    for (row, sockets) in rows.iter().enumerate() {
        for (i, &v) in sockets.iter().enumerate() {
            if !v.is_finite() || v < 0.0 || v > rated_kw + RATED_EPS {
                return Err(DataValidationError::Value {
                    file: path.display().to_string(),
                    row,
                    column: format!("socket_{i}"),
                    reason: format!(
                        "expected finite kW in [0, {rated_kw}], got {v}"
                    ),
                });
            }
        }
    }
    Ok(())
}

fn warn_on_unit_ceiling(path: &Path, column: &str, values: &[f64], ceiling_kw: f64) {
    let max = values.iter().copied().fold(0.0_f64, f64::max);
    if max > ceiling_kw {
        tracing::warn!(
            file = %path.display(),
            column,
            max_kw = max,
            ceiling_kw,
            "column maximum exceeds the unit ceiling; check the input is in kW"
        );
    }
}

/// Flags a PV series whose maximum towers over the rest of the year —
/// a likely sensor glitch. The run proceeds; range checks still apply.
fn warn_on_single_spike(path: &Path, values: &[f64]) {
    let mut max = 0.0_f64;
    let mut second = 0.0_f64;
    for &v in values {
        if v > max {
            second = max;
            max = v;
        } else if v > second {
            second = v;
        }
    }
    if second > 0.0 && max > 2.0 * second {
        tracing::warn!(
            file = %path.display(),
            max_kw = max,
            runner_up_kw = second,
            "solar series contains a single anomalous spike; proceeding"
        );
    }
}
