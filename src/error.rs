//! Error taxonomy shared across the crate.
//!
//! Every kind is fatal: the core performs no retries and catches none of
//! its own errors. Balance and overflow errors indicate implementation
//! bugs rather than bad inputs, and say so in their messages.

use thiserror::Error;

/// Input-data violation detected by the loader or bundle constructor.
#[derive(Debug, Error)]
pub enum DataValidationError {
    /// File could not be read.
    #[error("data validation: cannot read \"{file}\": {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// Neither the primary nor the fallback path exists.
    #[error("data validation: missing input, tried \"{primary}\" and \"{fallback}\"")]
    Missing { primary: String, fallback: String },

    /// Wrong number of hourly rows.
    #[error("data validation: {file}: expected {expected} hourly rows, found {found}{hint}")]
    RowCount {
        file: String,
        expected: usize,
        found: usize,
        hint: String,
    },

    /// Wrong number of charger columns.
    #[error("data validation: {file}: expected {expected} charger columns, found {found}{hint}")]
    ColumnCount {
        file: String,
        expected: usize,
        found: usize,
        hint: String,
    },

    /// A cell failed a range, finiteness, or parse check.
    #[error("data validation: {file} row {row}, column {column}: {reason}")]
    Value {
        file: String,
        row: usize,
        column: String,
        reason: String,
    },
}

/// Energy-balance residual above tolerance after a dispatch step.
///
/// This never reflects bad input data; it means the cascade arithmetic
/// is wrong and must be fixed, not retried.
#[derive(Debug, Error)]
#[error(
    "dispatch balance violated at hour {hour}: {law} residual {residual:.3e} kWh exceeds {tolerance:.0e}"
)]
pub struct DispatchBalanceError {
    pub hour: usize,
    pub law: &'static str,
    pub residual: f64,
    pub tolerance: f64,
}

/// A BESS transition that would leave SOC outside its bounds.
///
/// Callers must respect `max_charge_in_kwh` / `max_discharge_out_kwh`;
/// hitting this means the dispatch miscalculated a feasible amount.
#[derive(Debug, Error)]
#[error(
    "bess overflow: {direction} of {requested_kwh:.6} kWh at soc {soc_kwh:.6} kWh exceeds feasible {limit_kwh:.6} kWh"
)]
pub struct BessOverflowError {
    pub direction: &'static str,
    pub requested_kwh: f64,
    pub soc_kwh: f64,
    pub limit_kwh: f64,
}

/// Action vector of the wrong shape or containing non-finite values.
#[derive(Debug, Error)]
pub enum ActionShapeError {
    #[error("action shape: expected {expected} components, got {got}")]
    Length { expected: usize, got: usize },
    #[error("action shape: component {index} is not finite ({value})")]
    NonFinite { index: usize, value: f64 },
}

/// Failure inside one dispatch step.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Balance(#[from] DispatchBalanceError),
    #[error(transparent)]
    Bess(#[from] BessOverflowError),
}

/// Top-level error for the binary and the episode runner.
#[derive(Debug, Error)]
pub enum PlazaError {
    #[error(transparent)]
    Data(#[from] DataValidationError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Action(#[from] ActionShapeError),
    #[error("episode already terminated at hour {hour}; call reset before stepping again")]
    EpisodeComplete { hour: usize },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_component() {
        let e = DispatchBalanceError {
            hour: 17,
            law: "pv",
            residual: 2e-5,
            tolerance: 1e-6,
        };
        let msg = e.to_string();
        assert!(msg.contains("hour 17"));
        assert!(msg.contains("pv"));

        let e = BessOverflowError {
            direction: "charge",
            requested_kwh: 500.0,
            soc_kwh: 1900.0,
            limit_kwh: 102.6,
        };
        assert!(e.to_string().contains("charge"));

        let e = ActionShapeError::Length {
            expected: 39,
            got: 12,
        };
        assert!(e.to_string().contains("39"));
    }
}
