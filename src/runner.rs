//! Episode execution for the built-in policies and replayed traces.

use std::path::Path;

use crate::data::HOURS_PER_YEAR;
use crate::env::{ACTION_DIM, Action, PlazaEnv};
use crate::error::{DataValidationError, PlazaError};
use crate::sim::dispatch::DispatchResult;
use crate::sim::metrics::{EpisodeMetrics, KpiReport};
use crate::sim::reward::RewardComponents;

/// One executed step: the dispatch record plus its reward.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub result: DispatchResult,
    pub reward: f64,
    pub components: RewardComponents,
}

/// Dispatch policy for an episode run.
#[derive(Debug, Clone)]
pub enum Policy {
    /// Pure rule-based dispatch: every action component at 1.
    Baseline,
    /// Battery locked, sockets fully authorized.
    BessOff,
    /// A pre-recorded 8,760 × 39 action trace, replayed verbatim.
    Trace(Vec<Action>),
}

impl Policy {
    /// Resolves a policy identifier: a built-in name or a trace path.
    ///
    /// # Errors
    ///
    /// [`DataValidationError`] if the identifier is a path that cannot
    /// be read as a full-year action trace.
    pub fn resolve(identifier: &str) -> Result<Self, DataValidationError> {
        match identifier {
            "baseline" => Ok(Self::Baseline),
            "bess-off" => Ok(Self::BessOff),
            path => Ok(Self::Trace(load_action_trace(Path::new(path))?)),
        }
    }

    /// Display name for reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::BessOff => "bess-off",
            Self::Trace(_) => "trace",
        }
    }

    /// Action for hour `h`.
    pub fn action(&self, h: usize) -> Action {
        match self {
            Self::Baseline => Action::baseline(),
            Self::BessOff => Action::bess_locked(),
            Self::Trace(actions) => actions[h],
        }
    }
}

/// Loads an 8,760-row × 39-column action trace from a CSV file.
///
/// # Errors
///
/// [`DataValidationError`] on the wrong number of rows or columns, or
/// on values that fail [`Action::from_slice`] validation.
pub fn load_action_trace(path: &Path) -> Result<Vec<Action>, DataValidationError> {
    let file = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| DataValidationError::Io {
            file: file.clone(),
            source: std::io::Error::other(e),
        })?;

    let mut actions = Vec::with_capacity(HOURS_PER_YEAR);
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DataValidationError::Value {
            file: file.clone(),
            row: idx,
            column: "<record>".into(),
            reason: e.to_string(),
        })?;
        let fields: Vec<&str> = record.iter().map(str::trim).collect();
        if idx == 0 && fields.first().is_some_and(|f| f.parse::<f64>().is_err()) {
            continue; // header row
        }
        if fields.len() != ACTION_DIM {
            return Err(DataValidationError::ColumnCount {
                file,
                expected: ACTION_DIM,
                found: fields.len(),
                hint: String::new(),
            });
        }
        let mut raw = [0.0_f64; ACTION_DIM];
        for (i, f) in fields.iter().enumerate() {
            raw[i] = f.parse::<f64>().map_err(|_| DataValidationError::Value {
                file: file.clone(),
                row: idx,
                column: format!("a{i}"),
                reason: format!("cannot parse \"{f}\" as a number"),
            })?;
        }
        let action = Action::from_slice(&raw).map_err(|e| DataValidationError::Value {
            file: file.clone(),
            row: idx,
            column: "<action>".into(),
            reason: e.to_string(),
        })?;
        actions.push(action);
    }

    if actions.len() != HOURS_PER_YEAR {
        return Err(DataValidationError::RowCount {
            file,
            expected: HOURS_PER_YEAR,
            found: actions.len(),
            hint: String::new(),
        });
    }
    Ok(actions)
}

/// A complete executed episode.
#[derive(Debug, Clone)]
pub struct EpisodeOutput {
    pub records: Vec<StepRecord>,
    pub metrics: EpisodeMetrics,
    pub kpi: KpiReport,
}

/// Runs one full year under `policy` and derives the KPI report.
///
/// Unless the policy itself is the battery-locked reference, a second
/// pass with the battery locked supplies the grid-reduction baseline.
///
/// # Errors
///
/// Propagates any dispatch failure; these are fatal and abort the run.
pub fn run_episode(
    env: &mut PlazaEnv,
    policy: &Policy,
    seed: u64,
) -> Result<EpisodeOutput, PlazaError> {
    env.reset(seed);
    let mut records = Vec::with_capacity(HOURS_PER_YEAR);
    for h in 0..HOURS_PER_YEAR {
        let action = policy.action(h);
        let out = env.step(&action)?;
        records.push(StepRecord {
            result: out.result,
            reward: out.reward,
            components: out.components,
        });
    }
    let metrics = env.metrics().clone();

    let reference_import = match policy {
        Policy::BessOff => None,
        _ => {
            let mut reference_env = env.clone();
            reference_env.reset(seed);
            let locked = Action::bess_locked();
            for _ in 0..HOURS_PER_YEAR {
                reference_env.step(&locked)?;
            }
            Some(reference_env.metrics().grid_import_kwh)
        }
    };
    let kpi = KpiReport::from_metrics(&metrics, reference_import);

    Ok(EpisodeOutput {
        records,
        metrics,
        kpi,
    })
}
