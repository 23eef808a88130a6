//! Paper model configuration and the batch runner for the streaming
//! regression tables.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::results::ResultRecord;
use crate::source::RowGroupSource;
use crate::streaming::{fit_streaming, FitOptions};
use crate::transform::{Control, RegressionSpec};
use crate::windows::Period;

pub const YEAR_COL: &str = "sci_Year";
pub const DEFAULT_YEAR_MIN: f64 = 1900.0;
pub const DEFAULT_YEAR_MAX: f64 = 2021.0;
pub const YEAR_CENTER: f64 = 1980.0;

/// A dependent variable as it appears in the output tables. Result rows
/// carry the meta-table column name in their `Dependent` field.
#[derive(Debug, Clone)]
pub struct DependentVar {
    /// Meta-table column.
    pub column: String,
    /// Citation-count-like dependents get `log1p`; disruption scores do not.
    pub log_transform: bool,
}

impl DependentVar {
    fn new(column: &str, log_transform: bool) -> Self {
        Self {
            column: column.to_string(),
            log_transform,
        }
    }
}

/// The three dependents, in table order: long-run citations (Table 1),
/// the alternative citation window (Extended Data Table 1), and
/// disruption (Extended Data Table 2).
pub fn dependent_map() -> Vec<DependentVar> {
    vec![
        DependentVar::new("sci_C10", true),
        DependentVar::new("sci_Citation_Count", true),
        DependentVar::new("sci_Disruption", false),
    ]
}

pub fn generative_vars() -> Vec<String> {
    vec!["Z_novelty".into(), "Z_consolidation".into()]
}

pub fn performative_vars() -> Vec<String> {
    vec!["textual_disruption".into(), "combo_novelty".into()]
}

pub fn default_controls() -> Vec<Control> {
    vec![
        Control::new("sci_Team_Size", "ctrl_team"),
        Control::new("sci_Institution_Count", "ctrl_inst"),
        Control::new("sci_Reference_Count", "ctrl_refs"),
    ]
}

pub fn default_periods() -> Vec<Period> {
    vec![
        Period::new("1900–1945", 1900.0, 1945.0),
        Period::new("1946–1980", 1946.0, 1980.0),
        Period::new("1981–2000", 1981.0, 2000.0),
        Period::new("2001–2021", 2001.0, 2021.0),
    ]
}

/// One (dependent, explanatory-set) pair of the batch.
#[derive(Debug, Clone)]
pub struct ModelRun {
    pub dependent: DependentVar,
    pub model: String,
    pub explanatory: Vec<String>,
}

/// The six models behind Table 1 and Extended Data Tables 1–2: each
/// dependent crossed with the generative and performative variable sets.
pub fn paper_runs() -> Vec<ModelRun> {
    let mut runs = Vec::new();
    for dep in dependent_map() {
        runs.push(ModelRun {
            dependent: dep.clone(),
            model: "Generative".to_string(),
            explanatory: generative_vars(),
        });
        runs.push(ModelRun {
            dependent: dep,
            model: "Performative".to_string(),
            explanatory: performative_vars(),
        });
    }
    runs
}

pub fn spec_for(run: &ModelRun, year_min: f64, year_max: f64) -> RegressionSpec {
    RegressionSpec {
        year_col: YEAR_COL.to_string(),
        year_min,
        year_max,
        year_center: YEAR_CENTER,
        dependent: run.dependent.column.clone(),
        log_dependent: run.dependent.log_transform,
        explanatory: run.explanatory.clone(),
        controls: default_controls(),
    }
}

/// Run every model against the same source. Runs are independent, so they
/// execute in parallel, each with its own accumulators and traversals. A
/// run that fails (most commonly: nothing survives filtering) is logged
/// and omitted; it never takes the rest of the batch down. `on_done` is
/// invoked once per finished run, for progress reporting.
pub fn run_batch<S, F>(
    source: &S,
    runs: &[ModelRun],
    year_min: f64,
    year_max: f64,
    on_done: F,
) -> Vec<ResultRecord>
where
    S: RowGroupSource + ?Sized,
    F: Fn() + Sync,
{
    runs.par_iter()
        .map(|run| {
            let spec = spec_for(run, year_min, year_max);
            let records = match fit_streaming(source, &spec, &FitOptions::default()) {
                Ok(fit) => {
                    info!(
                        "{} / {}: N = {}, R2 = {:.4}",
                        run.dependent.column, run.model, fit.n, fit.r2
                    );
                    ResultRecord::from_fit(&run.dependent.column, &run.model, &fit)
                }
                Err(err) => {
                    warn!(
                        "skipping {} / {}: {}",
                        run.dependent.column, run.model, err
                    );
                    Vec::new()
                }
            };
            on_done();
            records
        })
        .flatten()
        .collect()
}
