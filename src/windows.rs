//! Period-specific regressions and rolling-window coefficient
//! trajectories. These work on modest subsets (one historical period, one
//! span of yearly aggregates), so they fit in memory and use the dense
//! HC3 estimator directly.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use tracing::{info, warn};

use crate::dense::{fit_dense, slope};
use crate::error::PipelineError;
use crate::results::{PeriodRecord, RollingRecord, TrajectoryRecord};
use crate::source::RowGroupSource;
use crate::transform::Control;
use crate::yearly::{YearlyAggregate, YearlyConfig};

#[derive(Debug, Clone)]
pub struct Period {
    pub label: String,
    pub start: f64,
    pub end: f64,
}

impl Period {
    pub fn new(label: &str, start: f64, end: f64) -> Self {
        Self {
            label: label.to_string(),
            start,
            end,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeriodConfig {
    pub year_col: String,
    /// Raw citation column; `log1p` is applied as the dependent.
    pub dependent: String,
    pub textual_vars: Vec<String>,
    pub controls: Vec<Control>,
    pub periods: Vec<Period>,
}

/// For each period, regress `log1p(dependent)` on each textual variable
/// in turn (plus log controls and an intercept), with HC3 errors and 95%
/// normal confidence intervals. Complete cases are taken jointly over the
/// dependent, all textual variables, and all controls, so every
/// per-variable model within a period shares the same N.
pub fn period_regressions<S>(
    source: &S,
    config: &PeriodConfig,
) -> Result<Vec<PeriodRecord>, PipelineError>
where
    S: RowGroupSource + ?Sized,
{
    let mut read_cols = vec![config.year_col.clone(), config.dependent.clone()];
    read_cols.extend(config.textual_vars.iter().cloned());
    read_cols.extend(config.controls.iter().map(|c| c.raw.clone()));

    // Row layout per period bucket: [DV, textual vars..., log controls...].
    let width = 1 + config.textual_vars.len() + config.controls.len();
    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); config.periods.len()];

    for group in 0..source.num_row_groups() {
        let frame = source.read_row_group(group, &read_cols)?;
        if frame.is_empty() {
            continue;
        }
        let col = |name: &str| {
            frame
                .column(name)
                .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
        };
        let years = col(&config.year_col)?;
        let dep = col(&config.dependent)?;
        let texts: Vec<_> = config
            .textual_vars
            .iter()
            .map(|v| col(v))
            .collect::<Result<_, _>>()?;
        let ctrls: Vec<_> = config
            .controls
            .iter()
            .map(|c| col(&c.raw))
            .collect::<Result<_, _>>()?;

        let mut row = Vec::with_capacity(width);
        'rows: for i in 0..frame.num_rows() {
            let Some(year) = years[i] else { continue };
            let Some(bucket) = config
                .periods
                .iter()
                .position(|p| (p.start..=p.end).contains(&year))
            else {
                continue;
            };

            row.clear();
            match dep[i] {
                Some(v) => row.push(v.ln_1p()),
                None => continue,
            }
            for cells in &texts {
                match cells[i] {
                    Some(v) => row.push(v),
                    None => continue 'rows,
                }
            }
            for cells in &ctrls {
                match cells[i] {
                    Some(v) => row.push(v.ln_1p()),
                    None => continue 'rows,
                }
            }
            if row.iter().all(|v| v.is_finite()) {
                buckets[bucket].extend_from_slice(&row);
            }
        }
    }

    let mut records = Vec::new();
    for (period, data) in config.periods.iter().zip(&buckets) {
        let n = data.len() / width;
        if n == 0 {
            warn!("period {}: no complete observations, skipped", period.label);
            continue;
        }
        info!("period {}: N = {}", period.label, n);
        let rows = DMatrix::from_row_slice(n, width, data);
        let y = DVector::from_iterator(n, rows.column(0).iter().copied());
        let n_ctrl = config.controls.len();

        for (v, var) in config.textual_vars.iter().enumerate() {
            // Design: intercept, this textual variable, the controls.
            let x = DMatrix::from_fn(n, 2 + n_ctrl, |r, c| match c {
                0 => 1.0,
                1 => rows[(r, 1 + v)],
                c => rows[(r, width - n_ctrl + (c - 2))],
            });
            let fit = fit_dense(&x, &y)?;
            records.push(PeriodRecord {
                period: period.label.clone(),
                variable: var.clone(),
                beta: fit.beta[1],
                se: fit.se[1],
                ci_low: fit.beta[1] - 1.96 * fit.se[1],
                ci_high: fit.beta[1] + 1.96 * fit.se[1],
                n: n as u64,
            });
        }
    }
    Ok(records)
}

#[derive(Debug, Clone)]
pub struct TrajectoryConfig {
    pub year_col: String,
    /// Raw citation column; `log1p` is applied as the dependent.
    pub dependent: String,
    pub novelty_col: String,
    pub consolidation_col: String,
    pub combo_col: String,
    pub year_min: i64,
    pub year_max: i64,
    /// Symmetric half-widths in years; a window of `w` spans
    /// `[center − w, center + w]`.
    pub windows: Vec<i64>,
    /// Minimum observations per window.
    pub min_n: usize,
}

/// Effect-size trajectory of textual disruption on citation recognition:
/// for every center year and symmetric window, an HC3 regression of
/// `log1p(dependent)` on textual disruption (novelty minus consolidation)
/// and combinational novelty. Center years run from `year_min + w` up to
/// but not including `year_max − w`, and windows with fewer than `min_n`
/// complete observations are skipped.
///
/// One streaming pass buckets complete cases by publication year; each
/// window then refits in memory from the per-year buckets.
pub fn effect_trajectory<S>(
    source: &S,
    config: &TrajectoryConfig,
) -> Result<Vec<TrajectoryRecord>, PipelineError>
where
    S: RowGroupSource + ?Sized,
{
    let read_cols = vec![
        config.year_col.clone(),
        config.dependent.clone(),
        config.novelty_col.clone(),
        config.consolidation_col.clone(),
        config.combo_col.clone(),
    ];

    // Per-year rows of [log1p(DV), textual disruption, combo novelty].
    let mut by_year: BTreeMap<i64, Vec<[f64; 3]>> = BTreeMap::new();

    for group in 0..source.num_row_groups() {
        let frame = source.read_row_group(group, &read_cols)?;
        if frame.is_empty() {
            continue;
        }
        let col = |name: &str| {
            frame
                .column(name)
                .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
        };
        let years = col(&config.year_col)?;
        let dep = col(&config.dependent)?;
        let nov = col(&config.novelty_col)?;
        let cons = col(&config.consolidation_col)?;
        let combo = col(&config.combo_col)?;

        for i in 0..frame.num_rows() {
            let Some(year) = years[i] else { continue };
            if !year.is_finite()
                || year < config.year_min as f64
                || year > config.year_max as f64
            {
                continue;
            }
            let (Some(dv), Some(zn), Some(zc), Some(cn)) = (dep[i], nov[i], cons[i], combo[i])
            else {
                continue;
            };
            let row = [dv.ln_1p(), zn - zc, cn];
            if row.iter().all(|v| v.is_finite()) {
                by_year.entry(year.trunc() as i64).or_default().push(row);
            }
        }
    }

    let mut records = Vec::new();
    for &w in &config.windows {
        for center in (config.year_min + w)..(config.year_max - w) {
            let rows: Vec<&[f64; 3]> = by_year
                .range(center - w..=center + w)
                .flat_map(|(_, rows)| rows)
                .collect();
            if rows.len() < config.min_n {
                continue;
            }
            let n = rows.len();
            let y = DVector::from_iterator(n, rows.iter().map(|r| r[0]));
            let x = DMatrix::from_fn(n, 3, |r, c| match c {
                0 => 1.0,
                1 => rows[r][1],
                _ => rows[r][2],
            });
            let fit = fit_dense(&x, &y)?;
            records.push(TrajectoryRecord {
                center_year: center,
                window: w,
                beta: fit.beta[1],
                se: fit.se[1],
                n: n as u64,
            });
        }
    }
    Ok(records)
}

#[derive(Debug, Clone)]
pub struct RollingConfig {
    /// Window widths in consecutive aggregate rows (years present).
    pub windows: Vec<usize>,
    /// Minimum total observation count inside a window.
    pub min_n: u64,
}

/// Slopes of `log1p(yearly mean of dep)` on the yearly mean of `x_var`
/// over sliding windows of the aggregate series. Windows with too few
/// underlying observations are skipped.
pub fn rolling_slopes(
    aggregates: &[YearlyAggregate],
    yearly: &YearlyConfig,
    dep: &str,
    x_var: &str,
    config: &RollingConfig,
) -> Result<Vec<RollingRecord>, PipelineError> {
    let index = |name: &str| {
        yearly
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
    };
    let dep_idx = index(dep)?;
    let x_idx = index(x_var)?;

    let mut records = Vec::new();
    for &w in &config.windows {
        if w == 0 || aggregates.len() < w {
            continue;
        }
        for start in 0..=aggregates.len() - w {
            let span = &aggregates[start..start + w];
            if span.iter().map(|a| a.n).sum::<u64>() < config.min_n {
                continue;
            }
            let xs: Vec<f64> = span.iter().map(|a| a.means[x_idx]).collect();
            let ys: Vec<f64> = span.iter().map(|a| a.means[dep_idx].ln_1p()).collect();
            if let Some(coef) = slope(&xs, &ys) {
                records.push(RollingRecord {
                    window: w,
                    start_year: span[0].year,
                    coef,
                });
            }
        }
    }
    Ok(records)
}
