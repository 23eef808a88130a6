//! Three-pass streaming OLS with HC3 standard errors.
//!
//! The meta-table is far larger than memory, so the estimator never holds
//! more than one cleaned row group at a time. Pass 1 collects per-column
//! moments for global z-scoring, pass 2 accumulates the normal equations
//! of the standardized design, pass 3 accumulates the HC3 sandwich meat
//! using the fitted coefficients. Each pass re-reads the source through
//! the same [`RegressionSpec`] transform, so row survival is decided by
//! an identical predicate every time.

use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::error::PipelineError;
use crate::source::RowGroupSource;
use crate::transform::RegressionSpec;

/// Floor applied to per-column variances before taking square roots, so
/// floating-point cancellation on near-constant columns cannot produce a
/// negative variance.
pub const VARIANCE_FLOOR: f64 = 1e-12;

/// Pass-1 state: running count, sum, and sum of squares over the cleaned
/// matrix columns (dependent first, then the design columns).
#[derive(Debug, Clone)]
pub struct Moments {
    n: u64,
    sum: DVector<f64>,
    sumsq: DVector<f64>,
}

/// Global per-column moments produced by pass 1, aligned positionally
/// with the cleaned matrix layout.
#[derive(Debug, Clone)]
pub struct ColumnMoments {
    pub n: u64,
    pub mean: DVector<f64>,
    pub std: DVector<f64>,
}

impl Moments {
    pub fn new(dim: usize) -> Self {
        Self {
            n: 0,
            sum: DVector::zeros(dim),
            sumsq: DVector::zeros(dim),
        }
    }

    pub fn update(&mut self, m: &DMatrix<f64>) {
        debug_assert_eq!(m.ncols(), self.sum.len());
        self.n += m.nrows() as u64;
        for (c, col) in m.column_iter().enumerate() {
            self.sum[c] += col.sum();
            self.sumsq[c] += col.norm_squared();
        }
    }

    pub fn finalize(self, dependent: &str) -> Result<ColumnMoments, PipelineError> {
        if self.n == 0 {
            return Err(PipelineError::InsufficientData(dependent.to_string()));
        }
        let n = self.n as f64;
        let mean = self.sum / n;
        let std = self
            .sumsq
            .zip_map(&mean, |sq, m| (sq / n - m * m).max(VARIANCE_FLOOR).sqrt());
        Ok(ColumnMoments {
            n: self.n,
            mean,
            std,
        })
    }
}

/// Pass-2 state: Gram matrix and cross-product of the standardized design
/// (intercept included), plus the standardized response's own moments for
/// the later total-sum-of-squares computation.
struct NormalEquations {
    xtx: DMatrix<f64>,
    xty: DVector<f64>,
    sumy: f64,
    sumy2: f64,
}

/// Pass-2 output held fixed through pass 3.
struct SolvedEquations {
    beta: DVector<f64>,
    xtx_inv: DMatrix<f64>,
    sumy: f64,
    sumy2: f64,
}

impl NormalEquations {
    fn new(dim: usize) -> Self {
        Self {
            xtx: DMatrix::zeros(dim, dim),
            xty: DVector::zeros(dim),
            sumy: 0.0,
            sumy2: 0.0,
        }
    }

    fn update(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) {
        self.xtx += x.transpose() * x;
        self.xty += x.transpose() * y;
        self.sumy += y.sum();
        self.sumy2 += y.norm_squared();
    }

    /// Solve for the coefficients through an SVD pseudo-inverse. A direct
    /// solve would fail on collinear engineered columns (an explanatory
    /// variable and its own year interaction can be nearly proportional);
    /// the pseudo-inverse yields the minimum-norm solution instead.
    fn solve(self) -> Result<SolvedEquations, PipelineError> {
        let svd = self.xtx.svd(true, true);
        let tol = svd.singular_values.max() * 1e-12;
        let xtx_inv = svd.pseudo_inverse(tol).map_err(PipelineError::Linalg)?;
        let beta = &xtx_inv * &self.xty;
        Ok(SolvedEquations {
            beta,
            xtx_inv,
            sumy: self.sumy,
            sumy2: self.sumy2,
        })
    }
}

/// Pass-3 state: HC3 meat matrix and residual sum of squares.
struct RobustCovariance {
    meat: DMatrix<f64>,
    sse: f64,
}

impl RobustCovariance {
    fn new(dim: usize) -> Self {
        Self {
            meat: DMatrix::zeros(dim, dim),
            sse: 0.0,
        }
    }

    fn update(
        &mut self,
        x: &DMatrix<f64>,
        y: &DVector<f64>,
        beta: &DVector<f64>,
        xtx_inv: &DMatrix<f64>,
    ) {
        let e = y - x * beta;
        self.sse += e.norm_squared();

        // Leverage from the row-wise diagonal of the hat matrix:
        // h = rowsum((X · XtX⁻¹) ⊙ X), never the full N×N product.
        let h = (x * xtx_inv).component_mul(x).column_sum();

        let mut xw = x.clone();
        for r in 0..x.nrows() {
            let denom = 1.0 - h[r];
            let w = e[r] * e[r] / (denom * denom);
            // A leverage-saturated row (h ≈ 1) yields a non-finite weight;
            // it contributes nothing rather than poisoning the covariance.
            let w = if w.is_finite() { w } else { 0.0 };
            let mut row = xw.row_mut(r);
            row *= w.sqrt();
        }
        self.meat += xw.transpose() * xw;
    }
}

/// Coefficient table for one fitted model.
#[derive(Debug, Clone)]
pub struct RegressionFit {
    /// "Intercept" followed by the design-column names.
    pub names: Vec<String>,
    pub beta: Vec<f64>,
    pub se: Vec<f64>,
    pub t: Vec<f64>,
    pub p: Vec<f64>,
    pub n: u64,
    pub r2: f64,
}

/// Per-run knobs. `cancel` is polled between row groups; a set flag makes
/// the run return [`PipelineError::Cancelled`] at the next checkpoint.
#[derive(Default)]
pub struct FitOptions<'a> {
    pub cancel: Option<&'a AtomicBool>,
}

fn check_cancelled(cancel: Option<&AtomicBool>) -> Result<(), PipelineError> {
    match cancel {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(PipelineError::Cancelled),
        _ => Ok(()),
    }
}

/// One full traversal: read each row group projected to the spec's raw
/// columns, clean it, and feed the surviving rows to `visit`.
fn traverse<S, F>(
    source: &S,
    spec: &RegressionSpec,
    columns: &[String],
    cancel: Option<&AtomicBool>,
    mut visit: F,
) -> Result<(), PipelineError>
where
    S: RowGroupSource + ?Sized,
    F: FnMut(DMatrix<f64>),
{
    for group in 0..source.num_row_groups() {
        check_cancelled(cancel)?;
        let frame = source.read_row_group(group, columns)?;
        if let Some(cleaned) = spec.clean_group(&frame)? {
            visit(cleaned);
        }
    }
    Ok(())
}

/// Standardize a cleaned group with the global pass-1 moments and split
/// it into a design matrix (leading intercept column) and response.
fn standardize(m: &DMatrix<f64>, moments: &ColumnMoments) -> (DMatrix<f64>, DVector<f64>) {
    let (nrows, ncols) = m.shape();
    let mut x = DMatrix::from_element(nrows, ncols, 1.0);
    let mut y = DVector::zeros(nrows);
    for r in 0..nrows {
        y[r] = (m[(r, 0)] - moments.mean[0]) / moments.std[0];
        for c in 1..ncols {
            x[(r, c)] = (m[(r, c)] - moments.mean[c]) / moments.std[c];
        }
    }
    (x, y)
}

fn two_sided_p(t: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).unwrap();
    2.0 * (1.0 - normal.cdf(t.abs()))
}

/// Fit one model with three sequential passes over the source. Every call
/// owns its accumulators outright, so independent (dependent, variable
/// set) pairs can run concurrently against the same source.
pub fn fit_streaming<S>(
    source: &S,
    spec: &RegressionSpec,
    options: &FitOptions,
) -> Result<RegressionFit, PipelineError>
where
    S: RowGroupSource + ?Sized,
{
    let columns = spec.read_columns();
    let dim = spec.dim();

    let mut moments = Moments::new(dim);
    traverse(source, spec, &columns, options.cancel, |m| {
        moments.update(&m)
    })?;
    let moments = moments.finalize(&spec.dependent)?;
    debug!(
        "moments pass done for `{}`: n={} k={}",
        spec.dependent, moments.n, dim
    );

    let mut equations = NormalEquations::new(dim);
    traverse(source, spec, &columns, options.cancel, |m| {
        let (x, y) = standardize(&m, &moments);
        equations.update(&x, &y);
    })?;
    let solved = equations.solve()?;
    debug!("normal-equations pass done for `{}`", spec.dependent);

    let mut robust = RobustCovariance::new(dim);
    traverse(source, spec, &columns, options.cancel, |m| {
        let (x, y) = standardize(&m, &moments);
        robust.update(&x, &y, &solved.beta, &solved.xtx_inv);
    })?;
    debug!("robust-covariance pass done for `{}`", spec.dependent);

    let n = moments.n as f64;
    let ybar = solved.sumy / n;
    let tss = solved.sumy2 - n * ybar * ybar;
    let r2 = 1.0 - robust.sse / tss;

    let cov = &solved.xtx_inv * &robust.meat * &solved.xtx_inv;
    let mut names = vec!["Intercept".to_string()];
    names.extend(spec.design_columns());

    let mut beta = Vec::with_capacity(dim);
    let mut se = Vec::with_capacity(dim);
    let mut t = Vec::with_capacity(dim);
    let mut p = Vec::with_capacity(dim);
    for i in 0..dim {
        let b = solved.beta[i];
        let s = cov[(i, i)].max(0.0).sqrt();
        let ti = b / s;
        beta.push(b);
        se.push(s);
        t.push(ti);
        p.push(two_sided_p(ti));
    }

    Ok(RegressionFit {
        names,
        beta,
        se,
        t,
        p,
        n: moments.n,
        r2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::source::VecSource;
    use crate::transform::{Control, RegressionSpec};
    use approx::assert_relative_eq;
    use std::sync::atomic::AtomicBool;

    fn spec() -> RegressionSpec {
        RegressionSpec {
            year_col: "year".into(),
            year_min: 1900.0,
            year_max: 2021.0,
            year_center: 1980.0,
            dependent: "cites".into(),
            log_dependent: true,
            explanatory: vec!["nov".into()],
            controls: vec![Control::new("team", "ctrl_team")],
        }
    }

    fn group(rows: &[(f64, f64, f64, f64)]) -> Frame {
        Frame::from_columns([
            ("year", rows.iter().map(|r| Some(r.0)).collect::<Vec<_>>()),
            ("cites", rows.iter().map(|r| Some(r.1)).collect::<Vec<_>>()),
            ("nov", rows.iter().map(|r| Some(r.2)).collect::<Vec<_>>()),
            ("team", rows.iter().map(|r| Some(r.3)).collect::<Vec<_>>()),
        ])
    }

    #[test]
    fn moments_match_direct_computation() {
        let mut acc = Moments::new(2);
        acc.update(&DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]));
        acc.update(&DMatrix::from_row_slice(1, 2, &[5.0, 6.0]));
        let m = acc.finalize("y").unwrap();
        assert_eq!(m.n, 3);
        assert_relative_eq!(m.mean[0], 3.0);
        assert_relative_eq!(m.mean[1], 4.0);
        // Population std of {1,3,5} and {2,4,6}.
        assert_relative_eq!(m.std[0], (8.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(m.std[1], (8.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn constant_column_gets_floored_variance() {
        let mut acc = Moments::new(1);
        acc.update(&DMatrix::from_row_slice(3, 1, &[7.0, 7.0, 7.0]));
        let m = acc.finalize("y").unwrap();
        assert!(m.std[0] >= VARIANCE_FLOOR.sqrt());
        assert!(m.std[0].is_finite());
    }

    #[test]
    fn empty_source_signals_insufficient_data() {
        let source = VecSource::new(vec![group(&[(1850.0, 1.0, 0.5, 2.0)])]);
        let err = fit_streaming(&source, &spec(), &FitOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData(_)));
    }

    #[test]
    fn cancellation_is_observed_between_groups() {
        let source = VecSource::new(vec![group(&[(1990.0, 1.0, 0.5, 2.0)])]);
        let flag = AtomicBool::new(true);
        let options = FitOptions {
            cancel: Some(&flag),
        };
        let err = fit_streaming(&source, &spec(), &options).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn fit_emits_one_row_per_design_column_plus_intercept() {
        let rows: Vec<(f64, f64, f64, f64)> = (0..60)
            .map(|i| {
                let x = (i as f64 % 11.0) - 5.0;
                (
                    1950.0 + (i % 40) as f64,
                    (2.0 + 0.3 * x).exp(),
                    x,
                    1.0 + (i % 7) as f64,
                )
            })
            .collect();
        let source = VecSource::new(vec![group(&rows[..30]), group(&rows[30..])]);
        let fit = fit_streaming(&source, &spec(), &FitOptions::default()).unwrap();
        assert_eq!(fit.names.len(), spec().dim());
        assert_eq!(fit.names[0], "Intercept");
        assert_eq!(fit.n, 60);
        assert!(fit.r2.is_finite());
        assert!(fit.se.iter().all(|s| s.is_finite() && *s >= 0.0));
    }
}
