//! In-memory OLS with HC3 standard errors, for designs that fit in RAM.
//!
//! Backs the period-specific and rolling-window drivers, whose per-subset
//! sample sizes are modest, and serves as the reference implementation the
//! streaming estimator is tested against.

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::PipelineError;

/// Fit of `y` on a design matrix `x` whose columns are already final
/// (include an intercept column explicitly if one is wanted).
#[derive(Debug, Clone)]
pub struct DenseFit {
    pub beta: Vec<f64>,
    pub se: Vec<f64>,
    pub t: Vec<f64>,
    pub p: Vec<f64>,
    pub n: usize,
    pub r2: f64,
}

pub fn fit_dense(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<DenseFit, PipelineError> {
    let n = x.nrows();
    let k = x.ncols();

    let xtx = x.transpose() * x;
    let xty = x.transpose() * y;
    let svd = xtx.svd(true, true);
    let tol = svd.singular_values.max() * 1e-12;
    let xtx_inv = svd.pseudo_inverse(tol).map_err(PipelineError::Linalg)?;
    let beta = &xtx_inv * xty;

    let e = y - x * &beta;
    let sse = e.norm_squared();
    let ybar = y.sum() / n as f64;
    let tss = y.norm_squared() - n as f64 * ybar * ybar;

    let h = (x * &xtx_inv).component_mul(x).column_sum();
    let mut xw = x.clone();
    for r in 0..n {
        let denom = 1.0 - h[r];
        let w = e[r] * e[r] / (denom * denom);
        let w = if w.is_finite() { w } else { 0.0 };
        let mut row = xw.row_mut(r);
        row *= w.sqrt();
    }
    let meat = xw.transpose() * &xw;
    let cov = &xtx_inv * meat * &xtx_inv;

    let normal = Normal::new(0.0, 1.0).unwrap();
    let mut out = DenseFit {
        beta: Vec::with_capacity(k),
        se: Vec::with_capacity(k),
        t: Vec::with_capacity(k),
        p: Vec::with_capacity(k),
        n,
        r2: 1.0 - sse / tss,
    };
    for i in 0..k {
        let b = beta[i];
        let s = cov[(i, i)].max(0.0).sqrt();
        let ti = b / s;
        out.beta.push(b);
        out.se.push(s);
        out.t.push(ti);
        out.p.push(2.0 * (1.0 - normal.cdf(ti.abs())));
    }
    Ok(out)
}

/// Plain OLS slope of `y` on a single regressor plus intercept. The
/// rolling-window trajectories only need the coefficient, not inference.
pub fn slope(x: &[f64], y: &[f64]) -> Option<f64> {
    debug_assert_eq!(x.len(), y.len());
    let n = x.len() as f64;
    if x.len() < 2 {
        return None;
    }
    let xbar = x.iter().sum::<f64>() / n;
    let ybar = y.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|v| (v - xbar) * (v - xbar)).sum();
    let sxy: f64 = x
        .iter()
        .zip(y)
        .map(|(xv, yv)| (xv - xbar) * (yv - ybar))
        .sum();
    if sxx == 0.0 {
        return None;
    }
    Some(sxy / sxx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn exact_line_is_recovered_perfectly() {
        // y = 2 + 3x, no noise: beta exact, R² = 1.
        let xs = [-2.0, -1.0, 0.0, 1.0, 2.0, 3.0];
        let x = DMatrix::from_fn(xs.len(), 2, |r, c| if c == 0 { 1.0 } else { xs[r] });
        let y = DVector::from_iterator(xs.len(), xs.iter().map(|v| 2.0 + 3.0 * v));
        let fit = fit_dense(&x, &y).unwrap();
        assert_relative_eq!(fit.beta[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(fit.beta[1], 3.0, epsilon = 1e-10);
        assert_relative_eq!(fit.r2, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn duplicate_columns_fit_without_failing() {
        // x duplicated exactly: XtX is singular, the pseudo-inverse still
        // returns a finite minimum-norm split of the effect.
        let xs = [0.5, 1.5, -0.5, 2.0, -1.0, 0.0, 1.0];
        let x = DMatrix::from_fn(xs.len(), 3, |r, c| if c == 0 { 1.0 } else { xs[r] });
        let y = DVector::from_iterator(xs.len(), xs.iter().map(|v| 1.0 + 2.0 * v));
        let fit = fit_dense(&x, &y).unwrap();
        assert!(fit.beta.iter().all(|b| b.is_finite()));
        // The two clones share the slope.
        assert_relative_eq!(fit.beta[1] + fit.beta[2], 2.0, epsilon = 1e-8);
    }

    #[test]
    fn slope_matches_closed_form() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert_relative_eq!(slope(&x, &y).unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn slope_degenerates_to_none() {
        assert!(slope(&[1.0], &[2.0]).is_none());
        assert!(slope(&[3.0, 3.0], &[1.0, 2.0]).is_none());
    }
}
