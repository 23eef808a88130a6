use nalgebra::DMatrix;

use crate::error::PipelineError;
use crate::frame::Frame;

/// A raw control column and the name of its `log1p`-transformed version.
#[derive(Debug, Clone)]
pub struct Control {
    pub raw: String,
    pub name: String,
}

impl Control {
    pub fn new(raw: &str, name: &str) -> Self {
        Self {
            raw: raw.to_string(),
            name: name.to_string(),
        }
    }
}

/// Everything one streaming regression needs to turn a raw row group into
/// cleaned design rows. The same spec instance drives all three passes,
/// which is what keeps the complete-case filter identical across them.
#[derive(Debug, Clone)]
pub struct RegressionSpec {
    pub year_col: String,
    pub year_min: f64,
    pub year_max: f64,
    pub year_center: f64,
    /// Column holding the dependent variable.
    pub dependent: String,
    /// `log1p` the dependent (citation-count-like) or pass it through
    /// (disruption-score-like).
    pub log_dependent: bool,
    pub explanatory: Vec<String>,
    pub controls: Vec<Control>,
}

impl RegressionSpec {
    /// Raw columns to request from the source: year, dependent,
    /// explanatory variables, and raw controls, deduplicated.
    pub fn read_columns(&self) -> Vec<String> {
        let mut cols = vec![self.year_col.clone(), self.dependent.clone()];
        for v in &self.explanatory {
            cols.push(v.clone());
        }
        for c in &self.controls {
            cols.push(c.raw.clone());
        }
        let mut seen = Vec::new();
        cols.retain(|c| {
            if seen.contains(c) {
                false
            } else {
                seen.push(c.clone());
                true
            }
        });
        cols
    }

    /// The regressor columns, in the order they occupy the design matrix:
    /// explanatory variables, centered year, log controls, then the
    /// explanatory-by-year interactions. This order is part of the
    /// cross-pass contract and must never vary between passes.
    pub fn design_columns(&self) -> Vec<String> {
        let mut cols = self.explanatory.clone();
        cols.push("Year_c".to_string());
        for c in &self.controls {
            cols.push(c.name.clone());
        }
        for v in &self.explanatory {
            cols.push(format!("{v}_x_year"));
        }
        cols
    }

    /// Number of regression parameters: intercept plus design columns.
    pub fn dim(&self) -> usize {
        1 + self.design_columns().len()
    }

    /// Clean one row group into a dense matrix whose first column is the
    /// (possibly log-transformed) dependent and whose remaining columns
    /// follow [`design_columns`](Self::design_columns) order.
    ///
    /// Rows are kept only if the year lies in `[year_min, year_max]` and
    /// every retained cell is present and finite. `log1p` of a negative
    /// control yields NaN and the row falls to the complete-case drop.
    /// Returns `Ok(None)` when nothing survives.
    pub fn clean_group(&self, frame: &Frame) -> Result<Option<DMatrix<f64>>, PipelineError> {
        if frame.is_empty() {
            return Ok(None);
        }

        let col = |name: &str| {
            frame
                .column(name)
                .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
        };

        let years = col(&self.year_col)?;
        let dep = col(&self.dependent)?;
        let xs: Vec<&[Option<f64>]> = self
            .explanatory
            .iter()
            .map(|v| col(v))
            .collect::<Result<_, _>>()?;
        let ctrls: Vec<&[Option<f64>]> = self
            .controls
            .iter()
            .map(|c| col(&c.raw))
            .collect::<Result<_, _>>()?;

        let width = 1 + self.design_columns().len();
        let mut data: Vec<f64> = Vec::new();
        let mut row: Vec<f64> = Vec::with_capacity(width);

        for i in 0..frame.num_rows() {
            let Some(year) = years[i] else { continue };
            if !(self.year_min..=self.year_max).contains(&year) {
                continue;
            }
            let year_c = year - self.year_center;

            row.clear();
            let y = match dep[i] {
                Some(v) if self.log_dependent => v.ln_1p(),
                Some(v) => v,
                None => continue,
            };
            row.push(y);
            for x in &xs {
                match x[i] {
                    Some(v) => row.push(v),
                    None => break,
                }
            }
            if row.len() != 1 + xs.len() {
                continue;
            }
            row.push(year_c);
            for c in &ctrls {
                match c[i] {
                    Some(v) => row.push(v.ln_1p()),
                    None => break,
                }
            }
            if row.len() != 2 + xs.len() + ctrls.len() {
                continue;
            }
            for x in &xs {
                // Present by the check above.
                row.push(x[i].unwrap_or(f64::NAN) * year_c);
            }

            if row.iter().all(|v| v.is_finite()) {
                data.extend_from_slice(&row);
            }
        }

        if data.is_empty() {
            return Ok(None);
        }
        let nrows = data.len() / width;
        Ok(Some(DMatrix::from_row_slice(nrows, width, &data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn spec() -> RegressionSpec {
        RegressionSpec {
            year_col: "sci_Year".into(),
            year_min: 1900.0,
            year_max: 2021.0,
            year_center: 1980.0,
            dependent: "sci_C10".into(),
            log_dependent: true,
            explanatory: vec!["Z_novelty".into()],
            controls: vec![Control::new("sci_Team_Size", "ctrl_team")],
        }
    }

    fn frame(rows: &[(Option<f64>, Option<f64>, Option<f64>, Option<f64>)]) -> Frame {
        Frame::from_columns([
            ("sci_Year", rows.iter().map(|r| r.0).collect::<Vec<_>>()),
            ("sci_C10", rows.iter().map(|r| r.1).collect::<Vec<_>>()),
            ("Z_novelty", rows.iter().map(|r| r.2).collect::<Vec<_>>()),
            ("sci_Team_Size", rows.iter().map(|r| r.3).collect::<Vec<_>>()),
        ])
    }

    #[test]
    fn design_column_order_is_stable() {
        let spec = spec();
        assert_eq!(
            spec.design_columns(),
            vec!["Z_novelty", "Year_c", "ctrl_team", "Z_novelty_x_year"]
        );
        assert_eq!(spec.dim(), 5);
    }

    #[test]
    fn transforms_and_interactions_are_applied() {
        let m = spec()
            .clean_group(&frame(&[(
                Some(1990.0),
                Some(9.0),
                Some(2.0),
                Some(3.0),
            )]))
            .unwrap()
            .unwrap();
        assert_eq!(m.nrows(), 1);
        assert!((m[(0, 0)] - 10.0_f64.ln()).abs() < 1e-12); // log1p(9)
        assert_eq!(m[(0, 1)], 2.0); // Z_novelty untouched
        assert_eq!(m[(0, 2)], 10.0); // Year_c
        assert!((m[(0, 3)] - 4.0_f64.ln()).abs() < 1e-12); // log1p(3)
        assert_eq!(m[(0, 4)], 20.0); // interaction
    }

    #[test]
    fn year_bounds_are_inclusive() {
        let rows = [
            (Some(1899.0), Some(1.0), Some(0.0), Some(1.0)),
            (Some(1900.0), Some(1.0), Some(0.0), Some(1.0)),
            (Some(2021.0), Some(1.0), Some(0.0), Some(1.0)),
            (Some(2022.0), Some(1.0), Some(0.0), Some(1.0)),
            (None, Some(1.0), Some(0.0), Some(1.0)),
        ];
        let m = spec().clean_group(&frame(&rows)).unwrap().unwrap();
        assert_eq!(m.nrows(), 2);
    }

    #[test]
    fn rows_with_any_missing_design_cell_are_dropped() {
        let rows = [
            (Some(1990.0), None, Some(0.0), Some(1.0)),
            (Some(1990.0), Some(1.0), None, Some(1.0)),
            (Some(1990.0), Some(1.0), Some(0.0), None),
            (Some(1990.0), Some(1.0), Some(0.0), Some(1.0)),
        ];
        let m = spec().clean_group(&frame(&rows)).unwrap().unwrap();
        assert_eq!(m.nrows(), 1);
    }

    #[test]
    fn negative_control_becomes_nan_and_is_dropped() {
        let rows = [(Some(1990.0), Some(1.0), Some(0.0), Some(-2.0))];
        assert!(spec().clean_group(&frame(&rows)).unwrap().is_none());
    }

    #[test]
    fn disruption_dependent_passes_through() {
        let mut spec = spec();
        spec.dependent = "sci_C10".into();
        spec.log_dependent = false;
        let m = spec
            .clean_group(&frame(&[(Some(1990.0), Some(-0.4), Some(0.0), Some(1.0))]))
            .unwrap()
            .unwrap();
        assert_eq!(m[(0, 0)], -0.4);
    }

    #[test]
    fn absent_column_is_reported() {
        let frame = Frame::from_columns([("sci_Year", vec![Some(1990.0)])]);
        assert!(matches!(
            spec().clean_group(&frame),
            Err(PipelineError::MissingColumn(_))
        ));
    }
}
