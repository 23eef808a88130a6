use std::fs::File;
use std::path::Path;

use serde::Serialize;

use crate::streaming::RegressionFit;

/// One row of the regression output table. Field names and order are the
/// downstream contract; serde serializes them verbatim into the CSV header.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    #[serde(rename = "Dependent")]
    pub dependent: String,
    #[serde(rename = "Model")]
    pub model: String,
    #[serde(rename = "Variable")]
    pub variable: String,
    #[serde(rename = "Coef")]
    pub coef: f64,
    #[serde(rename = "SE")]
    pub se: f64,
    #[serde(rename = "t")]
    pub t: f64,
    #[serde(rename = "p")]
    pub p: f64,
    #[serde(rename = "N")]
    pub n: u64,
    #[serde(rename = "R2")]
    pub r2: f64,
}

impl ResultRecord {
    /// Expand a fit into tidy rows, one per coefficient, each carrying the
    /// model-level N and R².
    pub fn from_fit(dependent: &str, model: &str, fit: &RegressionFit) -> Vec<ResultRecord> {
        fit.names
            .iter()
            .enumerate()
            .map(|(i, name)| ResultRecord {
                dependent: dependent.to_string(),
                model: model.to_string(),
                variable: name.clone(),
                coef: fit.beta[i],
                se: fit.se[i],
                t: fit.t[i],
                p: fit.p[i],
                n: fit.n,
                r2: fit.r2,
            })
            .collect()
    }
}

/// Period-regression output row (Figure 3).
#[derive(Debug, Clone, Serialize)]
pub struct PeriodRecord {
    #[serde(rename = "Period")]
    pub period: String,
    #[serde(rename = "Variable")]
    pub variable: String,
    #[serde(rename = "Beta")]
    pub beta: f64,
    #[serde(rename = "SE")]
    pub se: f64,
    #[serde(rename = "CI_low")]
    pub ci_low: f64,
    #[serde(rename = "CI_high")]
    pub ci_high: f64,
    #[serde(rename = "N")]
    pub n: u64,
}

/// Effect-size trajectory row (Extended Data Fig. 3): one symmetric
/// rolling-window HC3 estimate, keyed by center year.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryRecord {
    pub center_year: i64,
    pub window: i64,
    pub beta: f64,
    pub se: f64,
    pub n: u64,
}

/// Rolling-window output row (Figure 4).
#[derive(Debug, Clone, Serialize)]
pub struct RollingRecord {
    #[serde(rename = "Window")]
    pub window: usize,
    #[serde(rename = "StartYear")]
    pub start_year: i64,
    #[serde(rename = "Coef")]
    pub coef: f64,
}

pub fn write_csv<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_carry_model_level_n_and_r2() {
        let fit = RegressionFit {
            names: vec!["Intercept".into(), "Z_novelty".into()],
            beta: vec![0.0, 0.5],
            se: vec![0.1, 0.02],
            t: vec![0.0, 25.0],
            p: vec![1.0, 0.0],
            n: 123,
            r2: 0.4,
        };
        let rows = ResultRecord::from_fit("sci_C10", "Generative", &fit);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.n == 123 && r.r2 == 0.4));
        assert_eq!(rows[1].variable, "Z_novelty");
    }

    #[test]
    fn csv_header_matches_downstream_contract() {
        let record = ResultRecord {
            dependent: "sci_C10".into(),
            model: "Generative".into(),
            variable: "Intercept".into(),
            coef: 0.0,
            se: 0.1,
            t: 0.0,
            p: 1.0,
            n: 10,
            r2: 0.2,
        };
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(&record).unwrap();
        let data = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(data.starts_with("Dependent,Model,Variable,Coef,SE,t,p,N,R2\n"));
    }
}
