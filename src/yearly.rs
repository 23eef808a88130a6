//! Streaming per-year mean aggregation over the meta-table.
//!
//! Feeds the temporal-trend figure and the rolling-window analysis. One
//! pass, one row group in memory at a time.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use crate::error::PipelineError;
use crate::source::RowGroupSource;

#[derive(Debug, Clone)]
pub struct YearlyConfig {
    pub year_col: String,
    /// Columns to average per year.
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct YearlyAggregate {
    pub year: i64,
    /// Number of rows observed for this year, regardless of which value
    /// cells were present.
    pub n: u64,
    /// Per-column means, aligned with [`YearlyConfig::columns`]. Sums run
    /// over non-missing cells but the divisor is the year's full row
    /// count, matching the production aggregation.
    pub means: Vec<f64>,
}

pub fn aggregate_yearly<S>(
    source: &S,
    config: &YearlyConfig,
) -> Result<Vec<YearlyAggregate>, PipelineError>
where
    S: RowGroupSource + ?Sized,
{
    let mut read_cols = vec![config.year_col.clone()];
    read_cols.extend(config.columns.iter().cloned());

    let mut sums: BTreeMap<i64, (u64, Vec<f64>)> = BTreeMap::new();

    for group in 0..source.num_row_groups() {
        let frame = source.read_row_group(group, &read_cols)?;
        if frame.is_empty() {
            continue;
        }
        let years = frame
            .column(&config.year_col)
            .ok_or_else(|| PipelineError::MissingColumn(config.year_col.clone()))?;
        let value_cols: Vec<&[Option<f64>]> = config
            .columns
            .iter()
            .map(|c| {
                frame
                    .column(c)
                    .ok_or_else(|| PipelineError::MissingColumn(c.clone()))
            })
            .collect::<Result<_, _>>()?;

        for i in 0..frame.num_rows() {
            let Some(year) = years[i] else { continue };
            if !year.is_finite() {
                continue;
            }
            let entry = sums
                .entry(year.trunc() as i64)
                .or_insert_with(|| (0, vec![0.0; config.columns.len()]));
            entry.0 += 1;
            for (c, cells) in value_cols.iter().enumerate() {
                if let Some(v) = cells[i] {
                    entry.1[c] += v;
                }
            }
        }
    }

    Ok(sums
        .into_iter()
        .map(|(year, (n, totals))| YearlyAggregate {
            year,
            n,
            means: totals.into_iter().map(|s| s / n as f64).collect(),
        })
        .collect())
}

fn write_aggregates(
    path: &Path,
    config: &YearlyConfig,
    aggregates: &[YearlyAggregate],
    with_counts: bool,
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    let mut header = vec!["year".to_string()];
    if with_counts {
        header.push("N".to_string());
    }
    header.extend(config.columns.iter().cloned());
    writer.write_record(&header)?;
    for agg in aggregates {
        let mut row = vec![agg.year.to_string()];
        if with_counts {
            row.push(agg.n.to_string());
        }
        row.extend(agg.means.iter().map(|m| m.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// The temporal-trend table: `year` followed by the value columns only.
pub fn write_yearly_csv(
    path: &Path,
    config: &YearlyConfig,
    aggregates: &[YearlyAggregate],
) -> anyhow::Result<()> {
    write_aggregates(path, config, aggregates, false)
}

/// Rolling-window input table: like [`write_yearly_csv`] but with an `N`
/// column after `year`, which the window threshold needs.
pub fn write_yearly_counts_csv(
    path: &Path,
    config: &YearlyConfig,
    aggregates: &[YearlyAggregate],
) -> anyhow::Result<()> {
    write_aggregates(path, config, aggregates, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::source::VecSource;

    #[test]
    fn yearly_means_divide_by_year_row_count() {
        let source = VecSource::new(vec![
            Frame::from_columns([
                ("year", vec![Some(2000.0), Some(2000.0), Some(2001.0)]),
                ("v", vec![Some(2.0), None, Some(5.0)]),
            ]),
            Frame::from_columns([
                ("year", vec![Some(2000.0), None]),
                ("v", vec![Some(4.0), Some(9.0)]),
            ]),
        ]);
        let config = YearlyConfig {
            year_col: "year".into(),
            columns: vec!["v".into()],
        };
        let aggs = aggregate_yearly(&source, &config).unwrap();
        assert_eq!(aggs.len(), 2);
        // Year 2000: three rows, sum over the two present cells = 6.
        assert_eq!(aggs[0].year, 2000);
        assert_eq!(aggs[0].n, 3);
        assert!((aggs[0].means[0] - 2.0).abs() < 1e-12);
        assert_eq!(aggs[1].year, 2001);
        assert_eq!(aggs[1].n, 1);
    }

    #[test]
    fn yearly_csv_has_no_count_column() {
        let config = YearlyConfig {
            year_col: "year".into(),
            columns: vec!["v".into(), "w".into()],
        };
        let aggs = vec![YearlyAggregate {
            year: 1999,
            n: 4,
            means: vec![1.5, -0.5],
        }];
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("yearly.csv");
        write_yearly_csv(&plain, &config, &aggs).unwrap();
        let text = std::fs::read_to_string(&plain).unwrap();
        assert!(text.starts_with("year,v,w\n"));
        assert!(text.contains("1999,1.5,-0.5"));

        let counted = dir.path().join("yearly_counts.csv");
        write_yearly_counts_csv(&counted, &config, &aggs).unwrap();
        let text = std::fs::read_to_string(&counted).unwrap();
        assert!(text.starts_with("year,N,v,w\n"));
        assert!(text.contains("1999,4,1.5,-0.5"));
    }
}
