use std::fs::create_dir_all;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use textinno::models::{self, paper_runs, run_batch};
use textinno::results::write_csv;
use textinno::source::ParquetSource;
use textinno::windows::{
    effect_trajectory, period_regressions, rolling_slopes, PeriodConfig, RollingConfig,
    TrajectoryConfig,
};
use textinno::yearly::{aggregate_yearly, write_yearly_counts_csv, write_yearly_csv, YearlyConfig};
use textinno::RowGroupSource;

#[derive(Parser)]
#[command(name = "textinno")]
#[command(about = "Textual innovation and citation outcomes: streaming analyses over the meta-table")]
struct Cli {
    /// Path to the unified meta-table Parquet file
    #[arg(short, long, default_value = "meta_table.parquet")]
    meta_table: String,

    /// Output directory for tables and aggregates
    #[arg(short, long, default_value = "./tables_output")]
    out_dir: String,

    /// Analyses to run (comma-separated: tables,yearly,periods,rolling,trajectory)
    #[arg(short, long, default_value = "tables,yearly,periods,rolling,trajectory")]
    analyses: String,

    /// Number of parallel workers (default: all cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Inclusive lower publication-year bound for the streaming models
    #[arg(long, default_value_t = models::DEFAULT_YEAR_MIN)]
    year_min: f64,

    /// Inclusive upper publication-year bound for the streaming models
    #[arg(long, default_value_t = models::DEFAULT_YEAR_MAX)]
    year_max: f64,
}

// ====== TABLE 1 + EXTENDED DATA TABLES (STREAMING HC3) ======
fn run_tables(source: &ParquetSource, out_dir: &Path, year_min: f64, year_max: f64) -> Result<()> {
    let runs = paper_runs();
    info!("Running {} streaming HC3 models", runs.len());

    let progress = ProgressBar::new(runs.len() as u64);
    progress.set_style(ProgressStyle::with_template(
        "{bar:40} {pos}/{len} models {msg}",
    )?);

    let records = run_batch(source, &runs, year_min, year_max, || progress.inc(1));
    progress.finish_with_message("done");

    let out = out_dir.join("table1_and_extended_tables_streaming_hc3.csv");
    write_csv(&out, &records)?;
    info!("Wrote {} result rows to {}", records.len(), out.display());
    Ok(())
}

// ====== YEARLY AGGREGATES (FIGURE 2) ======
fn run_yearly(source: &ParquetSource, out_dir: &Path) -> Result<()> {
    let config = YearlyConfig {
        year_col: models::YEAR_COL.to_string(),
        columns: vec![
            "novelty_raw".into(),
            "consolidation_raw".into(),
            "Z_novelty".into(),
            "Z_consolidation".into(),
            "textual_disruption".into(),
            "sci_Disruption".into(),
        ],
    };
    let aggregates = aggregate_yearly(source, &config)?;
    let out = out_dir.join("figure2_yearly_aggregates.csv");
    write_yearly_csv(&out, &config, &aggregates)?;
    info!("Wrote {} yearly rows to {}", aggregates.len(), out.display());
    Ok(())
}

// ====== PERIOD REGRESSIONS (FIGURE 3) ======
fn run_periods(source: &ParquetSource, out_dir: &Path) -> Result<()> {
    let config = PeriodConfig {
        year_col: models::YEAR_COL.to_string(),
        dependent: "sci_Citation_Count".to_string(),
        textual_vars: models::generative_vars()
            .into_iter()
            .chain(models::performative_vars())
            .collect(),
        controls: models::default_controls(),
        periods: models::default_periods(),
    };
    let records = period_regressions(source, &config)?;
    let out = out_dir.join("figure3_period_results_citation_all.csv");
    write_csv(&out, &records)?;
    info!("Wrote {} period rows to {}", records.len(), out.display());
    Ok(())
}

// ====== ROLLING WINDOWS (FIGURE 4 / EXTENDED DATA FIG. 4) ======
fn run_rolling(source: &ParquetSource, out_dir: &Path) -> Result<()> {
    let rolling = RollingConfig {
        windows: vec![5, 10, 15],
        min_n: 1000,
    };
    for (horizon, dep) in [("C10", "sci_C10"), ("C5", "sci_C5")] {
        let config = YearlyConfig {
            year_col: models::YEAR_COL.to_string(),
            columns: vec![dep.to_string(), "textual_disruption".to_string()],
        };
        let aggregates = aggregate_yearly(source, &config)?;
        let agg_out = out_dir.join(format!("figure4_yearly_aggregates_{horizon}.csv"));
        write_yearly_counts_csv(&agg_out, &config, &aggregates)?;
        let records = rolling_slopes(&aggregates, &config, dep, "textual_disruption", &rolling)?;
        let out = out_dir.join(format!("figure4_rolling_{horizon}_textual_disruption.csv"));
        write_csv(&out, &records)?;
        info!(
            "Wrote {} rolling rows for {} to {}",
            records.len(),
            horizon,
            out.display()
        );
    }
    Ok(())
}

// ====== EFFECT-SIZE TRAJECTORY (EXTENDED DATA FIG. 3) ======
fn run_trajectory(source: &ParquetSource, out_dir: &Path) -> Result<()> {
    let config = TrajectoryConfig {
        year_col: models::YEAR_COL.to_string(),
        dependent: "sci_Citation_Count".to_string(),
        novelty_col: "Z_novelty".to_string(),
        consolidation_col: "Z_consolidation".to_string(),
        combo_col: "combo_novelty".to_string(),
        year_min: 1900,
        year_max: 2020,
        windows: vec![5, 10, 15],
        min_n: 5000,
    };
    let records = effect_trajectory(source, &config)?;
    let out = out_dir.join("extdata_fig3_rolling_effects.csv");
    write_csv(&out, &records)?;
    info!(
        "Wrote {} trajectory rows to {}",
        records.len(),
        out.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Cli::parse();

    let num_workers = args.workers.unwrap_or_else(num_cpus::get);
    info!("Using {} workers", num_workers);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .thread_name(|i| format!("textinno-worker-{}", i))
        .build_global()?;

    let out_dir = Path::new(&args.out_dir);
    create_dir_all(out_dir)?;
    info!("Output directory: {}", out_dir.display());

    let source = ParquetSource::open(&args.meta_table)?;
    info!(
        "Meta-table {} has {} row groups",
        args.meta_table,
        source.num_row_groups()
    );

    let analyses: Vec<&str> = args.analyses.split(',').map(|s| s.trim()).collect();
    for analysis in analyses {
        match analysis {
            "tables" => run_tables(&source, out_dir, args.year_min, args.year_max)?,
            "yearly" => run_yearly(&source, out_dir)?,
            "periods" => run_periods(&source, out_dir)?,
            "rolling" => run_rolling(&source, out_dir)?,
            "trajectory" => run_trajectory(&source, out_dir)?,
            other => warn!("Unknown analysis: {}", other),
        }
    }

    info!("All requested analyses completed");
    Ok(())
}
