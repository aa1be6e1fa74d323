use std::io;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use frontier_rs::portfolio::engine::DEFAULT_RISK_FREE;
use frontier_rs::portfolio::report;
use frontier_rs::portfolio::PortfolioEngine;
use frontier_rs::portfolio::PortfolioEngineConfig;
use frontier_rs::portfolio::PriceSeries;
use frontier_rs::portfolio::ReturnMode;
use frontier_rs::portfolio::TRADING_DAYS;
use tracing_subscriber::EnvFilter;

/// Maximum-Sharpe allocation and Monte Carlo frontier from a CSV price panel
#[derive(Parser, Debug)]
#[command(name = "frontier", version, about)]
struct Cli {
  /// CSV with a `date` column (YYYY-MM-DD) followed by one price column per asset
  prices: PathBuf,

  /// Comma-separated subset of asset columns (default: all)
  #[arg(long, value_delimiter = ',')]
  assets: Vec<String>,

  #[arg(long)]
  start: Option<NaiveDate>,

  #[arg(long)]
  end: Option<NaiveDate>,

  /// `simple` or `log`
  #[arg(long, default_value = "simple")]
  mode: ReturnMode,

  /// Number of random portfolios
  #[arg(long, default_value_t = 500)]
  samples: usize,

  /// Annual risk-free rate as a fraction
  #[arg(long, default_value_t = DEFAULT_RISK_FREE)]
  risk_free: f64,

  #[arg(long, default_value_t = TRADING_DAYS)]
  periods_per_year: u32,

  #[arg(long)]
  seed: Option<u64>,

  /// Sample on all cores
  #[arg(long)]
  parallel: bool,

  /// Cap on any single weight
  #[arg(long, default_value_t = 1.0)]
  max_weight: f64,

  /// Print the sampled efficient frontier as CSV instead of tables
  #[arg(long)]
  frontier_csv: bool,

  /// Print the optimized weights as CSV (`asset,weight`, 4 decimals) instead of tables
  #[arg(long, conflicts_with = "frontier_csv")]
  weights_csv: bool,
}

impl From<&Cli> for PortfolioEngineConfig {
  fn from(cli: &Cli) -> Self {
    Self {
      assets: cli.assets.clone(),
      start: cli.start,
      end: cli.end,
      return_mode: cli.mode,
      samples: cli.samples,
      risk_free: cli.risk_free,
      periods_per_year: cli.periods_per_year,
      seed: cli.seed,
      parallel: cli.parallel,
      max_weight: cli.max_weight,
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();
  let prices = read_prices(&cli.prices)?;
  let engine = PortfolioEngine::new(PortfolioEngineConfig::from(&cli))?;
  let summary = engine.run(&prices)?;

  if cli.frontier_csv {
    let mut writer = csv::Writer::from_writer(io::stdout());
    for row in report::frontier_rows(&summary.samples) {
      writer.serialize(row)?;
    }
    writer.flush()?;
    return Ok(());
  }

  let rows = report::weight_rows(
    &summary.assets,
    &summary.optimal.weights,
    report::DISPLAY_DECIMALS,
  )?;

  if cli.weights_csv {
    let mut writer = csv::Writer::from_writer(io::stdout());
    for row in &rows {
      writer.serialize(row)?;
    }
    writer.flush()?;
    return Ok(());
  }

  println!(
    "Optimized portfolio ({} observations, converged: {})",
    summary.observations, summary.optimal.converged
  );
  report::metrics_table(&summary.optimal.metrics).printstd();
  report::weight_table(&rows).printstd();

  if let Some(growth) = summary.performance.growth.last() {
    println!(
      "Growth of 1 at the optimal weights over the window: {growth:.4}"
    );
  }

  println!(
    "Sampled {} portfolios ({} degenerate), {} on the frontier",
    summary.samples.len(),
    summary.samples.degenerate_count(),
    summary.samples.frontier().len()
  );
  if let Some(best) = summary.samples.max_sharpe() {
    println!("Best sampled portfolio:");
    report::metrics_table(&best.metrics).printstd();
  }

  Ok(())
}

fn read_prices(path: &Path) -> Result<PriceSeries> {
  let mut reader = csv::Reader::from_path(path)
    .with_context(|| format!("failed to open price file {}", path.display()))?;

  let headers = reader.headers()?.clone();
  let assets: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
  let mut dates = Vec::new();
  let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::new(); assets.len()];

  for (line, record) in reader.records().enumerate() {
    let record = record.with_context(|| format!("malformed record {}", line + 1))?;
    let raw_date = record.get(0).unwrap_or_default();
    let date = NaiveDate::parse_from_str(raw_date.trim(), "%Y-%m-%d")
      .with_context(|| format!("invalid date `{raw_date}` in record {}", line + 1))?;
    dates.push(date);

    for (j, column) in columns.iter_mut().enumerate() {
      let cell = record.get(j + 1).unwrap_or_default().trim();
      let price = if cell.is_empty() {
        None
      } else {
        Some(
          cell
            .parse::<f64>()
            .with_context(|| format!("invalid price `{cell}` for {}", assets[j]))?,
        )
      };
      column.push(price);
    }
  }

  let series = PriceSeries::from_columns(dates, assets.into_iter().zip(columns).collect())?;
  Ok(series)
}
