//! # Portfolio Engine
//!
//! $$
//! \{p_t\} \xrightarrow{\text{estimate}} (\mu, \Sigma) \xrightarrow{\text{sample, optimize}} (\mathcal S, \mathbf{w}^\*)
//! $$
//!
//! End-to-end pipeline from a price panel to the sampled cloud and the maximum-Sharpe allocation.

use std::collections::HashSet;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use super::data::estimate;
use super::data::PortfolioPath;
use super::data::PriceSeries;
use super::data::ReturnMode;
use super::data::ReturnSeries;
use super::data::Statistics;
use super::evaluator::PortfolioEvaluator;
use super::evaluator::TRADING_DAYS;
use super::optimizers::SharpeOptimizer;
use super::sampler::RandomPortfolioSampler;
use super::types::OptimizationResult;
use super::types::SampleSet;
use crate::error::PortfolioError;
use crate::error::Result;

/// Annual risk-free rate used when none is configured.
pub const DEFAULT_RISK_FREE: f64 = 0.02;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioEngineConfig {
  /// Assets to allocate across; empty selects every column of the price series.
  pub assets: Vec<String>,
  /// Inclusive start of the estimation window.
  pub start: Option<NaiveDate>,
  /// Inclusive end of the estimation window.
  pub end: Option<NaiveDate>,
  pub return_mode: ReturnMode,
  /// Number of random portfolios to draw.
  pub samples: usize,
  /// Annual risk-free rate as a fraction; defaults to 2%.
  pub risk_free: f64,
  pub periods_per_year: u32,
  /// Seed for the sampler; `None` draws from OS entropy.
  pub seed: Option<u64>,
  /// Spread sampling over the rayon pool.
  pub parallel: bool,
  /// Upper bound on any single optimized weight.
  pub max_weight: f64,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      assets: Vec::new(),
      start: None,
      end: None,
      return_mode: ReturnMode::Simple,
      samples: 500,
      risk_free: DEFAULT_RISK_FREE,
      periods_per_year: TRADING_DAYS,
      seed: None,
      parallel: false,
      max_weight: 1.0,
    }
  }
}

impl PortfolioEngineConfig {
  pub fn validate(&self) -> Result<()> {
    if !self.assets.is_empty() {
      let distinct: HashSet<&str> = self.assets.iter().map(String::as_str).collect();
      if distinct.len() != self.assets.len() {
        return Err(PortfolioError::invalid("assets", "asset identifiers must be distinct"));
      }
      if distinct.len() < 2 {
        return Err(PortfolioError::InsufficientData(format!(
          "at least 2 assets are required, got {}",
          distinct.len()
        )));
      }
    }

    if let (Some(start), Some(end)) = (self.start, self.end) {
      if start >= end {
        return Err(PortfolioError::invalid(
          "date_range",
          format!("start {start} must precede end {end}"),
        ));
      }
    }

    if self.samples == 0 {
      return Err(PortfolioError::invalid("samples", "sample count must be at least 1"));
    }
    if !self.risk_free.is_finite() || self.risk_free < 0.0 {
      return Err(PortfolioError::invalid(
        "risk_free",
        format!("risk-free rate {} must be a non-negative fraction", self.risk_free),
      ));
    }
    if self.periods_per_year == 0 {
      return Err(PortfolioError::invalid("periods_per_year", "must be positive"));
    }
    if !(self.max_weight > 0.0 && self.max_weight <= 1.0) {
      return Err(PortfolioError::invalid(
        "max_weight",
        format!("max weight {} must lie in (0, 1]", self.max_weight),
      ));
    }

    Ok(())
  }

  pub fn evaluator(&self) -> PortfolioEvaluator {
    PortfolioEvaluator::new(self.risk_free, self.periods_per_year)
  }
}

/// Everything produced by one [`PortfolioEngine::run`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioReport {
  pub assets: Vec<String>,
  /// Number of aligned return rows behind the statistics.
  pub observations: usize,
  pub statistics: Statistics,
  pub samples: SampleSet,
  pub optimal: OptimizationResult,
  /// Realized returns and growth of the optimal weights over the estimation window.
  pub performance: PortfolioPath,
}

/// Single entry point wiring estimation, sampling and optimization together.
#[derive(Clone, Debug)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
}

impl PortfolioEngine {
  /// Construct a new engine, rejecting invalid configuration up front.
  pub fn new(config: PortfolioEngineConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self { config })
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Estimate statistics over the configured assets and window.
  pub fn statistics(&self, prices: &PriceSeries) -> Result<(ReturnSeries, Statistics)> {
    let assets = if self.config.assets.is_empty() {
      prices.assets().to_vec()
    } else {
      self.config.assets.clone()
    };
    let window = prices.select(&assets, self.config.start, self.config.end)?;
    estimate(&window, self.config.return_mode)
  }

  pub fn sample(&self, stats: &Statistics) -> Result<SampleSet> {
    let sampler = RandomPortfolioSampler::new(self.config.evaluator());
    let n = stats.asset_count();

    match (self.config.parallel, self.config.seed) {
      (true, Some(seed)) => sampler.sample_par(n, stats, self.config.samples, seed),
      (true, None) => sampler.sample_par(n, stats, self.config.samples, rand::random()),
      (false, Some(seed)) => {
        sampler.sample(n, stats, self.config.samples, &mut StdRng::seed_from_u64(seed))
      }
      (false, None) => sampler.sample(n, stats, self.config.samples, &mut StdRng::from_entropy()),
    }
  }

  pub fn optimize(&self, stats: &Statistics) -> Result<OptimizationResult> {
    SharpeOptimizer::new(self.config.evaluator())
      .with_weight_bounds(0.0, self.config.max_weight)?
      .optimize(stats, None)
  }

  /// Run the full pipeline on `prices`.
  pub fn run(&self, prices: &PriceSeries) -> Result<PortfolioReport> {
    let (returns, statistics) = self.statistics(prices)?;
    let observations = returns.n_rows();
    let samples = self.sample(&statistics)?;
    let optimal = self.optimize(&statistics)?;
    let performance = returns.portfolio_path(&optimal.weights)?;

    info!(
      assets = statistics.asset_count(),
      observations,
      samples = samples.len(),
      sharpe = optimal.metrics.sharpe_ratio,
      converged = optimal.converged,
      "portfolio run complete"
    );

    Ok(PortfolioReport {
      assets: statistics.assets().to_vec(),
      observations,
      statistics,
      samples,
      optimal,
      performance,
    })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::Array2;

  use super::*;

  fn synthetic_prices() -> PriceSeries {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let dates: Vec<NaiveDate> = (0..120).map(|d| start + chrono::Duration::days(d)).collect();
    let assets = vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()];
    let prices = Array2::from_shape_fn((dates.len(), 3), |(t, j)| {
      let t = t as f64;
      match j {
        0 => 100.0 * (1.0 + 0.002 * t) + 3.0 * (t * 0.7).sin(),
        1 => 50.0 * (1.0 + 0.001 * t) + 1.5 * (t * 1.3).cos(),
        _ => 20.0 * (1.0 + 0.0005 * t) + 0.8 * (t * 0.4).sin(),
      }
    });
    PriceSeries::new(dates, assets, prices).unwrap()
  }

  #[test]
  fn config_validation() {
    assert!(PortfolioEngineConfig::default().validate().is_ok());

    let one_asset = PortfolioEngineConfig {
      assets: vec!["AAA".to_string()],
      ..Default::default()
    };
    assert!(matches!(
      one_asset.validate(),
      Err(PortfolioError::InsufficientData(_))
    ));

    let duplicate = PortfolioEngineConfig {
      assets: vec!["AAA".to_string(), "AAA".to_string()],
      ..Default::default()
    };
    assert!(duplicate.validate().is_err());

    let backwards = PortfolioEngineConfig {
      start: NaiveDate::from_ymd_opt(2024, 6, 1),
      end: NaiveDate::from_ymd_opt(2024, 1, 1),
      ..Default::default()
    };
    assert!(backwards.validate().is_err());

    let no_samples = PortfolioEngineConfig {
      samples: 0,
      ..Default::default()
    };
    assert!(PortfolioEngine::new(no_samples).is_err());

    let negative_rf = PortfolioEngineConfig {
      risk_free: -0.01,
      ..Default::default()
    };
    assert!(negative_rf.validate().is_err());
  }

  #[test]
  fn config_deserializes_with_defaults() {
    let config: PortfolioEngineConfig =
      serde_json::from_str(r#"{"assets": ["AAA", "BBB"], "return_mode": "log", "seed": 7}"#)
        .unwrap();

    assert_eq!(config.return_mode, ReturnMode::Log);
    assert_eq!(config.samples, 500);
    assert_eq!(config.periods_per_year, 252);
    assert_eq!(config.seed, Some(7));
    assert_eq!(config.risk_free, DEFAULT_RISK_FREE);
  }

  #[test]
  fn run_produces_consistent_report() {
    let engine = PortfolioEngine::new(PortfolioEngineConfig {
      samples: 300,
      seed: Some(42),
      risk_free: 0.01,
      ..Default::default()
    })
    .unwrap();

    let report = engine.run(&synthetic_prices()).unwrap();
    assert_eq!(report.assets.len(), 3);
    assert_eq!(report.observations, 119);
    assert_eq!(report.samples.len(), 300);
    assert_abs_diff_eq!(report.optimal.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-9);

    let best = report.samples.max_sharpe().unwrap();
    assert!(report.optimal.metrics.sharpe_ratio >= best.metrics.sharpe_ratio - 1e-9);

    let again = engine.run(&synthetic_prices()).unwrap();
    assert_eq!(report, again);
  }

  #[test]
  fn run_honors_asset_subset_and_window() {
    let engine = PortfolioEngine::new(PortfolioEngineConfig {
      assets: vec!["CCC".to_string(), "AAA".to_string()],
      start: NaiveDate::from_ymd_opt(2023, 2, 1),
      end: NaiveDate::from_ymd_opt(2023, 3, 1),
      samples: 50,
      seed: Some(1),
      parallel: true,
      ..Default::default()
    })
    .unwrap();

    let report = engine.run(&synthetic_prices()).unwrap();
    assert_eq!(report.assets, vec!["CCC".to_string(), "AAA".to_string()]);
    // 29 price rows from Feb 1 to Mar 1 inclusive.
    assert_eq!(report.observations, 28);
  }

  #[test]
  fn weight_cap_applies_to_optimum() {
    let engine = PortfolioEngine::new(PortfolioEngineConfig {
      samples: 10,
      seed: Some(3),
      max_weight: 0.5,
      ..Default::default()
    })
    .unwrap();

    let report = engine.run(&synthetic_prices()).unwrap();
    assert!(report.optimal.weights.iter().all(|w| *w <= 0.5));
  }

  #[test]
  fn report_carries_the_optimal_growth_path() {
    let engine = PortfolioEngine::new(PortfolioEngineConfig {
      samples: 20,
      seed: Some(5),
      ..Default::default()
    })
    .unwrap();

    let report = engine.run(&synthetic_prices()).unwrap();
    let path = &report.performance;
    assert_eq!(path.dates.len(), report.observations);
    assert_eq!(path.returns.len(), report.observations);
    assert_eq!(path.growth.len(), report.observations);

    let compounded: f64 = path.returns.iter().map(|r| 1.0 + r).product();
    assert_abs_diff_eq!(path.growth[path.growth.len() - 1], compounded, epsilon = 1e-12);
  }

  #[test]
  fn two_price_rows_yield_a_degenerate_report() {
    let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let prices = PriceSeries::new(
      vec![start, start + chrono::Duration::days(1)],
      vec!["AAA".to_string(), "BBB".to_string()],
      ndarray::array![[100.0, 50.0], [101.0, 50.5]],
    )
    .unwrap();
    let engine = PortfolioEngine::new(PortfolioEngineConfig {
      samples: 10,
      seed: Some(2),
      ..Default::default()
    })
    .unwrap();

    let report = engine.run(&prices).unwrap();
    assert_eq!(report.observations, 1);
    assert!(!report.optimal.converged);
    assert!(!report.optimal.metrics.is_finite());
    assert_eq!(report.samples.degenerate_count(), 10);
    assert_abs_diff_eq!(report.performance.growth[0], 1.01, epsilon = 1e-12);
  }
}
