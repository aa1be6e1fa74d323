//! # Portfolio Data
//!
//! $$
//! r_t = \frac{p_t}{p_{t-1}} - 1 \quad\text{or}\quad r_t = \ln p_t - \ln p_{t-1}
//! $$
//!
//! Price series, return transforms and sample statistics (mean vector, covariance matrix).

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;
use ndarray_stats::CorrelationExt;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;

/// Periodic return transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnMode {
  /// `p_t / p_{t-1} - 1`
  #[default]
  Simple,
  /// `ln(p_t) - ln(p_{t-1})`
  Log,
}

impl ReturnMode {
  fn transform(self, prev: f64, curr: f64) -> f64 {
    match self {
      ReturnMode::Simple => curr / prev - 1.0,
      ReturnMode::Log => curr.ln() - prev.ln(),
    }
  }
}

impl FromStr for ReturnMode {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "simple" | "pct" | "arithmetic" => Ok(Self::Simple),
      "log" | "ln" | "continuous" => Ok(Self::Log),
      other => Err(PortfolioError::invalid(
        "return_mode",
        format!("unknown return mode `{other}`, expected `simple` or `log`"),
      )),
    }
  }
}

impl fmt::Display for ReturnMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ReturnMode::Simple => write!(f, "simple"),
      ReturnMode::Log => write!(f, "log"),
    }
  }
}

/// Date-indexed prices, one column per asset. Missing observations are `NaN`.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSeries {
  dates: Vec<NaiveDate>,
  assets: Vec<String>,
  prices: Array2<f64>,
}

impl PriceSeries {
  /// `prices` has one row per date and one column per asset.
  pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, prices: Array2<f64>) -> Result<Self> {
    if prices.nrows() != dates.len() {
      return Err(PortfolioError::DimensionMismatch {
        expected: dates.len(),
        actual: prices.nrows(),
      });
    }
    if prices.ncols() != assets.len() {
      return Err(PortfolioError::DimensionMismatch {
        expected: assets.len(),
        actual: prices.ncols(),
      });
    }

    if let Some(pair) = dates.windows(2).find(|pair| pair[0] >= pair[1]) {
      return Err(PortfolioError::invalid(
        "dates",
        format!("dates must be strictly increasing ({} then {})", pair[0], pair[1]),
      ));
    }

    let mut seen = HashSet::with_capacity(assets.len());
    if let Some(dup) = assets.iter().find(|a| !seen.insert(a.as_str())) {
      return Err(PortfolioError::invalid(
        "assets",
        format!("duplicate asset identifier `{dup}`"),
      ));
    }

    Ok(Self {
      dates,
      assets,
      prices,
    })
  }

  /// Build from `(asset, column)` pairs where `None` marks a missing price.
  pub fn from_columns(dates: Vec<NaiveDate>, columns: Vec<(String, Vec<Option<f64>>)>) -> Result<Self> {
    let n_rows = dates.len();
    let mut prices = Array2::from_elem((n_rows, columns.len()), f64::NAN);
    let mut assets = Vec::with_capacity(columns.len());

    for (j, (asset, column)) in columns.into_iter().enumerate() {
      if column.len() != n_rows {
        return Err(PortfolioError::DimensionMismatch {
          expected: n_rows,
          actual: column.len(),
        });
      }
      for (i, price) in column.into_iter().enumerate() {
        prices[[i, j]] = price.unwrap_or(f64::NAN);
      }
      assets.push(asset);
    }

    Self::new(dates, assets, prices)
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn prices(&self) -> &Array2<f64> {
    &self.prices
  }

  pub fn n_rows(&self) -> usize {
    self.dates.len()
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  /// Restrict to `assets` (in the given order) and the inclusive window `[start, end]`.
  pub fn select(
    &self,
    assets: &[String],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
  ) -> Result<Self> {
    let columns = assets
      .iter()
      .map(|asset| {
        self
          .assets
          .iter()
          .position(|a| a == asset)
          .ok_or_else(|| PortfolioError::invalid("assets", format!("unknown asset `{asset}`")))
      })
      .collect::<Result<Vec<_>>>()?;

    let rows: Vec<usize> = self
      .dates
      .iter()
      .enumerate()
      .filter(|(_, d)| start.map_or(true, |s| **d >= s) && end.map_or(true, |e| **d <= e))
      .map(|(i, _)| i)
      .collect();

    let prices = self
      .prices
      .select(Axis(0), &rows)
      .select(Axis(1), &columns);
    let dates = rows.iter().map(|&i| self.dates[i]).collect();

    Self::new(dates, assets.to_vec(), prices)
  }
}

/// Periodic returns aligned across assets; one row per retained period.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnSeries {
  dates: Vec<NaiveDate>,
  assets: Vec<String>,
  returns: Array2<f64>,
  mode: ReturnMode,
}

impl ReturnSeries {
  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn returns(&self) -> &Array2<f64> {
    &self.returns
  }

  pub fn mode(&self) -> ReturnMode {
    self.mode
  }

  pub fn n_rows(&self) -> usize {
    self.returns.nrows()
  }

  /// Per-period return of a fixed-weight portfolio, in this series' return convention.
  ///
  /// Log returns are converted to simple returns before weighting, so the log-mode result is
  /// `ln(1 + w · (exp(r) - 1))` rather than the weighted sum of log returns.
  pub fn portfolio_returns(&self, weights: &[f64]) -> Result<Array1<f64>> {
    let simple = self.simple_portfolio_returns(weights)?;
    Ok(match self.mode {
      ReturnMode::Simple => simple,
      ReturnMode::Log => simple.mapv(f64::ln_1p),
    })
  }

  /// Value of one unit invested at the first period's open and held at `weights`.
  pub fn cumulative_growth(&self, weights: &[f64]) -> Result<Array1<f64>> {
    let simple = self.simple_portfolio_returns(weights)?;
    let mut value = 1.0;
    Ok(simple.mapv(|r| {
      value *= 1.0 + r;
      value
    }))
  }

  /// Dated per-period returns and cumulative growth of a fixed-weight portfolio.
  pub fn portfolio_path(&self, weights: &[f64]) -> Result<PortfolioPath> {
    Ok(PortfolioPath {
      dates: self.dates.clone(),
      returns: self.portfolio_returns(weights)?.to_vec(),
      growth: self.cumulative_growth(weights)?.to_vec(),
    })
  }

  fn simple_portfolio_returns(&self, weights: &[f64]) -> Result<Array1<f64>> {
    let n = self.assets.len();
    if weights.len() != n {
      return Err(PortfolioError::DimensionMismatch {
        expected: n,
        actual: weights.len(),
      });
    }

    let w = Array1::from(weights.to_vec());
    Ok(match self.mode {
      ReturnMode::Simple => self.returns.dot(&w),
      ReturnMode::Log => self.returns.mapv(f64::exp_m1).dot(&w),
    })
  }

  /// Arithmetic mean per asset and sample covariance (`ddof = 1`).
  ///
  /// A single return row has no sample covariance; the population estimate (all zeros)
  /// is used instead so the caller sees a degenerate volatility rather than `NaN`.
  pub fn statistics(&self) -> Result<Statistics> {
    let n_obs = self.returns.nrows();
    let mean = self
      .returns
      .mean_axis(Axis(0))
      .ok_or_else(|| PortfolioError::InsufficientData("return series is empty".to_string()))?;

    let ddof = if n_obs > 1 { 1.0 } else { 0.0 };
    let covariance = self
      .returns
      .t()
      .cov(ddof)
      .map_err(|_| PortfolioError::InsufficientData("return series is empty".to_string()))?;

    Statistics::new(self.assets.clone(), mean, covariance)
  }
}

/// Realized path of a fixed-weight portfolio over a [`ReturnSeries`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPath {
  pub dates: Vec<NaiveDate>,
  /// Per-period portfolio returns in the series' return convention.
  pub returns: Vec<f64>,
  /// Growth of one unit, `prod(1 + r_simple)` up to each date.
  pub growth: Vec<f64>,
}

/// Per-period mean vector and covariance matrix. Annualization is left to consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
  assets: Vec<String>,
  mean: Array1<f64>,
  covariance: Array2<f64>,
}

impl Statistics {
  pub fn new(assets: Vec<String>, mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
    let n = mean.len();
    if assets.len() != n {
      return Err(PortfolioError::DimensionMismatch {
        expected: n,
        actual: assets.len(),
      });
    }
    if covariance.nrows() != n || covariance.ncols() != n {
      return Err(PortfolioError::DimensionMismatch {
        expected: n,
        actual: covariance.nrows().max(covariance.ncols()),
      });
    }
    if mean.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
      return Err(PortfolioError::invalid(
        "statistics",
        "mean and covariance must be finite",
      ));
    }

    Ok(Self {
      assets,
      mean,
      covariance,
    })
  }

  /// Statistics with generated asset labels, handy for inputs that are not price-derived.
  pub fn from_moments(mean: Vec<f64>, covariance: Vec<Vec<f64>>) -> Result<Self> {
    let n = mean.len();
    let mut cov = Array2::zeros((n, n));
    for (i, row) in covariance.iter().enumerate() {
      if row.len() != n || i >= n {
        return Err(PortfolioError::DimensionMismatch {
          expected: n,
          actual: row.len(),
        });
      }
      for (j, v) in row.iter().enumerate() {
        cov[[i, j]] = *v;
      }
    }
    if covariance.len() != n {
      return Err(PortfolioError::DimensionMismatch {
        expected: n,
        actual: covariance.len(),
      });
    }

    let assets = (1..=n).map(|i| format!("asset_{i}")).collect();
    Self::new(assets, Array1::from(mean), cov)
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn asset_count(&self) -> usize {
    self.mean.len()
  }

  pub fn mean(&self) -> &Array1<f64> {
    &self.mean
  }

  pub fn covariance(&self) -> &Array2<f64> {
    &self.covariance
  }

  pub fn annualized_mean(&self, periods_per_year: f64) -> Array1<f64> {
    &self.mean * periods_per_year
  }

  pub fn annualized_covariance(&self, periods_per_year: f64) -> Array2<f64> {
    &self.covariance * periods_per_year
  }

  /// Pearson correlation implied by the covariance matrix; zero-variance assets get zero
  /// off-diagonal correlation.
  pub fn correlation(&self) -> Array2<f64> {
    let n = self.asset_count();
    let sigmas: Vec<f64> = (0..n)
      .map(|i| self.covariance[[i, i]].max(0.0).sqrt())
      .collect();

    Array2::from_shape_fn((n, n), |(i, j)| {
      let denom = sigmas[i] * sigmas[j];
      if i == j {
        1.0
      } else if denom > 1e-15 {
        (self.covariance[[i, j]] / denom).clamp(-1.0, 1.0)
      } else {
        0.0
      }
    })
  }
}

/// Turn a price series into aligned returns and their statistics.
///
/// A return at `t` needs a usable price for every asset at both `t - 1` and `t`; any period
/// touching a missing or non-positive price is dropped rather than bridged.
pub fn estimate(prices: &PriceSeries, mode: ReturnMode) -> Result<(ReturnSeries, Statistics)> {
  let n_assets = prices.n_assets();
  if n_assets < 2 {
    return Err(PortfolioError::InsufficientData(format!(
      "at least 2 assets are required, got {n_assets}"
    )));
  }

  if let Some(j) = (0..n_assets).find(|&j| {
    prices
      .prices
      .column(j)
      .iter()
      .all(|p| !p.is_finite())
  }) {
    return Err(PortfolioError::InsufficientData(format!(
      "asset `{}` has no prices",
      prices.assets[j]
    )));
  }

  let complete: Vec<bool> = prices
    .prices
    .outer_iter()
    .map(|row| row.iter().all(|p| p.is_finite() && *p > 0.0))
    .collect();
  let periods: Vec<usize> = (1..prices.n_rows())
    .filter(|&t| complete[t - 1] && complete[t])
    .collect();

  debug!(
    rows = prices.n_rows(),
    periods = periods.len(),
    "dropped periods touching missing prices"
  );

  if periods.is_empty() {
    return Err(PortfolioError::InsufficientData(
      "at least 2 consecutive complete price rows are required".to_string(),
    ));
  }

  let mut returns = Array2::zeros((periods.len(), n_assets));
  for (mut out, &t) in returns.outer_iter_mut().zip(&periods) {
    ndarray::Zip::from(&mut out)
      .and(prices.prices.row(t - 1))
      .and(prices.prices.row(t))
      .for_each(|r, &p0, &p1| *r = mode.transform(p0, p1));
  }

  let dates = periods.iter().map(|&t| prices.dates[t]).collect();
  let series = ReturnSeries {
    dates,
    assets: prices.assets.clone(),
    returns,
    mode,
  };
  let stats = series.statistics()?;

  Ok((series, stats))
}
