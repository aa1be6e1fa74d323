//! # Portfolio Evaluator
//!
//! $$
//! \mu_p = P\,\mathbf{w}^\top\mu,\qquad
//! \sigma_p = \sqrt{P}\sqrt{\mathbf{w}^\top\Sigma\mathbf{w}},\qquad
//! S = \frac{\mu_p - r_f}{\sigma_p}
//! $$
//!
//! Annualized scoring of a weight vector against per-period statistics.

use ndarray::Array1;
use serde::Deserialize;
use serde::Serialize;

use super::data::Statistics;
use super::types::PortfolioMetrics;
use crate::error::PortfolioError;
use crate::error::Result;

/// Trading days per year.
pub const TRADING_DAYS: u32 = 252;

/// Annualized volatilities at or below this value are treated as zero.
pub const VOLATILITY_EPSILON: f64 = 1e-12;

/// Pure scorer holding the annual risk-free rate and the annualization factor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioEvaluator {
  pub risk_free: f64,
  pub periods_per_year: u32,
}

impl Default for PortfolioEvaluator {
  fn default() -> Self {
    Self {
      risk_free: 0.0,
      periods_per_year: TRADING_DAYS,
    }
  }
}

impl PortfolioEvaluator {
  pub fn new(risk_free: f64, periods_per_year: u32) -> Self {
    Self {
      risk_free,
      periods_per_year,
    }
  }

  /// Score `weights`; fails with [`PortfolioError::DegenerateVolatility`] when the portfolio
  /// has no measurable risk.
  pub fn evaluate(&self, weights: &[f64], stats: &Statistics) -> Result<PortfolioMetrics> {
    let (annualized_return, annualized_volatility) = self.moments(weights, stats)?;

    if annualized_volatility <= VOLATILITY_EPSILON {
      return Err(PortfolioError::DegenerateVolatility {
        volatility: annualized_volatility,
      });
    }

    Ok(PortfolioMetrics {
      annualized_return,
      annualized_volatility,
      sharpe_ratio: (annualized_return - self.risk_free) / annualized_volatility,
    })
  }

  /// Like [`Self::evaluate`] but records degenerate draws with a non-finite Sharpe ratio.
  pub fn evaluate_lenient(&self, weights: &[f64], stats: &Statistics) -> Result<PortfolioMetrics> {
    match self.evaluate(weights, stats) {
      Err(PortfolioError::DegenerateVolatility { volatility }) => {
        let (annualized_return, _) = self.moments(weights, stats)?;
        Ok(PortfolioMetrics::degenerate(
          annualized_return,
          volatility,
          self.risk_free,
        ))
      }
      other => other,
    }
  }

  /// Annualized `(return, volatility)` without the degeneracy check.
  pub fn moments(&self, weights: &[f64], stats: &Statistics) -> Result<(f64, f64)> {
    let n = stats.asset_count();
    if weights.len() != n {
      return Err(PortfolioError::DimensionMismatch {
        expected: n,
        actual: weights.len(),
      });
    }

    let periods = f64::from(self.periods_per_year);
    let w = Array1::from(weights.to_vec());
    let annualized_return = w.dot(stats.mean()) * periods;
    let variance = w.dot(&stats.covariance().dot(&w)).max(0.0);
    let annualized_volatility = variance.sqrt() * periods.sqrt();

    Ok((annualized_return, annualized_volatility))
  }

  /// Gradient of the annualized Sharpe ratio with respect to the weights.
  ///
  /// Returns `None` when the volatility is degenerate.
  pub fn sharpe_gradient(&self, weights: &[f64], stats: &Statistics) -> Result<Option<Vec<f64>>> {
    let (ret, vol) = self.moments(weights, stats)?;
    if vol <= VOLATILITY_EPSILON {
      return Ok(None);
    }

    let periods = f64::from(self.periods_per_year);
    let w = Array1::from(weights.to_vec());
    let sigma_w = stats.covariance().dot(&w);
    let excess = ret - self.risk_free;

    // dS/dw = P mu / vol - excess * P Sigma w / vol^3
    let grad = stats
      .mean()
      .iter()
      .zip(sigma_w.iter())
      .map(|(&mu_i, &sw_i)| periods * mu_i / vol - excess * periods * sw_i / vol.powi(3))
      .collect();

    Ok(Some(grad))
  }
}
