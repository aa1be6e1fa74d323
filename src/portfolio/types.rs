//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}\in\Delta} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Weight vectors, metric triples and result containers for sampling and optimization.

use std::ops::Deref;

use ordered_float::OrderedFloat;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::error::Result;

/// Tolerance on `sum(w) == 1` accepted by [`WeightVector::new`].
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Long-only, fully invested allocation: every weight in `[0, 1]`, weights sum to one.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WeightVector(Vec<f64>);

impl WeightVector {
  /// Validate an already normalized allocation.
  pub fn new(weights: Vec<f64>) -> Result<Self> {
    if weights.is_empty() {
      return Err(PortfolioError::invalid("weights", "weight vector is empty"));
    }

    if let Some((i, w)) = weights
      .iter()
      .enumerate()
      .find(|(_, w)| !w.is_finite() || !(0.0..=1.0).contains(*w))
    {
      return Err(PortfolioError::invalid(
        "weights",
        format!("weight {i} = {w} is outside [0, 1]"),
      ));
    }

    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
      return Err(PortfolioError::invalid(
        "weights",
        format!("weights sum to {sum}, expected 1"),
      ));
    }

    Ok(Self(weights))
  }

  /// Scale non-negative raw values by their sum.
  pub fn normalized(raw: Vec<f64>) -> Result<Self> {
    if raw.iter().any(|v| !v.is_finite() || *v < 0.0) {
      return Err(PortfolioError::invalid(
        "weights",
        "raw weights must be finite and non-negative",
      ));
    }

    let sum: f64 = raw.iter().sum();
    if sum <= 0.0 {
      return Err(PortfolioError::invalid("weights", "raw weights sum to zero"));
    }

    Self::new(raw.into_iter().map(|v| v / sum).collect())
  }

  /// Equal weighting, `1/n` per asset.
  pub fn uniform(n: usize) -> Result<Self> {
    if n == 0 {
      return Err(PortfolioError::invalid("weights", "asset count must be positive"));
    }
    Ok(Self(vec![1.0 / n as f64; n]))
  }

  /// Snap solver output onto `{lower <= w_i <= upper, sum(w) = 1}`.
  ///
  /// Values are clamped to the bounds and the leftover budget is spread over the weights that
  /// still have room, so a capped weight never ends above `upper`.
  pub(crate) fn from_solver(x: &[f64], lower: f64, upper: f64) -> Result<Self> {
    let lower = lower.max(0.0);
    let upper = upper.min(1.0);
    let mut w: Vec<f64> = x
      .iter()
      .map(|v| if v.is_finite() { v.clamp(lower, upper) } else { lower })
      .collect();

    for _ in 0..=w.len() {
      let residual = 1.0 - w.iter().sum::<f64>();
      if residual.abs() <= f64::EPSILON {
        break;
      }
      let room: Vec<usize> = (0..w.len())
        .filter(|&i| if residual > 0.0 { w[i] < upper } else { w[i] > lower })
        .collect();
      if room.is_empty() {
        break;
      }
      let share = residual / room.len() as f64;
      for i in room {
        w[i] = (w[i] + share).clamp(lower, upper);
      }
    }

    Self::new(w).map_err(|_| {
      PortfolioError::InfeasibleProblem(format!(
        "weights cannot sum to 1 within bounds [{lower}, {upper}]"
      ))
    })
  }

  pub fn as_slice(&self) -> &[f64] {
    &self.0
  }

  pub fn into_inner(self) -> Vec<f64> {
    self.0
  }
}

impl Deref for WeightVector {
  type Target = [f64];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl AsRef<[f64]> for WeightVector {
  fn as_ref(&self) -> &[f64] {
    &self.0
  }
}

impl TryFrom<Vec<f64>> for WeightVector {
  type Error = PortfolioError;

  fn try_from(weights: Vec<f64>) -> Result<Self> {
    Self::new(weights)
  }
}

impl<'de> Deserialize<'de> for WeightVector {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    let raw = Vec::<f64>::deserialize(deserializer)?;
    Self::new(raw).map_err(serde::de::Error::custom)
  }
}

/// Annualized return, volatility and Sharpe ratio of one allocation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
  pub annualized_return: f64,
  pub annualized_volatility: f64,
  /// `(annualized_return - risk_free) / annualized_volatility`.
  pub sharpe_ratio: f64,
}

impl PortfolioMetrics {
  /// Metrics for a zero-volatility draw: the Sharpe ratio becomes `+inf`, `-inf` or `NaN`
  /// depending on the sign of the excess return.
  pub fn degenerate(annualized_return: f64, annualized_volatility: f64, risk_free: f64) -> Self {
    let excess = annualized_return - risk_free;
    let sharpe_ratio = if excess > 0.0 {
      f64::INFINITY
    } else if excess < 0.0 {
      f64::NEG_INFINITY
    } else {
      f64::NAN
    };

    Self {
      annualized_return,
      annualized_volatility,
      sharpe_ratio,
    }
  }

  pub fn is_finite(&self) -> bool {
    self.annualized_return.is_finite()
      && self.annualized_volatility.is_finite()
      && self.sharpe_ratio.is_finite()
  }
}

/// One Monte Carlo draw and its score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSample {
  pub weights: WeightVector,
  pub metrics: PortfolioMetrics,
}

/// Read-only cloud of sampled portfolios.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
  samples: Vec<PortfolioSample>,
}

impl SampleSet {
  pub(crate) fn from_samples(samples: Vec<PortfolioSample>) -> Self {
    Self { samples }
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn samples(&self) -> &[PortfolioSample] {
    &self.samples
  }

  pub fn iter(&self) -> std::slice::Iter<'_, PortfolioSample> {
    self.samples.iter()
  }

  /// Draws whose metrics are all finite.
  pub fn finite(&self) -> impl Iterator<Item = &PortfolioSample> {
    self.samples.iter().filter(|s| s.metrics.is_finite())
  }

  /// Number of draws recorded with a non-finite Sharpe ratio.
  pub fn degenerate_count(&self) -> usize {
    self.samples.len() - self.finite().count()
  }

  /// Best sampled Sharpe ratio, ignoring degenerate draws.
  pub fn max_sharpe(&self) -> Option<&PortfolioSample> {
    self
      .finite()
      .max_by_key(|s| OrderedFloat(s.metrics.sharpe_ratio))
  }

  /// Least volatile sampled allocation, ignoring degenerate draws.
  pub fn min_volatility(&self) -> Option<&PortfolioSample> {
    self
      .finite()
      .min_by_key(|s| OrderedFloat(s.metrics.annualized_volatility))
  }

  /// Pareto-efficient draws ordered by volatility: the approximate efficient frontier.
  ///
  /// A draw is kept when no other draw has lower-or-equal volatility and a higher return.
  pub fn frontier(&self) -> Vec<&PortfolioSample> {
    let mut sorted: Vec<&PortfolioSample> = self.finite().collect();
    sorted.sort_by_key(|s| {
      (
        OrderedFloat(s.metrics.annualized_volatility),
        std::cmp::Reverse(OrderedFloat(s.metrics.annualized_return)),
      )
    });

    let mut best_return = f64::NEG_INFINITY;
    let mut out = Vec::new();
    for s in sorted {
      if s.metrics.annualized_return > best_return {
        best_return = s.metrics.annualized_return;
        out.push(s);
      }
    }
    out
  }
}

impl<'a> IntoIterator for &'a SampleSet {
  type Item = &'a PortfolioSample;
  type IntoIter = std::slice::Iter<'a, PortfolioSample>;

  fn into_iter(self) -> Self::IntoIter {
    self.samples.iter()
  }
}

/// Output of the maximum-Sharpe solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
  pub weights: WeightVector,
  pub metrics: PortfolioMetrics,
  /// `false` when the solver stopped before meeting its tolerances; `weights` is then the
  /// best point found.
  pub converged: bool,
  pub iterations: usize,
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn sample(ret: f64, vol: f64, rf: f64) -> PortfolioSample {
    PortfolioSample {
      weights: WeightVector::uniform(2).unwrap(),
      metrics: PortfolioMetrics {
        annualized_return: ret,
        annualized_volatility: vol,
        sharpe_ratio: (ret - rf) / vol,
      },
    }
  }

  #[test]
  fn normalized_weights_sum_to_one() {
    let w = WeightVector::normalized(vec![1.0, 3.0, 4.0]).unwrap();
    assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(w[2], 0.5, epsilon = 1e-12);
  }

  #[test]
  fn rejects_negative_and_unnormalized_weights() {
    assert!(matches!(
      WeightVector::new(vec![1.2, -0.2]),
      Err(PortfolioError::InvalidInput { .. })
    ));
    assert!(WeightVector::new(vec![0.3, 0.3]).is_err());
    assert!(WeightVector::normalized(vec![0.0, 0.0]).is_err());
    assert!(WeightVector::uniform(0).is_err());
  }

  #[test]
  fn from_solver_snaps_small_violations() {
    let w = WeightVector::from_solver(&[-1e-14, 0.6, 0.4 + 1e-12], 0.0, 1.0).unwrap();
    assert_eq!(w[0], 0.0);
    assert!(w.iter().all(|v| (0.0..=1.0).contains(v)));
    assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
  }

  #[test]
  fn from_solver_respects_the_upper_bound() {
    let w = WeightVector::from_solver(&[0.6 + 1e-9, 0.2, 0.2 - 3e-9], 0.0, 0.6).unwrap();
    assert!(w[0] <= 0.6);
    assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);

    assert!(matches!(
      WeightVector::from_solver(&[0.4, 0.4], 0.0, 0.4),
      Err(PortfolioError::InfeasibleProblem(_))
    ));
  }

  #[test]
  fn weights_above_one_are_rejected() {
    assert!(WeightVector::new(vec![1.0 + 1e-10, -0.0]).is_err());
    assert!(WeightVector::new(vec![1.0, 0.0]).is_ok());
  }

  #[test]
  fn deserialization_validates_weights() {
    let ok: WeightVector = serde_json::from_str("[0.25, 0.75]").unwrap();
    assert_eq!(ok.as_slice(), &[0.25, 0.75]);
    assert!(serde_json::from_str::<WeightVector>("[0.5, 0.75]").is_err());
  }

  #[test]
  fn degenerate_metrics_use_signed_infinity() {
    assert_eq!(PortfolioMetrics::degenerate(0.1, 0.0, 0.0).sharpe_ratio, f64::INFINITY);
    assert_eq!(
      PortfolioMetrics::degenerate(0.0, 0.0, 0.02).sharpe_ratio,
      f64::NEG_INFINITY
    );
    assert!(PortfolioMetrics::degenerate(0.02, 0.0, 0.02).sharpe_ratio.is_nan());
  }

  #[test]
  fn retrieval_skips_degenerate_draws() {
    let mut degenerate = sample(0.5, 0.1, 0.0);
    degenerate.metrics = PortfolioMetrics::degenerate(0.5, 0.0, 0.0);
    let set = SampleSet::from_samples(vec![
      sample(0.10, 0.20, 0.0),
      degenerate,
      sample(0.12, 0.15, 0.0),
    ]);

    assert_eq!(set.degenerate_count(), 1);
    assert_abs_diff_eq!(set.max_sharpe().unwrap().metrics.sharpe_ratio, 0.8, epsilon = 1e-12);
    assert_abs_diff_eq!(
      set.min_volatility().unwrap().metrics.annualized_volatility,
      0.15,
      epsilon = 1e-12
    );
  }

  #[test]
  fn frontier_keeps_only_dominating_points() {
    let set = SampleSet::from_samples(vec![
      sample(0.05, 0.10, 0.0),
      sample(0.04, 0.12, 0.0),
      sample(0.08, 0.15, 0.0),
      sample(0.07, 0.20, 0.0),
      sample(0.11, 0.25, 0.0),
    ]);

    let frontier: Vec<f64> = set
      .frontier()
      .iter()
      .map(|s| s.metrics.annualized_return)
      .collect();
    assert_eq!(frontier, vec![0.05, 0.08, 0.11]);
  }
}
