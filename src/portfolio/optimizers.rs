//! # Sharpe Optimizer
//!
//! $$
//! \min_{\mathbf{w}} -\frac{\mu_p(\mathbf{w})-r_f}{\sigma_p(\mathbf{w})}
//! \quad\text{s.t.}\quad \textstyle\sum_i w_i = 1,\ \ 0\le w_i\le 1
//! $$
//!
//! Maximum-Sharpe allocation on the long-only simplex.

use argmin::core::CostFunction;
use argmin::core::Gradient;
use tracing::debug;
use tracing::warn;

use super::data::Statistics;
use super::evaluator::PortfolioEvaluator;
use super::solver::Bound;
use super::solver::ConstrainedOptimizer;
use super::solver::LinearConstraint;
use super::solver::Slsqp;
use super::types::OptimizationResult;
use super::types::WeightVector;
use crate::error::PortfolioError;
use crate::error::Result;

/// Objective value assigned where the portfolio volatility is degenerate.
pub const DEGENERATE_PENALTY: f64 = 1e10;

/// Negative annualized Sharpe ratio as an argmin problem.
struct NegativeSharpe<'a> {
  evaluator: &'a PortfolioEvaluator,
  stats: &'a Statistics,
}

impl CostFunction for NegativeSharpe<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    match self.evaluator.evaluate(w, self.stats) {
      Ok(m) => Ok(-m.sharpe_ratio),
      Err(PortfolioError::DegenerateVolatility { .. }) => Ok(DEGENERATE_PENALTY),
      Err(e) => Err(e.into()),
    }
  }
}

impl Gradient for NegativeSharpe<'_> {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
    let grad = self
      .evaluator
      .sharpe_gradient(w, self.stats)?
      .map(|g| g.into_iter().map(|v| -v).collect())
      .unwrap_or_else(|| vec![0.0; w.len()]);
    Ok(grad)
  }
}

/// Finds the allocation with the highest Sharpe ratio using a [`ConstrainedOptimizer`].
#[derive(Clone, Debug)]
pub struct SharpeOptimizer<O = Slsqp> {
  evaluator: PortfolioEvaluator,
  solver: O,
  lower: f64,
  upper: f64,
}

impl SharpeOptimizer<Slsqp> {
  pub fn new(evaluator: PortfolioEvaluator) -> Self {
    Self::with_solver(evaluator, Slsqp::default())
  }
}

impl Default for SharpeOptimizer<Slsqp> {
  fn default() -> Self {
    Self::new(PortfolioEvaluator::default())
  }
}

impl<O> SharpeOptimizer<O>
where
  O: ConstrainedOptimizer + Clone,
{
  pub fn with_solver(evaluator: PortfolioEvaluator, solver: O) -> Self {
    Self {
      evaluator,
      solver,
      lower: 0.0,
      upper: 1.0,
    }
  }

  /// Per-asset weight bounds; defaults to `[0, 1]`. Shorting stays disallowed.
  pub fn with_weight_bounds(mut self, lower: f64, upper: f64) -> Result<Self> {
    if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) {
      return Err(PortfolioError::invalid(
        "weight_bounds",
        format!("bounds [{lower}, {upper}] must lie within [0, 1]"),
      ));
    }
    if lower > upper {
      return Err(PortfolioError::InfeasibleProblem(format!(
        "lower weight bound {lower} exceeds upper bound {upper}"
      )));
    }
    self.lower = lower;
    self.upper = upper;
    Ok(self)
  }

  pub fn evaluator(&self) -> &PortfolioEvaluator {
    &self.evaluator
  }

  /// Maximize the Sharpe ratio starting from `initial_guess` (equal weights when `None`).
  ///
  /// A run that stops before convergence still returns its best point with
  /// `converged = false`. So does a run ending on a zero-volatility allocation, whose metrics
  /// then carry a non-finite Sharpe ratio.
  pub fn optimize(
    &self,
    stats: &Statistics,
    initial_guess: Option<&WeightVector>,
  ) -> Result<OptimizationResult> {
    let n = stats.asset_count();
    let x0 = match initial_guess {
      Some(w) if w.len() != n => {
        return Err(PortfolioError::DimensionMismatch {
          expected: n,
          actual: w.len(),
        })
      }
      Some(w) => w.to_vec(),
      None => WeightVector::uniform(n)?.into_inner(),
    };

    let mut solver = self.solver.clone();
    solver.set_bounds(vec![Bound::new(self.lower, self.upper); n])?;
    solver.set_equality_constraints(vec![LinearConstraint::budget(n)])?;

    let problem = NegativeSharpe {
      evaluator: &self.evaluator,
      stats,
    };
    let outcome = solver.minimize(&problem, &x0)?;

    let weights = WeightVector::from_solver(&outcome.x, self.lower, self.upper)?;
    let (metrics, converged) = match self.evaluator.evaluate(&weights, stats) {
      Ok(metrics) => (metrics, outcome.converged),
      Err(PortfolioError::DegenerateVolatility { volatility }) => {
        warn!(volatility, "optimal allocation has degenerate volatility");
        (self.evaluator.evaluate_lenient(&weights, stats)?, false)
      }
      Err(e) => return Err(e),
    };

    if converged {
      debug!(
        iterations = outcome.iterations,
        sharpe = metrics.sharpe_ratio,
        "sharpe optimization converged"
      );
    } else {
      warn!(
        iterations = outcome.iterations,
        sharpe = metrics.sharpe_ratio,
        "sharpe optimization stopped before convergence"
      );
    }

    Ok(OptimizationResult {
      weights,
      metrics,
      converged,
      iterations: outcome.iterations,
    })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  use super::*;
  use crate::portfolio::sampler::RandomPortfolioSampler;
  use crate::portfolio::solver::ProjectedNelderMead;

  fn two_asset_stats() -> Statistics {
    Statistics::from_moments(
      vec![0.001, 0.0005],
      vec![vec![0.0004, 0.0001], vec![0.0001, 0.0009]],
    )
    .unwrap()
  }

  fn five_asset_stats() -> Statistics {
    Statistics::from_moments(
      vec![0.0009, 0.0006, 0.0004, 0.0007, -0.0001],
      vec![
        vec![0.00040, 0.00010, 0.00004, 0.00012, 0.00002],
        vec![0.00010, 0.00025, 0.00003, 0.00008, 0.00001],
        vec![0.00004, 0.00003, 0.00010, 0.00002, 0.00001],
        vec![0.00012, 0.00008, 0.00002, 0.00036, 0.00003],
        vec![0.00002, 0.00001, 0.00001, 0.00003, 0.00020],
      ],
    )
    .unwrap()
  }

  fn assert_feasible(w: &WeightVector) {
    assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    assert!(w.iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn favors_higher_return_asset() {
    let stats = two_asset_stats();
    let optimizer = SharpeOptimizer::default();
    let result = optimizer.optimize(&stats, None).unwrap();

    assert!(result.converged);
    assert_feasible(&result.weights);
    assert!(result.weights[0] > 0.5);

    let uniform = optimizer
      .evaluator()
      .evaluate(&[0.5, 0.5], &stats)
      .unwrap();
    assert!(result.metrics.sharpe_ratio > uniform.sharpe_ratio);

    // Interior tangency portfolio: w ∝ Σ⁻¹μ ∝ (0.0085, 0.001)
    assert_abs_diff_eq!(result.weights[0], 0.0085 / 0.0095, epsilon = 1e-4);
  }

  #[test]
  fn metrics_round_trip_through_evaluator() {
    let stats = five_asset_stats();
    let optimizer = SharpeOptimizer::new(PortfolioEvaluator::new(0.02, 252));
    let result = optimizer.optimize(&stats, None).unwrap();

    let again = optimizer.evaluator().evaluate(&result.weights, &stats).unwrap();
    assert_eq!(again, result.metrics);
    assert_feasible(&result.weights);
  }

  #[test]
  fn beats_every_random_sample() {
    let stats = five_asset_stats();
    let evaluator = PortfolioEvaluator::new(0.01, 252);
    let result = SharpeOptimizer::new(evaluator).optimize(&stats, None).unwrap();
    let samples = RandomPortfolioSampler::new(evaluator)
      .sample(5, &stats, 2000, &mut StdRng::seed_from_u64(42))
      .unwrap();

    let best_sampled = samples.max_sharpe().unwrap().metrics.sharpe_ratio;
    assert!(result.metrics.sharpe_ratio >= best_sampled - 1e-9);
    // The negative-mean asset is dropped entirely.
    assert!(result.weights[4] < 1e-6);
  }

  #[test]
  fn identical_assets_keep_the_uniform_sharpe() {
    let stats = Statistics::from_moments(
      vec![0.0008, 0.0008],
      vec![vec![0.0004, 0.0004], vec![0.0004, 0.0004]],
    )
    .unwrap();
    let optimizer = SharpeOptimizer::default();
    let result = optimizer.optimize(&stats, None).unwrap();
    let uniform = optimizer
      .evaluator()
      .evaluate(&[0.5, 0.5], &stats)
      .unwrap();

    assert_feasible(&result.weights);
    assert_abs_diff_eq!(result.metrics.sharpe_ratio, uniform.sharpe_ratio, epsilon = 1e-9);
  }

  #[test]
  fn custom_initial_guess_reaches_same_optimum() {
    let stats = two_asset_stats();
    let optimizer = SharpeOptimizer::default();
    let from_uniform = optimizer.optimize(&stats, None).unwrap();
    let guess = WeightVector::new(vec![0.05, 0.95]).unwrap();
    let from_guess = optimizer.optimize(&stats, Some(&guess)).unwrap();

    assert_abs_diff_eq!(
      from_guess.metrics.sharpe_ratio,
      from_uniform.metrics.sharpe_ratio,
      epsilon = 1e-7
    );

    let wrong = WeightVector::uniform(3).unwrap();
    assert!(matches!(
      optimizer.optimize(&stats, Some(&wrong)),
      Err(PortfolioError::DimensionMismatch { .. })
    ));
  }

  #[test]
  fn capped_weights_bind() {
    let stats = two_asset_stats();
    let optimizer = SharpeOptimizer::default()
      .with_weight_bounds(0.0, 0.6)
      .unwrap();
    let result = optimizer.optimize(&stats, None).unwrap();

    assert_abs_diff_eq!(result.weights[0], 0.6, epsilon = 1e-7);
    assert_abs_diff_eq!(result.weights[1], 0.4, epsilon = 1e-7);
  }

  #[test]
  fn unreachable_budget_is_infeasible() {
    let optimizer = SharpeOptimizer::default()
      .with_weight_bounds(0.0, 0.4)
      .unwrap();
    assert!(matches!(
      optimizer.optimize(&two_asset_stats(), None),
      Err(PortfolioError::InfeasibleProblem(_))
    ));
    assert!(SharpeOptimizer::default().with_weight_bounds(0.7, 0.2).is_err());
    assert!(SharpeOptimizer::default().with_weight_bounds(-0.1, 1.0).is_err());
  }

  #[test]
  fn iteration_cap_reports_non_convergence() {
    let optimizer = SharpeOptimizer::with_solver(
      PortfolioEvaluator::default(),
      Slsqp::default().with_max_iters(1),
    );
    let result = optimizer.optimize(&five_asset_stats(), None).unwrap();

    assert!(!result.converged);
    assert_feasible(&result.weights);
  }

  #[test]
  fn degenerate_points_become_a_flat_penalty() {
    let stats = Statistics::from_moments(
      vec![0.001, 0.0005],
      vec![vec![0.0, 0.0], vec![0.0, 0.0]],
    )
    .unwrap();
    let evaluator = PortfolioEvaluator::default();
    let problem = NegativeSharpe {
      evaluator: &evaluator,
      stats: &stats,
    };

    assert_eq!(problem.cost(&vec![0.5, 0.5]).unwrap(), DEGENERATE_PENALTY);
    assert_eq!(problem.gradient(&vec![0.5, 0.5]).unwrap(), vec![0.0, 0.0]);
  }

  #[test]
  fn zero_covariance_returns_a_degenerate_result() {
    let stats = Statistics::from_moments(
      vec![0.001, 0.0005],
      vec![vec![0.0, 0.0], vec![0.0, 0.0]],
    )
    .unwrap();
    let result = SharpeOptimizer::default().optimize(&stats, None).unwrap();

    assert!(!result.converged);
    assert_feasible(&result.weights);
    assert_eq!(result.metrics.sharpe_ratio, f64::INFINITY);
    assert_eq!(result.metrics.annualized_volatility, 0.0);
  }

  #[test]
  fn riskless_asset_below_the_hurdle_is_dropped() {
    // Second asset has no variance and earns less than the risk-free rate.
    let stats = Statistics::from_moments(
      vec![0.001, 0.0001],
      vec![vec![0.0004, 0.0], vec![0.0, 0.0]],
    )
    .unwrap();
    let result = SharpeOptimizer::new(PortfolioEvaluator::new(0.03, 252))
      .optimize(&stats, None)
      .unwrap();

    assert!(result.converged);
    assert_feasible(&result.weights);
    assert_abs_diff_eq!(result.weights[0], 1.0, epsilon = 1e-7);
  }

  #[test]
  fn riskless_asset_above_the_hurdle_does_not_fail() {
    // Sharpe grows without bound as the weight moves onto the riskless asset.
    let stats = Statistics::from_moments(
      vec![0.001, 0.0004],
      vec![vec![0.0004, 0.0], vec![0.0, 0.0]],
    )
    .unwrap();
    let optimizer = SharpeOptimizer::new(PortfolioEvaluator::new(0.02, 252));
    let result = optimizer.optimize(&stats, None).unwrap();
    let uniform = optimizer
      .evaluator()
      .evaluate(&[0.5, 0.5], &stats)
      .unwrap();

    assert_feasible(&result.weights);
    assert!(result.weights[1] > 0.5);
    assert!(result.metrics.sharpe_ratio > uniform.sharpe_ratio);
  }

  #[test]
  fn nelder_mead_backend_is_interchangeable() {
    let stats = two_asset_stats();
    let slsqp = SharpeOptimizer::default().optimize(&stats, None).unwrap();
    let nm = SharpeOptimizer::with_solver(PortfolioEvaluator::default(), ProjectedNelderMead::default())
      .optimize(&stats, None)
      .unwrap();

    assert_feasible(&nm.weights);
    assert_abs_diff_eq!(nm.metrics.sharpe_ratio, slsqp.metrics.sharpe_ratio, epsilon = 1e-6);
  }
}
