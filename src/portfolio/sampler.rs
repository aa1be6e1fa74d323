//! # Random Portfolio Sampler
//!
//! $$
//! u_i \sim \mathcal U(0,1),\qquad w_i = \frac{u_i}{\sum_j u_j}
//! $$
//!
//! Monte Carlo exploration of the long-only simplex. Every draw is independent, so the
//! parallel variant only needs a per-draw generator to stay reproducible.

use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand::distributions::Open01;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;
use tracing::warn;

use super::data::Statistics;
use super::evaluator::PortfolioEvaluator;
use super::types::PortfolioSample;
use super::types::SampleSet;
use super::types::WeightVector;
use crate::error::PortfolioError;
use crate::error::Result;

/// Draws uniformly normalized allocations and scores them with a [`PortfolioEvaluator`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomPortfolioSampler {
  evaluator: PortfolioEvaluator,
}

impl RandomPortfolioSampler {
  pub fn new(evaluator: PortfolioEvaluator) -> Self {
    Self { evaluator }
  }

  pub fn evaluator(&self) -> &PortfolioEvaluator {
    &self.evaluator
  }

  /// Draw `n` portfolios from `rng` in order.
  pub fn sample<R: Rng + ?Sized>(
    &self,
    asset_count: usize,
    stats: &Statistics,
    n: usize,
    rng: &mut R,
  ) -> Result<SampleSet> {
    check_inputs(asset_count, stats, n)?;

    let draws: Array2<f64> = Array2::random_using((n, asset_count), Open01, rng);
    let samples = draws
      .outer_iter()
      .map(|row| self.score(row.to_vec(), stats))
      .collect::<Result<Vec<_>>>()?;

    Ok(self.finish(samples))
  }

  /// Draw `n` portfolios across the rayon pool.
  ///
  /// Draw `i` uses its own generator seeded from `(seed, i)`, so the result depends only on
  /// `seed` and is returned in draw order whatever the thread count.
  pub fn sample_par(
    &self,
    asset_count: usize,
    stats: &Statistics,
    n: usize,
    seed: u64,
  ) -> Result<SampleSet> {
    check_inputs(asset_count, stats, n)?;

    let samples = (0..n)
      .into_par_iter()
      .map(|i| {
        let mut rng = StdRng::seed_from_u64(draw_seed(seed, i as u64));
        let raw: Vec<f64> = (0..asset_count).map(|_| rng.sample::<f64, _>(Open01)).collect();
        self.score(raw, stats)
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(self.finish(samples))
  }

  fn score(&self, raw: Vec<f64>, stats: &Statistics) -> Result<PortfolioSample> {
    let weights = WeightVector::normalized(raw)?;
    let metrics = self.evaluator.evaluate_lenient(&weights, stats)?;
    Ok(PortfolioSample { weights, metrics })
  }

  fn finish(&self, samples: Vec<PortfolioSample>) -> SampleSet {
    let set = SampleSet::from_samples(samples);
    let degenerate = set.degenerate_count();
    if degenerate > 0 {
      warn!(degenerate, total = set.len(), "sampled portfolios with degenerate volatility");
    }
    debug!(samples = set.len(), "random portfolio sampling finished");
    set
  }
}

fn check_inputs(asset_count: usize, stats: &Statistics, n: usize) -> Result<()> {
  if n == 0 {
    return Err(PortfolioError::invalid("n", "sample count must be at least 1"));
  }
  if asset_count != stats.asset_count() {
    return Err(PortfolioError::DimensionMismatch {
      expected: stats.asset_count(),
      actual: asset_count,
    });
  }
  Ok(())
}

/// SplitMix64 finalizer over `seed + index * golden_gamma`.
fn draw_seed(seed: u64, index: u64) -> u64 {
  let mut z = seed.wrapping_add(index.wrapping_mul(0x9E37_79B9_7F4A_7C15));
  z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
  z ^ (z >> 31)
}
