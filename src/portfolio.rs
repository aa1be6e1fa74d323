//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Return estimation, Monte Carlo portfolio sampling and maximum-Sharpe optimization.

pub mod data;
pub mod engine;
pub mod evaluator;
pub mod optimizers;
pub mod report;
pub mod sampler;
pub mod solver;
pub mod types;

pub use data::estimate;
pub use data::PortfolioPath;
pub use data::PriceSeries;
pub use data::ReturnMode;
pub use data::ReturnSeries;
pub use data::Statistics;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use engine::PortfolioReport;
pub use evaluator::PortfolioEvaluator;
pub use evaluator::TRADING_DAYS;
pub use optimizers::SharpeOptimizer;
pub use sampler::RandomPortfolioSampler;
pub use solver::Bound;
pub use solver::ConstrainedOptimizer;
pub use solver::LinearConstraint;
pub use solver::ProjectedNelderMead;
pub use solver::Slsqp;
pub use solver::SolverOutcome;
pub use types::OptimizationResult;
pub use types::PortfolioMetrics;
pub use types::PortfolioSample;
pub use types::SampleSet;
pub use types::WeightVector;
