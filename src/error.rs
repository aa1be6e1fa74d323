//! # Errors
//!
//! Failure taxonomy shared by estimation, evaluation, sampling and optimization.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PortfolioError {
  /// Fewer than two assets, or fewer than two usable aligned price rows.
  #[error("Insufficient data: {0}")]
  InsufficientData(String),

  /// Portfolio volatility is zero or numerically indistinguishable from zero.
  #[error("Degenerate volatility: {volatility:e} is too close to zero")]
  DegenerateVolatility { volatility: f64 },

  /// The bound and equality constraints admit no feasible point.
  #[error("Infeasible problem: {0}")]
  InfeasibleProblem(String),

  #[error("Invalid input: {field} - {reason}")]
  InvalidInput { field: String, reason: String },

  #[error("Dimension mismatch: expected {expected}, got {actual}")]
  DimensionMismatch { expected: usize, actual: usize },

  /// Error raised by an underlying numerical backend.
  #[error("Solver error: {0}")]
  Solver(String),
}

impl PortfolioError {
  pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
    PortfolioError::InvalidInput {
      field: field.to_string(),
      reason: reason.into(),
    }
  }
}

impl From<argmin::core::Error> for PortfolioError {
  fn from(e: argmin::core::Error) -> Self {
    PortfolioError::Solver(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, PortfolioError>;
