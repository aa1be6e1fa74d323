//! # frontier-rs
//!
//! $$
//! \max_{\mathbf{w}\ge 0,\ \mathbf{1}^\top\mathbf{w}=1} \frac{P\,\mathbf{w}^\top\mu - r_f}{\sqrt{P\,\mathbf{w}^\top\Sigma\mathbf{w}}}
//! $$
//!
//! Classical single-period mean-variance portfolio optimization: return and covariance
//! estimation from price panels, Monte Carlo sampling of the long-only simplex, and
//! constrained Sharpe-ratio maximization.

pub mod error;
pub mod portfolio;

pub use error::PortfolioError;
pub use error::Result;

pub mod prelude {
  pub use crate::error::PortfolioError;
  pub use crate::portfolio::*;
}
