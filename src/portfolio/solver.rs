//! # Constrained Solvers
//!
//! $$
//! \min_{\mathbf{x}} f(\mathbf{x})\quad\text{s.t.}\quad A\mathbf{x}=\mathbf{b},\ \ \mathbf{l}\le\mathbf{x}\le\mathbf{u}
//! $$
//!
//! Minimizers for smooth objectives under simple bounds and linear equality constraints.
//! Objectives are expressed with argmin's [`CostFunction`] and [`Gradient`] traits so any
//! backend behind [`ConstrainedOptimizer`] can be swapped in.

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::core::Gradient;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::solver::neldermead::NelderMead;
use clarabel::algebra::CscMatrix;
use clarabel::solver::DefaultSettingsBuilder;
use clarabel::solver::DefaultSolver;
use clarabel::solver::IPSolver;
use clarabel::solver::SolverStatus;
use clarabel::solver::SupportedConeT;
use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;

const FEASIBILITY_TOLERANCE: f64 = 1e-12;
/// Predicted decreases below this (relative) level count as stationary when no step is accepted.
const STATIONARY_DECREASE: f64 = 1e-8;

/// Box constraint on one variable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bound {
  pub lower: f64,
  pub upper: f64,
}

impl Bound {
  pub fn new(lower: f64, upper: f64) -> Self {
    Self { lower, upper }
  }
}

/// `coefficients · x = rhs`
#[derive(Clone, Debug, PartialEq)]
pub struct LinearConstraint {
  pub coefficients: Vec<f64>,
  pub rhs: f64,
}

impl LinearConstraint {
  /// `sum(x) = 1` over `n` variables.
  pub fn budget(n: usize) -> Self {
    Self {
      coefficients: vec![1.0; n],
      rhs: 1.0,
    }
  }

  fn residual(&self, x: &[f64]) -> f64 {
    dot(&self.coefficients, x) - self.rhs
  }
}

/// Point returned by a constrained solve.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverOutcome {
  pub x: Vec<f64>,
  pub cost: f64,
  pub iterations: usize,
  pub converged: bool,
}

/// Capability shared by constrained minimizers.
pub trait ConstrainedOptimizer {
  /// One bound per variable.
  fn set_bounds(&mut self, bounds: Vec<Bound>) -> Result<()>;

  fn set_equality_constraints(&mut self, constraints: Vec<LinearConstraint>) -> Result<()>;

  /// Minimize `problem` from `x0`. Fails with [`PortfolioError::InfeasibleProblem`] when the
  /// configured constraints admit no point.
  fn minimize<P>(&self, problem: &P, x0: &[f64]) -> Result<SolverOutcome>
  where
    P: CostFunction<Param = Vec<f64>, Output = f64>
      + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>;
}

/// Bounds plus linear equalities, with Euclidean projection onto their intersection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeasibleSet {
  bounds: Vec<Bound>,
  equalities: Vec<LinearConstraint>,
}

impl FeasibleSet {
  fn set_bounds(&mut self, bounds: Vec<Bound>) -> Result<()> {
    if let Some((i, b)) = bounds
      .iter()
      .enumerate()
      .find(|(_, b)| b.lower.is_nan() || b.upper.is_nan() || b.lower > b.upper)
    {
      return Err(PortfolioError::InfeasibleProblem(format!(
        "bound {i} has lower {} above upper {}",
        b.lower, b.upper
      )));
    }
    self.bounds = bounds;
    Ok(())
  }

  fn set_equalities(&mut self, equalities: Vec<LinearConstraint>) -> Result<()> {
    if equalities
      .iter()
      .any(|c| !c.rhs.is_finite() || c.coefficients.iter().any(|a| !a.is_finite()))
    {
      return Err(PortfolioError::invalid(
        "equality_constraints",
        "coefficients and right-hand sides must be finite",
      ));
    }
    self.equalities = equalities;
    Ok(())
  }

  fn lower(&self, i: usize) -> f64 {
    self.bounds.get(i).map_or(f64::NEG_INFINITY, |b| b.lower)
  }

  fn upper(&self, i: usize) -> f64 {
    self.bounds.get(i).map_or(f64::INFINITY, |b| b.upper)
  }

  /// Dimension checks and the per-constraint reachability test over the box.
  fn check(&self, n: usize) -> Result<()> {
    if !self.bounds.is_empty() && self.bounds.len() != n {
      return Err(PortfolioError::DimensionMismatch {
        expected: n,
        actual: self.bounds.len(),
      });
    }

    for c in &self.equalities {
      if c.coefficients.len() != n {
        return Err(PortfolioError::DimensionMismatch {
          expected: n,
          actual: c.coefficients.len(),
        });
      }

      let (lo, hi) = c
        .coefficients
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(lo, hi), (i, &a)| {
          let (a_lo, a_hi) = if a >= 0.0 {
            (a * self.lower(i), a * self.upper(i))
          } else {
            (a * self.upper(i), a * self.lower(i))
          };
          if a == 0.0 {
            (lo, hi)
          } else {
            (lo + a_lo, hi + a_hi)
          }
        });

      if c.rhs < lo - FEASIBILITY_TOLERANCE || c.rhs > hi + FEASIBILITY_TOLERANCE {
        return Err(PortfolioError::InfeasibleProblem(format!(
          "equality target {} is outside the reachable range [{lo}, {hi}]",
          c.rhs
        )));
      }
    }

    Ok(())
  }

  fn clamp(&self, x: &mut [f64]) {
    for (i, xi) in x.iter_mut().enumerate() {
      *xi = xi.clamp(self.lower(i), self.upper(i));
    }
  }

  /// Project `x` onto the set by cyclic exact projections onto each `box ∩ {a·x = b}`.
  pub fn project(&self, x: &[f64]) -> Result<Vec<f64>> {
    let mut out: Vec<f64> = x.iter().map(|v| if v.is_finite() { *v } else { 0.0 }).collect();

    if self.equalities.is_empty() {
      self.clamp(&mut out);
      return Ok(out);
    }

    for _ in 0..200 {
      for c in &self.equalities {
        self.project_single(&mut out, c);
      }
      if self.max_violation(&out) <= 1e-10 {
        return Ok(out);
      }
    }

    Err(PortfolioError::InfeasibleProblem(format!(
      "no point satisfies all constraints (violation {:e})",
      self.max_violation(&out)
    )))
  }

  /// `phi(tau) = a · clamp(x - tau a)` is non-increasing in `tau`; bisect for `phi = b`.
  fn project_single(&self, x: &mut [f64], c: &LinearConstraint) {
    let base = x.to_vec();
    let a = &c.coefficients;
    let shifted = |tau: f64| -> Vec<f64> {
      base
        .iter()
        .enumerate()
        .map(|(i, &xi)| (xi - tau * a[i]).clamp(self.lower(i), self.upper(i)))
        .collect()
    };
    let phi = |tau: f64| dot(a, &shifted(tau));

    let mut lo = -1.0;
    let mut hi = 1.0;
    let mut expand = 0;
    while (phi(lo) < c.rhs || phi(hi) > c.rhs) && expand < 200 {
      lo *= 2.0;
      hi *= 2.0;
      expand += 1;
    }

    for _ in 0..200 {
      let mid = 0.5 * (lo + hi);
      if phi(mid) > c.rhs {
        lo = mid;
      } else {
        hi = mid;
      }
      if hi - lo <= f64::EPSILON * (1.0 + mid.abs()) {
        break;
      }
    }

    let tau = 0.5 * (lo + hi);
    x.copy_from_slice(&shifted(tau));
  }

  fn max_violation(&self, x: &[f64]) -> f64 {
    let eq = self
      .equalities
      .iter()
      .map(|c| c.residual(x).abs())
      .fold(0.0, f64::max);
    let bx = x
      .iter()
      .enumerate()
      .map(|(i, &xi)| (self.lower(i) - xi).max(xi - self.upper(i)).max(0.0))
      .fold(0.0, f64::max);
    eq.max(bx)
  }

  fn equality_matrix(&self, n: usize) -> DMatrix<f64> {
    DMatrix::from_fn(self.equalities.len(), n, |r, c| self.equalities[r].coefficients[c])
  }
}

/// Sequential quadratic programming with a damped-BFGS Hessian; each QP subproblem goes to
/// clarabel. Iterates stay feasible, so the line search works on the objective alone.
#[derive(Clone, Debug, PartialEq)]
pub struct Slsqp {
  feasible: FeasibleSet,
  pub max_iters: usize,
  /// Stop when the objective improves, or is predicted to improve, by less than
  /// `ftol * (1 + |f|)`.
  pub ftol: f64,
  /// Stop when the QP step is shorter than `xtol * (1 + |x|)`.
  pub xtol: f64,
}

impl Default for Slsqp {
  fn default() -> Self {
    Self {
      feasible: FeasibleSet::default(),
      max_iters: 100,
      ftol: 1e-10,
      xtol: 1e-10,
    }
  }
}

impl Slsqp {
  pub fn with_max_iters(mut self, max_iters: usize) -> Self {
    self.max_iters = max_iters;
    self
  }

  pub fn with_tolerances(mut self, ftol: f64, xtol: f64) -> Self {
    self.ftol = ftol;
    self.xtol = xtol;
    self
  }
}

impl ConstrainedOptimizer for Slsqp {
  fn set_bounds(&mut self, bounds: Vec<Bound>) -> Result<()> {
    self.feasible.set_bounds(bounds)
  }

  fn set_equality_constraints(&mut self, constraints: Vec<LinearConstraint>) -> Result<()> {
    self.feasible.set_equalities(constraints)
  }

  fn minimize<P>(&self, problem: &P, x0: &[f64]) -> Result<SolverOutcome>
  where
    P: CostFunction<Param = Vec<f64>, Output = f64>
      + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
  {
    let n = x0.len();
    self.feasible.check(n)?;

    let mut x = self.feasible.project(x0)?;
    let mut f = problem.cost(&x)?;
    let mut g = problem.gradient(&x)?;
    let e = self.feasible.equality_matrix(n);
    let mut hess = DMatrix::<f64>::identity(n, n);
    let mut converged = false;
    let mut iterations = 0;
    let mut reset = false;

    while iterations < self.max_iters {
      iterations += 1;

      let lo = DVector::from_fn(n, |i, _| self.feasible.lower(i) - x[i]);
      let hi = DVector::from_fn(n, |i, _| self.feasible.upper(i) - x[i]);
      let Some(d) = solve_qp(&hess, &g, &e, &lo, &hi)? else {
        break;
      };

      let x_norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
      let slope = dot(&g, d.as_slice());
      if d.norm() <= self.xtol * (1.0 + x_norm) || -slope <= self.ftol * (1.0 + f.abs()) {
        converged = true;
        break;
      }

      let Some((x_new, f_new)) = line_search(problem, &self.feasible, &x, f, d.as_slice(), slope)?
      else {
        if -slope <= STATIONARY_DECREASE * (1.0 + f.abs()) {
          converged = true;
          break;
        }
        if reset {
          break;
        }
        hess = DMatrix::identity(n, n);
        reset = true;
        continue;
      };
      let g_new = problem.gradient(&x_new)?;

      let s = DVector::from_iterator(n, x_new.iter().zip(&x).map(|(a, b)| a - b));
      let y = DVector::from_iterator(n, g_new.iter().zip(&g).map(|(a, b)| a - b));
      damped_bfgs_update(&mut hess, &s, &y);
      reset = false;

      let improvement = f - f_new;
      x = x_new;
      f = f_new;
      g = g_new;

      if improvement.abs() <= self.ftol * (1.0 + f.abs()) {
        converged = true;
        break;
      }
    }

    debug!(iterations, converged, cost = f, "slsqp finished");

    Ok(SolverOutcome {
      x,
      cost: f,
      iterations,
      converged,
    })
  }
}

/// Armijo backtracking along a feasible direction.
fn line_search<P>(
  problem: &P,
  feasible: &FeasibleSet,
  x: &[f64],
  f: f64,
  d: &[f64],
  slope: f64,
) -> Result<Option<(Vec<f64>, f64)>>
where
  P: CostFunction<Param = Vec<f64>, Output = f64>,
{
  let mut alpha = 1.0;
  for _ in 0..50 {
    let mut trial: Vec<f64> = x.iter().zip(d).map(|(xi, di)| xi + alpha * di).collect();
    feasible.clamp(&mut trial);
    let f_trial = problem.cost(&trial)?;
    if f_trial.is_finite() && f_trial <= f + 1e-4 * alpha * slope {
      return Ok(Some((trial, f_trial)));
    }
    alpha *= 0.5;
  }
  Ok(None)
}

/// Powell-damped BFGS update keeping `hess` positive definite.
fn damped_bfgs_update(hess: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>) {
  let hs = &*hess * s;
  let shs = s.dot(&hs);
  if shs <= 1e-16 {
    return;
  }

  let sy = s.dot(y);
  let theta = if sy >= 0.2 * shs {
    1.0
  } else {
    0.8 * shs / (shs - sy)
  };
  let r = y * theta + &hs * (1.0 - theta);
  let sr = s.dot(&r);
  if sr <= 1e-16 {
    return;
  }

  *hess -= &hs * hs.transpose() / shs;
  *hess += &r * r.transpose() / sr;
}

/// `min g·d + ½ dᵀHd  s.t.  E d = 0,  lo ≤ d ≤ hi` with clarabel's interior-point solver.
///
/// Returns `None` when clarabel stops short of an (almost) solved status.
fn solve_qp(
  hess: &DMatrix<f64>,
  g: &[f64],
  e: &DMatrix<f64>,
  lo: &DVector<f64>,
  hi: &DVector<f64>,
) -> Result<Option<DVector<f64>>> {
  let n = g.len();
  let m = e.nrows();

  // Upper triangle of the symmetrized Hessian, column-major.
  let mut p_colptr = vec![0];
  let mut p_rowval = Vec::new();
  let mut p_nzval = Vec::new();
  for j in 0..n {
    for i in 0..=j {
      let v = 0.5 * (hess[(i, j)] + hess[(j, i)]);
      if v != 0.0 {
        p_rowval.push(i);
        p_nzval.push(v);
      }
    }
    p_colptr.push(p_nzval.len());
  }
  let p = CscMatrix::new(n, n, p_colptr, p_rowval, p_nzval);

  // Rows: equalities, then `d_i <= hi_i`, then `-d_i <= -lo_i` for every finite bound.
  let upper: Vec<usize> = (0..n).filter(|&i| hi[i].is_finite()).collect();
  let lower: Vec<usize> = (0..n).filter(|&i| lo[i].is_finite()).collect();
  let rows = m + upper.len() + lower.len();

  let mut a_colptr = vec![0];
  let mut a_rowval = Vec::new();
  let mut a_nzval = Vec::new();
  for j in 0..n {
    for r in 0..m {
      if e[(r, j)] != 0.0 {
        a_rowval.push(r);
        a_nzval.push(e[(r, j)]);
      }
    }
    if let Ok(k) = upper.binary_search(&j) {
      a_rowval.push(m + k);
      a_nzval.push(1.0);
    }
    if let Ok(k) = lower.binary_search(&j) {
      a_rowval.push(m + upper.len() + k);
      a_nzval.push(-1.0);
    }
    a_colptr.push(a_nzval.len());
  }
  let a = CscMatrix::new(rows, n, a_colptr, a_rowval, a_nzval);

  let mut b = vec![0.0; m];
  b.extend(upper.iter().map(|&i| hi[i]));
  b.extend(lower.iter().map(|&i| -lo[i]));

  let mut cones = Vec::with_capacity(2);
  if m > 0 {
    cones.push(SupportedConeT::ZeroConeT(m));
  }
  if rows > m {
    cones.push(SupportedConeT::NonnegativeConeT(rows - m));
  }

  let settings = DefaultSettingsBuilder::default()
    .max_iter(200)
    .tol_gap_abs(1e-10)
    .tol_gap_rel(1e-10)
    .tol_feas(1e-10)
    .verbose(false)
    .build()
    .map_err(|e| PortfolioError::Solver(format!("invalid QP settings: {e}")))?;

  let mut solver = DefaultSolver::new(&p, g, &a, &b, &cones, settings)
    .map_err(|e| PortfolioError::Solver(format!("QP setup failed: {e:?}")))?;
  solver.solve();

  Ok(match solver.solution.status {
    SolverStatus::Solved | SolverStatus::AlmostSolved => {
      Some(DVector::from_column_slice(&solver.solution.x))
    }
    status => {
      debug!(?status, "QP subproblem not solved");
      None
    }
  })
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Derivative-free alternative: argmin's Nelder-Mead over the projection onto the feasible set.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedNelderMead {
  feasible: FeasibleSet,
  pub max_iters: u64,
  pub sd_tolerance: f64,
  /// Edge length of the initial simplex.
  pub step: f64,
}

impl Default for ProjectedNelderMead {
  fn default() -> Self {
    Self {
      feasible: FeasibleSet::default(),
      max_iters: 5000,
      sd_tolerance: 1e-12,
      step: 0.1,
    }
  }
}

struct ProjectedCost<'a, P> {
  problem: &'a P,
  feasible: &'a FeasibleSet,
}

impl<P> CostFunction for ProjectedCost<'_, P>
where
  P: CostFunction<Param = Vec<f64>, Output = f64>,
{
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let projected = self.feasible.project(x)?;
    self.problem.cost(&projected)
  }
}

impl ConstrainedOptimizer for ProjectedNelderMead {
  fn set_bounds(&mut self, bounds: Vec<Bound>) -> Result<()> {
    self.feasible.set_bounds(bounds)
  }

  fn set_equality_constraints(&mut self, constraints: Vec<LinearConstraint>) -> Result<()> {
    self.feasible.set_equalities(constraints)
  }

  fn minimize<P>(&self, problem: &P, x0: &[f64]) -> Result<SolverOutcome>
  where
    P: CostFunction<Param = Vec<f64>, Output = f64>
      + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
  {
    let n = x0.len();
    self.feasible.check(n)?;
    let start = self.feasible.project(x0)?;

    let mut simplex = Vec::with_capacity(n + 1);
    simplex.push(start.clone());
    for i in 0..n {
      let mut point = start.clone();
      point[i] += self.step;
      simplex.push(point);
    }

    let cost = ProjectedCost {
      problem,
      feasible: &self.feasible,
    };
    let solver = NelderMead::new(simplex).with_sd_tolerance(self.sd_tolerance)?;
    let res = Executor::new(cost, solver)
      .configure(|state| state.max_iters(self.max_iters))
      .run()?;

    let converged = matches!(
      res.state.get_termination_reason(),
      Some(TerminationReason::SolverConverged)
    );
    let iterations = usize::try_from(res.state.get_iter()).unwrap_or(usize::MAX);
    let best = res.state.best_param.clone().unwrap_or(start);
    let x = self.feasible.project(&best)?;
    let cost = problem.cost(&x)?;

    debug!(iterations, converged, cost, "nelder-mead finished");

    Ok(SolverOutcome {
      x,
      cost,
      iterations,
      converged,
    })
  }
}
