//! Efficient-frontier solver.
//!
//! Every objective reduces to minimum-variance quadratic programs over the
//! full-investment, bound and group-cap constraints, optionally pinned to a
//! target return. Sharpe maximization and target-risk searches walk the
//! efficient branch between the minimum-volatility and maximum-return
//! portfolios. Hierarchical risk parity skips the programs and only checks
//! its weights against the constraints.

use crate::domain::allocation::Allocation;
use crate::domain::config::SolverConfig;
use crate::domain::constraints::{Constraint, ResolvedConstraints};
use crate::domain::error::FundfolioError;
use crate::domain::hrp::hrp_weights;
use crate::domain::performance::Performance;
use crate::domain::qp::QuadraticProgram;
use crate::domain::returns::MomentEstimates;
use nalgebra::{DMatrix, DVector};
use std::fmt;

const GOLDEN_SECTION_ITERATIONS: usize = 80;
const BISECTION_ITERATIONS: usize = 100;
const BOUND_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Objective {
    MaxSharpe,
    MinVolatility,
    TargetReturn(f64),
    /// Target annualized volatility.
    TargetRisk(f64),
    HierarchicalRiskParity,
}

impl Objective {
    /// Builds an objective from its configuration name; the `target_*`
    /// objectives require `target`.
    pub fn from_name(name: &str, target: Option<f64>) -> Result<Objective, String> {
        let normalized = name.trim().to_lowercase().replace('-', "_");
        let need_target = || target.ok_or_else(|| format!("objective '{name}' requires a target"));
        match normalized.as_str() {
            "max_sharpe" => Ok(Objective::MaxSharpe),
            "min_volatility" => Ok(Objective::MinVolatility),
            "target_return" => Ok(Objective::TargetReturn(need_target()?)),
            "target_risk" => Ok(Objective::TargetRisk(need_target()?)),
            "hrp" | "hierarchical_risk_parity" => Ok(Objective::HierarchicalRiskParity),
            _ => Err(format!(
                "unknown objective '{name}' (expected max_sharpe, min_volatility, target_return, target_risk or hrp)"
            )),
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::MaxSharpe => write!(f, "max_sharpe"),
            Objective::MinVolatility => write!(f, "min_volatility"),
            Objective::TargetReturn(t) => write!(f, "target_return({t})"),
            Objective::TargetRisk(t) => write!(f, "target_risk({t})"),
            Objective::HierarchicalRiskParity => write!(f, "hrp"),
        }
    }
}

/// One sampled point on the efficient frontier.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierPoint {
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe: f64,
    pub weights: DVector<f64>,
}

/// Solves for portfolio weights under `objective`.
pub fn solve(
    moments: &MomentEstimates,
    constraints: &Constraint,
    objective: Objective,
    config: &SolverConfig,
) -> Result<Allocation, FundfolioError> {
    let problem = Frontier::new(moments, constraints)?;
    let w = match objective {
        Objective::MinVolatility => problem.min_volatility()?,
        Objective::TargetReturn(target) => problem.target_return(target)?,
        Objective::MaxSharpe => problem.max_sharpe(config.risk_free_rate)?,
        Objective::TargetRisk(target) => problem.target_risk(target)?,
        Objective::HierarchicalRiskParity => problem.hierarchical_risk_parity()?,
    };
    let allocation = finalize(w, &problem.resolved, &moments.funds, config)?;
    tracing::debug!(%objective, funds = moments.fund_count(), "frontier solve complete");
    Ok(allocation)
}

/// Samples `points` portfolios evenly spaced in expected return between the
/// minimum-volatility and maximum-return portfolios.
pub fn efficient_frontier(
    moments: &MomentEstimates,
    constraints: &Constraint,
    points: usize,
    config: &SolverConfig,
) -> Result<Vec<FrontierPoint>, FundfolioError> {
    if points == 0 {
        return Ok(Vec::new());
    }
    let problem = Frontier::new(moments, constraints)?;
    let min_vol = problem.min_volatility()?;
    let r_start = problem.expected_return(&min_vol);
    let (_, r_end) = problem.return_range();

    let mut out = Vec::with_capacity(points);
    for k in 0..points {
        let w = if k == 0 {
            min_vol.clone()
        } else {
            let t = k as f64 / (points - 1) as f64;
            problem.target_return(r_start + t * (r_end - r_start).max(0.0))?
        };
        let perf = Performance::of_vector(&w, moments, config.risk_free_rate);
        out.push(FrontierPoint {
            expected_return: perf.expected_return,
            volatility: perf.volatility,
            sharpe: perf.sharpe_ratio,
            weights: w,
        });
    }
    Ok(out)
}

struct Frontier<'a> {
    moments: &'a MomentEstimates,
    resolved: ResolvedConstraints,
    ineq: DMatrix<f64>,
    ineq_rhs: DVector<f64>,
    lowest: DVector<f64>,
    highest: DVector<f64>,
}

impl<'a> Frontier<'a> {
    fn new(moments: &'a MomentEstimates, constraints: &Constraint) -> Result<Self, FundfolioError> {
        let n = moments.fund_count();
        if n == 0 {
            return Err(FundfolioError::InsufficientData {
                reason: "no funds to optimize".to_string(),
            });
        }
        if moments.expected_returns.iter().any(|v| !v.is_finite())
            || moments.covariance.iter().any(|v| !v.is_finite())
        {
            return Err(FundfolioError::numerical(
                "non-finite expected returns or covariance",
            ));
        }
        if moments.covariance.clone().cholesky().is_none() {
            return Err(FundfolioError::NonConvexProblem {
                reason: format!(
                    "covariance of {} is not positive definite",
                    moments.funds.join(", ")
                ),
            });
        }

        let resolved = constraints.resolve(&moments.funds)?;
        let (ineq, ineq_rhs) = resolved.inequality_rows();
        let lowest = resolved.extreme_return(&moments.expected_returns, false);
        let highest = resolved.extreme_return(&moments.expected_returns, true);
        Ok(Self {
            moments,
            resolved,
            ineq,
            ineq_rhs,
            lowest,
            highest,
        })
    }

    fn expected_return(&self, w: &DVector<f64>) -> f64 {
        self.moments.expected_returns.dot(w)
    }

    fn volatility(&self, w: &DVector<f64>) -> f64 {
        (w.transpose() * &self.moments.covariance * w)[(0, 0)]
            .max(0.0)
            .sqrt()
    }

    /// Lowest and highest achievable expected return.
    fn return_range(&self) -> (f64, f64) {
        (
            self.expected_return(&self.lowest),
            self.expected_return(&self.highest),
        )
    }

    fn return_tolerance(&self) -> f64 {
        let (lo, hi) = self.return_range();
        1e-9 * (1.0 + lo.abs() + hi.abs())
    }

    fn program(&self, eq: DMatrix<f64>, eq_rhs: DVector<f64>) -> QuadraticProgram<'_> {
        QuadraticProgram {
            q: &self.moments.covariance,
            c: DVector::zeros(self.moments.fund_count()),
            eq,
            eq_rhs,
            ineq: &self.ineq,
            ineq_rhs: &self.ineq_rhs,
        }
    }

    fn min_volatility(&self) -> Result<DVector<f64>, FundfolioError> {
        let n = self.moments.fund_count();
        let qp = self.program(DMatrix::from_element(1, n, 1.0), DVector::from_element(1, 1.0));
        qp.solve(self.resolved.feasible_point())
    }

    fn target_return(&self, target: f64) -> Result<DVector<f64>, FundfolioError> {
        let (r_lo, r_hi) = self.return_range();
        let tol = self.return_tolerance();
        if !target.is_finite() || target > r_hi + tol || target < r_lo - tol {
            return Err(FundfolioError::infeasible(format!(
                "target return {target} is outside the achievable range [{r_lo:.6}, {r_hi:.6}]"
            )));
        }
        if r_hi - r_lo <= tol {
            return self.min_volatility();
        }

        let target = target.clamp(r_lo, r_hi);
        let t = (target - r_lo) / (r_hi - r_lo);
        let start = &self.lowest * (1.0 - t) + &self.highest * t;

        let n = self.moments.fund_count();
        let mut eq = DMatrix::from_element(2, n, 1.0);
        eq.set_row(1, &self.moments.expected_returns.transpose());
        let qp = self.program(eq, DVector::from_vec(vec![1.0, target]));
        qp.solve(start)
    }

    fn sharpe(&self, w: &DVector<f64>, risk_free_rate: f64) -> f64 {
        let vol = self.volatility(w);
        if vol > 0.0 {
            (self.expected_return(w) - risk_free_rate) / vol
        } else {
            f64::NEG_INFINITY
        }
    }

    fn max_sharpe(&self, risk_free_rate: f64) -> Result<DVector<f64>, FundfolioError> {
        let (_, r_hi) = self.return_range();
        let tol = self.return_tolerance();
        if r_hi <= risk_free_rate + tol {
            return Err(FundfolioError::infeasible(format!(
                "no feasible portfolio has expected return above the risk-free rate {risk_free_rate} (best {r_hi:.6})"
            )));
        }

        let min_vol = self.min_volatility()?;
        let r_start = self.expected_return(&min_vol);
        if r_hi - r_start <= tol {
            return Ok(min_vol);
        }

        let ratio = (5f64.sqrt() - 1.0) / 2.0;
        let (mut a, mut b) = (r_start, r_hi);
        let mut x1 = b - ratio * (b - a);
        let mut x2 = a + ratio * (b - a);
        let mut w1 = self.target_return(x1)?;
        let mut w2 = self.target_return(x2)?;
        let mut s1 = self.sharpe(&w1, risk_free_rate);
        let mut s2 = self.sharpe(&w2, risk_free_rate);

        for _ in 0..GOLDEN_SECTION_ITERATIONS {
            if b - a <= tol {
                break;
            }
            if s1 >= s2 {
                b = x2;
                x2 = x1;
                w2 = w1.clone();
                s2 = s1;
                x1 = b - ratio * (b - a);
                w1 = self.target_return(x1)?;
                s1 = self.sharpe(&w1, risk_free_rate);
            } else {
                a = x1;
                x1 = x2;
                w1 = w2.clone();
                s1 = s2;
                x2 = a + ratio * (b - a);
                w2 = self.target_return(x2)?;
                s2 = self.sharpe(&w2, risk_free_rate);
            }
        }

        let (mut best, mut best_sharpe) = if s1 >= s2 { (w1, s1) } else { (w2, s2) };
        let endpoint_hi = self.target_return(r_hi)?;
        for candidate in [min_vol, endpoint_hi] {
            let s = self.sharpe(&candidate, risk_free_rate);
            if s > best_sharpe {
                best_sharpe = s;
                best = candidate;
            }
        }
        tracing::debug!(sharpe = best_sharpe, "max sharpe search finished");
        Ok(best)
    }

    fn hierarchical_risk_parity(&self) -> Result<DVector<f64>, FundfolioError> {
        let w = hrp_weights(&self.moments.covariance);
        let violation = self.resolved.max_violation(&w);
        if violation > BOUND_TOLERANCE {
            return Err(FundfolioError::infeasible(format!(
                "hierarchical risk parity weights break the bounds or group caps by {violation:.6}"
            )));
        }
        Ok(w)
    }

    fn target_risk(&self, target: f64) -> Result<DVector<f64>, FundfolioError> {
        let min_vol = self.min_volatility()?;
        let floor = self.volatility(&min_vol);
        if !target.is_finite() || target < floor - 1e-9 * (1.0 + floor) {
            return Err(FundfolioError::infeasible(format!(
                "target risk {target} is below the minimum achievable volatility {floor:.6}"
            )));
        }

        let (_, r_hi) = self.return_range();
        let top = self.target_return(r_hi)?;
        if self.volatility(&top) <= target {
            return Ok(top);
        }

        let mut lo = self.expected_return(&min_vol);
        let mut hi = r_hi;
        let mut best = min_vol;
        for _ in 0..BISECTION_ITERATIONS {
            if hi - lo <= self.return_tolerance() {
                break;
            }
            let mid = 0.5 * (lo + hi);
            let w = self.target_return(mid)?;
            if self.volatility(&w) <= target {
                lo = mid;
                best = w;
            } else {
                hi = mid;
            }
        }
        Ok(best)
    }
}

/// Validates solver output, clamps round-off and removes dust weights.
fn finalize(
    mut w: DVector<f64>,
    resolved: &ResolvedConstraints,
    funds: &[String],
    config: &SolverConfig,
) -> Result<Allocation, FundfolioError> {
    if w.iter().any(|v| !v.is_finite()) {
        return Err(FundfolioError::numerical("solver produced non-finite weights"));
    }
    let total = w.sum();
    if (total - 1.0).abs() > config.sum_tolerance {
        return Err(FundfolioError::numerical(format!(
            "weights sum to {total:.9}, expected 1"
        )));
    }
    let violation = resolved.max_violation(&w);
    if violation > BOUND_TOLERANCE {
        return Err(FundfolioError::numerical(format!(
            "weights violate bounds by {violation:.3e}"
        )));
    }
    for i in 0..w.len() {
        w[i] = w[i].clamp(resolved.lower[i], resolved.upper[i]);
    }

    let dust = remove_dust(&mut w, resolved, config.dust_threshold);
    let dust_funds: Vec<String> = dust.iter().map(|&i| funds[i].clone()).collect();
    if !dust_funds.is_empty() {
        tracing::warn!(
            funds = %dust_funds.join(", "),
            threshold = config.dust_threshold,
            "zeroed dust weights"
        );
    }
    Ok(Allocation::from_vector(funds, &w, dust_funds))
}

/// Zeroes weights below `threshold` (for funds whose lower bound is zero) and
/// spreads the removed mass over the remaining funds in proportion to their
/// weights, within bounds and group caps. Leaves `w` untouched when the mass
/// cannot be placed. Returns the zeroed fund indices.
fn remove_dust(w: &mut DVector<f64>, resolved: &ResolvedConstraints, threshold: f64) -> Vec<usize> {
    let original = w.clone();
    let mut dust = Vec::new();
    let mut removed = 0.0;
    for i in 0..w.len() {
        if w[i] < threshold && resolved.lower[i] == 0.0 && w[i] != 0.0 {
            removed += w[i];
            w[i] = 0.0;
            dust.push(i);
        }
    }
    if dust.is_empty() {
        return dust;
    }

    let mut remaining = removed;
    for _ in 0..w.len() {
        if remaining <= 1e-15 {
            break;
        }
        let receivers: Vec<usize> = (0..w.len())
            .filter(|&i| w[i] > 0.0 && resolved.headroom(w, i) > 0.0)
            .collect();
        let base: f64 = receivers.iter().map(|&i| w[i]).sum();
        if base <= 0.0 {
            break;
        }
        let pass = remaining;
        for &i in &receivers {
            let add = (pass * w[i] / base).min(resolved.headroom(w, i));
            w[i] += add;
            remaining -= add;
        }
    }

    if remaining > 1e-12 {
        tracing::warn!(
            unplaced = remaining,
            "dust weight could not be redistributed within bounds, keeping solver weights"
        );
        *w = original;
        return Vec::new();
    }
    dust
}
