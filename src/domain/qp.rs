//! Dense primal active-set solver for small convex quadratic programs.
//!
//! Solves
//!
//! ```text
//! minimize    ½ wᵀQw + cᵀw
//! subject to  A w  = b
//!             G w <= h
//! ```
//!
//! for positive definite `Q`, starting from a feasible point. Each iteration
//! minimizes over the affine subspace of the working set by solving the KKT
//! system, then either steps toward that minimizer (adding the first blocking
//! constraint) or drops the working constraint with the most negative
//! multiplier.

use crate::domain::error::FundfolioError;
use nalgebra::{DMatrix, DVector};

const STEP_TOL: f64 = 1e-12;
const DIRECTION_TOL: f64 = 1e-14;
const MULTIPLIER_TOL: f64 = 1e-12;

pub struct QuadraticProgram<'a> {
    pub q: &'a DMatrix<f64>,
    pub c: DVector<f64>,
    pub eq: DMatrix<f64>,
    pub eq_rhs: DVector<f64>,
    pub ineq: &'a DMatrix<f64>,
    pub ineq_rhs: &'a DVector<f64>,
}

impl QuadraticProgram<'_> {
    /// Minimizer reached from the feasible `start`.
    pub fn solve(&self, start: DVector<f64>) -> Result<DVector<f64>, FundfolioError> {
        let n = self.q.nrows();
        let n_eq = self.eq.nrows();
        let n_ineq = self.ineq.nrows();
        let scale = 1.0 + self.q.amax() + self.c.amax();
        let max_iterations = 50 * (n + n_ineq) + 100;

        let mut w = start;
        let mut working: Vec<usize> = Vec::new();

        for iteration in 0..max_iterations {
            let k = n_eq + working.len();
            let mut kkt = DMatrix::zeros(n + k, n + k);
            let mut rhs = DVector::zeros(n + k);

            kkt.view_mut((0, 0), (n, n)).copy_from(self.q);
            for i in 0..n {
                rhs[i] = -self.c[i];
            }
            for r in 0..n_eq {
                for j in 0..n {
                    kkt[(n + r, j)] = self.eq[(r, j)];
                    kkt[(j, n + r)] = self.eq[(r, j)];
                }
                rhs[n + r] = self.eq_rhs[r];
            }
            for (slot, &row) in working.iter().enumerate() {
                let r = n_eq + slot;
                for j in 0..n {
                    kkt[(n + r, j)] = self.ineq[(row, j)];
                    kkt[(j, n + r)] = self.ineq[(row, j)];
                }
                rhs[n + r] = self.ineq_rhs[row];
            }

            let solution = kkt.lu().solve(&rhs).ok_or_else(|| {
                FundfolioError::numerical(format!(
                    "singular KKT system with {} working constraints",
                    working.len()
                ))
            })?;
            if solution.iter().any(|v| !v.is_finite()) {
                return Err(FundfolioError::numerical("non-finite KKT solution"));
            }

            let target = solution.rows(0, n).into_owned();
            let step = &target - &w;

            if step.amax() <= STEP_TOL * (1.0 + w.amax()) {
                let mut most_negative: Option<(usize, f64)> = None;
                for slot in 0..working.len() {
                    let lambda = solution[n + n_eq + slot];
                    if lambda < -MULTIPLIER_TOL * scale
                        && most_negative.is_none_or(|(_, best)| lambda < best)
                    {
                        most_negative = Some((slot, lambda));
                    }
                }
                match most_negative {
                    None => {
                        tracing::debug!(
                            iterations = iteration + 1,
                            active = working.len(),
                            "active-set solve converged"
                        );
                        return Ok(w);
                    }
                    Some((slot, _)) => {
                        working.remove(slot);
                    }
                }
                continue;
            }

            let mut alpha = 1.0;
            let mut blocking = None;
            for row in 0..n_ineq {
                if working.contains(&row) {
                    continue;
                }
                let along = row_dot(self.ineq, row, &step);
                if along <= DIRECTION_TOL {
                    continue;
                }
                let slack = (self.ineq_rhs[row] - row_dot(self.ineq, row, &w)).max(0.0);
                let ratio = slack / along;
                if ratio < alpha {
                    alpha = ratio;
                    blocking = Some(row);
                }
            }

            w += step * alpha;
            if let Some(row) = blocking {
                working.push(row);
            }
        }

        Err(FundfolioError::numerical(format!(
            "active-set iteration limit ({max_iterations}) reached"
        )))
    }
}

fn row_dot(m: &DMatrix<f64>, row: usize, v: &DVector<f64>) -> f64 {
    (0..m.ncols()).map(|j| m[(row, j)] * v[j]).sum()
}
