//! Weight constraints: per-fund bounds, full investment and group caps.

use crate::domain::error::FundfolioError;
use nalgebra::{DMatrix, DVector};
use std::collections::{HashMap, HashSet};

const FEASIBILITY_TOL: f64 = 1e-12;

/// Cap on the combined weight of a set of funds.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCap {
    pub name: String,
    pub funds: Vec<String>,
    pub max: f64,
}

/// Caller-supplied weight constraints. Weights always sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Bound applied to funds without an override.
    pub default_bounds: (f64, f64),
    pub fund_bounds: HashMap<String, (f64, f64)>,
    /// Group caps; a fund may belong to at most one group.
    pub groups: Vec<GroupCap>,
}

impl Default for Constraint {
    fn default() -> Self {
        Self {
            default_bounds: (0.0, 1.0),
            fund_bounds: HashMap::new(),
            groups: Vec::new(),
        }
    }
}

impl Constraint {
    pub fn with_default_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.default_bounds = (lower, upper);
        self
    }

    pub fn with_fund_bounds(mut self, fund: &str, lower: f64, upper: f64) -> Self {
        self.fund_bounds.insert(fund.to_string(), (lower, upper));
        self
    }

    pub fn with_group(mut self, name: &str, funds: &[&str], max: f64) -> Self {
        self.groups.push(GroupCap {
            name: name.to_string(),
            funds: funds.iter().map(|f| f.to_string()).collect(),
            max,
        });
        self
    }

    pub fn bounds_for(&self, fund: &str) -> (f64, f64) {
        self.fund_bounds
            .get(fund)
            .copied()
            .unwrap_or(self.default_bounds)
    }

    /// Resolves the constraints against an ordered fund universe.
    ///
    /// Group members absent from the universe are ignored.
    pub fn resolve(&self, funds: &[String]) -> Result<ResolvedConstraints, FundfolioError> {
        let mut lower = Vec::with_capacity(funds.len());
        let mut upper = Vec::with_capacity(funds.len());
        for fund in funds {
            let (lo, hi) = self.bounds_for(fund);
            if !(lo.is_finite() && hi.is_finite()) || lo < 0.0 || hi > 1.0 || lo > hi {
                return Err(FundfolioError::infeasible(format!(
                    "bounds [{lo}, {hi}] for {fund} must satisfy 0 <= lower <= upper <= 1"
                )));
            }
            lower.push(lo);
            upper.push(hi);
        }

        let index: HashMap<&str, usize> = funds
            .iter()
            .enumerate()
            .map(|(i, f)| (f.as_str(), i))
            .collect();
        let mut seen: HashSet<usize> = HashSet::new();
        let mut group_of = vec![None; funds.len()];
        let mut groups = Vec::with_capacity(self.groups.len());

        for group in &self.groups {
            if !(group.max.is_finite() && group.max >= 0.0) {
                return Err(FundfolioError::infeasible(format!(
                    "group {} cap {} must be non-negative",
                    group.name, group.max
                )));
            }
            let mut members = Vec::new();
            for fund in &group.funds {
                let Some(&i) = index.get(fund.as_str()) else {
                    continue;
                };
                if !seen.insert(i) {
                    return Err(FundfolioError::infeasible(format!(
                        "fund {fund} belongs to more than one group"
                    )));
                }
                group_of[i] = Some(groups.len());
                members.push(i);
            }
            groups.push(ResolvedGroup {
                name: group.name.clone(),
                members,
                max: group.max,
            });
        }

        let resolved = ResolvedConstraints {
            lower,
            upper,
            groups,
            group_of,
        };
        resolved.check_feasible()?;
        Ok(resolved)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGroup {
    pub name: String,
    pub members: Vec<usize>,
    pub max: f64,
}

/// Constraints expressed by fund index.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConstraints {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub groups: Vec<ResolvedGroup>,
    group_of: Vec<Option<usize>>,
}

impl ResolvedConstraints {
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Largest total weight the bounds and group caps allow.
    pub fn max_total(&self) -> f64 {
        let grouped: f64 = self
            .groups
            .iter()
            .map(|g| g.max.min(g.members.iter().map(|&i| self.upper[i]).sum()))
            .sum();
        let ungrouped: f64 = (0..self.len())
            .filter(|&i| self.group_of[i].is_none())
            .map(|i| self.upper[i])
            .sum();
        grouped + ungrouped
    }

    fn check_feasible(&self) -> Result<(), FundfolioError> {
        let min_total: f64 = self.lower.iter().sum();
        if min_total > 1.0 + FEASIBILITY_TOL {
            return Err(FundfolioError::infeasible(format!(
                "lower bounds sum to {min_total:.6}, above full investment"
            )));
        }
        for group in &self.groups {
            let floor: f64 = group.members.iter().map(|&i| self.lower[i]).sum();
            if floor > group.max + FEASIBILITY_TOL {
                return Err(FundfolioError::infeasible(format!(
                    "group {} lower bounds sum to {floor:.6}, above its cap {}",
                    group.name, group.max
                )));
            }
        }
        let max_total = self.max_total();
        if max_total < 1.0 - FEASIBILITY_TOL {
            return Err(FundfolioError::infeasible(format!(
                "upper bounds and group caps allow at most {max_total:.6} total weight"
            )));
        }
        Ok(())
    }

    /// Starts from the lower bounds and raises funds in `order` as far as
    /// their bounds and group caps allow until the weights sum to one.
    ///
    /// Optimal for linear objectives when `order` ranks funds by preference.
    pub fn greedy_fill(&self, order: &[usize]) -> DVector<f64> {
        let mut w = DVector::from_vec(self.lower.clone());
        let mut group_sum: Vec<f64> = self
            .groups
            .iter()
            .map(|g| g.members.iter().map(|&i| w[i]).sum())
            .collect();
        let mut remaining = 1.0 - w.sum();

        for &i in order {
            if remaining <= 0.0 {
                break;
            }
            let mut room = self.upper[i] - w[i];
            if let Some(g) = self.group_of[i] {
                room = room.min(self.groups[g].max - group_sum[g]);
            }
            let add = room.min(remaining).max(0.0);
            w[i] += add;
            remaining -= add;
            if let Some(g) = self.group_of[i] {
                group_sum[g] += add;
            }
        }
        w
    }

    pub fn feasible_point(&self) -> DVector<f64> {
        let order: Vec<usize> = (0..self.len()).collect();
        self.greedy_fill(&order)
    }

    /// Portfolio with the highest (or lowest) expected return.
    pub fn extreme_return(&self, mu: &DVector<f64>, maximize: bool) -> DVector<f64> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| {
            let ord = mu[a].total_cmp(&mu[b]);
            let ord = if maximize { ord.reverse() } else { ord };
            ord.then(a.cmp(&b))
        });
        self.greedy_fill(&order)
    }

    /// Inequality rows `G w <= h`: lower bounds, upper bounds, group caps.
    pub fn inequality_rows(&self) -> (DMatrix<f64>, DVector<f64>) {
        let n = self.len();
        let rows = 2 * n + self.groups.len();
        let mut g = DMatrix::zeros(rows, n);
        let mut h = DVector::zeros(rows);
        for i in 0..n {
            g[(i, i)] = -1.0;
            h[i] = -self.lower[i];
            g[(n + i, i)] = 1.0;
            h[n + i] = self.upper[i];
        }
        for (k, group) in self.groups.iter().enumerate() {
            for &i in &group.members {
                g[(2 * n + k, i)] = 1.0;
            }
            h[2 * n + k] = group.max;
        }
        (g, h)
    }

    /// Largest violation of any bound or group cap by `w`.
    pub fn max_violation(&self, w: &DVector<f64>) -> f64 {
        let mut worst: f64 = 0.0;
        for i in 0..self.len() {
            worst = worst
                .max(self.lower[i] - w[i])
                .max(w[i] - self.upper[i]);
        }
        for group in &self.groups {
            let total: f64 = group.members.iter().map(|&i| w[i]).sum();
            worst = worst.max(total - group.max);
        }
        worst
    }

    /// Remaining headroom for raising `fund`, counting its group cap.
    pub fn headroom(&self, w: &DVector<f64>, fund: usize) -> f64 {
        let mut room = self.upper[fund] - w[fund];
        if let Some(g) = self.group_of[fund] {
            let total: f64 = self.groups[g].members.iter().map(|&i| w[i]).sum();
            room = room.min(self.groups[g].max - total);
        }
        room.max(0.0)
    }
}
