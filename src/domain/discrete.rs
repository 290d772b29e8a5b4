//! Conversion of continuous weights into whole-share purchases.
//!
//! The plan minimizes `Σ |budget·w − shares·price| + leftover` without
//! spending more than the budget, and each fund is either skipped or bought
//! for at least its minimum purchase value. Floors of the ideal share counts
//! seed a greedy pass that keeps buying the most under-target affordable
//! fund. A local search over add, remove, swap and exchange moves improves
//! that plan, and a depth-first branch and bound then searches the remaining
//! share counts within a node limit.

use crate::domain::allocation::Allocation;
use crate::domain::error::FundfolioError;
use std::collections::HashMap;

const MAX_SEARCH_MOVES: usize = 10_000;
const MAX_BRANCH_NODES: usize = 200_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ShareLine {
    pub fund: String,
    pub shares: u64,
    pub price: f64,
    /// Ideal amount of cash for this fund, `budget · weight`.
    pub target_value: f64,
}

impl ShareLine {
    pub fn cost(&self) -> f64 {
        self.shares as f64 * self.price
    }
}

/// Integer share counts per fund plus the unspent part of the budget.
#[derive(Debug, Clone, PartialEq)]
pub struct SharePlan {
    lines: Vec<ShareLine>,
    leftover: f64,
    budget: f64,
}

impl SharePlan {
    pub fn lines(&self) -> &[ShareLine] {
        &self.lines
    }

    pub fn leftover(&self) -> f64 {
        self.leftover
    }

    pub fn budget(&self) -> f64 {
        self.budget
    }

    pub fn total_cost(&self) -> f64 {
        self.lines.iter().map(ShareLine::cost).sum()
    }

    /// Share of the budget spent on each fund.
    pub fn realized_weights(&self) -> Vec<(String, f64)> {
        self.lines
            .iter()
            .map(|l| (l.fund.clone(), l.cost() / self.budget))
            .collect()
    }

    /// Value of the plan at `prices` plus the leftover cash. Funds without a
    /// price keep their purchase price.
    pub fn value_at(&self, prices: &HashMap<String, f64>) -> f64 {
        let held: f64 = self
            .lines
            .iter()
            .map(|l| l.shares as f64 * prices.get(&l.fund).copied().unwrap_or(l.price))
            .sum();
        held + self.leftover
    }
}

/// Smallest amount of cash worth putting into a fund.
///
/// A fund's minimum is the larger of the default and its own entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurchaseMinimums {
    default: f64,
    per_fund: HashMap<String, f64>,
}

impl PurchaseMinimums {
    pub fn new(default: f64) -> Self {
        Self {
            default,
            per_fund: HashMap::new(),
        }
    }

    pub fn with_fund(mut self, fund: &str, value: f64) -> Self {
        self.per_fund.insert(fund.to_string(), value);
        self
    }

    pub fn for_fund(&self, fund: &str) -> f64 {
        self.per_fund
            .get(fund)
            .map_or(self.default, |v| v.max(self.default))
    }
}

/// Buys whole shares of every positively weighted fund within `budget`.
pub fn allocate(
    weights: &Allocation,
    prices: &HashMap<String, f64>,
    budget: f64,
) -> Result<SharePlan, FundfolioError> {
    allocate_with_minimums(weights, prices, budget, &PurchaseMinimums::default())
}

/// Like [`allocate`], but a fund is either skipped or bought for at least
/// its minimum purchase value.
pub fn allocate_with_minimums(
    weights: &Allocation,
    prices: &HashMap<String, f64>,
    budget: f64,
    minimums: &PurchaseMinimums,
) -> Result<SharePlan, FundfolioError> {
    if !(budget.is_finite() && budget > 0.0) {
        return Err(FundfolioError::InvalidBudget { budget });
    }

    let mut bad: Vec<(&String, f64)> = prices
        .iter()
        .filter(|(_, p)| !(p.is_finite() && **p > 0.0))
        .map(|(f, p)| (f, *p))
        .collect();
    bad.sort_by(|a, b| a.0.cmp(b.0));
    if let Some((fund, price)) = bad.first() {
        return Err(FundfolioError::invalid_price(
            fund.as_str(),
            "current",
            format!("price {price} must be positive"),
        ));
    }

    let mut funds = Vec::new();
    for (fund, weight) in weights.weights() {
        if *weight <= 0.0 {
            continue;
        }
        let Some(&price) = prices.get(fund) else {
            return Err(FundfolioError::invalid_price(fund, "current", "no price supplied"));
        };
        let lot = (minimums.for_fund(fund) / price - 1e-9).ceil().max(1.0) as u64;
        funds.push((fund.clone(), price, budget * weight, lot));
    }

    let prices: Vec<f64> = funds.iter().map(|f| f.1).collect();
    let targets: Vec<f64> = funds.iter().map(|f| f.2).collect();
    let lots: Vec<u64> = funds.iter().map(|f| f.3).collect();
    let mut search = Search::new(&prices, &targets, &lots, budget);
    search.seed();
    search.greedy();
    search.polish();
    if !search.branch_and_bound() {
        tracing::warn!(
            nodes = MAX_BRANCH_NODES,
            "share search stopped at its node limit, keeping the best plan found"
        );
    }
    search.greedy();
    let leftover = search.leftover();

    let lines = funds
        .into_iter()
        .zip(search.shares)
        .map(|((fund, price, target_value, _), shares)| ShareLine {
            fund,
            shares,
            price,
            target_value,
        })
        .collect();

    Ok(SharePlan {
        lines,
        leftover,
        budget,
    })
}

struct Search<'a> {
    prices: &'a [f64],
    targets: &'a [f64],
    /// Fewest shares a fund can hold unless it holds none.
    lots: &'a [u64],
    budget: f64,
    shares: Vec<u64>,
    eps: f64,
}

impl<'a> Search<'a> {
    fn new(prices: &'a [f64], targets: &'a [f64], lots: &'a [u64], budget: f64) -> Self {
        Self {
            prices,
            targets,
            lots,
            budget,
            shares: vec![0; prices.len()],
            eps: 1e-9 * budget,
        }
    }

    fn cost_of(&self, shares: &[u64]) -> f64 {
        shares
            .iter()
            .zip(self.prices)
            .map(|(&s, &p)| s as f64 * p)
            .sum()
    }

    fn leftover(&self) -> f64 {
        (self.budget - self.cost_of(&self.shares)).max(0.0)
    }

    /// Objective and leftover of `shares`, or `None` when over budget or
    /// below a minimum lot.
    fn score(&self, shares: &[u64]) -> Option<(f64, f64)> {
        let cost = self.cost_of(shares);
        if cost > self.budget {
            return None;
        }
        if shares.iter().zip(self.lots).any(|(&s, &lot)| s != 0 && s < lot) {
            return None;
        }
        let deviation: f64 = shares
            .iter()
            .enumerate()
            .map(|(i, &s)| (self.targets[i] - s as f64 * self.prices[i]).abs())
            .sum();
        let leftover = self.budget - cost;
        Some((deviation + leftover, leftover))
    }

    fn better(&self, a: (f64, f64), b: (f64, f64)) -> bool {
        a.0 < b.0 - self.eps || (a.0 <= b.0 + self.eps && a.1 < b.1 - self.eps)
    }

    fn surplus(&self, shares: &[u64], i: usize) -> f64 {
        shares[i] as f64 * self.prices[i] - self.targets[i]
    }

    fn up(&self, shares: &[u64], i: usize) -> u64 {
        if shares[i] == 0 { self.lots[i] } else { shares[i] + 1 }
    }

    fn down(&self, shares: &[u64], i: usize) -> u64 {
        if shares[i] <= self.lots[i] { 0 } else { shares[i] - 1 }
    }

    fn seed(&mut self) {
        for i in 0..self.shares.len() {
            let floor = (self.targets[i] / self.prices[i]).floor().max(0.0) as u64;
            self.shares[i] = if floor >= self.lots[i] { floor } else { 0 };
        }
        // Weights summing slightly above one can push the floors over budget.
        while self.cost_of(&self.shares) > self.budget {
            let over = (0..self.shares.len())
                .filter(|&i| self.shares[i] > 0)
                .max_by(|&a, &b| {
                    self.surplus(&self.shares, a)
                        .total_cmp(&self.surplus(&self.shares, b))
                        .then(b.cmp(&a))
                });
            match over {
                Some(i) => self.shares[i] = self.down(&self.shares, i),
                None => break,
            }
        }
    }

    fn greedy(&mut self) {
        let mut shares = std::mem::take(&mut self.shares);
        self.refill(&mut shares, None);
        self.shares = shares;
    }

    /// Keeps buying the most under-target fund that still fits.
    fn refill(&self, shares: &mut [u64], skip: Option<usize>) {
        loop {
            let cost = self.cost_of(shares);
            let pick = (0..shares.len())
                .filter(|&i| Some(i) != skip)
                .filter(|&i| {
                    cost + (self.up(shares, i) - shares[i]) as f64 * self.prices[i] <= self.budget
                })
                .min_by(|&a, &b| {
                    self.surplus(shares, a)
                        .total_cmp(&self.surplus(shares, b))
                        .then(a.cmp(&b))
                });
            match pick {
                Some(i) => shares[i] = self.up(shares, i),
                None => break,
            }
        }
    }

    /// Sells shares of `from` until one more step of `to` fits, then spends
    /// the rest on other funds.
    fn exchange(&self, from: usize, to: usize) -> Option<Vec<u64>> {
        let mut shares = self.shares.clone();
        shares[to] = self.up(&shares, to);
        while shares[from] > 0 && self.cost_of(&shares) > self.budget {
            shares[from] = self.down(&shares, from);
        }
        if self.cost_of(&shares) > self.budget {
            return None;
        }
        self.refill(&mut shares, Some(from));
        Some(shares)
    }

    fn neighbours(&self) -> Vec<Vec<u64>> {
        let n = self.shares.len();
        let mut out = Vec::new();
        for i in 0..n {
            let mut add = self.shares.clone();
            add[i] = self.up(&add, i);
            out.push(add);
            if self.shares[i] == 0 {
                continue;
            }
            let mut remove = self.shares.clone();
            remove[i] = self.down(&remove, i);
            for j in (0..n).filter(|&j| j != i) {
                let mut swap = remove.clone();
                swap[j] = self.up(&swap, j);
                out.push(swap);
                out.extend(self.exchange(i, j));
            }
            out.push(remove);
        }
        out
    }

    fn polish(&mut self) {
        for _ in 0..MAX_SEARCH_MOVES {
            let Some(current) = self.score(&self.shares) else {
                return;
            };
            let mut best: Option<((f64, f64), Vec<u64>)> = None;
            for candidate in self.neighbours() {
                let Some(score) = self.score(&candidate) else {
                    continue;
                };
                if !self.better(score, current) {
                    continue;
                }
                if best.as_ref().is_none_or(|(b, _)| self.better(score, *b)) {
                    best = Some((score, candidate));
                }
            }
            match best {
                Some((_, shares)) => self.shares = shares,
                None => return,
            }
        }
        tracing::warn!(moves = MAX_SEARCH_MOVES, "share search stopped at move limit");
    }

    /// Replaces the current plan with the best one found by branch and
    /// bound. Returns false when the node limit cut the search short.
    fn branch_and_bound(&mut self) -> bool {
        let Some(incumbent) = self.score(&self.shares) else {
            return false;
        };
        let n = self.shares.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| self.prices[b].total_cmp(&self.prices[a]).then(a.cmp(&b)));
        let mut remaining_target = vec![0.0; n + 1];
        for k in (0..n).rev() {
            remaining_target[k] = remaining_target[k + 1] + self.targets[order[k]];
        }

        let mut branch = Branch {
            search: &*self,
            order,
            remaining_target,
            total: self.targets.iter().sum::<f64>() + self.budget,
            current: vec![0; n],
            best: self.shares.clone(),
            best_score: incumbent,
            nodes: 0,
            complete: true,
        };
        branch.descend(0, 0.0, 0.0);
        let (best, complete) = (branch.best, branch.complete);
        self.shares = best;
        complete
    }
}

/// Depth-first search over share counts, most expensive fund first.
///
/// The objective equals `Σ targets + budget − 2 · covered`, where a fund
/// covers `min(shares · price, target)`. A branch is cut once even spending
/// all remaining cash on uncovered targets cannot beat the best plan.
struct Branch<'s, 'a> {
    search: &'s Search<'a>,
    order: Vec<usize>,
    remaining_target: Vec<f64>,
    total: f64,
    current: Vec<u64>,
    best: Vec<u64>,
    best_score: (f64, f64),
    nodes: usize,
    complete: bool,
}

impl Branch<'_, '_> {
    fn descend(&mut self, depth: usize, spent: f64, covered: f64) {
        if self.nodes >= MAX_BRANCH_NODES {
            self.complete = false;
            return;
        }
        self.nodes += 1;

        let search = self.search;
        if depth == self.order.len() {
            if let Some(score) = search.score(&self.current) {
                if search.better(score, self.best_score) {
                    self.best = self.current.clone();
                    self.best_score = score;
                }
            }
            return;
        }

        let i = self.order[depth];
        let (price, target, lot) = (search.prices[i], search.targets[i], search.lots[i]);
        let top = ((target / price).ceil() as u64).max(lot);
        let affordable = ((search.budget - spent) / price + 1e-9).floor().max(0.0) as u64;
        let counts = (lot..=top.min(affordable)).rev().chain(std::iter::once(0));

        for count in counts {
            let value = count as f64 * price;
            let spent_next = spent + value;
            if spent_next > search.budget {
                continue;
            }
            let covered_next = covered + value.min(target);
            let bound =
                covered_next + (search.budget - spent_next).min(self.remaining_target[depth + 1]);
            if self.total - 2.0 * bound > self.best_score.0 + search.eps {
                // Fewer shares of an under-target fund only lower the bound.
                if value <= target {
                    break;
                }
                continue;
            }
            self.current[i] = count;
            self.descend(depth + 1, spent_next, covered_next);
        }
        self.current[i] = 0;
    }
}
