//! End-to-end optimization run and train/test holdout evaluation.

use crate::domain::allocation::Allocation;
use crate::domain::config::{EstimatorConfig, SolverConfig};
use crate::domain::constraints::Constraint;
use crate::domain::discrete::{PurchaseMinimums, SharePlan, allocate_with_minimums};
use crate::domain::error::FundfolioError;
use crate::domain::frontier::{Objective, solve};
use crate::domain::fund_series::{FundSeries, latest_prices};
use crate::domain::performance::{Performance, portfolio_performance};
use crate::domain::returns::{AlignedPrices, MomentEstimates, align_series, estimate, estimate_aligned};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Everything one optimization run needs besides the price data.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationRequest {
    pub estimator: EstimatorConfig,
    pub solver: SolverConfig,
    pub constraint: Constraint,
    pub objective: Objective,
    /// Cash to convert into shares; no share plan is built without it.
    pub budget: Option<f64>,
    pub minimums: PurchaseMinimums,
}

impl OptimizationRequest {
    pub fn new(objective: Objective) -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            solver: SolverConfig::default(),
            constraint: Constraint::default(),
            objective,
            budget: None,
            minimums: PurchaseMinimums::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationOutcome {
    pub moments: MomentEstimates,
    pub allocation: Allocation,
    pub performance: Performance,
    pub plan: Option<SharePlan>,
}

/// Estimates, solves and, given a budget, allocates at the latest prices.
pub fn optimize(
    series: &[FundSeries],
    request: &OptimizationRequest,
) -> Result<OptimizationOutcome, FundfolioError> {
    let moments = estimate(series, &request.estimator)?;
    let allocation = solve(
        &moments,
        &request.constraint,
        request.objective,
        &request.solver,
    )?;
    let performance = portfolio_performance(&allocation, &moments, request.solver.risk_free_rate);
    let plan = match request.budget {
        Some(budget) => Some(allocate_with_minimums(
            &allocation,
            &latest_prices(series),
            budget,
            &request.minimums,
        )?),
        None => None,
    };
    Ok(OptimizationOutcome {
        moments,
        allocation,
        performance,
        plan,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct HoldoutReport {
    pub train_end: NaiveDate,
    pub test_end: NaiveDate,
    pub holdout_periods: usize,
    pub allocation: Allocation,
    /// Performance predicted from the training window.
    pub expected: Performance,
    pub plan: Option<SharePlan>,
    /// Weighted return of the allocation over the test window.
    pub realized_return: f64,
    /// Return of the share plan including leftover cash, when a budget was given.
    pub plan_return: Option<f64>,
    pub annualized_return: f64,
}

/// Fits on all but the last `holdout_periods` aligned dates and measures how
/// the resulting portfolio did over those held-out dates.
pub fn evaluate_holdout(
    series: &[FundSeries],
    request: &OptimizationRequest,
    holdout_periods: usize,
) -> Result<HoldoutReport, FundfolioError> {
    let aligned = align_series(series, request.estimator.frequency)?;
    if holdout_periods == 0 || aligned.dates.len() <= holdout_periods {
        return Err(FundfolioError::InsufficientData {
            reason: format!(
                "holdout of {holdout_periods} periods needs more than {} aligned dates",
                aligned.dates.len()
            ),
        });
    }

    let train_len = aligned.dates.len() - holdout_periods;
    let train = aligned.head(train_len);
    let moments = estimate_aligned(&train, &request.estimator)?;
    let allocation = solve(
        &moments,
        &request.constraint,
        request.objective,
        &request.solver,
    )?;
    let expected = portfolio_performance(&allocation, &moments, request.solver.risk_free_rate);

    let start = prices_at(&aligned, train_len - 1);
    let end = prices_at(&aligned, aligned.dates.len() - 1);
    let realized_return: f64 = allocation
        .weights()
        .iter()
        .map(|(fund, w)| match (start.get(fund), end.get(fund)) {
            (Some(p0), Some(p1)) => w * (p1 / p0 - 1.0),
            _ => 0.0,
        })
        .sum();

    let plan = match request.budget {
        Some(budget) => Some(allocate_with_minimums(&allocation, &start, budget, &request.minimums)?),
        None => None,
    };
    let plan_return = plan.as_ref().map(|p| p.value_at(&end) / p.budget() - 1.0);

    let annualized_return =
        realized_return / holdout_periods as f64 * request.estimator.annualization();
    tracing::info!(
        train_end = %aligned.dates[train_len - 1],
        realized_return,
        annualized_return,
        "holdout evaluation complete"
    );

    Ok(HoldoutReport {
        train_end: aligned.dates[train_len - 1],
        test_end: aligned.dates[aligned.dates.len() - 1],
        holdout_periods,
        allocation,
        expected,
        plan,
        realized_return,
        plan_return,
        annualized_return,
    })
}

fn prices_at(aligned: &AlignedPrices, date: usize) -> HashMap<String, f64> {
    aligned
        .funds
        .iter()
        .enumerate()
        .map(|(i, f)| (f.clone(), aligned.price(i, date)))
        .collect()
}
