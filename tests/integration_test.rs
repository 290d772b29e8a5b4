//! End-to-end tests of the optimization pipeline against mock and real stores.

mod common;

use approx::assert_relative_eq;
use common::*;
use fundfolio::domain::allocation::Allocation;
use fundfolio::domain::config::{EstimatorConfig, Frequency};
use fundfolio::domain::discrete::allocate;
use fundfolio::domain::error::FundfolioError;
use fundfolio::domain::frontier::Objective;
use fundfolio::domain::fund_series::{FundSeries, PricePoint};
use fundfolio::domain::pipeline::{OptimizationRequest, evaluate_holdout, optimize};
use fundfolio::domain::universe::load_universe;
use std::collections::HashMap;

/// A and B move almost together, C follows an unrelated pattern.
fn correlated_universe(months: usize) -> Vec<FundSeries> {
    let dates = month_starts(months);
    let n = months - 1;
    let s1 = pattern(n, 1, 0);
    let s2 = pattern(n, 4, 1);
    let s3 = pattern(n, 2, 0);
    let a: Vec<f64> = s1.iter().map(|x| 0.01 + 0.03 * x).collect();
    let b: Vec<f64> = s1
        .iter()
        .zip(&s2)
        .map(|(x, y)| 0.01 + 0.03 * x + 0.004 * y)
        .collect();
    let c: Vec<f64> = s3.iter().map(|x| 0.008 + 0.03 * x).collect();
    vec![
        series_from_returns("A", &dates, 1.0, &a),
        series_from_returns("B", &dates, 2.0, &b),
        series_from_returns("C", &dates, 1.5, &c),
    ]
}

fn monthly_request(objective: Objective) -> OptimizationRequest {
    let mut request = OptimizationRequest::new(objective);
    request.estimator = EstimatorConfig {
        frequency: Frequency::Monthly,
        ..EstimatorConfig::default()
    };
    request
}

mod diversification {
    use super::*;

    #[test]
    fn min_volatility_underweights_correlated_pair() {
        let series = correlated_universe(36);
        let outcome = optimize(&series, &monthly_request(Objective::MinVolatility)).unwrap();

        let w = &outcome.allocation;
        let pair = w.weight("A").unwrap() + w.weight("B").unwrap();
        assert!(pair < 2.0 / 3.0, "pair weight {pair} not below equal weight");
        assert!(w.weight("C").unwrap() > 1.0 / 3.0);
        assert_relative_eq!(w.total(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn outcome_reports_moments_and_performance() {
        let series = correlated_universe(36);
        let outcome = optimize(&series, &monthly_request(Objective::MinVolatility)).unwrap();

        assert_eq!(outcome.moments.funds, vec!["A", "B", "C"]);
        assert_eq!(outcome.moments.observations, 36);
        assert_eq!(outcome.moments.periods_per_year, 12.0);
        assert!(outcome.performance.volatility > 0.0);
        assert!(outcome.plan.is_none());
    }

    #[test]
    fn max_sharpe_is_deterministic() {
        let series = correlated_universe(36);
        let request = monthly_request(Objective::MaxSharpe);
        let first = optimize(&series, &request).unwrap();
        let second = optimize(&series, &request).unwrap();
        assert_eq!(first.allocation, second.allocation);
        assert_eq!(first.performance, second.performance);
    }
}

mod failures {
    use super::*;

    #[test]
    fn target_return_above_best_fund_is_infeasible() {
        let series = correlated_universe(36);
        let err = optimize(&series, &monthly_request(Objective::TargetReturn(0.5))).unwrap_err();
        assert!(matches!(err, FundfolioError::InfeasibleConstraints { .. }));
    }

    #[test]
    fn zero_price_names_fund_and_date() {
        let mut series = correlated_universe(36);
        let mut points = series[1].points().to_vec();
        points[5].price = 0.0;
        series[1] = FundSeries::new("B", points).unwrap();

        let err = optimize(&series, &monthly_request(Objective::MinVolatility)).unwrap_err();
        match err {
            FundfolioError::InvalidPrice { fund, date, .. } => {
                assert_eq!(fund, "B");
                assert_eq!(date, "2021-06-01");
            }
            other => panic!("expected InvalidPrice, got {other:?}"),
        }
    }

    #[test]
    fn short_overlap_is_insufficient() {
        let dates = month_starts(48);
        let a = series_from_returns("A", &dates[..36], 1.0, &vec![0.01; 35]);
        let b_returns: Vec<f64> = pattern(17, 1, 0).iter().map(|x| 0.02 * x).collect();
        let b = series_from_returns("B", &dates[30..], 1.0, &b_returns);

        let err = optimize(&[a, b], &monthly_request(Objective::MinVolatility)).unwrap_err();
        assert!(matches!(err, FundfolioError::InsufficientData { .. }));
    }

    #[test]
    fn single_fund_is_insufficient() {
        let series = correlated_universe(36);
        let err = optimize(&series[..1], &monthly_request(Objective::MinVolatility)).unwrap_err();
        assert!(matches!(err, FundfolioError::InsufficientData { .. }));
    }

    #[test]
    fn error_kinds_map_to_exit_codes() {
        let err = FundfolioError::InfeasibleConstraints {
            reason: "x".into(),
        };
        let code: std::process::ExitCode = (&err).into();
        assert_eq!(
            format!("{code:?}"),
            format!("{:?}", std::process::ExitCode::from(5))
        );
    }
}

mod share_plans {
    use super::*;

    #[test]
    fn optimize_with_budget_stays_within_budget() {
        let series = correlated_universe(36);
        let mut request = monthly_request(Objective::MinVolatility);
        request.budget = Some(1000.0);
        let outcome = optimize(&series, &request).unwrap();

        let plan = outcome.plan.unwrap();
        assert!(plan.total_cost() <= 1000.0 + 1e-9);
        assert_relative_eq!(plan.total_cost() + plan.leftover(), 1000.0, epsilon = 1e-9);
        let cheapest = plan
            .lines()
            .iter()
            .map(|l| l.price)
            .fold(f64::INFINITY, f64::min);
        assert!(plan.leftover() < cheapest + 1e-6);
    }

    #[test]
    fn budget_below_every_price_buys_nothing() {
        let allocation = Allocation::new(vec![("A".into(), 0.5), ("B".into(), 0.5)], vec![]);
        let prices = HashMap::from([("A".to_string(), 100.0), ("B".to_string(), 250.0)]);
        let plan = allocate(&allocation, &prices, 50.0).unwrap();

        assert!(plan.lines().iter().all(|l| l.shares == 0));
        assert_eq!(plan.leftover(), 50.0);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let allocation = Allocation::new(vec![("A".into(), 1.0)], vec![]);
        let prices = HashMap::from([("A".to_string(), 1.0)]);
        let err = allocate(&allocation, &prices, 0.0).unwrap_err();
        assert!(matches!(err, FundfolioError::InvalidBudget { .. }));
    }
}

mod holdout {
    use super::*;

    #[test]
    fn holdout_splits_training_and_test_windows() {
        let series = correlated_universe(48);
        let mut request = monthly_request(Objective::MinVolatility);
        request.budget = Some(10_000.0);
        let report = evaluate_holdout(&series, &request, 12).unwrap();

        assert_eq!(report.holdout_periods, 12);
        assert!(report.train_end < report.test_end);
        assert_relative_eq!(report.allocation.total(), 1.0, epsilon = 1e-6);
        assert!(report.realized_return.is_finite());
        assert_relative_eq!(
            report.annualized_return,
            report.realized_return / 12.0 * 12.0,
            epsilon = 1e-12
        );
        assert!(report.plan.is_some());
        assert!(report.plan_return.is_some());
    }

    #[test]
    fn holdout_leaving_too_little_training_fails() {
        let series = correlated_universe(36);
        let err = evaluate_holdout(&series, &monthly_request(Objective::MinVolatility), 12)
            .unwrap_err();
        assert!(matches!(err, FundfolioError::InsufficientData { .. }));
    }
}

mod universe_loading {
    use super::*;

    #[test]
    fn mock_store_feeds_pipeline_and_skips_unknown_funds() {
        let series = correlated_universe(36);
        let store = series
            .iter()
            .fold(MockPriceStore::new(), |store, s| store.with_series(s));
        let funds: Vec<String> = ["A", "B", "ZZZ", "C", "A"].iter().map(|s| s.to_string()).collect();

        let universe = load_universe(&store, &funds).unwrap();
        assert_eq!(universe.skipped, vec!["ZZZ"]);
        assert_eq!(universe.series.len(), 3);

        let outcome = optimize(&universe.series, &monthly_request(Objective::MinVolatility)).unwrap();
        assert_eq!(outcome.allocation.len(), 3);
    }
}

mod properties {
    use super::*;
    use fundfolio::domain::constraints::Constraint;
    use proptest::prelude::*;

    fn daily_from_returns(fund: &str, returns: &[f64]) -> FundSeries {
        let start = date(2023, 1, 2);
        let mut price = 10.0;
        let mut points = vec![PricePoint::new(start, price)];
        for (i, r) in returns.iter().enumerate() {
            price *= 1.0 + r;
            points.push(PricePoint::new(start + chrono::Duration::days(i as i64 + 1), price));
        }
        FundSeries::new(fund, points).unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn weights_respect_bounds_and_sum_to_one(
            a in prop::collection::vec(-0.02f64..0.05, 40),
            b in prop::collection::vec(-0.02f64..0.05, 40),
            c in prop::collection::vec(-0.02f64..0.05, 40),
            lower in 0.02f64..0.1,
            upper in 0.4f64..1.0,
            pair_cap in 0.5f64..0.9,
        ) {
            let series = vec![
                daily_from_returns("A", &a),
                daily_from_returns("B", &b),
                daily_from_returns("C", &c),
            ];
            let constraint = Constraint::default()
                .with_default_bounds(lower, upper)
                .with_group("pair", &["A", "B"], pair_cap);
            let run = |objective: Objective| {
                let mut request = OptimizationRequest::new(objective);
                request.constraint = constraint.clone();
                optimize(&series, &request)
            };
            let check = |allocation: &Allocation| -> Result<(), TestCaseError> {
                let total: f64 = allocation.weights().iter().map(|(_, w)| w).sum();
                prop_assert!((total - 1.0).abs() <= 1e-6, "weights sum to {}", total);
                for (fund, w) in allocation.weights() {
                    prop_assert!(*w >= lower - 1e-6 && *w <= upper + 1e-6, "{} = {}", fund, w);
                }
                let pair = allocation.weight("A").unwrap_or(0.0) + allocation.weight("B").unwrap_or(0.0);
                prop_assert!(pair <= pair_cap + 1e-6, "pair {} above cap {}", pair, pair_cap);
                Ok(())
            };

            let min_vol = run(Objective::MinVolatility).unwrap();
            let max_sharpe = run(Objective::MaxSharpe).unwrap();
            let mid_return = 0.5
                * (min_vol.performance.expected_return + max_sharpe.performance.expected_return);
            let on_target = run(Objective::TargetReturn(mid_return)).unwrap();
            let within_risk = run(Objective::TargetRisk(min_vol.performance.volatility * 1.1)).unwrap();
            for outcome in [&min_vol, &max_sharpe, &on_target, &within_risk] {
                check(&outcome.allocation)?;
            }
            prop_assert!(within_risk.performance.volatility <= min_vol.performance.volatility * 1.1 + 1e-6);

            match run(Objective::HierarchicalRiskParity) {
                Ok(outcome) => check(&outcome.allocation)?,
                Err(err) => prop_assert!(
                    matches!(err, FundfolioError::InfeasibleConstraints { .. }),
                    "unexpected error {:?}", err
                ),
            }
        }

        #[test]
        fn share_plan_never_exceeds_budget(
            budget in 1.0f64..50_000.0,
            wa in 0.05f64..1.0,
            wb in 0.05f64..1.0,
            pa in 0.5f64..80.0,
            pb in 0.5f64..80.0,
        ) {
            let allocation = Allocation::new(
                vec![("A".into(), wa / (wa + wb)), ("B".into(), wb / (wa + wb))],
                vec![],
            );
            let prices = HashMap::from([("A".to_string(), pa), ("B".to_string(), pb)]);
            let plan = allocate(&allocation, &prices, budget).unwrap();
            prop_assert!(plan.total_cost() <= budget * (1.0 + 1e-12));
            prop_assert!(plan.leftover() >= -1e-9);
        }
    }
}

#[cfg(feature = "sqlite")]
mod sqlite_store {
    use super::*;
    use fundfolio::adapters::csv_adapter::CsvAdapter;
    use fundfolio::adapters::sqlite_adapter::SqliteAdapter;
    use fundfolio::cli::fetch_funds;
    use fundfolio::ports::price_store::PriceStore;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn fetch_from_csv_then_optimize() {
        let dir = TempDir::new().unwrap();
        let csv_dir = dir.path().join("navs");
        fs::create_dir(&csv_dir).unwrap();
        let series = correlated_universe(36);
        for s in &series {
            fs::write(csv_dir.join(format!("{}.csv", s.fund())), to_csv(s)).unwrap();
        }

        let store = SqliteAdapter::open(&dir.path().join("funds.db").display().to_string(), 2).unwrap();
        let source = CsvAdapter::new(csv_dir);
        let funds: Vec<String> = ["A", "B", "C", "B"].iter().map(|s| s.to_string()).collect();

        let first = fetch_funds(&store, &source, &funds).unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|s| s.inserted == 36));

        let again = fetch_funds(&store, &source, &funds).unwrap();
        assert!(again.iter().all(|s| s.fetched == 0 && s.inserted == 0));

        let universe = load_universe(&store, &funds).unwrap();
        let outcome = optimize(&universe.series, &monthly_request(Objective::MinVolatility)).unwrap();
        let pair = outcome.allocation.weight("A").unwrap() + outcome.allocation.weight("B").unwrap();
        assert!(pair < 2.0 / 3.0);
        assert_eq!(store.list_funds().unwrap(), vec!["A", "B", "C"]);
    }
}

mod fetching {
    use super::*;
    use fundfolio::cli::fetch_funds;
    use fundfolio::ports::price_store::PriceStore;

    #[test]
    fn fetch_requests_only_new_dates_once_per_fund() {
        let series = correlated_universe(12);
        let existing = FundSeries::new("A", series[0].points()[..6].to_vec()).unwrap();
        let store = MockPriceStore::new().with_series(&existing);
        let source = MockFundSource::new()
            .with_series(&series[0])
            .with_series(&series[1]);
        let funds: Vec<String> = ["A", "B", "A"].iter().map(|s| s.to_string()).collect();

        let summaries = fetch_funds(&store, &source, &funds).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].inserted, 6);
        assert_eq!(summaries[1].inserted, 12);

        let requests = source.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], ("A".to_string(), Some(existing.points()[5].date)));
        assert_eq!(requests[1], ("B".to_string(), None));
        assert_eq!(store.data_range("A").unwrap().unwrap().count, 12);
    }

    #[test]
    fn source_error_propagates() {
        let store = MockPriceStore::new();
        let source = MockFundSource::new().with_error("X", "unreachable");
        let err = fetch_funds(&store, &source, &["X".to_string()]).unwrap_err();
        assert!(matches!(err, FundfolioError::Source { ref fund, .. } if fund == "X"));
    }
}
