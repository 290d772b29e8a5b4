//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::allocation::Allocation;
use crate::domain::config_validation::{RequestOverrides, build_request};
use crate::domain::discrete::SharePlan;
use crate::domain::error::FundfolioError;
use crate::domain::frontier::{FrontierPoint, efficient_frontier};
use crate::domain::performance::Performance;
use crate::domain::pipeline::{HoldoutReport, OptimizationOutcome, evaluate_holdout, optimize};
use crate::domain::returns::estimate;
use crate::domain::universe::{dedup_funds, load_universe, parse_funds};
use crate::ports::config_port::ConfigPort;
use crate::ports::fund_source::FundSource;
use crate::ports::price_store::PriceStore;

#[derive(Parser, Debug)]
#[command(name = "fundfolio", about = "Mean-variance portfolio optimizer for mutual funds")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pull new NAV observations from the source into the store
    Fetch {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory of `<fund>.csv` files
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(required = true)]
        funds: Vec<String>,
    },
    /// Optimize portfolio weights and, given a budget, whole-share quantities
    Optimize {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        objective: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        target: Option<f64>,
        #[arg(long)]
        budget: Option<f64>,
        /// Hold out the last N aligned periods and report realized performance
        #[arg(long)]
        holdout: Option<usize>,
        funds: Vec<String>,
    },
    /// Sample the efficient frontier
    Frontier {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        points: usize,
        funds: Vec<String>,
    },
    /// Show stored date range per fund
    Info {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        funds: Vec<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Fetch {
            store,
            config,
            source,
            funds,
        } => run_fetch(store.as_deref(), config.as_deref(), source.as_deref(), &funds),
        Command::Optimize {
            store,
            config,
            objective,
            target,
            budget,
            holdout,
            funds,
        } => {
            let overrides = RequestOverrides {
                objective,
                target,
                budget,
            };
            run_optimize(store.as_deref(), config.as_deref(), &overrides, holdout, &funds)
        }
        Command::Frontier {
            store,
            config,
            points,
            funds,
        } => run_frontier(store.as_deref(), config.as_deref(), points, &funds),
        Command::Info {
            store,
            config,
            funds,
        } => run_info(store.as_deref(), config.as_deref(), &funds),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}: {e}", e.kind());
            (&e).into()
        }
    }
}

/// Loads the INI file, or an empty configuration when none is given.
pub fn load_config(path: Option<&Path>) -> Result<FileConfigAdapter, FundfolioError> {
    match path {
        Some(path) => FileConfigAdapter::from_file(path).map_err(|e| FundfolioError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        }),
        None => Ok(FileConfigAdapter::empty()),
    }
}

#[cfg(feature = "sqlite")]
pub fn open_store(
    config: &dyn ConfigPort,
    store: Option<&Path>,
) -> Result<Box<dyn PriceStore>, FundfolioError> {
    use crate::adapters::sqlite_adapter::SqliteAdapter;
    Ok(Box::new(SqliteAdapter::from_config(config, store)?))
}

#[cfg(not(feature = "sqlite"))]
pub fn open_store(
    _config: &dyn ConfigPort,
    _store: Option<&Path>,
) -> Result<Box<dyn PriceStore>, FundfolioError> {
    Err(FundfolioError::Database {
        reason: "sqlite feature is required for the price store".into(),
    })
}

/// Explicit funds, deduplicated; otherwise `[universe] funds`; otherwise
/// every stored fund.
pub fn resolve_funds(
    store: &dyn PriceStore,
    config: &dyn ConfigPort,
    funds: &[String],
) -> Result<Vec<String>, FundfolioError> {
    if !funds.is_empty() {
        return Ok(dedup_funds(funds));
    }
    match config.get_string("universe", "funds") {
        Some(list) => parse_funds(&list).map_err(|e| FundfolioError::ConfigInvalid {
            section: "universe".into(),
            key: "funds".into(),
            reason: e.to_string(),
        }),
        None => store.list_funds(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub fund: String,
    pub fetched: usize,
    pub inserted: usize,
}

/// Appends every observation newer than the stored history of each fund.
pub fn fetch_funds(
    store: &dyn PriceStore,
    source: &dyn FundSource,
    funds: &[String],
) -> Result<Vec<FetchSummary>, FundfolioError> {
    let mut summaries = Vec::new();
    for fund in dedup_funds(funds) {
        let since = store.data_range(&fund)?.map(|r| r.last);
        let points = source.fetch_history(&fund, since)?;
        let inserted = if points.is_empty() {
            0
        } else {
            store.append_points(&fund, &points)?
        };
        info!(fund = %fund, since = ?since, fetched = points.len(), inserted, "fetched history");
        summaries.push(FetchSummary {
            fund,
            fetched: points.len(),
            inserted,
        });
    }
    Ok(summaries)
}

fn run_fetch(
    store_path: Option<&Path>,
    config_path: Option<&Path>,
    source_path: Option<&Path>,
    funds: &[String],
) -> Result<(), FundfolioError> {
    let config = load_config(config_path)?;
    let source_dir = match source_path {
        Some(p) => p.to_path_buf(),
        None => config
            .get_string("source", "csv_dir")
            .map(PathBuf::from)
            .ok_or_else(|| FundfolioError::ConfigMissing {
                section: "source".into(),
                key: "csv_dir".into(),
            })?,
    };
    let store = open_store(&config, store_path)?;
    let source = CsvAdapter::new(source_dir);

    for summary in fetch_funds(store.as_ref(), &source, funds)? {
        println!(
            "{}: {} fetched, {} new",
            summary.fund, summary.fetched, summary.inserted
        );
    }
    Ok(())
}

fn run_optimize(
    store_path: Option<&Path>,
    config_path: Option<&Path>,
    overrides: &RequestOverrides,
    holdout: Option<usize>,
    funds: &[String],
) -> Result<(), FundfolioError> {
    let config = load_config(config_path)?;
    let request = build_request(&config, overrides)?;
    let store = open_store(&config, store_path)?;
    let funds = resolve_funds(store.as_ref(), &config, funds)?;
    let universe = load_universe(store.as_ref(), &funds)?;

    let report = match holdout {
        Some(periods) => render_holdout(&evaluate_holdout(&universe.series, &request, periods)?),
        None => render_outcome(&optimize(&universe.series, &request)?),
    };
    print!("{report}");
    Ok(())
}

fn run_frontier(
    store_path: Option<&Path>,
    config_path: Option<&Path>,
    points: usize,
    funds: &[String],
) -> Result<(), FundfolioError> {
    let config = load_config(config_path)?;
    let request = build_request(&config, &RequestOverrides::default())?;
    let store = open_store(&config, store_path)?;
    let funds = resolve_funds(store.as_ref(), &config, funds)?;
    let universe = load_universe(store.as_ref(), &funds)?;

    let moments = estimate(&universe.series, &request.estimator)?;
    let frontier = efficient_frontier(&moments, &request.constraint, points, &request.solver)?;
    print!("{}", render_frontier(&moments.funds, &frontier));
    Ok(())
}

fn run_info(
    store_path: Option<&Path>,
    config_path: Option<&Path>,
    funds: &[String],
) -> Result<(), FundfolioError> {
    let config = load_config(config_path)?;
    let store = open_store(&config, store_path)?;
    let funds = resolve_funds(store.as_ref(), &config, funds)?;

    for fund in &funds {
        match (store.data_range(fund)?, store.latest_price(fund)?) {
            (Some(range), Some(latest)) => println!(
                "{fund}: {} observations, {} to {}, latest nav {:.4}",
                range.count, range.first, range.last, latest.price
            ),
            _ => warn!(fund = %fund, "no stored history"),
        }
    }
    Ok(())
}

fn render_weights(lines: &mut Vec<String>, allocation: &Allocation) {
    lines.push(format!("{:<12} {:>8}", "fund", "weight"));
    for (fund, weight) in allocation.weights() {
        lines.push(format!("{fund:<12} {:>7.2}%", weight * 100.0));
    }
    if !allocation.dust().is_empty() {
        lines.push(format!("dust removed: {}", allocation.dust().join(", ")));
    }
}

fn render_performance(lines: &mut Vec<String>, performance: &Performance) {
    lines.push(format!(
        "Expected annual return: {:.2}%",
        performance.expected_return * 100.0
    ));
    lines.push(format!(
        "Annual volatility:      {:.2}%",
        performance.volatility * 100.0
    ));
    lines.push(format!("Sharpe ratio:           {:.2}", performance.sharpe_ratio));
}

fn render_plan(lines: &mut Vec<String>, plan: &SharePlan) {
    lines.push(String::new());
    lines.push(format!("=== Shares (budget {:.2}) ===", plan.budget()));
    for (line, (_, realized)) in plan.lines().iter().zip(plan.realized_weights()) {
        lines.push(format!(
            "{:<12} {:>8} @ {:.4} = {:>10.2} ({:.2}%)",
            line.fund,
            line.shares,
            line.price,
            line.cost(),
            realized * 100.0
        ));
    }
    lines.push(format!(
        "Spent: {:.2}  Leftover: {:.2}",
        plan.total_cost(),
        plan.leftover()
    ));
}

pub fn render_outcome(outcome: &OptimizationOutcome) -> String {
    let mut lines = vec![format!(
        "=== Allocation ({} observations, {} periods/year) ===",
        outcome.moments.observations, outcome.moments.periods_per_year
    )];
    if let Some(shrinkage) = outcome.moments.shrinkage {
        lines.push(format!("covariance shrinkage: {shrinkage:.4}"));
    }
    render_weights(&mut lines, &outcome.allocation);
    lines.push(String::new());
    render_performance(&mut lines, &outcome.performance);
    if let Some(plan) = &outcome.plan {
        render_plan(&mut lines, plan);
    }
    lines.push(String::new());
    lines.join("\n")
}

pub fn render_holdout(report: &HoldoutReport) -> String {
    let mut lines = vec![format!(
        "=== Allocation (trained to {}) ===",
        report.train_end
    )];
    render_weights(&mut lines, &report.allocation);
    lines.push(String::new());
    render_performance(&mut lines, &report.expected);
    lines.push(String::new());
    lines.push(format!(
        "=== Holdout ({} periods, {} to {}) ===",
        report.holdout_periods, report.train_end, report.test_end
    ));
    lines.push(format!(
        "Realized return:        {:.2}%",
        report.realized_return * 100.0
    ));
    lines.push(format!(
        "Annualized:             {:.2}%",
        report.annualized_return * 100.0
    ));
    if let Some(plan) = &report.plan {
        render_plan(&mut lines, plan);
    }
    if let Some(plan_return) = report.plan_return {
        lines.push(format!("Share plan return: {:.2}%", plan_return * 100.0));
    }
    lines.push(String::new());
    lines.join("\n")
}

pub fn render_frontier(funds: &[String], points: &[FrontierPoint]) -> String {
    let mut header = format!("{:>8} {:>8} {:>7}", "return", "risk", "sharpe");
    for fund in funds {
        header.push_str(&format!(" {fund:>10}"));
    }
    let mut lines = vec![header];
    for point in points {
        let mut line = format!(
            "{:>7.2}% {:>7.2}% {:>7.2}",
            point.expected_return * 100.0,
            point.volatility * 100.0,
            point.sharpe
        );
        for w in point.weights.iter() {
            line.push_str(&format!(" {:>9.2}%", w * 100.0));
        }
        lines.push(line);
    }
    lines.push(String::new());
    lines.join("\n")
}
