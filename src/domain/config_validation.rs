//! Configuration validation.
//!
//! Reads the `[estimation]`, `[optimizer]`, `[groups]` and `[allocation]`
//! sections into typed engine configuration, rejecting out-of-range values
//! before any data is loaded.

use crate::domain::config::{
    CovarianceMethod, DEFAULT_EMA_SPAN, DEFAULT_MAX_CONDITION_NUMBER, DEFAULT_MIN_OBSERVATIONS,
    EstimatorConfig, Frequency, ReturnsMethod, SolverConfig,
};
use crate::domain::constraints::Constraint;
use crate::domain::discrete::PurchaseMinimums;
use crate::domain::error::FundfolioError;
use crate::domain::frontier::Objective;
use crate::domain::pipeline::OptimizationRequest;
use crate::ports::config_port::ConfigPort;
use std::str::FromStr;

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOverrides {
    pub objective: Option<String>,
    pub target: Option<f64>,
    pub budget: Option<f64>,
}

pub fn build_request(
    config: &dyn ConfigPort,
    overrides: &RequestOverrides,
) -> Result<OptimizationRequest, FundfolioError> {
    Ok(OptimizationRequest {
        estimator: validate_estimator(config)?,
        solver: validate_solver(config)?,
        constraint: validate_constraint(config)?,
        objective: validate_objective(config, overrides)?,
        budget: validate_budget(config, overrides.budget)?,
        minimums: validate_minimums(config)?,
    })
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> FundfolioError {
    FundfolioError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Parses an optional value, failing on anything present but unparsable.
fn parse_opt<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, FundfolioError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(section, key, format!("cannot parse '{raw}'"))),
    }
}

pub fn validate_estimator(config: &dyn ConfigPort) -> Result<EstimatorConfig, FundfolioError> {
    let frequency = match config.get_string("estimation", "frequency") {
        Some(raw) => Frequency::from_str(&raw).map_err(|e| invalid("estimation", "frequency", e))?,
        None => Frequency::Daily,
    };

    let periods_per_year = parse_opt::<f64>(config, "estimation", "periods_per_year")?;
    if let Some(p) = periods_per_year {
        if !(p.is_finite() && p > 0.0) {
            return Err(invalid(
                "estimation",
                "periods_per_year",
                "periods_per_year must be positive",
            ));
        }
    }

    let min_observations = parse_opt::<usize>(config, "estimation", "min_observations")?
        .unwrap_or(DEFAULT_MIN_OBSERVATIONS);
    if min_observations < 3 {
        return Err(invalid(
            "estimation",
            "min_observations",
            "min_observations must be at least 3",
        ));
    }

    let returns_method = match config
        .get_string("estimation", "returns_method")
        .map(|s| s.trim().to_lowercase())
        .as_deref()
    {
        None | Some("mean") => ReturnsMethod::Mean,
        Some("ema") => {
            let span = parse_opt::<usize>(config, "estimation", "ema_span")?
                .unwrap_or(DEFAULT_EMA_SPAN);
            if span == 0 {
                return Err(invalid("estimation", "ema_span", "ema_span must be at least 1"));
            }
            ReturnsMethod::Ema { span }
        }
        Some(other) => {
            return Err(invalid(
                "estimation",
                "returns_method",
                format!("unknown returns method '{other}' (expected mean or ema)"),
            ));
        }
    };

    let covariance_method = match config.get_string("estimation", "covariance_method") {
        Some(raw) => CovarianceMethod::from_str(&raw)
            .map_err(|e| invalid("estimation", "covariance_method", e))?,
        None => CovarianceMethod::Sample,
    };

    let max_condition_number = parse_opt::<f64>(config, "estimation", "max_condition_number")?
        .unwrap_or(DEFAULT_MAX_CONDITION_NUMBER);
    if !(max_condition_number.is_finite() && max_condition_number > 1.0) {
        return Err(invalid(
            "estimation",
            "max_condition_number",
            "max_condition_number must be greater than 1",
        ));
    }

    Ok(EstimatorConfig {
        frequency,
        periods_per_year,
        min_observations,
        returns_method,
        covariance_method,
        max_condition_number,
    })
}

pub fn validate_solver(config: &dyn ConfigPort) -> Result<SolverConfig, FundfolioError> {
    let defaults = SolverConfig::default();

    let risk_free_rate =
        parse_opt::<f64>(config, "optimizer", "risk_free_rate")?.unwrap_or(defaults.risk_free_rate);
    if !(risk_free_rate.is_finite() && risk_free_rate > -1.0 && risk_free_rate < 1.0) {
        return Err(invalid(
            "optimizer",
            "risk_free_rate",
            "risk_free_rate must be between -1 and 1",
        ));
    }

    let dust_threshold =
        parse_opt::<f64>(config, "optimizer", "dust_threshold")?.unwrap_or(defaults.dust_threshold);
    if !(0.0..1.0).contains(&dust_threshold) {
        return Err(invalid(
            "optimizer",
            "dust_threshold",
            "dust_threshold must be in [0, 1)",
        ));
    }

    Ok(SolverConfig {
        risk_free_rate,
        dust_threshold,
        ..defaults
    })
}

fn check_bounds(section: &str, key: &str, lo: f64, hi: f64) -> Result<(), FundfolioError> {
    if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
        return Err(invalid(
            section,
            key,
            format!("bounds [{lo}, {hi}] must satisfy 0 <= lower <= upper <= 1"),
        ));
    }
    Ok(())
}

/// Builds weight constraints from `[optimizer]` bounds and `[groups]`.
///
/// `bounds` is a comma list of `FUND:lower:upper`; each `[groups]` entry is
/// `name = cap | FUND, FUND, ...`.
pub fn validate_constraint(config: &dyn ConfigPort) -> Result<Constraint, FundfolioError> {
    let min_weight = parse_opt::<f64>(config, "optimizer", "min_weight")?.unwrap_or(0.0);
    let max_weight = parse_opt::<f64>(config, "optimizer", "max_weight")?.unwrap_or(1.0);
    check_bounds("optimizer", "min_weight", min_weight, max_weight)?;
    let mut constraint = Constraint::default().with_default_bounds(min_weight, max_weight);

    if let Some(raw) = config.get_string("optimizer", "bounds") {
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [fund, lo, hi] = parts.as_slice() else {
                return Err(invalid(
                    "optimizer",
                    "bounds",
                    format!("'{entry}' is not FUND:lower:upper"),
                ));
            };
            let parse = |v: &str| {
                v.parse::<f64>()
                    .map_err(|_| invalid("optimizer", "bounds", format!("bad number '{v}' in '{entry}'")))
            };
            let (lo, hi) = (parse(*lo)?, parse(*hi)?);
            check_bounds("optimizer", "bounds", lo, hi)?;
            constraint = constraint.with_fund_bounds(fund, lo, hi);
        }
    }

    for name in config.keys("groups") {
        let raw = config.get_string("groups", &name).unwrap_or_default();
        let Some((cap, members)) = raw.split_once('|') else {
            return Err(invalid("groups", &name, "expected 'cap | FUND, FUND, ...'"));
        };
        let cap: f64 = cap
            .trim()
            .parse()
            .map_err(|_| invalid("groups", &name, format!("bad cap '{}'", cap.trim())))?;
        if !(0.0..=1.0).contains(&cap) {
            return Err(invalid("groups", &name, "group cap must be in [0, 1]"));
        }
        let funds: Vec<&str> = members
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        if funds.is_empty() {
            return Err(invalid("groups", &name, "group lists no funds"));
        }
        constraint = constraint.with_group(&name, &funds, cap);
    }

    Ok(constraint)
}

pub fn validate_objective(
    config: &dyn ConfigPort,
    overrides: &RequestOverrides,
) -> Result<Objective, FundfolioError> {
    let name = overrides
        .objective
        .clone()
        .or_else(|| config.get_string("optimizer", "objective"))
        .unwrap_or_else(|| "max_sharpe".to_string());
    let target = match overrides.target {
        Some(t) => Some(t),
        None => parse_opt::<f64>(config, "optimizer", "target")?,
    };
    if let Some(t) = target {
        if !t.is_finite() {
            return Err(invalid("optimizer", "target", "target must be finite"));
        }
    }
    Objective::from_name(&name, target).map_err(|reason| {
        let key = if reason.contains("requires a target") {
            "target"
        } else {
            "objective"
        };
        invalid("optimizer", key, reason)
    })
}

pub fn validate_budget(
    config: &dyn ConfigPort,
    budget_override: Option<f64>,
) -> Result<Option<f64>, FundfolioError> {
    let budget = match budget_override {
        Some(b) => Some(b),
        None => parse_opt::<f64>(config, "allocation", "budget")?,
    };
    if let Some(b) = budget {
        if !(b.is_finite() && b > 0.0) {
            return Err(invalid("allocation", "budget", "budget must be positive"));
        }
    }
    Ok(budget)
}

/// Reads `[allocation] min_value` and the per-fund `min_values` list of
/// `FUND:value` entries.
pub fn validate_minimums(config: &dyn ConfigPort) -> Result<PurchaseMinimums, FundfolioError> {
    let default = parse_opt::<f64>(config, "allocation", "min_value")?.unwrap_or(0.0);
    if !(default.is_finite() && default >= 0.0) {
        return Err(invalid("allocation", "min_value", "min_value must be >= 0"));
    }
    let mut minimums = PurchaseMinimums::new(default);

    if let Some(raw) = config.get_string("allocation", "min_values") {
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((fund, value)) = entry.split_once(':') else {
                return Err(invalid(
                    "allocation",
                    "min_values",
                    format!("'{entry}' is not FUND:value"),
                ));
            };
            let value: f64 = value.trim().parse().map_err(|_| {
                invalid("allocation", "min_values", format!("bad number in '{entry}'"))
            })?;
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid(
                    "allocation",
                    "min_values",
                    format!("'{entry}' must not be negative"),
                ));
            }
            minimums = minimums.with_fund(fund.trim(), value);
        }
    }
    Ok(minimums)
}
