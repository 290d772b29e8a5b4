//! Domain error types.

use chrono::NaiveDate;

/// Top-level error type for fundfolio.
#[derive(Debug, thiserror::Error)]
pub enum FundfolioError {
    #[error("invalid price for {fund} on {date}: {reason}")]
    InvalidPrice {
        fund: String,
        date: String,
        reason: String,
    },

    #[error("series for {fund} is not strictly increasing at {date}")]
    UnorderedSeries { fund: String, date: NaiveDate },

    #[error("insufficient data: {reason}")]
    InsufficientData { reason: String },

    #[error("non-convex problem: {reason}")]
    NonConvexProblem { reason: String },

    #[error("infeasible constraints: {reason}")]
    InfeasibleConstraints { reason: String },

    #[error("solver numerical failure: {reason}")]
    SolverNumerical { reason: String },

    #[error("invalid budget {budget}: must be positive and finite")]
    InvalidBudget { budget: f64 },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("source error for {fund}: {reason}")]
    Source { fund: String, reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FundfolioError {
    /// Short kind name printed by the command-line surface.
    pub fn kind(&self) -> &'static str {
        match self {
            FundfolioError::InvalidPrice { .. } => "InvalidPriceError",
            FundfolioError::UnorderedSeries { .. } => "UnorderedSeriesError",
            FundfolioError::InsufficientData { .. } => "InsufficientDataError",
            FundfolioError::NonConvexProblem { .. } => "NonConvexProblemError",
            FundfolioError::InfeasibleConstraints { .. } => "InfeasibleConstraintsError",
            FundfolioError::SolverNumerical { .. } => "SolverNumericalError",
            FundfolioError::InvalidBudget { .. } => "InvalidBudgetError",
            FundfolioError::Database { .. } | FundfolioError::DatabaseQuery { .. } => {
                "DatabaseError"
            }
            FundfolioError::Source { .. } => "SourceError",
            FundfolioError::ConfigParse { .. }
            | FundfolioError::ConfigMissing { .. }
            | FundfolioError::ConfigInvalid { .. } => "ConfigError",
            FundfolioError::Io(_) => "IoError",
        }
    }

    pub(crate) fn invalid_price(fund: &str, date: impl ToString, reason: impl Into<String>) -> Self {
        FundfolioError::InvalidPrice {
            fund: fund.to_string(),
            date: date.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn infeasible(reason: impl Into<String>) -> Self {
        FundfolioError::InfeasibleConstraints {
            reason: reason.into(),
        }
    }

    pub(crate) fn numerical(reason: impl Into<String>) -> Self {
        FundfolioError::SolverNumerical {
            reason: reason.into(),
        }
    }
}

impl From<&FundfolioError> for std::process::ExitCode {
    fn from(err: &FundfolioError) -> Self {
        let code: u8 = match err {
            FundfolioError::Io(_) => 1,
            FundfolioError::ConfigParse { .. }
            | FundfolioError::ConfigMissing { .. }
            | FundfolioError::ConfigInvalid { .. } => 2,
            FundfolioError::Database { .. }
            | FundfolioError::DatabaseQuery { .. }
            | FundfolioError::Source { .. } => 3,
            FundfolioError::InvalidPrice { .. }
            | FundfolioError::UnorderedSeries { .. }
            | FundfolioError::InsufficientData { .. }
            | FundfolioError::InvalidBudget { .. } => 4,
            FundfolioError::NonConvexProblem { .. }
            | FundfolioError::InfeasibleConstraints { .. }
            | FundfolioError::SolverNumerical { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_price_message_names_fund_and_date() {
        let err = FundfolioError::invalid_price("110022", "2024-03-01", "price is zero");
        assert_eq!(
            err.to_string(),
            "invalid price for 110022 on 2024-03-01: price is zero"
        );
        assert_eq!(err.kind(), "InvalidPriceError");
    }

    #[test]
    fn kinds_are_distinct_per_engine_stage() {
        assert_eq!(
            FundfolioError::infeasible("x").kind(),
            "InfeasibleConstraintsError"
        );
        assert_eq!(FundfolioError::numerical("x").kind(), "SolverNumericalError");
        assert_eq!(
            FundfolioError::InsufficientData { reason: "x".into() }.kind(),
            "InsufficientDataError"
        );
    }
}
