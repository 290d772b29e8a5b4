//! Engine configuration with documented defaults.

use std::fmt;
use std::str::FromStr;

/// Sampling frequency of the aligned price axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    /// Every observed date; 252 periods per year.
    Daily,
    /// Last observation of each ISO week; 52 periods per year.
    Weekly,
    /// Last observation of each calendar month; 12 periods per year.
    Monthly,
}

impl Frequency {
    pub fn periods_per_year(self) -> f64 {
        match self {
            Frequency::Daily => 252.0,
            Frequency::Weekly => 52.0,
            Frequency::Monthly => 12.0,
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "d" | "daily" => Ok(Frequency::Daily),
            "w" | "weekly" => Ok(Frequency::Weekly),
            "m" | "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown frequency '{other}'")),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        };
        f.write_str(name)
    }
}

/// How the expected-return vector is estimated from periodic returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReturnsMethod {
    Mean,
    /// Exponentially weighted mean, most recent period weighted highest.
    Ema { span: usize },
}

/// How the covariance matrix is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovarianceMethod {
    Sample,
    /// Ledoit-Wolf shrinkage toward a scaled identity.
    LedoitWolf,
}

impl FromStr for CovarianceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sample" => Ok(CovarianceMethod::Sample),
            "ledoit_wolf" | "ledoit-wolf" | "lw" => Ok(CovarianceMethod::LedoitWolf),
            other => Err(format!("unknown covariance method '{other}'")),
        }
    }
}

pub const DEFAULT_MIN_OBSERVATIONS: usize = 30;
pub const DEFAULT_EMA_SPAN: usize = 500;
pub const DEFAULT_MAX_CONDITION_NUMBER: f64 = 1e8;
pub const DEFAULT_DUST_THRESHOLD: f64 = 1e-4;
pub const DEFAULT_SUM_TOLERANCE: f64 = 1e-6;

/// Parameters of the return/covariance estimation stage.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    pub frequency: Frequency,
    /// Annualization factor; `None` uses the frequency's natural factor.
    pub periods_per_year: Option<f64>,
    /// Minimum number of aligned observation dates.
    pub min_observations: usize,
    pub returns_method: ReturnsMethod,
    pub covariance_method: CovarianceMethod,
    /// Condition number above which diagonal shrinkage is applied.
    pub max_condition_number: f64,
}

impl EstimatorConfig {
    pub fn annualization(&self) -> f64 {
        self.periods_per_year
            .unwrap_or_else(|| self.frequency.periods_per_year())
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            frequency: Frequency::Daily,
            periods_per_year: None,
            min_observations: DEFAULT_MIN_OBSERVATIONS,
            returns_method: ReturnsMethod::Mean,
            covariance_method: CovarianceMethod::Sample,
            max_condition_number: DEFAULT_MAX_CONDITION_NUMBER,
        }
    }
}

/// Parameters of the frontier solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Annualized risk-free rate used by the Sharpe objective.
    pub risk_free_rate: f64,
    /// Weights below this are zeroed and their mass redistributed.
    pub dust_threshold: f64,
    /// Allowed deviation of the weight sum from one before failing.
    pub sum_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            sum_tolerance: DEFAULT_SUM_TOLERANCE,
        }
    }
}
