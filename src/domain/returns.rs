//! Price alignment, periodic returns and moment estimation.
//!
//! Series are resampled to the configured frequency, intersected on a common
//! date axis, turned into simple periodic returns and summarized as an
//! annualized expected-return vector and covariance matrix.

use crate::domain::config::{CovarianceMethod, EstimatorConfig, Frequency, ReturnsMethod};
use crate::domain::covariance::{ledoit_wolf, sample_covariance, stabilize};
use crate::domain::error::FundfolioError;
use crate::domain::fund_series::FundSeries;
use chrono::{Datelike, Duration, NaiveDate};
use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeMap, BTreeSet};

/// Smallest number of aligned dates that still yields a covariance estimate.
const MIN_ALIGNED_DATES: usize = 3;

/// Prices of several funds on a shared date axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPrices {
    pub funds: Vec<String>,
    pub dates: Vec<NaiveDate>,
    /// One column per fund, each `dates.len()` long.
    pub prices: Vec<Vec<f64>>,
}

impl AlignedPrices {
    pub fn price(&self, fund: usize, date: usize) -> f64 {
        self.prices[fund][date]
    }

    /// Keeps the first `len` dates.
    pub fn head(&self, len: usize) -> AlignedPrices {
        AlignedPrices {
            funds: self.funds.clone(),
            dates: self.dates[..len].to_vec(),
            prices: self.prices.iter().map(|c| c[..len].to_vec()).collect(),
        }
    }
}

/// Periodic simple returns on a shared axis. `dates` is the price axis, so
/// each column holds `dates.len() - 1` returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMatrix {
    pub funds: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<Vec<f64>>,
}

impl ReturnMatrix {
    pub fn from_prices(aligned: &AlignedPrices) -> ReturnMatrix {
        let columns = aligned
            .prices
            .iter()
            .map(|column| {
                column
                    .windows(2)
                    .map(|pair| (pair[1] - pair[0]) / pair[0])
                    .collect()
            })
            .collect();
        ReturnMatrix {
            funds: aligned.funds.clone(),
            dates: aligned.dates.clone(),
            columns,
        }
    }

    pub fn periods(&self) -> usize {
        self.dates.len().saturating_sub(1)
    }

    /// Periods in rows, funds in columns.
    pub fn as_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.periods(), self.funds.len(), |r, c| self.columns[c][r])
    }
}

/// Annualized return and risk estimates for a fund universe.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentEstimates {
    pub funds: Vec<String>,
    pub expected_returns: DVector<f64>,
    pub covariance: DMatrix<f64>,
    pub periods_per_year: f64,
    /// Number of aligned price dates the estimates were computed from.
    pub observations: usize,
    /// Diagonal blend intensity, when stabilization was needed.
    pub shrinkage: Option<f64>,
}

impl MomentEstimates {
    pub fn fund_count(&self) -> usize {
        self.funds.len()
    }
}

/// Label identifying the resampling bucket a date falls into.
fn period_label(date: NaiveDate, frequency: Frequency) -> NaiveDate {
    match frequency {
        Frequency::Daily => date,
        Frequency::Weekly => {
            let to_sunday = 6 - date.weekday().num_days_from_monday() as i64;
            date + Duration::days(to_sunday)
        }
        Frequency::Monthly => {
            let (year, month) = if date.month() == 12 {
                (date.year() + 1, 1)
            } else {
                (date.year(), date.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1)
                .and_then(|first| first.pred_opt())
                .unwrap_or(date)
        }
    }
}

/// Last observation per period, keyed by period label.
fn resample(series: &FundSeries, frequency: Frequency) -> BTreeMap<NaiveDate, f64> {
    let mut out = BTreeMap::new();
    for point in series.points() {
        out.insert(period_label(point.date, frequency), point.price);
    }
    out
}

/// Validates prices and intersects all series on a common axis.
///
/// When the full intersection is empty, funds are dropped one at a time,
/// each time removing the fund whose absence leaves the largest common axis,
/// until the survivors share at least one date. Dropped funds are logged.
/// The result does not depend on input order; survivors keep it.
pub fn align_series(
    series: &[FundSeries],
    frequency: Frequency,
) -> Result<AlignedPrices, FundfolioError> {
    for s in series {
        s.validate_prices()?;
    }

    let mut kept: Vec<(&str, BTreeMap<NaiveDate, f64>)> = Vec::with_capacity(series.len());
    for s in series {
        let sampled = resample(s, frequency);
        if sampled.is_empty() {
            tracing::warn!(fund = s.fund(), "dropping fund with no observations");
            continue;
        }
        kept.push((s.fund(), sampled));
    }

    let mut axis = common_dates(&kept, None);
    while axis.is_empty() && kept.len() > 1 {
        let drop = (0..kept.len())
            .map(|i| (i, common_dates(&kept, Some(i)).len()))
            .max_by(|&(a, len_a), &(b, len_b)| {
                len_a
                    .cmp(&len_b)
                    .then(kept[b].1.len().cmp(&kept[a].1.len()))
                    .then(kept[b].0.cmp(kept[a].0))
            })
            .map(|(i, _)| i);
        let Some(i) = drop else { break };
        let (fund, _) = kept.remove(i);
        tracing::warn!(fund, "dropping fund with no data on the common date axis");
        axis = common_dates(&kept, None);
    }

    let axis: Vec<NaiveDate> = axis.into_iter().collect();
    let prices = kept
        .iter()
        .map(|(_, sampled)| axis.iter().map(|d| sampled[d]).collect())
        .collect();

    Ok(AlignedPrices {
        funds: kept.iter().map(|(f, _)| f.to_string()).collect(),
        dates: axis,
        prices,
    })
}

/// Dates present in every sampled series except `skip`.
fn common_dates(
    sampled: &[(&str, BTreeMap<NaiveDate, f64>)],
    skip: Option<usize>,
) -> BTreeSet<NaiveDate> {
    let mut rest = sampled
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != skip)
        .map(|(_, (_, dates))| dates);
    let Some(first) = rest.next() else {
        return BTreeSet::new();
    };
    let mut axis: BTreeSet<NaiveDate> = first.keys().copied().collect();
    for dates in rest {
        axis.retain(|d| dates.contains_key(d));
    }
    axis
}

/// Checks the fund and observation minimums on an aligned universe.
pub fn check_sufficient(
    aligned: &AlignedPrices,
    min_observations: usize,
) -> Result<(), FundfolioError> {
    if aligned.funds.len() < 2 {
        return Err(FundfolioError::InsufficientData {
            reason: format!(
                "need at least 2 funds with overlapping history, have {}",
                aligned.funds.len()
            ),
        });
    }
    let minimum = min_observations.max(MIN_ALIGNED_DATES);
    if aligned.dates.len() < minimum {
        return Err(FundfolioError::InsufficientData {
            reason: format!(
                "{} common observation dates across {}, need {}",
                aligned.dates.len(),
                aligned.funds.join(", "),
                minimum
            ),
        });
    }
    Ok(())
}

/// Estimates annualized moments from raw NAV series.
pub fn estimate(
    series: &[FundSeries],
    config: &EstimatorConfig,
) -> Result<MomentEstimates, FundfolioError> {
    let aligned = align_series(series, config.frequency)?;
    estimate_aligned(&aligned, config)
}

/// Estimates annualized moments from an already aligned universe.
pub fn estimate_aligned(
    aligned: &AlignedPrices,
    config: &EstimatorConfig,
) -> Result<MomentEstimates, FundfolioError> {
    check_sufficient(aligned, config.min_observations)?;

    let returns = ReturnMatrix::from_prices(aligned);
    let matrix = returns.as_matrix();
    let factor = config.annualization();

    let expected_returns = match config.returns_method {
        ReturnsMethod::Mean => DVector::from_iterator(
            returns.columns.len(),
            returns
                .columns
                .iter()
                .map(|c| c.iter().sum::<f64>() / c.len() as f64 * factor),
        ),
        ReturnsMethod::Ema { span } => DVector::from_iterator(
            returns.columns.len(),
            returns
                .columns
                .iter()
                .map(|c| (1.0 + ema_mean(c, span)).powf(factor) - 1.0),
        ),
    };

    let raw_cov = match config.covariance_method {
        CovarianceMethod::Sample => sample_covariance(&matrix),
        CovarianceMethod::LedoitWolf => {
            let (cov, intensity) = ledoit_wolf(&matrix);
            tracing::debug!(intensity, "ledoit-wolf shrinkage");
            cov
        }
    };

    let (covariance, shrinkage) = stabilize(&(raw_cov * factor), config.max_condition_number);
    if let Some(intensity) = shrinkage {
        tracing::warn!(
            intensity,
            threshold = config.max_condition_number,
            "covariance ill-conditioned, applied diagonal shrinkage"
        );
    }

    Ok(MomentEstimates {
        funds: aligned.funds.clone(),
        expected_returns,
        covariance,
        periods_per_year: factor,
        observations: aligned.dates.len(),
        shrinkage,
    })
}

/// Exponentially weighted mean with `alpha = 2 / (span + 1)`; the latest
/// value carries weight one and older values decay geometrically.
fn ema_mean(values: &[f64], span: usize) -> f64 {
    let alpha = 2.0 / (span.max(1) as f64 + 1.0);
    let decay = 1.0 - alpha;
    let mut weight = 1.0;
    let mut num = 0.0;
    let mut den = 0.0;
    for v in values.iter().rev() {
        num += weight * v;
        den += weight;
        weight *= decay;
    }
    if den > 0.0 { num / den } else { 0.0 }
}
