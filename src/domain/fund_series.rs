//! NAV history of a single fund.

use crate::domain::error::FundfolioError;
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, price: f64) -> Self {
        Self { date, price }
    }
}

/// An ordered, immutable NAV history. Dates are strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct FundSeries {
    fund: String,
    points: Vec<PricePoint>,
}

impl FundSeries {
    pub fn new(fund: impl Into<String>, points: Vec<PricePoint>) -> Result<Self, FundfolioError> {
        let fund = fund.into();
        for pair in points.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(FundfolioError::UnorderedSeries {
                    fund,
                    date: pair[1].date,
                });
            }
        }
        Ok(Self { fund, points })
    }

    /// Sorts and deduplicates by date (last write wins) before building.
    pub fn from_unordered(fund: impl Into<String>, mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.date);
        let mut deduped: Vec<PricePoint> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.date == point.date => *last = point,
                _ => deduped.push(point),
            }
        }
        Self {
            fund: fund.into(),
            points: deduped,
        }
    }

    pub fn fund(&self) -> &str {
        &self.fund
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// Fails on the first zero, negative or non-finite price.
    pub fn validate_prices(&self) -> Result<(), FundfolioError> {
        for point in &self.points {
            if !point.price.is_finite() {
                return Err(FundfolioError::invalid_price(
                    &self.fund,
                    point.date,
                    "price is not finite",
                ));
            }
            if point.price <= 0.0 {
                return Err(FundfolioError::invalid_price(
                    &self.fund,
                    point.date,
                    format!("price {} is not positive", point.price),
                ));
            }
        }
        Ok(())
    }
}

/// Latest observed price per fund, used to price a buy order.
pub fn latest_prices(series: &[FundSeries]) -> HashMap<String, f64> {
    series
        .iter()
        .filter_map(|s| s.last().map(|p| (s.fund().to_string(), p.price)))
        .collect()
}
