//! Price history store port trait.

use crate::domain::error::FundfolioError;
use crate::domain::fund_series::{FundSeries, PricePoint};
use chrono::NaiveDate;

/// First date, last date and number of stored observations for one fund.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    pub first: NaiveDate,
    pub last: NaiveDate,
    pub count: usize,
}

pub trait PriceStore {
    /// Full stored history of `fund`, ordered by date. Empty when unknown.
    fn load_series(&self, fund: &str) -> Result<FundSeries, FundfolioError>;

    /// Stores new observations; dates already present are left untouched.
    /// Returns the number of rows inserted.
    fn append_points(&self, fund: &str, points: &[PricePoint]) -> Result<usize, FundfolioError>;

    fn latest_price(&self, fund: &str) -> Result<Option<PricePoint>, FundfolioError>;

    fn data_range(&self, fund: &str) -> Result<Option<DataRange>, FundfolioError>;

    fn list_funds(&self) -> Result<Vec<String>, FundfolioError>;
}
