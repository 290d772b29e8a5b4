//! Remote NAV source port trait.

use crate::domain::error::FundfolioError;
use crate::domain::fund_series::PricePoint;
use chrono::NaiveDate;

pub trait FundSource {
    /// Observations of `fund` strictly after `since`, or the whole history
    /// when `since` is `None`.
    fn fetch_history(
        &self,
        fund: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<PricePoint>, FundfolioError>;
}
