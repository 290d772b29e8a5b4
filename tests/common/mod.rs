#![allow(dead_code)]

use chrono::{Datelike, NaiveDate};
use fundfolio::domain::error::FundfolioError;
use fundfolio::domain::fund_series::{FundSeries, PricePoint};
use fundfolio::ports::fund_source::FundSource;
use fundfolio::ports::price_store::{DataRange, PriceStore};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

/// In-memory price store keyed by fund then date.
pub struct MockPriceStore {
    pub data: RefCell<HashMap<String, BTreeMap<NaiveDate, f64>>>,
}

impl MockPriceStore {
    pub fn new() -> Self {
        Self {
            data: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_series(self, series: &FundSeries) -> Self {
        self.append_points(series.fund(), series.points()).unwrap();
        self
    }
}

impl PriceStore for MockPriceStore {
    fn load_series(&self, fund: &str) -> Result<FundSeries, FundfolioError> {
        let data = self.data.borrow();
        let points = data
            .get(fund)
            .map(|m| m.iter().map(|(d, p)| PricePoint::new(*d, *p)).collect())
            .unwrap_or_default();
        FundSeries::new(fund, points)
    }

    fn append_points(&self, fund: &str, points: &[PricePoint]) -> Result<usize, FundfolioError> {
        let mut data = self.data.borrow_mut();
        let entry = data.entry(fund.to_string()).or_default();
        let mut inserted = 0;
        for p in points {
            if !entry.contains_key(&p.date) {
                entry.insert(p.date, p.price);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn latest_price(&self, fund: &str) -> Result<Option<PricePoint>, FundfolioError> {
        Ok(self
            .data
            .borrow()
            .get(fund)
            .and_then(|m| m.iter().next_back())
            .map(|(d, p)| PricePoint::new(*d, *p)))
    }

    fn data_range(&self, fund: &str) -> Result<Option<DataRange>, FundfolioError> {
        let data = self.data.borrow();
        match data.get(fund) {
            Some(m) if !m.is_empty() => Ok(Some(DataRange {
                first: *m.keys().next().unwrap(),
                last: *m.keys().next_back().unwrap(),
                count: m.len(),
            })),
            _ => Ok(None),
        }
    }

    fn list_funds(&self) -> Result<Vec<String>, FundfolioError> {
        let mut funds: Vec<String> = self.data.borrow().keys().cloned().collect();
        funds.sort();
        Ok(funds)
    }
}

/// Source serving fixed histories and recording every request.
pub struct MockFundSource {
    pub history: HashMap<String, Vec<PricePoint>>,
    pub errors: HashMap<String, String>,
    pub requests: RefCell<Vec<(String, Option<NaiveDate>)>>,
}

impl MockFundSource {
    pub fn new() -> Self {
        Self {
            history: HashMap::new(),
            errors: HashMap::new(),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn with_series(mut self, series: &FundSeries) -> Self {
        self.history
            .insert(series.fund().to_string(), series.points().to_vec());
        self
    }

    pub fn with_error(mut self, fund: &str, reason: &str) -> Self {
        self.errors.insert(fund.to_string(), reason.to_string());
        self
    }
}

impl FundSource for MockFundSource {
    fn fetch_history(
        &self,
        fund: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<PricePoint>, FundfolioError> {
        self.requests.borrow_mut().push((fund.to_string(), since));
        if let Some(reason) = self.errors.get(fund) {
            return Err(FundfolioError::Source {
                fund: fund.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(self
            .history
            .get(fund)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| since.is_none_or(|s| p.date > s))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// First day of each month starting January 2021.
pub fn month_starts(count: usize) -> Vec<NaiveDate> {
    (0..count)
        .map(|i| {
            let months = 2021 * 12 + i as i32;
            date(months / 12, (months % 12) as u32 + 1, 1)
        })
        .collect()
}

/// Series compounding the given periodic returns from `start_price`.
pub fn series_from_returns(
    fund: &str,
    dates: &[NaiveDate],
    start_price: f64,
    returns: &[f64],
) -> FundSeries {
    assert_eq!(dates.len(), returns.len() + 1);
    let mut price = start_price;
    let mut points = vec![PricePoint::new(dates[0], price)];
    for (d, r) in dates[1..].iter().zip(returns) {
        price *= 1.0 + r;
        points.push(PricePoint::new(*d, price));
    }
    FundSeries::new(fund, points).unwrap()
}

/// Deterministic +/-1 pattern repeating every `period` steps, shifted by `phase`.
pub fn pattern(len: usize, period: usize, phase: usize) -> Vec<f64> {
    (0..len)
        .map(|i| if ((i + phase) / period) % 2 == 0 { 1.0 } else { -1.0 })
        .collect()
}

/// Consecutive calendar days starting at `start`.
pub fn daily_dates(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    (0..count)
        .map(|i| start + chrono::Duration::days(i as i64))
        .collect()
}

/// Series whose returns are `drift` plus a +/-`amp` pattern flipping every `period` days.
pub fn patterned_series(fund: &str, count: usize, drift: f64, amp: f64, period: usize) -> FundSeries {
    let returns: Vec<f64> = pattern(count - 1, period, 0)
        .iter()
        .map(|x| drift + amp * x)
        .collect();
    series_from_returns(fund, &daily_dates(date(2023, 1, 2), count), 10.0, &returns)
}

/// Renders a series as a `date,nav` CSV body.
pub fn to_csv(series: &FundSeries) -> String {
    let mut out = String::from("date,nav\n");
    for p in series.points() {
        out.push_str(&format!(
            "{:04}-{:02}-{:02},{}\n",
            p.date.year(),
            p.date.month(),
            p.date.day(),
            p.price
        ));
    }
    out
}
