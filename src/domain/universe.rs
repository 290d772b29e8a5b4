//! Fund universe: identifier parsing and loading series from a store.

use crate::domain::error::FundfolioError;
use crate::domain::fund_series::FundSeries;
use crate::ports::price_store::PriceStore;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in fund list")]
    EmptyToken,

    #[error("duplicate fund: {0}")]
    DuplicateFund(String),
}

/// Parses a comma-separated fund list; rejects empty tokens and duplicates.
pub fn parse_funds(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut funds = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let fund = token.trim();
        if fund.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        if !seen.insert(fund.to_string()) {
            return Err(UniverseError::DuplicateFund(fund.to_string()));
        }
        funds.push(fund.to_string());
    }

    Ok(funds)
}

/// Drops repeated identifiers, keeping first-seen order.
pub fn dedup_funds<S: AsRef<str>>(funds: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    funds
        .iter()
        .map(|f| f.as_ref().trim())
        .filter(|f| !f.is_empty() && seen.insert(f.to_string()))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct LoadedUniverse {
    pub series: Vec<FundSeries>,
    /// Funds with no stored history.
    pub skipped: Vec<String>,
}

/// Loads every fund's history, skipping funds the store knows nothing about.
pub fn load_universe(
    store: &dyn PriceStore,
    funds: &[String],
) -> Result<LoadedUniverse, FundfolioError> {
    let mut series = Vec::with_capacity(funds.len());
    let mut skipped = Vec::new();

    for fund in dedup_funds(funds) {
        let s = store.load_series(&fund)?;
        if s.is_empty() {
            tracing::warn!(fund = %fund, "skipping fund with no stored history");
            skipped.push(fund);
            continue;
        }
        tracing::debug!(fund = %fund, observations = s.len(), "loaded history");
        series.push(s);
    }

    Ok(LoadedUniverse { series, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_funds_basic() {
        let result = parse_funds("000001,110022,519674").unwrap();
        assert_eq!(result, vec!["000001", "110022", "519674"]);
    }

    #[test]
    fn parse_funds_with_whitespace() {
        let result = parse_funds("  000001 , 110022 ,519674").unwrap();
        assert_eq!(result, vec!["000001", "110022", "519674"]);
    }

    #[test]
    fn parse_funds_keeps_case() {
        assert_eq!(parse_funds("abc,Def").unwrap(), vec!["abc", "Def"]);
    }

    #[test]
    fn parse_funds_empty_token() {
        let result = parse_funds("000001,,110022");
        assert!(matches!(result, Err(UniverseError::EmptyToken)));
    }

    #[test]
    fn parse_funds_duplicate() {
        let result = parse_funds("000001,110022,000001");
        assert!(matches!(result, Err(UniverseError::DuplicateFund(s)) if s == "000001"));
    }

    #[test]
    fn dedup_keeps_first_seen_order() {
        let funds = ["110022", "000001", "110022", " 000001 ", ""];
        assert_eq!(dedup_funds(&funds), vec!["110022", "000001"]);
    }
}
