//! CSV directory fund source: one `<fund>.csv` file per fund with a
//! `date,nav` header. Rows may come in any order; a repeated date keeps the
//! later row.

use crate::domain::error::FundfolioError;
use crate::domain::fund_series::{FundSeries, PricePoint};
use crate::ports::fund_source::FundSource;
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, fund: &str) -> PathBuf {
        self.base_path.join(format!("{fund}.csv"))
    }
}

impl FundSource for CsvAdapter {
    fn fetch_history(
        &self,
        fund: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<PricePoint>, FundfolioError> {
        let source_err = |reason: String| FundfolioError::Source {
            fund: fund.to_string(),
            reason,
        };

        let path = self.csv_path(fund);
        let content = fs::read_to_string(&path)
            .map_err(|e| source_err(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut points = Vec::new();

        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| source_err(format!("CSV parse error: {e}")))?;

            let date_str = record
                .get(0)
                .ok_or_else(|| source_err(format!("row {}: missing date column", line + 1)))?;
            let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
                .map_err(|e| source_err(format!("row {}: invalid date '{date_str}': {e}", line + 1)))?;

            if since.is_some_and(|s| date <= s) {
                continue;
            }

            let nav: f64 = record
                .get(1)
                .ok_or_else(|| source_err(format!("row {}: missing nav column", line + 1)))?
                .trim()
                .parse()
                .map_err(|e| source_err(format!("row {}: invalid nav value: {e}", line + 1)))?;

            points.push(PricePoint::new(date, nav));
        }

        Ok(FundSeries::from_unordered(fund, points).points().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        fs::write(
            path.join("000001.csv"),
            "date,nav\n2024-01-17,1.0150\n2024-01-15,1.0000\n2024-01-16,1.0100\n2024-01-17,1.0160\n",
        )
        .unwrap();
        fs::write(path.join("110022.csv"), "date,nav\n").unwrap();
        fs::write(path.join("BROKEN.csv"), "date,nav\n2024-01-15,abc\n").unwrap();

        (dir, path)
    }

    #[test]
    fn fetch_history_returns_sorted_points() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let points = adapter.fetch_history("000001", None).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(points[2].price, 1.016);
    }

    #[test]
    fn fetch_history_skips_dates_up_to_since() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let since = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let points = adapter.fetch_history("000001", Some(since)).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2024, 1, 17).unwrap());
    }

    #[test]
    fn fetch_history_empty_file() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert!(adapter.fetch_history("110022", None).unwrap().is_empty());
    }

    #[test]
    fn fetch_history_errors() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let missing = adapter.fetch_history("XYZ", None).unwrap_err();
        assert!(matches!(missing, FundfolioError::Source { ref fund, .. } if fund == "XYZ"));

        let broken = adapter.fetch_history("BROKEN", None).unwrap_err();
        assert!(matches!(broken, FundfolioError::Source { .. }));
    }
}
