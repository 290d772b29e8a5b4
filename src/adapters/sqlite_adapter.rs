//! SQLite price history store.

use crate::domain::error::FundfolioError;
use crate::domain::fund_series::{FundSeries, PricePoint};
use crate::ports::config_port::ConfigPort;
use crate::ports::price_store::{DataRange, PriceStore};
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn query_err(e: rusqlite::Error) -> FundfolioError {
    FundfolioError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, FundfolioError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e: chrono::ParseError| {
        FundfolioError::Database {
            reason: format!("bad stored date '{s}': {e}"),
        }
    })
}

impl SqliteAdapter {
    /// Opens the store named by `[store] path`, with `--store` taking precedence.
    pub fn from_config(
        config: &dyn ConfigPort,
        path_override: Option<&Path>,
    ) -> Result<Self, FundfolioError> {
        let db_path = match path_override {
            Some(p) => p.display().to_string(),
            None => config
                .get_string("store", "path")
                .ok_or_else(|| FundfolioError::ConfigMissing {
                    section: "store".into(),
                    key: "path".into(),
                })?,
        };
        let pool_size = config.get_int("store", "pool_size", 4).max(1) as u32;
        Self::open(&db_path, pool_size)
    }

    pub fn open(db_path: &str, pool_size: u32) -> Result<Self, FundfolioError> {
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| FundfolioError::Database {
                reason: e.to_string(),
            })?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    pub fn in_memory() -> Result<Self, FundfolioError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| FundfolioError::Database {
                reason: e.to_string(),
            })?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, FundfolioError> {
        self.pool.get().map_err(|e: r2d2::Error| FundfolioError::Database {
            reason: e.to_string(),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), FundfolioError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS fund_history (
                    fid TEXT NOT NULL,
                    date TEXT NOT NULL,
                    nav REAL NOT NULL,
                    PRIMARY KEY (fid, date)
                );
                CREATE INDEX IF NOT EXISTS idx_fund_history_date ON fund_history(date);",
            )
            .map_err(query_err)
    }
}

impl PriceStore for SqliteAdapter {
    fn load_series(&self, fund: &str) -> Result<FundSeries, FundfolioError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT date, nav FROM fund_history WHERE fid = ?1 ORDER BY date ASC")
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![fund], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })
            .map_err(query_err)?;

        let mut points = Vec::new();
        for row in rows {
            let (date, nav) = row.map_err(query_err)?;
            points.push(PricePoint::new(parse_date(&date)?, nav));
        }
        FundSeries::new(fund, points)
    }

    fn append_points(&self, fund: &str, points: &[PricePoint]) -> Result<usize, FundfolioError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let mut inserted = 0;
        for point in points {
            inserted += tx
                .execute(
                    "INSERT OR IGNORE INTO fund_history (fid, date, nav) VALUES (?1, ?2, ?3)",
                    params![fund, point.date.format(DATE_FORMAT).to_string(), point.price],
                )
                .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)?;
        Ok(inserted)
    }

    fn latest_price(&self, fund: &str) -> Result<Option<PricePoint>, FundfolioError> {
        let row: Option<(String, f64)> = self
            .conn()?
            .query_row(
                "SELECT date, nav FROM fund_history WHERE fid = ?1 ORDER BY date DESC LIMIT 1",
                params![fund],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(query_err)?;
        match row {
            Some((date, nav)) => Ok(Some(PricePoint::new(parse_date(&date)?, nav))),
            None => Ok(None),
        }
    }

    fn data_range(&self, fund: &str) -> Result<Option<DataRange>, FundfolioError> {
        let result: (Option<String>, Option<String>, i64) = self
            .conn()?
            .query_row(
                "SELECT MIN(date), MAX(date), COUNT(*) FROM fund_history WHERE fid = ?1",
                params![fund],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;

        match result {
            (Some(first), Some(last), count) if count > 0 => Ok(Some(DataRange {
                first: parse_date(&first)?,
                last: parse_date(&last)?,
                count: count as usize,
            })),
            _ => Ok(None),
        }
    }

    fn list_funds(&self) -> Result<Vec<String>, FundfolioError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT fid FROM fund_history ORDER BY fid")
            .map_err(query_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(query_err)?;
        let mut funds = Vec::new();
        for row in rows {
            funds.push(row.map_err(query_err)?);
        }
        Ok(funds)
    }
}
