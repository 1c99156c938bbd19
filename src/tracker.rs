//! Tracker - the store-backed facade used by the CLI
//!
//! Ties ingestion, reconciliation, price refresh and statistics to one
//! SQLite database.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::db::{self, DbStats};
use crate::error::ReconcileError;
use crate::importers::{self, ImportedRow, SpecialCases};
use crate::pricing::{self, PriceRefreshReport, PriceSource};
use crate::reconcile::Reconciler;
use crate::reports::{self, AccumulatedPoint, Period, PeriodStats, Scope, StatsReport};

/// Result of a successful reconciliation run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReconcileSummary {
    pub applied: usize,
    pub passes: usize,
    pub remaining_capital: Decimal,
}

pub struct Tracker {
    conn: Connection,
    config: Config,
    rules: Option<SpecialCases>,
    reconciler: Reconciler,
}

impl Tracker {
    /// Open (and create if needed) the database named by `config`
    pub fn open(config: Config) -> Result<Self> {
        let conn = db::init_database(config.database.clone())?;
        Self::with_connection(conn, config)
    }

    /// Open a database at an explicit path
    pub fn open_at(path: PathBuf, config: Config) -> Result<Self> {
        let conn = db::init_database(Some(path))?;
        Self::with_connection(conn, config)
    }

    fn with_connection(conn: Connection, config: Config) -> Result<Self> {
        let rules = match &config.special_cases {
            Some(path) => Some(SpecialCases::load(path)?),
            None => None,
        };
        let reconciler = Reconciler::from_config(&config);
        Ok(Self {
            conn,
            config,
            rules,
            reconciler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Parse, rewrite and classify an export without storing it
    pub fn preview_file(&self, path: &Path) -> Result<Vec<ImportedRow>> {
        importers::import_file(path, self.rules.as_ref())
    }

    /// Store prepared rows; returns how many were new
    pub fn ingest(&mut self, rows: &[ImportedRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut added = 0;
        for row in rows {
            if db::insert_transaction(&tx, row)? {
                added += 1;
            }
        }
        tx.commit().context("Failed to commit imported transactions")?;

        info!(
            "Imported {} new transactions ({} already present)",
            added,
            rows.len() - added
        );
        Ok(added)
    }

    pub fn ingest_file(&mut self, path: &Path) -> Result<usize> {
        let rows = self.preview_file(path)?;
        self.ingest(&rows)
    }

    /// Reconcile every unprocessed transaction as one batch.
    ///
    /// On any error nothing is written.
    pub fn reconcile(&mut self) -> Result<ReconcileSummary, ReconcileError> {
        let transactions =
            db::get_unprocessed_transactions(&self.conn).map_err(ReconcileError::from_store)?;
        if transactions.is_empty() {
            debug!("No unprocessed transactions");
        }
        let ledger = db::load_ledger(&self.conn).map_err(ReconcileError::Store)?;

        let committed = self.reconciler.reconcile(&ledger, &transactions)?;
        db::commit_reconciliation(&mut self.conn, &committed).map_err(ReconcileError::Store)?;

        Ok(ReconcileSummary {
            applied: committed.processed.len(),
            passes: committed.passes,
            remaining_capital: committed.ledger.total_capital(),
        })
    }

    pub fn reset_derived_state(&mut self) -> Result<()> {
        db::reset_derived_state(&mut self.conn)
    }

    pub async fn update_prices(
        &self,
        source: &dyn PriceSource,
        force: bool,
        today: NaiveDate,
    ) -> Result<PriceRefreshReport> {
        pricing::refresh_prices(&self.conn, source, &self.config.prices, force, today).await
    }

    /// Recompute and store month and year statistics from the committed ledger
    pub fn calculate_stats(&mut self, today: NaiveDate) -> Result<StatsReport> {
        let ledger = db::load_ledger(&self.conn)?;
        let report = reports::calculate_stats(&ledger, today, self.config.tolerances.lot_dust);
        db::save_stats(&mut self.conn, &report)?;
        info!(
            "Stored statistics for {} months and {} years",
            report.months.len(),
            report.years.len()
        );
        Ok(report)
    }

    pub fn get_stats(&self, period: Period, scope: Scope) -> Result<Vec<PeriodStats>> {
        let report = db::load_stats(&self.conn)?;
        Ok(report.stats(period, scope).into_iter().cloned().collect())
    }

    pub fn get_accumulated(&self, period: Period, scope: Scope) -> Result<Vec<AccumulatedPoint>> {
        Ok(db::load_stats(&self.conn)?.accumulated(period, scope))
    }

    pub fn db_stats(&self) -> Result<DbStats> {
        db::get_db_stats(&self.conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importers::{prepare_rows, RawTransaction};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn row(day: u32, category: &str, asset: &str, qty: Decimal, price: Decimal, total: Decimal) -> RawTransaction {
        RawTransaction {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            account: "ISK".to_string(),
            category: category.to_string(),
            asset_name: asset.to_string(),
            quantity: qty,
            unit_price: price,
            total_amount: total,
            fee: Decimal::ZERO,
            currency: "SEK".to_string(),
            isin: String::new(),
        }
    }

    fn tracker() -> (TempDir, Tracker) {
        let dir = TempDir::new().unwrap();
        let tracker = Tracker::open_at(dir.path().join("t.db"), Config::default()).unwrap();
        (dir, tracker)
    }

    #[test]
    fn test_reconcile_commits_and_marks_processed() {
        let (_dir, mut tracker) = tracker();
        let rows = prepare_rows(
            vec![
                row(15, "Insättning", "", dec!(0), dec!(0), dec!(1000)),
                row(20, "Köp", "ABB", dec!(2), dec!(300), dec!(-600)),
            ],
            None,
        )
        .unwrap();
        assert_eq!(tracker.ingest(&rows).unwrap(), 2);

        let summary = tracker.reconcile().unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.remaining_capital, dec!(400));

        let stats = tracker.db_stats().unwrap();
        assert_eq!(stats.unprocessed, 0);
        assert_eq!(stats.capital, dec!(400));

        // Nothing pending: a second run is a no-op
        assert_eq!(tracker.reconcile().unwrap().applied, 0);
        assert_eq!(tracker.db_stats().unwrap().capital, dec!(400));
    }

    #[test]
    fn test_deficit_writes_nothing() {
        let (_dir, mut tracker) = tracker();
        let rows = prepare_rows(
            vec![row(20, "Uttag", "", dec!(0), dec!(0), dec!(-50))],
            None,
        )
        .unwrap();
        tracker.ingest(&rows).unwrap();

        let err = tracker.reconcile().unwrap_err();
        assert!(err.is_recoverable());
        let stats = tracker.db_stats().unwrap();
        assert_eq!(stats.unprocessed, 1);
        assert_eq!(stats.capital, dec!(0));
    }
}
