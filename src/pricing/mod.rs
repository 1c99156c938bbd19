// Pricing module - latest price refresh for held assets

pub mod avanza;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PriceConfig;
use crate::db;
use crate::error::PriceLookupError;
use crate::ledger::Asset;

pub use avanza::AvanzaPriceSource;

/// Something that can quote the latest price of an asset by name
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn lookup(&self, asset: &str) -> Result<Decimal, PriceLookupError>;
}

/// Outcome of one refresh run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PriceRefreshReport {
    pub updated: Vec<(String, Decimal)>,
    pub failed: Vec<(String, String)>,
    /// True when prices were fresh enough and nothing was fetched
    pub skipped: bool,
}

fn held(assets: &[Asset]) -> impl Iterator<Item = &Asset> {
    assets.iter().filter(|a| a.total_amount > Decimal::ZERO)
}

/// Oldest price date among held assets; `None` if any of them was never priced
pub fn oldest_price_date(assets: &[Asset]) -> Option<NaiveDate> {
    held(assets)
        .map(|a| a.latest_price_date)
        .collect::<Option<Vec<_>>>()
        .and_then(|dates| dates.into_iter().min())
}

/// Prices are fresh when every held asset was priced within `max_age_days`
pub fn prices_are_fresh(assets: &[Asset], today: NaiveDate, max_age_days: i64) -> bool {
    match oldest_price_date(assets) {
        Some(oldest) => oldest >= today - Duration::days(max_age_days),
        None => false,
    }
}

/// Fetch and store the latest price of every held asset.
///
/// Lookups run one at a time with `request_delay_ms` between them. A failed
/// lookup is logged and reported; it never stops the others.
pub async fn refresh_prices(
    conn: &Connection,
    source: &dyn PriceSource,
    config: &PriceConfig,
    force: bool,
    today: NaiveDate,
) -> Result<PriceRefreshReport> {
    let assets = db::get_assets(conn)?;
    let mut report = PriceRefreshReport::default();

    if !force && prices_are_fresh(&assets, today, config.max_age_days) {
        debug!(
            "Prices are up to date (oldest {:?})",
            oldest_price_date(&assets)
        );
        report.skipped = true;
        return Ok(report);
    }

    let targets: Vec<&Asset> = held(&assets).collect();
    info!(
        "Refreshing prices for {} assets from {}",
        targets.len(),
        source.name()
    );

    for (idx, asset) in targets.iter().enumerate() {
        if idx > 0 && config.request_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(config.request_delay_ms)).await;
        }

        match source.lookup(&asset.name).await {
            Ok(price) => {
                db::update_asset_price(conn, &asset.name, price, today)?;
                debug!("{} = {}", asset.name, price);
                report.updated.push((asset.name.clone(), price));
            }
            Err(e) => {
                warn!("Price lookup failed for {}: {}", asset.name, e);
                report.failed.push((asset.name.clone(), e.to_string()));
            }
        }
    }

    info!(
        "Price refresh done: {} updated, {} failed",
        report.updated.len(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeSource {
        prices: HashMap<String, Decimal>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new(prices: &[(&str, Decimal)]) -> Self {
            Self {
                prices: prices.iter().map(|(n, p)| (n.to_string(), *p)).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PriceSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn lookup(&self, asset: &str) -> Result<Decimal, PriceLookupError> {
            self.calls.lock().unwrap().push(asset.to_string());
            self.prices
                .get(asset)
                .copied()
                .ok_or_else(|| PriceLookupError::NotFound(asset.to_string()))
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::TempDir::new().unwrap();
        let conn = db::init_database(Some(dir.path().join("prices.db"))).unwrap();
        for (name, amount) in [("ABB", "10"), ("Volvo B", "5"), ("Sold Out", "0")] {
            conn.execute(
                "INSERT INTO assets (name, total_amount) VALUES (?1, ?2)",
                [name, amount],
            )
            .unwrap();
        }
        (dir, conn)
    }

    fn config() -> PriceConfig {
        PriceConfig {
            request_delay_ms: 0,
            ..PriceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_refresh_updates_held_assets_and_reports_failures() {
        let (_dir, conn) = test_db();
        let source = FakeSource::new(&[("ABB", dec!(312.4))]);
        let today = date(2024, 6, 3);

        let report = refresh_prices(&conn, &source, &config(), false, today)
            .await
            .unwrap();

        assert!(!report.skipped);
        assert_eq!(report.updated, vec![("ABB".to_string(), dec!(312.4))]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Volvo B");
        // Assets with nothing held are not looked up
        assert!(!source.calls.lock().unwrap().contains(&"Sold Out".to_string()));

        let abb = db::get_asset(&conn, "ABB").unwrap().unwrap();
        assert_eq!(abb.latest_price, Some(dec!(312.4)));
        assert_eq!(abb.latest_price_date, Some(today));
    }

    #[tokio::test]
    async fn test_fresh_prices_skip_unless_forced() {
        let (_dir, conn) = test_db();
        let today = date(2024, 6, 3);
        db::update_asset_price(&conn, "ABB", dec!(300), date(2024, 6, 2)).unwrap();
        db::update_asset_price(&conn, "Volvo B", dec!(200), today).unwrap();
        let source = FakeSource::new(&[("ABB", dec!(310)), ("Volvo B", dec!(210))]);

        let report = refresh_prices(&conn, &source, &config(), false, today)
            .await
            .unwrap();
        assert!(report.skipped);
        assert!(source.calls.lock().unwrap().is_empty());

        let forced = refresh_prices(&conn, &source, &config(), true, today)
            .await
            .unwrap();
        assert_eq!(forced.updated.len(), 2);
    }

    #[test]
    fn test_never_priced_asset_is_stale() {
        let mut priced = Asset::new("A");
        priced.total_amount = dec!(1);
        priced.latest_price_date = Some(date(2024, 6, 3));
        let mut unpriced = Asset::new("B");
        unpriced.total_amount = dec!(1);

        let today = date(2024, 6, 3);
        assert!(prices_are_fresh(&[priced.clone()], today, 1));
        assert!(!prices_are_fresh(&[priced.clone(), unpriced], today, 1));
        assert!(!prices_are_fresh(&[priced], date(2024, 6, 10), 1));
    }
}
