// Database module - SQLite connection, transaction log and derived ledger tables

pub mod models;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::importers::ImportedRow;
use crate::ledger::{Asset, AssetLot, LotLedger, MonthBucket};
use crate::reconcile::Committed;
use crate::reports::{PeriodStats, StatsReport};
pub use models::{DbStats, Transaction, TransactionKind};

/// Get the default database path (~/.lotledger/data.db)
pub fn get_default_db_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let data_dir = PathBuf::from(home).join(".lotledger");

    // Create directory if it doesn't exist
    std::fs::create_dir_all(&data_dir).context("Failed to create .lotledger directory")?;

    Ok(data_dir.join("data.db"))
}

/// Open database connection
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = match db_path {
        Some(p) => p,
        None => get_default_db_path()?,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {:?}", parent))?;
    }
    let conn =
        Connection::open(&path).with_context(|| format!("Failed to open database at {:?}", path))?;

    Ok(conn)
}

/// Create tables and indexes if they do not exist
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(include_str!("schema.sql"))
        .context("Failed to execute schema")
}

/// Initialize the database with schema
pub fn init_database(db_path: Option<PathBuf>) -> Result<Connection> {
    let conn = open_db(db_path)?;
    ensure_schema(&conn)?;
    debug!("Database schema ready");
    Ok(conn)
}

/// Helper to read Decimal from SQLite (handles TEXT, INTEGER and REAL)
pub fn get_decimal_value(row: &rusqlite::Row, idx: usize) -> Result<Decimal, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    match row.get_ref(idx)? {
        ValueRef::Text(bytes) => {
            let s = std::str::from_utf8(bytes)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))?;
            Decimal::from_str(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
            })
        }
        ValueRef::Integer(i) => Ok(Decimal::from(i)),
        ValueRef::Real(f) => Decimal::try_from(f).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Real, Box::new(e))
        }),
        _ => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "decimal".to_string(),
            rusqlite::types::Type::Null,
        )),
    }
}

/// Helper to read optional Decimal from SQLite
fn get_optional_decimal_value(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<Option<Decimal>, rusqlite::Error> {
    match row.get_ref(idx)? {
        rusqlite::types::ValueRef::Null => Ok(None),
        _ => get_decimal_value(row, idx).map(Some),
    }
}

/// Insert a transaction unless a row with the same fingerprint exists.
///
/// Returns true when the row was added.
pub fn insert_transaction(conn: &Connection, row: &ImportedRow) -> Result<bool> {
    let raw = &row.raw;
    let changed = conn
        .execute(
            "INSERT OR IGNORE INTO transactions (
                date, account, kind, category, asset_name,
                quantity, unit_price, total_amount, fee,
                currency, isin, row_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                raw.date,
                raw.account,
                row.kind.as_str(),
                raw.category,
                raw.asset_name,
                raw.quantity.to_string(),
                raw.unit_price.to_string(),
                raw.total_amount.to_string(),
                raw.fee.to_string(),
                raw.currency,
                raw.isin,
                row.row_hash,
            ],
        )
        .context("Failed to insert transaction")?;

    Ok(changed == 1)
}

/// Row as stored; the kind is validated after the query
struct StoredTransaction {
    kind: String,
    tx: Transaction,
}

impl StoredTransaction {
    fn into_transaction(self) -> Result<Transaction, ReconcileError> {
        let kind = self
            .kind
            .parse::<TransactionKind>()
            .map_err(|_| ReconcileError::UnknownTransactionKind {
                category: self.kind.clone(),
            })?;
        Ok(Transaction { kind, ..self.tx })
    }
}

fn query_transactions(conn: &Connection, sql: &str) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(sql)?;

    let stored = stmt
        .query_map([], |row| {
            Ok(StoredTransaction {
                kind: row.get(3)?,
                tx: Transaction {
                    id: row.get(0)?,
                    date: row.get(1)?,
                    account: row.get(2)?,
                    // Replaced by the parsed kind in into_transaction
                    kind: TransactionKind::Deposit,
                    category: row.get(4)?,
                    asset_name: row.get(5)?,
                    quantity: get_decimal_value(row, 6)?,
                    unit_price: get_decimal_value(row, 7)?,
                    total_amount: get_decimal_value(row, 8)?,
                    fee: get_decimal_value(row, 9)?,
                    currency: row.get(10)?,
                    isin: row.get(11)?,
                    processed: row.get::<_, i64>(12)? != 0,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read transactions")?;

    stored
        .into_iter()
        .map(|s| s.into_transaction().map_err(anyhow::Error::new))
        .collect()
}

const TRANSACTION_COLUMNS: &str = "id, date, account, kind, category, asset_name,
    quantity, unit_price, total_amount, fee, currency, isin, processed";

/// Unprocessed transactions in reconciliation order
pub fn get_unprocessed_transactions(conn: &Connection) -> Result<Vec<Transaction>> {
    query_transactions(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE processed = 0 ORDER BY date ASC, id ASC",
            TRANSACTION_COLUMNS
        ),
    )
}

fn read_asset(row: &rusqlite::Row) -> Result<Asset, rusqlite::Error> {
    Ok(Asset {
        name: row.get(0)?,
        total_amount: get_decimal_value(row, 1)?,
        purchased_amount: get_decimal_value(row, 2)?,
        sold_amount: get_decimal_value(row, 3)?,
        average_price: get_decimal_value(row, 4)?,
        average_purchase_price: get_decimal_value(row, 5)?,
        average_sale_price: get_decimal_value(row, 6)?,
        latest_price: get_optional_decimal_value(row, 7)?,
        latest_price_date: row.get(8)?,
    })
}

const ASSET_COLUMNS: &str = "name, total_amount, purchased_amount, sold_amount,
    average_price, average_purchase_price, average_sale_price, latest_price, latest_price_date";

/// All asset aggregates ordered by name
pub fn get_assets(conn: &Connection) -> Result<Vec<Asset>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM assets ORDER BY name", ASSET_COLUMNS))?;
    let assets = stmt
        .query_map([], read_asset)?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read assets")?;
    Ok(assets)
}

pub fn get_asset(conn: &Connection, name: &str) -> Result<Option<Asset>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM assets WHERE name = ?1", ASSET_COLUMNS))?;
    let asset = stmt.query_row([name], read_asset).optional()?;
    Ok(asset)
}

/// Load the committed ledger from the derived tables
pub fn load_ledger(conn: &Connection) -> Result<LotLedger> {
    let mut ledger = LotLedger::new();

    let mut stmt =
        conn.prepare("SELECT month, deposit, withdrawal, capital FROM month_data ORDER BY month")?;
    let buckets = stmt
        .query_map([], |row| {
            Ok(MonthBucket {
                month: row.get(0)?,
                deposit: get_decimal_value(row, 1)?,
                withdrawal: get_decimal_value(row, 2)?,
                capital: get_decimal_value(row, 3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read month data")?;
    for bucket in buckets {
        ledger.insert_bucket(bucket);
    }

    let mut stmt = conn.prepare(
        "SELECT month, asset, amount, purchased_amount, sold_amount,
                average_price, average_purchase_price, average_sale_price
         FROM month_assets ORDER BY asset, month",
    )?;
    let lots = stmt
        .query_map([], |row| {
            Ok(AssetLot {
                month: row.get(0)?,
                asset: row.get(1)?,
                amount: get_decimal_value(row, 2)?,
                purchased_amount: get_decimal_value(row, 3)?,
                sold_amount: get_decimal_value(row, 4)?,
                average_price: get_decimal_value(row, 5)?,
                average_purchase_price: get_decimal_value(row, 6)?,
                average_sale_price: get_decimal_value(row, 7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read month assets")?;
    for lot in lots {
        ledger.insert_lot(lot);
    }

    for asset in get_assets(conn)? {
        ledger.insert_asset(asset);
    }

    Ok(ledger)
}

fn write_ledger(tx: &rusqlite::Transaction, ledger: &LotLedger) -> Result<()> {
    tx.execute("DELETE FROM month_assets", [])?;
    tx.execute("DELETE FROM month_data", [])?;
    tx.execute("DELETE FROM assets", [])?;

    for bucket in ledger.buckets() {
        tx.execute(
            "INSERT INTO month_data (month, deposit, withdrawal, capital) VALUES (?1, ?2, ?3, ?4)",
            params![
                bucket.month,
                bucket.deposit.to_string(),
                bucket.withdrawal.to_string(),
                bucket.capital.to_string(),
            ],
        )?;
    }

    for lot in ledger.all_lots() {
        tx.execute(
            "INSERT INTO month_assets (
                month, asset, amount, purchased_amount, sold_amount,
                average_price, average_purchase_price, average_sale_price
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                lot.month,
                lot.asset,
                lot.amount.to_string(),
                lot.purchased_amount.to_string(),
                lot.sold_amount.to_string(),
                lot.average_price.to_string(),
                lot.average_purchase_price.to_string(),
                lot.average_sale_price.to_string(),
            ],
        )?;
    }

    for asset in ledger.assets() {
        tx.execute(
            "INSERT INTO assets (
                name, total_amount, purchased_amount, sold_amount,
                average_price, average_purchase_price, average_sale_price,
                latest_price, latest_price_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                asset.name,
                asset.total_amount.to_string(),
                asset.purchased_amount.to_string(),
                asset.sold_amount.to_string(),
                asset.average_price.to_string(),
                asset.average_purchase_price.to_string(),
                asset.average_sale_price.to_string(),
                asset.latest_price.map(|p| p.to_string()),
                asset.latest_price_date,
            ],
        )?;
    }

    Ok(())
}

/// Write a reconciled ledger and flag its transactions processed, atomically
pub fn commit_reconciliation(conn: &mut Connection, committed: &Committed) -> Result<()> {
    let tx = conn
        .transaction()
        .context("Failed to start reconciliation transaction")?;

    write_ledger(&tx, &committed.ledger).context("Failed to write ledger")?;

    {
        let mut mark = tx.prepare("UPDATE transactions SET processed = 1 WHERE id = ?1")?;
        for id in &committed.processed {
            mark.execute([id])?;
        }
    }

    tx.commit().context("Failed to commit reconciliation")?;
    info!(
        "Committed {} processed transactions",
        committed.processed.len()
    );
    Ok(())
}

/// Clear every derived table and unmark all transactions.
///
/// Latest prices are kept on zeroed asset rows so a reset followed by a
/// full reprocess values the portfolio the same way.
pub fn reset_derived_state(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM month_assets", [])?;
    tx.execute("DELETE FROM month_data", [])?;
    tx.execute("DELETE FROM month_stats", [])?;
    tx.execute("DELETE FROM year_stats", [])?;
    tx.execute(
        "UPDATE assets SET total_amount = '0', purchased_amount = '0', sold_amount = '0',
            average_price = '0', average_purchase_price = '0', average_sale_price = '0'",
        [],
    )?;
    let unmarked = tx.execute("UPDATE transactions SET processed = 0", [])?;
    tx.commit().context("Failed to reset derived state")?;

    info!("Reset derived state, {} transactions unmarked", unmarked);
    Ok(())
}

pub fn update_asset_price(
    conn: &Connection,
    name: &str,
    price: Decimal,
    date: NaiveDate,
) -> Result<()> {
    conn.execute(
        "UPDATE assets SET latest_price = ?1, latest_price_date = ?2 WHERE name = ?3",
        params![price.to_string(), date, name],
    )
    .with_context(|| format!("Failed to store price for {}", name))?;
    Ok(())
}

const STATS_COLUMNS: &str = "date, deposit, withdrawal, capital, value,
    total_gainloss, realized_gainloss, unrealized_gainloss,
    total_gainloss_per, realized_gainloss_per, unrealized_gainloss_per,
    annual_per_yield, acc_deposit, acc_value, acc_withdrawal, acc_net_deposit,
    acc_total_gainloss, acc_realized_gainloss, acc_unrealized_gainloss";

fn insert_stats_rows(tx: &rusqlite::Transaction, table: &str, rows: &[PeriodStats]) -> Result<()> {
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        table, STATS_COLUMNS
    ))?;

    for row in rows {
        stmt.execute(params![
            row.date,
            row.deposit.to_string(),
            row.withdrawal.to_string(),
            row.capital.to_string(),
            row.value.to_string(),
            row.total_gainloss.to_string(),
            row.realized_gainloss.to_string(),
            row.unrealized_gainloss.to_string(),
            row.total_gainloss_per.to_string(),
            row.realized_gainloss_per.to_string(),
            row.unrealized_gainloss_per.to_string(),
            row.annual_per_yield.map(|y| y.to_string()),
            row.acc_deposit.to_string(),
            row.acc_value.to_string(),
            row.acc_withdrawal.to_string(),
            row.acc_net_deposit.to_string(),
            row.acc_total_gainloss.to_string(),
            row.acc_realized_gainloss.to_string(),
            row.acc_unrealized_gainloss.to_string(),
        ])?;
    }
    Ok(())
}

/// Replace the stored month and year statistics
pub fn save_stats(conn: &mut Connection, report: &StatsReport) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM month_stats", [])?;
    tx.execute("DELETE FROM year_stats", [])?;
    insert_stats_rows(&tx, "month_stats", &report.months)?;
    insert_stats_rows(&tx, "year_stats", &report.years)?;
    tx.commit().context("Failed to save statistics")?;
    Ok(())
}

fn load_stats_rows(conn: &Connection, table: &str) -> Result<Vec<PeriodStats>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} ORDER BY id",
        STATS_COLUMNS, table
    ))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(PeriodStats {
                date: row.get(0)?,
                deposit: get_decimal_value(row, 1)?,
                withdrawal: get_decimal_value(row, 2)?,
                capital: get_decimal_value(row, 3)?,
                value: get_decimal_value(row, 4)?,
                total_gainloss: get_decimal_value(row, 5)?,
                realized_gainloss: get_decimal_value(row, 6)?,
                unrealized_gainloss: get_decimal_value(row, 7)?,
                total_gainloss_per: get_decimal_value(row, 8)?,
                realized_gainloss_per: get_decimal_value(row, 9)?,
                unrealized_gainloss_per: get_decimal_value(row, 10)?,
                annual_per_yield: get_optional_decimal_value(row, 11)?,
                acc_deposit: get_decimal_value(row, 12)?,
                acc_value: get_decimal_value(row, 13)?,
                acc_withdrawal: get_decimal_value(row, 14)?,
                acc_net_deposit: get_decimal_value(row, 15)?,
                acc_total_gainloss: get_decimal_value(row, 16)?,
                acc_realized_gainloss: get_decimal_value(row, 17)?,
                acc_unrealized_gainloss: get_decimal_value(row, 18)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read {}", table))?;

    Ok(rows)
}

pub fn load_stats(conn: &Connection) -> Result<StatsReport> {
    Ok(StatsReport {
        months: load_stats_rows(conn, "month_stats")?,
        years: load_stats_rows(conn, "year_stats")?,
    })
}

/// Counters shown by the status command
pub fn get_db_stats(conn: &Connection) -> Result<DbStats> {
    let count = |sql: &str| -> Result<i64> {
        conn.query_row(sql, [], |row| row.get(0))
            .with_context(|| format!("Failed to run '{}'", sql))
    };

    let transactions = count("SELECT COUNT(*) FROM transactions")?;
    let unprocessed = count("SELECT COUNT(*) FROM transactions WHERE processed = 0")?;
    let assets = count("SELECT COUNT(*) FROM assets")?;
    let tables = count(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;

    let mut stmt = conn.prepare("SELECT capital FROM month_data")?;
    let capital = stmt
        .query_map([], |row| get_decimal_value(row, 0))?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .sum();

    Ok(DbStats {
        transactions,
        unprocessed,
        processed: transactions - unprocessed,
        assets,
        capital,
        tables,
    })
}
