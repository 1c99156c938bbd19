// Import module - broker CSV exports, category classification and rewrite rules

pub mod avanza_csv;
pub mod classify;
pub mod special_cases;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::db::TransactionKind;

pub use avanza_csv::{parse_avanza_bytes, parse_avanza_csv, parse_number};
pub use classify::classify;
pub use special_cases::SpecialCases;

/// One exported row, before classification
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub date: NaiveDate,
    pub account: String,
    pub category: String,
    pub asset_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub fee: Decimal, // Courtage
    pub currency: String,
    pub isin: String,
}

impl RawTransaction {
    /// Every column, so rows that differ only in amount stay distinct
    fn identity(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.date,
            self.account,
            self.category,
            self.asset_name,
            self.quantity.normalize(),
            self.unit_price.normalize(),
            self.total_amount.normalize(),
            self.fee.normalize(),
            self.currency,
            self.isin
        )
    }
}

/// A classified row ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedRow {
    pub raw: RawTransaction,
    pub kind: TransactionKind,
    /// BLAKE3 fingerprint used for insert-or-ignore de-duplication
    pub row_hash: String,
}

/// Rewrite, classify and fingerprint parsed rows.
///
/// Identical rows within one batch get distinct fingerprints by their
/// occurrence index, so a genuine repeat trade is kept while re-importing
/// the same export adds nothing.
pub fn prepare_rows(
    rows: Vec<RawTransaction>,
    rules: Option<&SpecialCases>,
) -> Result<Vec<ImportedRow>> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut prepared = Vec::with_capacity(rows.len());

    for row in rows {
        let row = match rules {
            Some(rules) => rules.apply(row),
            None => row,
        };
        let kind = classify(&row.category)?;

        let identity = row.identity();
        let occurrence = seen.entry(identity.clone()).or_insert(0);
        let row_hash = blake3::hash(format!("{}#{}", identity, occurrence).as_bytes())
            .to_hex()
            .to_string();
        *occurrence += 1;

        prepared.push(ImportedRow {
            raw: row,
            kind,
            row_hash,
        });
    }

    Ok(prepared)
}

/// Parse and prepare a broker export
pub fn import_file<P: AsRef<Path>>(
    file_path: P,
    rules: Option<&SpecialCases>,
) -> Result<Vec<ImportedRow>> {
    let path = file_path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    info!("Importing transactions from {:?}", path);

    match extension.as_str() {
        "csv" | "txt" => prepare_rows(parse_avanza_csv(path)?, rules),
        _ => Err(anyhow!(
            "Unsupported file format: {:?}. Supported formats: .csv, .txt",
            path
        )),
    }
}
