use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use encoding_rs::ISO_8859_15;
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::RawTransaction;

const MIN_COLUMNS: usize = 10;

/// Parse an Avanza transaction export
pub fn parse_avanza_csv<P: AsRef<Path>>(file_path: P) -> Result<Vec<RawTransaction>> {
    let path = file_path.as_ref();
    info!("Parsing Avanza CSV file: {:?}", path);

    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let transactions = parse_avanza_bytes(&bytes)?;

    info!(
        "Successfully parsed {} transactions from CSV",
        transactions.len()
    );
    Ok(transactions)
}

/// Exports are UTF-8 (optionally with BOM); older ones are Latin-9
fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("CSV is not valid UTF-8, decoding as ISO-8859-15");
            let (text, _, _) = ISO_8859_15.decode(bytes);
            text.into_owned()
        }
    }
}

pub fn parse_avanza_bytes(bytes: &[u8]) -> Result<Vec<RawTransaction>> {
    let text = decode(bytes);

    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true) // Newer exports append extra columns
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .context("Failed to read CSV headers")?
        .clone();
    debug!("CSV headers: {:?}", headers);

    let mut transactions = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let row_num = idx + 2;
        let record = result.with_context(|| format!("Failed to read CSV record {}", row_num))?;

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let transaction =
            parse_row(&record).with_context(|| format!("Invalid transaction at row {}", row_num))?;
        transactions.push(transaction);
    }

    Ok(transactions)
}

fn parse_row(record: &csv::StringRecord) -> Result<RawTransaction> {
    if record.len() < MIN_COLUMNS {
        return Err(anyhow!(
            "Expected at least {} columns, found {}",
            MIN_COLUMNS,
            record.len()
        ));
    }

    let field = |idx: usize| record.get(idx).unwrap_or("").trim();

    let date = NaiveDate::parse_from_str(field(0), "%Y-%m-%d")
        .with_context(|| format!("Could not parse date: {}", field(0)))?;

    Ok(RawTransaction {
        date,
        account: field(1).to_string(),
        category: field(2).to_string(),
        asset_name: field(3).to_string(),
        quantity: parse_number(field(4))?,
        unit_price: parse_number(field(5))?,
        total_amount: parse_number(field(6))?,
        fee: parse_number(field(7))?,
        currency: field(8).to_string(),
        isin: field(9).to_string(),
    })
}

/// Parse a Swedish formatted number: decimal comma, `-` for zero,
/// spaces or non-breaking spaces as thousands separators
pub fn parse_number(text: &str) -> Result<Decimal> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return Ok(Decimal::ZERO);
    }

    let cleaned: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .with_context(|| format!("Failed to parse number '{}'", text))
}
