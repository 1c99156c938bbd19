use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Transaction kinds understood by the reconciliation engine.
///
/// Raw broker category text is mapped onto this closed set by
/// [`crate::importers::classify`] at ingestion time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Purchase,
    Sale,
    Dividend,
    Interest,
    Fee,          // Fees, withholding and preliminary tax
    AssetDeposit, // In-kind transfer of securities into the account
    ListingChange,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdrawal => "WITHDRAWAL",
            TransactionKind::Purchase => "BUY",
            TransactionKind::Sale => "SELL",
            TransactionKind::Dividend => "DIVIDEND",
            TransactionKind::Interest => "INTEREST",
            TransactionKind::Fee => "FEE",
            TransactionKind::AssetDeposit => "ASSET_DEPOSIT",
            TransactionKind::ListingChange => "LISTING_CHANGE",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEPOSIT" => Ok(TransactionKind::Deposit),
            "WITHDRAWAL" => Ok(TransactionKind::Withdrawal),
            "BUY" | "PURCHASE" => Ok(TransactionKind::Purchase),
            "SELL" | "SALE" => Ok(TransactionKind::Sale),
            "DIVIDEND" => Ok(TransactionKind::Dividend),
            "INTEREST" => Ok(TransactionKind::Interest),
            "FEE" | "TAX" => Ok(TransactionKind::Fee),
            "ASSET_DEPOSIT" => Ok(TransactionKind::AssetDeposit),
            "LISTING_CHANGE" => Ok(TransactionKind::ListingChange),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored brokerage transaction
///
/// Amounts follow the broker export sign convention: money leaving the
/// account is negative in `total_amount`, sold quantity is negative in
/// `quantity`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub date: NaiveDate,
    pub account: String,
    pub kind: TransactionKind,
    pub category: String, // Raw category text as exported
    pub asset_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub fee: Decimal,
    pub currency: String,
    pub isin: String,
    pub processed: bool,
}

impl Transaction {
    /// Build an unprocessed transaction with empty account metadata
    pub fn new(
        id: i64,
        date: NaiveDate,
        kind: TransactionKind,
        asset_name: &str,
        quantity: Decimal,
        unit_price: Decimal,
        total_amount: Decimal,
    ) -> Self {
        Self {
            id,
            date,
            account: String::new(),
            kind,
            category: kind.as_str().to_string(),
            asset_name: asset_name.to_string(),
            quantity,
            unit_price,
            total_amount,
            fee: Decimal::ZERO,
            currency: "SEK".to_string(),
            isin: String::new(),
            processed: false,
        }
    }
}

/// Summary counters for the `status` command
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DbStats {
    pub transactions: i64,
    pub unprocessed: i64,
    pub processed: i64,
    pub assets: i64,
    pub capital: Decimal,
    pub tables: i64,
}
