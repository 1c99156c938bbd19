//! Error handling for lotledger
//!
//! Typed failures for reconciliation and price lookups, plus a unified
//! Result alias using anyhow for context chaining in the I/O layers.

use thiserror::Error;

use crate::db::Transaction;

/// Result type alias for store and CLI operations
pub type Result<T> = anyhow::Result<T>;

/// Reasons a reconciliation run can fail. Every variant leaves the
/// committed ledger and the transaction processed flags untouched.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Transactions that could not be satisfied after the fixed point was reached.
    /// Recoverable: add the missing funding and run again.
    #[error("{} transaction(s) could not be reconciled (insufficient capital or asset quantity)", unresolved.len())]
    Deficit { unresolved: Vec<Transaction> },

    #[error("unknown transaction kind '{category}'")]
    UnknownTransactionKind { category: String },

    #[error(
        "listing change protocol violation: transaction {conflicting_tx_id} ({asset}) arrived while transaction {pending_tx_id} is still awaiting its pair"
    )]
    ListingChangeProtocol {
        pending_tx_id: i64,
        conflicting_tx_id: i64,
        asset: String,
    },

    #[error("transaction store failure")]
    Store(#[source] anyhow::Error),
}

impl ReconcileError {
    /// Wrap a store error, unwrapping a domain error that travelled through anyhow
    pub fn from_store(err: anyhow::Error) -> Self {
        match err.downcast::<ReconcileError>() {
            Ok(domain) => domain,
            Err(other) => ReconcileError::Store(other),
        }
    }

    /// Whether the caller can fix the failure by adding transactions and re-running
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ReconcileError::Deficit { .. })
    }
}

/// Per-asset price lookup failure; never fatal for the refresh as a whole
#[derive(Error, Debug)]
pub enum PriceLookupError {
    #[error("no price found for '{0}'")]
    NotFound(String),

    #[error("price source returned HTTP {status} for '{asset}'")]
    Http { asset: String, status: u16 },

    #[error("could not parse price '{raw}' for '{asset}'")]
    Parse { asset: String, raw: String },

    #[error("price request failed")]
    Request(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TransactionKind;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_formatting_is_readable() {
        let err = ReconcileError::UnknownTransactionKind {
            category: "Okänd".to_string(),
        };
        assert_eq!(err.to_string(), "unknown transaction kind 'Okänd'");
    }

    #[test]
    fn test_deficit_reports_count() {
        let tx = Transaction::new(
            7,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            TransactionKind::Withdrawal,
            "",
            dec!(0),
            dec!(0),
            dec!(-500),
        );
        let err = ReconcileError::Deficit {
            unresolved: vec![tx],
        };
        assert!(err.to_string().starts_with("1 transaction(s)"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_from_store_recovers_domain_error() {
        let wrapped = anyhow::Error::new(ReconcileError::UnknownTransactionKind {
            category: "X".to_string(),
        })
        .context("failed to load transactions");
        // Context wrapping keeps the original error downcastable
        let err = ReconcileError::from_store(wrapped);
        assert!(matches!(err, ReconcileError::UnknownTransactionKind { .. }));

        let plain = ReconcileError::from_store(anyhow::anyhow!("disk full"));
        assert!(matches!(plain, ReconcileError::Store(_)));
        assert!(!plain.is_recoverable());
    }

    #[test]
    fn test_anyhow_context_chains_errors() {
        use anyhow::Context;
        let result: Result<()> =
            Err(anyhow::anyhow!("original error")).context("failed to refresh prices");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("failed to refresh prices"));
        assert!(format!("{:?}", err).contains("original error"));
    }
}
