//! Lotledger - brokerage transaction reconciler
//!
//! Attributes every deposited krona, and every share bought with it, to the
//! settlement month the money arrived in. Outflows deplete the oldest months
//! first, which yields realized and unrealized gain/loss per month and year.

pub mod config;
pub mod db;
pub mod error;
pub mod importers;
pub mod ledger;
pub mod pricing;
pub mod reconcile;
pub mod reports;
pub mod tracker;
pub mod utils;

pub use error::Result;
