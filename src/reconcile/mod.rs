//! Reconciliation driver
//!
//! Runs the event processor to a fixed point over a batch of unprocessed
//! transactions. The batch either applies completely, in which case the
//! staged ledger is handed back as [`Committed`], or not at all.

pub mod listing;
pub mod processor;

use tracing::{debug, info, warn};

use crate::config::{Config, Tolerances, DEFAULT_CUTOFF_DAY};
use crate::db::Transaction;
use crate::error::ReconcileError;
use crate::ledger::LotLedger;

pub use listing::{ListingState, ListingStep};
pub use processor::{plan_depletion, EventProcessor, Outcome};

/// A fully reconciled batch, ready to be written back to the store
#[derive(Debug, Clone)]
pub struct Committed {
    pub ledger: LotLedger,
    /// Ids in the order they were applied
    pub processed: Vec<i64>,
    /// Number of scans over the pending set
    pub passes: usize,
}

impl Committed {
    /// Flip the processed flag of every transaction this batch applied
    pub fn mark_processed(&self, transactions: &mut [Transaction]) {
        for tx in transactions.iter_mut() {
            if self.processed.contains(&tx.id) {
                tx.processed = true;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    cutoff_day: u32,
    tolerances: Tolerances,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_CUTOFF_DAY, Tolerances::default())
    }
}

impl Reconciler {
    pub fn new(cutoff_day: u32, tolerances: Tolerances) -> Self {
        Self {
            cutoff_day,
            tolerances,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cutoff_day, config.tolerances)
    }

    /// Apply every unprocessed transaction in `transactions` to a copy of `ledger`.
    ///
    /// Pending transactions are scanned in (date, id) order. Each successful
    /// application restarts the scan from the oldest pending transaction, so
    /// a deposit dated later than a purchase can still unblock it. When a
    /// full scan changes nothing, anything left over fails the whole batch.
    pub fn reconcile(
        &self,
        ledger: &LotLedger,
        transactions: &[Transaction],
    ) -> Result<Committed, ReconcileError> {
        let mut staged = ledger.clone();
        let mut processor = EventProcessor::new(self.cutoff_day, self.tolerances);

        let mut pending: Vec<&Transaction> = transactions.iter().filter(|t| !t.processed).collect();
        pending.sort_by_key(|t| (t.date, t.id));

        info!("Reconciling {} unprocessed transactions", pending.len());

        let mut processed = Vec::with_capacity(pending.len());
        let mut passes = 0;

        loop {
            passes += 1;
            let mut applied: Option<Vec<i64>> = None;

            for tx in &pending {
                match processor.apply(&mut staged, tx)? {
                    Outcome::Applied(ids) => {
                        applied = Some(ids);
                        break;
                    }
                    Outcome::Progressed => {
                        applied = Some(Vec::new());
                        break;
                    }
                    Outcome::Deferred => {}
                }
            }

            let Some(ids) = applied else {
                break;
            };
            pending.retain(|t| !ids.contains(&t.id));
            processed.extend(ids);
        }

        if !pending.is_empty() {
            warn!(
                "{} transaction(s) left unresolved after {} passes, discarding batch",
                pending.len(),
                passes
            );
            return Err(ReconcileError::Deficit {
                unresolved: pending.into_iter().cloned().collect(),
            });
        }

        staged.recompute_assets(self.tolerances.lot_dust);
        for (asset, lots, total) in staged.conservation_violations(self.tolerances.lot_dust) {
            warn!(
                "Asset {} holds {} across lots but aggregates to {}",
                asset, lots, total
            );
        }

        debug!(
            "Remaining capital after reconciliation: {}",
            staged.total_capital()
        );
        info!(
            "Reconciled {} transactions in {} passes",
            processed.len(),
            passes
        );

        Ok(Committed {
            ledger: staged,
            processed,
            passes,
        })
    }
}

/// Reconcile with default settlement cutoff and tolerances
pub fn reconcile(
    ledger: &LotLedger,
    transactions: &[Transaction],
) -> Result<Committed, ReconcileError> {
    Reconciler::default().reconcile(ledger, transactions)
}
