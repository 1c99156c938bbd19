//! Per-kind transaction handlers
//!
//! Each handler either applies a transaction completely to the staged
//! ledger or leaves it untouched and reports it as deferred. Outflows are
//! matched FIFO against the oldest buckets holding capital or units.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::{Tolerances, DEFAULT_CUTOFF_DAY};
use crate::db::{Transaction, TransactionKind};
use crate::error::ReconcileError;
use crate::ledger::{allocate_with_cutoff, Availability, LotLedger};

use super::listing::{ListingState, ListingStep};

/// What happened to a transaction handed to the processor
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// These transaction ids are now applied
    Applied(Vec<i64>),
    /// State changed (listing change parked) but nothing is applied yet
    Progressed,
    /// Cannot be satisfied with the current ledger; try again later
    Deferred,
}

/// Split `required` over `available` entries oldest first.
///
/// Returns `None` when the entries cannot cover `required` within
/// `tolerance`. The sentinel entry (no month) never receives a share.
pub fn plan_depletion(
    available: &[Availability],
    required: Decimal,
    tolerance: Decimal,
) -> Option<Vec<(NaiveDate, Decimal)>> {
    let total: Decimal = available.iter().map(|a| a.balance).sum();
    if total + tolerance < required {
        return None;
    }

    let mut remaining = required;
    let mut plan = Vec::new();
    for entry in available {
        if remaining <= tolerance {
            break;
        }
        let Some(month) = entry.month else {
            continue;
        };
        let take = remaining.min(entry.balance);
        if take > Decimal::ZERO {
            plan.push((month, take));
            remaining -= take;
        }
    }

    Some(plan)
}

pub struct EventProcessor {
    cutoff_day: u32,
    tolerances: Tolerances,
    listing: ListingState,
}

impl Default for EventProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_CUTOFF_DAY, Tolerances::default())
    }
}

impl EventProcessor {
    pub fn new(cutoff_day: u32, tolerances: Tolerances) -> Self {
        Self {
            cutoff_day,
            tolerances,
            listing: ListingState::default(),
        }
    }

    pub fn listing_state(&self) -> &ListingState {
        &self.listing
    }

    /// Apply one transaction to `ledger`, or report why it has to wait
    pub fn apply(
        &mut self,
        ledger: &mut LotLedger,
        tx: &Transaction,
    ) -> Result<Outcome, ReconcileError> {
        let month = allocate_with_cutoff(tx.date, self.cutoff_day);
        ledger.bucket_mut(month);

        let applied = match tx.kind {
            TransactionKind::Deposit => {
                self.deposit(ledger, month, tx);
                true
            }
            TransactionKind::Withdrawal => self.withdraw(ledger, tx),
            TransactionKind::Purchase => self.purchase(ledger, month, tx),
            TransactionKind::Sale => self.sale(ledger, tx),
            TransactionKind::Dividend => {
                self.dividend(ledger, month, tx);
                true
            }
            TransactionKind::Interest if tx.total_amount > Decimal::ZERO => {
                self.interest(ledger, month, tx);
                true
            }
            TransactionKind::Interest | TransactionKind::Fee => self.fee(ledger, month, tx),
            TransactionKind::AssetDeposit => {
                self.asset_deposit(ledger, month, tx);
                true
            }
            TransactionKind::ListingChange => return self.listing_change(ledger, tx),
        };

        if applied {
            debug!("Applied {} {} ({})", tx.kind, tx.id, tx.asset_name);
            Ok(Outcome::Applied(vec![tx.id]))
        } else {
            debug!("Deferred {} {} ({})", tx.kind, tx.id, tx.asset_name);
            Ok(Outcome::Deferred)
        }
    }

    fn deposit(&self, ledger: &mut LotLedger, month: NaiveDate, tx: &Transaction) {
        let bucket = ledger.bucket_mut(month);
        bucket.capital += tx.total_amount;
        bucket.deposit += tx.total_amount;
    }

    fn withdraw(&self, ledger: &mut LotLedger, tx: &Transaction) -> bool {
        let amount = -tx.total_amount;
        let Some(plan) = plan_depletion(
            &ledger.available_capital(),
            amount,
            self.tolerances.withdrawal,
        ) else {
            return false;
        };

        for (month, take) in plan {
            let bucket = ledger.bucket_mut(month);
            bucket.capital -= take;
            bucket.withdrawal += take;
        }
        true
    }

    fn fee(&self, ledger: &mut LotLedger, month: NaiveDate, tx: &Transaction) -> bool {
        // Refunded tax arrives as a positive fee row
        if tx.total_amount > Decimal::ZERO {
            ledger.bucket_mut(month).capital += tx.total_amount;
            return true;
        }

        let amount = -tx.total_amount;
        let Some(plan) = plan_depletion(&ledger.available_capital(), amount, self.tolerances.fee)
        else {
            return false;
        };

        for (month, take) in plan {
            ledger.bucket_mut(month).capital -= take;
        }
        true
    }

    fn purchase(&self, ledger: &mut LotLedger, month: NaiveDate, tx: &Transaction) -> bool {
        let cost = -tx.total_amount;
        let units = tx.quantity;

        // Free allotments consume no capital
        if cost <= Decimal::ZERO {
            ledger
                .lot_mut(month, &tx.asset_name)
                .record_purchase(units, tx.unit_price);
            return true;
        }

        let Some(plan) = plan_depletion(
            &ledger.available_capital(),
            cost,
            self.tolerances.purchase,
        ) else {
            return false;
        };

        for (bucket_month, take) in plan {
            ledger.bucket_mut(bucket_month).capital -= take;
            ledger
                .lot_mut(bucket_month, &tx.asset_name)
                .record_purchase(take / cost * units, tx.unit_price);
        }
        true
    }

    fn sale(&self, ledger: &mut LotLedger, tx: &Transaction) -> bool {
        let units = -tx.quantity;
        let proceeds = tx.total_amount;

        let Some(plan) = plan_depletion(
            &ledger.available_asset(&tx.asset_name),
            units,
            self.tolerances.sale,
        ) else {
            return false;
        };

        for (month, take) in plan {
            ledger
                .lot_mut(month, &tx.asset_name)
                .record_sale(take, tx.unit_price);
            ledger.bucket_mut(month).capital += take / units * proceeds;
        }
        true
    }

    fn dividend(&self, ledger: &mut LotLedger, month: NaiveDate, tx: &Transaction) {
        let entitled = tx.quantity;
        let per_unit = tx.unit_price;

        let holdings: Vec<(NaiveDate, Decimal)> = ledger
            .lots_for(&tx.asset_name)
            .filter(|lot| lot.amount > Decimal::ZERO)
            .map(|lot| (lot.month, lot.amount))
            .collect();
        let held: Decimal = holdings.iter().map(|(_, amount)| *amount).sum();

        if held > Decimal::ZERO && held >= entitled {
            let payout = entitled * per_unit;
            for (lot_month, amount) in holdings {
                ledger.bucket_mut(lot_month).capital += amount / held * payout;
            }
        } else {
            for (lot_month, amount) in holdings {
                ledger.bucket_mut(lot_month).capital += amount * per_unit;
            }
            ledger.bucket_mut(month).capital += (entitled - held) * per_unit;
        }
    }

    fn interest(&self, ledger: &mut LotLedger, month: NaiveDate, tx: &Transaction) {
        let available: Vec<(NaiveDate, Decimal)> = ledger
            .available_capital()
            .into_iter()
            .filter_map(|a| a.month.map(|m| (m, a.balance)))
            .collect();
        let pool: Decimal = available.iter().map(|(_, balance)| *balance).sum();

        if pool <= Decimal::ZERO {
            ledger.bucket_mut(month).capital += tx.total_amount;
            return;
        }

        for (bucket_month, balance) in available {
            ledger.bucket_mut(bucket_month).capital += balance / pool * tx.total_amount;
        }
    }

    fn asset_deposit(&self, ledger: &mut LotLedger, month: NaiveDate, tx: &Transaction) {
        ledger
            .lot_mut(month, &tx.asset_name)
            .record_transfer_in(tx.quantity, tx.unit_price);
        ledger.bucket_mut(month).deposit += tx.quantity * tx.unit_price;
    }

    fn listing_change(
        &mut self,
        ledger: &mut LotLedger,
        tx: &Transaction,
    ) -> Result<Outcome, ReconcileError> {
        let outcome = match self.listing.step(ledger, tx)? {
            ListingStep::Awaiting => Outcome::Progressed,
            ListingStep::Waiting => Outcome::Deferred,
            ListingStep::Resolved {
                from_tx_id,
                to_tx_id,
                ..
            } => Outcome::Applied(vec![to_tx_id, from_tx_id]),
            ListingStep::Ignored => Outcome::Applied(vec![tx.id]),
        };
        Ok(outcome)
    }
}
