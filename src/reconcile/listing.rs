//! Listing change pairing
//!
//! A listing change (ticker swap, merger share exchange) arrives as two rows:
//! a "to" leg adding the new listing (positive quantity) and a "from" leg
//! removing the old one (negative quantity). Neither leg means anything on
//! its own, so the first one seen is parked until its partner shows up.

use rust_decimal::Decimal;
use tracing::debug;

use crate::db::Transaction;
use crate::error::ReconcileError;
use crate::ledger::LotLedger;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ListingState {
    #[default]
    Idle,
    AwaitingPair {
        to_asset: String,
        to_amount: Decimal,
        to_tx_id: i64,
    },
}

/// Result of feeding one leg into the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ListingStep {
    /// The "to" leg is parked; it stays unprocessed until the pair resolves
    Awaiting,
    /// Leg cannot be used yet (partner not seen, or the old listing is not held)
    Waiting,
    /// Both legs applied to the ledger
    Resolved {
        from_tx_id: i64,
        to_tx_id: i64,
        change_factor: Decimal,
    },
    /// Zero-quantity row, nothing to move
    Ignored,
}

impl ListingState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ListingState::Idle)
    }

    pub fn step(
        &mut self,
        ledger: &mut LotLedger,
        tx: &Transaction,
    ) -> Result<ListingStep, ReconcileError> {
        if tx.quantity.is_zero() {
            return Ok(ListingStep::Ignored);
        }

        match self.clone() {
            ListingState::Idle => {
                if tx.quantity > Decimal::ZERO {
                    debug!(
                        "Listing change {}: parking {} x {}",
                        tx.id, tx.quantity, tx.asset_name
                    );
                    *self = ListingState::AwaitingPair {
                        to_asset: tx.asset_name.clone(),
                        to_amount: tx.quantity,
                        to_tx_id: tx.id,
                    };
                    Ok(ListingStep::Awaiting)
                } else {
                    Ok(ListingStep::Waiting)
                }
            }
            ListingState::AwaitingPair {
                to_asset,
                to_amount,
                to_tx_id,
            } => {
                if tx.quantity > Decimal::ZERO {
                    if tx.id == to_tx_id {
                        return Ok(ListingStep::Waiting);
                    }
                    return Err(ReconcileError::ListingChangeProtocol {
                        pending_tx_id: to_tx_id,
                        conflicting_tx_id: tx.id,
                        asset: tx.asset_name.clone(),
                    });
                }

                if ledger.held_amount(&tx.asset_name) <= Decimal::ZERO {
                    return Ok(ListingStep::Waiting);
                }

                let change_factor = to_amount / -tx.quantity;
                ledger.rename_asset(&tx.asset_name, &to_asset, change_factor);
                debug!(
                    "Listing change {} -> {} resolved with factor {}",
                    tx.asset_name, to_asset, change_factor
                );

                *self = ListingState::Idle;
                Ok(ListingStep::Resolved {
                    from_tx_id: tx.id,
                    to_tx_id,
                    change_factor,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TransactionKind;
    use crate::ledger::last_day_of_month;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn leg(id: i64, asset: &str, quantity: Decimal) -> Transaction {
        Transaction::new(
            id,
            NaiveDate::from_ymd_opt(2024, 6, 20).unwrap(),
            TransactionKind::ListingChange,
            asset,
            quantity,
            dec!(0),
            dec!(0),
        )
    }

    fn held_ledger() -> LotLedger {
        let mut ledger = LotLedger::new();
        ledger
            .lot_mut(last_day_of_month(2024, 1), "OLD")
            .record_purchase(dec!(6), dec!(10));
        ledger
            .lot_mut(last_day_of_month(2024, 2), "OLD")
            .record_purchase(dec!(4), dec!(10));
        ledger
    }

    #[test]
    fn test_to_then_from_resolves() {
        let mut ledger = held_ledger();
        let mut state = ListingState::default();

        assert_eq!(
            state.step(&mut ledger, &leg(1, "NEW", dec!(5))).unwrap(),
            ListingStep::Awaiting
        );
        assert!(!state.is_idle());

        let step = state.step(&mut ledger, &leg(2, "OLD", dec!(-10))).unwrap();
        assert_eq!(
            step,
            ListingStep::Resolved {
                from_tx_id: 2,
                to_tx_id: 1,
                change_factor: dec!(0.5)
            }
        );
        assert!(state.is_idle());
        assert_eq!(ledger.held_amount("NEW"), dec!(5));
        assert_eq!(ledger.held_amount("OLD"), dec!(0));
    }

    #[test]
    fn test_from_leg_while_idle_waits() {
        let mut ledger = held_ledger();
        let mut state = ListingState::default();
        let before = ledger.clone();

        assert_eq!(
            state.step(&mut ledger, &leg(2, "OLD", dec!(-10))).unwrap(),
            ListingStep::Waiting
        );
        assert!(state.is_idle());
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_parked_leg_seen_again_waits() {
        let mut ledger = held_ledger();
        let mut state = ListingState::default();
        state.step(&mut ledger, &leg(1, "NEW", dec!(5))).unwrap();
        assert_eq!(
            state.step(&mut ledger, &leg(1, "NEW", dec!(5))).unwrap(),
            ListingStep::Waiting
        );
    }

    #[test]
    fn test_second_to_leg_is_protocol_error() {
        let mut ledger = held_ledger();
        let mut state = ListingState::default();
        state.step(&mut ledger, &leg(1, "NEW", dec!(5))).unwrap();

        let err = state
            .step(&mut ledger, &leg(3, "OTHER", dec!(7)))
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::ListingChangeProtocol {
                pending_tx_id: 1,
                conflicting_tx_id: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_from_leg_for_untracked_asset_keeps_waiting() {
        let mut ledger = LotLedger::new();
        let mut state = ListingState::default();
        state.step(&mut ledger, &leg(1, "NEW", dec!(5))).unwrap();

        assert_eq!(
            state.step(&mut ledger, &leg(2, "GHOST", dec!(-10))).unwrap(),
            ListingStep::Waiting
        );
        assert!(!state.is_idle());
    }

    #[test]
    fn test_zero_quantity_leg_is_ignored() {
        let mut ledger = LotLedger::new();
        let mut state = ListingState::default();
        assert_eq!(
            state.step(&mut ledger, &leg(9, "X", dec!(0))).unwrap(),
            ListingStep::Ignored
        );
        assert!(state.is_idle());
    }
}
