//! Reconciliation properties over whole transaction batches
//!
//! These tests drive the pure engine (no database):
//! - FIFO depletion across month buckets
//! - Deficits leave the ledger untouched and succeed once funded
//! - Listing changes carry lots over to the new name
//! - Re-running a committed batch changes nothing
//! - Lot quantities always add up to the asset aggregate

use chrono::NaiveDate;
use lotledger::db::{Transaction, TransactionKind};
use lotledger::error::ReconcileError;
use lotledger::ledger::{last_day_of_month, LotLedger};
use lotledger::reconcile::{reconcile, Reconciler};
use lotledger::reports::{calculate_stats, Period, Scope};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn deposit(id: i64, day: NaiveDate, amount: Decimal) -> Transaction {
    Transaction::new(id, day, TransactionKind::Deposit, "", dec!(0), dec!(0), amount)
}

fn withdrawal(id: i64, day: NaiveDate, amount: Decimal) -> Transaction {
    Transaction::new(id, day, TransactionKind::Withdrawal, "", dec!(0), dec!(0), -amount)
}

fn buy(id: i64, day: NaiveDate, asset: &str, units: Decimal, price: Decimal) -> Transaction {
    Transaction::new(id, day, TransactionKind::Purchase, asset, units, price, -(units * price))
}

fn sell(id: i64, day: NaiveDate, asset: &str, units: Decimal, price: Decimal) -> Transaction {
    Transaction::new(id, day, TransactionKind::Sale, asset, -units, price, units * price)
}

fn listing(id: i64, day: NaiveDate, asset: &str, units: Decimal) -> Transaction {
    Transaction::new(id, day, TransactionKind::ListingChange, asset, units, dec!(0), dec!(0))
}

fn assert_conserved(ledger: &LotLedger) {
    for asset in ledger.assets() {
        let lots: Decimal = ledger.lots_for(&asset.name).map(|lot| lot.amount).sum();
        assert_eq!(lots, asset.total_amount, "lots of {} do not add up", asset.name);
    }
    assert!(ledger.conservation_violations(dec!(0)).is_empty());
}

#[test]
fn withdrawal_depletes_oldest_bucket_first() {
    let jan = last_day_of_month(2024, 1);
    let feb = last_day_of_month(2024, 2);
    let txs = vec![
        deposit(1, date(2024, 1, 15), dec!(100)),
        deposit(2, date(2024, 2, 15), dec!(200)),
        withdrawal(3, date(2024, 3, 20), dec!(150)),
    ];

    let committed = reconcile(&LotLedger::new(), &txs).unwrap();
    let ledger = &committed.ledger;

    let b1 = ledger.bucket(jan).unwrap();
    assert_eq!(b1.capital, dec!(0));
    assert_eq!(b1.withdrawal, dec!(100));

    let b2 = ledger.bucket(feb).unwrap();
    assert_eq!(b2.capital, dec!(150));
    assert_eq!(b2.withdrawal, dec!(50));
    assert_eq!(ledger.total_capital(), dec!(150));
}

#[test]
fn deposit_then_full_withdrawal_empties_the_bucket() {
    let jan = last_day_of_month(2024, 1);
    let txs = vec![
        deposit(1, date(2024, 1, 15), dec!(500)),
        withdrawal(2, date(2024, 2, 20), dec!(500)),
    ];

    let committed = reconcile(&LotLedger::new(), &txs).unwrap();
    let bucket = committed.ledger.bucket(jan).unwrap();
    assert_eq!(bucket.deposit, dec!(500));
    assert_eq!(bucket.withdrawal, dec!(500));
    assert_eq!(bucket.capital, dec!(0));
}

#[test]
fn deficit_is_non_destructive_and_recovers_once_funded() {
    let start = {
        let mut ledger = LotLedger::new();
        ledger.bucket_mut(last_day_of_month(2023, 12)).capital = dec!(10);
        ledger
    };
    let mut txs = vec![withdrawal(1, date(2024, 1, 20), dec!(60))];

    let err = reconcile(&start, &txs).unwrap_err();
    match &err {
        ReconcileError::Deficit { unresolved } => {
            assert_eq!(unresolved.len(), 1);
            assert_eq!(unresolved[0].id, 1);
        }
        other => panic!("expected deficit, got {:?}", other),
    }
    assert!(err.is_recoverable());
    assert_eq!(start.total_capital(), dec!(10));

    // Funding dated after the withdrawal still unblocks it
    txs.push(deposit(2, date(2024, 2, 15), dec!(100)));
    let committed = reconcile(&start, &txs).unwrap();

    assert_eq!(committed.processed, vec![2, 1]);
    assert_eq!(committed.ledger.total_capital(), dec!(50));
    let dec_bucket = committed.ledger.bucket(last_day_of_month(2023, 12)).unwrap();
    assert_eq!(dec_bucket.capital, dec!(0));
    assert_eq!(dec_bucket.withdrawal, dec!(10));
}

#[test]
fn settlement_cutoff_moves_early_days_to_previous_month() {
    let txs = vec![
        deposit(1, date(2024, 3, 10), dec!(100)),
        deposit(2, date(2024, 3, 11), dec!(200)),
    ];

    let committed = reconcile(&LotLedger::new(), &txs).unwrap();
    assert_eq!(
        committed.ledger.bucket(last_day_of_month(2024, 2)).unwrap().deposit,
        dec!(100)
    );
    assert_eq!(
        committed.ledger.bucket(last_day_of_month(2024, 3)).unwrap().deposit,
        dec!(200)
    );

    let late_cutoff = Reconciler::new(11, Default::default())
        .reconcile(&LotLedger::new(), &txs)
        .unwrap();
    assert_eq!(
        late_cutoff.ledger.bucket(last_day_of_month(2024, 2)).unwrap().deposit,
        dec!(300)
    );
}

#[test]
fn purchase_and_sale_flow_through_lots() {
    let jan = last_day_of_month(2024, 1);
    let feb = last_day_of_month(2024, 2);
    let txs = vec![
        deposit(1, date(2024, 1, 15), dec!(1000)),
        deposit(2, date(2024, 2, 15), dec!(1000)),
        buy(3, date(2024, 2, 20), "ABB", dec!(16), dec!(100)),
        sell(4, date(2024, 3, 20), "ABB", dec!(12.5), dec!(120)),
    ];

    let committed = reconcile(&LotLedger::new(), &txs).unwrap();
    let ledger = &committed.ledger;

    // 1000 from January buys 10 units, 600 from February buys 6
    let jan_lot = ledger.lot(jan, "ABB").unwrap();
    assert_eq!(jan_lot.purchased_amount, dec!(10));
    assert_eq!(jan_lot.sold_amount, dec!(10));
    assert_eq!(jan_lot.amount, dec!(0));
    let feb_lot = ledger.lot(feb, "ABB").unwrap();
    assert_eq!(feb_lot.purchased_amount, dec!(6));
    assert_eq!(feb_lot.amount, dec!(3.5));

    // Proceeds return to the buckets the units came from
    assert_eq!(ledger.bucket(jan).unwrap().capital, dec!(1200));
    assert_eq!(ledger.bucket(feb).unwrap().capital, dec!(700));

    let abb = ledger.asset("ABB").unwrap();
    assert_eq!(abb.total_amount, dec!(3.5));
    assert_eq!(abb.average_purchase_price, dec!(100));
    assert_eq!(abb.average_sale_price, dec!(120));
    assert_conserved(ledger);
}

#[test]
fn sale_before_its_purchase_waits_for_it() {
    let txs = vec![
        sell(1, date(2024, 1, 12), "ABB", dec!(2), dec!(110)),
        deposit(2, date(2024, 1, 15), dec!(500)),
        buy(3, date(2024, 1, 20), "ABB", dec!(2), dec!(100)),
    ];

    let committed = reconcile(&LotLedger::new(), &txs).unwrap();
    assert_eq!(committed.processed, vec![2, 3, 1]);
    assert_eq!(committed.ledger.held_amount("ABB"), dec!(0));
    assert_eq!(committed.ledger.total_capital(), dec!(520));
}

#[test]
fn listing_change_keeps_month_attribution() {
    let jan = last_day_of_month(2024, 1);
    let feb = last_day_of_month(2024, 2);
    let txs = vec![
        deposit(1, date(2024, 1, 15), dec!(600)),
        buy(2, date(2024, 1, 20), "OLD", dec!(6), dec!(100)),
        deposit(3, date(2024, 2, 15), dec!(400)),
        buy(4, date(2024, 2, 20), "OLD", dec!(4), dec!(100)),
        listing(5, date(2024, 3, 20), "NEW", dec!(5)),
        listing(6, date(2024, 3, 20), "OLD", dec!(-10)),
    ];

    let committed = reconcile(&LotLedger::new(), &txs).unwrap();
    let ledger = &committed.ledger;

    assert_eq!(ledger.lot(jan, "NEW").unwrap().amount, dec!(3));
    assert_eq!(ledger.lot(feb, "NEW").unwrap().amount, dec!(2));
    assert!(ledger.lot(jan, "OLD").is_none());
    assert_eq!(ledger.held_amount("NEW"), dec!(5));
    assert_eq!(committed.processed.len(), 6);
    assert_conserved(ledger);
}

#[test]
fn listing_change_with_old_leg_first() {
    let jan = last_day_of_month(2024, 1);
    let txs = vec![
        deposit(1, date(2024, 1, 15), dec!(600)),
        buy(2, date(2024, 1, 20), "OLD", dec!(6), dec!(100)),
        listing(3, date(2024, 3, 20), "OLD", dec!(-6)),
        listing(4, date(2024, 3, 20), "NEW", dec!(6)),
    ];

    let committed = reconcile(&LotLedger::new(), &txs).unwrap();
    assert_eq!(committed.ledger.lot(jan, "NEW").unwrap().amount, dec!(6));
    assert_eq!(committed.processed.len(), 4);
}

#[test]
fn conflicting_listing_legs_are_rejected() {
    let txs = vec![
        listing(1, date(2024, 3, 20), "NEW A", dec!(5)),
        listing(2, date(2024, 3, 20), "NEW B", dec!(5)),
    ];

    let err = reconcile(&LotLedger::new(), &txs).unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::ListingChangeProtocol {
            pending_tx_id: 1,
            conflicting_tx_id: 2,
            ..
        }
    ));
    assert!(!err.is_recoverable());
}

#[test]
fn parked_listing_change_blocks_later_independent_change() {
    // OLD is never bought (not enough capital), so the first pair cannot resolve
    let txs = vec![
        deposit(1, date(2024, 1, 15), dec!(100)),
        buy(2, date(2024, 1, 20), "OLD", dec!(6), dec!(100)),
        listing(3, date(2024, 3, 20), "NEW", dec!(3)),
        listing(4, date(2024, 3, 20), "OLD", dec!(-6)),
        listing(5, date(2024, 4, 20), "NEXT", dec!(2)),
        listing(6, date(2024, 4, 20), "OTHER", dec!(-2)),
    ];

    let err = reconcile(&LotLedger::new(), &txs).unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::ListingChangeProtocol {
            pending_tx_id: 3,
            conflicting_tx_id: 5,
            ..
        }
    ));
    assert!(!err.is_recoverable());
}

#[test]
fn rerunning_a_committed_batch_changes_nothing() {
    let mut txs = vec![
        deposit(1, date(2024, 1, 15), dec!(1000)),
        buy(2, date(2024, 1, 20), "ABB", dec!(4), dec!(100)),
        withdrawal(3, date(2024, 2, 20), dec!(100)),
    ];

    let first = reconcile(&LotLedger::new(), &txs).unwrap();
    first.mark_processed(&mut txs);
    assert!(txs.iter().all(|tx| tx.processed));

    let second = reconcile(&first.ledger, &txs).unwrap();
    assert!(second.processed.is_empty());
    assert_eq!(second.ledger, first.ledger);
}

#[test]
fn stats_split_realized_and_unrealized() {
    let txs = vec![
        deposit(1, date(2024, 1, 15), dec!(10000)),
        buy(2, date(2024, 2, 12), "ABB", dec!(10), dec!(400)),
        sell(3, date(2024, 3, 20), "ABB", dec!(5), dec!(450)),
        withdrawal(4, date(2024, 5, 15), dec!(1000)),
    ];

    let mut ledger = reconcile(&LotLedger::new(), &txs).unwrap().ledger;
    ledger.asset_mut("ABB").latest_price = Some(dec!(500));

    let today = date(2024, 6, 30);
    let report = calculate_stats(&ledger, today, dec!(0.001));
    let jan = report
        .rows(Period::Month)
        .iter()
        .find(|row| row.date == last_day_of_month(2024, 1))
        .unwrap();

    // capital 10000 - 4000 + 2250 - 1000, plus 5 units at 500
    assert_eq!(jan.capital, dec!(7250));
    assert_eq!(jan.value, dec!(9750));
    assert_eq!(jan.total_gainloss, dec!(750));
    // Cash alone has not recovered the deposit while value is still held
    assert_eq!(jan.realized_gainloss, dec!(0));
    assert_eq!(jan.unrealized_gainloss, dec!(750));
    assert_eq!(jan.total_gainloss_per, dec!(7.5));
    assert_eq!(jan.annual_per_yield, None);

    let years = report.stats(Period::Year, Scope::All);
    assert_eq!(years.len(), 1);
    assert_eq!(years[0].date, today);
    assert_eq!(years[0].deposit, dec!(10000));
}
