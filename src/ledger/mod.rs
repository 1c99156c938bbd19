//! Lot ledger - monthly capital buckets and per-bucket asset lots
//!
//! The ledger is a plain in-memory value. Reconciliation works on a clone
//! and hands the clone back on success, so a failed run never touches the
//! ledger it started from.

pub mod allocation;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

pub use allocation::{allocate_to_month, allocate_with_cutoff, last_day_of_month};

/// Capital pool of one settlement month
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthBucket {
    pub month: NaiveDate,
    pub deposit: Decimal,    // Accumulated deposits attributed to this month
    pub withdrawal: Decimal, // Accumulated withdrawals drawn from this month
    pub capital: Decimal,    // Uninvested cash still belonging to this month
}

impl MonthBucket {
    pub fn new(month: NaiveDate) -> Self {
        Self {
            month,
            deposit: Decimal::ZERO,
            withdrawal: Decimal::ZERO,
            capital: Decimal::ZERO,
        }
    }
}

/// Quantity of one asset attributed to one month
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetLot {
    pub month: NaiveDate,
    pub asset: String,
    pub amount: Decimal,
    pub purchased_amount: Decimal,
    pub sold_amount: Decimal,
    pub average_price: Decimal,
    pub average_purchase_price: Decimal,
    pub average_sale_price: Decimal,
}

impl AssetLot {
    pub fn new(month: NaiveDate, asset: &str) -> Self {
        Self {
            month,
            asset: asset.to_string(),
            amount: Decimal::ZERO,
            purchased_amount: Decimal::ZERO,
            sold_amount: Decimal::ZERO,
            average_price: Decimal::ZERO,
            average_purchase_price: Decimal::ZERO,
            average_sale_price: Decimal::ZERO,
        }
    }

    pub fn record_purchase(&mut self, units: Decimal, price: Decimal) {
        self.average_price = blend(self.amount, self.average_price, units, price);
        self.average_purchase_price = blend(
            self.purchased_amount,
            self.average_purchase_price,
            units,
            price,
        );
        self.amount += units;
        self.purchased_amount += units;
    }

    pub fn record_sale(&mut self, units: Decimal, price: Decimal) {
        self.average_sale_price = blend(self.sold_amount, self.average_sale_price, units, price);
        self.amount -= units;
        self.sold_amount += units;
    }

    /// In-kind transfer: held quantity grows without counting as a purchase
    pub fn record_transfer_in(&mut self, units: Decimal, price: Decimal) {
        self.average_price = blend(self.amount, self.average_price, units, price);
        self.amount += units;
    }

    /// Merge another lot of the same month into this one
    fn absorb(&mut self, other: AssetLot) {
        self.average_price = blend(
            self.amount,
            self.average_price,
            other.amount,
            other.average_price,
        );
        self.average_purchase_price = blend(
            self.purchased_amount,
            self.average_purchase_price,
            other.purchased_amount,
            other.average_purchase_price,
        );
        self.average_sale_price = blend(
            self.sold_amount,
            self.average_sale_price,
            other.sold_amount,
            other.average_sale_price,
        );
        self.amount += other.amount;
        self.purchased_amount += other.purchased_amount;
        self.sold_amount += other.sold_amount;
    }
}

/// Aggregate of all lots of one asset, plus the latest known price
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Asset {
    pub name: String,
    pub total_amount: Decimal,
    pub purchased_amount: Decimal,
    pub sold_amount: Decimal,
    pub average_price: Decimal,
    pub average_purchase_price: Decimal,
    pub average_sale_price: Decimal,
    pub latest_price: Option<Decimal>,
    pub latest_price_date: Option<NaiveDate>,
}

impl Asset {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            total_amount: Decimal::ZERO,
            purchased_amount: Decimal::ZERO,
            sold_amount: Decimal::ZERO,
            average_price: Decimal::ZERO,
            average_purchase_price: Decimal::ZERO,
            average_sale_price: Decimal::ZERO,
            latest_price: None,
            latest_price_date: None,
        }
    }
}

/// One entry of an availability query. `month` is `None` only for the
/// sentinel returned when nothing is available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Availability {
    pub month: Option<NaiveDate>,
    pub balance: Decimal,
}

impl Availability {
    pub fn none() -> Self {
        Self {
            month: None,
            balance: Decimal::ZERO,
        }
    }
}

/// Weighted-average blend of an existing average with a newly moved quantity
pub fn blend(existing: Decimal, existing_avg: Decimal, moved: Decimal, price: Decimal) -> Decimal {
    let total = existing + moved;
    if total <= Decimal::ZERO {
        return existing_avg;
    }
    moved / total * price + existing / total * existing_avg
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LotLedger {
    buckets: BTreeMap<NaiveDate, MonthBucket>,
    lots: BTreeMap<String, BTreeMap<NaiveDate, AssetLot>>,
    assets: BTreeMap<String, Asset>,
}

impl LotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.lots.is_empty() && self.assets.is_empty()
    }

    pub fn bucket(&self, month: NaiveDate) -> Option<&MonthBucket> {
        self.buckets.get(&month)
    }

    /// Insert-if-absent access to a month bucket
    pub fn bucket_mut(&mut self, month: NaiveDate) -> &mut MonthBucket {
        self.buckets
            .entry(month)
            .or_insert_with(|| MonthBucket::new(month))
    }

    /// Buckets in ascending month order
    pub fn buckets(&self) -> impl Iterator<Item = &MonthBucket> {
        self.buckets.values()
    }

    pub fn lot(&self, month: NaiveDate, asset: &str) -> Option<&AssetLot> {
        self.lots.get(asset).and_then(|lots| lots.get(&month))
    }

    /// Insert-if-absent access to a lot; also creates its bucket and asset entry
    pub fn lot_mut(&mut self, month: NaiveDate, asset: &str) -> &mut AssetLot {
        self.bucket_mut(month);
        self.asset_mut(asset);
        self.lots
            .entry(asset.to_string())
            .or_default()
            .entry(month)
            .or_insert_with(|| AssetLot::new(month, asset))
    }

    /// Lots of one asset in ascending month order
    pub fn lots_for<'a>(&'a self, asset: &str) -> impl Iterator<Item = &'a AssetLot> + 'a {
        self.lots.get(asset).into_iter().flat_map(|lots| lots.values())
    }

    /// Lots of every asset attributed to one month
    pub fn lots_in(&self, month: NaiveDate) -> impl Iterator<Item = &AssetLot> {
        self.lots.values().filter_map(move |lots| lots.get(&month))
    }

    pub fn all_lots(&self) -> impl Iterator<Item = &AssetLot> {
        self.lots.values().flat_map(|lots| lots.values())
    }

    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.assets.get(name)
    }

    pub fn asset_mut(&mut self, name: &str) -> &mut Asset {
        self.assets
            .entry(name.to_string())
            .or_insert_with(|| Asset::new(name))
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn insert_bucket(&mut self, bucket: MonthBucket) {
        self.buckets.insert(bucket.month, bucket);
    }

    pub fn insert_lot(&mut self, lot: AssetLot) {
        self.lots
            .entry(lot.asset.clone())
            .or_default()
            .insert(lot.month, lot);
    }

    pub fn insert_asset(&mut self, asset: Asset) {
        self.assets.insert(asset.name.clone(), asset);
    }

    /// Buckets with positive capital, oldest first
    pub fn available_capital(&self) -> Vec<Availability> {
        let available: Vec<Availability> = self
            .buckets
            .values()
            .filter(|b| b.capital > Decimal::ZERO)
            .map(|b| Availability {
                month: Some(b.month),
                balance: b.capital,
            })
            .collect();

        if available.is_empty() {
            vec![Availability::none()]
        } else {
            available
        }
    }

    /// Lots of `asset` with positive holdings, oldest first
    pub fn available_asset(&self, asset: &str) -> Vec<Availability> {
        let available: Vec<Availability> = self
            .lots_for(asset)
            .filter(|lot| lot.amount > Decimal::ZERO)
            .map(|lot| Availability {
                month: Some(lot.month),
                balance: lot.amount,
            })
            .collect();

        if available.is_empty() {
            vec![Availability::none()]
        } else {
            available
        }
    }

    pub fn total_capital(&self) -> Decimal {
        self.buckets.values().map(|b| b.capital).sum()
    }

    pub fn held_amount(&self, asset: &str) -> Decimal {
        self.lots_for(asset)
            .filter(|lot| lot.amount > Decimal::ZERO)
            .map(|lot| lot.amount)
            .sum()
    }

    /// Move every lot of `from` to `to`, scaling held quantities by `factor`.
    ///
    /// Lots landing on a month where `to` already has a lot are merged into it.
    /// Returns false (and changes nothing) when `from` has no lots.
    pub fn rename_asset(&mut self, from: &str, to: &str, factor: Decimal) -> bool {
        let Some(from_lots) = self.lots.remove(from) else {
            return false;
        };

        let target = self.lots.entry(to.to_string()).or_default();
        for (month, mut lot) in from_lots {
            lot.amount *= factor;
            lot.asset = to.to_string();
            match target.get_mut(&month) {
                Some(existing) => existing.absorb(lot),
                None => {
                    target.insert(month, lot);
                }
            }
        }

        let previous = self.assets.remove(from);
        let held: Decimal = self.lots_for(to).map(|lot| lot.amount).sum();
        let entry = self.assets.entry(to.to_string()).or_insert_with(|| {
            let mut asset = previous.unwrap_or_else(|| Asset::new(to));
            asset.name = to.to_string();
            asset
        });
        entry.total_amount = held;
        true
    }

    /// Rebuild every asset aggregate by folding its lots in month order.
    ///
    /// Lots at or below `dust` do not move the averages. Latest price fields
    /// are kept.
    pub fn recompute_assets(&mut self, dust: Decimal) {
        let mut names: Vec<String> = self.assets.keys().cloned().collect();
        names.extend(self.lots.keys().cloned());
        names.sort();
        names.dedup();

        for name in names {
            let mut held_weight = Decimal::ZERO;
            let mut purchased_weight = Decimal::ZERO;
            let mut sold_weight = Decimal::ZERO;
            let mut folded = Asset::new(&name);

            for lot in self.lots_for(&name) {
                folded.total_amount += lot.amount;
                if lot.amount > dust {
                    folded.average_price =
                        blend(held_weight, folded.average_price, lot.amount, lot.average_price);
                    held_weight += lot.amount;
                }
                if lot.purchased_amount > dust {
                    folded.average_purchase_price = blend(
                        purchased_weight,
                        folded.average_purchase_price,
                        lot.purchased_amount,
                        lot.average_purchase_price,
                    );
                    purchased_weight += lot.purchased_amount;
                }
                if lot.sold_amount > dust {
                    folded.average_sale_price = blend(
                        sold_weight,
                        folded.average_sale_price,
                        lot.sold_amount,
                        lot.average_sale_price,
                    );
                    sold_weight += lot.sold_amount;
                }
                folded.purchased_amount += lot.purchased_amount;
                folded.sold_amount += lot.sold_amount;
            }

            let entry = self.asset_mut(&name);
            folded.latest_price = entry.latest_price;
            folded.latest_price_date = entry.latest_price_date;
            *entry = folded;
        }
    }

    /// Assets whose aggregate disagrees with the sum of their lots by more than `tolerance`
    pub fn conservation_violations(&self, tolerance: Decimal) -> Vec<(String, Decimal, Decimal)> {
        self.assets
            .values()
            .filter_map(|asset| {
                let lots: Decimal = self.lots_for(&asset.name).map(|lot| lot.amount).sum();
                ((lots - asset.total_amount).abs() > tolerance).then(|| {
                    (asset.name.clone(), lots, asset.total_amount)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn m(y: i32, mo: u32) -> NaiveDate {
        last_day_of_month(y, mo)
    }

    #[test]
    fn test_available_capital_is_oldest_first_and_positive_only() {
        let mut ledger = LotLedger::new();
        ledger.bucket_mut(m(2024, 3)).capital = dec!(50);
        ledger.bucket_mut(m(2024, 1)).capital = dec!(100);
        ledger.bucket_mut(m(2024, 2)).capital = dec!(0);

        let available = ledger.available_capital();
        assert_eq!(available.len(), 2);
        assert_eq!(available[0].month, Some(m(2024, 1)));
        assert_eq!(available[1].month, Some(m(2024, 3)));
    }

    #[test]
    fn test_empty_ledger_yields_sentinel() {
        let ledger = LotLedger::new();
        assert_eq!(ledger.available_capital(), vec![Availability::none()]);
        assert_eq!(ledger.available_asset("ABB"), vec![Availability::none()]);
    }

    #[test]
    fn test_lot_mut_creates_bucket_and_asset() {
        let mut ledger = LotLedger::new();
        ledger.lot_mut(m(2024, 5), "ABB").record_purchase(dec!(10), dec!(300));

        assert!(ledger.bucket(m(2024, 5)).is_some());
        assert!(ledger.asset("ABB").is_some());
        assert_eq!(ledger.held_amount("ABB"), dec!(10));
    }

    #[test]
    fn test_blend_weights_by_quantity() {
        assert_eq!(blend(dec!(0), dec!(0), dec!(10), dec!(100)), dec!(100));
        assert_eq!(blend(dec!(10), dec!(100), dec!(10), dec!(200)), dec!(150));
        assert_eq!(blend(dec!(0), dec!(42), dec!(0), dec!(100)), dec!(42));
    }

    #[test]
    fn test_purchase_and_sale_update_averages() {
        let mut lot = AssetLot::new(m(2024, 1), "ABB");
        lot.record_purchase(dec!(10), dec!(100));
        lot.record_purchase(dec!(30), dec!(200));
        assert_eq!(lot.average_purchase_price, dec!(175));
        assert_eq!(lot.amount, dec!(40));

        lot.record_sale(dec!(20), dec!(250));
        lot.record_sale(dec!(20), dec!(150));
        assert_eq!(lot.average_sale_price, dec!(200));
        assert_eq!(lot.amount, dec!(0));
        assert_eq!(lot.sold_amount, dec!(40));
    }

    #[test]
    fn test_rename_scales_and_merges() {
        let mut ledger = LotLedger::new();
        ledger.lot_mut(m(2024, 1), "OLD").record_purchase(dec!(6), dec!(10));
        ledger.lot_mut(m(2024, 2), "OLD").record_purchase(dec!(4), dec!(10));
        ledger.lot_mut(m(2024, 2), "NEW").record_purchase(dec!(1), dec!(40));

        assert!(ledger.rename_asset("OLD", "NEW", dec!(0.5)));

        assert!(ledger.asset("OLD").is_none());
        assert_eq!(ledger.lots_for("OLD").count(), 0);
        assert_eq!(ledger.lot(m(2024, 1), "NEW").unwrap().amount, dec!(3));
        assert_eq!(ledger.lot(m(2024, 2), "NEW").unwrap().amount, dec!(3));
        assert_eq!(ledger.asset("NEW").unwrap().total_amount, dec!(6));
    }

    #[test]
    fn test_rename_unknown_asset_is_noop() {
        let mut ledger = LotLedger::new();
        ledger.bucket_mut(m(2024, 1)).capital = dec!(10);
        let before = ledger.clone();
        assert!(!ledger.rename_asset("GHOST", "NEW", dec!(2)));
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_recompute_assets_folds_lots_and_keeps_price() {
        let mut ledger = LotLedger::new();
        ledger.lot_mut(m(2024, 1), "ABB").record_purchase(dec!(10), dec!(100));
        ledger.lot_mut(m(2024, 2), "ABB").record_purchase(dec!(30), dec!(200));
        ledger.lot_mut(m(2024, 2), "ABB").record_sale(dec!(10), dec!(300));
        {
            let asset = ledger.asset_mut("ABB");
            asset.latest_price = Some(dec!(250));
            asset.total_amount = dec!(999);
        }

        ledger.recompute_assets(dec!(0.001));

        let asset = ledger.asset("ABB").unwrap();
        assert_eq!(asset.total_amount, dec!(30));
        assert_eq!(asset.purchased_amount, dec!(40));
        assert_eq!(asset.sold_amount, dec!(10));
        assert_eq!(asset.average_purchase_price, dec!(175));
        assert_eq!(asset.average_sale_price, dec!(300));
        assert_eq!(asset.latest_price, Some(dec!(250)));
        assert!(ledger.conservation_violations(dec!(0.001)).is_empty());
    }

    #[test]
    fn test_conservation_violation_is_reported() {
        let mut ledger = LotLedger::new();
        ledger.lot_mut(m(2024, 1), "ABB").record_purchase(dec!(10), dec!(100));
        ledger.asset_mut("ABB").total_amount = dec!(9);

        let violations = ledger.conservation_violations(dec!(0.001));
        assert_eq!(violations, vec![("ABB".to_string(), dec!(10), dec!(9))]);
    }
}
