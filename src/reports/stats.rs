// Statistics - month and year gain/loss rows with running totals

use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, MathematicalOps};
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::ledger::{LotLedger, MonthBucket};

const DAYS_PER_YEAR: Decimal = Decimal::from_parts(36525, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Period {
    Month,
    Year,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Month => "month",
            Period::Year => "year",
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "month" | "m" => Ok(Period::Month),
            "year" | "y" => Ok(Period::Year),
            _ => Err(format!("Unknown period '{}' (expected month or year)", s)),
        }
    }
}

/// Which rows a query returns: those still holding value, or every row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scope {
    Current,
    All,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Current => "current",
            Scope::All => "all",
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "current" => Ok(Scope::Current),
            "all" => Ok(Scope::All),
            _ => Err(format!("Unknown scope '{}' (expected current or all)", s)),
        }
    }
}

/// Gain/loss figures for one month or one year
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodStats {
    pub date: NaiveDate,
    pub deposit: Decimal,
    pub withdrawal: Decimal,
    pub capital: Decimal,
    pub value: Decimal,
    pub total_gainloss: Decimal,
    pub realized_gainloss: Decimal,
    pub unrealized_gainloss: Decimal,
    pub total_gainloss_per: Decimal,
    pub realized_gainloss_per: Decimal,
    pub unrealized_gainloss_per: Decimal,
    pub annual_per_yield: Option<Decimal>,
    pub acc_deposit: Decimal,
    pub acc_value: Decimal,
    pub acc_withdrawal: Decimal,
    pub acc_net_deposit: Decimal,
    pub acc_total_gainloss: Decimal,
    pub acc_realized_gainloss: Decimal,
    pub acc_unrealized_gainloss: Decimal,
}

pub type MonthStats = PeriodStats;
pub type YearStats = PeriodStats;

/// One point of an accumulated series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccumulatedPoint {
    pub date: NaiveDate,
    pub deposit: Decimal,
    pub value: Decimal,
    pub gainloss: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsReport {
    pub months: Vec<MonthStats>,
    pub years: Vec<YearStats>,
}

impl StatsReport {
    pub fn is_empty(&self) -> bool {
        self.months.is_empty() && self.years.is_empty()
    }

    pub fn rows(&self, period: Period) -> &[PeriodStats] {
        match period {
            Period::Month => &self.months,
            Period::Year => &self.years,
        }
    }

    /// Rows of a period; `Scope::Current` keeps only rows still holding value
    pub fn stats(&self, period: Period, scope: Scope) -> Vec<&PeriodStats> {
        self.rows(period)
            .iter()
            .filter(|row| scope == Scope::All || row.value > Decimal::ZERO)
            .collect()
    }

    /// Running totals per row.
    ///
    /// `Scope::Current` pairs net deposits with unrealized gain/loss,
    /// `Scope::All` pairs gross deposits with total gain/loss.
    pub fn accumulated(&self, period: Period, scope: Scope) -> Vec<AccumulatedPoint> {
        self.stats(period, scope)
            .into_iter()
            .map(|row| match scope {
                Scope::Current => AccumulatedPoint {
                    date: row.date,
                    deposit: row.acc_net_deposit,
                    value: row.acc_value,
                    gainloss: row.acc_unrealized_gainloss,
                },
                Scope::All => AccumulatedPoint {
                    date: row.date,
                    deposit: row.acc_deposit,
                    value: row.acc_value,
                    gainloss: row.acc_total_gainloss,
                },
            })
            .collect()
    }
}

/// Gain/loss split derived from flow totals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainLoss {
    pub total: Decimal,
    pub realized: Decimal,
    pub unrealized: Decimal,
    pub total_per: Decimal,
    pub realized_per: Decimal,
    pub unrealized_per: Decimal,
}

impl GainLoss {
    pub fn derive(deposit: Decimal, withdrawal: Decimal, capital: Decimal, value: Decimal) -> Self {
        let total = withdrawal + value - deposit;
        let cash_result = withdrawal + capital - deposit;
        // Cash already back covers the deposit, or nothing is left to recover
        let realized = if cash_result >= Decimal::ZERO || value <= Decimal::ZERO {
            cash_result
        } else {
            Decimal::ZERO
        };
        let unrealized = total - realized;

        Self {
            total,
            realized,
            unrealized,
            total_per: percent_of(total, deposit),
            realized_per: percent_of(realized, deposit),
            unrealized_per: percent_of(unrealized, deposit),
        }
    }
}

fn percent_of(amount: Decimal, deposit: Decimal) -> Decimal {
    if deposit > Decimal::ZERO {
        Decimal::ONE_HUNDRED * amount / deposit
    } else {
        Decimal::ZERO
    }
}

/// Annualized yield of `total_per` earned between `midpoint` and `today`.
///
/// Absent until at least a year has passed, for a zero result, or when
/// the compounding is undefined (a loss of more than 100%).
pub fn annualized_yield(total_per: Decimal, midpoint: NaiveDate, today: NaiveDate) -> Option<Decimal> {
    let days = Decimal::from((today - midpoint).num_days());
    if days < DAYS_PER_YEAR || total_per.is_zero() {
        return None;
    }

    let growth = total_per / Decimal::ONE_HUNDRED + Decimal::ONE;
    if growth <= Decimal::ZERO {
        return None;
    }
    let years = days / DAYS_PER_YEAR;
    let apy = Decimal::ONE_HUNDRED * (growth.powd(Decimal::ONE / years) - Decimal::ONE);

    Some(apy.round_dp(4))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Value of one bucket: remaining capital plus its lots at the latest price
pub fn bucket_value(ledger: &LotLedger, bucket: &MonthBucket, dust: Decimal) -> Decimal {
    let mut value = bucket.capital;
    for lot in ledger.lots_in(bucket.month) {
        if lot.amount <= dust {
            continue;
        }
        match ledger.asset(&lot.asset).and_then(|a| a.latest_price) {
            Some(price) => value += lot.amount * price,
            None => warn!(
                "No price for {} ({} units in {}), valued at zero",
                lot.asset, lot.amount, bucket.month
            ),
        }
    }
    value
}

/// Build month and year statistics from a reconciled ledger
pub fn calculate_stats(ledger: &LotLedger, today: NaiveDate, dust: Decimal) -> StatsReport {
    let months = month_stats(ledger, today, dust);
    let years = year_stats(&months, today);
    debug!(
        "Calculated stats for {} months and {} years",
        months.len(),
        years.len()
    );
    StatsReport { months, years }
}

fn month_stats(ledger: &LotLedger, today: NaiveDate, dust: Decimal) -> Vec<MonthStats> {
    let current_month = first_of_month(today);
    let mut rows = Vec::new();

    let mut acc_deposit = Decimal::ZERO;
    let mut acc_value = Decimal::ZERO;
    let mut acc_withdrawal = Decimal::ZERO;
    let mut acc_net_deposit = Decimal::ZERO;
    let mut acc_total = Decimal::ZERO;
    let mut acc_realized = Decimal::ZERO;
    let mut acc_unrealized = Decimal::ZERO;

    for bucket in ledger.buckets() {
        let value = bucket_value(ledger, bucket, dust);
        let gl = GainLoss::derive(bucket.deposit, bucket.withdrawal, bucket.capital, value);
        let midpoint = bucket.month.with_day(15).unwrap_or(bucket.month);

        acc_deposit += bucket.deposit;
        acc_value += value;
        acc_withdrawal += bucket.withdrawal;
        let net_deposit = bucket.deposit - bucket.withdrawal;
        if net_deposit > Decimal::ZERO {
            acc_net_deposit += net_deposit;
        }
        acc_total += gl.total;
        acc_realized += gl.realized;
        acc_unrealized += gl.unrealized;

        let date = if bucket.month >= current_month {
            today
        } else {
            bucket.month
        };

        rows.push(PeriodStats {
            date,
            deposit: bucket.deposit,
            withdrawal: bucket.withdrawal,
            capital: bucket.capital,
            value,
            total_gainloss: gl.total,
            realized_gainloss: gl.realized,
            unrealized_gainloss: gl.unrealized,
            total_gainloss_per: gl.total_per,
            realized_gainloss_per: gl.realized_per,
            unrealized_gainloss_per: gl.unrealized_per,
            annual_per_yield: annualized_yield(gl.total_per, midpoint, today),
            acc_deposit,
            acc_value,
            acc_withdrawal,
            acc_net_deposit,
            acc_total_gainloss: acc_total,
            acc_realized_gainloss: acc_realized,
            acc_unrealized_gainloss: acc_unrealized,
        });
    }

    rows
}

#[derive(Default)]
struct YearTotals<'a> {
    deposit: Decimal,
    withdrawal: Decimal,
    capital: Decimal,
    value: Decimal,
    last_month: Option<&'a MonthStats>,
}

fn year_stats(months: &[MonthStats], today: NaiveDate) -> Vec<YearStats> {
    let mut totals: BTreeMap<NaiveDate, YearTotals> = BTreeMap::new();
    for month in months {
        let key = if month.date.year() < today.year() {
            NaiveDate::from_ymd_opt(month.date.year(), 12, 31).unwrap_or(month.date)
        } else {
            today
        };
        let entry = totals.entry(key).or_default();
        entry.deposit += month.deposit;
        entry.withdrawal += month.withdrawal;
        entry.capital += month.capital;
        entry.value += month.value;
        entry.last_month = Some(month);
    }

    let mut acc_net_deposit = Decimal::ZERO;
    let mut rows = Vec::with_capacity(totals.len());

    for (date, year) in totals {
        let Some(last) = year.last_month else {
            continue;
        };
        let gl = GainLoss::derive(year.deposit, year.withdrawal, year.capital, year.value);
        let midpoint = NaiveDate::from_ymd_opt(date.year(), 7, 1).unwrap_or(date);

        let net_deposit = year.deposit - year.withdrawal;
        if net_deposit > Decimal::ZERO {
            acc_net_deposit += net_deposit;
        }

        rows.push(PeriodStats {
            date,
            deposit: year.deposit,
            withdrawal: year.withdrawal,
            capital: year.capital,
            value: year.value,
            total_gainloss: gl.total,
            realized_gainloss: gl.realized,
            unrealized_gainloss: gl.unrealized,
            total_gainloss_per: gl.total_per,
            realized_gainloss_per: gl.realized_per,
            unrealized_gainloss_per: gl.unrealized_per,
            annual_per_yield: annualized_yield(gl.total_per, midpoint, today),
            acc_deposit: last.acc_deposit,
            acc_value: last.acc_value,
            acc_withdrawal: last.acc_withdrawal,
            acc_net_deposit,
            acc_total_gainloss: last.acc_total_gainloss,
            acc_realized_gainloss: last.acc_realized_gainloss,
            acc_unrealized_gainloss: last.acc_unrealized_gainloss,
        });
    }

    rows
}
