// Chart-ready series derived from stats rows

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use super::stats::{AccumulatedPoint, PeriodStats};

/// Stacked bar decomposition of each row.
///
/// `deposited` is the deposit net of withdrawals, realized gain and both
/// kinds of loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BarSeries {
    pub dates: Vec<NaiveDate>,
    pub deposited: Vec<Decimal>,
    pub withdrawn: Vec<Decimal>,
    pub realized_gain: Vec<Decimal>,
    pub realized_loss: Vec<Decimal>,
    pub unrealized_gain: Vec<Decimal>,
    pub unrealized_loss: Vec<Decimal>,
}

fn positive_part(x: Decimal) -> Decimal {
    x.max(Decimal::ZERO)
}

fn negative_part(x: Decimal) -> Decimal {
    (-x).max(Decimal::ZERO)
}

pub fn bar_series(rows: &[&PeriodStats]) -> BarSeries {
    let mut series = BarSeries::default();
    for row in rows {
        let realized_gain = positive_part(row.realized_gainloss);
        let realized_loss = negative_part(row.realized_gainloss);
        let unrealized_gain = positive_part(row.unrealized_gainloss);
        let unrealized_loss = negative_part(row.unrealized_gainloss);

        series.dates.push(row.date);
        series.deposited.push(
            row.deposit - realized_gain - unrealized_loss - realized_loss - row.withdrawal,
        );
        series.withdrawn.push(row.withdrawal);
        series.realized_gain.push(realized_gain);
        series.realized_loss.push(realized_loss);
        series.unrealized_gain.push(unrealized_gain);
        series.unrealized_loss.push(unrealized_loss);
    }
    series
}

/// Column view of accumulated points
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccumulatedSeries {
    pub dates: Vec<NaiveDate>,
    pub deposited: Vec<Decimal>,
    pub value: Vec<Decimal>,
    pub gainloss: Vec<Decimal>,
}

pub fn accumulated_series(points: &[AccumulatedPoint]) -> AccumulatedSeries {
    AccumulatedSeries {
        dates: points.iter().map(|p| p.date).collect(),
        deposited: points.iter().map(|p| p.deposit).collect(),
        value: points.iter().map(|p| p.value).collect(),
        gainloss: points.iter().map(|p| p.gainloss).collect(),
    }
}
