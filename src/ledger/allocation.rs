//! Settlement bucket allocation
//!
//! Transactions made during the first days of a month are attributed to the
//! previous month's capital pool, modelling the settlement lag between a
//! deposit arriving and the money being invested.

use chrono::{Datelike, NaiveDate};

use crate::config::DEFAULT_CUTOFF_DAY;

/// Map a transaction date to its bucket using the default cutoff day
pub fn allocate_to_month(date: NaiveDate) -> NaiveDate {
    allocate_with_cutoff(date, DEFAULT_CUTOFF_DAY)
}

/// Map a transaction date to the last day of its settlement month.
///
/// Days `1..=cutoff_day` belong to the previous calendar month, later days to
/// the current one.
pub fn allocate_with_cutoff(date: NaiveDate, cutoff_day: u32) -> NaiveDate {
    let (year, month) = if date.day() <= cutoff_day {
        if date.month() > 1 {
            (date.year(), date.month() - 1)
        } else {
            (date.year() - 1, 12)
        }
    } else {
        (date.year(), date.month())
    };

    last_day_of_month(year, month)
}

/// Last calendar day of the given month
pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    // The first day of any month in chrono's supported range exists
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}
