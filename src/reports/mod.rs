// Reports module - gain/loss statistics and chart series

pub mod series;
pub mod stats;

pub use series::{accumulated_series, bar_series, AccumulatedSeries, BarSeries};
pub use stats::{
    annualized_yield, calculate_stats, AccumulatedPoint, GainLoss, MonthStats, Period,
    PeriodStats, Scope, StatsReport, YearStats,
};
