//! Output formatting module for CLI display
//!
//! Handlers compute, these functions only render.

use colored::Colorize;
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Style},
    Table, Tabled,
};

use lotledger::db::{DbStats, Transaction};
use lotledger::importers::ImportedRow;
use lotledger::pricing::PriceRefreshReport;
use lotledger::reports::{
    accumulated_series, bar_series, AccumulatedPoint, AccumulatedSeries, BarSeries, Period,
    PeriodStats,
};
use lotledger::tracker::ReconcileSummary;
use lotledger::utils::{format_amount, format_optional_percent, format_percent, format_sek};

const PREVIEW_ROWS: usize = 10;

/// Pretty JSON, or an error object if serialization fails
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!(r#"{{"error": "JSON serialization failed: {}"}}"#, e))
}

fn signed(value: Decimal, text: String) -> String {
    if value >= Decimal::ZERO {
        text.green().to_string()
    } else {
        text.red().to_string()
    }
}

pub fn format_import_preview(rows: &[ImportedRow]) -> String {
    #[derive(Tabled)]
    struct PreviewRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Asset")]
        asset: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Price")]
        price: String,
        #[tabled(rename = "Amount")]
        amount: String,
    }

    let preview: Vec<PreviewRow> = rows
        .iter()
        .take(PREVIEW_ROWS)
        .map(|row| PreviewRow {
            date: row.raw.date.to_string(),
            kind: row.kind.to_string(),
            asset: row.raw.asset_name.clone(),
            quantity: row.raw.quantity.normalize().to_string(),
            price: format_sek(row.raw.unit_price),
            amount: format_sek(row.raw.total_amount),
        })
        .collect();

    let mut output = format!(
        "\n{} Found {} transactions\n\n",
        "✓".green().bold(),
        rows.len()
    );
    let mut table = Table::new(&preview);
    table.with(Style::rounded());
    table.modify(Columns::new(3..), Alignment::right());
    output.push_str(&table.to_string());

    if rows.len() > PREVIEW_ROWS {
        output.push_str(&format!(
            "\n... and {} more transactions",
            rows.len() - PREVIEW_ROWS
        ));
    }
    output
}

pub fn format_import_result(found: usize, added: usize) -> String {
    let mut output = format!("\n{} Import complete!\n", "✓".green().bold());
    output.push_str(&format!("  Imported: {}\n", added.to_string().green()));
    if found > added {
        output.push_str(&format!(
            "  Skipped (duplicates): {}\n",
            (found - added).to_string().yellow()
        ));
    }
    output
}

pub fn format_reconcile_summary(summary: &ReconcileSummary) -> String {
    if summary.applied == 0 {
        return format!("{} Nothing to process", "ℹ".blue().bold());
    }
    format!(
        "{} Processed {} transactions in {} passes\n  Uninvested capital: {}",
        "✓".green().bold(),
        summary.applied,
        summary.passes,
        format_sek(summary.remaining_capital)
    )
}

/// Transactions left over by a failed reconciliation
pub fn format_deficit(unresolved: &[Transaction]) -> String {
    #[derive(Tabled)]
    struct StuckRow {
        #[tabled(rename = "Id")]
        id: i64,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Asset")]
        asset: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Amount")]
        amount: String,
    }

    let rows: Vec<StuckRow> = unresolved
        .iter()
        .map(|tx| StuckRow {
            id: tx.id,
            date: tx.date.to_string(),
            kind: tx.kind.to_string(),
            asset: tx.asset_name.clone(),
            quantity: tx.quantity.normalize().to_string(),
            amount: format_sek(tx.total_amount),
        })
        .collect();

    let mut output = format!(
        "\n{} {} transactions could not be covered by available capital or holdings.\n\
         Nothing was saved. Import the missing deposits or purchases and run again.\n\n",
        "✗".red().bold(),
        unresolved.len()
    );
    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    table.modify(Columns::new(4..), Alignment::right());
    output.push_str(&table.to_string());
    output
}

fn period_label(period: Period, row: &PeriodStats) -> String {
    match period {
        Period::Month => row.date.format("%Y-%m").to_string(),
        Period::Year => row.date.format("%Y").to_string(),
    }
}

pub fn format_stats_table(period: Period, rows: &[PeriodStats]) -> String {
    if rows.is_empty() {
        return format!(
            "{} No statistics stored. Run {} first.",
            "ℹ".blue().bold(),
            "calculate-stats".cyan()
        );
    }

    #[derive(Tabled)]
    struct StatsRow {
        #[tabled(rename = "Period")]
        period: String,
        #[tabled(rename = "Deposit")]
        deposit: String,
        #[tabled(rename = "Withdrawal")]
        withdrawal: String,
        #[tabled(rename = "Value")]
        value: String,
        #[tabled(rename = "Realized")]
        realized: String,
        #[tabled(rename = "Unrealized")]
        unrealized: String,
        #[tabled(rename = "Total")]
        total: String,
        #[tabled(rename = "Total %")]
        total_per: String,
        #[tabled(rename = "APY")]
        apy: String,
    }

    let table_rows: Vec<StatsRow> = rows
        .iter()
        .map(|row| StatsRow {
            period: period_label(period, row),
            deposit: format_amount(row.deposit),
            withdrawal: format_amount(row.withdrawal),
            value: format_amount(row.value),
            realized: signed(row.realized_gainloss, format_amount(row.realized_gainloss)),
            unrealized: signed(row.unrealized_gainloss, format_amount(row.unrealized_gainloss)),
            total: signed(row.total_gainloss, format_amount(row.total_gainloss)),
            total_per: signed(row.total_gainloss_per, format_percent(row.total_gainloss_per)),
            apy: format_optional_percent(row.annual_per_yield),
        })
        .collect();

    let mut table = Table::new(&table_rows);
    table.with(Style::rounded());
    table.modify(Columns::new(1..), Alignment::right());
    table.to_string()
}

pub fn format_accumulated_table(period: Period, points: &[AccumulatedPoint]) -> String {
    if points.is_empty() {
        return format!("{} No accumulated statistics", "ℹ".blue().bold());
    }

    #[derive(Tabled)]
    struct AccRow {
        #[tabled(rename = "Period")]
        period: String,
        #[tabled(rename = "Deposited")]
        deposited: String,
        #[tabled(rename = "Value")]
        value: String,
        #[tabled(rename = "Gain/Loss")]
        gainloss: String,
    }

    let rows: Vec<AccRow> = points
        .iter()
        .map(|p| AccRow {
            period: match period {
                Period::Month => p.date.format("%Y-%m").to_string(),
                Period::Year => p.date.format("%Y").to_string(),
            },
            deposited: format_amount(p.deposit),
            value: format_amount(p.value),
            gainloss: signed(p.gainloss, format_amount(p.gainloss)),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    table.modify(Columns::new(1..), Alignment::right());
    table.to_string()
}

/// Stats rows plus the stacked bar decomposition
pub fn format_stats_json(period: Period, rows: &[PeriodStats]) -> String {
    #[derive(Serialize)]
    struct JsonStats<'a> {
        period: &'static str,
        rows: &'a [PeriodStats],
        bars: BarSeries,
    }

    let refs: Vec<&PeriodStats> = rows.iter().collect();
    to_json(&JsonStats {
        period: period.as_str(),
        rows,
        bars: bar_series(&refs),
    })
}

pub fn format_accumulated_json(period: Period, points: &[AccumulatedPoint]) -> String {
    #[derive(Serialize)]
    struct JsonAccumulated {
        period: &'static str,
        series: AccumulatedSeries,
    }

    to_json(&JsonAccumulated {
        period: period.as_str(),
        series: accumulated_series(points),
    })
}

pub fn format_price_report(report: &PriceRefreshReport) -> String {
    if report.skipped {
        return format!(
            "{} Prices are up to date (use --force to refresh anyway)",
            "ℹ".blue().bold()
        );
    }

    let mut output = format!(
        "{} Updated {} prices\n",
        "✓".green().bold(),
        report.updated.len()
    );
    for (asset, price) in &report.updated {
        output.push_str(&format!("  {:<30} {}\n", asset, format_sek(*price)));
    }
    if !report.failed.is_empty() {
        output.push_str(&format!(
            "{} {} lookups failed\n",
            "⚠".yellow().bold(),
            report.failed.len()
        ));
        for (asset, reason) in &report.failed {
            output.push_str(&format!("  {:<30} {}\n", asset, reason.bright_black()));
        }
    }
    output
}

pub fn format_status(stats: &DbStats, location: &str) -> String {
    let mut output = format!("\n{} Database: {}\n", "📊".cyan().bold(), location);
    output.push_str(&format!("{:<24} {}\n", "Transactions:".bold(), stats.transactions));
    output.push_str(&format!("{:<24} {}\n", "  processed:", stats.processed));
    let pending = if stats.unprocessed > 0 {
        stats.unprocessed.to_string().yellow().to_string()
    } else {
        stats.unprocessed.to_string()
    };
    output.push_str(&format!("{:<24} {}\n", "  unprocessed:", pending));
    output.push_str(&format!("{:<24} {}\n", "Assets:".bold(), stats.assets));
    output.push_str(&format!(
        "{:<24} {}\n",
        "Uninvested capital:".bold(),
        format_sek(stats.capital)
    ));
    output.push_str(&format!("{:<24} {}\n", "Tables:".bold(), stats.tables));
    output
}
