//! Command dispatcher
//!
//! Routes parsed clap commands to the tracker and prints the result either
//! as tables or as JSON.

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDate};
use colored::Colorize;
use serde_json::json;
use std::path::Path;
use tracing::{info, warn};

use crate::cli::{formatters, Commands};
use lotledger::config::Config;
use lotledger::error::ReconcileError;
use lotledger::importers::{self, SpecialCases};
use lotledger::pricing::AvanzaPriceSource;
use lotledger::reports::{Period, Scope};
use lotledger::tracker::Tracker;

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Route a parsed command to its handler
pub async fn dispatch_command(command: Commands, config: Config, json_output: bool) -> Result<()> {
    match command {
        Commands::Import {
            file,
            process,
            dry_run,
        } => {
            if dry_run {
                return dispatch_import_preview(&config, &file, json_output);
            }
            let mut tracker = Tracker::open(config)?;
            dispatch_import(&mut tracker, &file, json_output)?;
            if process {
                dispatch_process(&mut tracker, json_output)?;
            }
            Ok(())
        }
        Commands::Process => {
            let mut tracker = Tracker::open(config)?;
            dispatch_process(&mut tracker, json_output)
        }
        Commands::Reset => {
            let mut tracker = Tracker::open(config)?;
            tracker.reset_derived_state()?;
            if json_output {
                println!("{}", json!({ "reset": true }));
            } else {
                println!(
                    "{} Derived data cleared, all transactions marked unprocessed",
                    "✓".green().bold()
                );
            }
            Ok(())
        }
        Commands::UpdatePrices { force } => {
            let tracker = Tracker::open(config)?;
            dispatch_update_prices(&tracker, force, json_output).await
        }
        Commands::CalculateStats => {
            let mut tracker = Tracker::open(config)?;
            dispatch_calculate_stats(&mut tracker, json_output)
        }
        Commands::ShowStats {
            period,
            deposits,
            accumulated,
        } => {
            let tracker = Tracker::open(config)?;
            dispatch_show_stats(
                &tracker,
                period.into(),
                deposits.into(),
                accumulated,
                json_output,
            )
        }
        Commands::Status => {
            let location = config
                .database
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "~/.lotledger/data.db".to_string());
            let tracker = Tracker::open(config)?;
            let stats = tracker.db_stats()?;
            if json_output {
                println!("{}", formatters::to_json(&stats));
            } else {
                println!("{}", formatters::format_status(&stats, &location));
            }
            Ok(())
        }
        Commands::RunAll { file } => dispatch_run_all(config, file.as_deref(), json_output).await,
    }
}

/// Parse and classify without touching the database
fn dispatch_import_preview(config: &Config, file: &Path, json_output: bool) -> Result<()> {
    let rules = match &config.special_cases {
        Some(path) => Some(SpecialCases::load(path)?),
        None => None,
    };
    let rows = importers::import_file(file, rules.as_ref())?;

    if json_output {
        let preview: Vec<_> = rows
            .iter()
            .map(|row| {
                json!({
                    "date": row.raw.date,
                    "kind": row.kind.as_str(),
                    "category": row.raw.category,
                    "asset": row.raw.asset_name,
                    "quantity": row.raw.quantity,
                    "total_amount": row.raw.total_amount,
                })
            })
            .collect();
        println!("{}", formatters::to_json(&json!({ "dry_run": true, "rows": preview })));
    } else {
        println!("{}", formatters::format_import_preview(&rows));
        println!("\n{} Dry run - no changes saved", "ℹ".blue().bold());
    }
    Ok(())
}

fn dispatch_import(tracker: &mut Tracker, file: &Path, json_output: bool) -> Result<()> {
    let rows = tracker.preview_file(file)?;

    let added = tracker.ingest(&rows)?;
    if json_output {
        println!("{}", json!({ "found": rows.len(), "imported": added }));
    } else {
        println!("{}", formatters::format_import_preview(&rows));
        println!("{}", formatters::format_import_result(rows.len(), added));
    }
    Ok(())
}

fn dispatch_process(tracker: &mut Tracker, json_output: bool) -> Result<()> {
    match tracker.reconcile() {
        Ok(summary) => {
            if json_output {
                println!("{}", formatters::to_json(&summary));
            } else {
                println!("{}", formatters::format_reconcile_summary(&summary));
            }
            Ok(())
        }
        Err(err) => {
            if let ReconcileError::Deficit { unresolved } = &err {
                if json_output {
                    let ids: Vec<i64> = unresolved.iter().map(|tx| tx.id).collect();
                    println!("{}", json!({ "error": "deficit", "unresolved": ids }));
                } else {
                    println!("{}", formatters::format_deficit(unresolved));
                }
            }
            Err(err.into())
        }
    }
}

async fn dispatch_update_prices(tracker: &Tracker, force: bool, json_output: bool) -> Result<()> {
    if Config::offline() {
        info!("LOTLEDGER_OFFLINE is set, skipping price refresh");
        if json_output {
            println!("{}", json!({ "skipped": true, "offline": true }));
        } else {
            println!(
                "{} Offline mode - price refresh skipped",
                "ℹ".blue().bold()
            );
        }
        return Ok(());
    }

    let source = AvanzaPriceSource::new(&tracker.config().prices)
        .map_err(|e| anyhow!("Failed to build price client: {}", e))?;
    let report = tracker.update_prices(&source, force, today()).await?;

    if json_output {
        println!("{}", formatters::to_json(&report));
    } else {
        println!("{}", formatters::format_price_report(&report));
    }
    Ok(())
}

fn dispatch_calculate_stats(tracker: &mut Tracker, json_output: bool) -> Result<()> {
    let report = tracker.calculate_stats(today())?;
    if json_output {
        println!(
            "{}",
            json!({ "months": report.months.len(), "years": report.years.len() })
        );
    } else {
        println!(
            "{} Calculated statistics for {} months and {} years",
            "✓".green().bold(),
            report.months.len(),
            report.years.len()
        );
    }
    Ok(())
}

fn dispatch_show_stats(
    tracker: &Tracker,
    period: Period,
    scope: Scope,
    accumulated: bool,
    json_output: bool,
) -> Result<()> {
    if accumulated {
        let points = tracker.get_accumulated(period, scope)?;
        if json_output {
            println!("{}", formatters::format_accumulated_json(period, &points));
        } else {
            println!("{}", formatters::format_accumulated_table(period, &points));
        }
    } else {
        let rows = tracker.get_stats(period, scope)?;
        if json_output {
            println!("{}", formatters::format_stats_json(period, &rows));
        } else {
            println!("{}", formatters::format_stats_table(period, &rows));
        }
    }
    Ok(())
}

/// Every step runs even if an earlier one failed; the first failure is returned
async fn dispatch_run_all(config: Config, file: Option<&Path>, json_output: bool) -> Result<()> {
    let mut tracker = Tracker::open(config)?;
    let mut first_error: Option<anyhow::Error> = None;

    if let Some(file) = file {
        if let Err(e) = dispatch_import(&mut tracker, file, json_output) {
            warn!("Import failed: {:#}", e);
            first_error.get_or_insert(e);
        }
    }

    if let Err(e) = dispatch_process(&mut tracker, json_output) {
        warn!("Processing failed: {:#}", e);
        first_error.get_or_insert(e);
    }

    if let Err(e) = dispatch_update_prices(&tracker, false, json_output).await {
        warn!("Price refresh failed: {:#}", e);
        first_error.get_or_insert(e);
    }

    dispatch_calculate_stats(&mut tracker, json_output)?;
    if !json_output {
        dispatch_show_stats(&tracker, Period::Month, Scope::Current, false, false)?;
        dispatch_show_stats(&tracker, Period::Year, Scope::Current, false, false)?;
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
