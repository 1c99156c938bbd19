use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use lotledger::reports::{Period, Scope};

pub mod formatters;

#[derive(Parser)]
#[command(name = "lotledger")]
#[command(
    version,
    about = "Brokerage transaction reconciler with monthly capital lots"
)]
#[command(
    long_about = "Import broker exports, attribute every krona and share to the month it was deposited, and report realized and unrealized gain/loss per month and year."
)]
pub struct Cli {
    /// Path to a config.toml (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database (overrides config and LOTLEDGER_DB)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Disable colorized/ANSI output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import transactions from a broker CSV export
    Import {
        /// Path to the CSV file
        file: PathBuf,

        /// Reconcile right after importing
        #[arg(short, long)]
        process: bool,

        /// Preview only, don't save to database
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Reconcile all unprocessed transactions
    Process,

    /// Clear derived tables and mark every transaction unprocessed
    Reset,

    /// Fetch latest prices for held assets
    UpdatePrices {
        /// Fetch even if prices are fresh
        #[arg(short, long)]
        force: bool,
    },

    /// Recompute month and year statistics
    CalculateStats,

    /// Show stored statistics
    ShowStats {
        #[arg(long, value_enum, default_value_t = PeriodArg::Month)]
        period: PeriodArg,

        /// `current` shows periods still holding value, `all` every period
        #[arg(long, value_enum, default_value_t = ScopeArg::Current)]
        deposits: ScopeArg,

        /// Show accumulated series instead of per period rows
        #[arg(long)]
        accumulated: bool,
    },

    /// Show database status
    Status,

    /// Import (optional), process, update prices and calculate stats
    RunAll {
        /// CSV export to import first
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PeriodArg {
    Month,
    Year,
}

impl From<PeriodArg> for Period {
    fn from(arg: PeriodArg) -> Self {
        match arg {
            PeriodArg::Month => Period::Month,
            PeriodArg::Year => Period::Year,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    Current,
    All,
}

impl From<ScopeArg> for Scope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Current => Scope::Current,
            ScopeArg::All => Scope::All,
        }
    }
}
