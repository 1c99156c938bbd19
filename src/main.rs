mod cli;
mod dispatcher;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use lotledger::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so --json output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.no_color || cli.json {
        colored::control::set_override(false);
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.database {
        config.database = Some(db);
    }

    dispatcher::dispatch_command(cli.command, config, cli.json).await
}
