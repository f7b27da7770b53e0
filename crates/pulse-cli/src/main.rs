mod bootstrap_helpers;
mod cli_args;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is not an error; real environment variables win.
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();
    pulse_runtime::run_incident_relay(cli.into_runtime_config()).await
}
