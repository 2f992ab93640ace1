//! Turn/IP CLI: generate the industrial protocol catalog.
//!
//! Reads protocol records from the local record store and publishes them as
//! a markdown catalog with a table of contents.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
