//! topicharvest CLI: topic-driven web text harvesting.
//!
//! Searches the web for each topic, fetches the result pages politely, and
//! writes the extracted main text to a resumable JSONL dataset.

mod commands;
mod topics;

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
