//! aivis CLI: measure how visible a company is in AI answer engines.
//!
//! Seeds company knowledge, runs assessments against a conversational
//! answer engine, and reports scores, citations, and competitor standing.

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
