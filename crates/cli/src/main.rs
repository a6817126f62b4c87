use anyhow::Context;
use clap::Parser;
use devcss_cli::cli::Cli;
use devcss_cli::{commands, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	commands::dispatch(cli).await.context("devcss failed")
}
