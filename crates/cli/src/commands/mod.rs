mod health;
mod serve;

use crate::cli::{Cli, Commands};
use crate::config::BridgeConfig;
use crate::error::Result;

pub use health::check_health;
pub use serve::serve;

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command() {
		Commands::Serve(args) => serve(BridgeConfig::from(&args)).await,
		Commands::Health(args) => {
			let status = check_health(&BridgeConfig::from(&args)).await?;
			println!("{status}");
			Ok(())
		}
	}
}
