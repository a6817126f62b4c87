use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand};
use devcss_protocol::{DEFAULT_HOST, DEFAULT_PORT, REQUEST_TIMEOUT};

fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(name = "devcss")]
#[command(about = "Bridge DOM and CSS inspection tools to a live browser tab")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Option<Commands>,
}

impl Cli {
	/// The subcommand to run; `serve` when none was given.
	pub fn command(&self) -> Commands {
		self.command
			.clone()
			.unwrap_or_else(|| Commands::Serve(ServeArgs::default()))
	}
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
	/// Serve tool requests from stdin through the browser peer (default)
	Serve(ServeArgs),
	/// Probe a running bridge's /health endpoint
	Health(HealthArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ServeArgs {
	/// Host to bind
	#[arg(long, default_value = DEFAULT_HOST)]
	pub host: String,
	/// Port the browser peer connects to
	#[arg(long, default_value_t = DEFAULT_PORT)]
	pub port: u16,
	/// How long a request waits for the peer's answer
	#[arg(long, value_name = "MS", default_value_t = REQUEST_TIMEOUT.as_millis() as u64)]
	pub timeout_ms: u64,
}

impl Default for ServeArgs {
	fn default() -> Self {
		Self {
			host: DEFAULT_HOST.to_string(),
			port: DEFAULT_PORT,
			timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
		}
	}
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct HealthArgs {
	#[arg(long, default_value = DEFAULT_HOST)]
	pub host: String,
	#[arg(long, default_value_t = DEFAULT_PORT)]
	pub port: u16,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serve_is_the_default_command() {
		let cli = Cli::try_parse_from(["devcss"]).unwrap();
		assert_eq!(cli.verbose, 0);
		assert_eq!(cli.command(), Commands::Serve(ServeArgs::default()));
	}

	#[test]
	fn parse_serve_options() {
		let cli = Cli::try_parse_from([
			"devcss", "-vv", "serve", "--host", "0.0.0.0", "--port", "3000", "--timeout-ms", "500",
		])
		.unwrap();
		assert_eq!(cli.verbose, 2);
		match cli.command() {
			Commands::Serve(args) => {
				assert_eq!(args.host, "0.0.0.0");
				assert_eq!(args.port, 3000);
				assert_eq!(args.timeout_ms, 500);
			}
			other => panic!("expected serve, got {other:?}"),
		}
	}

	#[test]
	fn serve_defaults_match_protocol() {
		let cli = Cli::try_parse_from(["devcss", "serve"]).unwrap();
		assert_eq!(cli.command(), Commands::Serve(ServeArgs::default()));
		assert_eq!(ServeArgs::default().timeout_ms, 30_000);
	}

	#[test]
	fn parse_health_command() {
		let cli = Cli::try_parse_from(["devcss", "health", "--port", "9444"]).unwrap();
		assert_eq!(
			cli.command(),
			Commands::Health(HealthArgs {
				host: "127.0.0.1".to_string(),
				port: 9444,
			})
		);
	}

	#[test]
	fn invalid_command_fails() {
		assert!(Cli::try_parse_from(["devcss", "inspect"]).is_err());
	}
}
