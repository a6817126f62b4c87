use std::time::Duration;

use devcss_protocol::{DEFAULT_HOST, DEFAULT_PORT, REQUEST_TIMEOUT};

use crate::cli::{HealthArgs, ServeArgs};

/// Where the bridge listens and how long a request may wait for the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
	pub host: String,
	/// `0` picks an ephemeral port.
	pub port: u16,
	pub request_timeout: Duration,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self {
			host: DEFAULT_HOST.to_string(),
			port: DEFAULT_PORT,
			request_timeout: REQUEST_TIMEOUT,
		}
	}
}

impl BridgeConfig {
	pub fn addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	pub fn health_url(&self) -> String {
		format!("http://{}/health", self.addr())
	}
}

impl From<&ServeArgs> for BridgeConfig {
	fn from(args: &ServeArgs) -> Self {
		Self {
			host: args.host.clone(),
			port: args.port,
			request_timeout: Duration::from_millis(args.timeout_ms),
		}
	}
}

impl From<&HealthArgs> for BridgeConfig {
	fn from(args: &HealthArgs) -> Self {
		Self {
			host: args.host.clone(),
			port: args.port,
			..Self::default()
		}
	}
}
