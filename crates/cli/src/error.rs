use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("failed to bind bridge to {addr}")]
	Bind {
		addr: String,
		#[source]
		source: io::Error,
	},

	#[error("bridge server error")]
	Server(#[source] io::Error),

	#[error("health check against {url} failed")]
	Health {
		url: String,
		#[source]
		source: reqwest::Error,
	},

	#[error("bridge at {url} is unhealthy: {detail}")]
	Unhealthy { url: String, detail: String },

	#[error(transparent)]
	Io(#[from] io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
