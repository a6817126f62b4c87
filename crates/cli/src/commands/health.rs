use serde_json::Value;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::{CliError, Result};

/// Probes the bridge's liveness endpoint and returns its `status` field.
pub async fn check_health(config: &BridgeConfig) -> Result<String> {
	let url = config.health_url();
	debug!(target = "devcss", url = %url, "checking bridge health");

	let response = reqwest::get(&url).await.map_err(|source| CliError::Health {
		url: url.clone(),
		source,
	})?;
	let status = response.status();
	if !status.is_success() {
		return Err(CliError::Unhealthy {
			url,
			detail: format!("HTTP {status}"),
		});
	}

	let body: Value = response.json().await.map_err(|source| CliError::Health {
		url: url.clone(),
		source,
	})?;
	match body.get("status").and_then(Value::as_str) {
		Some("ok") => Ok("ok".to_string()),
		Some(other) => Err(CliError::Unhealthy {
			url,
			detail: format!("status {other:?}"),
		}),
		None => Err(CliError::Unhealthy {
			url,
			detail: format!("unexpected body {body}"),
		}),
	}
}
