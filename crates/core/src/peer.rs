//! Peer connection to the bridge socket.
//!
//! The browser side dials the bridge, not the other way round. Every text
//! frame it receives is a tool request; each one is handled on its own task so
//! a slow attach never holds up other tabs, and responses are funnelled back
//! through a single writer.

use std::sync::Arc;
use std::time::Duration;

use devcss_protocol::{DEFAULT_HOST, DEFAULT_PORT};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::dispatch::ToolHost;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
	pub host: String,
	pub port: u16,
	/// Keep dialing after the bridge goes away.
	pub reconnect: bool,
	pub reconnect_interval: Duration,
	/// How often dead uid bindings are swept from the registry.
	pub sweep_interval: Duration,
}

impl Default for PeerConfig {
	fn default() -> Self {
		Self {
			host: DEFAULT_HOST.to_string(),
			port: DEFAULT_PORT,
			reconnect: true,
			reconnect_interval: Duration::from_millis(2000),
			sweep_interval: Duration::from_secs(60),
		}
	}
}

impl PeerConfig {
	pub fn url(&self) -> String {
		format!("ws://{}:{}/", self.host, self.port)
	}
}

/// Serves tool requests from the bridge until the connection ends.
///
/// With [`PeerConfig::reconnect`] set this never returns: failed dials and
/// dropped connections are retried every `reconnect_interval`. Otherwise the
/// result of the single connection is returned.
pub async fn run_peer(config: PeerConfig, host: Arc<ToolHost>) -> Result<()> {
	loop {
		let result = serve_connection(&config, &host).await;
		match &result {
			Ok(()) => info!(target = "devcss", url = %config.url(), "bridge connection closed"),
			Err(err) => warn!(target = "devcss", url = %config.url(), error = %err, "bridge connection failed"),
		}
		if !config.reconnect {
			return result;
		}
		tokio::time::sleep(config.reconnect_interval).await;
	}
}

async fn serve_connection(config: &PeerConfig, host: &Arc<ToolHost>) -> Result<()> {
	let url = config.url();
	let (stream, _) = connect_async(url.as_str()).await?;
	info!(target = "devcss", url = %url, "connected to bridge");

	let (mut sink, mut frames) = stream.split();
	let (tx, mut rx) = mpsc::unbounded_channel::<String>();
	let mut sweep = tokio::time::interval_at(Instant::now() + config.sweep_interval, config.sweep_interval);
	sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			frame = frames.next() => match frame {
				Some(Ok(Message::Text(text))) => {
					let host = Arc::clone(host);
					let tx = tx.clone();
					tokio::spawn(async move {
						let response = host.handle_frame(&text).await;
						match serde_json::to_string(&response) {
							Ok(json) => {
								let _ = tx.send(json);
							}
							Err(err) => warn!(target = "devcss", error = %err, "failed to encode response"),
						}
					});
				}
				Some(Ok(Message::Close(_))) | None => break,
				Some(Ok(_)) => {}
				Some(Err(err)) => return Err(err.into()),
			},
			Some(json) = rx.recv() => {
				debug!(target = "devcss", bytes = json.len(), "sending response");
				sink.send(Message::Text(json)).await?;
			}
			_ = sweep.tick() => {
				let removed = host.registry().sweep();
				if removed > 0 {
					debug!(target = "devcss", removed, "swept stale node uids");
				}
			}
		}
	}

	Ok(())
}
