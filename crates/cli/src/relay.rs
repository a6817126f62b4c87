//! The bridge's listening side: one port serving the browser peer's
//! WebSocket and a liveness endpoint.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use devcss_runtime::Correlator;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{CliError, Result};

/// A bound bridge listener, ready to [`serve`](Self::serve).
pub struct BridgeServer {
	listener: TcpListener,
	correlator: Arc<Correlator>,
}

impl BridgeServer {
	pub async fn bind(config: &BridgeConfig) -> Result<Self> {
		let addr = config.addr();
		let listener = TcpListener::bind((config.host.as_str(), config.port))
			.await
			.map_err(|source| CliError::Bind { addr, source })?;
		Ok(Self {
			listener,
			correlator: Arc::new(Correlator::new(config.request_timeout)),
		})
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		Ok(self.listener.local_addr()?)
	}

	pub fn correlator(&self) -> Arc<Correlator> {
		Arc::clone(&self.correlator)
	}

	/// Runs until `shutdown` resolves. Pending requests are rejected on the
	/// way out.
	pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
		let addr = self.local_addr()?;
		info!(target = "devcss", %addr, "bridge listening");

		let correlator = Arc::clone(&self.correlator);
		let result = axum::serve(self.listener, router(Arc::clone(&correlator)).into_make_service())
			.with_graceful_shutdown(shutdown)
			.await
			.map_err(CliError::Server);
		correlator.shutdown();
		result
	}
}

pub fn router(correlator: Arc<Correlator>) -> Router {
	Router::new()
		.route("/", get(peer_upgrade))
		.route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
		.fallback(|| async { StatusCode::NOT_FOUND })
		.with_state(correlator)
}

async fn peer_upgrade(
	State(correlator): State<Arc<Correlator>>,
	upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
	match upgrade {
		Ok(ws) => ws
			.on_upgrade(move |socket| handle_peer_socket(socket, correlator))
			.into_response(),
		Err(_) => StatusCode::NOT_FOUND.into_response(),
	}
}

async fn handle_peer_socket(socket: WebSocket, correlator: Arc<Correlator>) {
	let (tx, rx) = mpsc::unbounded_channel::<String>();
	let connection = correlator.attach_peer(tx);
	info!(target = "devcss", connection, "Extension connected");

	let mut rx_stream = UnboundedReceiverStream::new(rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(frame) = rx_stream.next().await {
			if ws_tx.send(Message::Text(frame.into())).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => {
				debug!(target = "devcss", connection, bytes = text.as_str().len(), "frame from extension");
				correlator.handle_inbound(text.as_str());
			}
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "devcss", connection, error = %err, "Extension websocket error");
				break;
			}
		}
	}

	let rejected = correlator.detach_peer(connection);
	send_task.abort();
	info!(target = "devcss", connection, rejected, "Extension disconnected");
}
