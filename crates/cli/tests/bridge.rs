//! Integration tests for the bridge server.
//!
//! Each test binds a real bridge on an ephemeral port, connects peers over
//! WebSocket and drives requests through the bridge's correlator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use devcss::testing::{FakeDebugger, FakePage};
use devcss::{Debugger, NodeRegistry, PeerConfig, SessionManager, ToolHost};
use devcss_cli::{BridgeConfig, BridgeServer};
use devcss_protocol::ErrorCode;
use devcss_runtime::{Correlator, Error};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

type PeerSocket =
	tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Bridge {
	addr: SocketAddr,
	correlator: Arc<Correlator>,
	stop: Option<oneshot::Sender<()>>,
	task: JoinHandle<devcss_cli::Result<()>>,
}

impl Drop for Bridge {
	fn drop(&mut self) {
		if let Some(stop) = self.stop.take() {
			let _ = stop.send(());
		}
		self.task.abort();
	}
}

async fn start_bridge(timeout: Duration) -> Bridge {
	let config = BridgeConfig {
		port: 0,
		request_timeout: timeout,
		..Default::default()
	};
	let server = BridgeServer::bind(&config).await.unwrap();
	let addr = server.local_addr().unwrap();
	let correlator = server.correlator();
	let (stop, stopped) = oneshot::channel::<()>();
	let task = tokio::spawn(server.serve(async move {
		let _ = stopped.await;
	}));
	Bridge {
		addr,
		correlator,
		stop: Some(stop),
		task,
	}
}

async fn ws_connect(addr: SocketAddr) -> PeerSocket {
	let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
		.await
		.expect("Failed to connect to bridge");
	ws
}

async fn wait_connected(correlator: &Correlator, connected: bool) {
	for _ in 0..250 {
		if correlator.is_connected() == connected {
			return;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	panic!("peer connected state never became {connected}");
}

async fn send_json(ws: &mut PeerSocket, value: Value) {
	ws.send(Message::Text(value.to_string()))
		.await
		.expect("Failed to send message");
}

async fn recv_json_timeout(ws: &mut PeerSocket, timeout_ms: u64) -> Option<Value> {
	let recv = async {
		loop {
			match ws.next().await {
				Some(Ok(Message::Text(text))) => {
					return serde_json::from_str::<Value>(&text).expect("Failed to parse JSON from bridge");
				}
				Some(Ok(Message::Close(_))) | None => panic!("WebSocket closed unexpectedly"),
				Some(Err(e)) => panic!("WebSocket error: {e}"),
				_ => continue,
			}
		}
	};
	tokio::time::timeout(Duration::from_millis(timeout_ms), recv).await.ok()
}

fn spawn_request(correlator: &Arc<Correlator>, payload: Value) -> JoinHandle<devcss_runtime::Result<Value>> {
	let correlator = Arc::clone(correlator);
	tokio::spawn(async move { correlator.send_request(payload).await })
}

#[tokio::test]
async fn health_endpoint_and_fallback() {
	let bridge = start_bridge(Duration::from_secs(5)).await;
	let base = format!("http://{}", bridge.addr);

	let health = reqwest::get(format!("{base}/health")).await.unwrap();
	assert_eq!(health.status(), 200);
	assert_eq!(health.json::<Value>().await.unwrap(), json!({"status": "ok"}));

	assert_eq!(reqwest::get(format!("{base}/nope")).await.unwrap().status(), 404);
	assert_eq!(reqwest::get(format!("{base}/")).await.unwrap().status(), 404);

	let config = BridgeConfig {
		host: bridge.addr.ip().to_string(),
		port: bridge.addr.port(),
		..Default::default()
	};
	assert_eq!(devcss_cli::commands::check_health(&config).await.unwrap(), "ok");
}

#[tokio::test]
async fn request_without_peer_is_not_connected() {
	let bridge = start_bridge(Duration::from_secs(5)).await;
	let err = bridge
		.correlator
		.send_request(json!({"tool": "getTabs"}))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::NotConnected));
	assert_eq!(err.code(), ErrorCode::NotConnected);
}

#[tokio::test]
async fn responses_route_by_id() {
	let bridge = start_bridge(Duration::from_secs(5)).await;
	let mut peer = ws_connect(bridge.addr).await;
	wait_connected(&bridge.correlator, true).await;

	let first = spawn_request(&bridge.correlator, json!({"id": "r1", "tool": "getTabs"}));
	let second = spawn_request(&bridge.correlator, json!({"id": "r2", "tool": "getTabs"}));

	let mut ids = Vec::new();
	for _ in 0..2 {
		let frame = recv_json_timeout(&mut peer, 3000).await.expect("request frame");
		assert_eq!(frame["tool"], "getTabs");
		ids.push(frame["id"].as_str().unwrap().to_string());
	}
	ids.sort();
	assert_eq!(ids, ["r1", "r2"]);

	send_json(&mut peer, json!({"id": "r2", "tabs": [{"id": 2}]})).await;
	send_json(&mut peer, json!({"id": "unknown", "tabs": []})).await;
	send_json(&mut peer, json!({"id": "r1", "error": "Node not found for uid: div_9", "code": "INVALID_NODE"})).await;

	let second = second.await.unwrap().unwrap();
	assert_eq!(second["tabs"][0]["id"], 2);
	match first.await.unwrap().unwrap_err() {
		Error::Remote { message, code } => {
			assert_eq!(message, "Node not found for uid: div_9");
			assert_eq!(code, Some(ErrorCode::InvalidNode));
		}
		other => panic!("expected remote error, got {other:?}"),
	}
	assert_eq!(bridge.correlator.pending_count(), 0);
}

#[tokio::test]
async fn peer_disconnect_rejects_pending_requests() {
	let bridge = start_bridge(Duration::from_secs(10)).await;
	let mut peer = ws_connect(bridge.addr).await;
	wait_connected(&bridge.correlator, true).await;

	let requests: Vec<_> = (0..3)
		.map(|n| spawn_request(&bridge.correlator, json!({"id": n, "tool": "getTabs"})))
		.collect();
	for _ in 0..3 {
		recv_json_timeout(&mut peer, 3000).await.expect("request frame");
	}

	peer.close(None).await.unwrap();
	drop(peer);

	for request in requests {
		let err = request.await.unwrap().unwrap_err();
		assert!(matches!(err, Error::ConnectionClosed), "{err:?}");
	}
	wait_connected(&bridge.correlator, false).await;
	assert_eq!(bridge.correlator.pending_count(), 0);
}

#[tokio::test]
async fn silent_peer_times_out() {
	let bridge = start_bridge(Duration::from_millis(200)).await;
	let mut peer = ws_connect(bridge.addr).await;
	wait_connected(&bridge.correlator, true).await;

	let request = spawn_request(&bridge.correlator, json!({"id": "slow", "tool": "getTabs"}));
	recv_json_timeout(&mut peer, 3000).await.expect("request frame");

	let err = request.await.unwrap().unwrap_err();
	assert_eq!(err.to_string(), "Request timeout after 200ms");
	assert_eq!(err.code(), ErrorCode::Timeout);

	send_json(&mut peer, json!({"id": "slow", "tabs": []})).await;
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_eq!(bridge.correlator.pending_count(), 0);
}

#[tokio::test]
async fn newer_peer_takes_over() {
	let bridge = start_bridge(Duration::from_secs(5)).await;
	let _old = ws_connect(bridge.addr).await;
	wait_connected(&bridge.correlator, true).await;
	let mut new = ws_connect(bridge.addr).await;
	tokio::time::sleep(Duration::from_millis(100)).await;

	let request = spawn_request(&bridge.correlator, json!({"id": "x", "tool": "getTabs"}));
	let frame = recv_json_timeout(&mut new, 3000).await.expect("request on newest peer");
	assert_eq!(frame["id"], "x");
	send_json(&mut new, json!({"id": "x", "tabs": []})).await;
	assert_eq!(request.await.unwrap().unwrap()["tabs"], json!([]));
}

#[tokio::test]
async fn end_to_end_with_browser_peer() {
	let bridge = start_bridge(Duration::from_secs(5)).await;

	let debugger = FakeDebugger::new().with_tab(7, "https://fixture.test/", FakePage::simple());
	let sessions = Arc::new(SessionManager::new(Arc::new(debugger) as Arc<dyn Debugger>));
	let host = Arc::new(ToolHost::new(sessions, Arc::new(NodeRegistry::new())));
	let config = PeerConfig {
		port: bridge.addr.port(),
		reconnect: false,
		..Default::default()
	};
	let peer = tokio::spawn(devcss::run_peer(config, host));
	wait_connected(&bridge.correlator, true).await;

	let nodes = bridge
		.correlator
		.send_request(json!({"id": 1, "tool": "getNodes", "expression": "document.querySelectorAll('.card')"}))
		.await
		.unwrap();
	assert_eq!(nodes["id"], "1");
	assert_eq!(nodes["nodes"][0]["uid"], "div_0");
	assert_eq!(nodes["nodes"][1]["uid"], "div_1");

	let html = bridge
		.correlator
		.send_request(json!({"tool": "getOuterHTML", "uid": "div_1"}))
		.await
		.unwrap();
	assert_eq!(html["outerHTML"], "<div class=\"card\">Second</div>");

	let computed = bridge
		.correlator
		.send_request(json!({"tool": "getComputedStyle", "uid": "div_0", "properties": ["color"]}))
		.await
		.unwrap();
	assert_eq!(computed["styles"], json!({"color": "blue"}));

	let err = bridge
		.correlator
		.send_request(json!({"id": "bad", "tool": "getComputedStyle", "uid": "div_99"}))
		.await
		.unwrap_err();
	assert_eq!(err.to_string(), "Node not found for uid: div_99");
	assert_eq!(err.code(), ErrorCode::InvalidNode);

	let err = bridge
		.correlator
		.send_request(json!({"tool": "getCookies"}))
		.await
		.unwrap_err();
	assert_eq!(err.to_string(), "Unknown tool: getCookies");

	peer.abort();
}
