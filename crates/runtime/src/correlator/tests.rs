use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::*;

fn connected() -> (Arc<Correlator>, mpsc::UnboundedReceiver<String>, ConnectionId) {
	let correlator = Arc::new(Correlator::new(Duration::from_secs(30)));
	let (tx, rx) = mpsc::unbounded_channel();
	let connection = correlator.attach_peer(tx);
	(correlator, rx, connection)
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
	let frame = rx.recv().await.expect("peer writer closed");
	serde_json::from_str(&frame).unwrap()
}

fn spawn_request(
	correlator: &Arc<Correlator>,
	payload: Value,
) -> tokio::task::JoinHandle<Result<Value>> {
	let correlator = Arc::clone(correlator);
	tokio::spawn(async move { correlator.send_request(payload).await })
}

async fn wait_for_pending(correlator: &Correlator, count: usize) {
	while correlator.pending_count() < count {
		tokio::task::yield_now().await;
	}
}

#[tokio::test]
async fn send_without_peer_fails_not_connected() {
	let correlator = Correlator::new(Duration::from_secs(30));
	let err = correlator
		.send_request(json!({"tool": "getTabs"}))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::NotConnected));
	assert_eq!(err.code(), ErrorCode::NotConnected);
	assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn missing_id_is_assigned() {
	let (correlator, mut rx, _) = connected();
	let handle = spawn_request(&correlator, json!({"tool": "getTabs"}));

	let frame = next_frame(&mut rx).await;
	let id = frame["id"].as_str().expect("id assigned").to_string();
	assert!(!id.is_empty());
	assert_eq!(frame["tool"], "getTabs");

	correlator.handle_inbound(&json!({"id": id, "tabs": []}).to_string());
	let response = handle.await.unwrap().unwrap();
	assert_eq!(response["tabs"], json!([]));
	assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn caller_id_is_preserved_and_numbers_normalized() {
	let (correlator, mut rx, _) = connected();
	let handle = spawn_request(&correlator, json!({"tool": "getTabs", "id": 41}));

	let frame = next_frame(&mut rx).await;
	assert_eq!(frame["id"], "41");

	correlator.handle_inbound(r#"{"id": 41, "tabs": []}"#);
	assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn out_of_order_responses_resolve_their_own_requests() {
	let (correlator, mut rx, _) = connected();

	let handles: Vec<_> = (0..5)
		.map(|n| spawn_request(&correlator, json!({"tool": "getNodes", "id": format!("req-{n}")})))
		.collect();

	let mut ids = Vec::new();
	for _ in 0..5 {
		ids.push(next_frame(&mut rx).await["id"].as_str().unwrap().to_string());
	}
	assert_eq!(correlator.pending_count(), 5);

	for id in [3, 0, 4, 1, 2].map(|n| format!("req-{n}")) {
		correlator.handle_inbound(&json!({"id": id, "answer": id}).to_string());
	}

	for (n, handle) in handles.into_iter().enumerate() {
		let response = handle.await.unwrap().unwrap();
		assert_eq!(response["answer"], format!("req-{n}"));
	}
	assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn error_response_rejects_with_remote_error() {
	let (correlator, mut rx, _) = connected();
	let handle = spawn_request(&correlator, json!({"tool": "getOuterHTML", "id": "e1"}));
	next_frame(&mut rx).await;

	correlator.handle_inbound(
		r#"{"id": "e1", "error": "Node not found for uid: div_9", "code": "INVALID_NODE"}"#,
	);

	let err = handle.await.unwrap().unwrap_err();
	assert_eq!(err.to_string(), "Node not found for uid: div_9");
	assert_eq!(err.code(), ErrorCode::InvalidNode);
}

#[tokio::test(start_paused = true)]
async fn timeout_rejects_and_late_response_is_ignored() {
	let (correlator, mut rx, _) = connected();
	let handle = spawn_request(&correlator, json!({"tool": "getTabs", "id": "slow"}));
	next_frame(&mut rx).await;

	let err = handle.await.unwrap().unwrap_err();
	assert!(err.is_timeout());
	assert_eq!(err.to_string(), "Request timeout after 30000ms");
	assert_eq!(correlator.pending_count(), 0);

	assert!(!correlator.complete("slow", Ok(json!({"id": "slow"}))));
	correlator.handle_inbound(r#"{"id": "slow", "tabs": []}"#);
	assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn disconnect_rejects_every_pending_request() {
	let (correlator, mut rx, connection) = connected();
	let handles: Vec<_> = (0..4)
		.map(|n| spawn_request(&correlator, json!({"tool": "getTabs", "id": n})))
		.collect();
	for _ in 0..4 {
		next_frame(&mut rx).await;
	}

	assert_eq!(correlator.detach_peer(connection), 4);
	assert_eq!(correlator.pending_count(), 0);
	assert!(!correlator.is_connected());

	for handle in handles {
		assert!(matches!(handle.await.unwrap(), Err(Error::ConnectionClosed)));
	}
}

#[tokio::test]
async fn failed_send_removes_entry_immediately() {
	let (correlator, rx, _) = connected();
	drop(rx);

	let err = correlator
		.send_request(json!({"tool": "getTabs", "id": "x"}))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Transport(_)));
	assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn duplicate_pending_id_is_rejected() {
	let (correlator, mut rx, _) = connected();
	let first = spawn_request(&correlator, json!({"tool": "getTabs", "id": "dup"}));
	next_frame(&mut rx).await;

	let err = correlator
		.send_request(json!({"tool": "getTabs", "id": "dup"}))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::DuplicateRequestId(ref id) if id == "dup"));

	correlator.handle_inbound(r#"{"id": "dup", "tabs": [1]}"#);
	assert_eq!(first.await.unwrap().unwrap()["tabs"], json!([1]));
}

#[tokio::test]
async fn unmatched_and_malformed_frames_are_dropped() {
	let (correlator, mut rx, _) = connected();
	let handle = spawn_request(&correlator, json!({"tool": "getTabs", "id": "keep"}));
	next_frame(&mut rx).await;

	correlator.handle_inbound("not json");
	correlator.handle_inbound(r#"{"tabs": []}"#);
	correlator.handle_inbound(r#"{"id": "other", "tabs": []}"#);
	assert_eq!(correlator.pending_count(), 1);

	correlator.handle_inbound(r#"{"id": "keep", "tabs": []}"#);
	assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn replacing_peer_keeps_in_flight_requests() {
	let (correlator, mut old_rx, old_connection) = connected();
	let old_request = spawn_request(&correlator, json!({"tool": "getTabs", "id": "old"}));
	next_frame(&mut old_rx).await;

	let (tx, mut new_rx) = mpsc::unbounded_channel();
	let new_connection = correlator.attach_peer(tx);
	assert_ne!(old_connection, new_connection);
	assert_eq!(correlator.pending_count(), 1);

	let new_request = spawn_request(&correlator, json!({"tool": "getTabs", "id": "new"}));
	assert_eq!(next_frame(&mut new_rx).await["id"], "new");

	assert_eq!(correlator.detach_peer(old_connection), 1);
	assert!(correlator.is_connected());
	assert!(matches!(old_request.await.unwrap(), Err(Error::ConnectionClosed)));

	correlator.handle_inbound(r#"{"id": "new", "tabs": []}"#);
	assert!(new_request.await.unwrap().is_ok());
}

#[tokio::test]
async fn abandoned_request_is_removed_from_table() {
	let (correlator, mut rx, _) = connected();
	let handle = spawn_request(&correlator, json!({"tool": "getTabs", "id": "gone"}));
	next_frame(&mut rx).await;
	wait_for_pending(&correlator, 1).await;

	handle.abort();
	let _ = handle.await;
	assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn non_object_payload_is_rejected() {
	let (correlator, _rx, _) = connected();
	let err = correlator.send_request(json!(["getTabs"])).await.unwrap_err();
	assert!(matches!(err, Error::InvalidPayload(_)));
}
