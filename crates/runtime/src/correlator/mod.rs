//! Pending-request table and peer link.
//!
//! # Lifecycle of a request
//!
//! 1. [`Correlator::send_request`] assigns a correlation id (unless the caller
//!    supplied one), records a pending entry, and hands the frame to the
//!    active peer's writer.
//! 2. The server feeds every inbound frame to [`Correlator::handle_inbound`],
//!    which matches it by id.
//! 3. The entry ends in exactly one terminal state: resolved, rejected by the
//!    peer, timed out, or swept when its connection closes.
//!
//! Presence in the table means *waiting*. Removing an entry under the lock is
//! the single authoritative transition: whoever removes it owns the verdict,
//! and the verdict is delivered while the lock is still held. A timer that
//! fires after a response claimed the entry therefore finds nothing to remove
//! and picks up the delivered response instead.

use std::collections::HashMap;
use std::time::Duration;

use devcss_protocol::ErrorCode;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

#[cfg(test)]
mod tests;

/// Identifies one accepted peer connection.
pub type ConnectionId = u64;

type Verdict = oneshot::Sender<Result<Value>>;

struct PeerLink {
	id: ConnectionId,
	outbound: mpsc::UnboundedSender<String>,
}

struct Pending {
	/// Distinguishes reuses of the same correlation id over time.
	ticket: u64,
	connection: ConnectionId,
	verdict: Verdict,
}

#[derive(Default)]
struct State {
	peer: Option<PeerLink>,
	pending: HashMap<String, Pending>,
	next_connection: ConnectionId,
	next_ticket: u64,
}

/// Multiplexes concurrent requests onto the single active peer connection.
pub struct Correlator {
	state: Mutex<State>,
	timeout: Duration,
}

impl Correlator {
	pub fn new(timeout: Duration) -> Self {
		Self {
			state: Mutex::new(State::default()),
			timeout,
		}
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Makes `outbound` the active peer and returns its connection id.
	///
	/// A previous peer is replaced without touching its in-flight requests;
	/// they settle through a late response, their timeout, or the old
	/// connection's [`detach_peer`](Self::detach_peer).
	pub fn attach_peer(&self, outbound: mpsc::UnboundedSender<String>) -> ConnectionId {
		let mut state = self.state.lock();
		state.next_connection += 1;
		let id = state.next_connection;
		if let Some(previous) = state.peer.replace(PeerLink { id, outbound }) {
			warn!(
				target = "devcss",
				previous = previous.id,
				connection = id,
				"Replacing existing extension connection"
			);
		}
		id
	}

	/// Handles the close of `connection`: rejects every request still pending
	/// on it with [`Error::ConnectionClosed`] and returns how many there were.
	pub fn detach_peer(&self, connection: ConnectionId) -> usize {
		let mut state = self.state.lock();
		if state.peer.as_ref().is_some_and(|peer| peer.id == connection) {
			state.peer = None;
		}

		let orphaned: Vec<String> = state
			.pending
			.iter()
			.filter(|(_, pending)| pending.connection == connection)
			.map(|(id, _)| id.clone())
			.collect();

		for id in &orphaned {
			if let Some(pending) = state.pending.remove(id) {
				let _ = pending.verdict.send(Err(Error::ConnectionClosed));
			}
		}

		if !orphaned.is_empty() {
			info!(
				target = "devcss",
				connection,
				rejected = orphaned.len(),
				"Rejected pending requests of closed connection"
			);
		}
		orphaned.len()
	}

	/// Drops the peer link and rejects everything still pending.
	pub fn shutdown(&self) {
		let mut state = self.state.lock();
		state.peer = None;
		for (_, pending) in state.pending.drain() {
			let _ = pending.verdict.send(Err(Error::ConnectionClosed));
		}
	}

	pub fn is_connected(&self) -> bool {
		self.state.lock().peer.is_some()
	}

	pub fn pending_count(&self) -> usize {
		self.state.lock().pending.len()
	}

	/// Sends a request envelope to the peer and waits for its response.
	///
	/// The envelope's `id` is used as correlation id when present (numbers
	/// are normalized to strings); otherwise a fresh UUID is assigned. The
	/// resolved value is the peer's whole response envelope.
	pub async fn send_request(&self, payload: Value) -> Result<Value> {
		let Value::Object(mut envelope) = payload else {
			return Err(Error::InvalidPayload(
				"request must be a JSON object".to_string(),
			));
		};

		let id = correlation_id(&envelope).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
		envelope.insert("id".to_string(), Value::String(id.clone()));
		let frame = serde_json::to_string(&envelope)?;

		let (tx, mut rx) = oneshot::channel();
		let (ticket, outbound) = {
			let mut state = self.state.lock();
			let (connection, outbound) = match state.peer.as_ref() {
				Some(peer) => (peer.id, peer.outbound.clone()),
				None => return Err(Error::NotConnected),
			};
			if state.pending.contains_key(&id) {
				return Err(Error::DuplicateRequestId(id));
			}
			state.next_ticket += 1;
			let ticket = state.next_ticket;
			state.pending.insert(
				id.clone(),
				Pending {
					ticket,
					connection,
					verdict: tx,
				},
			);
			(ticket, outbound)
		};

		let mut guard = PendingGuard {
			correlator: self,
			id: &id,
			ticket,
			armed: true,
		};

		if outbound.send(frame).is_err() {
			guard.disarm();
			self.remove_ticket(&id, ticket);
			return Err(Error::Transport(
				"extension socket writer has shut down".to_string(),
			));
		}
		debug!(target = "devcss", id = %id, "request sent to extension");

		let outcome = match tokio::time::timeout(self.timeout, &mut rx).await {
			Ok(Ok(outcome)) => outcome,
			Ok(Err(_)) => Err(Error::ConnectionClosed),
			Err(_) => {
				if self.remove_ticket(&id, ticket) {
					warn!(target = "devcss", id = %id, "request timed out");
					Err(Error::Timeout(self.timeout))
				} else {
					// A response claimed the entry as the timer fired; it was
					// delivered under the lock, so it is already in the channel.
					rx.try_recv().unwrap_or(Err(Error::ConnectionClosed))
				}
			}
		};

		guard.disarm();
		outcome
	}

	/// Routes one inbound text frame from the peer.
	///
	/// Frames that do not parse, carry no id, or match no pending request are
	/// logged and dropped.
	pub fn handle_inbound(&self, raw: &str) {
		let value: Value = match serde_json::from_str(raw) {
			Ok(value) => value,
			Err(err) => {
				warn!(target = "devcss", error = %err, "Failed to parse extension message");
				return;
			}
		};

		let Some(id) = value.as_object().and_then(correlation_id) else {
			warn!(target = "devcss", "Ignoring extension message without id");
			return;
		};

		let outcome = match remote_error(&value) {
			Some(err) => Err(err),
			None => Ok(value),
		};

		if !self.complete(&id, outcome) {
			warn!(target = "devcss", id = %id, "Received response with unknown id from extension");
		}
	}

	/// Delivers `outcome` to the request pending under `id`.
	///
	/// Returns `false` when nothing is pending under that id (already settled
	/// or never sent).
	pub fn complete(&self, id: &str, outcome: Result<Value>) -> bool {
		let mut state = self.state.lock();
		match state.pending.remove(id) {
			Some(pending) => {
				let _ = pending.verdict.send(outcome);
				true
			}
			None => false,
		}
	}

	fn remove_ticket(&self, id: &str, ticket: u64) -> bool {
		let mut state = self.state.lock();
		match state.pending.get(id) {
			Some(pending) if pending.ticket == ticket => {
				state.pending.remove(id);
				true
			}
			_ => false,
		}
	}
}

/// Removes the pending entry if the request future is dropped mid-flight.
struct PendingGuard<'a> {
	correlator: &'a Correlator,
	id: &'a str,
	ticket: u64,
	armed: bool,
}

impl PendingGuard<'_> {
	fn disarm(&mut self) {
		self.armed = false;
	}
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		if self.armed && self.correlator.remove_ticket(self.id, self.ticket) {
			debug!(target = "devcss", id = %self.id, "abandoned request removed");
		}
	}
}

fn correlation_id(envelope: &Map<String, Value>) -> Option<String> {
	match envelope.get("id")? {
		Value::String(id) if !id.is_empty() => Some(id.clone()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

fn remote_error(value: &Value) -> Option<Error> {
	let message = match value.get("error")? {
		Value::Null => return None,
		Value::String(message) => message.clone(),
		Value::Object(obj) => obj
			.get("message")
			.and_then(Value::as_str)
			.map(str::to_owned)
			.unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
		other => other.to_string(),
	};
	let code = value
		.get("code")
		.cloned()
		.and_then(|code| serde_json::from_value::<ErrorCode>(code).ok());
	Some(Error::Remote { message, code })
}
