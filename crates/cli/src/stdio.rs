//! Newline-delimited JSON tool front.
//!
//! Each input line is one request envelope. Requests are forwarded through
//! the [`Correlator`] concurrently, and every request produces exactly one
//! output line once its outcome is known, so output order follows completion
//! order rather than input order. Callers match lines by `id`.

use std::sync::Arc;

use devcss_protocol::{ErrorCode, ToolResponse};
use devcss_runtime::Correlator;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Serialize)]
#[serde(untagged)]
enum Reply {
	/// The peer's response envelope, passed through untouched.
	Peer(Value),
	Failed(ToolResponse),
}

/// Serves requests read from `input` until EOF, then waits for every
/// in-flight request to settle before returning.
pub async fn run_stdio<R, W>(correlator: Arc<Correlator>, input: R, mut output: W) -> Result<()>
where
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut lines = input.lines();
	let mut in_flight = JoinSet::new();
	let mut eof = false;

	loop {
		tokio::select! {
			line = lines.next_line(), if !eof => match line? {
				Some(line) if line.trim().is_empty() => {}
				Some(line) => match serde_json::from_str::<Value>(&line) {
					Ok(request) => {
						let correlator = Arc::clone(&correlator);
						in_flight.spawn(async move { forward(&correlator, request).await });
					}
					Err(err) => {
						warn!(target = "devcss", error = %err, "unparseable request line");
						let reply = ToolResponse::failure(
							None,
							ErrorCode::InvalidArgument,
							format!("Invalid request JSON: {err}"),
						);
						write_line(&mut output, &Reply::Failed(reply)).await?;
					}
				},
				None => {
					debug!(target = "devcss", pending = in_flight.len(), "stdin closed");
					eof = true;
				}
			},
			Some(joined) = in_flight.join_next() => match joined {
				Ok(reply) => write_line(&mut output, &reply).await?,
				Err(err) => warn!(target = "devcss", error = %err, "request task failed"),
			},
			else => break,
		}
	}

	Ok(())
}

async fn forward(correlator: &Correlator, request: Value) -> Reply {
	let id = request.get("id").and_then(|id| match id {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	});
	match correlator.send_request(request).await {
		Ok(response) => Reply::Peer(response),
		Err(err) => {
			debug!(target = "devcss", id = ?id, error = %err, "request failed");
			Reply::Failed(ToolResponse::failure(id, err.code(), err.to_string()))
		}
	}
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, reply: &Reply) -> Result<()> {
	let mut line = serde_json::to_vec(reply)?;
	line.push(b'\n');
	output.write_all(&line).await?;
	output.flush().await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use serde_json::json;
	use tokio::sync::mpsc;

	use super::*;

	fn parse_lines(output: &[u8]) -> Vec<Value> {
		std::str::from_utf8(output)
			.unwrap()
			.lines()
			.map(|line| serde_json::from_str(line).unwrap())
			.collect()
	}

	#[tokio::test]
	async fn without_peer_every_request_fails() {
		let correlator = Arc::new(Correlator::new(Duration::from_secs(1)));
		let input = b"{\"id\":\"a\",\"tool\":\"getTabs\"}\n\n{\"id\":2,\"tool\":\"getTabs\"}\n";
		let mut output = Vec::new();

		run_stdio(correlator, &input[..], &mut output).await.unwrap();

		let mut lines = parse_lines(&output);
		lines.sort_by_key(|line| line["id"].as_str().map(str::to_owned));
		assert_eq!(lines.len(), 2);
		assert_eq!(lines[0]["id"], "2");
		assert_eq!(lines[1]["id"], "a");
		assert!(lines.iter().all(|line| line["code"] == "NOT_CONNECTED"));
	}

	#[tokio::test]
	async fn malformed_lines_fail_without_id() {
		let correlator = Arc::new(Correlator::new(Duration::from_secs(1)));
		let mut output = Vec::new();

		run_stdio(correlator, &b"{oops\n[1,2]\n"[..], &mut output).await.unwrap();

		let lines = parse_lines(&output);
		assert_eq!(lines.len(), 2);
		assert!(lines.iter().all(|line| line.get("id").is_none()));
		assert!(lines.iter().all(|line| line["code"] == "INVALID_ARGUMENT"));
	}

	#[tokio::test]
	async fn peer_responses_pass_through() {
		let correlator = Arc::new(Correlator::new(Duration::from_secs(5)));
		let (tx, mut rx) = mpsc::unbounded_channel::<String>();
		correlator.attach_peer(tx);

		let peer = {
			let correlator = Arc::clone(&correlator);
			tokio::spawn(async move {
				for _ in 0..2 {
					let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
					let id = frame["id"].as_str().unwrap().to_string();
					let reply = if frame["tool"] == "getTabs" {
						json!({"id": id, "tabs": []})
					} else {
						json!({"id": id, "error": "Unknown tool: nope", "code": "UNKNOWN_TOOL"})
					};
					correlator.handle_inbound(&reply.to_string());
				}
			})
		};

		let input = b"{\"id\":\"t\",\"tool\":\"getTabs\"}\n{\"id\":\"n\",\"tool\":\"nope\"}\n";
		let mut output = Vec::new();
		run_stdio(Arc::clone(&correlator), &input[..], &mut output).await.unwrap();
		peer.await.unwrap();

		let mut lines = parse_lines(&output);
		lines.sort_by_key(|line| line["id"].as_str().map(str::to_owned));
		assert_eq!(lines[0], json!({"id": "n", "error": "Unknown tool: nope", "code": "UNKNOWN_TOOL"}));
		assert_eq!(lines[1], json!({"id": "t", "tabs": []}));
	}
}
