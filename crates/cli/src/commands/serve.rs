use std::time::Duration;

use tokio::io::BufReader;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::relay::BridgeServer;
use crate::stdio::run_stdio;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Runs the bridge until stdin closes.
pub async fn serve(config: BridgeConfig) -> Result<()> {
	let server = BridgeServer::bind(&config).await?;
	let correlator = server.correlator();
	let (stop_tx, stop_rx) = oneshot::channel::<()>();
	let mut server_task = tokio::spawn(server.serve(async move {
		let _ = stop_rx.await;
	}));

	let front = run_stdio(
		std::sync::Arc::clone(&correlator),
		BufReader::new(tokio::io::stdin()),
		tokio::io::stdout(),
	);

	let result = tokio::select! {
		result = front => {
			info!(target = "devcss", "stdin closed, shutting down");
			result
		}
		joined = &mut server_task => {
			return match joined {
				Ok(result) => result,
				Err(err) => Err(std::io::Error::other(err).into()),
			};
		}
	};

	correlator.shutdown();
	let _ = stop_tx.send(());
	match tokio::time::timeout(SHUTDOWN_GRACE, &mut server_task).await {
		Ok(Ok(Err(err))) => warn!(target = "devcss", error = %err, "bridge server stopped with an error"),
		Ok(_) => {}
		Err(_) => {
			warn!(target = "devcss", "bridge server did not stop in time");
			server_task.abort();
		}
	}
	result
}
