use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the stderr subscriber. Stdout carries tool responses and never
/// sees log output.
pub fn init_logging(verbosity: u8) {
	// 0 = warnings only (dropped frames, replaced peers)
	// 1 (-v) = connection lifecycle
	// 2+ (-vv) = per-request traffic
	let filter = match verbosity {
		0 => "warn",
		1 => "info,tungstenite=warn,tokio_tungstenite=warn",
		_ => "debug,hyper=info,reqwest=info",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_ansi(false)
		.compact()
		.init();
}
