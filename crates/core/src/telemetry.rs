use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global tracing subscriber.
///
/// The filter is taken from `RUST_LOG`, falling back to `info`. Safe to call
/// more than once; only the first call installs anything.
pub fn setup_logging() {
	INIT.call_once(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
		tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_target(true)
			.init();
	});
}

/// Logging setup for tests: compact output, never panics if a subscriber is
/// already installed.
pub fn testing_logging() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_test_writer()
		.compact()
		.try_init();
}
