use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. `RUST_LOG` wins when set;
/// otherwise development environments default to debug output for this crate.
pub fn init(debug: bool) {
	let default_filter = if debug { "gating_engine=debug,info" } else { "info" };

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
		)
		.init();
}
