use tracing_subscriber::EnvFilter;

pub fn init_logging(verbosity: u8) {
	// 0 = operational info, 1 (-v) = broker debug, 2+ (-vv) = everything
	let filter = match verbosity {
		0 => "info",
		1 => "info,drover=debug,drover_server=debug",
		_ => "trace",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
