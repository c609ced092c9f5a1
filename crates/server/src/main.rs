use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use drover::config::BrokerConfig;
use drover::service::BrokerService;
use drover_server::logging;
use drover_server::routes::build_router;

#[derive(Parser)]
#[command(name = "droverd", about = "Broker for pools of remote browser sessions", version)]
struct Args {
	/// Socket address to listen on.
	#[arg(long, default_value = "127.0.0.1:5000")]
	listen: SocketAddr,

	/// JSON config file; flags below override it.
	#[arg(long)]
	config: Option<PathBuf>,

	/// Execution-node endpoint (repeatable).
	#[arg(long = "node")]
	nodes: Vec<String>,

	/// Disable the background health sweep.
	#[arg(long)]
	no_sweep: bool,

	/// Increase log verbosity (-v, -vv).
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	logging::init_logging(args.verbose);

	let mut config = match &args.config {
		Some(path) => BrokerConfig::load(path).with_context(|| format!("failed to load config: {}", path.display()))?,
		None => BrokerConfig::default(),
	};
	if !args.nodes.is_empty() {
		config.nodes = args.nodes.clone();
	}

	let service = Arc::new(BrokerService::with_defaults(config));
	if !args.no_sweep {
		service.start_sweeper();
	}

	let listener = tokio::net::TcpListener::bind(args.listen)
		.await
		.with_context(|| format!("failed to bind {}", args.listen))?;
	info!(target = "drover.server", addr = %args.listen, "broker listening");

	let router = build_router(Arc::clone(&service));
	axum::serve(listener, router)
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("server error")?;

	service.shutdown().await;
	info!(target = "drover.server", "broker stopped");
	Ok(())
}

async fn shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};
		let mut sigterm = match signal(SignalKind::terminate()) {
			Ok(sigterm) => sigterm,
			Err(err) => {
				tracing::warn!(target = "drover.server", error = %err, "no SIGTERM handler, ctrl-c only");
				let _ = tokio::signal::ctrl_c().await;
				return;
			}
		};
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {}
			_ = sigterm.recv() => {}
		}
		info!(target = "drover.server", "shutdown signal received");
	}

	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
		info!(target = "drover.server", "shutdown signal received");
	}
}
