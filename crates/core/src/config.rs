//! Broker configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Tunables for the broker service. All fields default sensibly; a JSON
/// config file may override any subset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
	/// Capability profile used when a request names none.
	pub default_browser: String,
	/// Execution-node endpoints for the default selector.
	pub nodes: Vec<String>,
	/// Hard cap on remote session creation.
	pub create_timeout_ms: u64,
	/// Hard cap on one liveness probe during a sweep.
	pub probe_timeout_ms: u64,
	/// Period of the background health sweep.
	pub sweep_interval_ms: u64,
	/// Upper bound on concurrent remote probes; sized independently of
	/// request concurrency so request volume cannot flood the nodes.
	pub probe_concurrency: usize,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			default_browser: "firefox".to_string(),
			nodes: vec!["http://localhost:4444/wd/hub".to_string()],
			create_timeout_ms: 20_000,
			probe_timeout_ms: 15_000,
			sweep_interval_ms: 5_000,
			probe_concurrency: 8,
		}
	}
}

impl BrokerConfig {
	/// Loads overrides from a JSON file.
	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path)?;
		Ok(serde_json::from_str(&raw)?)
	}

	pub fn create_timeout(&self) -> Duration {
		Duration::from_millis(self.create_timeout_ms)
	}

	pub fn probe_timeout(&self) -> Duration {
		Duration::from_millis(self.probe_timeout_ms)
	}

	pub fn sweep_interval(&self) -> Duration {
		Duration::from_millis(self.sweep_interval_ms)
	}
}
