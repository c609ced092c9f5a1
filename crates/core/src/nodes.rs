//! Execution-node selection strategy.
//!
//! Implementations can source endpoints from anywhere (static list, cloud
//! provider API, service discovery); the broker only asks one question:
//! given these requirements, which node should host the session.

use async_trait::async_trait;

use crate::error::{DroverError, Result};
use crate::model::Requirements;

#[async_trait]
pub trait NodeSelector: Send + Sync {
	/// Returns an execution-node endpoint, e.g. `http://node-a:4444/wd/hub`,
	/// chosen for the given requirement set.
	async fn select_node(&self, req: &Requirements) -> Result<String>;
}

/// Round-robin over a fixed endpoint list.
pub struct StaticNodeSelector {
	endpoints: Vec<String>,
	next: std::sync::atomic::AtomicUsize,
}

impl StaticNodeSelector {
	pub fn new(endpoints: Vec<String>) -> Self {
		Self {
			endpoints,
			next: std::sync::atomic::AtomicUsize::new(0),
		}
	}

	/// Single local node, the conventional grid default.
	pub fn localhost() -> Self {
		Self::new(vec!["http://localhost:4444/wd/hub".to_string()])
	}
}

#[async_trait]
impl NodeSelector for StaticNodeSelector {
	async fn select_node(&self, _req: &Requirements) -> Result<String> {
		if self.endpoints.is_empty() {
			return Err(DroverError::Config("node selector has no endpoints configured".to_string()));
		}
		let idx = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
		Ok(self.endpoints[idx % self.endpoints.len()].clone())
	}
}
