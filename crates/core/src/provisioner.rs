//! Remote session provisioning and teardown.
//!
//! Every remote round-trip here runs under a permit from the shared
//! remote-call pool and a hard deadline, so a hanging node can neither
//! starve request handling nor wedge a create forever.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::error::{DroverError, Result};
use crate::model::{Requirements, SessionRecord, SessionView};
use crate::nodes::NodeSelector;
use crate::registry::Registry;
use crate::remote::RemoteDriver;

pub struct Provisioner {
	registry: Registry,
	driver: Arc<dyn RemoteDriver>,
	selector: Arc<dyn NodeSelector>,
	config: BrokerConfig,
	/// Shared bound on in-flight remote calls (provisioning and probes).
	remote_pool: Arc<Semaphore>,
}

impl Provisioner {
	pub fn new(
		registry: Registry,
		driver: Arc<dyn RemoteDriver>,
		selector: Arc<dyn NodeSelector>,
		config: BrokerConfig,
		remote_pool: Arc<Semaphore>,
	) -> Self {
		Self {
			registry,
			driver,
			selector,
			config,
			remote_pool,
		}
	}

	/// Provisions a fresh remote session for `req` and registers it.
	///
	/// The record is written only after the node confirmed the session; the
	/// stored node address is the resolved one the driver reports, which can
	/// differ from the requested alias. An initial navigation, when asked
	/// for, is dispatched without blocking the response.
	pub async fn create_session(&self, req: &Requirements) -> Result<SessionView> {
		let browser_name = req
			.browser_name
			.clone()
			.unwrap_or_else(|| self.config.default_browser.clone());
		let node = match &req.node {
			Some(node) => node.clone(),
			None => self.selector.select_node(req).await?,
		};
		let capabilities = build_capabilities(&browser_name, req.extra_desired_capabilities.as_ref());

		let created = {
			let _permit = self.acquire_remote_slot().await?;
			bounded(
				self.config.create_timeout(),
				"session create",
				self.driver.create_session(&node, &capabilities),
			)
			.await?
		};
		debug!(
			target = "drover.provision",
			session = %created.id,
			node = %created.resolved_endpoint,
			browser = %browser_name,
			"remote session created"
		);

		let record = SessionRecord {
			browser_name,
			node: created.resolved_endpoint.clone(),
			reserved: req.reserved.unwrap_or(false),
			current_url: req.current_url.clone(),
			tags: req.tags.clone(),
		};

		if let Err(err) = self.registry.create(&created.id, &record).await {
			// The remote session exists but was never registered; reclaim it
			// best-effort before surfacing the registration failure.
			warn!(target = "drover.provision", session = %created.id, error = %err, "registration failed, reclaiming remote session");
			self.quit_best_effort(&record.node, &created.id).await;
			return Err(err);
		}

		if let Some(url) = &req.current_url {
			self.spawn_initial_navigation(&record.node, &created.id, url);
		}

		Ok(SessionView {
			id: created.id,
			browser_name: record.browser_name,
			node: record.node,
			reserved: record.reserved,
			current_url: record.current_url,
			tags: record.tags,
		})
	}

	/// Terminates a session and removes it from the registry.
	///
	/// Remote termination is best-effort; the registry delete is the real
	/// contract and runs unconditionally. Unknown ids report `false` and are
	/// not an error.
	pub async fn destroy_session(&self, id: &str) -> Result<bool> {
		self.teardown(id, false).await
	}

	/// Registry-only removal for sessions whose node already failed a probe;
	/// there is no point terminating against an unreachable endpoint.
	pub async fn evict_session(&self, id: &str) -> Result<bool> {
		self.teardown(id, true).await
	}

	/// Takes the exclusive-use lock on a session.
	pub async fn reserve_session(&self, id: &str) -> Result<()> {
		self.registry.set_reserved(id, true).await
	}

	/// Releases the exclusive-use lock.
	pub async fn release_session(&self, id: &str) -> Result<()> {
		self.registry.set_reserved(id, false).await
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub(crate) fn driver(&self) -> Arc<dyn RemoteDriver> {
		Arc::clone(&self.driver)
	}

	pub(crate) fn config(&self) -> &BrokerConfig {
		&self.config
	}

	pub(crate) fn remote_pool(&self) -> Arc<Semaphore> {
		Arc::clone(&self.remote_pool)
	}

	async fn teardown(&self, id: &str, skip_remote: bool) -> Result<bool> {
		let Some(view) = self.registry.get(id).await? else {
			return Ok(false);
		};
		if !skip_remote {
			self.quit_best_effort(&view.node, id).await;
		}
		self.registry.delete(id).await?;
		debug!(target = "drover.provision", session = id, skipped_remote = skip_remote, "session removed");
		Ok(true)
	}

	async fn quit_best_effort(&self, node: &str, id: &str) {
		let quit = async {
			let _permit = self.acquire_remote_slot().await?;
			bounded(self.config.probe_timeout(), "session quit", self.driver.quit(node, id)).await
		};
		if let Err(err) = quit.await {
			// The remote side may already be gone; that is fine.
			debug!(target = "drover.provision", session = id, error = %err, "remote termination failed, continuing");
		}
	}

	fn spawn_initial_navigation(&self, node: &str, id: &str, url: &str) {
		let driver = Arc::clone(&self.driver);
		let pool = Arc::clone(&self.remote_pool);
		let timeout = self.config.probe_timeout();
		let (node, id, url) = (node.to_string(), id.to_string(), url.to_string());
		tokio::spawn(async move {
			let nav = async {
				let _permit = pool.acquire_owned().await.map_err(|_| DroverError::Store("remote pool closed".to_string()))?;
				bounded(timeout, "initial navigation", driver.navigate(&node, &id, &url)).await
			};
			if let Err(err) = nav.await {
				debug!(target = "drover.provision", session = %id, url = %url, error = %err, "initial navigation failed");
			}
		});
	}

	async fn acquire_remote_slot(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
		self.remote_pool
			.acquire()
			.await
			.map_err(|_| DroverError::Store("remote pool closed".to_string()))
	}
}

/// Caps `fut` with a hard deadline, surfacing expiry as a typed timeout.
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	match tokio::time::timeout(limit, fut).await {
		Ok(result) => result,
		Err(_) => Err(DroverError::Timeout {
			ms: limit.as_millis() as u64,
			operation: operation.to_string(),
		}),
	}
}

fn build_capabilities(browser_name: &str, extra: Option<&Value>) -> Value {
	let mut map = serde_json::Map::new();
	map.insert("browserName".to_string(), Value::String(browser_name.to_string()));
	if let Some(Value::Object(extra)) = extra {
		for (key, value) in extra {
			map.insert(key.clone(), value.clone());
		}
	}
	Value::Object(map)
}
