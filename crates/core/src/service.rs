//! Broker service: explicit construction and lifecycle for everything the
//! HTTP surface needs.
//!
//! All shared state (store, node selector, remote driver) is injected, so
//! there are no process-wide singletons; tests wire in fakes the same way
//! production wires in real collaborators.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::error::{DroverError, Result};
use crate::matcher;
use crate::model::{Requirements, SessionView};
use crate::nodes::{NodeSelector, StaticNodeSelector};
use crate::provisioner::Provisioner;
use crate::refresher::{Refresher, SweepReport};
use crate::registry::Registry;
use crate::remote::{HttpRemoteDriver, RemoteDriver};
use crate::store::{KvStore, MemoryStore};

pub struct BrokerService {
	registry: Registry,
	provisioner: Arc<Provisioner>,
	refresher: Refresher,
	sweep_period: std::time::Duration,
	shutdown_tx: watch::Sender<bool>,
	shutdown_rx: watch::Receiver<bool>,
	sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerService {
	/// Builds a service over injected collaborators.
	pub fn new(
		config: BrokerConfig,
		store: Arc<dyn KvStore>,
		selector: Arc<dyn NodeSelector>,
		driver: Arc<dyn RemoteDriver>,
	) -> Self {
		let registry = Registry::new(store);
		let remote_pool = Arc::new(Semaphore::new(config.probe_concurrency));
		let sweep_period = config.sweep_interval();
		let provisioner = Arc::new(Provisioner::new(
			registry.clone(),
			driver,
			selector,
			config,
			remote_pool,
		));
		let refresher = Refresher::new(Arc::clone(&provisioner));
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		Self {
			registry,
			provisioner,
			refresher,
			sweep_period,
			shutdown_tx,
			shutdown_rx,
			sweeper: Mutex::new(None),
		}
	}

	/// Default wiring: in-memory store, static round-robin selector over the
	/// configured nodes, WebDriver-over-HTTP driver.
	pub fn with_defaults(config: BrokerConfig) -> Self {
		let selector = Arc::new(StaticNodeSelector::new(config.nodes.clone()));
		Self::new(
			config,
			Arc::new(MemoryStore::new()),
			selector,
			Arc::new(HttpRemoteDriver::new()),
		)
	}

	/// Hands back an existing compatible session or provisions a new one.
	///
	/// With `reserve`, only unreserved candidates are considered and the
	/// winner is reserved before it is returned; a candidate lost to a
	/// concurrent reserver is skipped, not an error. `force_create` bypasses
	/// matching entirely.
	pub async fn get_or_create(&self, req: &Requirements, force_create: bool, reserve: bool) -> Result<SessionView> {
		if !force_create {
			let mut wanted = req.clone();
			if reserve {
				wanted.reserved = Some(false);
			}
			let listing = self.registry.list(None).await?;
			for candidate in listing.iter().filter(|c| matcher::matches(c, &wanted)) {
				if !reserve {
					return Ok(candidate.clone());
				}
				match self.provisioner.reserve_session(&candidate.id).await {
					Ok(()) => {
						return self
							.registry
							.get(&candidate.id)
							.await?
							.ok_or_else(|| DroverError::NotFound(candidate.id.clone()));
					}
					Err(DroverError::AlreadyReserved(_)) | Err(DroverError::NotFound(_)) => {
						// Lost the race for this one; try the next match.
						debug!(target = "drover.service", session = %candidate.id, "candidate taken concurrently, moving on");
					}
					Err(err) => return Err(err),
				}
			}
		}

		let mut to_create = req.clone();
		if reserve {
			to_create.reserved = Some(true);
		}
		self.provisioner.create_session(&to_create).await
	}

	pub async fn list(&self) -> Result<Vec<SessionView>> {
		self.registry.list(None).await
	}

	pub async fn get(&self, id: &str) -> Result<Option<SessionView>> {
		self.registry.get(id).await
	}

	/// Applies a partial update (tags replace, reservation toggle) and
	/// returns the resulting view.
	pub async fn update(
		&self,
		id: &str,
		tags: Option<&std::collections::BTreeSet<String>>,
		reserved: Option<bool>,
	) -> Result<SessionView> {
		if let Some(tags) = tags {
			self.registry.set_tags(id, tags).await?;
		}
		if let Some(reserved) = reserved {
			self.registry.set_reserved(id, reserved).await?;
		}
		self.registry
			.get(id)
			.await?
			.ok_or_else(|| DroverError::NotFound(id.to_string()))
	}

	/// Tears down a session; `false` when the id was unknown.
	pub async fn destroy(&self, id: &str) -> Result<bool> {
		self.provisioner.destroy_session(id).await
	}

	/// Runs one sweep immediately.
	pub async fn refresh_all(&self) -> SweepReport {
		self.refresher.sweep().await
	}

	/// Probes one session immediately; `false` when evicted or unknown.
	pub async fn refresh_one(&self, id: &str) -> Result<bool> {
		self.refresher.refresh_session(id).await
	}

	/// Starts the recurring background sweep. Idempotent.
	pub fn start_sweeper(&self) {
		let mut slot = self.sweeper.lock();
		if slot.is_some() {
			return;
		}
		*slot = Some(self.refresher.spawn_periodic(self.sweep_period, self.shutdown_rx.clone()));
	}

	/// Stops the background sweep and waits for the in-flight cycle.
	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(true);
		let handle = self.sweeper.lock().take();
		if let Some(handle) = handle {
			if let Err(err) = handle.await {
				warn!(target = "drover.service", error = %err, "sweeper did not stop cleanly");
			}
		}
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}
}
