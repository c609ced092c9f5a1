//! Periodic health sweep over the active session pool.
//!
//! A sweep cycle moves through listing (registry snapshot), dispatching
//! (semaphore-bounded probe fan-out), and collecting (url refresh or
//! eviction per probe). Failures are per-session: a dead node, a store
//! conflict, or an undecodable record never aborts the rest of the cycle;
//! whatever could not be handled this time is re-attempted next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::SessionView;
use crate::provisioner::{Provisioner, bounded};

/// Tally of one sweep cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
	pub checked: usize,
	pub refreshed: usize,
	pub evicted: usize,
}

#[derive(Clone)]
pub struct Refresher {
	provisioner: Arc<Provisioner>,
}

enum ProbeOutcome {
	Healthy { current_url: String },
	Evict,
	/// Probe could not run at all (local trouble, not node death).
	Skip,
}

impl Refresher {
	pub fn new(provisioner: Arc<Provisioner>) -> Self {
		Self { provisioner }
	}

	/// Runs one full sweep cycle over every active session.
	pub async fn sweep(&self) -> SweepReport {
		// Listing: a snapshot; sessions created after this point are picked
		// up next cycle.
		let views = match self.provisioner.registry().list(None).await {
			Ok(views) => views,
			Err(err) => {
				warn!(target = "drover.refresh", error = %err, "listing failed, skipping sweep cycle");
				return SweepReport::default();
			}
		};

		let mut report = SweepReport { checked: views.len(), ..Default::default() };

		// Dispatching: each probe runs under a permit from the shared
		// remote-call pool, so sweep width never exceeds the configured bound.
		let mut workers = JoinSet::new();
		for view in views {
			let refresher = self.clone();
			workers.spawn(async move {
				let id = view.id.clone();
				(id, refresher.refresh_view(view).await)
			});
		}

		// Collecting.
		while let Some(joined) = workers.join_next().await {
			match joined {
				Ok((_, Ok(true))) => report.refreshed += 1,
				Ok((_, Ok(false))) => report.evicted += 1,
				Ok((id, Err(err))) => {
					// Store-side trouble for this one session; leave it for
					// the next cycle.
					warn!(target = "drover.refresh", session = %id, error = %err, "refresh attempt abandoned");
				}
				Err(err) => {
					warn!(target = "drover.refresh", error = %err, "probe worker panicked");
				}
			}
		}

		if report.evicted > 0 {
			info!(
				target = "drover.refresh",
				checked = report.checked,
				refreshed = report.refreshed,
				evicted = report.evicted,
				"sweep evicted dead sessions"
			);
		} else {
			debug!(target = "drover.refresh", checked = report.checked, "sweep complete");
		}
		report
	}

	/// Refreshes a single session on demand.
	///
	/// `Ok(true)` means the session answered and its url was resynced;
	/// `Ok(false)` means it was evicted or is unknown.
	pub async fn refresh_session(&self, id: &str) -> Result<bool> {
		match self.provisioner.registry().get(id).await? {
			Some(view) => self.refresh_view(view).await,
			None => Ok(false),
		}
	}

	/// Spawns the recurring sweep task; flipping `shutdown` to `true` stops it.
	pub fn spawn_periodic(&self, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
		let refresher = self.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			info!(target = "drover.refresh", period_ms = period.as_millis() as u64, "health sweep running");
			loop {
				tokio::select! {
					changed = shutdown.changed() => {
						if changed.is_err() || *shutdown.borrow() {
							info!(target = "drover.refresh", "health sweep stopping");
							break;
						}
					}
					_ = ticker.tick() => {
						refresher.sweep().await;
					}
				}
			}
		})
	}

	async fn refresh_view(&self, view: SessionView) -> Result<bool> {
		match self.probe(&view).await {
			ProbeOutcome::Healthy { current_url } => {
				if let Err(err) = self
					.provisioner
					.registry()
					.set_current_url(&view.id, &current_url)
					.await
				{
					// A contended or already-deleted record is not worth
					// failing the probe over.
					debug!(target = "drover.refresh", session = %view.id, error = %err, "url resync skipped");
				}
				Ok(true)
			}
			ProbeOutcome::Evict => {
				// The node already failed to answer; skip the remote quit.
				self.provisioner.evict_session(&view.id).await?;
				Ok(false)
			}
			ProbeOutcome::Skip => Ok(true),
		}
	}

	async fn probe(&self, view: &SessionView) -> ProbeOutcome {
		let driver = self.provisioner.driver();
		let timeout = self.provisioner.config().probe_timeout();
		let pool = self.provisioner.remote_pool();

		let result = async {
			let _permit = pool
				.acquire()
				.await
				.map_err(|_| crate::error::DroverError::Store("remote pool closed".to_string()))?;
			bounded(timeout, "liveness probe", driver.current_url(&view.node, &view.id)).await
		}
		.await;

		match result {
			Ok(current_url) => ProbeOutcome::Healthy { current_url },
			Err(err) if err.evicts_on_refresh() => {
				debug!(target = "drover.refresh", session = %view.id, node = %view.node, error = %err, "probe failed, evicting");
				ProbeOutcome::Evict
			}
			Err(err) => {
				// Pool closed or similar local trouble; unknown health is
				// not dead, keep the session untouched.
				warn!(target = "drover.refresh", session = %view.id, error = %err, "probe could not run, keeping session");
				ProbeOutcome::Skip
			}
		}
	}
}
