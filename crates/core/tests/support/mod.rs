//! Shared fixtures: a scripted remote driver and a conflict-injecting store.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use drover::BrokerConfig;
use drover::error::{DroverError, Result};
use drover::remote::{CreatedSession, RemoteDriver};
use drover::store::{KvStore, MemoryStore, WatchGuard, WriteOp};
use parking_lot::Mutex;

/// Config with millisecond-scale timeouts so tests never sit on real ones.
pub fn fast_config() -> BrokerConfig {
	BrokerConfig {
		create_timeout_ms: 200,
		probe_timeout_ms: 200,
		sweep_interval_ms: 50,
		..BrokerConfig::default()
	}
}

#[derive(Default)]
struct FakeState {
	next_id: u64,
	sessions: HashMap<String, FakeSession>,
	dead_nodes: HashSet<String>,
	resolve: HashMap<String, String>,
	create_hang: Option<Duration>,
	probe_hang: Option<Duration>,
}

struct FakeSession {
	node: String,
	current_url: String,
}

/// Scripted in-process stand-in for a WebDriver execution node.
#[derive(Default)]
pub struct FakeDriver {
	state: Mutex<FakeState>,
}

impl FakeDriver {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Makes sessions created against `alias` report `resolved` as their node.
	pub fn resolve_as(&self, alias: &str, resolved: &str) {
		self.state.lock().resolve.insert(alias.to_string(), resolved.to_string());
	}

	/// Marks a node unreachable; every call against it fails from now on.
	pub fn kill_node(&self, node: &str) {
		self.state.lock().dead_nodes.insert(node.to_string());
	}

	/// Makes session creation sleep before answering.
	pub fn hang_creates(&self, delay: Duration) {
		self.state.lock().create_hang = Some(delay);
	}

	/// Makes liveness probes sleep before answering.
	pub fn hang_probes(&self, delay: Duration) {
		self.state.lock().probe_hang = Some(delay);
	}

	/// Moves a live session to a new URL behind the broker's back.
	pub fn set_url(&self, id: &str, url: &str) {
		if let Some(session) = self.state.lock().sessions.get_mut(id) {
			session.current_url = url.to_string();
		}
	}

	pub fn live_sessions(&self) -> usize {
		self.state.lock().sessions.len()
	}

	pub fn has_session(&self, id: &str) -> bool {
		self.state.lock().sessions.contains_key(id)
	}
}

#[async_trait]
impl RemoteDriver for FakeDriver {
	async fn create_session(&self, endpoint: &str, _capabilities: &serde_json::Value) -> Result<CreatedSession> {
		let hang = self.state.lock().create_hang;
		if let Some(delay) = hang {
			tokio::time::sleep(delay).await;
		}
		let mut state = self.state.lock();
		if state.dead_nodes.contains(endpoint) {
			return Err(DroverError::remote(endpoint, "connection refused"));
		}
		state.next_id += 1;
		let id = format!("fake-{:04}", state.next_id);
		let resolved = state.resolve.get(endpoint).cloned().unwrap_or_else(|| endpoint.to_string());
		state.sessions.insert(
			id.clone(),
			FakeSession {
				node: resolved.clone(),
				current_url: "about:blank".to_string(),
			},
		);
		Ok(CreatedSession { id, resolved_endpoint: resolved })
	}

	async fn current_url(&self, endpoint: &str, session_id: &str) -> Result<String> {
		let hang = self.state.lock().probe_hang;
		if let Some(delay) = hang {
			tokio::time::sleep(delay).await;
		}
		let state = self.state.lock();
		if state.dead_nodes.contains(endpoint) {
			return Err(DroverError::remote(endpoint, "connection refused"));
		}
		match state.sessions.get(session_id) {
			Some(session) => Ok(session.current_url.clone()),
			None => Err(DroverError::remote(endpoint, "no such session")),
		}
	}

	async fn navigate(&self, endpoint: &str, session_id: &str, url: &str) -> Result<()> {
		let mut state = self.state.lock();
		if state.dead_nodes.contains(endpoint) {
			return Err(DroverError::remote(endpoint, "connection refused"));
		}
		match state.sessions.get_mut(session_id) {
			Some(session) => {
				session.current_url = url.to_string();
				Ok(())
			}
			None => Err(DroverError::remote(endpoint, "no such session")),
		}
	}

	async fn quit(&self, endpoint: &str, session_id: &str) -> Result<()> {
		let mut state = self.state.lock();
		if state.dead_nodes.contains(endpoint) {
			return Err(DroverError::remote(endpoint, "connection refused"));
		}
		state.sessions.remove(session_id);
		Ok(())
	}
}

/// Store wrapper that lands an interfering write on each of the first
/// `conflicts` commits, forcing those commits to abort: the watched-key
/// race, made deterministic.
pub struct ConflictingStore {
	inner: MemoryStore,
	conflicts_left: AtomicU32,
	interference: Vec<WriteOp>,
	mutations_only: bool,
}

impl ConflictingStore {
	pub fn new(inner: MemoryStore, conflicts: u32, interference: Vec<WriteOp>) -> Self {
		Self {
			inner,
			conflicts_left: AtomicU32::new(conflicts),
			interference,
			mutations_only: false,
		}
	}

	/// Variant that leaves read-only commits alone, so lookups and listings
	/// stay consistent while every mutation keeps getting raced.
	pub fn mutations_only(inner: MemoryStore, conflicts: u32, interference: Vec<WriteOp>) -> Self {
		Self {
			mutations_only: true,
			..Self::new(inner, conflicts, interference)
		}
	}

	pub fn inner(&self) -> &MemoryStore {
		&self.inner
	}
}

#[async_trait]
impl KvStore for ConflictingStore {
	async fn watch(&self, keys: &[String]) -> Result<WatchGuard> {
		self.inner.watch(keys).await
	}

	async fn hash_get_all(&self, key: &str) -> Result<Option<std::collections::BTreeMap<String, String>>> {
		self.inner.hash_get_all(key).await
	}

	async fn set_members(&self, key: &str) -> Result<std::collections::BTreeSet<String>> {
		self.inner.set_members(key).await
	}

	async fn commit(&self, guard: WatchGuard, writes: Vec<WriteOp>) -> Result<bool> {
		if self.mutations_only && writes.is_empty() {
			return self.inner.commit(guard, writes).await;
		}
		let contended = self
			.conflicts_left
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if contended {
			let free = self.inner.watch(&[]).await?;
			self.inner.commit(free, self.interference.clone()).await?;
		}
		self.inner.commit(guard, writes).await
	}
}
