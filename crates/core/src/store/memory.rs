//! In-process [`KvStore`] with real optimistic-commit semantics.
//!
//! Every key carries a version counter that survives deletion, so watch
//! snapshots catch delete/recreate races too. All trait methods take one
//! mutex; `commit` validates the guard and applies its batch under the same
//! acquisition, which is what makes the batch atomic.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{KvStore, WatchGuard, WriteOp};
use crate::error::{DroverError, Result};

#[derive(Debug, Clone)]
enum Value {
	Hash(BTreeMap<String, String>),
	Set(BTreeSet<String>),
}

#[derive(Default)]
struct Inner {
	data: HashMap<String, Value>,
	/// Monotonic per-key write counters; missing entry means version 0.
	versions: HashMap<String, u64>,
}

impl Inner {
	fn version(&self, key: &str) -> u64 {
		self.versions.get(key).copied().unwrap_or(0)
	}

	fn bump(&mut self, key: &str) {
		*self.versions.entry(key.to_string()).or_insert(0) += 1;
	}

	fn apply(&mut self, op: &WriteOp) -> Result<()> {
		match op {
			WriteOp::HashSet { key, field, value } => {
				let entry = self.data.entry(key.clone()).or_insert_with(|| Value::Hash(BTreeMap::new()));
				match entry {
					Value::Hash(map) => {
						map.insert(field.clone(), value.clone());
					}
					Value::Set(_) => return Err(type_mismatch(key, "hash")),
				}
				self.bump(key);
			}
			WriteOp::Delete { key } => {
				if self.data.remove(key).is_some() {
					self.bump(key);
				}
			}
			WriteOp::SetAdd { key, member } => {
				let entry = self.data.entry(key.clone()).or_insert_with(|| Value::Set(BTreeSet::new()));
				match entry {
					Value::Set(set) => {
						set.insert(member.clone());
					}
					Value::Hash(_) => return Err(type_mismatch(key, "set")),
				}
				self.bump(key);
			}
			WriteOp::SetRemove { key, member } => {
				if let Some(Value::Set(set)) = self.data.get_mut(key) {
					set.remove(member);
					self.bump(key);
				}
			}
		}
		Ok(())
	}
}

/// Shared in-memory store; cheap to clone, all clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
	inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl KvStore for MemoryStore {
	async fn watch(&self, keys: &[String]) -> Result<WatchGuard> {
		let inner = self.inner.lock();
		let versions = keys.iter().map(|k| (k.clone(), inner.version(k))).collect();
		Ok(WatchGuard { versions })
	}

	async fn hash_get_all(&self, key: &str) -> Result<Option<BTreeMap<String, String>>> {
		let inner = self.inner.lock();
		match inner.data.get(key) {
			Some(Value::Hash(map)) => Ok(Some(map.clone())),
			Some(Value::Set(_)) => Err(type_mismatch(key, "hash")),
			None => Ok(None),
		}
	}

	async fn set_members(&self, key: &str) -> Result<BTreeSet<String>> {
		let inner = self.inner.lock();
		match inner.data.get(key) {
			Some(Value::Set(set)) => Ok(set.clone()),
			Some(Value::Hash(_)) => Err(type_mismatch(key, "set")),
			None => Ok(BTreeSet::new()),
		}
	}

	async fn commit(&self, guard: WatchGuard, writes: Vec<WriteOp>) -> Result<bool> {
		let mut inner = self.inner.lock();
		for (key, seen) in &guard.versions {
			if inner.version(key) != *seen {
				return Ok(false);
			}
		}
		// Validate the whole batch before applying any of it.
		let mut staged = Inner {
			data: inner.data.clone(),
			versions: inner.versions.clone(),
		};
		for op in &writes {
			staged.apply(op)?;
		}
		*inner = staged;
		Ok(true)
	}
}

fn type_mismatch(key: &str, wanted: &str) -> DroverError {
	DroverError::Store(format!("key {key} holds the wrong type (wanted {wanted})"))
}
