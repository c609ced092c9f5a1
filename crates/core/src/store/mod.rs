//! Transactional key/value store boundary.
//!
//! The registry never talks to a concrete store directly; it goes through
//! [`KvStore`], a thin adapter over a shared store that offers hashes, sets,
//! and an optimistic watch/commit primitive. A transaction is: snapshot the
//! watched keys ([`KvStore::watch`]), read whatever the decision needs, stage
//! a batch of [`WriteOp`]s, then [`KvStore::commit`], which applies the batch
//! only if no watched key changed since the snapshot.
//!
//! [`with_optimistic_txn`] wraps that sequence in a bounded retry loop and
//! keeps "the transaction aborted" ([`TxnOutcome::Aborted`]) distinct from
//! business failures, so callers can apply different policies to each.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::trace;

use crate::error::Result;

pub mod memory;

pub use memory::MemoryStore;

/// One staged mutation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
	/// Set one field of the hash at `key`.
	HashSet { key: String, field: String, value: String },
	/// Remove the whole value at `key` (hash or set).
	Delete { key: String },
	/// Add `member` to the set at `key`.
	SetAdd { key: String, member: String },
	/// Remove `member` from the set at `key`.
	SetRemove { key: String, member: String },
}

/// Version snapshot of a transaction's watched keys.
///
/// Opaque to callers; produced by [`KvStore::watch`] and consumed by
/// [`KvStore::commit`]. A key that does not exist yet still has a version,
/// so creation races are caught like any other conflict.
#[derive(Debug)]
pub struct WatchGuard {
	pub(crate) versions: Vec<(String, u64)>,
}

/// Minimal adapter surface over the shared store.
///
/// Reads issued between `watch` and `commit` are the transaction's reads;
/// the adapter itself does not track them (conflict detection is purely
/// version-based on the watched keys).
#[async_trait]
pub trait KvStore: Send + Sync {
	/// Snapshots the current versions of `keys`.
	async fn watch(&self, keys: &[String]) -> Result<WatchGuard>;

	/// Returns all fields of the hash at `key`, or `None` when absent.
	async fn hash_get_all(&self, key: &str) -> Result<Option<BTreeMap<String, String>>>;

	/// Returns the members of the set at `key` (empty when absent).
	async fn set_members(&self, key: &str) -> Result<BTreeSet<String>>;

	/// Atomically applies `writes` iff no key in `guard` changed since the
	/// snapshot. Returns `false` on abort; the store is untouched then.
	async fn commit(&self, guard: WatchGuard, writes: Vec<WriteOp>) -> Result<bool>;
}

/// Staged writes plus the value the body computed from its in-txn reads.
pub struct TxnPlan<T> {
	pub writes: Vec<WriteOp>,
	pub value: T,
}

impl<T> TxnPlan<T> {
	/// Plan that writes nothing (read-only transaction).
	pub fn read_only(value: T) -> Self {
		Self { writes: Vec::new(), value }
	}
}

/// Terminal state of a retried optimistic transaction.
#[derive(Debug)]
pub enum TxnOutcome<T> {
	/// Committed on some attempt; carries the body's value from that attempt.
	Committed(T),
	/// Every attempt hit a concurrent writer on a watched key.
	Aborted,
}

impl<T> TxnOutcome<T> {
	pub fn committed(self) -> Option<T> {
		match self {
			TxnOutcome::Committed(value) => Some(value),
			TxnOutcome::Aborted => None,
		}
	}
}

/// Runs `body` under watch/commit, retrying up to `attempts` times.
///
/// Each retry re-runs the body from scratch: decisions made from reads of a
/// now-stale snapshot must never survive into a later attempt. A `body`
/// error propagates immediately without consuming the retry budget; a
/// business failure is not a conflict.
pub async fn with_optimistic_txn<T, F>(
	store: &dyn KvStore,
	watched: &[String],
	attempts: u32,
	mut body: F,
) -> Result<TxnOutcome<T>>
where
	F: for<'a> FnMut(&'a dyn KvStore) -> BoxFuture<'a, Result<TxnPlan<T>>>,
{
	for attempt in 1..=attempts.max(1) {
		let guard = store.watch(watched).await?;
		let plan = body(store).await?;
		if store.commit(guard, plan.writes).await? {
			return Ok(TxnOutcome::Committed(plan.value));
		}
		trace!(target = "drover.store", attempt, watched = ?watched, "optimistic transaction aborted");
	}
	Ok(TxnOutcome::Aborted)
}
