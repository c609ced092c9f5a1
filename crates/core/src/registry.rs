//! Session registry: CRUD + listing over the store, kept coherent with the
//! membership index through optimistic transactions.
//!
//! Retry policy per operation:
//! * reads (`get`, `list`): retried up to [`TXN_ATTEMPTS`], then degrade to
//!   "no data"; callers of the HTTP layer re-poll anyway.
//! * `set_reserved` / `set_tags` / `delete`: retried up to [`TXN_ATTEMPTS`],
//!   then surface [`DroverError::TxnConflict`].
//! * `create`: a single attempt; a conflict on a freshly minted session id
//!   means something is wrong enough to propagate.
//!
//! Every retry re-runs its decision logic from fresh in-transaction reads;
//! nothing computed from an aborted attempt is reused.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{DroverError, Result};
use crate::keys;
use crate::model::{SessionRecord, SessionView, decode_bool, encode_bool, fields};
use crate::store::{KvStore, TxnOutcome, TxnPlan, WriteOp, with_optimistic_txn};

/// Bounded retry budget for optimistic transactions.
pub const TXN_ATTEMPTS: u32 = 3;

/// Shared registry handle over the store adapter.
#[derive(Clone)]
pub struct Registry {
	store: Arc<dyn KvStore>,
}

impl Registry {
	pub fn new(store: Arc<dyn KvStore>) -> Self {
		Self { store }
	}

	pub fn store(&self) -> Arc<dyn KvStore> {
		Arc::clone(&self.store)
	}

	/// Reads one session's record and tags under a transaction.
	///
	/// `Ok(None)` covers both "no such session" and "could not read
	/// consistently within the retry budget"; the transaction layer keeps the
	/// two apart internally, and the second case is logged.
	pub async fn get(&self, id: &str) -> Result<Option<SessionView>> {
		let watched = [keys::session(id), keys::session_tags(id)];
		let outcome = with_optimistic_txn(&*self.store, &watched, TXN_ATTEMPTS, |store| {
			let id = id.to_string();
			Box::pin(async move {
				let Some(hash) = store.hash_get_all(&keys::session(&id)).await? else {
					return Ok(TxnPlan::read_only(None));
				};
				let tags = store.set_members(&keys::session_tags(&id)).await?;
				Ok(TxnPlan::read_only(Some(SessionView::from_store(&id, &hash, tags)?)))
			})
		})
		.await?;

		match outcome {
			TxnOutcome::Committed(view) => Ok(view),
			TxnOutcome::Aborted => {
				debug!(target = "drover.registry", id, "read contended past retry budget, returning no data");
				Ok(None)
			}
		}
	}

	/// Lists sessions, either the given ids or a transactional snapshot of
	/// the whole index. An empty registry yields an empty vec.
	pub async fn list(&self, ids: Option<&[String]>) -> Result<Vec<SessionView>> {
		let ids: Vec<String> = match ids {
			Some(ids) => ids.to_vec(),
			None => match self.snapshot_ids().await? {
				Some(ids) => ids.into_iter().collect(),
				None => return Ok(Vec::new()),
			},
		};

		let mut views = Vec::with_capacity(ids.len());
		for id in &ids {
			match self.get(id).await {
				Ok(Some(view)) => views.push(view),
				// Deleted between snapshot and read; the documented
				// relaxation for non-transactional aggregation.
				Ok(None) => {}
				Err(err @ DroverError::Decode { .. }) => {
					warn!(target = "drover.registry", id, error = %err, "skipping undecodable record in listing");
				}
				Err(err) => return Err(err),
			}
		}
		Ok(views)
	}

	/// Snapshot of active session ids; `None` when the index read could not
	/// commit within the retry budget.
	pub async fn snapshot_ids(&self) -> Result<Option<BTreeSet<String>>> {
		let watched = [keys::session_set()];
		let outcome = with_optimistic_txn(&*self.store, &watched, TXN_ATTEMPTS, |store| {
			Box::pin(async move {
				let ids = store.set_members(&keys::session_set()).await?;
				Ok(TxnPlan::read_only(ids))
			})
		})
		.await?;

		match outcome {
			TxnOutcome::Committed(ids) => Ok(Some(ids)),
			TxnOutcome::Aborted => {
				debug!(target = "drover.registry", "index snapshot contended past retry budget");
				Ok(None)
			}
		}
	}

	/// Registers a new session: index entry, record fields, and tag set in
	/// one transaction. Single-attempt; see module docs.
	pub async fn create(&self, id: &str, record: &SessionRecord) -> Result<()> {
		let session_key = keys::session(id);
		let tags_key = keys::session_tags(id);

		let mut writes = vec![WriteOp::SetAdd {
			key: keys::session_set(),
			member: id.to_string(),
		}];
		for (field, value) in record.to_fields() {
			writes.push(WriteOp::HashSet {
				key: session_key.clone(),
				field: field.to_string(),
				value,
			});
		}
		writes.push(WriteOp::Delete { key: tags_key.clone() });
		for tag in &record.tags {
			writes.push(WriteOp::SetAdd {
				key: tags_key.clone(),
				member: tag.clone(),
			});
		}

		let watched = [session_key.clone()];
		let outcome = with_optimistic_txn(&*self.store, &watched, 1, |_store| {
			let writes = writes.clone();
			Box::pin(async move { Ok(TxnPlan { writes, value: () }) })
		})
		.await?;

		match outcome {
			TxnOutcome::Committed(()) => Ok(()),
			TxnOutcome::Aborted => Err(DroverError::TxnConflict { key: session_key, attempts: 1 }),
		}
	}

	/// Flips the reservation flag.
	///
	/// The current value is re-read inside every attempt: granting a
	/// reservation that another writer took between read and commit would
	/// break exclusivity, so the decision must come from watched state.
	pub async fn set_reserved(&self, id: &str, value: bool) -> Result<()> {
		let session_key = keys::session(id);
		let watched = [session_key.clone()];
		let outcome = with_optimistic_txn(&*self.store, &watched, TXN_ATTEMPTS, |store| {
			let id = id.to_string();
			Box::pin(async move {
				let session_key = keys::session(&id);
				let Some(hash) = store.hash_get_all(&session_key).await? else {
					return Err(DroverError::NotFound(id));
				};
				let current = match hash.get(fields::RESERVED) {
					Some(raw) => decode_bool(fields::RESERVED, raw)?,
					None => false,
				};
				if value && current {
					return Err(DroverError::AlreadyReserved(id));
				}
				Ok(TxnPlan {
					writes: vec![WriteOp::HashSet {
						key: session_key,
						field: fields::RESERVED.to_string(),
						value: encode_bool(value).to_string(),
					}],
					value: (),
				})
			})
		})
		.await?;

		match outcome {
			TxnOutcome::Committed(()) => Ok(()),
			TxnOutcome::Aborted => Err(DroverError::TxnConflict {
				key: session_key,
				attempts: TXN_ATTEMPTS,
			}),
		}
	}

	/// Records the last observed navigation target. Only the refresher and
	/// creation-time navigation write this field.
	pub async fn set_current_url(&self, id: &str, url: &str) -> Result<()> {
		let session_key = keys::session(id);
		let watched = [session_key.clone()];
		let outcome = with_optimistic_txn(&*self.store, &watched, TXN_ATTEMPTS, |store| {
			let id = id.to_string();
			let url = url.to_string();
			Box::pin(async move {
				let session_key = keys::session(&id);
				if store.hash_get_all(&session_key).await?.is_none() {
					return Err(DroverError::NotFound(id));
				}
				Ok(TxnPlan {
					writes: vec![WriteOp::HashSet {
						key: session_key,
						field: fields::CURRENT_URL.to_string(),
						value: url,
					}],
					value: (),
				})
			})
		})
		.await?;

		match outcome {
			TxnOutcome::Committed(()) => Ok(()),
			TxnOutcome::Aborted => Err(DroverError::TxnConflict {
				key: session_key,
				attempts: TXN_ATTEMPTS,
			}),
		}
	}

	/// Replaces the tag set wholesale (no merge).
	pub async fn set_tags(&self, id: &str, tags: &BTreeSet<String>) -> Result<()> {
		let session_key = keys::session(id);
		let tags_key = keys::session_tags(id);
		let watched = [session_key.clone(), tags_key.clone()];
		let outcome = with_optimistic_txn(&*self.store, &watched, TXN_ATTEMPTS, |store| {
			let id = id.to_string();
			let tags = tags.clone();
			Box::pin(async move {
				if store.hash_get_all(&keys::session(&id)).await?.is_none() {
					return Err(DroverError::NotFound(id.clone()));
				}
				let tags_key = keys::session_tags(&id);
				let mut writes = vec![WriteOp::Delete { key: tags_key.clone() }];
				for tag in &tags {
					writes.push(WriteOp::SetAdd {
						key: tags_key.clone(),
						member: tag.clone(),
					});
				}
				Ok(TxnPlan { writes, value: () })
			})
		})
		.await?;

		match outcome {
			TxnOutcome::Committed(()) => Ok(()),
			TxnOutcome::Aborted => Err(DroverError::TxnConflict {
				key: tags_key,
				attempts: TXN_ATTEMPTS,
			}),
		}
	}

	/// Removes index entry, record, and tag set as one unit. Unknown ids are
	/// still success; the writes are harmless no-ops then.
	pub async fn delete(&self, id: &str) -> Result<()> {
		let session_key = keys::session(id);
		let tags_key = keys::session_tags(id);
		let writes = vec![
			WriteOp::SetRemove {
				key: keys::session_set(),
				member: id.to_string(),
			},
			WriteOp::Delete { key: session_key.clone() },
			WriteOp::Delete { key: tags_key.clone() },
		];

		let watched = [session_key.clone(), tags_key];
		let outcome = with_optimistic_txn(&*self.store, &watched, TXN_ATTEMPTS, |_store| {
			let writes = writes.clone();
			Box::pin(async move { Ok(TxnPlan { writes, value: () }) })
		})
		.await?;

		match outcome {
			TxnOutcome::Committed(()) => Ok(()),
			TxnOutcome::Aborted => Err(DroverError::TxnConflict {
				key: session_key,
				attempts: TXN_ATTEMPTS,
			}),
		}
	}
}
