//! The ledger actor service.

use std::collections::HashMap;

use ripple_protocol::SubscriberKey;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant, interval};
use tracing::{debug, warn};

use crate::record::{Qualifications, SubscriptionId, SubscriptionRecord};
use crate::snapshot::{self, Snapshot, SnapshotSpec};
use crate::{LedgerError, Result};

/// Default reconnect grace window before a disconnected subscriber's
/// records are purged.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(5);
/// Default interval between periodic snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);
/// Poll interval for grace-window expiry.
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);
/// Command mailbox capacity.
const MAILBOX_CAPACITY: usize = 64;

/// Configuration for the ledger service.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
	/// How long a disconnected subscriber's records survive.
	pub grace_window: Duration,
	/// Where to persist snapshots; `None` disables durability.
	pub snapshot: Option<SnapshotSpec>,
	/// How often to persist when records changed.
	pub snapshot_interval: Duration,
	/// Notified when a subscriber is permanently retired (unregistered, or
	/// its grace window expired), so callers can release per-subscriber
	/// state of their own.
	pub on_retired: Option<mpsc::UnboundedSender<SubscriberKey>>,
}

impl Default for LedgerConfig {
	fn default() -> Self {
		Self {
			grace_window: DEFAULT_GRACE_WINDOW,
			snapshot: None,
			snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
			on_retired: None,
		}
	}
}

/// Commands for the ledger actor.
#[derive(Debug)]
pub enum LedgerCmd {
	/// Register a subscription, idempotent per
	/// `(subscriber, source, qualifications)`.
	Register {
		/// The subscribing session key.
		subscriber: SubscriberKey,
		/// Data source the query reads from.
		source: String,
		/// Canonicalized qualification set.
		qualifications: Qualifications,
		/// Optional handler override.
		handler: Option<String>,
		/// Reply channel for the record id.
		reply: oneshot::Sender<SubscriptionId>,
	},
	/// Remove every record for a subscriber immediately.
	Unregister {
		/// The session key to remove.
		subscriber: SubscriberKey,
		/// Reply channel for the number of records removed.
		reply: oneshot::Sender<usize>,
	},
	/// Remove one record that turned out to be stale.
	Drop {
		/// The stale record's id.
		id: SubscriptionId,
	},
	/// Fetch every record for a source.
	Find {
		/// Source name to look up.
		source: String,
		/// Reply channel for the records.
		reply: oneshot::Sender<Vec<SubscriptionRecord>>,
	},
	/// Start the grace window for a disconnected subscriber.
	SessionClosed {
		/// The disconnected session key.
		subscriber: SubscriberKey,
	},
	/// Cancel a pending purge for a reconnected subscriber.
	SessionResumed {
		/// The reconnected session key.
		subscriber: SubscriberKey,
		/// Reply channel: whether any records survived for the key.
		reply: oneshot::Sender<bool>,
	},
	/// Force a snapshot now.
	Persist {
		/// Reply channel for the outcome.
		reply: oneshot::Sender<Result<()>>,
	},
	/// Persist and stop the actor.
	Shutdown {
		/// Reply channel signalled once the final snapshot is written.
		reply: oneshot::Sender<()>,
	},
}

struct LedgerState {
	sources: HashMap<String, Vec<SubscriptionRecord>>,
	next_id: u64,
	epoch: u64,
	pending_purge: HashMap<SubscriberKey, Instant>,
	grace_window: Duration,
	snapshot: Option<SnapshotSpec>,
	on_retired: Option<mpsc::UnboundedSender<SubscriberKey>>,
	dirty: bool,
}

impl LedgerState {
	fn new(config: &LedgerConfig) -> Self {
		Self {
			sources: HashMap::new(),
			next_id: 0,
			epoch: 0,
			pending_purge: HashMap::new(),
			grace_window: config.grace_window,
			snapshot: config.snapshot.clone(),
			on_retired: config.on_retired.clone(),
			dirty: false,
		}
	}

	fn notify_retired(&self, subscriber: &SubscriberKey) {
		if let Some(tx) = &self.on_retired {
			let _ = tx.send(subscriber.clone());
		}
	}

	/// Handles one command; returns false when the actor should stop.
	fn handle(&mut self, cmd: LedgerCmd) -> bool {
		match cmd {
			LedgerCmd::Register {
				subscriber,
				source,
				qualifications,
				handler,
				reply,
			} => {
				// Registration counts as liveness: cancel any pending purge.
				self.pending_purge.remove(&subscriber);
				let id = self.register(subscriber, source, qualifications, handler);
				let _ = reply.send(id);
			}
			LedgerCmd::Unregister { subscriber, reply } => {
				let removed = self.remove_subscriber(&subscriber);
				self.pending_purge.remove(&subscriber);
				self.notify_retired(&subscriber);
				let _ = reply.send(removed);
			}
			LedgerCmd::Drop { id } => {
				for bucket in self.sources.values_mut() {
					let before = bucket.len();
					bucket.retain(|record| record.id != id);
					if bucket.len() != before {
						self.dirty = true;
					}
				}
				self.sources.retain(|_, bucket| !bucket.is_empty());
			}
			LedgerCmd::Find { source, reply } => {
				let records = self.sources.get(&source).cloned().unwrap_or_default();
				let _ = reply.send(records);
			}
			LedgerCmd::SessionClosed { subscriber } => {
				let deadline = Instant::now() + self.grace_window;
				self.pending_purge.insert(subscriber, deadline);
			}
			LedgerCmd::SessionResumed { subscriber, reply } => {
				self.pending_purge.remove(&subscriber);
				let alive = self
					.sources
					.values()
					.any(|bucket| bucket.iter().any(|record| record.subscriber == subscriber));
				let _ = reply.send(alive);
			}
			LedgerCmd::Persist { reply } => {
				let _ = reply.send(self.persist(true));
			}
			LedgerCmd::Shutdown { reply } => {
				if let Err(error) = self.persist(true) {
					warn!(%error, "final ledger snapshot failed");
				}
				let _ = reply.send(());
				return false;
			}
		}
		true
	}

	fn register(
		&mut self,
		subscriber: SubscriberKey,
		source: String,
		qualifications: Qualifications,
		handler: Option<String>,
	) -> SubscriptionId {
		let bucket = self.sources.entry(source.clone()).or_default();
		if let Some(existing) = bucket
			.iter()
			.find(|record| record.same_query(&subscriber, &source, &qualifications))
		{
			return existing.id;
		}
		let id = SubscriptionId(self.next_id);
		self.next_id += 1;
		bucket.push(SubscriptionRecord {
			id,
			subscriber,
			source,
			qualifications,
			handler,
		});
		self.dirty = true;
		id
	}

	fn remove_subscriber(&mut self, subscriber: &SubscriberKey) -> usize {
		let mut removed = 0;
		for bucket in self.sources.values_mut() {
			let before = bucket.len();
			bucket.retain(|record| record.subscriber != *subscriber);
			removed += before - bucket.len();
		}
		self.sources.retain(|_, bucket| !bucket.is_empty());
		if removed > 0 {
			self.dirty = true;
		}
		removed
	}

	fn sweep(&mut self) {
		let now = Instant::now();
		let expired: Vec<SubscriberKey> = self
			.pending_purge
			.iter()
			.filter(|(_, deadline)| **deadline <= now)
			.map(|(subscriber, _)| subscriber.clone())
			.collect();
		for subscriber in expired {
			self.pending_purge.remove(&subscriber);
			let removed = self.remove_subscriber(&subscriber);
			self.notify_retired(&subscriber);
			debug!(%subscriber, removed, "grace window expired, purged records");
		}
	}

	/// Persists the current state. With `force`, writes even when clean.
	fn persist(&mut self, force: bool) -> Result<()> {
		let Some(spec) = &self.snapshot else {
			return Ok(());
		};
		if !self.dirty && !force {
			return Ok(());
		}
		let snapshot = Snapshot {
			next_id: self.next_id,
			epoch: self.epoch,
			sources: self.sources.clone(),
		};
		snapshot::write_snapshot(spec, &snapshot)?;
		self.dirty = false;
		Ok(())
	}

	fn persist_if_dirty(&mut self) {
		if let Err(error) = self.persist(false) {
			warn!(%error, "periodic ledger snapshot failed; live delivery unaffected");
		}
	}
}

/// The ledger actor: single owner of all subscription records.
pub struct LedgerService;

impl LedgerService {
	/// Restores any snapshot and starts the actor, returning its handle.
	///
	/// Restoration happens before the first command is accepted, so a
	/// mutation right after restart still finds previously-registered
	/// subscriptions.
	pub fn start(config: LedgerConfig) -> LedgerHandle {
		let mut state = LedgerState::new(&config);
		if let Some(spec) = &config.snapshot {
			match snapshot::read_snapshot(spec) {
				Ok(Some(restored)) => {
					state.next_id = restored.next_id;
					state.epoch = restored.epoch + 1;
					state.sources = restored.sources;
					debug!(
						records = state.sources.values().map(Vec::len).sum::<usize>(),
						epoch = state.epoch,
						"restored ledger snapshot"
					);
					// Burn the bumped epoch right away: a crash before the
					// next periodic snapshot must not hand it out twice.
					if let Err(error) = state.persist(true) {
						warn!(%error, "could not persist restored ledger snapshot");
					}
				}
				Ok(None) => {}
				Err(error) => {
					warn!(%error, "failed to restore ledger snapshot; starting empty");
				}
			}
		}

		let epoch = state.epoch;
		let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
		tokio::spawn(run(state, rx, config.snapshot_interval));
		LedgerHandle { tx, epoch }
	}
}

async fn run(
	mut state: LedgerState,
	mut rx: mpsc::Receiver<LedgerCmd>,
	snapshot_interval: Duration,
) {
	let mut sweep = interval(SWEEP_INTERVAL);
	let mut persist = interval(snapshot_interval);
	loop {
		tokio::select! {
			cmd = rx.recv() => {
				let Some(cmd) = cmd else { break };
				if !state.handle(cmd) {
					return;
				}
			}
			_ = sweep.tick() => state.sweep(),
			_ = persist.tick() => state.persist_if_dirty(),
		}
	}
	// All handles dropped: persist best-effort on the way out.
	state.persist_if_dirty();
}

/// Cloneable handle to the ledger actor.
#[derive(Clone)]
pub struct LedgerHandle {
	tx: mpsc::Sender<LedgerCmd>,
	epoch: u64,
}

impl LedgerHandle {
	/// Sequence epoch of this process lifetime.
	///
	/// Strictly increases across restarts restored from the same snapshot,
	/// so sequence numbers derived from it never regress below marks a
	/// surviving client already holds.
	#[must_use]
	pub fn epoch(&self) -> u64 {
		self.epoch
	}

	async fn request<T>(
		&self,
		make: impl FnOnce(oneshot::Sender<T>) -> LedgerCmd,
	) -> Result<T> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(make(reply))
			.await
			.map_err(|_| LedgerError::Stopped)?;
		rx.await.map_err(|_| LedgerError::Stopped)
	}

	/// Registers a subscription; idempotent per query identity.
	pub async fn register(
		&self,
		subscriber: SubscriberKey,
		source: impl Into<String>,
		qualifications: Qualifications,
		handler: Option<String>,
	) -> Result<SubscriptionId> {
		let source = source.into();
		self.request(|reply| LedgerCmd::Register {
			subscriber,
			source,
			qualifications,
			handler,
			reply,
		})
		.await
	}

	/// Removes every record for a subscriber; returns how many went away.
	pub async fn unregister(&self, subscriber: SubscriberKey) -> Result<usize> {
		self.request(|reply| LedgerCmd::Unregister { subscriber, reply })
			.await
	}

	/// Every record registered against a source.
	pub async fn find(&self, source: impl Into<String>) -> Result<Vec<SubscriptionRecord>> {
		let source = source.into();
		self.request(|reply| LedgerCmd::Find { source, reply }).await
	}

	/// Drops one stale record.
	pub async fn drop_record(&self, id: SubscriptionId) -> Result<()> {
		self.tx
			.send(LedgerCmd::Drop { id })
			.await
			.map_err(|_| LedgerError::Stopped)
	}

	/// Starts the reconnect grace window for a subscriber.
	pub async fn session_closed(&self, subscriber: SubscriberKey) -> Result<()> {
		self.tx
			.send(LedgerCmd::SessionClosed { subscriber })
			.await
			.map_err(|_| LedgerError::Stopped)
	}

	/// Cancels a pending purge; returns whether records survived.
	pub async fn session_resumed(&self, subscriber: SubscriberKey) -> Result<bool> {
		self.request(|reply| LedgerCmd::SessionResumed { subscriber, reply })
			.await
	}

	/// Forces a snapshot now.
	pub async fn persist(&self) -> Result<()> {
		self.request(|reply| LedgerCmd::Persist { reply }).await?
	}

	/// Persists and stops the actor.
	pub async fn shutdown(&self) -> Result<()> {
		self.request(|reply| LedgerCmd::Shutdown { reply }).await
	}
}
