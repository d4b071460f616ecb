//! The mutation broadcaster.
//!
//! One worker task per source name processes that source's mutation events
//! strictly sequentially, so no reordering across concurrent commits to the
//! same source is possible. Workers are created lazily and torn down on
//! shutdown via a cancellation token. Each record's re-render-and-publish
//! step is isolated: its failure or timeout is logged and never aborts the
//! remaining records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ripple_ledger::{LedgerHandle, SubscriptionRecord};
use ripple_protocol::{Anchor, MutationEvent, SubscriberKey, TransformMessage};
use ripple_registry::Registry;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::render::{RenderError, Renderer};
use crate::service::subscriber_channel;
use crate::{LiveError, Result};

/// Width of the per-epoch counter within a sequence number. The ledger
/// epoch occupies the bits above, so sequences from a restarted process
/// always exceed every sequence the previous lifetime handed out.
const EPOCH_SEQ_BITS: u32 = 32;

struct BroadcasterInner {
	ledger: LedgerHandle,
	registry: Arc<dyn Registry>,
	renderer: Arc<dyn Renderer>,
	per_record_timeout: Duration,
	mailbox_capacity: usize,
	/// Base added to every counter, derived from the ledger epoch.
	seq_base: u64,
	/// Lazily-created per-source worker mailboxes.
	workers: Mutex<HashMap<String, mpsc::Sender<MutationEvent>>>,
	/// Per-(subscriber, anchor) sequence counters. Entries are released
	/// when the ledger retires the subscriber.
	seqs: Mutex<HashMap<(SubscriberKey, Anchor), u64>>,
	cancel: CancellationToken,
}

/// Fans committed writes out to affected subscribers.
#[derive(Clone)]
pub struct Broadcaster {
	inner: Arc<BroadcasterInner>,
}

impl Broadcaster {
	/// Creates a broadcaster over the given collaborators.
	///
	/// `retirements` carries subscriber keys the ledger has permanently
	/// retired; their sequence counters are released as they arrive.
	pub fn new(
		ledger: LedgerHandle,
		registry: Arc<dyn Registry>,
		renderer: Arc<dyn Renderer>,
		per_record_timeout: Duration,
		mailbox_capacity: usize,
		retirements: mpsc::UnboundedReceiver<SubscriberKey>,
	) -> Self {
		let seq_base = ledger.epoch() << EPOCH_SEQ_BITS;
		let broadcaster = Self {
			inner: Arc::new(BroadcasterInner {
				ledger,
				registry,
				renderer,
				per_record_timeout,
				mailbox_capacity,
				seq_base,
				workers: Mutex::new(HashMap::new()),
				seqs: Mutex::new(HashMap::new()),
				cancel: CancellationToken::new(),
			}),
		};
		tokio::spawn(run_retirements(
			Arc::clone(&broadcaster.inner),
			retirements,
		));
		broadcaster
	}

	/// Routes a committed write to its source's worker.
	///
	/// Events for the same source are handed to one worker and processed
	/// in arrival order; events for different sources proceed
	/// concurrently.
	pub async fn on_commit(&self, event: MutationEvent) -> Result<()> {
		if self.inner.cancel.is_cancelled() {
			return Err(LiveError::Stopped);
		}
		let tx = self.worker_for(&event.source);
		tx.send(event).await.map_err(|_| LiveError::Stopped)
	}

	/// Stops every worker. In-flight records finish or time out.
	pub fn shutdown(&self) {
		self.inner.cancel.cancel();
		self.inner.workers.lock().unwrap().clear();
	}

	/// Number of live per-(subscriber, anchor) sequence counters.
	#[cfg(test)]
	pub(crate) fn tracked_counters(&self) -> usize {
		self.inner.seqs.lock().unwrap().len()
	}

	fn worker_for(&self, source: &str) -> mpsc::Sender<MutationEvent> {
		let mut workers = self.inner.workers.lock().unwrap();
		if let Some(tx) = workers.get(source) {
			return tx.clone();
		}
		let (tx, rx) = mpsc::channel(self.inner.mailbox_capacity);
		let inner = Arc::clone(&self.inner);
		let name = source.to_string();
		tokio::spawn(run_source_worker(inner, name, rx));
		workers.insert(source.to_string(), tx.clone());
		tx
	}
}

async fn run_retirements(
	inner: Arc<BroadcasterInner>,
	mut rx: mpsc::UnboundedReceiver<SubscriberKey>,
) {
	loop {
		tokio::select! {
			() = inner.cancel.cancelled() => break,
			retired = rx.recv() => {
				let Some(retired) = retired else { break };
				inner
					.seqs
					.lock()
					.unwrap()
					.retain(|(subscriber, _), _| *subscriber != retired);
				debug!(subscriber = %retired, "sequence counters released");
			}
		}
	}
}

async fn run_source_worker(
	inner: Arc<BroadcasterInner>,
	source: String,
	mut rx: mpsc::Receiver<MutationEvent>,
) {
	debug!(source, "broadcast worker started");
	loop {
		tokio::select! {
			() = inner.cancel.cancelled() => break,
			event = rx.recv() => {
				let Some(event) = event else { break };
				inner.process(&event).await;
			}
		}
	}
	debug!(source, "broadcast worker stopped");
}

impl BroadcasterInner {
	async fn process(&self, event: &MutationEvent) {
		let records = match self.ledger.find(event.source.clone()).await {
			Ok(records) => records,
			Err(error) => {
				warn!(source = event.source, %error, "ledger lookup failed, event dropped");
				return;
			}
		};
		// A source with no ledger entries is not an error, just a no-op.
		for record in records {
			if !qualifications_match(&record, event) {
				continue;
			}
			match timeout(self.per_record_timeout, self.broadcast_record(&record, event)).await {
				Ok(Ok(())) => {}
				Ok(Err(LiveError::Render(RenderError::Gone))) => {
					debug!(subscription = ?record.id, "stale subscription dropped");
					let _ = self.ledger.drop_record(record.id).await;
				}
				Ok(Err(error)) => {
					warn!(subscription = ?record.id, %error, "broadcast failed for record");
				}
				Err(_) => {
					warn!(subscription = ?record.id, "per-record broadcast timed out");
				}
			}
		}
	}

	async fn broadcast_record(
		&self,
		record: &SubscriptionRecord,
		event: &MutationEvent,
	) -> Result<()> {
		let updates = self.renderer.render(record, event).await?;
		let channel = subscriber_channel(&record.subscriber);
		for update in updates {
			let seq = self.next_seq(&record.subscriber, &update.anchor);
			let message = TransformMessage {
				channel: channel.clone(),
				anchor: update.anchor,
				seq,
				calls: update.calls,
			};
			self.registry.publish(message).await?;
		}
		Ok(())
	}

	fn next_seq(&self, subscriber: &SubscriberKey, anchor: &Anchor) -> u64 {
		let mut seqs = self.seqs.lock().unwrap();
		let counter = seqs
			.entry((subscriber.clone(), anchor.clone()))
			.or_insert(0);
		*counter += 1;
		self.seq_base + *counter
	}
}

/// Whether a mutation event is relevant to a record.
///
/// An `id` qualification must intersect the changed ids; an unqualified
/// subscription always matches. Qualifications on other fields cannot be
/// checked against an id set and are left to the re-run query.
fn qualifications_match(record: &SubscriptionRecord, event: &MutationEvent) -> bool {
	match record.qualifications.get("id") {
		None => true,
		Some(id) => event.changed_ids.contains(id),
	}
}
