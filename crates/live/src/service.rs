//! Top-level live-update service wiring.

use std::sync::Arc;

use ripple_ledger::{LedgerHandle, LedgerService, Qualifications, SubscriptionId};
use ripple_protocol::{ChangeKind, Channel, MutationEvent, SubscriberKey};
use ripple_registry::{DeliverySink, Registry};
use tokio::sync::mpsc;
use tracing::debug;

use crate::broadcast::Broadcaster;
use crate::config::LiveConfig;
use crate::render::Renderer;
use crate::{LiveError, Result};

/// The channel a subscriber's own messages are addressed to.
#[must_use]
pub fn subscriber_channel(key: &SubscriberKey) -> Channel {
	Channel::new("subscriber", [key.as_str()])
}

/// The live-update subsystem, explicitly constructed and owned by the
/// application's startup sequence.
///
/// Owns the ledger actor and broadcaster; the registry and renderer are
/// injected so single-node and multi-node deployments differ only in the
/// registry backend handed in here.
pub struct LiveUpdate {
	ledger: LedgerHandle,
	registry: Arc<dyn Registry>,
	broadcaster: Broadcaster,
}

impl LiveUpdate {
	/// Restores the ledger and starts the subsystem.
	pub fn start(
		config: LiveConfig,
		registry: Arc<dyn Registry>,
		renderer: Arc<dyn Renderer>,
	) -> Self {
		// Retired subscribers flow from the ledger to the broadcaster so
		// their sequence counters are released.
		let (retired_tx, retired_rx) = mpsc::unbounded_channel();
		let mut ledger_config = config.ledger_config();
		ledger_config.on_retired = Some(retired_tx);
		let ledger = LedgerService::start(ledger_config);
		let broadcaster = Broadcaster::new(
			ledger.clone(),
			Arc::clone(&registry),
			renderer,
			config.per_record_timeout,
			config.source_mailbox_capacity,
			retired_rx,
		);
		Self {
			ledger,
			registry,
			broadcaster,
		}
	}

	/// Establishes (or resumes) a client's live-update session.
	///
	/// With `key: None` a fresh subscriber key is generated. Passing an
	/// existing key within the grace window resumes the session: surviving
	/// ledger records keep working without any re-render.
	pub async fn connect(
		&self,
		key: Option<SubscriberKey>,
		sink: DeliverySink,
	) -> Result<SubscriberKey> {
		let (key, resuming) = match key {
			Some(key) => (key, true),
			None => (SubscriberKey::generate(), false),
		};
		if resuming {
			let survived = self.ledger.session_resumed(key.clone()).await?;
			debug!(subscriber = %key, survived, "session resumed");
		}
		self.registry.attach_sink(&key, sink);
		self.registry
			.subscribe(&key, &[subscriber_channel(&key)])
			.await?;
		Ok(key)
	}

	/// Tears a client's transport down.
	///
	/// Registry entries go away immediately; ledger records enter the
	/// grace window and are purged only if the client does not reconnect
	/// in time.
	pub async fn disconnect(&self, key: &SubscriberKey) -> Result<()> {
		self.registry.detach_sink(key);
		self.registry.unregister_key(key).await?;
		self.ledger.session_closed(key.clone()).await?;
		Ok(())
	}

	/// Records that a render subscribed a query for a client.
	///
	/// Idempotent per `(key, source, qualifications)`.
	pub async fn subscribe_query(
		&self,
		key: &SubscriberKey,
		source: impl Into<String>,
		qualifications: Qualifications,
		handler: Option<String>,
	) -> Result<SubscriptionId> {
		Ok(self
			.ledger
			.register(key.clone(), source, qualifications, handler)
			.await?)
	}

	/// Subscribes a client to additional channels.
	pub async fn subscribe_channels(
		&self,
		key: &SubscriberKey,
		channels: &[Channel],
	) -> Result<()> {
		Ok(self.registry.subscribe(key, channels).await?)
	}

	/// Unsubscribes a client from channels (wildcards cover a whole name).
	pub async fn unsubscribe_channels(
		&self,
		key: &SubscriberKey,
		channels: &[Channel],
	) -> Result<()> {
		Ok(self.registry.unsubscribe(key, channels).await?)
	}

	/// Entry point for the storage layer: a write committed.
	pub async fn on_commit(
		&self,
		source: impl Into<String>,
		changed_ids: Vec<serde_json::Value>,
		kind: ChangeKind,
	) -> Result<()> {
		self.broadcaster
			.on_commit(MutationEvent::new(source, changed_ids, kind))
			.await
	}

	/// The ledger handle, for introspection and persistence control.
	#[must_use]
	pub fn ledger(&self) -> &LedgerHandle {
		&self.ledger
	}

	/// The registry backend.
	#[must_use]
	pub fn registry(&self) -> &Arc<dyn Registry> {
		&self.registry
	}

	#[cfg(test)]
	pub(crate) fn broadcaster(&self) -> &Broadcaster {
		&self.broadcaster
	}

	/// Stops the broadcaster and persists the ledger.
	pub async fn shutdown(&self) -> Result<()> {
		self.broadcaster.shutdown();
		self.ledger.shutdown().await.map_err(LiveError::from)
	}
}
