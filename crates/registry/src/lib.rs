//! Channel registry backends for ripple.
//!
//! A registry tracks which channels each subscriber key listens on, resolves
//! the reverse question ("who is subscribed to channel X"), and fans
//! transformation messages out to the delivery sinks of matching keys.
//!
//! Two interchangeable backends:
//! * [`MemoryRegistry`] — in-process tables for single-node deployments.
//! * [`SharedRegistry`] — membership in an external key/value + pub/sub
//!   store (via the [`SharedStore`] trait), so any node can deliver to a
//!   socket held by a different node.

#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod shared;
pub mod store;

use std::collections::HashSet;

use async_trait::async_trait;
use ripple_protocol::{Channel, SubscriberKey, TransformMessage};
use tokio::sync::mpsc;

pub use error::{RegistryError, Result};
pub use memory::MemoryRegistry;
pub use shared::SharedRegistry;
pub use store::{MemoryStore, SharedStore, StoreError, StoreFeed};

/// Delivery sink for one connected subscriber.
pub type DeliverySink = mpsc::UnboundedSender<TransformMessage>;

/// Channel membership tracking and message fan-out.
#[async_trait]
pub trait Registry: Send + Sync {
	/// Subscribes a key to the given channels.
	async fn subscribe(&self, key: &SubscriberKey, channels: &[Channel]) -> Result<()>;

	/// Unsubscribes a key from the given channels.
	///
	/// A wildcard channel removes every subscription sharing its name.
	/// Unsubscribing a channel the key was never subscribed to is a no-op.
	async fn unsubscribe(&self, key: &SubscriberKey, channels: &[Channel]) -> Result<()>;

	/// Removes a key's membership row entirely.
	async fn unregister_key(&self, key: &SubscriberKey) -> Result<()>;

	/// Channels the key is subscribed to.
	async fn channels_for(&self, key: &SubscriberKey) -> Result<HashSet<Channel>>;

	/// Keys subscribed to the channel.
	async fn keys_for(&self, channel: &Channel) -> Result<HashSet<SubscriberKey>>;

	/// Publishes a message to every subscriber of its channel.
	///
	/// Returns the number of sinks the message was synchronously handed to;
	/// distributed backends deliver asynchronously through their feed and
	/// return 0. Subscribers without a live sink are skipped; the message
	/// is discarded for them, not queued.
	async fn publish(&self, message: TransformMessage) -> Result<usize>;

	/// Attaches the delivery sink for a connected subscriber.
	fn attach_sink(&self, key: &SubscriberKey, sink: DeliverySink);

	/// Detaches a subscriber's delivery sink.
	fn detach_sink(&self, key: &SubscriberKey);
}
