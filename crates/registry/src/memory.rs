//! In-process registry backend.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use ripple_protocol::{Channel, SubscriberKey, TransformMessage};
use tracing::debug;

use crate::error::Result;
use crate::{DeliverySink, Registry};

#[derive(Debug, Default)]
struct MemoryState {
	/// Subscriber key to its channel set.
	forward: HashMap<SubscriberKey, HashSet<Channel>>,
	/// Channel to subscriber keys, kept consistent with `forward`.
	reverse: HashMap<Channel, HashSet<SubscriberKey>>,
	/// Delivery sinks for connected subscribers.
	sinks: HashMap<SubscriberKey, DeliverySink>,
}

impl MemoryState {
	fn remove_membership(&mut self, key: &SubscriberKey, channel: &Channel) {
		if let Some(channels) = self.forward.get_mut(key) {
			channels.remove(channel);
			if channels.is_empty() {
				self.forward.remove(key);
			}
		}
		if let Some(keys) = self.reverse.get_mut(channel) {
			keys.remove(key);
			if keys.is_empty() {
				self.reverse.remove(channel);
			}
		}
	}
}

/// Single-node registry keeping membership in process memory.
///
/// Forward and reverse indexes are updated together under one short-lived
/// lock, giving O(1) amortized subscribe/unsubscribe.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
	state: Mutex<MemoryState>,
}

impl MemoryRegistry {
	/// Creates an empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl Registry for MemoryRegistry {
	async fn subscribe(&self, key: &SubscriberKey, channels: &[Channel]) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		for channel in channels {
			state
				.forward
				.entry(key.clone())
				.or_default()
				.insert(channel.clone());
			state
				.reverse
				.entry(channel.clone())
				.or_default()
				.insert(key.clone());
		}
		Ok(())
	}

	async fn unsubscribe(&self, key: &SubscriberKey, channels: &[Channel]) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		for pattern in channels {
			let covered: Vec<Channel> = state
				.forward
				.get(key)
				.map(|subscribed| {
					subscribed
						.iter()
						.filter(|channel| pattern.covers(channel))
						.cloned()
						.collect()
				})
				.unwrap_or_default();
			for channel in covered {
				state.remove_membership(key, &channel);
			}
		}
		Ok(())
	}

	async fn unregister_key(&self, key: &SubscriberKey) -> Result<()> {
		let mut state = self.state.lock().unwrap();
		// Remove the row entirely rather than leaving an empty set behind.
		if let Some(channels) = state.forward.remove(key) {
			for channel in channels {
				if let Some(keys) = state.reverse.get_mut(&channel) {
					keys.remove(key);
					if keys.is_empty() {
						state.reverse.remove(&channel);
					}
				}
			}
		}
		state.sinks.remove(key);
		Ok(())
	}

	async fn channels_for(&self, key: &SubscriberKey) -> Result<HashSet<Channel>> {
		let state = self.state.lock().unwrap();
		Ok(state.forward.get(key).cloned().unwrap_or_default())
	}

	async fn keys_for(&self, channel: &Channel) -> Result<HashSet<SubscriberKey>> {
		let state = self.state.lock().unwrap();
		Ok(state.reverse.get(channel).cloned().unwrap_or_default())
	}

	async fn publish(&self, message: TransformMessage) -> Result<usize> {
		let state = self.state.lock().unwrap();
		let Some(keys) = state.reverse.get(&message.channel) else {
			return Ok(0);
		};
		let mut delivered = 0;
		for key in keys {
			if let Some(sink) = state.sinks.get(key) {
				if sink.send(message.clone()).is_ok() {
					delivered += 1;
				}
			} else {
				debug!(subscriber = %key, channel = %message.channel, "no live sink, dropping message");
			}
		}
		Ok(delivered)
	}

	fn attach_sink(&self, key: &SubscriberKey, sink: DeliverySink) {
		self.state.lock().unwrap().sinks.insert(key.clone(), sink);
	}

	fn detach_sink(&self, key: &SubscriberKey) {
		self.state.lock().unwrap().sinks.remove(key);
	}
}

#[cfg(test)]
mod tests {
	use ripple_protocol::{Anchor, Instruction};
	use tokio::sync::mpsc;

	use super::*;

	fn message(channel: Channel) -> TransformMessage {
		TransformMessage {
			channel,
			anchor: Anchor::new("posts-list", 0),
			seq: 1,
			calls: vec![Instruction::new("remove", vec![])],
		}
	}

	#[tokio::test]
	async fn test_subscribe_updates_both_indexes() {
		let registry = MemoryRegistry::new();
		let key = SubscriberKey::new("a");
		let channel = Channel::new("posts", ["5"]);

		registry.subscribe(&key, &[channel.clone()]).await.unwrap();

		assert!(registry.channels_for(&key).await.unwrap().contains(&channel));
		assert!(registry.keys_for(&channel).await.unwrap().contains(&key));
	}

	#[tokio::test]
	async fn test_unsubscribe_removes_from_both_indexes() {
		let registry = MemoryRegistry::new();
		let key = SubscriberKey::new("a");
		let channel = Channel::bare("posts");

		registry.subscribe(&key, &[channel.clone()]).await.unwrap();
		registry.unsubscribe(&key, &[channel.clone()]).await.unwrap();

		assert!(registry.channels_for(&key).await.unwrap().is_empty());
		assert!(registry.keys_for(&channel).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_unsubscribe_unknown_channel_is_noop() {
		let registry = MemoryRegistry::new();
		let key = SubscriberKey::new("a");
		registry
			.unsubscribe(&key, &[Channel::bare("never")])
			.await
			.unwrap();
		assert!(registry.channels_for(&key).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_wildcard_unsubscribe_clears_name() {
		let registry = MemoryRegistry::new();
		let key = SubscriberKey::new("a");
		let qualified = Channel::new("posts", ["5"]);
		let bare = Channel::bare("posts");
		let other = Channel::bare("comments");
		registry
			.subscribe(&key, &[qualified.clone(), bare.clone(), other.clone()])
			.await
			.unwrap();

		registry
			.unsubscribe(&key, &[Channel::wildcard("posts")])
			.await
			.unwrap();

		let channels = registry.channels_for(&key).await.unwrap();
		assert_eq!(channels, HashSet::from([other]));
	}

	#[tokio::test]
	async fn test_publish_reaches_only_attached_sinks() {
		let registry = MemoryRegistry::new();
		let here = SubscriberKey::new("here");
		let gone = SubscriberKey::new("gone");
		let channel = Channel::bare("posts");
		registry
			.subscribe(&here, &[channel.clone()])
			.await
			.unwrap();
		registry
			.subscribe(&gone, &[channel.clone()])
			.await
			.unwrap();

		let (tx, mut rx) = mpsc::unbounded_channel();
		registry.attach_sink(&here, tx);

		let delivered = registry.publish(message(channel)).await.unwrap();
		assert_eq!(delivered, 1);
		assert!(rx.try_recv().is_ok());
	}

	#[tokio::test]
	async fn test_publish_unknown_channel_is_noop() {
		let registry = MemoryRegistry::new();
		let delivered = registry
			.publish(message(Channel::bare("nothing")))
			.await
			.unwrap();
		assert_eq!(delivered, 0);
	}

	#[tokio::test]
	async fn test_unregister_removes_row_entirely() {
		let registry = MemoryRegistry::new();
		let key = SubscriberKey::new("a");
		let channel = Channel::bare("posts");
		registry.subscribe(&key, &[channel.clone()]).await.unwrap();
		let (tx, _rx) = mpsc::unbounded_channel();
		registry.attach_sink(&key, tx);

		registry.unregister_key(&key).await.unwrap();

		assert!(registry.channels_for(&key).await.unwrap().is_empty());
		assert!(registry.keys_for(&channel).await.unwrap().is_empty());
		assert_eq!(registry.publish(message(channel)).await.unwrap(), 0);
	}
}
