//! Distributed registry backend over a shared store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ripple_protocol::{Channel, SubscriberKey, TransformMessage};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::Result;
use crate::store::SharedStore;
use crate::{DeliverySink, Registry};

#[derive(Debug, Default)]
struct LocalState {
	/// Keys whose live-update session is owned by this node, with their
	/// channel sets. The feed listens for the union of these channels.
	members: HashMap<SubscriberKey, HashSet<Channel>>,
	/// Delivery sinks for subscribers connected to this node.
	sinks: HashMap<SubscriberKey, DeliverySink>,
}

/// Multi-node registry backend.
///
/// Channel membership lives in the shared store (one JSON-encoded row per
/// subscriber key) and publishing goes through the store's pub/sub, so any
/// node can fan a message out to a subscriber whose socket is held by a
/// different node. Each node keeps one feed subscribed to the union of the
/// channels its local subscribers need; a membership change triggers exactly
/// one feed reconnect, not one per channel.
pub struct SharedRegistry<S> {
	store: Arc<S>,
	local: Arc<Mutex<LocalState>>,
	pump: Mutex<Option<JoinHandle<()>>>,
}

impl<S: SharedStore> SharedRegistry<S> {
	/// Creates a registry node over the shared store.
	pub fn new(store: Arc<S>) -> Self {
		Self {
			store,
			local: Arc::new(Mutex::new(LocalState::default())),
			pump: Mutex::new(None),
		}
	}

	/// Reconnects the feed to the current union of locally-needed channels.
	async fn resync_feed(&self) -> Result<()> {
		let topics: Vec<String> = {
			let local = self.local.lock().unwrap();
			let union: BTreeSet<String> = local
				.members
				.values()
				.flatten()
				.map(Channel::to_string)
				.collect();
			union.into_iter().collect()
		};

		if let Some(old) = self.pump.lock().unwrap().take() {
			old.abort();
		}
		if topics.is_empty() {
			return Ok(());
		}

		let mut feed = self.store.subscribe(&topics).await?;
		let local = Arc::clone(&self.local);
		let handle = tokio::spawn(async move {
			while let Some((_topic, payload)) = feed.recv().await {
				let message: TransformMessage = match serde_json::from_str(&payload) {
					Ok(message) => message,
					Err(error) => {
						warn!(%error, "undecodable payload on shared feed");
						continue;
					}
				};
				let local = local.lock().unwrap();
				for (key, channels) in &local.members {
					if !channels.contains(&message.channel) {
						continue;
					}
					if let Some(sink) = local.sinks.get(key) {
						let _ = sink.send(message.clone());
					}
				}
			}
		});
		// Swap-and-abort: a concurrent resync may have installed its own
		// pump since ours was spawned; assigning over it would leak a task
		// that keeps delivering.
		if let Some(raced) = self.pump.lock().unwrap().replace(handle) {
			raced.abort();
		}
		Ok(())
	}
}

impl<S> Drop for SharedRegistry<S> {
	fn drop(&mut self) {
		if let Ok(mut pump) = self.pump.lock()
			&& let Some(handle) = pump.take()
		{
			handle.abort();
		}
	}
}

fn encode_row(channels: &HashSet<Channel>) -> String {
	let sorted: BTreeSet<String> = channels.iter().map(Channel::to_string).collect();
	serde_json::to_string(&sorted).unwrap_or_else(|_| "[]".to_string())
}

fn decode_row(row: Option<&str>) -> Result<HashSet<Channel>> {
	let Some(row) = row else {
		return Ok(HashSet::new());
	};
	let literals: Vec<String> = serde_json::from_str(row)?;
	literals
		.iter()
		.map(|literal| Ok(Channel::parse(literal)?))
		.collect()
}

#[async_trait]
impl<S: SharedStore> Registry for SharedRegistry<S> {
	async fn subscribe(&self, key: &SubscriberKey, channels: &[Channel]) -> Result<()> {
		let row = self.store.hash_get(key.as_str()).await?;
		let mut set = decode_row(row.as_deref())?;
		let mut changed = false;
		for channel in channels {
			changed |= set.insert(channel.clone());
		}
		if changed {
			self.store
				.hash_set(key.as_str(), &encode_row(&set))
				.await?;
		}
		// A reconnect can land on a node that has never listened for this
		// key's channels even though the store row already carries them;
		// the feed must resync whenever the local union gains something,
		// not only when the row changed.
		let locally_new = {
			let mut local = self.local.lock().unwrap();
			let known = local.members.get(key) != Some(&set);
			local.members.insert(key.clone(), set);
			known
		};
		if changed || locally_new {
			self.resync_feed().await?;
		}
		Ok(())
	}

	async fn unsubscribe(&self, key: &SubscriberKey, channels: &[Channel]) -> Result<()> {
		let row = self.store.hash_get(key.as_str()).await?;
		let set = decode_row(row.as_deref())?;
		let kept: HashSet<Channel> = set
			.iter()
			.filter(|channel| !channels.iter().any(|pattern| pattern.covers(channel)))
			.cloned()
			.collect();
		if kept.len() == set.len() {
			return Ok(());
		}
		if kept.is_empty() {
			// Drop the row entirely rather than storing an empty list.
			self.store.hash_del(key.as_str()).await?;
		} else {
			self.store
				.hash_set(key.as_str(), &encode_row(&kept))
				.await?;
		}
		{
			let mut local = self.local.lock().unwrap();
			if kept.is_empty() {
				local.members.remove(key);
			} else {
				local.members.insert(key.clone(), kept);
			}
		}
		self.resync_feed().await
	}

	async fn unregister_key(&self, key: &SubscriberKey) -> Result<()> {
		self.store.hash_del(key.as_str()).await?;
		{
			let mut local = self.local.lock().unwrap();
			local.members.remove(key);
			local.sinks.remove(key);
		}
		self.resync_feed().await
	}

	async fn channels_for(&self, key: &SubscriberKey) -> Result<HashSet<Channel>> {
		let row = self.store.hash_get(key.as_str()).await?;
		decode_row(row.as_deref())
	}

	async fn keys_for(&self, channel: &Channel) -> Result<HashSet<SubscriberKey>> {
		let rows = self.store.hash_all().await?;
		let mut keys = HashSet::new();
		for (field, row) in rows {
			if decode_row(Some(&row))?.contains(channel) {
				keys.insert(SubscriberKey::new(field));
			}
		}
		Ok(keys)
	}

	async fn publish(&self, message: TransformMessage) -> Result<usize> {
		let topic = message.channel.to_string();
		let payload = serde_json::to_string(&message)?;
		self.store.publish(&topic, &payload).await?;
		// Delivery happens asynchronously through each node's feed,
		// including our own.
		Ok(0)
	}

	fn attach_sink(&self, key: &SubscriberKey, sink: DeliverySink) {
		self.local.lock().unwrap().sinks.insert(key.clone(), sink);
	}

	fn detach_sink(&self, key: &SubscriberKey) {
		self.local.lock().unwrap().sinks.remove(key);
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use ripple_protocol::{Anchor, Instruction};
	use tokio::sync::mpsc;
	use tokio::time::timeout;

	use super::*;
	use crate::store::MemoryStore;

	fn message(channel: Channel) -> TransformMessage {
		TransformMessage {
			channel,
			anchor: Anchor::new("posts-list", 0),
			seq: 1,
			calls: vec![Instruction::new("remove", vec![])],
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_cross_node_delivery() {
		let store = Arc::new(MemoryStore::new());
		let node_a = SharedRegistry::new(Arc::clone(&store));
		let node_b = SharedRegistry::new(Arc::clone(&store));

		let key = SubscriberKey::new("remote");
		let channel = Channel::new("posts", ["1"]);
		let (tx, mut rx) = mpsc::unbounded_channel();
		node_b.attach_sink(&key, tx);
		node_b.subscribe(&key, &[channel.clone()]).await.unwrap();

		node_a.publish(message(channel.clone())).await.unwrap();

		let received = timeout(Duration::from_secs(1), rx.recv())
			.await
			.expect("delivery timed out")
			.expect("sink closed");
		assert_eq!(received.channel, channel);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_reconnect_on_fresh_node_resyncs_feed() {
		let store = Arc::new(MemoryStore::new());
		let key = SubscriberKey::new("roaming");
		let channel = Channel::new("posts", ["1"]);

		// The subscriber's row survives its old node going away uncleanly.
		{
			let node_a = SharedRegistry::new(Arc::clone(&store));
			node_a.subscribe(&key, &[channel.clone()]).await.unwrap();
		}

		// The reconnect lands on a node whose feed has never carried this
		// channel; the unchanged store row must not stop the resync.
		let node_b = SharedRegistry::new(Arc::clone(&store));
		let (tx, mut rx) = mpsc::unbounded_channel();
		node_b.attach_sink(&key, tx);
		node_b.subscribe(&key, &[channel.clone()]).await.unwrap();

		let publisher = SharedRegistry::new(Arc::clone(&store));
		publisher.publish(message(channel.clone())).await.unwrap();

		let received = timeout(Duration::from_secs(1), rx.recv())
			.await
			.expect("delivery timed out")
			.expect("sink closed");
		assert_eq!(received.channel, channel);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_repeated_resyncs_leave_one_pump() {
		let store = Arc::new(MemoryStore::new());
		let node = SharedRegistry::new(Arc::clone(&store));
		let key = SubscriberKey::new("a");
		let channel = Channel::bare("posts");
		let (tx, mut rx) = mpsc::unbounded_channel();
		node.attach_sink(&key, tx);

		node.subscribe(&key, &[channel.clone()]).await.unwrap();
		node.subscribe(&key, &[Channel::bare("comments")]).await.unwrap();
		node.subscribe(&key, &[Channel::bare("tags")]).await.unwrap();

		node.publish(message(channel.clone())).await.unwrap();

		timeout(Duration::from_secs(1), rx.recv())
			.await
			.expect("delivery timed out")
			.expect("sink closed");
		// A superseded pump left running would deliver the same message
		// again through the old feed.
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_one_feed_reconnect_per_membership_change() {
		let store = Arc::new(MemoryStore::new());
		let node = SharedRegistry::new(Arc::clone(&store));
		let key = SubscriberKey::new("a");

		node.subscribe(
			&key,
			&[Channel::bare("posts"), Channel::bare("comments")],
		)
		.await
		.unwrap();
		assert_eq!(store.subscribe_calls(), 1);

		node.subscribe(&key, &[Channel::bare("tags")]).await.unwrap();
		assert_eq!(store.subscribe_calls(), 2);

		// Re-subscribing an existing channel changes nothing.
		node.subscribe(&key, &[Channel::bare("tags")]).await.unwrap();
		assert_eq!(store.subscribe_calls(), 2);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_unregister_removes_membership_row() {
		let store = Arc::new(MemoryStore::new());
		let node = SharedRegistry::new(Arc::clone(&store));
		let key = SubscriberKey::new("a");
		node.subscribe(&key, &[Channel::bare("posts")]).await.unwrap();
		assert_eq!(store.hash_all().await.unwrap().len(), 1);

		node.unregister_key(&key).await.unwrap();
		assert!(store.hash_all().await.unwrap().is_empty());
		assert!(node.channels_for(&key).await.unwrap().is_empty());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_keys_for_sees_other_nodes_subscribers() {
		let store = Arc::new(MemoryStore::new());
		let node_a = SharedRegistry::new(Arc::clone(&store));
		let node_b = SharedRegistry::new(Arc::clone(&store));
		let channel = Channel::bare("posts");

		let on_a = SubscriberKey::new("on-a");
		let on_b = SubscriberKey::new("on-b");
		node_a.subscribe(&on_a, &[channel.clone()]).await.unwrap();
		node_b.subscribe(&on_b, &[channel.clone()]).await.unwrap();

		let keys = node_a.keys_for(&channel).await.unwrap();
		assert_eq!(keys, HashSet::from([on_a, on_b]));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_wildcard_unsubscribe_drops_emptied_row() {
		let store = Arc::new(MemoryStore::new());
		let node = SharedRegistry::new(Arc::clone(&store));
		let key = SubscriberKey::new("a");
		node.subscribe(
			&key,
			&[Channel::bare("posts"), Channel::new("posts", ["5"])],
		)
		.await
		.unwrap();

		node.unsubscribe(&key, &[Channel::wildcard("posts")])
			.await
			.unwrap();

		assert!(store.hash_all().await.unwrap().is_empty());
	}
}
