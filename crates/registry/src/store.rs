//! The external store boundary for the distributed registry.
//!
//! The shared backend needs exactly two primitives from its store: atomic
//! hash-field access for membership rows, and pub/sub keyed by channel
//! topic strings. [`MemoryStore`] implements both over process-local state
//! and stands in for the external store in multi-node tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Errors from the shared store.
#[derive(Debug, Error)]
pub enum StoreError {
	/// The store could not be reached or refused the operation.
	#[error("store unavailable: {0}")]
	Unavailable(String),
}

/// An active pub/sub feed: `(topic, payload)` pairs for subscribed topics.
///
/// Dropping the feed tears the subscription down.
#[derive(Debug)]
pub struct StoreFeed {
	rx: mpsc::UnboundedReceiver<(String, String)>,
}

impl StoreFeed {
	/// Creates a feed from its receiving half.
	#[must_use]
	pub fn new(rx: mpsc::UnboundedReceiver<(String, String)>) -> Self {
		Self { rx }
	}

	/// Receives the next published payload, or `None` once the feed closes.
	pub async fn recv(&mut self) -> Option<(String, String)> {
		self.rx.recv().await
	}
}

/// External key/value + pub/sub store used by the distributed registry.
///
/// Membership is a hash keyed by subscriber key with a JSON-encoded channel
/// list per row; row-level get/set/delete must be atomic. Publishing fans a
/// payload out to every feed subscribed to the topic.
#[async_trait]
pub trait SharedStore: Send + Sync + 'static {
	/// Reads one membership row.
	async fn hash_get(&self, field: &str) -> Result<Option<String>, StoreError>;

	/// Writes one membership row.
	async fn hash_set(&self, field: &str, value: &str) -> Result<(), StoreError>;

	/// Deletes one membership row entirely.
	async fn hash_del(&self, field: &str) -> Result<(), StoreError>;

	/// Reads the whole membership hash.
	async fn hash_all(&self) -> Result<HashMap<String, String>, StoreError>;

	/// Publishes a payload to one topic.
	async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError>;

	/// Opens a feed over the given topics, replacing nothing: callers drop
	/// their previous feed to resubscribe.
	async fn subscribe(&self, topics: &[String]) -> Result<StoreFeed, StoreError>;
}

/// In-process [`SharedStore`] double.
///
/// Backs multi-node tests: several [`crate::SharedRegistry`] instances over
/// one `Arc<MemoryStore>` behave like nodes sharing an external store.
#[derive(Debug)]
pub struct MemoryStore {
	rows: Mutex<HashMap<String, String>>,
	bus: broadcast::Sender<(String, String)>,
	subscribe_calls: AtomicUsize,
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryStore {
	/// Creates an empty store.
	#[must_use]
	pub fn new() -> Self {
		let (bus, _) = broadcast::channel(64);
		Self {
			rows: Mutex::new(HashMap::new()),
			bus,
			subscribe_calls: AtomicUsize::new(0),
		}
	}

	/// Number of [`SharedStore::subscribe`] calls made against this store.
	///
	/// Lets tests assert that a membership change causes exactly one feed
	/// reconnect.
	#[must_use]
	pub fn subscribe_calls(&self) -> usize {
		self.subscribe_calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl SharedStore for MemoryStore {
	async fn hash_get(&self, field: &str) -> Result<Option<String>, StoreError> {
		Ok(self.rows.lock().unwrap().get(field).cloned())
	}

	async fn hash_set(&self, field: &str, value: &str) -> Result<(), StoreError> {
		self.rows
			.lock()
			.unwrap()
			.insert(field.to_string(), value.to_string());
		Ok(())
	}

	async fn hash_del(&self, field: &str) -> Result<(), StoreError> {
		self.rows.lock().unwrap().remove(field);
		Ok(())
	}

	async fn hash_all(&self) -> Result<HashMap<String, String>, StoreError> {
		Ok(self.rows.lock().unwrap().clone())
	}

	async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError> {
		// No subscribers yet is not an error.
		let _ = self.bus.send((topic.to_string(), payload.to_string()));
		Ok(())
	}

	async fn subscribe(&self, topics: &[String]) -> Result<StoreFeed, StoreError> {
		self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
		let mut bus_rx = self.bus.subscribe();
		let topics: Vec<String> = topics.to_vec();
		let (tx, rx) = mpsc::unbounded_channel();
		tokio::spawn(async move {
			while let Ok((topic, payload)) = bus_rx.recv().await {
				if !topics.contains(&topic) {
					continue;
				}
				if tx.send((topic, payload)).is_err() {
					break;
				}
			}
		});
		Ok(StoreFeed::new(rx))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_hash_rows_roundtrip() {
		let store = MemoryStore::new();
		store.hash_set("a", "[\"posts\"]").await.unwrap();
		assert_eq!(
			store.hash_get("a").await.unwrap().as_deref(),
			Some("[\"posts\"]")
		);

		store.hash_del("a").await.unwrap();
		assert_eq!(store.hash_get("a").await.unwrap(), None);
		assert!(store.hash_all().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_feed_filters_by_topic() {
		let store = MemoryStore::new();
		let mut feed = store.subscribe(&["posts:5".to_string()]).await.unwrap();

		store.publish("comments", "x").await.unwrap();
		store.publish("posts:5", "y").await.unwrap();

		let (topic, payload) = feed.recv().await.unwrap();
		assert_eq!(topic, "posts:5");
		assert_eq!(payload, "y");
	}
}
