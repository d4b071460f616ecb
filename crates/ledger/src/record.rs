//! Subscription record types.

use std::collections::BTreeMap;

use ripple_protocol::SubscriberKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ledger-assigned identifier for one subscription record.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SubscriptionId(pub u64);

/// Canonicalized field/value constraints narrowing a subscription.
///
/// A `BTreeMap` so that equal qualification sets compare and serialize
/// identically regardless of construction order.
pub type Qualifications = BTreeMap<String, Value>;

/// One registered data-query subscription.
///
/// Many records may share a subscriber key (one per subscribed query on a
/// page). Records are persisted in ledger snapshots so active subscriptions
/// survive a process restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
	/// Ledger-assigned id.
	pub id: SubscriptionId,
	/// The subscribed client's live-update session key.
	pub subscriber: SubscriberKey,
	/// Data source the query reads from.
	pub source: String,
	/// Canonicalized qualification set.
	pub qualifications: Qualifications,
	/// Optional handler override, carried opaquely to the renderer.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub handler: Option<String>,
}

impl SubscriptionRecord {
	/// Whether this record registers the same query for the same subscriber.
	#[must_use]
	pub fn same_query(&self, subscriber: &SubscriberKey, source: &str, qualifications: &Qualifications) -> bool {
		self.subscriber == *subscriber
			&& self.source == source
			&& self.qualifications == *qualifications
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_qualifications_canonical_order() {
		let mut forward = Qualifications::new();
		forward.insert("a".to_string(), json!(1));
		forward.insert("b".to_string(), json!(2));
		let mut reverse = Qualifications::new();
		reverse.insert("b".to_string(), json!(2));
		reverse.insert("a".to_string(), json!(1));

		assert_eq!(forward, reverse);
		assert_eq!(
			serde_json::to_string(&forward).unwrap(),
			serde_json::to_string(&reverse).unwrap()
		);
	}

	#[test]
	fn test_same_query_ignores_id_and_handler() {
		let quals = Qualifications::from([("id".to_string(), json!(5))]);
		let record = SubscriptionRecord {
			id: SubscriptionId(1),
			subscriber: SubscriberKey::new("a"),
			source: "posts".to_string(),
			qualifications: quals.clone(),
			handler: Some("custom".to_string()),
		};

		assert!(record.same_query(&SubscriberKey::new("a"), "posts", &quals));
		assert!(!record.same_query(&SubscriberKey::new("b"), "posts", &quals));
		assert!(!record.same_query(&SubscriberKey::new("a"), "comments", &quals));
	}
}
