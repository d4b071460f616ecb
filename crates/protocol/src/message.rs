//! Transformation messages and the mutation events that trigger them.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::channel::Channel;
use crate::error::WireError;
use crate::instruction::Instruction;

/// Logical location in a previously-rendered document.
///
/// Anchors address "the `index`-th node carrying `binding` under the
/// client's rendered root", not absolute DOM paths, since the client
/// document may have diverged slightly since the last full render.
/// Rendered as `binding~index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Anchor {
	/// Binding label the target node carries.
	pub binding: String,
	/// Zero-based index among nodes with that binding, in document order.
	pub index: u32,
}

impl Anchor {
	/// Creates an anchor.
	pub fn new(binding: impl Into<String>, index: u32) -> Self {
		Self {
			binding: binding.into(),
			index,
		}
	}

	/// Parses an anchor from its `binding~index` rendering.
	pub fn parse(literal: &str) -> Result<Self, WireError> {
		let invalid = || WireError::InvalidAnchor(literal.to_string());
		let (binding, index) = literal.rsplit_once('~').ok_or_else(invalid)?;
		if binding.is_empty() {
			return Err(invalid());
		}
		let index = index.parse().map_err(|_| invalid())?;
		Ok(Self {
			binding: binding.to_string(),
			index,
		})
	}
}

impl fmt::Display for Anchor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}~{}", self.binding, self.index)
	}
}

impl Serialize for Anchor {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Anchor {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let literal = String::deserialize(deserializer)?;
		Self::parse(&literal).map_err(D::Error::custom)
	}
}

/// The wire payload pushed to subscribers: a recorded instruction tree plus
/// addressing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformMessage {
	/// Channel the message is addressed to.
	pub channel: Channel,
	/// Node in the previously-rendered document the calls apply to.
	pub anchor: Anchor,
	/// Per-anchor monotonically increasing sequence number.
	///
	/// The replayer discards any message whose seq is not greater than the
	/// last one applied for the same anchor, making duplicate and
	/// out-of-order delivery safe.
	pub seq: u64,
	/// Recorded calls in causal order.
	pub calls: Vec<Instruction>,
}

/// Kind of committed write a mutation event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
	/// New records were inserted.
	Created,
	/// Existing records were modified.
	Updated,
	/// Records were removed.
	Deleted,
}

/// A committed write, as reported by the storage layer.
///
/// Ephemeral: produced at commit time, consumed synchronously by the
/// broadcaster, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
	/// Name of the data source that changed.
	pub source: String,
	/// Identifiers of the changed records.
	pub changed_ids: Vec<Value>,
	/// What happened to them.
	pub kind: ChangeKind,
}

impl MutationEvent {
	/// Creates a mutation event.
	pub fn new(source: impl Into<String>, changed_ids: Vec<Value>, kind: ChangeKind) -> Self {
		Self {
			source: source.into(),
			changed_ids,
			kind,
		}
	}
}
