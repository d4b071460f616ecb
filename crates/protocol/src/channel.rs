//! Channel addressing and subscriber identity.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::WireError;

/// Qualifier value that matches every channel with the same base name.
pub const WILDCARD: &str = "*";

/// An addressable pub/sub topic: a base name plus an ordered list of
/// qualifier values.
///
/// Two channels are equal iff their name and qualifier sequence are
/// element-wise equal. Channels are immutable once constructed; the string
/// rendering `name:qual1:qual2` is the topic key used by registry backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel {
	name: String,
	qualifiers: Vec<String>,
}

impl Channel {
	/// Creates a channel with qualifiers.
	pub fn new<I, S>(name: impl Into<String>, qualifiers: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			name: name.into(),
			qualifiers: qualifiers.into_iter().map(Into::into).collect(),
		}
	}

	/// Creates a channel with no qualifiers.
	pub fn bare(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			qualifiers: Vec::new(),
		}
	}

	/// Creates the wildcard channel for a base name.
	///
	/// Used by unsubscribe to remove every channel sharing the name.
	pub fn wildcard(name: impl Into<String>) -> Self {
		Self::new(name, [WILDCARD])
	}

	/// Returns the base name.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Returns the ordered qualifier values.
	#[must_use]
	pub fn qualifiers(&self) -> &[String] {
		&self.qualifiers
	}

	/// Whether this channel is the wildcard form for its name.
	#[must_use]
	pub fn is_wildcard(&self) -> bool {
		self.qualifiers.len() == 1 && self.qualifiers[0] == WILDCARD
	}

	/// Whether an unsubscribe on `self` removes `other`.
	///
	/// The wildcard form covers every channel with the same name; otherwise
	/// coverage is plain equality.
	#[must_use]
	pub fn covers(&self, other: &Channel) -> bool {
		if self.name != other.name {
			return false;
		}
		self.is_wildcard() || self.qualifiers == other.qualifiers
	}

	/// Parses a channel from its `name:qual1:qual2` rendering.
	pub fn parse(literal: &str) -> Result<Self, WireError> {
		let mut parts = literal.split(':');
		let name = parts.next().unwrap_or_default();
		if name.is_empty() {
			return Err(WireError::InvalidChannel(literal.to_string()));
		}
		Ok(Self {
			name: name.to_string(),
			qualifiers: parts.map(str::to_string).collect(),
		})
	}
}

impl fmt::Display for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.name)?;
		for qualifier in &self.qualifiers {
			write!(f, ":{qualifier}")?;
		}
		Ok(())
	}
}

impl Serialize for Channel {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Channel {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let literal = String::deserialize(deserializer)?;
		Self::parse(&literal).map_err(D::Error::custom)
	}
}

/// Opaque identifier for one client's live-update session.
///
/// Independent of transport-level connection identity, so it survives
/// reconnects within the configured grace window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberKey(String);

impl SubscriberKey {
	/// Wraps an existing key string.
	pub fn new(key: impl Into<String>) -> Self {
		Self(key.into())
	}

	/// Generates a fresh unique key.
	#[must_use]
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	/// Returns the key as a string slice.
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SubscriberKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
