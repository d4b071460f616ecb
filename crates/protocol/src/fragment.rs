//! Serializable content literals for rendered fragments.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WireError;

/// A tree literal describing rendered content at the templating boundary.
///
/// The templating engine itself is out of scope; what crosses this boundary
/// (and the wire) is the already-rendered structure: element tag, optional
/// binding label used for anchoring, attributes, text content, and children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
	/// Element tag name.
	pub tag: String,
	/// Binding label used to anchor instruction trees, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub binding: Option<String>,
	/// Attribute name/value pairs in render order.
	#[serde(default, skip_serializing_if = "IndexMap::is_empty")]
	pub attrs: IndexMap<String, String>,
	/// Direct text content, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	/// Child fragments in document order.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub children: Vec<Fragment>,
}

impl Fragment {
	/// Creates an empty fragment with the given tag.
	pub fn new(tag: impl Into<String>) -> Self {
		Self {
			tag: tag.into(),
			binding: None,
			attrs: IndexMap::new(),
			text: None,
			children: Vec::new(),
		}
	}

	/// Sets the binding label.
	#[must_use]
	pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
		self.binding = Some(binding.into());
		self
	}

	/// Adds an attribute.
	#[must_use]
	pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.attrs.insert(name.into(), value.into());
		self
	}

	/// Sets the text content.
	#[must_use]
	pub fn with_text(mut self, text: impl Into<String>) -> Self {
		self.text = Some(text.into());
		self
	}

	/// Appends a child fragment.
	#[must_use]
	pub fn with_child(mut self, child: Fragment) -> Self {
		self.children.push(child);
		self
	}

	/// Encodes the fragment as a JSON instruction argument.
	///
	/// Built by hand rather than through `serde_json::to_value` so encoding
	/// is infallible.
	#[must_use]
	pub fn to_value(&self) -> Value {
		let mut map = serde_json::Map::new();
		map.insert("tag".to_string(), Value::String(self.tag.clone()));
		if let Some(binding) = &self.binding {
			map.insert("binding".to_string(), Value::String(binding.clone()));
		}
		if !self.attrs.is_empty() {
			let attrs = self
				.attrs
				.iter()
				.map(|(name, value)| (name.clone(), Value::String(value.clone())))
				.collect();
			map.insert("attrs".to_string(), Value::Object(attrs));
		}
		if let Some(text) = &self.text {
			map.insert("text".to_string(), Value::String(text.clone()));
		}
		if !self.children.is_empty() {
			let children = self.children.iter().map(Fragment::to_value).collect();
			map.insert("children".to_string(), Value::Array(children));
		}
		Value::Object(map)
	}

	/// Decodes a fragment from a JSON instruction argument.
	pub fn from_value(value: &Value) -> Result<Self, WireError> {
		Ok(serde_json::from_value(value.clone())?)
	}
}
