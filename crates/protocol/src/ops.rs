//! The fixed operation vocabulary shared by recorder and replayer.
//!
//! Recordable operations are closed tagged unions, one per templating
//! surface, remapped to client operation names by exhaustive matches. The
//! mapping is part of the wire contract and must stay in lock-step with the
//! client: adding a variant without a [`ClientOp`] counterpart will not
//! compile past the tests below.

use serde_json::Value;

use crate::error::WireError;
use crate::fragment::Fragment;
use crate::instruction::Instruction;

/// A recordable call on a located section of the rendered document.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionCall {
	/// Replace the section's content with a fragment.
	Html(Fragment),
	/// Append a fragment after the section's existing content.
	Append(Fragment),
	/// Remove the section's node from the document.
	Remove,
	/// Locate the first descendant carrying a binding label.
	Find(String),
	/// Open the section's attribute collection.
	Attrs,
}

impl SectionCall {
	/// Client-vocabulary name for this call.
	#[must_use]
	pub fn client_op(&self) -> &'static str {
		match self {
			Self::Html(_) => "html",
			Self::Append(_) => "append",
			Self::Remove => "remove",
			Self::Find(_) => "find",
			Self::Attrs => "attrs",
		}
	}

	/// Encodes the call as a leaf instruction.
	#[must_use]
	pub fn into_instruction(self) -> Instruction {
		let op = self.client_op();
		let args = match self {
			Self::Html(fragment) | Self::Append(fragment) => vec![fragment.to_value()],
			Self::Remove | Self::Attrs => Vec::new(),
			Self::Find(binding) => vec![Value::String(binding)],
		};
		Instruction::new(op, args)
	}
}

/// A recordable call on an attribute collection.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrCall {
	/// Set an attribute to a value.
	Set(String, String),
	/// Remove an attribute.
	Clear(String),
}

impl AttrCall {
	/// Client-vocabulary name for this call.
	#[must_use]
	pub fn client_op(&self) -> &'static str {
		match self {
			Self::Set(..) => "attr",
			Self::Clear(_) => "removeAttr",
		}
	}

	/// Encodes the call as a leaf instruction.
	#[must_use]
	pub fn into_instruction(self) -> Instruction {
		let op = self.client_op();
		let args = match self {
			Self::Set(name, value) => vec![Value::String(name), Value::String(value)],
			Self::Clear(name) => vec![Value::String(name)],
		};
		Instruction::new(op, args)
	}
}

/// Decoded client-side operation.
///
/// The replayer's view of the vocabulary. Every `client_op` name produced by
/// [`SectionCall`] and [`AttrCall`] must decode here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOp {
	/// Replace content.
	Html,
	/// Append content.
	Append,
	/// Remove the node.
	Remove,
	/// Locate a descendant by binding label.
	Find,
	/// Open the attribute collection.
	Attrs,
	/// Set an attribute.
	Attr,
	/// Remove an attribute.
	RemoveAttr,
}

impl ClientOp {
	/// Decodes an operation name, failing loudly outside the vocabulary.
	pub fn decode(op: &str) -> Result<Self, WireError> {
		match op {
			"html" => Ok(Self::Html),
			"append" => Ok(Self::Append),
			"remove" => Ok(Self::Remove),
			"find" => Ok(Self::Find),
			"attrs" => Ok(Self::Attrs),
			"attr" => Ok(Self::Attr),
			"removeAttr" => Ok(Self::RemoveAttr),
			other => Err(WireError::UnknownOp(other.to_string())),
		}
	}
}
