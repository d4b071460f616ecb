//! The recording layer placed in front of the document API.

use ripple_dom::{Document, NodeId};
use ripple_protocol::{AttrCall, Fragment, Instruction, SectionCall};

use crate::RecordError;

/// Records a scoped re-render against one node.
///
/// Runs `f` with a recorder rooted at `node`; every mutating call is
/// forwarded to the document and captured. Returns the closure's result
/// together with the recorded instruction tree, in exact call order.
pub fn record<R>(
	doc: &mut Document,
	node: NodeId,
	f: impl FnOnce(&mut RecordedSection<'_>) -> Result<R, RecordError>,
) -> Result<(R, Vec<Instruction>), RecordError> {
	let mut calls = Vec::new();
	let mut section = RecordedSection {
		doc,
		node,
		calls: &mut calls,
	};
	let out = f(&mut section)?;
	Ok((out, calls))
}

/// A located section of the rendered document, with every mutating call
/// recorded.
///
/// Chainable calls (`find`, `attrs`) hand a nested recorder to a closure;
/// the nested recorder's instructions land in the parent instruction's
/// `subsequent` list, so nesting reflects exactly which calls were chained
/// off which return value. Nesting is safe to unbounded depth.
pub struct RecordedSection<'a> {
	doc: &'a mut Document,
	node: NodeId,
	calls: &'a mut Vec<Instruction>,
}

impl RecordedSection<'_> {
	/// The node this section wraps.
	#[must_use]
	pub fn node(&self) -> NodeId {
		self.node
	}

	/// Replaces the section's content with a fragment.
	pub fn html(&mut self, fragment: &Fragment) -> Result<(), RecordError> {
		self.doc.set_content(self.node, fragment)?;
		self.calls
			.push(SectionCall::Html(fragment.clone()).into_instruction());
		Ok(())
	}

	/// Appends a fragment after the section's existing content.
	pub fn append(&mut self, fragment: &Fragment) -> Result<(), RecordError> {
		self.doc.append_content(self.node, fragment)?;
		self.calls
			.push(SectionCall::Append(fragment.clone()).into_instruction());
		Ok(())
	}

	/// Removes the section's node. Further calls on this section fail with
	/// a detached-node error.
	pub fn remove(&mut self) -> Result<(), RecordError> {
		self.doc.remove(self.node)?;
		self.calls.push(SectionCall::Remove.into_instruction());
		Ok(())
	}

	/// Locates the first descendant carrying a binding label and records
	/// the calls made on it under this call's `subsequent` list.
	pub fn find<R>(
		&mut self,
		binding: &str,
		f: impl FnOnce(&mut RecordedSection<'_>) -> Result<R, RecordError>,
	) -> Result<R, RecordError> {
		let target = self
			.doc
			.find_binding(self.node, binding)
			.ok_or_else(|| RecordError::BindingNotFound(binding.to_string()))?;
		let mut call = SectionCall::Find(binding.to_string()).into_instruction();
		let mut child = RecordedSection {
			doc: &mut *self.doc,
			node: target,
			calls: &mut call.subsequent,
		};
		let out = f(&mut child)?;
		self.calls.push(call);
		Ok(out)
	}

	/// Opens the section's attribute collection for recorded mutation.
	pub fn attrs<R>(
		&mut self,
		f: impl FnOnce(&mut RecordedAttrs<'_>) -> Result<R, RecordError>,
	) -> Result<R, RecordError> {
		let mut call = SectionCall::Attrs.into_instruction();
		let mut attrs = RecordedAttrs {
			doc: &mut *self.doc,
			node: self.node,
			calls: &mut call.subsequent,
		};
		let out = f(&mut attrs)?;
		self.calls.push(call);
		Ok(out)
	}

	/// Reads the section's text content. Forwarded, never recorded.
	#[must_use]
	pub fn text(&self) -> Option<&str> {
		self.doc.text(self.node)
	}
}

/// A section's attribute collection, with mutations recorded.
pub struct RecordedAttrs<'a> {
	doc: &'a mut Document,
	node: NodeId,
	calls: &'a mut Vec<Instruction>,
}

impl RecordedAttrs<'_> {
	/// Sets an attribute.
	pub fn set(
		&mut self,
		name: impl Into<String>,
		value: impl Into<String>,
	) -> Result<(), RecordError> {
		let (name, value) = (name.into(), value.into());
		self.doc.set_attr(self.node, &name, &value)?;
		self.calls.push(AttrCall::Set(name, value).into_instruction());
		Ok(())
	}

	/// Removes an attribute.
	pub fn clear(&mut self, name: impl Into<String>) -> Result<(), RecordError> {
		let name = name.into();
		self.doc.clear_attr(self.node, &name)?;
		self.calls.push(AttrCall::Clear(name).into_instruction());
		Ok(())
	}

	/// Reads an attribute value. Forwarded, never recorded.
	#[must_use]
	pub fn get(&self, name: &str) -> Option<&str> {
		self.doc.attr(self.node, name)
	}
}
