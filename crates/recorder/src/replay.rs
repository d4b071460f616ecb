//! The client-side replay boundary.

use std::collections::HashMap;

use ripple_dom::{Document, NodeId};
use ripple_protocol::{Anchor, ClientOp, Fragment, Instruction, TransformMessage};
use serde_json::Value;
use tracing::debug;

use crate::ReplayError;

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
	/// The instruction tree was applied.
	Applied,
	/// The anchor no longer resolves; the message was dropped.
	AnchorMissing,
	/// The sequence number was not past the anchor's high-water mark; a
	/// duplicate or out-of-order delivery, dropped.
	Stale,
}

/// Applies transformation messages to a live document.
///
/// Keeps a per-anchor sequence high-water mark so at-least-once delivery
/// cannot apply the same instructions twice or out of order.
#[derive(Debug, Default)]
pub struct Replayer {
	high_water: HashMap<Anchor, u64>,
}

impl Replayer {
	/// Creates a replayer with no delivery history.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Applies one message against the live document.
	///
	/// Stale and anchor-less messages are dropped, not errors: other
	/// anchors in the same batch keep working. Decode failures are errors;
	/// a partially-understood tree must not be half-applied.
	pub fn apply(
		&mut self,
		doc: &mut Document,
		message: &TransformMessage,
	) -> Result<ReplayOutcome, ReplayError> {
		if let Some(mark) = self.high_water.get(&message.anchor)
			&& message.seq <= *mark
		{
			debug!(anchor = %message.anchor, seq = message.seq, "stale message dropped");
			return Ok(ReplayOutcome::Stale);
		}
		let Some(node) = doc.resolve_anchor(&message.anchor) else {
			debug!(anchor = %message.anchor, "anchor unresolvable, message dropped");
			return Ok(ReplayOutcome::AnchorMissing);
		};

		apply_calls(doc, node, &message.calls)?;
		self.high_water.insert(message.anchor.clone(), message.seq);
		Ok(ReplayOutcome::Applied)
	}
}

/// Applies instructions in order against one node, recursing into
/// `subsequent` against each instruction's result.
pub fn apply_calls(
	doc: &mut Document,
	node: NodeId,
	calls: &[Instruction],
) -> Result<(), ReplayError> {
	for call in calls {
		match ClientOp::decode(&call.op)? {
			ClientOp::Html => {
				doc.set_content(node, &fragment_arg(call, 0)?)?;
			}
			ClientOp::Append => {
				doc.append_content(node, &fragment_arg(call, 0)?)?;
			}
			ClientOp::Remove => {
				doc.remove(node)?;
				// The node is gone; anything recorded after it would have
				// failed server-side too.
				return Ok(());
			}
			ClientOp::Find => {
				let binding = str_arg(call, 0)?;
				match doc.find_binding(node, binding) {
					Some(child) => apply_calls(doc, child, &call.subsequent)?,
					None => {
						// The client tree diverged here; skip this subtree
						// but keep applying siblings.
						debug!(binding, "find target missing, subtree skipped");
					}
				}
			}
			ClientOp::Attrs => {
				apply_calls(doc, node, &call.subsequent)?;
			}
			ClientOp::Attr => {
				doc.set_attr(node, str_arg(call, 0)?, str_arg(call, 1)?)?;
			}
			ClientOp::RemoveAttr => {
				doc.clear_attr(node, str_arg(call, 0)?)?;
			}
		}
	}
	Ok(())
}

fn str_arg<'c>(call: &'c Instruction, index: usize) -> Result<&'c str, ReplayError> {
	call.args
		.get(index)
		.and_then(Value::as_str)
		.ok_or_else(|| ReplayError::BadArgument {
			op: call.op.clone(),
			index,
		})
}

fn fragment_arg(call: &Instruction, index: usize) -> Result<Fragment, ReplayError> {
	let value = call.args.get(index).ok_or_else(|| ReplayError::BadArgument {
		op: call.op.clone(),
		index,
	})?;
	Ok(Fragment::from_value(value)?)
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use ripple_protocol::Channel;

	use super::*;
	use crate::record::record;

	fn page_fragment() -> Fragment {
		Fragment::new("main").with_child(
			Fragment::new("ul")
				.with_binding("posts-list")
				.with_child(
					Fragment::new("li")
						.with_binding("post")
						.with_attr("data-id", "1")
						.with_text("first"),
				),
		)
	}

	fn message(seq: u64, calls: Vec<Instruction>) -> TransformMessage {
		TransformMessage {
			channel: Channel::bare("posts"),
			anchor: Anchor::new("posts-list", 0),
			seq,
			calls,
		}
	}

	/// Serialize through the wire format before replaying, as the real
	/// pipeline does.
	fn over_the_wire(message: &TransformMessage) -> TransformMessage {
		let encoded = serde_json::to_string(message).unwrap();
		serde_json::from_str(&encoded).unwrap()
	}

	#[test]
	fn test_replay_converges_with_direct_render() {
		// Server and client start from the same rendered page.
		let mut server = Document::from_fragment(&page_fragment());
		let mut client = Document::from_fragment(&page_fragment());

		let list = server
			.resolve_anchor(&Anchor::new("posts-list", 0))
			.unwrap();
		let (_, calls) = record(&mut server, list, |section| {
			section.append(&Fragment::new("li").with_binding("post").with_text("second"))?;
			section.find("post", |post| post.attrs(|attrs| attrs.set("class", "read")))
		})
		.unwrap();

		let mut replayer = Replayer::new();
		let outcome = replayer
			.apply(&mut client, &over_the_wire(&message(1, calls)))
			.unwrap();

		assert_eq!(outcome, ReplayOutcome::Applied);
		// The replayed client equals the directly-mutated server document.
		assert_eq!(
			client.to_fragment(client.root()).unwrap(),
			server.to_fragment(server.root()).unwrap()
		);
	}

	#[test]
	fn test_duplicate_delivery_is_discarded() {
		let mut server = Document::from_fragment(&page_fragment());
		let mut client = Document::from_fragment(&page_fragment());
		let list = server
			.resolve_anchor(&Anchor::new("posts-list", 0))
			.unwrap();
		let (_, calls) = record(&mut server, list, |section| {
			section.append(&Fragment::new("li").with_text("second"))
		})
		.unwrap();

		let msg = over_the_wire(&message(1, calls));
		let mut replayer = Replayer::new();
		assert_eq!(
			replayer.apply(&mut client, &msg).unwrap(),
			ReplayOutcome::Applied
		);
		assert_eq!(
			replayer.apply(&mut client, &msg).unwrap(),
			ReplayOutcome::Stale
		);

		// Applied once, not twice.
		let list = client.resolve_anchor(&Anchor::new("posts-list", 0)).unwrap();
		assert_eq!(client.children(list).len(), 2);
	}

	#[test]
	fn test_out_of_order_delivery_is_discarded() {
		let mut client = Document::from_fragment(&page_fragment());
		let mut replayer = Replayer::new();

		let newer = message(5, vec![Instruction::new("attrs", vec![])]);
		let older = message(3, vec![Instruction::new("attrs", vec![])]);
		assert_eq!(
			replayer.apply(&mut client, &newer).unwrap(),
			ReplayOutcome::Applied
		);
		assert_eq!(
			replayer.apply(&mut client, &older).unwrap(),
			ReplayOutcome::Stale
		);
	}

	#[test]
	fn test_unresolvable_anchor_drops_message() {
		let mut client = Document::from_fragment(&page_fragment());
		let mut replayer = Replayer::new();
		let mut msg = message(1, vec![Instruction::new("remove", vec![])]);
		msg.anchor = Anchor::new("comments-list", 0);

		assert_eq!(
			replayer.apply(&mut client, &msg).unwrap(),
			ReplayOutcome::AnchorMissing
		);
		// Dropping it leaves no high-water mark behind.
		assert!(replayer.high_water.is_empty());
	}

	#[test]
	fn test_unknown_op_fails_loudly() {
		let mut client = Document::from_fragment(&page_fragment());
		let mut replayer = Replayer::new();
		let msg = message(1, vec![Instruction::new("transmogrify", vec![])]);

		assert!(matches!(
			replayer.apply(&mut client, &msg),
			Err(ReplayError::Wire(_))
		));
	}

	#[test]
	fn test_missing_find_target_skips_subtree_only() {
		let mut client = Document::from_fragment(&page_fragment());
		let mut replayer = Replayer::new();

		let mut gone = Instruction::new("find", vec![serde_json::json!("vanished")]);
		gone.subsequent.push(Instruction::new("remove", vec![]));
		let append = Instruction::new(
			"append",
			vec![Fragment::new("li").with_text("second").to_value()],
		);
		let msg = message(1, vec![gone, append]);

		assert_eq!(
			replayer.apply(&mut client, &msg).unwrap(),
			ReplayOutcome::Applied
		);
		let list = client.resolve_anchor(&Anchor::new("posts-list", 0)).unwrap();
		assert_eq!(client.children(list).len(), 2);
	}
}
