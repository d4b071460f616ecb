//! The recorded instruction tree and its 4-tuple wire form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recorded templating operation, with the calls chained off its result.
///
/// The tree is ordered exactly as the calls were made; replay must preserve
/// that order because later instructions may depend on document state
/// produced by earlier ones.
///
/// On the wire each instruction is the 4-tuple
/// `[operation, [args...], [], [subsequent...]]`. The third slot is
/// reserved: always empty on encode, ignored on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireCall", into = "WireCall")]
pub struct Instruction {
	/// Client-vocabulary operation name.
	pub op: String,
	/// Operation arguments in call order.
	pub args: Vec<Value>,
	/// Instructions recorded against this instruction's result.
	pub subsequent: Vec<Instruction>,
}

impl Instruction {
	/// Creates a leaf instruction.
	pub fn new(op: impl Into<String>, args: Vec<Value>) -> Self {
		Self {
			op: op.into(),
			args,
			subsequent: Vec::new(),
		}
	}

	/// Total number of instructions in this subtree, including self.
	#[must_use]
	pub fn len(&self) -> usize {
		1 + self.subsequent.iter().map(Instruction::len).sum::<usize>()
	}

	/// Always false; present for the conventional pairing with [`Self::len`].
	#[must_use]
	pub fn is_empty(&self) -> bool {
		false
	}
}

/// Wire mirror of [`Instruction`]: `[op, args, reserved, subsequent]`.
#[derive(Serialize, Deserialize)]
struct WireCall(String, Vec<Value>, Vec<Value>, Vec<Instruction>);

impl From<WireCall> for Instruction {
	fn from(call: WireCall) -> Self {
		let WireCall(op, args, _reserved, subsequent) = call;
		Self {
			op,
			args,
			subsequent,
		}
	}
}

impl From<Instruction> for WireCall {
	fn from(instruction: Instruction) -> Self {
		WireCall(
			instruction.op,
			instruction.args,
			Vec::new(),
			instruction.subsequent,
		)
	}
}
