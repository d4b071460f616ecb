//! Call recording and replay for ripple.
//!
//! During a scoped re-render the server mutates its document through
//! [`RecordedSection`], which forwards every call to the real document and
//! records it into an ordered, nested instruction tree. On the other side
//! of the wire, [`Replayer`] applies that tree to the client's live
//! document using the same fixed operation vocabulary, so both documents
//! converge without replaying the full original render.

#![warn(missing_docs)]

pub mod record;
pub mod replay;

use ripple_dom::DomError;
use ripple_protocol::WireError;
use thiserror::Error;

pub use record::{RecordedAttrs, RecordedSection, record};
pub use replay::{ReplayOutcome, Replayer};

/// Errors raised while recording a re-render.
///
/// These are programming errors in the render path and must fail loudly:
/// a partially-recorded tree would desynchronize the client.
#[derive(Debug, Error)]
pub enum RecordError {
	/// A forwarded call failed against the server document.
	#[error("document error during recording: {0}")]
	Dom(#[from] DomError),

	/// A chained `find` located nothing to record against.
	#[error("no descendant with binding {0:?}")]
	BindingNotFound(String),
}

/// Errors raised while replaying an instruction tree.
#[derive(Debug, Error)]
pub enum ReplayError {
	/// An operation name outside the client vocabulary, or a malformed
	/// fragment argument.
	#[error(transparent)]
	Wire(#[from] WireError),

	/// A document mutation failed.
	#[error("document error during replay: {0}")]
	Dom(#[from] DomError),

	/// An instruction argument was missing or of the wrong type.
	#[error("bad argument {index} for operation {op:?}")]
	BadArgument {
		/// The instruction's operation name.
		op: String,
		/// Zero-based argument position.
		index: usize,
	},
}
