//! The re-render boundary.
//!
//! The query builder and templating engine live outside this subsystem;
//! what it needs from them is a single operation: re-run the query a
//! subscription represents and re-render its view fragment under the call
//! recorder. The [`Renderer`] trait is that seam.

use async_trait::async_trait;
use ripple_ledger::SubscriptionRecord;
use ripple_protocol::{Anchor, Instruction, MutationEvent};
use thiserror::Error;

/// One re-rendered view fragment, ready to be wrapped in a transformation
/// message.
#[derive(Debug, Clone)]
pub struct RenderedUpdate {
	/// Where in the subscriber's previously-rendered document the calls
	/// apply.
	pub anchor: Anchor,
	/// The recorded instruction tree.
	pub calls: Vec<Instruction>,
}

/// Errors from a scoped re-render.
#[derive(Debug, Error)]
pub enum RenderError {
	/// The object the subscription was qualified on no longer exists; the
	/// record is stale and will be dropped from the ledger.
	#[error("subscribed object no longer exists")]
	Gone,

	/// The render itself failed.
	#[error("render failed: {0}")]
	Failed(String),
}

/// Re-runs a subscription's query and re-renders its fragment.
#[async_trait]
pub trait Renderer: Send + Sync + 'static {
	/// Produces the updates a mutation implies for one subscription.
	///
	/// Called once per affected ledger record; the implementation re-runs
	/// the record's query (scoped by its qualifications and optional
	/// handler override) and records the fragment render, rather than
	/// materializing a full page.
	async fn render(
		&self,
		record: &SubscriptionRecord,
		event: &MutationEvent,
	) -> Result<Vec<RenderedUpdate>, RenderError>;
}
