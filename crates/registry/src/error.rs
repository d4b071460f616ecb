//! Error types for registry backends.

use thiserror::Error;

use crate::store::StoreError;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
	/// The shared store failed.
	#[error("shared store error: {0}")]
	Store(#[from] StoreError),

	/// A membership row or message payload failed to encode or decode.
	#[error("membership codec error: {0}")]
	Codec(#[from] serde_json::Error),

	/// A membership row contained an unparseable channel literal.
	#[error(transparent)]
	Wire(#[from] ripple_protocol::WireError),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
