//! Error types for wire parsing and encoding.

use thiserror::Error;

/// Errors that can occur when parsing or encoding wire values.
#[derive(Debug, Error)]
pub enum WireError {
	/// A channel literal could not be parsed.
	#[error("invalid channel literal: {0:?}")]
	InvalidChannel(String),

	/// An anchor literal could not be parsed.
	#[error("invalid anchor literal: {0:?}")]
	InvalidAnchor(String),

	/// A fragment argument did not deserialize into the fragment shape.
	#[error("malformed fragment argument: {0}")]
	BadFragment(#[from] serde_json::Error),

	/// An operation name outside the client vocabulary.
	#[error("unknown operation: {0:?}")]
	UnknownOp(String),
}

/// Result type for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
