//! Durable subscription ledger for ripple.
//!
//! The ledger maps a data query's identity (source name plus a canonicalized
//! qualification set) to the subscriber keys whose rendered views depend on
//! it. It is owned by a single actor task, tolerates reconnects through a
//! grace window, and survives process restarts via JSON snapshots.

#![warn(missing_docs)]

pub mod record;
pub mod service;
pub mod snapshot;

use std::path::PathBuf;

use thiserror::Error;

pub use record::{Qualifications, SubscriptionId, SubscriptionRecord};
pub use service::{LedgerConfig, LedgerHandle, LedgerService};
pub use snapshot::SnapshotSpec;

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
	/// The ledger service task is no longer running.
	#[error("ledger service stopped")]
	Stopped,

	/// Snapshot file I/O failed.
	#[error("snapshot I/O error at {path}: {error}")]
	Io {
		/// Snapshot path involved.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// A snapshot failed to encode or decode.
	#[error("snapshot codec error: {0}")]
	Codec(#[from] serde_json::Error),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
