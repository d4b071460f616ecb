//! Mutation broadcasting and live-update service wiring for ripple.
//!
//! This crate ties the subsystem together: committed writes come in through
//! [`LiveUpdate::on_commit`], the broadcaster resolves affected ledger
//! records, re-renders each one through the injected [`Renderer`], and
//! pushes the recorded instruction trees out through the channel registry.

#![warn(missing_docs)]

pub mod broadcast;
pub mod config;
pub mod render;
pub mod service;


use ripple_ledger::LedgerError;
use ripple_registry::RegistryError;
use thiserror::Error;

pub use broadcast::Broadcaster;
pub use config::LiveConfig;
pub use render::{RenderError, RenderedUpdate, Renderer};
pub use service::{LiveUpdate, subscriber_channel};

/// Errors from live-update operations.
#[derive(Debug, Error)]
pub enum LiveError {
	/// The subscription ledger failed.
	#[error(transparent)]
	Ledger(#[from] LedgerError),

	/// The channel registry failed.
	#[error(transparent)]
	Registry(#[from] RegistryError),

	/// A scoped re-render failed.
	#[error(transparent)]
	Render(#[from] RenderError),

	/// The subsystem was shut down.
	#[error("live-update subsystem stopped")]
	Stopped,
}

/// Result type for live-update operations.
pub type Result<T> = std::result::Result<T, LiveError>;
