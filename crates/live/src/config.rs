//! Configuration for the live-update subsystem.

use std::path::PathBuf;
use std::time::Duration;

use ripple_ledger::{LedgerConfig, SnapshotSpec};
use serde::{Deserialize, Serialize};

/// Tunables for the live-update subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
	/// Application name keying ledger snapshots.
	pub app_name: String,
	/// How long a disconnected subscriber's ledger records survive.
	pub grace_window: Duration,
	/// Budget for one record's re-render-and-publish step; exceeding it is
	/// a delivery failure for that record only.
	pub per_record_timeout: Duration,
	/// Directory for ledger snapshots; `None` disables durability.
	pub snapshot_dir: Option<PathBuf>,
	/// How often to persist the ledger when records changed.
	pub snapshot_interval: Duration,
	/// Mailbox capacity of each per-source broadcast worker.
	pub source_mailbox_capacity: usize,
}

impl Default for LiveConfig {
	fn default() -> Self {
		Self {
			app_name: "ripple".to_string(),
			grace_window: Duration::from_secs(5),
			per_record_timeout: Duration::from_secs(5),
			snapshot_dir: None,
			snapshot_interval: Duration::from_secs(30),
			source_mailbox_capacity: 64,
		}
	}
}

impl LiveConfig {
	/// The ledger configuration this implies.
	#[must_use]
	pub fn ledger_config(&self) -> LedgerConfig {
		LedgerConfig {
			grace_window: self.grace_window,
			snapshot: self
				.snapshot_dir
				.as_ref()
				.map(|dir| SnapshotSpec::new(dir, self.app_name.clone())),
			snapshot_interval: self.snapshot_interval,
			on_retired: None,
		}
	}
}
