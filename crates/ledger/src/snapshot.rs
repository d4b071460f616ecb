//! Ledger snapshot persistence.
//!
//! Snapshots are one JSON blob per application: the full source-to-records
//! map plus the id counter, written atomically (temp file then rename) and
//! restored wholesale on boot.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::record::SubscriptionRecord;
use crate::{LedgerError, Result};

/// Where snapshots for one application live.
#[derive(Debug, Clone)]
pub struct SnapshotSpec {
	/// Directory holding snapshot files.
	pub dir: PathBuf,
	/// Application name keying the snapshot file.
	pub app_name: String,
}

impl SnapshotSpec {
	/// Creates a spec.
	pub fn new(dir: impl Into<PathBuf>, app_name: impl Into<String>) -> Self {
		Self {
			dir: dir.into(),
			app_name: app_name.into(),
		}
	}

	/// Path of the snapshot file.
	#[must_use]
	pub fn path(&self) -> PathBuf {
		self.dir.join(format!("{}.ledger.json", self.app_name))
	}
}

/// Serialized ledger state.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
	/// Next subscription id to allocate.
	pub next_id: u64,
	/// Sequence epoch of the process lifetime that wrote the snapshot.
	/// Each restore bumps it, so sequence numbers handed to clients never
	/// regress across a restart.
	#[serde(default)]
	pub epoch: u64,
	/// Records grouped by source name.
	pub sources: HashMap<String, Vec<SubscriptionRecord>>,
}

fn io_error(path: &Path, error: std::io::Error) -> LedgerError {
	LedgerError::Io {
		path: path.to_path_buf(),
		error,
	}
}

/// Writes a snapshot atomically.
pub fn write_snapshot(spec: &SnapshotSpec, snapshot: &Snapshot) -> Result<()> {
	let path = spec.path();
	fs::create_dir_all(&spec.dir).map_err(|error| io_error(&spec.dir, error))?;
	let encoded = serde_json::to_vec_pretty(snapshot)?;
	let tmp = path.with_extension("json.tmp");
	fs::write(&tmp, encoded).map_err(|error| io_error(&tmp, error))?;
	fs::rename(&tmp, &path).map_err(|error| io_error(&path, error))?;
	Ok(())
}

/// Reads the snapshot for an application, if one exists.
pub fn read_snapshot(spec: &SnapshotSpec) -> Result<Option<Snapshot>> {
	let path = spec.path();
	let bytes = match fs::read(&path) {
		Ok(bytes) => bytes,
		Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(error) => return Err(io_error(&path, error)),
	};
	Ok(Some(serde_json::from_slice(&bytes)?))
}

#[cfg(test)]
mod tests {
	use ripple_protocol::SubscriberKey;
	use serde_json::json;

	use super::*;
	use crate::record::{Qualifications, SubscriptionId};

	fn sample() -> Snapshot {
		let record = SubscriptionRecord {
			id: SubscriptionId(3),
			subscriber: SubscriberKey::new("a"),
			source: "posts".to_string(),
			qualifications: Qualifications::from([("id".to_string(), json!(1))]),
			handler: None,
		};
		Snapshot {
			next_id: 4,
			epoch: 2,
			sources: HashMap::from([("posts".to_string(), vec![record])]),
		}
	}

	#[test]
	fn test_snapshot_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let spec = SnapshotSpec::new(dir.path(), "blog");

		write_snapshot(&spec, &sample()).unwrap();
		let restored = read_snapshot(&spec).unwrap().unwrap();

		assert_eq!(restored.next_id, 4);
		assert_eq!(restored.epoch, 2);
		assert_eq!(restored.sources, sample().sources);
	}

	#[test]
	fn test_missing_snapshot_is_none() {
		let dir = tempfile::tempdir().unwrap();
		let spec = SnapshotSpec::new(dir.path(), "blog");
		assert!(read_snapshot(&spec).unwrap().is_none());
	}

	#[test]
	fn test_write_leaves_no_temp_file() {
		let dir = tempfile::tempdir().unwrap();
		let spec = SnapshotSpec::new(dir.path(), "blog");
		write_snapshot(&spec, &sample()).unwrap();

		let entries: Vec<_> = fs::read_dir(dir.path())
			.unwrap()
			.map(|entry| entry.unwrap().file_name())
			.collect();
		assert_eq!(entries, vec!["blog.ledger.json"]);
	}
}
