//! Persistent subscription registry.
//!
//! The registry is a small durable key-value store. Under each application
//! identifier it keeps a [`RegistryRecord`]: the desired set of subscriptions,
//! used to rebuild the live set of a sync session on demand.

pub mod file;
pub mod memory;

pub use file::JsonFileRegistry;
pub use memory::MemoryRegistry;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("registry I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("registry serialization error: {0}")]
	Serialization(String),

	#[error("invalid registry record under '{key}': {reason}")]
	InvalidRecord { key: String, reason: String },

	#[error("registry unavailable: {0}")]
	Unavailable(String),
}

impl From<serde_json::Error> for RegistryError {
	fn from(e: serde_json::Error) -> Self {
		RegistryError::Serialization(e.to_string())
	}
}

/// Durable key-value store the engine reads desired state from.
pub trait Registry: Send + Sync + 'static {
	fn get_value(&self, key: &str) -> Result<Option<Value>, RegistryError>;
	fn set_value(&self, key: &str, value: Value) -> Result<(), RegistryError>;
}

/// Desired definition of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSubscription {
	pub class: String,
	pub filter: String,
}

impl SavedSubscription {
	pub fn new(class: impl Into<String>, filter: impl Into<String>) -> Self {
		Self {
			class: class.into(),
			filter: filter.into(),
		}
	}
}

/// Everything the registry keeps for one application identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
	#[serde(default)]
	pub subscriptions: BTreeMap<String, SavedSubscription>,
	/// Other per-application values stored next to the subscriptions.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl RegistryRecord {
	pub fn is_empty(&self) -> bool {
		self.subscriptions.is_empty()
	}
}

/// Read the record for `app_id`, creating and persisting an empty one on
/// first use.
pub fn load_record(registry: &dyn Registry, app_id: &str) -> Result<RegistryRecord, RegistryError> {
	match registry.get_value(app_id)? {
		Some(value) => {
			serde_json::from_value(value).map_err(|e| RegistryError::InvalidRecord {
				key: app_id.to_string(),
				reason: e.to_string(),
			})
		}
		None => {
			let record = RegistryRecord::default();
			store_record(registry, app_id, &record)?;
			Ok(record)
		}
	}
}

pub fn store_record(
	registry: &dyn Registry,
	app_id: &str,
	record: &RegistryRecord,
) -> Result<(), RegistryError> {
	registry.set_value(app_id, serde_json::to_value(record)?)
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn load_record_creates_missing_record() {
		let registry = MemoryRegistry::new();
		let record = load_record(&registry, "app-1").unwrap();
		assert!(record.is_empty());
		assert_eq!(
			registry.get_value("app-1").unwrap(),
			Some(json!({"subscriptions": {}}))
		);
	}

	#[test]
	fn record_keeps_unrelated_fields() {
		let registry = MemoryRegistry::new();
		registry
			.set_value(
				"app-1",
				json!({
					"subscriptions": {"sub1": {"class": "Task", "filter": "done == false"}},
					"user": "alice"
				}),
			)
			.unwrap();

		let mut record = load_record(&registry, "app-1").unwrap();
		assert_eq!(
			record.subscriptions["sub1"],
			SavedSubscription::new("Task", "done == false")
		);

		record.subscriptions.remove("sub1");
		store_record(&registry, "app-1", &record).unwrap();

		let stored = registry.get_value("app-1").unwrap().unwrap();
		assert_eq!(stored["user"], "alice");
		assert_eq!(stored["subscriptions"], json!({}));
	}

	#[test]
	fn malformed_record_is_an_error() {
		let registry = MemoryRegistry::new();
		registry
			.set_value("app-1", json!({"subscriptions": ["not", "a", "map"]}))
			.unwrap();
		assert!(matches!(
			load_record(&registry, "app-1"),
			Err(RegistryError::InvalidRecord { .. })
		));
	}
}
