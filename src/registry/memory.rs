use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Registry, RegistryError};

/// In-process registry. Writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
	values: Mutex<HashMap<String, Value>>,
	failing_writes: AtomicUsize,
	writes: AtomicUsize,
}

impl MemoryRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make the next `count` calls to `set_value` fail.
	pub fn fail_next_writes(&self, count: usize) {
		self.failing_writes.store(count, Ordering::SeqCst);
	}

	/// Successful writes so far.
	pub fn writes(&self) -> usize {
		self.writes.load(Ordering::SeqCst)
	}
}

impl Registry for MemoryRegistry {
	fn get_value(&self, key: &str) -> Result<Option<Value>, RegistryError> {
		let values = self
			.values
			.lock()
			.map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))?;
		Ok(values.get(key).cloned())
	}

	fn set_value(&self, key: &str, value: Value) -> Result<(), RegistryError> {
		let failing = self
			.failing_writes
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if failing {
			return Err(RegistryError::Unavailable(format!(
				"write of '{}' refused",
				key
			)));
		}

		let mut values = self
			.values
			.lock()
			.map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))?;
		values.insert(key.to_string(), value);
		self.writes.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}
