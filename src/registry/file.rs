use log::debug;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{Registry, RegistryError};

/// Registry kept as one JSON object on disk, one top-level key per entry.
///
/// Every write rewrites the whole document through a sibling temp file and
/// a rename, so a crash mid-write leaves the previous document intact.
#[derive(Debug)]
pub struct JsonFileRegistry {
	path: PathBuf,
	lock: Mutex<()>,
}

impl JsonFileRegistry {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			lock: Mutex::new(()),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn read_document(&self) -> Result<Map<String, Value>, RegistryError> {
		let raw = match fs::read_to_string(&self.path) {
			Ok(raw) => raw,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
			Err(e) => return Err(e.into()),
		};
		if raw.trim().is_empty() {
			return Ok(Map::new());
		}

		match serde_json::from_str::<Value>(&raw)? {
			Value::Object(map) => Ok(map),
			_ => Err(RegistryError::Serialization(format!(
				"{} does not hold a JSON object",
				self.path.display()
			))),
		}
	}

	fn write_document(&self, doc: &Map<String, Value>) -> Result<(), RegistryError> {
		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() {
				fs::create_dir_all(parent)?;
			}
		}

		let tmp = self.path.with_extension("json.tmp");
		{
			let mut f = fs::File::create(&tmp)?;
			f.write_all(serde_json::to_string_pretty(doc)?.as_bytes())?;
			f.sync_all()?;
		}
		fs::rename(&tmp, &self.path)?;
		debug!("registry written to {}", self.path.display());
		Ok(())
	}
}

impl Registry for JsonFileRegistry {
	fn get_value(&self, key: &str) -> Result<Option<Value>, RegistryError> {
		let _guard = self
			.lock
			.lock()
			.map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))?;
		Ok(self.read_document()?.remove(key))
	}

	fn set_value(&self, key: &str, value: Value) -> Result<(), RegistryError> {
		let _guard = self
			.lock
			.lock()
			.map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))?;
		let mut doc = self.read_document()?;
		doc.insert(key.to_string(), value);
		self.write_document(&doc)
	}
}
