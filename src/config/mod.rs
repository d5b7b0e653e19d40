use log::Level;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use thiserror::Error;

/// Runtime configuration for Mimir.
///
/// Values are loaded from (in order): the `/etc/vanopticon/mimir.json` file,
/// the user config folder (optional), and environment variables prefixed
/// with `MMR_` (e.g. `MMR_APP_ID`).
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	/// Application identifier; the registry record is stored under it.
	pub app_id: String,
	/// JSON document holding the subscription registry.
	pub registry_path: PathBuf,
	/// JSON document holding the live set of the offline session.
	pub session_path: PathBuf,
	/// Classes the offline session's schema knows about. Accepts a list or
	/// a comma separated string.
	#[serde(deserialize_with = "class_list")]
	pub schema_classes: Vec<String>,
	pub log_level: Level,
	/// Bound on each wait for the sync server; 0 waits indefinitely.
	pub sync_timeout_secs: u64,
	pub registry_write_retries: u32,
	pub registry_backoff_ms: u64,
}

impl Default for Settings {
	fn default() -> Self {
		let base = dirs::config_dir()
			.unwrap_or_else(|| PathBuf::from("."))
			.join("vanopticon");

		Self {
			app_id: "default".to_string(),
			registry_path: base.join("mimir-registry.json"),
			session_path: base.join("mimir-session.json"),
			schema_classes: Vec::new(),
			log_level: Level::Warn,
			sync_timeout_secs: 0,
			registry_write_retries: 3,
			registry_backoff_ms: 100,
		}
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),
}

pub fn load() -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/vanopticon/mimir.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("vanopticon").join("mimir.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}
	if let Some(folder) = dirs::config_local_dir() {
		let local_config_path = folder.join("vanopticon").join("mimir.json");
		builder = builder.add_source(config::File::from(local_config_path).required(false));
	}

	builder = builder.add_source(config::Environment::with_prefix("MMR").separator("__"));

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Explicitly prefer direct environment variables when present; the
	// `config` crate does not split single-underscore names into fields.
	if let Ok(a) = std::env::var("MMR_APP_ID") {
		if !a.is_empty() {
			s.app_id = a;
		}
	}
	if let Ok(p) = std::env::var("MMR_REGISTRY_PATH") {
		if !p.is_empty() {
			s.registry_path = PathBuf::from(p);
		}
	}
	if let Ok(p) = std::env::var("MMR_SESSION_PATH") {
		if !p.is_empty() {
			s.session_path = PathBuf::from(p);
		}
	}
	if let Ok(c) = std::env::var("MMR_SCHEMA_CLASSES") {
		if !c.is_empty() {
			s.schema_classes = parse_class_list(&c);
		}
	}
	if let Ok(t) = std::env::var("MMR_SYNC_TIMEOUT_SECS") {
		if let Ok(parsed) = t.parse::<u64>() {
			s.sync_timeout_secs = parsed;
		}
	}
	if let Ok(r) = std::env::var("MMR_REGISTRY_WRITE_RETRIES") {
		if let Ok(parsed) = r.parse::<u32>() {
			s.registry_write_retries = parsed;
		}
	}
	if let Ok(b) = std::env::var("MMR_REGISTRY_BACKOFF_MS") {
		if let Ok(parsed) = b.parse::<u64>() {
			s.registry_backoff_ms = parsed;
		}
	}
	if let Ok(l) = std::env::var("MMR_LOG_LEVEL") {
		if !l.is_empty() {
			if let Ok(parsed) = l.parse::<Level>() {
				s.log_level = parsed;
			}
		}
	}

	Ok(s)
}

fn class_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Raw {
		List(Vec<String>),
		Csv(String),
	}

	Ok(match Raw::deserialize(d)? {
		Raw::List(classes) => classes,
		Raw::Csv(raw) => parse_class_list(&raw),
	})
}

/// Split a comma separated class list, dropping blanks.
pub fn parse_class_list(raw: &str) -> Vec<String> {
	raw.split(',')
		.map(str::trim)
		.filter(|c| !c.is_empty())
		.map(str::to_string)
		.collect()
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use std::env;
	use std::path::PathBuf;

	use log::Level;

	use crate::config::{Settings, load, parse_class_list};

	#[test]
	fn class_list_parsing() {
		assert_eq!(
			parse_class_list(" Task, Project ,,Note"),
			vec!["Task".to_string(), "Project".to_string(), "Note".to_string()]
		);
		assert!(parse_class_list(" , ").is_empty());
	}

	#[test]
	fn test_load_defaults_and_env_overlay() {
		const VARS: [&str; 5] = [
			"MMR_APP_ID",
			"MMR_REGISTRY_PATH",
			"MMR_SCHEMA_CLASSES",
			"MMR_SYNC_TIMEOUT_SECS",
			"MMR_LOG_LEVEL",
		];

		// Save original values so we can restore them
		let originals: Vec<_> = VARS.iter().map(|v| (*v, env::var_os(v))).collect();

		// Ensure environment is clean for the defaults check
		for v in VARS {
			unsafe { env::remove_var(v) };
		}

		let s = load().expect("load should succeed with defaults");
		let d = Settings::default();
		assert_eq!(s.app_id, d.app_id);
		assert_eq!(s.sync_timeout_secs, 0);
		assert_eq!(s.log_level, d.log_level);

		// Overlay environment values and verify they take effect
		unsafe { env::set_var("MMR_APP_ID", "tasks-abcde") };
		unsafe { env::set_var("MMR_REGISTRY_PATH", "/tmp/mimir/registry.json") };
		unsafe { env::set_var("MMR_SCHEMA_CLASSES", "Task,Project") };
		unsafe { env::set_var("MMR_SYNC_TIMEOUT_SECS", "45") };
		unsafe { env::set_var("MMR_LOG_LEVEL", "debug") };

		let s2 = load().expect("load should succeed with env");
		assert_eq!(s2.app_id, "tasks-abcde");
		assert_eq!(s2.registry_path, PathBuf::from("/tmp/mimir/registry.json"));
		assert_eq!(s2.schema_classes, vec!["Task".to_string(), "Project".to_string()]);
		assert_eq!(s2.sync_timeout_secs, 45);
		assert_eq!(s2.log_level, Level::Debug);

		// restore originals
		for (name, value) in originals {
			match value {
				Some(v) => unsafe { env::set_var(name, v) },
				None => unsafe { env::remove_var(name) },
			}
		}
	}
}
