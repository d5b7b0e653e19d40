#![allow(dead_code)]

//! Common test fixtures for engine integration tests.
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vanopticon_mimir::registry::{MemoryRegistry, Registry};
use vanopticon_mimir::sync::{EngineOptions, MemorySession, RetryPolicy, SubscriptionEngine};

pub const APP_ID: &str = "tasks-abcde";

/// Classes known to every test session.
pub const CLASSES: [&str; 3] = ["Task", "Project", "Note"];

/// Retry quickly so failure paths don't slow the suite down.
pub fn fast_options() -> EngineOptions {
	EngineOptions {
		sync_timeout: None,
		registry_retry: RetryPolicy {
			attempts: 3,
			initial_backoff: Duration::from_millis(1),
			max_backoff: Duration::from_millis(4),
		},
	}
}

pub struct Harness {
	pub engine: Arc<SubscriptionEngine>,
	pub session: Arc<MemorySession>,
	pub registry: Arc<MemoryRegistry>,
}

pub fn harness(session: MemorySession) -> Harness {
	harness_with(session, MemoryRegistry::new(), fast_options())
}

pub fn harness_with(
	session: MemorySession,
	registry: MemoryRegistry,
	options: EngineOptions,
) -> Harness {
	let session = Arc::new(session);
	let registry = Arc::new(registry);
	let engine = SubscriptionEngine::new(session.clone(), registry.clone(), APP_ID)
		.with_options(options);
	Harness {
		engine: Arc::new(engine),
		session,
		registry,
	}
}

/// Store `entries` (name, class, filter) as the registry record for [`APP_ID`].
pub fn seed_registry(registry: &MemoryRegistry, entries: &[(&str, &str, &str)]) {
	let mut subs = serde_json::Map::new();
	for (name, class, filter) in entries {
		subs.insert(name.to_string(), json!({"class": class, "filter": filter}));
	}
	registry
		.set_value(APP_ID, json!({ "subscriptions": subs }))
		.expect("seeding the memory registry");
}

/// Names saved in the registry record, sorted.
pub fn saved_names(registry: &MemoryRegistry) -> Vec<String> {
	let record = registry.get_value(APP_ID).unwrap().unwrap_or_else(|| json!({}));
	let mut names: Vec<String> = record["subscriptions"]
		.as_object()
		.map(|m| m.keys().cloned().collect())
		.unwrap_or_default();
	names.sort();
	names
}

/// Names in the live set, in server order.
pub async fn live_names(session: &MemorySession) -> Vec<String> {
	session.snapshot().await.into_iter().map(|s| s.name).collect()
}
