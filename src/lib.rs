pub mod config;
pub mod console;
pub mod observability;
pub mod registry;
pub mod sync;

use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};

use crate::config::Settings;
use crate::registry::JsonFileRegistry;
use crate::sync::{EngineOptions, LocalSession, SubscriptionEngine};

/// Open the offline session and the file registry named in `settings` and
/// build an engine over them.
pub async fn open_engine(settings: &Settings) -> anyhow::Result<SubscriptionEngine> {
	if settings.schema_classes.is_empty() {
		warn!("no schema classes configured; every add will report an unknown class");
	}

	let session = LocalSession::open(&settings.session_path, settings.schema_classes.clone())
		.await
		.with_context(|| {
			format!(
				"failed to open sync session at '{}'",
				settings.session_path.display()
			)
		})?;
	let registry = JsonFileRegistry::new(&settings.registry_path);

	info!(
		"Mimir ready: app={} registry={} session={}",
		settings.app_id,
		settings.registry_path.display(),
		settings.session_path.display()
	);

	Ok(
		SubscriptionEngine::new(Arc::new(session), Arc::new(registry), settings.app_id.clone())
			.with_options(EngineOptions::from_settings(settings)),
	)
}
