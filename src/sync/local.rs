use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::memory::MemorySession;
use super::session::{MutableSubscriptions, ObjectQuery, SessionError, Subscription, SyncSession};

#[derive(Debug, Default, Serialize, Deserialize)]
struct LiveFile {
	#[serde(default)]
	subscriptions: Vec<Subscription>,
}

/// Offline session whose live set survives restarts.
///
/// Behaves like [`MemorySession`]; every confirmed synchronization also
/// writes the live set to a JSON file, which is read back on open.
pub struct LocalSession {
	inner: MemorySession,
	path: PathBuf,
}

impl LocalSession {
	pub async fn open<I, S>(path: impl Into<PathBuf>, classes: I) -> Result<Self, SessionError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let path = path.into();
		let live = match tokio::fs::read_to_string(&path).await {
			Ok(raw) if raw.trim().is_empty() => Vec::new(),
			Ok(raw) => {
				serde_json::from_str::<LiveFile>(&raw)
					.map_err(|e| {
						SessionError::Unavailable(format!("{}: {}", path.display(), e))
					})?
					.subscriptions
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
			Err(e) => {
				return Err(SessionError::Unavailable(format!("{}: {}", path.display(), e)));
			}
		};

		info!(
			"opened local session at {} with {} live subscriptions",
			path.display(),
			live.len()
		);

		Ok(Self {
			inner: MemorySession::new(classes).with_live(live),
			path,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	async fn save(&self) -> Result<(), SessionError> {
		let unavailable = |e: std::io::Error| {
			SessionError::Unavailable(format!("{}: {}", self.path.display(), e))
		};

		let doc = LiveFile {
			subscriptions: self.inner.snapshot().await,
		};
		let body = serde_json::to_vec_pretty(&doc)
			.map_err(|e| SessionError::Unavailable(e.to_string()))?;

		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() {
				tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
			}
		}
		let tmp = self.path.with_extension("json.tmp");
		tokio::fs::write(&tmp, body).await.map_err(unavailable)?;
		tokio::fs::rename(&tmp, &self.path)
			.await
			.map_err(unavailable)?;
		debug!("live set saved to {}", self.path.display());
		Ok(())
	}
}

#[async_trait]
impl SyncSession for LocalSession {
	async fn subscriptions(&self) -> Result<Vec<Subscription>, SessionError> {
		self.inner.subscriptions().await
	}

	fn objects(&self, class_name: &str) -> Result<ObjectQuery, SessionError> {
		self.inner.objects(class_name)
	}

	async fn update(&self, batch: MutableSubscriptions) -> Result<(), SessionError> {
		self.inner.update(batch).await
	}

	async fn wait_for_synchronization(&self) -> Result<(), SessionError> {
		self.inner.wait_for_synchronization().await?;
		self.save().await
	}
}
