//! Reconciliation of the registry's desired subscriptions with the live set
//! of a sync session.
//!
//! Every mutating operation follows the same shape: build one atomic batch,
//! submit it, wait for the server to confirm, and only then touch the
//! registry. A failure anywhere before confirmation leaves the registry as
//! it was, so the two sides never diverge because of a failed change.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use super::retry::{RetryPolicy, retry_with_backoff};
use super::session::{MutableSubscriptions, SessionError, SyncSession};
use crate::config::Settings;
use crate::observability::EngineMetrics;
use crate::registry::{
	Registry, RegistryError, RegistryRecord, SavedSubscription, load_record, store_record,
};

/// Shortest accepted name, class and filter, in characters.
pub const MIN_INPUT_LEN: usize = 2;

/// Input rejected before anything is attempted. Never shown to the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
	#[error("{field} must be at least {MIN_INPUT_LEN} characters")]
	TooShort { field: &'static str },
}

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Class {0} doesn't exist!")]
	ClassNotFound(String),

	#[error("sync server rejected the change: {0}")]
	SyncRejected(String),

	#[error("no confirmation from the sync server after {0:?}")]
	SyncTimeout(Duration),

	#[error(transparent)]
	Session(SessionError),

	#[error("could not read the subscription registry: {0}")]
	RegistryRead(#[source] RegistryError),

	/// The live change went through but the registry could not record it.
	#[error("{name} is live but was not saved: {source}")]
	RegistryWrite {
		name: String,
		#[source]
		source: RegistryError,
	},
}

impl From<SessionError> for EngineError {
	fn from(e: SessionError) -> Self {
		match e {
			SessionError::ClassNotFound(class) => EngineError::ClassNotFound(class),
			SessionError::Rejected(reason) => EngineError::SyncRejected(reason),
			other => EngineError::Session(other),
		}
	}
}

/// Where the engine stands with respect to its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
	/// No confirmed synchronization yet.
	Uninitialized,
	/// The last confirmed live set is current.
	Settled,
	/// An operation is in flight.
	Mutating,
}

/// One line of the subscription listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRow {
	#[serde(rename = "Name")]
	pub name: String,
	#[serde(rename = "Table")]
	pub table: String,
	#[serde(rename = "Query")]
	pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
	/// The session already had subscriptions; nothing was submitted.
	AlreadyLive { count: usize },
	/// The registry held nothing to apply.
	NothingSaved,
	/// Saved subscriptions were submitted as one batch and confirmed.
	Applied { count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
	Saved,
	/// Input too short; nothing was attempted.
	Ignored(ValidationError),
}

/// The caller's pick from the list of live subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveChoice {
	Subscription(String),
	/// The cancel sentinel.
	Back,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
	Removed,
	Cancelled,
	/// The name was not in the live set; nothing changed.
	NotLive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
	pub cleared: usize,
	pub applied: usize,
}

/// Tunables for session waits and registry writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineOptions {
	/// Upper bound on each session call; `None` waits as long as it takes.
	pub sync_timeout: Option<Duration>,
	pub registry_retry: RetryPolicy,
}

impl EngineOptions {
	pub fn from_settings(settings: &Settings) -> Self {
		Self {
			sync_timeout: (settings.sync_timeout_secs > 0)
				.then(|| Duration::from_secs(settings.sync_timeout_secs)),
			registry_retry: RetryPolicy {
				attempts: settings.registry_write_retries.max(1),
				initial_backoff: Duration::from_millis(settings.registry_backoff_ms),
				max_backoff: Duration::from_secs(2),
			},
		}
	}
}

/// Keeps the live subscription set of one session and the registry record
/// of one application in agreement.
///
/// Operations are serialized: a second caller waits until the first has
/// received its confirmation, so two batches are never in flight together.
pub struct SubscriptionEngine {
	session: Arc<dyn SyncSession>,
	registry: Arc<dyn Registry>,
	app_id: String,
	options: EngineOptions,
	metrics: Arc<EngineMetrics>,
	/// Held for the whole of every mutating operation.
	state: Mutex<EngineState>,
}

impl SubscriptionEngine {
	pub fn new(
		session: Arc<dyn SyncSession>,
		registry: Arc<dyn Registry>,
		app_id: impl Into<String>,
	) -> Self {
		Self {
			session,
			registry,
			app_id: app_id.into(),
			options: EngineOptions::default(),
			metrics: Arc::new(EngineMetrics::new()),
			state: Mutex::new(EngineState::Uninitialized),
		}
	}

	pub fn with_options(mut self, options: EngineOptions) -> Self {
		self.options = options;
		self
	}

	pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
		self.metrics = metrics;
		self
	}

	pub fn app_id(&self) -> &str {
		&self.app_id
	}

	pub fn metrics(&self) -> Arc<EngineMetrics> {
		Arc::clone(&self.metrics)
	}

	pub fn state(&self) -> EngineState {
		match self.state.try_lock() {
			Ok(state) => *state,
			Err(_) => EngineState::Mutating,
		}
	}

	/// The desired state as currently recorded in the registry.
	pub fn saved_subscriptions(&self) -> Result<RegistryRecord, EngineError> {
		load_record(self.registry.as_ref(), &self.app_id).map_err(EngineError::RegistryRead)
	}

	/// The live set as the server reports it right now.
	pub async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRow>, EngineError> {
		let live = self.session.subscriptions().await?;
		Ok(live
			.into_iter()
			.map(|s| SubscriptionRow {
				name: s.name,
				table: s.object_type,
				query: s.query_string,
			})
			.collect())
	}

	/// Populate an empty session from the registry; always ends with a
	/// synchronization wait.
	pub async fn apply_initial_subscriptions(&self) -> Result<ApplyOutcome, EngineError> {
		self.run("apply", self.apply_initial()).await
	}

	/// Add `name`, or overwrite it, and record it once the server confirms.
	pub async fn add_or_modify_subscription(
		&self,
		name: &str,
		class: &str,
		filter: &str,
	) -> Result<AddOutcome, EngineError> {
		if let Err(e) = validate_input(name, class, filter) {
			debug!("ignoring add request: {}", e);
			EngineMetrics::incr(&self.metrics.inputs_ignored);
			return Ok(AddOutcome::Ignored(e));
		}

		self.run("add", self.add_or_modify(name, class, filter))
			.await
	}

	/// Remove the chosen subscription from the live set and the registry.
	pub async fn remove_subscription(
		&self,
		choice: RemoveChoice,
	) -> Result<RemoveOutcome, EngineError> {
		match choice {
			RemoveChoice::Back => Ok(RemoveOutcome::Cancelled),
			RemoveChoice::Subscription(name) => self.run("remove", self.remove(&name)).await,
		}
	}

	/// Drop the whole live set and rebuild it from the registry.
	///
	/// Saved classes are resolved before anything is cleared, so a registry
	/// naming an unknown class fails without emptying the session.
	pub async fn refresh_subscriptions(&self) -> Result<RefreshOutcome, EngineError> {
		self.run("refresh", self.refresh()).await
	}

	async fn apply_initial(&self) -> Result<ApplyOutcome, EngineError> {
		if !self.session.is_empty().await? {
			let count = self.session.subscriptions().await?.len();
			debug!("session already has {} subscriptions, not applying", count);
			self.wait().await?;
			return Ok(ApplyOutcome::AlreadyLive { count });
		}

		let record = self.saved_subscriptions()?;
		self.apply_saved(&record).await
	}

	async fn add_or_modify(
		&self,
		name: &str,
		class: &str,
		filter: &str,
	) -> Result<AddOutcome, EngineError> {
		let objects = self.session.objects(class)?;

		info!("Adding/Modifying subscription {}", name);
		let mut batch = MutableSubscriptions::new();
		batch.add(objects.filtered(filter), name);
		self.submit(batch).await?;

		self.record_change(name, |record| {
			record
				.subscriptions
				.insert(name.to_string(), SavedSubscription::new(class, filter));
		})
		.await?;

		Ok(AddOutcome::Saved)
	}

	async fn remove(&self, name: &str) -> Result<RemoveOutcome, EngineError> {
		let live = self.session.subscriptions().await?;
		if !live.iter().any(|s| s.name == name) {
			warn!("subscription {} is not live, nothing to remove", name);
			return Ok(RemoveOutcome::NotLive);
		}

		info!("Removing subscription {}", name);
		let mut batch = MutableSubscriptions::new();
		batch.remove_by_name(name);
		self.submit(batch).await?;

		self.record_change(name, |record| {
			record.subscriptions.remove(name);
		})
		.await?;

		Ok(RemoveOutcome::Removed)
	}

	async fn refresh(&self) -> Result<RefreshOutcome, EngineError> {
		let record = self.saved_subscriptions()?;
		let prepared = self.prepare_batch(&record)?;

		let cleared = self.session.subscriptions().await?.len();
		if cleared > 0 {
			info!("Clearing {} subscriptions", cleared);
			let mut batch = MutableSubscriptions::new();
			batch.remove_all();
			self.submit(batch).await?;
		}

		info!("Applying subscriptions");
		let applied = prepared.len();
		if prepared.is_empty() {
			self.wait().await?;
		} else {
			self.submit(prepared).await?;
		}

		Ok(RefreshOutcome { cleared, applied })
	}

	async fn apply_saved(&self, record: &RegistryRecord) -> Result<ApplyOutcome, EngineError> {
		if record.is_empty() {
			debug!("no saved subscriptions for {}", self.app_id);
			self.wait().await?;
			return Ok(ApplyOutcome::NothingSaved);
		}

		let batch = self.prepare_batch(record)?;
		let count = batch.len();
		info!("Applying {} saved subscriptions", count);
		self.submit(batch).await?;
		Ok(ApplyOutcome::Applied { count })
	}

	/// One `add` per saved entry. Every class is resolved up front, so an
	/// unknown class aborts before the session sees any change.
	fn prepare_batch(&self, record: &RegistryRecord) -> Result<MutableSubscriptions, EngineError> {
		let mut batch = MutableSubscriptions::new();
		for (name, saved) in &record.subscriptions {
			let objects = self.session.objects(&saved.class)?;
			batch.add(objects.filtered(saved.filter.as_str()), name.as_str());
		}
		Ok(batch)
	}

	/// Serialize `op` against other operations and track engine state.
	async fn run<T, F>(&self, what: &str, op: F) -> Result<T, EngineError>
	where
		F: Future<Output = Result<T, EngineError>>,
	{
		let mut state = self.state.lock().await;
		EngineMetrics::incr(&self.metrics.operations_total);

		match op.await {
			Ok(value) => {
				*state = EngineState::Settled;
				Ok(value)
			}
			Err(e) => {
				// Registry write failures come after a confirmed live change.
				if matches!(e, EngineError::RegistryWrite { .. }) {
					*state = EngineState::Settled;
				}
				EngineMetrics::incr(&self.metrics.operation_failures);
				warn!("{} failed: {}", what, e);
				Err(e)
			}
		}
	}

	async fn submit(&self, batch: MutableSubscriptions) -> Result<(), EngineError> {
		EngineMetrics::incr(&self.metrics.batches_submitted);
		if let Err(e) = self.bounded(self.session.update(batch)).await {
			EngineMetrics::incr(&self.metrics.batch_failures);
			return Err(e);
		}
		self.wait().await
	}

	async fn wait(&self) -> Result<(), EngineError> {
		EngineMetrics::incr(&self.metrics.sync_waits);
		debug!("Refreshing subscriptions…");
		let res = self.bounded(self.session.wait_for_synchronization()).await;
		if res.is_err() {
			EngineMetrics::incr(&self.metrics.sync_failures);
		}
		res
	}

	async fn bounded<T>(
		&self,
		fut: impl Future<Output = Result<T, SessionError>>,
	) -> Result<T, EngineError> {
		match self.options.sync_timeout {
			Some(limit) => tokio::time::timeout(limit, fut)
				.await
				.map_err(|_| EngineError::SyncTimeout(limit))?
				.map_err(EngineError::from),
			None => fut.await.map_err(EngineError::from),
		}
	}

	/// Read-modify-write the registry record after a confirmed live change.
	async fn record_change<F>(&self, name: &str, mut change: F) -> Result<(), EngineError>
	where
		F: FnMut(&mut RegistryRecord),
	{
		let registry = self.registry.as_ref();
		let res = retry_with_backoff(self.options.registry_retry, "registry write", || {
			let mut record = load_record(registry, &self.app_id)?;
			change(&mut record);
			store_record(registry, &self.app_id, &record)
		})
		.await;

		match res {
			Ok(()) => {
				EngineMetrics::incr(&self.metrics.registry_writes);
				Ok(())
			}
			Err(source) => {
				EngineMetrics::incr(&self.metrics.registry_write_failures);
				error!(
					"subscription {} changed on the server but the registry was not updated: {}",
					name, source
				);
				Err(EngineError::RegistryWrite {
					name: name.to_string(),
					source,
				})
			}
		}
	}
}

/// Every field must be at least [`MIN_INPUT_LEN`] characters long.
pub fn validate_input(name: &str, class: &str, filter: &str) -> Result<(), ValidationError> {
	for (field, value) in [("name", name), ("class", class), ("filter", filter)] {
		if value.chars().count() < MIN_INPUT_LEN {
			return Err(ValidationError::TooShort { field });
		}
	}
	Ok(())
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::registry::MemoryRegistry;
	use crate::sync::memory::MemorySession;
	use crate::sync::session::Subscription;

	fn engine(session: MemorySession) -> (SubscriptionEngine, Arc<MemorySession>, Arc<MemoryRegistry>) {
		let session = Arc::new(session);
		let registry = Arc::new(MemoryRegistry::new());
		let engine = SubscriptionEngine::new(session.clone(), registry.clone(), "app-test");
		(engine, session, registry)
	}

	#[test]
	fn validation_counts_characters_not_bytes() {
		assert!(validate_input("ab", "Task", "done == false").is_ok());
		assert!(validate_input("é", "Task", "done == false").is_err());
		assert_eq!(
			validate_input("name", "T", "done == false"),
			Err(ValidationError::TooShort { field: "class" })
		);
		assert_eq!(
			validate_input("name", "Task", "x"),
			Err(ValidationError::TooShort { field: "filter" })
		);
	}

	#[test]
	fn session_errors_map_to_engine_errors() {
		assert!(matches!(
			EngineError::from(SessionError::ClassNotFound("X".into())),
			EngineError::ClassNotFound(_)
		));
		assert!(matches!(
			EngineError::from(SessionError::Rejected("bad".into())),
			EngineError::SyncRejected(_)
		));
		assert!(matches!(
			EngineError::from(SessionError::Unavailable("down".into())),
			EngineError::Session(_)
		));
	}

	#[test]
	fn options_from_settings() {
		let mut settings = Settings::default();
		settings.sync_timeout_secs = 0;
		assert_eq!(EngineOptions::from_settings(&settings).sync_timeout, None);

		settings.sync_timeout_secs = 30;
		settings.registry_write_retries = 0;
		let options = EngineOptions::from_settings(&settings);
		assert_eq!(options.sync_timeout, Some(Duration::from_secs(30)));
		assert_eq!(options.registry_retry.attempts, 1);
	}

	#[tokio::test]
	async fn state_moves_to_settled_after_first_confirmation() {
		let (engine, _, _) = engine(MemorySession::new(["Task"]));
		assert_eq!(engine.state(), EngineState::Uninitialized);

		engine.apply_initial_subscriptions().await.unwrap();
		assert_eq!(engine.state(), EngineState::Settled);
	}

	#[tokio::test]
	async fn failed_operation_keeps_prior_state() {
		let (engine, _, _) = engine(MemorySession::new(["Task"]));
		let err = engine
			.add_or_modify_subscription("sub1", "Ghost", "done == false")
			.await
			.unwrap_err();
		assert_eq!(err.to_string(), "Class Ghost doesn't exist!");
		assert_eq!(engine.state(), EngineState::Uninitialized);
	}

	#[tokio::test]
	async fn list_reports_server_order() {
		let (engine, _, _) = engine(MemorySession::new(["Task"]).with_live(vec![
			Subscription::new("zeta", "Task", "done == true"),
			Subscription::new("alpha", "Task", "done == false"),
		]));

		let rows = engine.list_subscriptions().await.unwrap();
		let names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
		assert_eq!(names, ["zeta", "alpha"]);
		assert_eq!(rows[1].table, "Task");
		assert_eq!(rows[1].query, "done == false");
	}

	#[tokio::test]
	async fn remove_back_is_a_no_op() {
		let (engine, session, registry) = engine(MemorySession::new(["Task"]));
		assert_eq!(
			engine.remove_subscription(RemoveChoice::Back).await.unwrap(),
			RemoveOutcome::Cancelled
		);
		assert_eq!(session.update_calls(), 0);
		assert_eq!(registry.writes(), 0);
	}
}
