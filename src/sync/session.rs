use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named, server-evaluated query registration as reported by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
	/// Unique within the live set; the key for lookup and removal.
	pub name: String,
	/// Database class the query targets.
	pub object_type: String,
	/// Filter expression evaluated server-side.
	pub query_string: String,
}

impl Subscription {
	pub fn new(
		name: impl Into<String>,
		object_type: impl Into<String>,
		query_string: impl Into<String>,
	) -> Self {
		Self {
			name: name.into(),
			object_type: object_type.into(),
			query_string: query_string.into(),
		}
	}
}

/// Errors reported by a sync session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
	#[error("Class {0} doesn't exist!")]
	ClassNotFound(String),

	/// The server refused the subscription set (bad filter, permission denial).
	#[error("server rejected subscription set: {0}")]
	Rejected(String),

	/// The mutation could not be submitted at all.
	#[error("subscription update failed: {0}")]
	UpdateFailed(String),

	#[error("session unavailable: {0}")]
	Unavailable(String),
}

/// A cursor over all objects of one class, produced by [`SyncSession::objects`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectQuery {
	object_type: String,
}

impl ObjectQuery {
	/// Only sessions construct cursors, after checking the class exists.
	pub(crate) fn new(object_type: impl Into<String>) -> Self {
		Self {
			object_type: object_type.into(),
		}
	}

	pub fn object_type(&self) -> &str {
		&self.object_type
	}

	/// Narrow the cursor with a filter expression.
	pub fn filtered(&self, query: impl Into<String>) -> FilteredQuery {
		FilteredQuery {
			object_type: self.object_type.clone(),
			query_string: query.into(),
		}
	}
}

/// A class cursor narrowed by a filter; the unit a subscription is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredQuery {
	pub object_type: String,
	pub query_string: String,
}

/// One change inside a mutation batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionChange {
	Add { name: String, query: FilteredQuery },
	RemoveByName(String),
	RemoveAll,
}

/// Mutable view over the live set handed to [`SyncSession::update`].
///
/// Changes are recorded in order and applied by the session as a single
/// atomic batch: either every change lands or none does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutableSubscriptions {
	changes: Vec<SubscriptionChange>,
}

impl MutableSubscriptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add a subscription, or overwrite the existing one with the same name.
	pub fn add(&mut self, query: FilteredQuery, name: impl Into<String>) -> &mut Self {
		self.changes.push(SubscriptionChange::Add {
			name: name.into(),
			query,
		});
		self
	}

	pub fn remove_by_name(&mut self, name: impl Into<String>) -> &mut Self {
		self.changes
			.push(SubscriptionChange::RemoveByName(name.into()));
		self
	}

	pub fn remove_all(&mut self) -> &mut Self {
		self.changes.push(SubscriptionChange::RemoveAll);
		self
	}

	pub fn is_empty(&self) -> bool {
		self.changes.is_empty()
	}

	pub fn len(&self) -> usize {
		self.changes.len()
	}

	pub fn changes(&self) -> &[SubscriptionChange] {
		&self.changes
	}

	/// Apply the recorded changes to `set` in order.
	///
	/// Adds overwrite by name in place, so the set never holds two entries
	/// with the same name. Removing an absent name is ignored.
	pub fn apply_to(&self, set: &mut Vec<Subscription>) {
		for change in &self.changes {
			match change {
				SubscriptionChange::Add { name, query } => {
					let sub = Subscription::new(
						name.clone(),
						query.object_type.clone(),
						query.query_string.clone(),
					);
					match set.iter_mut().find(|s| &s.name == name) {
						Some(existing) => *existing = sub,
						None => set.push(sub),
					}
				}
				SubscriptionChange::RemoveByName(name) => set.retain(|s| &s.name != name),
				SubscriptionChange::RemoveAll => set.clear(),
			}
		}
	}
}

/// An open connection to a syncing database instance.
///
/// Implementations own the live, authoritative subscription set. Callers
/// must not run two `update` calls concurrently against one session.
#[async_trait]
pub trait SyncSession: Send + Sync + 'static {
	/// Snapshot of the live set in server-reported order.
	async fn subscriptions(&self) -> Result<Vec<Subscription>, SessionError>;

	async fn is_empty(&self) -> Result<bool, SessionError> {
		Ok(self.subscriptions().await?.is_empty())
	}

	/// Resolve a cursor over every object of `class_name`.
	fn objects(&self, class_name: &str) -> Result<ObjectQuery, SessionError>;

	/// Submit an atomic batch of additions and removals.
	async fn update(&self, batch: MutableSubscriptions) -> Result<(), SessionError>;

	/// Suspend until the server confirms the most recent change.
	async fn wait_for_synchronization(&self) -> Result<(), SessionError>;
}
