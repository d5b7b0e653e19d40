use async_trait::async_trait;
use log::debug;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::session::{
	MutableSubscriptions, ObjectQuery, SessionError, Subscription, SubscriptionChange,
	SyncSession,
};

#[derive(Debug, Default)]
struct SessionState {
	live: Vec<Subscription>,
	/// Set when the last submitted batch was refused; reported by the next wait.
	pending_rejection: Option<String>,
	injected_update_failure: Option<String>,
	injected_rejection: Option<String>,
}

/// In-process sync session.
///
/// Holds a fixed class schema and an ordered live set. Batches are checked
/// the way a sync server would check them: a batch with a malformed filter is
/// refused as a whole, the live set keeps its previous contents, and the
/// refusal surfaces from the next [`SyncSession::wait_for_synchronization`].
///
/// Failures can be injected and calls are counted, so the session doubles as
/// a spy in tests.
pub struct MemorySession {
	classes: BTreeSet<String>,
	state: Mutex<SessionState>,
	sync_delay: Option<Duration>,
	update_calls: AtomicUsize,
	sync_calls: AtomicUsize,
}

impl MemorySession {
	pub fn new<I, S>(classes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			classes: classes.into_iter().map(Into::into).collect(),
			state: Mutex::new(SessionState::default()),
			sync_delay: None,
			update_calls: AtomicUsize::new(0),
			sync_calls: AtomicUsize::new(0),
		}
	}

	/// Seed the live set, as if a prior session left state on the server.
	pub fn with_live(mut self, live: Vec<Subscription>) -> Self {
		self.state.get_mut().live = live;
		self
	}

	/// Make every synchronization wait take at least `delay`.
	pub fn with_sync_delay(mut self, delay: Duration) -> Self {
		self.sync_delay = Some(delay);
		self
	}

	pub fn classes(&self) -> impl Iterator<Item = &str> {
		self.classes.iter().map(String::as_str)
	}

	/// The next `update` call fails before anything is applied.
	pub async fn fail_next_update(&self, message: impl Into<String>) {
		self.state.lock().await.injected_update_failure = Some(message.into());
	}

	/// The next submitted batch is refused by the "server".
	pub async fn reject_next_sync(&self, message: impl Into<String>) {
		self.state.lock().await.injected_rejection = Some(message.into());
	}

	/// Number of `update` calls, including failed ones.
	pub fn update_calls(&self) -> usize {
		self.update_calls.load(Ordering::SeqCst)
	}

	pub fn sync_calls(&self) -> usize {
		self.sync_calls.load(Ordering::SeqCst)
	}

	pub async fn snapshot(&self) -> Vec<Subscription> {
		self.state.lock().await.live.clone()
	}
}

#[async_trait]
impl SyncSession for MemorySession {
	async fn subscriptions(&self) -> Result<Vec<Subscription>, SessionError> {
		Ok(self.snapshot().await)
	}

	fn objects(&self, class_name: &str) -> Result<ObjectQuery, SessionError> {
		if self.classes.contains(class_name) {
			Ok(ObjectQuery::new(class_name))
		} else {
			Err(SessionError::ClassNotFound(class_name.to_string()))
		}
	}

	async fn update(&self, batch: MutableSubscriptions) -> Result<(), SessionError> {
		self.update_calls.fetch_add(1, Ordering::SeqCst);
		let mut state = self.state.lock().await;

		if let Some(message) = state.injected_update_failure.take() {
			return Err(SessionError::UpdateFailed(message));
		}

		let refusal = batch
			.changes()
			.iter()
			.find_map(|change| match change {
				SubscriptionChange::Add { name, query } => check_filter(&query.query_string)
					.err()
					.map(|reason| format!("invalid query for subscription '{}': {}", name, reason)),
				_ => None,
			})
			.or_else(|| state.injected_rejection.take());

		if let Some(reason) = refusal {
			debug!("refusing batch of {} changes: {}", batch.len(), reason);
			state.pending_rejection = Some(reason);
			return Ok(());
		}

		let mut next = state.live.clone();
		batch.apply_to(&mut next);
		state.live = next;
		state.pending_rejection = None;
		debug!("applied batch of {} changes, live set size {}", batch.len(), state.live.len());
		Ok(())
	}

	async fn wait_for_synchronization(&self) -> Result<(), SessionError> {
		self.sync_calls.fetch_add(1, Ordering::SeqCst);
		if let Some(delay) = self.sync_delay {
			tokio::time::sleep(delay).await;
		}

		match self.state.lock().await.pending_rejection.take() {
			Some(reason) => Err(SessionError::Rejected(reason)),
			None => Ok(()),
		}
	}
}

/// Minimal structural check of a filter expression: non-blank, quotes closed,
/// parentheses balanced.
pub fn check_filter(query: &str) -> Result<(), String> {
	if query.trim().is_empty() {
		return Err("empty filter".to_string());
	}

	let mut depth: i64 = 0;
	let mut quote: Option<char> = None;
	let mut escaped = false;

	for c in query.chars() {
		if let Some(q) = quote {
			if escaped {
				escaped = false;
			} else if c == '\\' {
				escaped = true;
			} else if c == q {
				quote = None;
			}
			continue;
		}

		match c {
			'\'' | '"' => quote = Some(c),
			'(' => depth += 1,
			')' => {
				depth -= 1;
				if depth < 0 {
					return Err("unexpected ')'".to_string());
				}
			}
			_ => {}
		}
	}

	if quote.is_some() {
		return Err("unterminated string literal".to_string());
	}
	if depth != 0 {
		return Err("unbalanced parentheses".to_string());
	}
	Ok(())
}
