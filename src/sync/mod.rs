pub mod local;
pub mod memory;
pub mod reconcile;
pub mod retry;
pub mod session;

pub use local::LocalSession;
pub use memory::MemorySession;
pub use reconcile::{
	AddOutcome, ApplyOutcome, EngineError, EngineOptions, EngineState, MIN_INPUT_LEN,
	RefreshOutcome, RemoveChoice, RemoveOutcome, SubscriptionEngine, SubscriptionRow,
	ValidationError, validate_input,
};
pub use retry::RetryPolicy;
pub use session::{
	FilteredQuery, MutableSubscriptions, ObjectQuery, SessionError, Subscription,
	SubscriptionChange, SyncSession,
};
