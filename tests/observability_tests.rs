mod common;

#[cfg(feature = "unit-tests")]
mod observability_tests {
	use super::common::{harness, seed_registry};
	use std::sync::atomic::Ordering;
	use vanopticon_mimir::sync::{MemorySession, RemoveChoice};

	#[tokio::test]
	async fn counters_follow_engine_activity() {
		let h = harness(MemorySession::new(["Task"]));
		seed_registry(&h.registry, &[("sub1", "Task", "done == false")]);

		h.engine.apply_initial_subscriptions().await.unwrap();
		h.engine
			.add_or_modify_subscription("x", "Task", "done == false")
			.await
			.unwrap();
		h.engine
			.remove_subscription(RemoveChoice::Subscription("sub1".to_string()))
			.await
			.unwrap();
		h.engine
			.add_or_modify_subscription("sub2", "Ghost", "done == false")
			.await
			.unwrap_err();

		let m = h.engine.metrics();
		assert_eq!(m.operations_total.load(Ordering::Relaxed), 3);
		assert_eq!(m.operation_failures.load(Ordering::Relaxed), 1);
		assert_eq!(m.inputs_ignored.load(Ordering::Relaxed), 1);
		assert_eq!(m.batches_submitted.load(Ordering::Relaxed), 2);
		assert_eq!(m.sync_waits.load(Ordering::Relaxed), 2);
		assert_eq!(m.registry_writes.load(Ordering::Relaxed), 1);
	}

	#[tokio::test]
	async fn prometheus_text_exposes_counters() {
		let h = harness(MemorySession::new(["Task"]));
		h.engine.apply_initial_subscriptions().await.unwrap();

		let text = h.engine.metrics().to_prometheus_text();
		assert!(text.contains("# TYPE mimir_operations_total counter"));
		assert!(text.contains("mimir_operations_total 1"));
		assert!(text.contains("mimir_sync_waits_total 1"));
	}
}
