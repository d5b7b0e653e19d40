use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for reconciliation engine activity.
#[derive(Debug, Default)]
pub struct EngineMetrics {
	pub operations_total: AtomicU64,
	pub operation_failures: AtomicU64,
	pub inputs_ignored: AtomicU64,
	pub batches_submitted: AtomicU64,
	pub batch_failures: AtomicU64,
	pub sync_waits: AtomicU64,
	pub sync_failures: AtomicU64,
	pub registry_writes: AtomicU64,
	pub registry_write_failures: AtomicU64,
}

impl EngineMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub(crate) fn incr(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}

	/// Generate Prometheus-compatible metrics text
	pub fn to_prometheus_text(&self) -> String {
		let counters: [(&str, &str, &AtomicU64); 9] = [
			(
				"mimir_operations_total",
				"Engine operations started",
				&self.operations_total,
			),
			(
				"mimir_operation_failures_total",
				"Engine operations that ended in an error",
				&self.operation_failures,
			),
			(
				"mimir_inputs_ignored_total",
				"Add requests skipped because the input was too short",
				&self.inputs_ignored,
			),
			(
				"mimir_batches_submitted_total",
				"Subscription mutation batches submitted",
				&self.batches_submitted,
			),
			(
				"mimir_batch_failures_total",
				"Subscription mutation batches that failed to submit",
				&self.batch_failures,
			),
			(
				"mimir_sync_waits_total",
				"Waits for server synchronization",
				&self.sync_waits,
			),
			(
				"mimir_sync_failures_total",
				"Synchronization waits that failed or timed out",
				&self.sync_failures,
			),
			(
				"mimir_registry_writes_total",
				"Registry records persisted",
				&self.registry_writes,
			),
			(
				"mimir_registry_write_failures_total",
				"Registry writes abandoned after retries",
				&self.registry_write_failures,
			),
		];

		let mut out = String::new();
		for (name, help, counter) in counters {
			out.push_str(&format!("# HELP {} {}\n", name, help));
			out.push_str(&format!("# TYPE {} counter\n", name));
			out.push_str(&format!("{} {}\n", name, counter.load(Ordering::Relaxed)));
		}
		out
	}
}
