use log::warn;
use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;

/// Retry schedule for registry writes that follow a confirmed live change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts, including the first one. Zero is treated as one.
	pub attempts: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			attempts: 3,
			initial_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_secs(2),
		}
	}
}

impl RetryPolicy {
	/// Single attempt, no waiting.
	pub fn none() -> Self {
		Self {
			attempts: 1,
			initial_backoff: Duration::ZERO,
			max_backoff: Duration::ZERO,
		}
	}
}

/// Run `op` until it succeeds or the policy is exhausted, doubling the
/// pause between attempts up to `max_backoff`. Returns the last error.
pub async fn retry_with_backoff<T, E, F>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
	F: FnMut() -> Result<T, E>,
	E: Display,
{
	let attempts = policy.attempts.max(1);
	let mut backoff = policy.initial_backoff;
	let mut attempt = 1;

	loop {
		match op() {
			Ok(value) => return Ok(value),
			Err(e) if attempt >= attempts => return Err(e),
			Err(e) => {
				warn!(
					"{} failed (attempt {}/{}): {}, retrying after {:?}",
					what, attempt, attempts, e, backoff
				);
				sleep(backoff).await;
				backoff = (backoff * 2).min(policy.max_backoff);
				attempt += 1;
			}
		}
	}
}
