//! Bounded request retrier.
//!
//! Wraps a single upstream request in a short exponential backoff schedule
//! with jitter. Unlike an endless retry loop, the schedule is bounded: the
//! caller gets the last error back after the final attempt so it can decide
//! what an outage means (the worker fails open, the HTTP surface reports
//! UPSTREAM_UNAVAILABLE).

use std::{future::Future, time::Duration};

use rand::Rng;
use tracing::warn;

use crate::constants::BACKOFF_SCHEDULE;

fn jittered(delay: Duration) -> Duration {
	// Avoid thundering herds on shared upstreams without stretching the
	// schedule by more than a quarter.
	delay + rand::thread_rng().gen_range(Duration::ZERO..=delay / 4)
}

/// Runs `submit` up to `BACKOFF_SCHEDULE.len() + 1` times, sleeping between
/// attempts. Returns the first success, or the last error once the schedule
/// is exhausted.
pub async fn with_backoff<T, F, Fut>(request_name: &'static str, mut submit: F) -> anyhow::Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = anyhow::Result<T>>,
{
	let mut last_error = None;

	for attempt in 0..=BACKOFF_SCHEDULE.len() {
		if attempt > 0 {
			tokio::time::sleep(jittered(BACKOFF_SCHEDULE[attempt - 1])).await;
		}
		match submit().await {
			Ok(value) => return Ok(value),
			Err(error) => {
				warn!("Request {request_name} failed on attempt {}: {error:#}", attempt + 1);
				last_error = Some(error);
			},
		}
	}

	Err(last_error.expect("at least one attempt always runs"))
}
