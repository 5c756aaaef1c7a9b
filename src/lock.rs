//! Cross-process exclusion for the scheduled cycle, built on a Postgres
//! session-scoped advisory lock. The lock rides on a dedicated pool
//! connection held for the duration of the cycle; if the holder crashes the
//! database releases the lock with its session.

use anyhow::{Context, Result};
use sqlx::{pool::PoolConnection, PgPool, Postgres, Row};
use tokio::sync::Mutex;

use crate::constants::CYCLE_LOCK_KEY;

pub struct CycleLock {
	pool: PgPool,
	held: Mutex<Option<PoolConnection<Postgres>>>,
}

impl CycleLock {
	pub fn new(pool: PgPool) -> Self {
		Self { pool, held: Mutex::new(None) }
	}

	/// Non-blocking acquire. `false` means another process (or this one) is
	/// already running the scheduled cycle.
	pub async fn try_acquire(&self) -> Result<bool> {
		let mut held = self.held.lock().await;
		if held.is_some() {
			return Ok(false);
		}

		let mut conn = self.pool.acquire().await.context("acquiring lock connection")?;
		let row = sqlx::query("SELECT pg_try_advisory_lock($1, $2) AS locked")
			.bind(CYCLE_LOCK_KEY.0)
			.bind(CYCLE_LOCK_KEY.1)
			.fetch_one(&mut *conn)
			.await
			.context("pg_try_advisory_lock")?;

		if row.try_get::<bool, _>("locked")? {
			*held = Some(conn);
			Ok(true)
		} else {
			Ok(false)
		}
	}

	/// Releases the lock and returns its connection to the pool. A no-op
	/// when not held.
	pub async fn release(&self) -> Result<()> {
		if let Some(mut conn) = self.held.lock().await.take() {
			sqlx::query("SELECT pg_advisory_unlock($1, $2)")
				.bind(CYCLE_LOCK_KEY.0)
				.bind(CYCLE_LOCK_KEY.1)
				.execute(&mut *conn)
				.await
				.context("pg_advisory_unlock")?;
		}
		Ok(())
	}
}
