//! Backoff for transient SQLite lock errors on session mutations

use nomen_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

/// Default ceiling on total time spent retrying one mutation
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);
/// Retries that end up taking longer than this are logged as warnings
const SLOW_RETRY: Duration = Duration::from_secs(2);

/// Run `operation` again while it fails with "database is locked" or
/// "database is busy", doubling the pause each time, until `max_wait_ms` has
/// elapsed. Other errors are returned at once.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Duration::from_millis(max_wait_ms);
    let started = Instant::now();
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                let waited = started.elapsed();
                if attempt > 1 && waited > SLOW_RETRY {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = waited.as_millis() as u64,
                        "Store mutation needed a long lock wait"
                    );
                } else if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Store mutation succeeded after lock retry");
                }
                return Ok(value);
            }
            Err(err) if is_lock_error(&err) => err,
            Err(err) => return Err(err),
        };

        let waited = started.elapsed();
        if waited >= deadline {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = waited.as_millis() as u64,
                max_wait_ms,
                "Giving up on locked database"
            );
            return Err(err);
        }

        tracing::debug!(
            operation = operation_name,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            "Database locked, backing off"
        );
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

fn is_lock_error(err: &Error) -> bool {
    let Error::Persistence(db_err) = err else {
        return false;
    };
    let message = db_err.to_string();
    ["database is locked", "database is busy"]
        .iter()
        .any(|needle| message.contains(needle))
}
