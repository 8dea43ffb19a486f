//! Instrumented transactions
//!
//! Every store mutation runs inside a [`MonitoredTransaction`], which logs
//! how long the pool took to hand out a connection and how long the
//! transaction held it.

use nomen_common::{Error, Result};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::time::{Duration, Instant};

/// Waits or holds beyond this are logged at warn level
const SLOW_CONNECTION: Duration = Duration::from_secs(1);

pub struct MonitoredTransaction<'c> {
    tx: Option<Transaction<'c, Sqlite>>,
    caller: &'static str,
    acquired_at: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    pub fn conn(&mut self) -> Result<&mut SqliteConnection> {
        let caller = self.caller;
        self.tx.as_deref_mut().ok_or_else(|| consumed(caller))
    }

    pub async fn commit(mut self) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| consumed(self.caller))?;
        tx.commit().await?;

        let held = self.acquired_at.elapsed();
        if held > SLOW_CONNECTION {
            tracing::warn!(caller = self.caller, held_ms = held.as_millis() as u64, "Transaction held its connection for a long time");
        } else {
            tracing::trace!(caller = self.caller, held_ms = held.as_millis() as u64, "Transaction committed");
        }
        Ok(())
    }
}

impl Drop for MonitoredTransaction<'_> {
    fn drop(&mut self) {
        // sqlx rolls back a transaction dropped without commit
        if self.tx.is_some() {
            tracing::debug!(caller = self.caller, "Transaction rolled back");
        }
    }
}

fn consumed(caller: &str) -> Error {
    Error::Internal(format!("{}: transaction already consumed", caller))
}

/// Begin a transaction, logging slow connection acquisition
pub async fn begin_monitored<'c>(pool: &'c SqlitePool, caller: &'static str) -> Result<MonitoredTransaction<'c>> {
    let requested = Instant::now();
    let tx = pool.begin().await?;

    let waited = requested.elapsed();
    if waited > SLOW_CONNECTION {
        tracing::warn!(caller, wait_ms = waited.as_millis() as u64, "Slow connection acquisition, pool may be saturated");
    }

    Ok(MonitoredTransaction {
        tx: Some(tx),
        caller,
        acquired_at: Instant::now(),
    })
}
