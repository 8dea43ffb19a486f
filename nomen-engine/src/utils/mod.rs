//! Utility modules for the normalization engine

pub mod db_retry;
pub mod pool_monitor;

pub use db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
pub use pool_monitor::{begin_monitored, MonitoredTransaction};
