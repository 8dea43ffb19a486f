//! Fail-fast guard for an unhealthy oracle

use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const FAILURE_THRESHOLD: u32 = 5;
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(30);
pub const HALF_OPEN_SUCCESSES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    open_timeout: Duration,
    success_threshold: u32,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(FAILURE_THRESHOLD, OPEN_TIMEOUT, HALF_OPEN_SUCCESSES)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_timeout: Duration, success_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
            failure_threshold,
            open_timeout,
            success_threshold,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a call may proceed; moves an expired open breaker to half-open
    pub fn allow(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let expired = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.open_timeout)
                    .unwrap_or(true);
                if expired {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    tracing::info!("Oracle circuit breaker half-open");
                }
                expired
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if inner.state == BreakerState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.success_threshold {
                inner.state = BreakerState::Closed;
                inner.opened_at = None;
                tracing::info!("Oracle circuit breaker closed");
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        let trip = inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if trip && inner.state != BreakerState::Open {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            tracing::warn!(
                failures = inner.consecutive_failures,
                "Oracle circuit breaker opened"
            );
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }
}
