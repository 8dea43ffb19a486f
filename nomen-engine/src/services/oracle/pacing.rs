//! Concurrency ceiling and per-slot call spacing

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// Minimum interval between two calls
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!(wait_ms = wait_time.as_millis() as u64, "Oracle pacing");
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

struct PoolInner {
    semaphore: Arc<Semaphore>,
    limiters: Vec<RateLimiter>,
    free: StdMutex<Vec<usize>>,
}

/// Fixed set of logical workers, each with its own pacing
#[derive(Clone)]
pub struct WorkerSlots {
    inner: Arc<PoolInner>,
}

impl WorkerSlots {
    pub fn new(worker_count: usize, inter_call_delay: Duration) -> Self {
        let count = worker_count.max(1);
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(count)),
                limiters: (0..count).map(|_| RateLimiter::new(inter_call_delay)).collect(),
                free: StdMutex::new((0..count).rev().collect()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.limiters.len()
    }

    /// Wait for a free slot; the slot is released when the guard drops
    pub async fn acquire(&self) -> SlotGuard {
        // The semaphore is never closed
        let permit = match self.inner.semaphore.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => None,
        };

        let index = {
            let mut free = self.inner.free.lock().unwrap_or_else(|e| e.into_inner());
            free.pop().unwrap_or(0)
        };

        SlotGuard {
            inner: Arc::clone(&self.inner),
            index,
            _permit: permit,
        }
    }
}

pub struct SlotGuard {
    inner: Arc<PoolInner>,
    index: usize,
    _permit: Option<OwnedSemaphorePermit>,
}

impl SlotGuard {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Wait until this slot may issue its next call
    pub async fn pace(&self) {
        if let Some(limiter) = self.inner.limiters.get(self.index) {
            limiter.wait().await;
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut free = self.inner.free.lock().unwrap_or_else(|e| e.into_inner());
        free.push(self.index);
    }
}
