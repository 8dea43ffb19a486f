//! Batch run statistics and the bounded event log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Entries kept in the in-memory batch log
pub const LOG_CAPACITY: usize = 200;

/// Progress of the current or last batch run
///
/// Display: "Processed X of Y (S ok, F failed)"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchStats {
    /// Reset counters for a new run
    pub fn begin(&mut self, now: DateTime<Utc>) {
        *self = BatchStats {
            running: true,
            started_at: Some(now),
            ..BatchStats::default()
        };
    }

    pub fn record(&mut self, success: bool) {
        self.processed += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.running = false;
        self.finished_at = Some(now);
    }

    pub fn display_string(&self) -> String {
        if self.running && self.total == 0 {
            return "loading items".to_string();
        }
        format!(
            "Processed {} of {} ({} ok, {} failed)",
            self.processed, self.total, self.successful, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Ring of the most recent batch events, oldest dropped first
#[derive(Debug, Clone)]
pub struct BatchLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for BatchLog {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl BatchLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `limit` newest entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }
}
