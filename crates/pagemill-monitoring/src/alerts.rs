use chrono::Utc;
use pagemill_types::{Alert, AlertLevel};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Bounded in-memory alert ring feeding `GET /alerts`.
///
/// Background task failures and pool exhaustion raise entries here instead
/// of terminating the process.
pub struct AlertStream {
    entries: Mutex<VecDeque<Alert>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl AlertStream {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(16),
            next_id: AtomicU64::new(1),
        })
    }

    /// Record one alert and return its id.
    pub fn raise(&self, level: AlertLevel, source: &str, message: impl Into<String>) -> u64 {
        let message = message.into();
        match level {
            AlertLevel::Info => info!(source, message = %message, "Alert raised"),
            AlertLevel::Warning => warn!(source, message = %message, "Alert raised"),
            AlertLevel::Critical => error!(source, message = %message, "Alert raised"),
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(Alert {
            id,
            level,
            source: source.to_string(),
            message,
            created_at: Utc::now(),
            resolved: false,
        });
        id
    }

    /// Mark one alert resolved; unknown ids are ignored.
    pub fn resolve(&self, id: u64) {
        let mut entries = self.entries.lock();
        if let Some(alert) = entries.iter_mut().find(|a| a.id == id) {
            alert.resolved = true;
        }
    }

    /// Newest-first listing, optionally restricted to unresolved entries.
    pub fn list(&self, limit: usize, unresolved_only: bool) -> Vec<Alert> {
        self.entries
            .lock()
            .iter()
            .rev()
            .filter(|a| !unresolved_only || !a.resolved)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn unresolved_count(&self) -> usize {
        self.entries.lock().iter().filter(|a| !a.resolved).count()
    }
}
