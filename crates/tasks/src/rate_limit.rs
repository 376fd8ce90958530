//! Per-owner sliding-window limit on process requests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::TaskError;

const WINDOW: Duration = Duration::from_secs(3600);

/// Allows `per_hour` submissions per owner in any rolling hour. Zero disables.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Vec<Instant>>>,
    per_hour: u32,
}

impl RateLimiter {
    pub fn new(per_hour: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            per_hour,
        }
    }

    /// Record one request for `owner`, or refuse it.
    pub fn check(&self, owner: &str) -> Result<(), TaskError> {
        if self.per_hour == 0 {
            return Ok(());
        }
        let now = Instant::now();
        let mut windows = self.lock();
        let entries = windows.entry(owner.to_string()).or_default();
        entries.retain(|ts| now.duration_since(*ts) < WINDOW);

        if entries.len() as u32 >= self.per_hour {
            // Oldest entry leaves the window first.
            let retry_after_secs = entries
                .first()
                .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)).as_secs().max(1))
                .unwrap_or(WINDOW.as_secs());
            return Err(TaskError::RateLimited {
                limit: self.per_hour,
                retry_after_secs,
            });
        }

        entries.push(now);
        Ok(())
    }

    /// Forget owners with no requests inside the window.
    pub fn prune(&self) {
        let now = Instant::now();
        self.lock().retain(|_, entries| {
            entries.retain(|ts| now.duration_since(*ts) < WINDOW);
            !entries.is_empty()
        });
    }

    pub fn tracked_owners(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Instant>>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }
}
