//! Rate limiting for reconciliation triggers.

use std::time::{Duration, Instant};

/// Default window for shared-document update handling.
pub const DEFAULT_DOCUMENT_THROTTLE_MS: u64 = 200;
/// Default window for applying peer presence.
pub const DEFAULT_PRESENCE_THROTTLE_MS: u64 = 100;
/// Default window for persisting local changes.
pub const DEFAULT_PERSIST_THROTTLE_MS: u64 = 100;

/// Leading-edge throttle with a trailing fire.
///
/// The first request fires on the next poll. Requests arriving inside the
/// window collapse into one fire once the window has elapsed.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_fired: Option<Instant>,
    pending: bool,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
            pending: false,
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Mark work as pending.
    pub fn request(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Returns true if pending work may run now, consuming the request.
    pub fn ready(&mut self, now: Instant) -> bool {
        if !self.pending {
            return false;
        }
        let open = match self.last_fired {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        if open {
            self.pending = false;
            self.last_fired = Some(now);
        }
        open
    }

    /// Drop any pending request.
    pub fn cancel(&mut self) {
        self.pending = false;
    }
}
