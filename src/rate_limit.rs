//! Per-identity rate limiting with a fixed-window counter.
//!
//! Every identity gets one counting window. The first request opens it,
//! later requests inside the window bump the count, and the first request
//! after the window has run out opens a fresh one. A background sweeper
//! drops expired windows so the map does not grow without bound; it never
//! changes a decision, `check` re-derives expiry on its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};

use crate::metrics::RATE_LIMIT_ENTRIES;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_REQUESTS: u32 = 10;

/// Source of "now" for the limiter.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic wall clock used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Simulated clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    // Jump to an absolute offset from the clock's origin
    pub fn set(&self, at: Duration) {
        self.offset_ms.store(at.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

// Rate limit entry - tracks requests per IP/key
#[derive(Debug, Clone, Copy)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

impl RateLimitEntry {
    fn open(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }
}

/// Outcome of a single `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Requests still admitted in the current window; always 0 on denial.
    pub remaining: u32,
    /// Seconds until the window reopens; 0 when allowed, at least 1 when denied.
    pub retry_after: u64,
}

impl Decision {
    fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: 0,
        }
    }

    fn deny(retry_after: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after,
        }
    }
}

/// In-memory fixed-window limiter keyed by client identity.
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    max_requests: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter on the system clock. `max_requests` is clamped to at least 1.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            max_requests: max_requests.max(1),
            window,
            clock,
        }
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of stored windows, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counts one request for `identity` and decides whether it may proceed.
    ///
    /// The lookup, increment and store happen under the map's entry lock, so
    /// parallel calls for the same identity never lose an update.
    pub fn check(&self, identity: &str) -> Decision {
        let now = self.clock.now();

        match self.entries.entry(identity.to_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(RateLimitEntry::open(now));
                Decision::allow(self.max_requests - 1)
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                let elapsed = now.saturating_duration_since(entry.window_start);

                // window expired..? start over
                if elapsed > self.window {
                    *entry = RateLimitEntry::open(now);
                    return Decision::allow(self.max_requests - 1);
                }

                entry.count = entry.count.saturating_add(1);
                if entry.count > self.max_requests {
                    Decision::deny(retry_after_secs(self.window.saturating_sub(elapsed)))
                } else {
                    Decision::allow(self.max_requests - entry.count)
                }
            }
        }
    }

    /// Drops every window that has expired as of now. Returns how many went.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let expired = now.saturating_duration_since(entry.window_start) > self.window;
            if expired {
                removed += 1;
            }
            !expired
        });
        removed
    }
}

// Whole seconds, rounded up; a denial never advertises 0
fn retry_after_secs(left: Duration) -> u64 {
    (left.as_nanos().div_ceil(1_000_000_000) as u64).max(1)
}

/// Running background sweep. Stops when shut down or dropped.
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns the periodic sweep. The first pass runs one `period` after start.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, period: Duration) -> SweeperHandle {
    let task = tokio::spawn(async move {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(period_secs = period.as_secs(), "rate limit sweeper started");

        loop {
            ticker.tick().await;
            let removed = limiter.sweep();
            let live = limiter.len();
            RATE_LIMIT_ENTRIES.set(live as f64);
            tracing::debug!(removed, live, "swept expired rate limit windows");
        }
    });

    SweeperHandle { task }
}
