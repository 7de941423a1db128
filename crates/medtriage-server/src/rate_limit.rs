//! Sliding-window rate limiting per client
//!
//! Each client keeps the timestamps of its accepted requests inside the
//! current window. Rejected requests are not recorded. The table is
//! bounded: when it grows past `max_clients`, idle clients are swept and
//! then the least recently active clients are evicted.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { limit: usize, remaining: usize },
    Limited { limit: usize, retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// In-memory sliding-window limiter keyed by client identifier
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    max_clients: usize,
    clients: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: usize, window: Duration, max_clients: usize) -> Self {
        Self {
            limit,
            window,
            max_clients: max_clients.max(1),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check and record a request from `client` now
    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    /// Check and record a request from `client` at `now`.
    ///
    /// Purge, count, and append happen under one lock, so concurrent
    /// requests from the same client are counted exactly.
    pub fn check_at(&self, client: &str, now: Instant) -> RateDecision {
        let mut clients = self.clients.lock();

        let requests = clients.entry(client.to_string()).or_default();
        purge(requests, now, self.window);

        if requests.len() >= self.limit {
            return RateDecision::Limited {
                limit: self.limit,
                retry_after: self.window,
            };
        }

        requests.push_back(now);
        let remaining = self.limit - requests.len();

        if clients.len() > self.max_clients {
            evict(&mut clients, client, now, self.window, self.max_clients);
        }

        RateDecision::Allowed {
            limit: self.limit,
            remaining,
        }
    }

    /// Drop clients with no requests left in the window; returns how many were dropped
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, requests| {
            purge(requests, now, self.window);
            !requests.is_empty()
        });
        before - clients.len()
    }

    /// Requests from `client` currently inside the window
    pub fn requests_in_window(&self, client: &str) -> usize {
        let now = Instant::now();
        self.clients
            .lock()
            .get(client)
            .map(|requests| {
                requests
                    .iter()
                    .filter(|&&t| now.duration_since(t) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }
}

fn purge(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = requests.front() {
        if now.duration_since(oldest) >= window {
            requests.pop_front();
        } else {
            break;
        }
    }
}

fn evict(
    clients: &mut HashMap<String, VecDeque<Instant>>,
    current: &str,
    now: Instant,
    window: Duration,
    max_clients: usize,
) {
    clients.retain(|_, requests| {
        purge(requests, now, window);
        !requests.is_empty()
    });

    if clients.len() <= max_clients {
        return;
    }

    let mut by_activity: Vec<(Instant, String)> = clients
        .iter()
        .filter(|(id, _)| id.as_str() != current)
        .filter_map(|(id, requests)| requests.back().map(|&last| (last, id.clone())))
        .collect();
    by_activity.sort();

    let excess = clients.len() - max_clients;
    for (_, id) in by_activity.into_iter().take(excess) {
        clients.remove(&id);
    }
    tracing::debug!(evicted = excess, "Rate limiter client table trimmed");
}
