//! Rate limiting primitives for the sign-in flow.
//!
//! `PgRateLimiter` is the server default so every instance shares one budget.
//! `FixedWindowRateLimiter` keeps counters in process memory and is meant for
//! tests and single-process development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_WINDOW_SECONDS: u64 = 10 * 60;
const DEFAULT_REQUEST_LINK_LIMIT: u32 = 5;
const DEFAULT_CONSUME_LINK_LIMIT: u32 = 30;
// Expired windows are swept once the map grows past this many keys.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    RequestLink,
    ConsumeLink,
}

impl RateLimitAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestLink => "request_link",
            Self::ConsumeLink => "consume_link",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

/// Each check that returns `Allowed` also counts as an attempt.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    async fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    async fn check_email(&self, _email: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    window: Duration,
    request_link_limit: u32,
    consume_link_limit: u32,
}

impl RateLimitConfig {
    /// Defaults: 5 link requests and 30 consume attempts per 10 minutes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: Duration::from_secs(DEFAULT_WINDOW_SECONDS),
            request_link_limit: DEFAULT_REQUEST_LINK_LIMIT,
            consume_link_limit: DEFAULT_CONSUME_LINK_LIMIT,
        }
    }

    #[must_use]
    pub fn with_window_seconds(mut self, seconds: u64) -> Self {
        self.window = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_request_link_limit(mut self, limit: u32) -> Self {
        self.request_link_limit = limit;
        self
    }

    #[must_use]
    pub fn with_consume_link_limit(mut self, limit: u32) -> Self {
        self.consume_link_limit = limit;
        self
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn limit(&self, action: RateLimitAction) -> u32 {
        match action {
            RateLimitAction::RequestLink => self.request_link_limit,
            RateLimitAction::ConsumeLink => self.consume_link_limit,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) enum Subject {
    Ip,
    Email,
}

impl Subject {
    pub(super) fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Email => "email",
        }
    }
}

/// Callers without a resolvable address share one bucket.
pub(super) const UNKNOWN_IP: &str = "unknown";

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window counters kept in process memory.
///
/// Limits are per process; use `PgRateLimiter` when more than one instance
/// serves traffic.
pub struct FixedWindowRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(RateLimitAction, Subject, String), Window>>,
}

impl FixedWindowRateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, action: RateLimitAction, subject: Subject, key: &str) -> RateLimitDecision {
        self.check_at(action, subject, key, Instant::now())
    }

    fn check_at(
        &self,
        action: RateLimitAction,
        subject: Subject,
        key: &str,
        now: Instant,
    ) -> RateLimitDecision {
        let window = self.config.window();
        let limit = self.config.limit(action);
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, entry| now.duration_since(entry.started) < window);
        }

        let entry = windows
            .entry((action, subject, key.to_string()))
            .or_insert(Window {
                started: now,
                count: 0,
            });
        if now.duration_since(entry.started) >= window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= limit {
            return RateLimitDecision::Limited;
        }
        entry.count += 1;
        RateLimitDecision::Allowed
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        self.check(action, Subject::Ip, ip.unwrap_or(UNKNOWN_IP))
    }

    async fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision {
        self.check(action, Subject::Email, email)
    }
}
