//! Per-IP throttling of failed integration authentications.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Failures tolerated inside one window.
pub const MAX_FAILURES: u32 = 5;
pub const FAILURE_WINDOW: Duration = Duration::from_secs(60);
pub const BLOCK_DURATION: Duration = Duration::from_secs(15 * 60);
/// Tracked addresses above which stale entries are dropped on the next failure.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone)]
struct Attempts {
    failures: u32,
    window_start: Instant,
    blocked_until: Option<Instant>,
}

impl Attempts {
    /// Nothing left to enforce: any block is over and the window has passed.
    fn is_stale(&self, now: Instant) -> bool {
        match self.blocked_until {
            Some(until) => until <= now,
            None => now.duration_since(self.window_start) > FAILURE_WINDOW,
        }
    }
}

/// Tracks failed authentications per client address.
#[derive(Default)]
pub struct RateLimiter {
    attempts: Mutex<HashMap<String, Attempts>>,
    trust_forwarded: bool,
}

impl RateLimiter {
    /// Limiter keyed on the connecting peer's address.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limiter keyed on the client address reported by a reverse proxy
    /// (`Forwarded` / `X-Forwarded-For`). Only for deployments where every
    /// request arrives through a proxy that overwrites those headers.
    pub fn behind_proxy() -> Self {
        Self {
            trust_forwarded: true,
            ..Self::default()
        }
    }

    pub fn trusts_forwarded(&self) -> bool {
        self.trust_forwarded
    }

    /// Number of addresses currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    /// Drop addresses with nothing left to enforce. Returns how many went.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    pub fn prune_at(&self, now: Instant) -> usize {
        let mut attempts = self.lock();
        let before = attempts.len();
        attempts.retain(|_, entry| !entry.is_stale(now));
        let pruned = before - attempts.len();
        if pruned > 0 {
            debug!("Pruned {} stale rate limit entries", pruned);
        }
        pruned
    }

    /// Remaining block time for `ip`, if it is blocked.
    pub fn check(&self, ip: &str) -> Option<Duration> {
        self.check_at(ip, Instant::now())
    }

    pub fn check_at(&self, ip: &str, now: Instant) -> Option<Duration> {
        let mut attempts = self.lock();
        let entry = attempts.get(ip)?;
        match entry.blocked_until {
            Some(until) if until > now => Some(until - now),
            Some(_) => {
                attempts.remove(ip);
                None
            }
            None => None,
        }
    }

    /// Record a failed authentication. Returns the block duration when this
    /// failure tipped the address over the limit.
    pub fn record_failure(&self, ip: &str) -> Option<Duration> {
        self.record_failure_at(ip, Instant::now())
    }

    pub fn record_failure_at(&self, ip: &str, now: Instant) -> Option<Duration> {
        let mut attempts = self.lock();
        if attempts.len() >= PRUNE_THRESHOLD && !attempts.contains_key(ip) {
            attempts.retain(|_, entry| !entry.is_stale(now));
        }
        let entry = attempts.entry(ip.to_string()).or_insert(Attempts {
            failures: 0,
            window_start: now,
            blocked_until: None,
        });

        if now.duration_since(entry.window_start) > FAILURE_WINDOW {
            entry.failures = 0;
            entry.window_start = now;
            entry.blocked_until = None;
        }

        entry.failures += 1;
        if entry.failures >= MAX_FAILURES && entry.blocked_until.is_none() {
            entry.blocked_until = Some(now + BLOCK_DURATION);
            warn!(
                "Blocking {} for {}s after {} failed authentications",
                ip,
                BLOCK_DURATION.as_secs(),
                entry.failures
            );
            return Some(BLOCK_DURATION);
        }
        None
    }

    /// Successful authentication clears the address's history.
    pub fn record_success(&self, ip: &str) {
        self.lock().remove(ip);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Attempts>> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifth_failure_blocks() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..4 {
            assert!(limiter.record_failure_at("10.0.0.1", now).is_none());
        }
        assert!(limiter.check_at("10.0.0.1", now).is_none());

        assert_eq!(
            limiter.record_failure_at("10.0.0.1", now),
            Some(BLOCK_DURATION)
        );
        let remaining = limiter.check_at("10.0.0.1", now + Duration::from_secs(60));
        assert_eq!(remaining, Some(BLOCK_DURATION - Duration::from_secs(60)));
        assert!(limiter.check_at("10.0.0.2", now).is_none());
    }

    #[test]
    fn test_block_expires() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..5 {
            limiter.record_failure_at("10.0.0.1", now);
        }
        let later = now + BLOCK_DURATION + Duration::from_secs(1);
        assert!(limiter.check_at("10.0.0.1", later).is_none());
        assert!(limiter.record_failure_at("10.0.0.1", later).is_none());
    }

    #[test]
    fn test_failures_outside_window_do_not_accumulate() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for i in 0..4 {
            limiter.record_failure_at("ip", now + Duration::from_secs(i));
        }
        let next_window = now + FAILURE_WINDOW + Duration::from_secs(5);
        assert!(limiter.record_failure_at("ip", next_window).is_none());
        assert!(limiter.check_at("ip", next_window).is_none());
    }

    #[test]
    fn test_success_resets_counter() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..4 {
            limiter.record_failure_at("ip", now);
        }
        limiter.record_success("ip");
        assert!(limiter.record_failure_at("ip", now).is_none());
    }

    #[test]
    fn test_prune_drops_only_stale_entries() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..5 {
            limiter.record_failure_at("blocked", now);
        }
        limiter.record_failure_at("once", now);
        limiter.record_failure_at("recent", now + FAILURE_WINDOW);

        assert_eq!(limiter.prune_at(now + FAILURE_WINDOW + Duration::from_secs(1)), 1);
        assert_eq!(limiter.tracked(), 2);
        assert!(limiter.check_at("blocked", now + FAILURE_WINDOW).is_some());

        assert_eq!(limiter.prune_at(now + BLOCK_DURATION + Duration::from_secs(1)), 2);
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_many_addresses_do_not_grow_without_bound() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for i in 0..PRUNE_THRESHOLD {
            limiter.record_failure_at(&format!("10.1.{}.{}", i / 256, i % 256), now);
        }
        assert_eq!(limiter.tracked(), PRUNE_THRESHOLD);

        let later = now + FAILURE_WINDOW + Duration::from_secs(1);
        limiter.record_failure_at("10.2.0.1", later);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_forwarded_trust_is_opt_in() {
        assert!(!RateLimiter::new().trusts_forwarded());
        assert!(RateLimiter::behind_proxy().trusts_forwarded());
    }
}
