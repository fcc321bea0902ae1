//! Rate Limiting for registry writes
//!
//! Limits register/unregister requests per client IP with a fixed one-minute
//! window. Clients that keep exceeding the limit are banned for a while.

use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, warn};

use crate::types::{current_timestamp, Timestamp};

/// Window size in seconds
const WINDOW_SECS: u64 = 60;

/// Rate limiter keyed by client IP
pub struct RateLimiter {
    /// Request counts per IP
    entries: HashMap<IpAddr, WindowEntry>,

    /// Maximum requests per window
    max_per_window: u32,

    /// Violations before ban
    max_violations: u32,

    /// Ban duration in seconds
    ban_duration: u64,
}

/// Per-IP tracking
struct WindowEntry {
    request_count: u32,
    window_start: Timestamp,
    violations: u32,
    ban_until: Option<Timestamp>,
}

impl WindowEntry {
    fn new(now: Timestamp) -> Self {
        Self {
            request_count: 0,
            window_start: now,
            violations: 0,
            ban_until: None,
        }
    }

    fn is_banned(&self, now: Timestamp) -> bool {
        self.ban_until.map(|t| now < t).unwrap_or(false)
    }
}

impl RateLimiter {
    pub fn new(max_per_minute: u32, max_violations: u32, ban_duration: u64) -> Self {
        Self {
            entries: HashMap::new(),
            max_per_window: max_per_minute,
            max_violations,
            ban_duration,
        }
    }

    /// Returns true if a request from `ip` is allowed now
    pub fn check(&mut self, ip: IpAddr) -> bool {
        self.check_at(ip, current_timestamp())
    }

    pub fn check_at(&mut self, ip: IpAddr, now: Timestamp) -> bool {
        let entry = self.entries.entry(ip).or_insert_with(|| WindowEntry::new(now));

        if let Some(ban_until) = entry.ban_until {
            if now < ban_until {
                debug!("IP {} is banned until {}", ip, ban_until);
                return false;
            }
            entry.ban_until = None;
            entry.violations = 0;
        }

        if now >= entry.window_start + WINDOW_SECS {
            entry.window_start = now;
            entry.request_count = 0;
        }

        entry.request_count += 1;

        if entry.request_count <= self.max_per_window {
            return true;
        }

        // Only the first excess request of a window counts as a violation
        if entry.request_count == self.max_per_window + 1 {
            entry.violations += 1;
            warn!(
                "Rate limit exceeded for {}: violation #{}",
                ip, entry.violations
            );

            if entry.violations >= self.max_violations {
                entry.ban_until = Some(now + self.ban_duration);
                warn!("IP {} banned for {} seconds", ip, self.ban_duration);
            }
        }

        false
    }

    pub fn is_banned_at(&self, ip: &IpAddr, now: Timestamp) -> bool {
        self.entries
            .get(ip)
            .map(|e| e.is_banned(now))
            .unwrap_or(false)
    }

    /// Get number of tracked IPs
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop idle, unbanned entries
    pub fn cleanup(&mut self) -> usize {
        self.cleanup_at(current_timestamp())
    }

    pub fn cleanup_at(&mut self, now: Timestamp) -> usize {
        let before = self.entries.len();
        let threshold = now.saturating_sub(WINDOW_SECS * 10);

        self.entries
            .retain(|_, entry| entry.is_banned(now) || entry.window_start > threshold);

        before - self.entries.len()
    }
}
