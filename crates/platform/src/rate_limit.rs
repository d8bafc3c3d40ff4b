//! Fixed-window submit rate limiter backed by DashMap.
//!
//! Each key holds a `count` and the instant its window ends. The limiter is
//! an ordinary value: hosts create one and share it behind an `Arc`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use retention_core::config::RateLimitPolicy;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Per-key window counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Result returned by `check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub limit: u32,
}

/// In-memory rate limiter keyed by caller-chosen identifiers such as
/// `discount_{user_id}`.
#[derive(Default)]
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check (and consume) one attempt against `policy` for `key`.
    pub fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitResult {
        self.check_at(key, policy, Utc::now())
    }

    /// `check` with an explicit clock.
    pub fn check_at(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> RateLimitResult {
        let limit = policy.max_requests;
        let window = policy.window();

        // A finished window is dropped before counting.
        self.entries.remove_if(key, |_, entry| now > entry.reset_at);

        match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                if limit == 0 {
                    return RateLimitResult {
                        allowed: false,
                        remaining: 0,
                        reset_at: now + window,
                        limit,
                    };
                }
                let entry = vacant.insert(RateLimitEntry {
                    count: 1,
                    reset_at: now + window,
                });
                RateLimitResult {
                    allowed: true,
                    remaining: limit - 1,
                    reset_at: entry.reset_at,
                    limit,
                }
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.count >= limit {
                    debug!(key, count = entry.count, limit, "Rate limit exceeded");
                    metrics::counter!("retention.rate_limit.denied").increment(1);
                    return RateLimitResult {
                        allowed: false,
                        remaining: 0,
                        reset_at: entry.reset_at,
                        limit,
                    };
                }
                entry.count += 1;
                RateLimitResult {
                    allowed: true,
                    remaining: limit - entry.count,
                    reset_at: entry.reset_at,
                    limit,
                }
            }
        }
    }

    /// Read current usage for a key (if any).
    pub fn get_usage(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Drop every entry whose window has ended. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now <= entry.reset_at);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runs `sweep_expired` every `interval` until the returned task is aborted.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, interval: StdDuration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = limiter.sweep_expired();
            if removed > 0 {
                info!(removed, remaining = limiter.len(), "Swept expired rate-limit entries");
            }
        }
    })
}
