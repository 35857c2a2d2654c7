// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rate limiting, update deduplication, and the graceful-shutdown gate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cc_bridge_core::now_secs;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

/// Sliding-window rate limiter, keyed by sender id (the chat id).
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<HashMap<i64, Vec<f64>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self { max_requests, window, timestamps: Mutex::new(HashMap::new()) }
    }

    /// Prune timestamps outside the window, then allow if the remaining
    /// count is under the limit, appending the new timestamp on success.
    pub async fn is_allowed(&self, sender: i64) -> bool {
        let now = now_secs();
        let window_secs = self.window.as_secs_f64();
        let mut timestamps = self.timestamps.lock().await;
        let entry = timestamps.entry(sender).or_default();
        entry.retain(|ts| now - ts < window_secs);

        if entry.len() < self.max_requests {
            entry.push(now);
            true
        } else {
            false
        }
    }

    /// Seconds until the oldest surviving timestamp ages out of the
    /// window, or 0 if the sender has no recorded requests.
    pub async fn retry_after(&self, sender: i64) -> u64 {
        let now = now_secs();
        let timestamps = self.timestamps.lock().await;
        let Some(entry) = timestamps.get(&sender) else { return 0 };
        let Some(oldest) = entry.iter().copied().reduce(f64::min) else { return 0 };
        let remaining = oldest + self.window.as_secs_f64() - now;
        remaining.max(0.0) as u64
    }
}

/// Bounded, TTL'd set of seen update ids, used to collapse duplicate
/// webhook deliveries from the chat platform's at-least-once retry policy.
pub struct Deduplicator {
    capacity: usize,
    ttl: Duration,
    seen: Mutex<HashMap<i64, f64>>,
}

impl Deduplicator {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { capacity, ttl, seen: Mutex::new(HashMap::new()) }
    }

    /// Returns `true` if `update_id` was already recorded (within TTL);
    /// records it as seen either way when it was not already present.
    pub async fn is_processed(&self, update_id: i64) -> bool {
        let now = now_secs();
        let ttl_secs = self.ttl.as_secs_f64();
        let mut seen = self.seen.lock().await;

        seen.retain(|_, first_seen| now - *first_seen < ttl_secs);

        if seen.contains_key(&update_id) {
            return true;
        }

        if seen.len() >= self.capacity {
            if let Some((&oldest_id, _)) = seen.iter().min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal)) {
                seen.remove(&oldest_id);
            }
        }

        seen.insert(update_id, now);
        false
    }

    /// Sweep expired entries independent of insertion. Resolves the Open
    /// Question about TTL surviving past expiry during quiet periods
    /// (SPEC_FULL.md §4.7).
    pub async fn sweep(&self) {
        let now = now_secs();
        let ttl_secs = self.ttl.as_secs_f64();
        self.seen.lock().await.retain(|_, first_seen| now - *first_seen < ttl_secs);
    }
}

/// Spawn the background TTL sweeper for a deduplicator.
pub fn spawn_dedup_sweeper(dedup: Arc<Deduplicator>, interval: Duration, shutdown: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => dedup.sweep().await,
            }
        }
    });
}

/// Tracks in-flight webhook requests and coordinates a graceful drain on
/// shutdown. The middleware layer increments/decrements around every
/// request; `wait_for_shutdown` blocks until the count reaches zero or a
/// timeout elapses.
pub struct ShutdownGate {
    pending: AtomicI64,
    shutting_down: std::sync::atomic::AtomicBool,
    notify: Notify,
}

impl ShutdownGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { pending: AtomicI64::new(0), shutting_down: std::sync::atomic::AtomicBool::new(false), notify: Notify::new() })
    }

    pub fn increment(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) <= 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn pending_requests(&self) -> i64 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Wait for the in-flight counter to reach zero, logging progress
    /// every 5 seconds, bailing out once `timeout` elapses.
    pub async fn wait_for_shutdown(&self, timeout: Duration) {
        self.begin_shutdown();
        let start = tokio::time::Instant::now();
        let mut last_log = start;

        while self.pending_requests() > 0 {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!(pending = self.pending_requests(), timeout_secs = timeout.as_secs(), "shutdown timeout reached");
                return;
            }
            if last_log.elapsed() >= Duration::from_secs(5) {
                info!(pending = self.pending_requests(), elapsed_secs = elapsed.as_secs_f64(), "waiting for pending requests");
                last_log = tokio::time::Instant::now();
            }

            let remaining = timeout.saturating_sub(elapsed);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(remaining.min(Duration::from_millis(100))) => {}
            }
        }

        info!(pending = self.pending_requests(), "shutdown complete");
    }
}
