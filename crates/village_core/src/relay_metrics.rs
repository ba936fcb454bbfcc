/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Default)]
pub struct RelayMetrics {
    pub requests: AtomicU64,
    pub http_errors: AtomicU64,
    pub http_timeouts: AtomicU64,
    pub rtt_ema_ms: AtomicU64,

    pub tracks_published: AtomicU64,
    pub tracks_subscribed: AtomicU64,
    pub tracks_closed: AtomicU64,
    pub renegotiations: AtomicU64,

    last_error: Mutex<Option<String>>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn http_error(&self) {
        self.http_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn http_timeout(&self) {
        self.http_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_error(&self, err: String) {
        let mut g = self.last_error.lock().unwrap();
        *g = Some(err);
    }

    pub fn rtt_update(&self, ms: u64) {
        if ms == 0 {
            return;
        }
        let prev = self.rtt_ema_ms.load(Ordering::Relaxed);
        let next = if prev == 0 {
            ms
        } else {
            (prev.saturating_mul(7).saturating_add(ms)) / 8
        };
        self.rtt_ema_ms.store(next, Ordering::Relaxed);
    }

    pub fn tracks_published_add(&self, n: u64) {
        self.tracks_published.fetch_add(n, Ordering::Relaxed);
    }

    pub fn tracks_subscribed_add(&self, n: u64) {
        self.tracks_subscribed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn tracks_closed_add(&self, n: u64) {
        self.tracks_closed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn renegotiation(&self) {
        self.renegotiations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_json(&self) -> serde_json::Value {
        let last_error = self.last_error.lock().unwrap().clone();
        serde_json::json!({
            "ts_ms": now_ms(),
            "relay": {
                "requests": self.requests.load(Ordering::Relaxed),
                "rtt_ms": self.rtt_ema_ms.load(Ordering::Relaxed),
                "last_error": last_error,
            },
            "tracks": {
                "published": self.tracks_published.load(Ordering::Relaxed),
                "subscribed": self.tracks_subscribed.load(Ordering::Relaxed),
                "closed": self.tracks_closed.load(Ordering::Relaxed),
                "renegotiations": self.renegotiations.load(Ordering::Relaxed),
            },
            "errors": {
                "http_timeouts": self.http_timeouts.load(Ordering::Relaxed),
                "http_errors": self.http_errors.load(Ordering::Relaxed),
            },
        })
    }
}
