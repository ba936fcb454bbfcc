/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use rand::{thread_rng, Rng};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::relay_metrics::RelayMetrics;

const BACKOFF_START: Duration = Duration::from_millis(200);
const BACKOFF_CAP: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: u32 = 5;

struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self { next: BACKOFF_START }
    }

    async fn wait(&mut self) {
        let jitter = Duration::from_millis(thread_rng().gen_range(0..=200));
        tokio::time::sleep(self.next + jitter).await;
        self.next = self.next.saturating_mul(2).min(BACKOFF_CAP);
    }
}

/// Sends the request built by `build`, retrying transport failures and
/// 429/5xx replies up to `attempts` times. With `attempts == 1` the request
/// is sent exactly once and any reply is returned as-is.
pub async fn send_with_retry<F>(mut build: F, attempts: u32, metrics: &RelayMetrics) -> Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    let attempts = attempts.clamp(1, MAX_ATTEMPTS);
    let mut backoff = Backoff::new();
    let mut attempt = 1;
    loop {
        metrics.request();
        let started = Instant::now();
        let last = attempt >= attempts;
        match build().send().await {
            Ok(resp) => {
                metrics.rtt_update(started.elapsed().as_millis() as u64);
                if !is_retryable(resp.status()) {
                    return Ok(resp);
                }
                metrics.http_error();
                if last {
                    return Ok(resp);
                }
                debug!(status = %resp.status(), attempt, "relay busy, retrying");
            }
            Err(e) => {
                if e.is_timeout() {
                    metrics.http_timeout();
                } else {
                    metrics.http_error();
                }
                if last {
                    return Err(e.into());
                }
                debug!(error = %e, attempt, "relay request failed, retrying");
            }
        }
        backoff.wait().await;
        attempt += 1;
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
