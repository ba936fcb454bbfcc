/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod config;
pub mod error;
pub mod event_bus;
pub mod http_retry;
pub mod job_queue;
pub mod peer;
pub mod peer_events;
pub mod relay_api;
pub mod relay_metrics;
pub mod rtc;
pub mod webrtc_backend;

pub use error::PeerError;
pub use peer::PeerClient;
pub use village_protocol as protocol;

pub fn village_core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
