/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::job_queue::QueueError;
use crate::rtc::MediaKind;

pub type Result<T> = std::result::Result<T, PeerError>;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("session id not found")]
    NoSession,

    #[error("peer connection not found")]
    NoConnection,

    #[error("relay returned no session id")]
    MissingSessionId,

    #[error("relay returned no tracks")]
    MissingTracks,

    #[error("relay returned no session description")]
    MissingSessionDescription,

    /// Per-track failure reported by the relay; carries the description verbatim.
    #[error("{0}")]
    TrackRejected(String),

    /// Request-level failure reported in the relay's error fields.
    #[error("relay rejected request: {0}")]
    RelayRejected(String),

    #[error("no sender with a {0} track")]
    SenderNotFound(MediaKind),

    #[error("relay request failed: {0:#}")]
    Relay(anyhow::Error),

    #[error("rtc: {0:#}")]
    Rtc(anyhow::Error),
}

impl PeerError {
    /// True when the job never ran because the client was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, PeerError::Queue(QueueError::Closed))
    }
}
