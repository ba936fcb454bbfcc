/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::fmt;

use crate::rtc::MediaKind;

fn now_ms_u64() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Opaque key grouping one remote participant's tracks. The integrating layer
/// picks it (relay session id, user id, ...); the client only relies on it
/// being unique per participant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey(String);

impl PeerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerEvent {
    /// Remote media bound to a subscribed transceiver.
    Track,
    /// A participant's tracks were closed.
    RemoveTrack,
}

impl PeerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PeerEvent::Track => "track",
            PeerEvent::RemoveTrack => "removeTrack",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PeerStream<S> {
    pub peer_key: PeerKey,
    /// Relay session that published the track.
    pub session_id: Option<String>,
    pub mid: Option<String>,
    pub kind: MediaKind,
    pub stream: S,
    pub ts_ms: u64,
}

impl<S> PeerStream<S> {
    pub fn new(
        peer_key: PeerKey,
        session_id: Option<String>,
        mid: Option<String>,
        kind: MediaKind,
        stream: S,
    ) -> Self {
        Self {
            peer_key,
            session_id,
            mid,
            kind,
            stream,
            ts_ms: now_ms_u64(),
        }
    }
}
