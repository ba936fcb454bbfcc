/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The slice of a WebRTC peer connection the peer client drives.
//!
//! [`crate::webrtc_backend`] implements it on top of webrtc-rs; tests plug in
//! an in-memory connection.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use village_protocol::SessionDescription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sendrecv,
    Sendonly,
    Recvonly,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPriority {
    Low,
    Medium,
    High,
}

/// Local track currently attached to a transceiver's sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendingTrack {
    pub id: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransceiverInfo {
    pub mid: Option<String>,
    pub direction: Direction,
    pub sending: Option<SendingTrack>,
}

/// Remote media that started flowing on a transceiver.
#[derive(Debug, Clone)]
pub struct TrackArrival<S> {
    pub mid: Option<String>,
    pub kind: MediaKind,
    pub stream: S,
}

pub type TrackHandler<S> = Arc<dyn Fn(TrackArrival<S>) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcSettings {
    pub ice_servers: Vec<IceServer>,
    /// Bundle every m-line onto one transport.
    pub max_bundle: bool,
}

#[async_trait]
pub trait RtcConnection: Send + Sync + 'static {
    type LocalTrack: Clone + Send + Sync + 'static;
    type Stream: Clone + Send + Sync + 'static;

    fn is_closed(&self) -> bool;

    async fn add_send_transceiver(&self, track: Self::LocalTrack) -> Result<()>;

    /// Swaps the track of the sender whose current track has the same kind.
    /// Returns `false` when no such sender exists.
    async fn replace_sender_track(&self, track: Self::LocalTrack) -> Result<bool>;

    fn local_track_kind(&self, track: &Self::LocalTrack) -> MediaKind;

    async fn transceivers(&self) -> Vec<TransceiverInfo>;

    /// Sets the direction of the transceiver bound to `mid`. Returns `false`
    /// when no transceiver has that mid.
    async fn set_direction(&self, mid: &str, direction: Direction) -> Result<bool>;

    async fn set_send_priority(&self, mid: &str, priority: SendPriority) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Installs the single handler receiving every incoming track.
    fn on_track(&self, handler: TrackHandler<Self::Stream>);

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait RtcBackend: Send + Sync + 'static {
    type Connection: RtcConnection;

    async fn open(&self, settings: &RtcSettings) -> Result<Self::Connection>;
}
