/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use village_core::config::PeerConfig;
use village_core::protocol::{
    CloseTracksRequest, CloseTracksResponse, NewSessionResponse, RenegotiateRequest,
    RenegotiateResponse, SdpType, SessionDescription, TrackObject, TracksRequest, TracksResponse,
};
use village_core::relay_api::RelayApi;
use village_core::rtc::{
    Direction, MediaKind, RtcBackend, RtcConnection, RtcSettings, SendPriority, SendingTrack,
    TrackArrival, TrackHandler, TransceiverInfo,
};
use village_core::PeerClient;

pub type TestClient = PeerClient<MockBackend, MockRelay>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockTrack {
    pub id: String,
    pub kind: MediaKind,
}

impl MockTrack {
    pub fn audio(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: MediaKind::Audio,
        }
    }

    pub fn video(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: MediaKind::Video,
        }
    }
}

#[derive(Clone)]
struct MockTransceiver {
    mid: String,
    direction: Direction,
    sending: Option<MockTrack>,
}

#[derive(Default)]
struct ConnState {
    closed: bool,
    transceivers: Vec<MockTransceiver>,
    ops: Vec<String>,
    priorities: Vec<(String, SendPriority)>,
    handler: Option<TrackHandler<String>>,
}

/// In-memory connection. Remote offers are written as `mids:<a>,<b>` and
/// create one receive-only transceiver per listed mid.
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<ConnState>>,
}

fn sdp_name(t: SdpType) -> &'static str {
    match t {
        SdpType::Offer => "offer",
        SdpType::Answer => "answer",
        SdpType::Pranswer => "pranswer",
        SdpType::Rollback => "rollback",
    }
}

fn direction_name(d: Direction) -> &'static str {
    match d {
        Direction::Sendrecv => "sendrecv",
        Direction::Sendonly => "sendonly",
        Direction::Recvonly => "recvonly",
        Direction::Inactive => "inactive",
    }
}

impl MockConnection {
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().unwrap().ops.clear();
    }

    pub fn priorities(&self) -> Vec<(String, SendPriority)> {
        self.state.lock().unwrap().priorities.clone()
    }

    pub fn direction_of(&self, mid: &str) -> Option<Direction> {
        self.state
            .lock()
            .unwrap()
            .transceivers
            .iter()
            .find(|t| t.mid == mid)
            .map(|t| t.direction)
    }

    pub fn sending_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .transceivers
            .iter()
            .filter_map(|t| t.sending.as_ref().map(|s| s.id.clone()))
            .collect()
    }

    pub fn transceiver_count(&self) -> usize {
        self.state.lock().unwrap().transceivers.len()
    }

    /// Simulates the connection being closed outside the client.
    pub fn close_externally(&self) {
        self.state.lock().unwrap().closed = true;
    }

    /// Delivers remote media on `mid` through the installed track handler.
    pub fn emit_track(&self, mid: &str, kind: MediaKind, stream: &str) {
        let handler = self.state.lock().unwrap().handler.clone();
        if let Some(handler) = handler {
            handler(TrackArrival {
                mid: Some(mid.to_string()),
                kind,
                stream: stream.to_string(),
            });
        }
    }

    fn log(&self, op: String) {
        self.state.lock().unwrap().ops.push(op);
    }
}

#[async_trait]
impl RtcConnection for MockConnection {
    type LocalTrack = MockTrack;
    type Stream = String;

    fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    async fn add_send_transceiver(&self, track: MockTrack) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        let mid = st.transceivers.len().to_string();
        st.ops.push(format!("add_transceiver:{}", track.id));
        st.transceivers.push(MockTransceiver {
            mid,
            direction: Direction::Sendonly,
            sending: Some(track),
        });
        Ok(())
    }

    async fn replace_sender_track(&self, track: MockTrack) -> Result<bool> {
        let mut st = self.state.lock().unwrap();
        let found = st
            .transceivers
            .iter_mut()
            .find(|t| t.sending.as_ref().map(|s| s.kind) == Some(track.kind));
        match found {
            Some(t) => {
                t.sending = Some(track);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn local_track_kind(&self, track: &MockTrack) -> MediaKind {
        track.kind
    }

    async fn transceivers(&self) -> Vec<TransceiverInfo> {
        self.state
            .lock()
            .unwrap()
            .transceivers
            .iter()
            .map(|t| TransceiverInfo {
                mid: Some(t.mid.clone()),
                direction: t.direction,
                sending: t.sending.as_ref().map(|s| SendingTrack {
                    id: s.id.clone(),
                    kind: s.kind,
                }),
            })
            .collect()
    }

    async fn set_direction(&self, mid: &str, direction: Direction) -> Result<bool> {
        let mut st = self.state.lock().unwrap();
        let Some(t) = st.transceivers.iter_mut().find(|t| t.mid == mid) else {
            return Ok(false);
        };
        t.direction = direction;
        st.ops
            .push(format!("set_direction:{mid}:{}", direction_name(direction)));
        Ok(true)
    }

    async fn set_send_priority(&self, mid: &str, priority: SendPriority) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .priorities
            .push((mid.to_string(), priority));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.log("create_offer".into());
        Ok(SessionDescription::offer("local-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.log("create_answer".into());
        Ok(SessionDescription::answer("local-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.log(format!("set_local:{}", sdp_name(desc.sdp_type)));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.ops.push(format!("set_remote:{}", sdp_name(desc.sdp_type)));
        if desc.sdp_type == SdpType::Offer {
            if let Some(list) = desc.sdp.strip_prefix("mids:") {
                for mid in list.split(',').filter(|m| !m.is_empty()) {
                    if st.transceivers.iter().all(|t| t.mid != mid) {
                        st.transceivers.push(MockTransceiver {
                            mid: mid.to_string(),
                            direction: Direction::Recvonly,
                            sending: None,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn on_track(&self, handler: TrackHandler<String>) {
        self.state.lock().unwrap().handler = Some(handler);
    }

    async fn close(&self) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.closed = true;
        st.ops.push("close".into());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MockBackend {
    opened: Arc<Mutex<Vec<MockConnection>>>,
}

impl MockBackend {
    pub fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn last(&self) -> MockConnection {
        self.opened
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connection opened")
    }
}

#[async_trait]
impl RtcBackend for MockBackend {
    type Connection = MockConnection;

    async fn open(&self, _settings: &RtcSettings) -> Result<MockConnection> {
        let conn = MockConnection::default();
        self.opened.lock().unwrap().push(conn.clone());
        Ok(conn)
    }
}

#[derive(Clone, Debug)]
pub enum RelayCall {
    NewSession,
    NewTracks {
        session_id: String,
        req: TracksRequest,
    },
    Renegotiate {
        session_id: String,
        req: RenegotiateRequest,
    },
    CloseTracks {
        session_id: String,
        req: CloseTracksRequest,
    },
}

struct RelayState {
    calls: Mutex<Vec<RelayCall>>,
    session_id: Mutex<Option<String>>,
    tracks_replies: Mutex<VecDeque<TracksResponse>>,
    renegotiate_error: Mutex<Option<String>>,
    next_mid: AtomicUsize,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Scripted relay. Unless a reply is queued, `tracks/new` echoes publishes
/// with an answer and answers pulls with fresh mids plus a renegotiation
/// offer naming them.
#[derive(Clone)]
pub struct MockRelay {
    state: Arc<RelayState>,
}

impl Default for MockRelay {
    fn default() -> Self {
        Self {
            state: Arc::new(RelayState {
                calls: Mutex::new(Vec::new()),
                session_id: Mutex::new(Some("sess-local".to_string())),
                tracks_replies: Mutex::new(VecDeque::new()),
                renegotiate_error: Mutex::new(None),
                next_mid: AtomicUsize::new(100),
                delay: Mutex::new(Duration::ZERO),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }
}

impl MockRelay {
    pub fn set_session_id(&self, id: Option<&str>) {
        *self.state.session_id.lock().unwrap() = id.map(str::to_string);
    }

    pub fn set_first_pull_mid(&self, mid: usize) {
        self.state.next_mid.store(mid, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    pub fn fail_renegotiate(&self, description: Option<&str>) {
        *self.state.renegotiate_error.lock().unwrap() = description.map(str::to_string);
    }

    /// Next `tracks/new` call gets `reply` instead of the echo.
    pub fn queue_tracks_reply(&self, reply: TracksResponse) {
        self.state.tracks_replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<RelayCall> {
        self.state.calls.lock().unwrap().clone()
    }

    /// `tracks/new` calls without an offer, i.e. subscriptions.
    pub fn pull_requests(&self) -> Vec<TracksRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RelayCall::NewTracks { req, .. } if req.session_description.is_none() => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn close_requests(&self) -> Vec<CloseTracksRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RelayCall::CloseTracks { req, .. } => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: RelayCall) {
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.state.calls.lock().unwrap().push(call);
        let delay = *self.state.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn echo(&self, req: &TracksRequest) -> TracksResponse {
        if req.session_description.is_some() {
            return TracksResponse {
                session_description: Some(SessionDescription::answer("relay-answer")),
                tracks: Some(
                    req.tracks
                        .iter()
                        .map(|t| TrackObject {
                            mid: t.mid.clone(),
                            track_name: t.track_name.clone(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            };
        }
        let mut mids = Vec::new();
        let tracks = req
            .tracks
            .iter()
            .map(|t| {
                let mid = self.state.next_mid.fetch_add(1, Ordering::SeqCst).to_string();
                mids.push(mid.clone());
                TrackObject {
                    mid: Some(mid),
                    session_id: t.session_id.clone(),
                    track_name: t.track_name.clone(),
                    ..Default::default()
                }
            })
            .collect();
        TracksResponse {
            session_description: Some(SessionDescription::offer(format!("mids:{}", mids.join(",")))),
            requires_immediate_renegotiation: true,
            tracks: Some(tracks),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RelayApi for MockRelay {
    async fn new_session(&self) -> Result<NewSessionResponse> {
        self.enter(RelayCall::NewSession).await;
        self.leave();
        Ok(NewSessionResponse {
            session_id: self.state.session_id.lock().unwrap().clone(),
            ..Default::default()
        })
    }

    async fn new_tracks(&self, session_id: &str, req: &TracksRequest) -> Result<TracksResponse> {
        self.enter(RelayCall::NewTracks {
            session_id: session_id.to_string(),
            req: req.clone(),
        })
        .await;
        let queued = self.state.tracks_replies.lock().unwrap().pop_front();
        let reply = queued.unwrap_or_else(|| self.echo(req));
        self.leave();
        Ok(reply)
    }

    async fn renegotiate(
        &self,
        session_id: &str,
        req: &RenegotiateRequest,
    ) -> Result<RenegotiateResponse> {
        self.enter(RelayCall::Renegotiate {
            session_id: session_id.to_string(),
            req: req.clone(),
        })
        .await;
        self.leave();
        let err = self.state.renegotiate_error.lock().unwrap().clone();
        Ok(RenegotiateResponse {
            error_code: err.as_ref().map(|_| "renegotiate_failed".to_string()),
            error_description: err,
        })
    }

    async fn close_tracks(
        &self,
        session_id: &str,
        req: &CloseTracksRequest,
    ) -> Result<CloseTracksResponse> {
        self.enter(RelayCall::CloseTracks {
            session_id: session_id.to_string(),
            req: req.clone(),
        })
        .await;
        self.leave();
        if req.tracks.is_empty() {
            return Err(anyhow!("close without tracks"));
        }
        Ok(CloseTracksResponse {
            session_description: Some(SessionDescription::answer("relay-close-answer")),
            ..Default::default()
        })
    }
}

/// Client with a session and an open connection.
pub async fn connected(relay: &MockRelay) -> (TestClient, MockBackend, MockConnection) {
    let backend = MockBackend::default();
    let client = PeerClient::new(backend.clone(), relay.clone(), PeerConfig::default());
    client.create_session().await.expect("session");
    client.create_peer_connection().await.expect("connection");
    let conn = backend.last();
    (client, backend, conn)
}
