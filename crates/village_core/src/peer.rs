/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Peer client: one relay session and one peer connection per local
//! participant.
//!
//! Every operation that touches the connection or the relay is a job on a
//! [`JobQueue`], so offer/answer exchanges never interleave. Remote media is
//! matched to subscriptions through a `mid -> subscription` table consulted by
//! a single track handler installed on the connection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};
use village_protocol::{
    first_track_error, ClosedTrack, CloseTracksRequest, PeerTrack, RenegotiateRequest,
    SessionDescription, TrackObject, TracksRequest,
};

use crate::config::PeerConfig;
use crate::error::{PeerError, Result};
use crate::event_bus::{EventBus, ListenerId};
use crate::job_queue::{JobQueue, QueueError};
use crate::peer_events::{PeerEvent, PeerKey, PeerStream};
use crate::relay_api::RelayApi;
use crate::relay_metrics::RelayMetrics;
use crate::rtc::{Direction, MediaKind, RtcBackend, RtcConnection, SendPriority, TrackArrival};

type Conn<B> = <B as RtcBackend>::Connection;
type StreamOf<B> = <Conn<B> as RtcConnection>::Stream;
type LocalTrackOf<B> = <Conn<B> as RtcConnection>::LocalTrack;

struct PendingTrack {
    peer_key: PeerKey,
    session_id: Option<String>,
}

struct State<C: RtcConnection> {
    /// Set by `close()`; jobs still running must not write state back.
    closed: bool,
    session_id: Option<String>,
    pc: Option<Arc<C>>,
    remote_tracks: HashMap<PeerKey, Vec<TrackObject>>,
    /// Subscribed transceivers still waiting for media, by mid.
    pending: HashMap<String, PendingTrack>,
    streams: Vec<PeerStream<C::Stream>>,
}

impl<C: RtcConnection> Default for State<C> {
    fn default() -> Self {
        Self {
            closed: false,
            session_id: None,
            pc: None,
            remote_tracks: HashMap::new(),
            pending: HashMap::new(),
            streams: Vec::new(),
        }
    }
}

struct Inner<B: RtcBackend, R: RelayApi> {
    backend: B,
    relay: R,
    cfg: PeerConfig,
    metrics: Arc<RelayMetrics>,
    events: EventBus<PeerEvent, PeerStream<StreamOf<B>>>,
    state: Mutex<State<Conn<B>>>,
}

pub struct PeerClient<B: RtcBackend, R: RelayApi> {
    inner: Arc<Inner<B, R>>,
    jobs: Arc<JobQueue>,
}

impl<B: RtcBackend, R: RelayApi> Clone for PeerClient<B, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            jobs: self.jobs.clone(),
        }
    }
}

fn request_error(code: &Option<String>, description: &Option<String>) -> Option<String> {
    code.as_ref()?;
    description.clone().or_else(|| code.clone())
}

impl<B: RtcBackend, R: RelayApi> PeerClient<B, R> {
    /// Must be called inside a tokio runtime (the job worker is spawned here).
    pub fn new(backend: B, relay: R, cfg: PeerConfig) -> Self {
        Self::with_metrics(backend, relay, cfg, Arc::new(RelayMetrics::new()))
    }

    pub fn with_metrics(backend: B, relay: R, cfg: PeerConfig, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                relay,
                cfg,
                metrics,
                events: EventBus::new(),
                state: Mutex::new(State::default()),
            }),
            jobs: Arc::new(JobQueue::new()),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state().session_id.clone()
    }

    pub fn connection(&self) -> Option<Arc<Conn<B>>> {
        self.inner.state().pc.clone()
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.inner.metrics.clone()
    }

    pub fn events(&self) -> &EventBus<PeerEvent, PeerStream<StreamOf<B>>> {
        &self.inner.events
    }

    pub fn on<F>(&self, event: PeerEvent, listener: F) -> ListenerId
    where
        F: Fn(&PeerStream<StreamOf<B>>) + Send + Sync + 'static,
    {
        self.inner.events.on(event, listener)
    }

    pub fn off(&self, event: PeerEvent, listener: Option<ListenerId>) {
        self.inner.events.off(&event, listener)
    }

    /// Remote streams currently bound, in arrival order.
    pub fn streams(&self) -> Vec<PeerStream<StreamOf<B>>> {
        self.inner.state().streams.clone()
    }

    pub fn has_remote_tracks(&self, peer_key: &PeerKey) -> bool {
        self.inner.state().remote_tracks.contains_key(peer_key)
    }

    pub fn remote_tracks(&self, peer_key: &PeerKey) -> Option<Vec<TrackObject>> {
        self.inner.state().remote_tracks.get(peer_key).cloned()
    }

    /// Creates the relay session, or returns the existing one.
    pub fn create_session(&self) -> impl Future<Output = Result<String>> + Send {
        let inner = self.inner.clone();
        self.jobs
            .add_job(move || async move { inner.create_session().await })
    }

    /// Opens the peer connection, or returns the current one while it is open.
    pub fn create_peer_connection(&self) -> impl Future<Output = Result<Arc<Conn<B>>>> + Send {
        let inner = self.inner.clone();
        self.jobs
            .add_job(move || async move { inner.create_peer_connection().await })
    }

    /// Adds one send-only transceiver per track. Does not talk to the relay.
    pub fn add_local_tracks(
        &self,
        tracks: Vec<LocalTrackOf<B>>,
    ) -> impl Future<Output = Result<()>> + Send {
        let inner = self.inner.clone();
        self.jobs
            .add_job(move || async move { inner.add_local_tracks(tracks).await })
    }

    /// Swaps the sender of the same kind in place, e.g. after a microphone change.
    pub fn replace_track(&self, track: LocalTrackOf<B>) -> impl Future<Output = Result<()>> + Send {
        let inner = self.inner.clone();
        self.jobs
            .add_job(move || async move { inner.replace_track(track).await })
    }

    pub fn push_local_tracks(&self) -> impl Future<Output = Result<Vec<PeerTrack>>> + Send {
        let inner = self.inner.clone();
        self.jobs
            .add_job(move || async move { inner.push_local_tracks().await })
    }

    /// Subscribes to `tracks` of one remote participant. A no-op while tracks
    /// for `peer_key` are already subscribed.
    pub fn pull_remote_tracks(
        &self,
        peer_key: PeerKey,
        tracks: Vec<PeerTrack>,
    ) -> impl Future<Output = Result<()>> + Send {
        let inner = self.inner.clone();
        self.jobs
            .add_job(move || async move { inner.pull_remote_tracks(peer_key, tracks).await })
    }

    /// Unsubscribes from a participant. A no-op when nothing is subscribed.
    pub fn close_tracks(&self, peer_key: PeerKey) -> impl Future<Output = Result<()>> + Send {
        let inner = self.inner.clone();
        self.jobs
            .add_job(move || async move { inner.close_tracks(peer_key).await })
    }

    /// Tears the client down without waiting for queued jobs: those fail with
    /// [`crate::job_queue::QueueError::Closed`]. A job already running finishes
    /// against the closed connection without writing subscriptions or streams
    /// back.
    pub async fn close(&self) -> Result<()> {
        self.jobs.close();
        let pc = {
            let mut st = self.inner.state();
            st.closed = true;
            st.remote_tracks.clear();
            st.pending.clear();
            st.streams.clear();
            st.pc.clone()
        };
        if let Some(pc) = pc {
            pc.close().await.map_err(PeerError::Rtc)?;
        }
        info!(session_id = ?self.session_id(), "peer client closed");
        Ok(())
    }
}

impl<B: RtcBackend, R: RelayApi> Inner<B, R> {
    fn state(&self) -> MutexGuard<'_, State<Conn<B>>> {
        self.state.lock().unwrap()
    }

    fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn require_session(&self) -> Result<String> {
        self.state().session_id.clone().ok_or(PeerError::NoSession)
    }

    fn require_connection(&self) -> Result<Arc<Conn<B>>> {
        self.state().pc.clone().ok_or(PeerError::NoConnection)
    }

    async fn create_session(&self) -> Result<String> {
        let existing = self.state().session_id.clone();
        if let Some(id) = existing {
            debug!(session_id = %id, "relay session already created");
            return Ok(id);
        }

        let resp = self.relay.new_session().await.map_err(PeerError::Relay)?;
        if let Some(msg) = request_error(&resp.error_code, &resp.error_description) {
            return Err(PeerError::RelayRejected(msg));
        }
        let id = resp
            .session_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(PeerError::MissingSessionId)?;

        self.state().session_id = Some(id.clone());
        info!(session_id = %id, "relay session created");
        Ok(id)
    }

    async fn create_peer_connection(self: &Arc<Self>) -> Result<Arc<Conn<B>>> {
        let existing = self.state().pc.clone();
        if let Some(pc) = existing {
            if !pc.is_closed() {
                return Ok(pc);
            }
        }

        let settings = self.cfg.rtc_settings();
        let pc = self
            .backend
            .open(&settings)
            .await
            .map_err(PeerError::Rtc)?;
        let pc = Arc::new(pc);

        let weak = Arc::downgrade(self);
        pc.on_track(Arc::new(move |arrival: TrackArrival<StreamOf<B>>| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_track(arrival);
            }
        }));

        let closed = {
            let mut st = self.state();
            if !st.closed {
                st.pc = Some(pc.clone());
            }
            st.closed
        };
        if closed {
            debug!("client closed while opening; dropping new connection");
            pc.close().await.map_err(PeerError::Rtc)?;
            return Err(QueueError::Closed.into());
        }
        info!(ice_servers = settings.ice_servers.len(), "peer connection created");
        Ok(pc)
    }

    fn handle_track(&self, arrival: TrackArrival<StreamOf<B>>) {
        let Some(mid) = arrival.mid else {
            debug!(kind = %arrival.kind, "track without mid ignored");
            return;
        };
        let stream = {
            let mut st = self.state();
            if st.closed {
                return;
            }
            let Some(pending) = st.pending.remove(&mid) else {
                debug!(%mid, "track for unsubscribed mid ignored");
                return;
            };
            let stream = PeerStream::new(
                pending.peer_key,
                pending.session_id,
                Some(mid.clone()),
                arrival.kind,
                arrival.stream,
            );
            st.streams.push(stream.clone());
            stream
        };
        info!(peer = %stream.peer_key, %mid, kind = %stream.kind, "remote track bound");
        self.events.fire_event(&PeerEvent::Track, &stream);
    }

    async fn add_local_tracks(&self, tracks: Vec<LocalTrackOf<B>>) -> Result<()> {
        let pc = self.require_connection()?;
        for track in tracks {
            if pc.is_closed() {
                debug!("peer connection closed; local track not added");
                continue;
            }
            let kind = pc.local_track_kind(&track);
            pc.add_send_transceiver(track)
                .await
                .map_err(PeerError::Rtc)?;
            debug!(%kind, "send-only transceiver added");
        }
        Ok(())
    }

    async fn replace_track(&self, track: LocalTrackOf<B>) -> Result<()> {
        let pc = self.require_connection()?;
        if pc.is_closed() {
            debug!("peer connection closed; track not replaced");
            return Ok(());
        }
        let kind = pc.local_track_kind(&track);
        let replaced = pc
            .replace_sender_track(track)
            .await
            .map_err(PeerError::Rtc)?;
        if !replaced {
            return Err(PeerError::SenderNotFound(kind));
        }
        info!(%kind, "local track replaced");
        Ok(())
    }

    async fn push_local_tracks(&self) -> Result<Vec<PeerTrack>> {
        let session_id = self.require_session()?;
        let pc = self.require_connection()?;
        if pc.is_closed() {
            debug!("peer connection closed; nothing pushed");
            return Ok(Vec::new());
        }

        let offer = pc.create_offer().await.map_err(PeerError::Rtc)?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(PeerError::Rtc)?;

        let mut local = Vec::new();
        for t in pc.transceivers().await {
            let Some(sending) = t.sending else { continue };
            if matches!(t.direction, Direction::Inactive | Direction::Recvonly) {
                continue;
            }
            if sending.kind == MediaKind::Audio && self.cfg.prioritize_audio() {
                if let Some(mid) = t.mid.as_deref() {
                    if let Err(e) = pc.set_send_priority(mid, SendPriority::High).await {
                        warn!(%mid, "raising audio priority failed: {e:#}");
                    }
                }
            }
            local.push(TrackObject::local(t.mid, sending.id));
        }

        let req = TracksRequest {
            session_description: Some(offer),
            tracks: local,
        };
        let resp = self
            .relay
            .new_tracks(&session_id, &req)
            .await
            .map_err(PeerError::Relay)?;
        if let Some(msg) = request_error(&resp.error_code, &resp.error_description) {
            return Err(PeerError::RelayRejected(msg));
        }
        let published = resp.tracks.ok_or(PeerError::MissingTracks)?;
        if let Some(msg) = first_track_error(&published) {
            warn!(%session_id, "publish rejected: {msg}");
            return Err(PeerError::TrackRejected(msg));
        }
        if self.is_closed() {
            debug!(%session_id, "client closed during publish; answer dropped");
            return Ok(Vec::new());
        }
        if let Some(answer) = resp.session_description {
            pc.set_remote_description(answer)
                .await
                .map_err(PeerError::Rtc)?;
        }

        self.metrics.tracks_published_add(published.len() as u64);
        info!(%session_id, tracks = published.len(), "local tracks published");
        Ok(published
            .into_iter()
            .map(|t| PeerTrack {
                session_id: session_id.clone(),
                track_name: t.track_name,
                mid: t.mid,
            })
            .collect())
    }

    async fn pull_remote_tracks(&self, peer_key: PeerKey, remote: Vec<PeerTrack>) -> Result<()> {
        let subscribed = self.state().remote_tracks.contains_key(&peer_key);
        if subscribed {
            debug!(peer = %peer_key, "remote tracks already pulled");
            return Ok(());
        }
        let session_id = self.require_session()?;
        let pc = self.require_connection()?;
        if pc.is_closed() {
            debug!(peer = %peer_key, "peer connection closed; nothing pulled");
            return Ok(());
        }

        let req = TracksRequest {
            session_description: None,
            tracks: remote
                .iter()
                .map(|t| TrackObject::remote(t.session_id.clone(), t.track_name.clone()))
                .collect(),
        };
        let resp = self
            .relay
            .new_tracks(&session_id, &req)
            .await
            .map_err(PeerError::Relay)?;
        if let Some(msg) = request_error(&resp.error_code, &resp.error_description) {
            return Err(PeerError::RelayRejected(msg));
        }
        let Some(tracks) = resp.tracks else {
            warn!(peer = %peer_key, "relay pull reply has no tracks");
            return Ok(());
        };
        if let Some(msg) = first_track_error(&tracks) {
            warn!(peer = %peer_key, "pull rejected: {msg}");
            return Err(PeerError::TrackRejected(msg));
        }

        {
            let mut st = self.state();
            if st.closed {
                debug!(peer = %peer_key, "client closed during pull; nothing armed");
                return Ok(());
            }
            for t in &tracks {
                if let Some(mid) = &t.mid {
                    st.pending.insert(
                        mid.clone(),
                        PendingTrack {
                            peer_key: peer_key.clone(),
                            session_id: t.session_id.clone(),
                        },
                    );
                }
            }
            st.remote_tracks.insert(peer_key.clone(), tracks.clone());
        }
        self.metrics.tracks_subscribed_add(tracks.len() as u64);
        info!(peer = %peer_key, tracks = tracks.len(), "remote tracks pulled");

        if resp.requires_immediate_renegotiation {
            let renegotiated = match resp.session_description {
                Some(offer) => self.renegotiate(&session_id, &pc, offer).await,
                None => Err(PeerError::MissingSessionDescription),
            };
            if let Err(e) = renegotiated {
                // Forget the subscription so a retry is not swallowed as a duplicate.
                self.forget_peer(&peer_key);
                return Err(e);
            }
        }
        Ok(())
    }

    fn forget_peer(&self, peer_key: &PeerKey) {
        let mut st = self.state();
        st.remote_tracks.remove(peer_key);
        st.pending.retain(|_, p| &p.peer_key != peer_key);
    }

    async fn renegotiate(
        &self,
        session_id: &str,
        pc: &Conn<B>,
        offer: SessionDescription,
    ) -> Result<()> {
        pc.set_remote_description(offer)
            .await
            .map_err(PeerError::Rtc)?;
        let answer = pc.create_answer().await.map_err(PeerError::Rtc)?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(PeerError::Rtc)?;

        let req = RenegotiateRequest {
            session_description: answer,
        };
        let resp = self
            .relay
            .renegotiate(session_id, &req)
            .await
            .map_err(PeerError::Relay)?;
        if let Some(msg) = request_error(&resp.error_code, &resp.error_description) {
            return Err(PeerError::RelayRejected(msg));
        }
        self.metrics.renegotiation();
        debug!(%session_id, "renegotiated");
        Ok(())
    }

    async fn close_tracks(&self, peer_key: PeerKey) -> Result<()> {
        let (tracks, removed) = {
            let mut st = self.state();
            let Some(tracks) = st.remote_tracks.remove(&peer_key) else {
                debug!(peer = %peer_key, "no tracks to close");
                return Ok(());
            };
            st.pending.retain(|_, p| p.peer_key != peer_key);
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut st.streams)
                .into_iter()
                .partition(|s| s.peer_key == peer_key);
            st.streams = kept;
            (tracks, removed)
        };

        // Listeners run last: a panicking one must not keep the relay from
        // learning about the close.
        let closed = self.close_on_relay(&peer_key, &tracks).await;
        for stream in &removed {
            self.events.fire_event(&PeerEvent::RemoveTrack, stream);
        }
        let n = closed?;
        info!(peer = %peer_key, tracks = n, streams = removed.len(), "remote tracks closed");
        Ok(())
    }

    /// Marks the transceivers of `tracks` inactive and tells the relay.
    /// Returns how many tracks were closed there.
    async fn close_on_relay(&self, peer_key: &PeerKey, tracks: &[TrackObject]) -> Result<usize> {
        let mids: Vec<String> = tracks.iter().filter_map(|t| t.mid.clone()).collect();
        if mids.is_empty() {
            return Ok(0);
        }
        let pc = self.require_connection()?;
        if pc.is_closed() {
            debug!(peer = %peer_key, "peer connection closed; skipping relay close");
            return Ok(0);
        }
        let session_id = self.require_session()?;

        let mut closed = Vec::new();
        for mid in mids {
            let found = pc
                .set_direction(&mid, Direction::Inactive)
                .await
                .map_err(PeerError::Rtc)?;
            if found {
                closed.push(ClosedTrack { mid });
            }
        }
        if closed.is_empty() {
            debug!(peer = %peer_key, "no transceivers matched closed tracks");
            return Ok(0);
        }

        let offer = pc.create_offer().await.map_err(PeerError::Rtc)?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(PeerError::Rtc)?;

        let n = closed.len();
        let req = CloseTracksRequest {
            session_description: offer,
            tracks: closed,
            force: false,
        };
        let resp = self
            .relay
            .close_tracks(&session_id, &req)
            .await
            .map_err(PeerError::Relay)?;
        if let Some(msg) = request_error(&resp.error_code, &resp.error_description) {
            return Err(PeerError::RelayRejected(msg));
        }
        if let Some(answer) = resp.session_description {
            if self.is_closed() {
                debug!(peer = %peer_key, "client closed during close; answer dropped");
                return Ok(n);
            }
            pc.set_remote_description(answer)
                .await
                .map_err(PeerError::Rtc)?;
        }

        self.metrics.tracks_closed_add(n as u64);
        Ok(n)
    }
}
