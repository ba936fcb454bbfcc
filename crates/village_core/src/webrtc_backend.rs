/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::debug;
use village_protocol::{SdpType, SessionDescription};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::rtc::{
    Direction, MediaKind, RtcBackend, RtcConnection, RtcSettings, SendPriority, SendingTrack,
    TrackArrival, TrackHandler, TransceiverInfo,
};

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Incoming media as handed to `track` listeners.
#[derive(Clone)]
pub struct RemoteMedia {
    pub stream_id: String,
    pub track: Arc<TrackRemote>,
}

#[derive(Clone, Copy, Default)]
pub struct WebrtcBackend;

pub struct WebrtcConnection {
    pc: Arc<RTCPeerConnection>,
}

fn build_ice_servers(settings: &RtcSettings) -> Vec<RTCIceServer> {
    settings
        .ice_servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn media_kind(kind: RTPCodecType) -> MediaKind {
    match kind {
        RTPCodecType::Video => MediaKind::Video,
        _ => MediaKind::Audio,
    }
}

fn direction_from_rtc(d: RTCRtpTransceiverDirection) -> Direction {
    match d {
        RTCRtpTransceiverDirection::Sendonly => Direction::Sendonly,
        RTCRtpTransceiverDirection::Recvonly => Direction::Recvonly,
        RTCRtpTransceiverDirection::Inactive => Direction::Inactive,
        _ => Direction::Sendrecv,
    }
}

fn direction_to_rtc(d: Direction) -> RTCRtpTransceiverDirection {
    match d {
        Direction::Sendrecv => RTCRtpTransceiverDirection::Sendrecv,
        Direction::Sendonly => RTCRtpTransceiverDirection::Sendonly,
        Direction::Recvonly => RTCRtpTransceiverDirection::Recvonly,
        Direction::Inactive => RTCRtpTransceiverDirection::Inactive,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => return Err(anyhow!("rollback descriptions are not supported")),
    };
    parsed.context("parse session description")
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => return Err(anyhow!("unspecified sdp type")),
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

#[async_trait]
impl RtcBackend for WebrtcBackend {
    type Connection = WebrtcConnection;

    async fn open(&self, settings: &RtcSettings) -> Result<WebrtcConnection> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .context("register default codecs")?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .context("register default interceptors")?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let bundle_policy = if settings.max_bundle {
            RTCBundlePolicy::MaxBundle
        } else {
            RTCBundlePolicy::Balanced
        };
        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers: build_ice_servers(settings),
                bundle_policy,
                ..Default::default()
            })
            .await
            .context("new peer connection")?;
        Ok(WebrtcConnection { pc: Arc::new(pc) })
    }
}

#[async_trait]
impl RtcConnection for WebrtcConnection {
    type LocalTrack = LocalTrack;
    type Stream = RemoteMedia;

    fn is_closed(&self) -> bool {
        self.pc.signaling_state() == RTCSignalingState::Closed
    }

    async fn add_send_transceiver(&self, track: LocalTrack) -> Result<()> {
        self.pc
            .add_transceiver_from_track(
                track,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .context("add send-only transceiver")?;
        Ok(())
    }

    async fn replace_sender_track(&self, track: LocalTrack) -> Result<bool> {
        let kind = track.kind();
        for sender in self.pc.get_senders().await {
            let Some(current) = sender.track().await else {
                continue;
            };
            if current.kind() == kind {
                sender
                    .replace_track(Some(track))
                    .await
                    .context("replace sender track")?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn local_track_kind(&self, track: &LocalTrack) -> MediaKind {
        media_kind(track.kind())
    }

    async fn transceivers(&self) -> Vec<TransceiverInfo> {
        let mut out = Vec::new();
        for t in self.pc.get_transceivers().await {
            let sending = t.sender().await.track().await.map(|track| SendingTrack {
                id: track.id().to_string(),
                kind: media_kind(track.kind()),
            });
            out.push(TransceiverInfo {
                mid: t.mid().map(|m| m.to_string()),
                direction: direction_from_rtc(t.direction()),
                sending,
            });
        }
        out
    }

    async fn set_direction(&self, mid: &str, direction: Direction) -> Result<bool> {
        for t in self.pc.get_transceivers().await {
            if t.mid().as_deref() == Some(mid) {
                t.set_direction(direction_to_rtc(direction)).await;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn set_send_priority(&self, mid: &str, priority: SendPriority) -> Result<()> {
        // webrtc-rs encodings carry no network priority.
        debug!(%mid, ?priority, "send priority not supported by webrtc-rs; ignored");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.context("create offer")?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await.context("create answer")?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .context("set local description")
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .context("set remote description")
    }

    fn on_track(&self, handler: TrackHandler<RemoteMedia>) {
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  transceiver: Arc<RTCRtpTransceiver>| {
                let handler = handler.clone();
                Box::pin(async move {
                    let arrival = TrackArrival {
                        mid: transceiver.mid().map(|m| m.to_string()),
                        kind: media_kind(track.kind()),
                        stream: RemoteMedia {
                            stream_id: track.stream_id().to_string(),
                            track,
                        },
                    };
                    handler(arrival);
                })
            },
        ));
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.context("close peer connection")
    }
}
