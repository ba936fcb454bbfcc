/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use village_core::config::PeerConfig;
use village_core::peer_events::{PeerEvent, PeerKey};
use village_core::protocol::{PeerTrack, SessionRecord};
use village_core::relay_api::HttpRelay;
use village_core::relay_metrics::RelayMetrics;
use village_core::webrtc_backend::{LocalTrack, WebrtcBackend};
use village_core::PeerClient;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    info!(version = village_core::village_core_version(), "village peer starting");
    let cfg = PeerConfig::from_env();
    if cfg.relay.app_id.is_empty() || cfg.relay.app_credential.is_empty() {
        anyhow::bail!("set VILLAGE_RELAY_APP_ID and VILLAGE_RELAY_APP_SECRET");
    }
    let user_id = std::env::var("VILLAGE_USER").unwrap_or_else(|_| "dev".to_string());

    let metrics = Arc::new(RelayMetrics::new());
    let relay = HttpRelay::new(cfg.relay.clone(), metrics.clone())?;
    let client = PeerClient::with_metrics(WebrtcBackend, relay, cfg, metrics.clone());

    client.on(PeerEvent::Track, |s| {
        info!(
            event = PeerEvent::Track.name(),
            peer = %s.peer_key,
            mid = ?s.mid,
            kind = %s.kind,
            stream_id = %s.stream.stream_id,
            "remote media"
        );
    });
    client.on(PeerEvent::RemoveTrack, |s| {
        info!(event = PeerEvent::RemoveTrack.name(), peer = %s.peer_key, mid = ?s.mid, "remote media");
    });

    let session_id = client.create_session().await?;
    client.create_peer_connection().await?;

    let mic: LocalTrack = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        format!("{user_id}-mic"),
        "village".to_owned(),
    ));
    client.add_local_tracks(vec![mic]).await?;
    let tracks = client.push_local_tracks().await?;

    let record = SessionRecord {
        id: session_id.clone(),
        user_id,
        tracks,
    };
    println!("{}", serde_json::to_string_pretty(&record)?);

    // Subscribe to another participant: VILLAGE_REMOTE_SESSION plus a
    // comma separated VILLAGE_REMOTE_TRACKS list of track names.
    if let Ok(remote) = std::env::var("VILLAGE_REMOTE_SESSION") {
        let names = std::env::var("VILLAGE_REMOTE_TRACKS").unwrap_or_default();
        let remote_tracks: Vec<PeerTrack> = names
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|name| PeerTrack {
                session_id: remote.clone(),
                track_name: Some(name.to_string()),
                mid: None,
            })
            .collect();
        if remote_tracks.is_empty() {
            warn!("VILLAGE_REMOTE_SESSION set without VILLAGE_REMOTE_TRACKS");
        } else {
            client
                .pull_remote_tracks(PeerKey::new(remote.clone()), remote_tracks)
                .await
                .with_context(|| format!("pull tracks of {remote}"))?;
        }
    }

    info!(%session_id, "running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!(metrics = %metrics.snapshot_json(), "shutting down");
    client.close().await?;
    Ok(())
}
