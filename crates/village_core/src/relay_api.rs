/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! HTTP signaling against the media relay.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use village_protocol::{
    CloseTracksRequest, CloseTracksResponse, NewSessionResponse, RenegotiateRequest,
    RenegotiateResponse, TracksRequest, TracksResponse,
};

use crate::config::RelayConfig;
use crate::http_retry::send_with_retry;
use crate::relay_metrics::RelayMetrics;

/// Calls the peer client makes against the relay. Per-track and
/// request-level error fields are returned as data; only transport and
/// non-success HTTP failures are `Err`.
#[async_trait]
pub trait RelayApi: Send + Sync + 'static {
    /// `POST /sessions/new`
    async fn new_session(&self) -> Result<NewSessionResponse>;

    /// `POST /sessions/{id}/tracks/new`, used both to publish and to subscribe.
    async fn new_tracks(&self, session_id: &str, req: &TracksRequest) -> Result<TracksResponse>;

    /// `PUT /sessions/{id}/renegotiate`
    async fn renegotiate(
        &self,
        session_id: &str,
        req: &RenegotiateRequest,
    ) -> Result<RenegotiateResponse>;

    /// `PUT /sessions/{id}/tracks/close`
    async fn close_tracks(
        &self,
        session_id: &str,
        req: &CloseTracksRequest,
    ) -> Result<CloseTracksResponse>;
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: Option<String>,
    error_description: Option<String>,
}

#[derive(Clone)]
pub struct HttpRelay {
    http: reqwest::Client,
    cfg: RelayConfig,
    metrics: Arc<RelayMetrics>,
}

impl HttpRelay {
    pub fn new(cfg: RelayConfig, metrics: Arc<RelayMetrics>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout())
            .build()
            .context("build relay http client")?;
        Ok(Self::with_client(http, cfg, metrics))
    }

    pub fn with_client(http: reqwest::Client, cfg: RelayConfig, metrics: Arc<RelayMetrics>) -> Self {
        Self { http, cfg, metrics }
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    async fn call<B, R>(&self, method: Method, path: &str, body: Option<&B>) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.cfg.sessions_url(path);
        let payload = match body {
            Some(b) => Some(serde_json::to_vec(b).context("encode relay body")?),
            None => None,
        };
        let build_req = || {
            let req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.cfg.app_credential)
                .header("content-type", "application/json");
            match &payload {
                Some(p) => req.body(p.clone()),
                None => req,
            }
        };
        let resp = send_with_retry(build_req, self.cfg.http_attempts(), &self.metrics)
            .await
            .with_context(|| format!("{method} {url}"))?;
        let status = resp.status();
        let text = resp.text().await.context("read relay reply")?;
        debug!(%method, %url, %status, "relay reply");

        if !status.is_success() {
            let reason = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|e| e.error_description.or(e.error_code))
                .unwrap_or(text);
            let err = anyhow!("relay {method} {path} failed: {status} {reason}");
            warn!("{err:#}");
            self.metrics.set_last_error(format!("{err:#}"));
            return Err(err);
        }
        let text = if text.trim().is_empty() { "{}".to_string() } else { text };
        serde_json::from_str(&text).with_context(|| format!("parse relay reply for {path}"))
    }
}

#[async_trait]
impl RelayApi for HttpRelay {
    async fn new_session(&self) -> Result<NewSessionResponse> {
        self.call::<(), _>(Method::POST, "new", None).await
    }

    async fn new_tracks(&self, session_id: &str, req: &TracksRequest) -> Result<TracksResponse> {
        self.call(Method::POST, &format!("{session_id}/tracks/new"), Some(req))
            .await
    }

    async fn renegotiate(
        &self,
        session_id: &str,
        req: &RenegotiateRequest,
    ) -> Result<RenegotiateResponse> {
        self.call(Method::PUT, &format!("{session_id}/renegotiate"), Some(req))
            .await
    }

    async fn close_tracks(
        &self,
        session_id: &str,
        req: &CloseTracksRequest,
    ) -> Result<CloseTracksResponse> {
        self.call(Method::PUT, &format!("{session_id}/tracks/close"), Some(req))
            .await
    }
}
