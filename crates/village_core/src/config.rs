/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::time::Duration;

use crate::rtc::{IceServer, RtcSettings};

pub const DEFAULT_RELAY_BASE_URL: &str = "https://rtc.live.cloudflare.com/v1/apps";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct PeerConfig {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub ice: IceConfig,
    /// Raise the send priority of published audio (default true).
    pub prioritize_audio: Option<bool>,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct RelayConfig {
    pub base_url: Option<String>,
    #[serde(default)]
    pub app_id: String,
    /// Bearer token sent with every relay request.
    #[serde(default)]
    pub app_credential: String,
    /// Per-request timeout seconds.
    pub http_timeout_secs: Option<u64>,
    /// Attempts per relay request. 1 disables retries.
    pub http_attempts: Option<u32>,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct IceConfig {
    /// STUN server URLs (e.g. `stun:stun.l.google.com:19302`).
    pub stun_urls: Option<Vec<String>>,
    /// Optional TURN server, used only when username and credential are set too.
    pub turn_url: Option<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: Some(DEFAULT_RELAY_BASE_URL.to_string()),
            app_id: String::new(),
            app_credential: String::new(),
            http_timeout_secs: Some(15),
            http_attempts: Some(1),
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_urls: Some(vec![DEFAULT_STUN_URL.to_string()]),
            turn_url: None,
            turn_username: None,
            turn_credential: None,
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_opt(key: &str) -> Option<String> {
    non_empty(std::env::var(key).ok())
}

impl PeerConfig {
    /// Reads `VILLAGE_*` variables, keeping defaults for anything unset.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_opt("VILLAGE_RELAY_BASE_URL") {
            cfg.relay.base_url = Some(v);
        }
        cfg.relay.app_id = env_opt("VILLAGE_RELAY_APP_ID").unwrap_or_default();
        cfg.relay.app_credential = env_opt("VILLAGE_RELAY_APP_SECRET").unwrap_or_default();
        if let Some(v) = env_opt("VILLAGE_HTTP_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            cfg.relay.http_timeout_secs = Some(v);
        }
        if let Some(v) = env_opt("VILLAGE_HTTP_ATTEMPTS").and_then(|s| s.parse().ok()) {
            cfg.relay.http_attempts = Some(v);
        }
        cfg.ice.turn_url = env_opt("VILLAGE_TURN_URL");
        cfg.ice.turn_username = env_opt("VILLAGE_TURN_USERNAME");
        cfg.ice.turn_credential = env_opt("VILLAGE_TURN_CREDENTIAL");
        cfg
    }

    pub fn prioritize_audio(&self) -> bool {
        self.prioritize_audio.unwrap_or(true)
    }

    pub fn rtc_settings(&self) -> RtcSettings {
        RtcSettings {
            ice_servers: self.ice.ice_servers(),
            max_bundle: true,
        }
    }
}

impl RelayConfig {
    pub fn base_url(&self) -> String {
        non_empty(self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_RELAY_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.unwrap_or(15).clamp(1, 120))
    }

    pub fn http_attempts(&self) -> u32 {
        self.http_attempts.unwrap_or(1).clamp(1, 5)
    }

    /// `{base}/{app_id}/sessions/{suffix}`.
    pub fn sessions_url(&self, suffix: &str) -> String {
        format!(
            "{}/{}/sessions/{}",
            self.base_url(),
            self.app_id.trim(),
            suffix.trim_start_matches('/')
        )
    }
}

impl IceConfig {
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut out = Vec::new();
        let stun = self
            .stun_urls
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        let stun = if stun.is_empty() {
            vec![DEFAULT_STUN_URL.to_string()]
        } else {
            stun
        };
        out.push(IceServer {
            urls: stun,
            username: None,
            credential: None,
        });

        if let (Some(url), Some(username), Some(credential)) = (
            non_empty(self.turn_url.clone()),
            non_empty(self.turn_username.clone()),
            non_empty(self.turn_credential.clone()),
        ) {
            out.push(IceServer {
                urls: vec![url],
                username: Some(username),
                credential: Some(credential),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_public_stun_and_no_retries() {
        let cfg = PeerConfig::default();
        let servers = cfg.ice.ice_servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec![DEFAULT_STUN_URL.to_string()]);
        assert_eq!(cfg.relay.http_attempts(), 1);
        assert!(cfg.prioritize_audio());
        assert!(cfg.rtc_settings().max_bundle);
    }

    #[test]
    fn turn_requires_all_three_fields() {
        let mut ice = IceConfig {
            turn_url: Some("turn:turn.example:3478".into()),
            turn_username: Some("u".into()),
            ..Default::default()
        };
        assert_eq!(ice.ice_servers().len(), 1);
        ice.turn_credential = Some("secret".into());
        let servers = ice.ice_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn sessions_url_joins_base_and_app() {
        let relay = RelayConfig {
            base_url: Some("http://127.0.0.1:9000/v1/apps/".into()),
            app_id: "app1".into(),
            ..Default::default()
        };
        assert_eq!(
            relay.sessions_url("new"),
            "http://127.0.0.1:9000/v1/apps/app1/sessions/new"
        );
        assert_eq!(
            relay.sessions_url("/s1/tracks/close"),
            "http://127.0.0.1:9000/v1/apps/app1/sessions/s1/tracks/close"
        );
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let relay = RelayConfig {
            http_timeout_secs: Some(0),
            http_attempts: Some(50),
            ..Default::default()
        };
        assert_eq!(relay.http_timeout(), Duration::from_secs(1));
        assert_eq!(relay.http_attempts(), 5);
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: PeerConfig = serde_json::from_str(
            r#"{"relay":{"app_id":"a","app_credential":"s"},"prioritize_audio":false}"#,
        )
        .unwrap();
        assert_eq!(cfg.relay.app_id, "a");
        assert_eq!(cfg.relay.base_url, None);
        assert_eq!(cfg.relay.base_url(), DEFAULT_RELAY_BASE_URL);
        assert!(!cfg.prioritize_audio());
        assert_eq!(cfg.ice.ice_servers().len(), 1);
    }
}
