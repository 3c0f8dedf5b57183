//! Runtime configuration.
//!
//! An explicit, immutable value handed to the components that need it; the
//! host application decides where it comes from (file, remote config, test
//! fixture). Nothing in this crate reads ambient global state.

// Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{NEGOTIATION_TIMEOUT, PEER_PRESENCE_TIMEOUT, SIGNALING_CONNECT_TIMEOUT};

/// One STUN/TURN server entry for ICE.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

/// Configuration for the link subsystem.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConnectConfig {
    /// Base URL of the signaling server; the link id and role query are
    /// appended per connection. `https://` is rewritten to `wss://`.
    pub signaling_base_url: String,

    /// ICE servers used for peer connection candidate gathering.
    pub ice_servers: Vec<IceServer>,

    /// Override for the signaling WebSocket handshake, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signaling_connect_timeout_secs: Option<u64>,

    /// Override for the remote-peer presence wait, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_presence_timeout_secs: Option<u64>,

    /// Override for the SDP/ICE negotiation phase, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negotiation_timeout_secs: Option<u64>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            signaling_base_url: "wss://signaling.example.com".to_string(),
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: String::new(),
                credential: String::new(),
            }],
            signaling_connect_timeout_secs: None,
            peer_presence_timeout_secs: None,
            negotiation_timeout_secs: None,
        }
    }
}

impl ConnectConfig {
    /// Set the signaling server base URL.
    #[must_use]
    pub fn with_signaling_url(mut self, url: &str) -> Self {
        self.signaling_base_url = url.to_string();
        self
    }

    /// Replace the ICE server list.
    #[must_use]
    pub fn with_ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Effective signaling handshake timeout.
    #[must_use]
    pub fn signaling_connect_timeout(&self) -> Duration {
        self.signaling_connect_timeout_secs
            .map_or(SIGNALING_CONNECT_TIMEOUT, Duration::from_secs)
    }

    /// Effective peer presence timeout.
    #[must_use]
    pub fn peer_presence_timeout(&self) -> Duration {
        self.peer_presence_timeout_secs
            .map_or(PEER_PRESENCE_TIMEOUT, Duration::from_secs)
    }

    /// Effective negotiation timeout.
    #[must_use]
    pub fn negotiation_timeout(&self) -> Duration {
        self.negotiation_timeout_secs
            .map_or(NEGOTIATION_TIMEOUT, Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_have_stun_and_stock_timeouts() {
        let config = ConnectConfig::default();
        assert!(!config.ice_servers.is_empty());
        assert_eq!(config.peer_presence_timeout(), PEER_PRESENCE_TIMEOUT);
        assert_eq!(config.negotiation_timeout(), NEGOTIATION_TIMEOUT);
    }

    #[test]
    fn test_timeout_overrides_apply() {
        let config = ConnectConfig {
            signaling_connect_timeout_secs: Some(3),
            peer_presence_timeout_secs: Some(5),
            negotiation_timeout_secs: Some(7),
            ..ConnectConfig::default()
        };
        assert_eq!(config.signaling_connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.peer_presence_timeout(), Duration::from_secs(5));
        assert_eq!(config.negotiation_timeout(), Duration::from_secs(7));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = ConnectConfig::default().with_signaling_url("wss://sig.test");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ConnectConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.signaling_base_url, "wss://sig.test");
    }
}
