//! Relay configuration.
//!
//! There is no config file: values start from [`crate::constants`], then
//! `SCENE_RELAY_*` environment variables are applied, then the binary's
//! command-line flags.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address;
use crate::constants::{
    DEFAULT_ENQUEUE_TIMEOUT, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY, DEFAULT_STOP_TIMEOUT,
};

/// What to do with a connection attempt while a peer is already attached.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeerPolicy {
    /// Close the current peer, then admit the newcomer.
    #[default]
    Supersede,
    /// Keep the current peer and turn the newcomer away.
    Reject,
}

impl std::str::FromStr for PeerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "supersede" | "replace" => Ok(Self::Supersede),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown peer policy '{other}' (expected supersede or reject)")),
        }
    }
}

/// Configuration for a relay instance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address to listen on. `None` means the resolved local address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<IpAddr>,
    /// Port to listen on (0 lets the OS choose).
    pub port: u16,
    /// Milliseconds `send()` waits for room in the queue.
    pub enqueue_timeout_ms: u64,
    /// Maximum payloads held in the send queue.
    pub queue_capacity: usize,
    /// Milliseconds `stop()` waits for the transport loop to exit.
    pub stop_timeout_ms: u64,
    /// Handling of a second concurrent connection.
    pub peer_policy: PeerPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            port: DEFAULT_PORT,
            enqueue_timeout_ms: DEFAULT_ENQUEUE_TIMEOUT.as_millis() as u64,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT.as_millis() as u64,
            peer_policy: PeerPolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Defaults with environment overrides applied.
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Config listening on `address:port`, everything else default.
    pub fn with_address(address: IpAddr, port: u16) -> Self {
        Self {
            bind_address: Some(address),
            port,
            ..Self::default()
        }
    }

    /// Apply `SCENE_RELAY_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unparseable values are logged and skipped, leaving the previous value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("SCENE_RELAY_BIND") {
            match bind.parse() {
                Ok(ip) => self.bind_address = Some(ip),
                Err(e) => log::warn!("Ignoring SCENE_RELAY_BIND={bind}: {e}"),
            }
        }

        override_parsed(&lookup, "SCENE_RELAY_PORT", &mut self.port);
        override_parsed(
            &lookup,
            "SCENE_RELAY_ENQUEUE_TIMEOUT_MS",
            &mut self.enqueue_timeout_ms,
        );
        override_parsed(&lookup, "SCENE_RELAY_QUEUE_CAPACITY", &mut self.queue_capacity);
        override_parsed(&lookup, "SCENE_RELAY_STOP_TIMEOUT_MS", &mut self.stop_timeout_ms);
        override_parsed(&lookup, "SCENE_RELAY_PEER_POLICY", &mut self.peer_policy);

        if self.queue_capacity == 0 {
            log::warn!("Queue capacity of 0 is unusable, using 1");
            self.queue_capacity = 1;
        }
    }

    /// Address to listen on, resolving the local address if none was set.
    pub fn listen_ip(&self) -> IpAddr {
        self.bind_address
            .unwrap_or_else(address::resolve_local_address)
    }

    /// Socket address to bind.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip(), self.port)
    }

    /// Enqueue timeout as a `Duration`.
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// Stop timeout as a `Duration`.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(e) => log::warn!("Ignoring {key}={raw}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 8765);
        assert_eq!(config.enqueue_timeout(), Duration::from_secs(5));
        assert_eq!(config.peer_policy, PeerPolicy::Supersede);
        assert!(config.bind_address.is_none());
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = RelayConfig::default();
        config.apply_overrides(lookup_from(&[
            ("SCENE_RELAY_BIND", "127.0.0.1"),
            ("SCENE_RELAY_PORT", "9999"),
            ("SCENE_RELAY_ENQUEUE_TIMEOUT_MS", "250"),
            ("SCENE_RELAY_QUEUE_CAPACITY", "4"),
            ("SCENE_RELAY_PEER_POLICY", "reject"),
        ]));
        assert_eq!(config.listen_addr(), "127.0.0.1:9999".parse().unwrap());
        assert_eq!(config.enqueue_timeout(), Duration::from_millis(250));
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.peer_policy, PeerPolicy::Reject);
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let mut config = RelayConfig::default();
        config.apply_overrides(lookup_from(&[
            ("SCENE_RELAY_PORT", "not-a-port"),
            ("SCENE_RELAY_BIND", "nowhere"),
            ("SCENE_RELAY_PEER_POLICY", "broadcast"),
        ]));
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut config = RelayConfig::default();
        config.apply_overrides(lookup_from(&[("SCENE_RELAY_QUEUE_CAPACITY", "0")]));
        assert_eq!(config.queue_capacity, 1);
    }

    #[test]
    fn test_serializes_policy_lowercase() {
        let json = serde_json::to_value(RelayConfig::default()).unwrap();
        assert_eq!(json["peer_policy"], "supersede");
        assert!(json.get("bind_address").is_none());
    }
}
