//! Serve configuration

use std::time::Duration;

use serde::Deserialize;

/// Preferred listening transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportPreference {
    /// Unix socket where available, loopback TCP otherwise.
    #[default]
    Auto,
    /// Always a unix domain socket.
    UnixSocket,
    /// Always loopback TCP on an ephemeral port.
    Tcp,
}

/// Configuration for serving a plugin.
///
/// The defaults are what a typical host expects; plugin authors usually only
/// set the magic cookie pair and the supported protocol versions.
#[derive(Debug, Clone, Deserialize)]
pub struct ServeConfig {
    /// Environment variable the host sets to prove it launched this process.
    #[serde(default = "default_magic_cookie_key")]
    pub magic_cookie_key: String,

    /// Expected value of the magic cookie variable. An empty value disables
    /// the check.
    #[serde(default)]
    pub magic_cookie_value: String,

    /// Application protocol versions this plugin can speak, ascending.
    #[serde(default = "default_protocol_versions")]
    pub protocol_versions: Vec<u32>,

    /// Listening transport preference.
    #[serde(default)]
    pub transport: TransportPreference,

    /// Service name reported on the liveness surface.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Whether to expose the cooperative-shutdown control plane. Disabling
    /// it means every shutdown is the host's hard kill.
    #[serde(default = "default_true")]
    pub enable_controller: bool,

    /// How long a drain may wait on in-flight calls before giving up.
    #[serde(default = "default_drain_grace_secs")]
    pub drain_grace_secs: u64,

    /// Orphan-watch polling interval.
    #[serde(default = "default_orphan_poll_millis")]
    pub orphan_poll_millis: u64,

    /// Environment variable carrying the host's client certificate.
    #[serde(default = "default_client_cert_var")]
    pub client_cert_var: String,

    /// Environment variable carrying the host's acceptable protocol
    /// versions, comma-separated.
    #[serde(default = "default_protocol_versions_var")]
    pub protocol_versions_var: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            magic_cookie_key: default_magic_cookie_key(),
            magic_cookie_value: String::new(),
            protocol_versions: default_protocol_versions(),
            transport: TransportPreference::default(),
            service_name: default_service_name(),
            enable_controller: true,
            drain_grace_secs: default_drain_grace_secs(),
            orphan_poll_millis: default_orphan_poll_millis(),
            client_cert_var: default_client_cert_var(),
            protocol_versions_var: default_protocol_versions_var(),
        }
    }
}

impl ServeConfig {
    /// Set the magic cookie pair the host is expected to provide.
    pub fn with_magic_cookie(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.magic_cookie_key = key.into();
        self.magic_cookie_value = value.into();
        self
    }

    /// Set the supported application protocol versions.
    pub fn with_protocol_versions(mut self, versions: Vec<u32>) -> Self {
        self.protocol_versions = versions;
        self
    }

    pub(crate) fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }

    pub(crate) fn orphan_poll(&self) -> Duration {
        Duration::from_millis(self.orphan_poll_millis)
    }
}

fn default_magic_cookie_key() -> String {
    "PLUGIN_MAGIC_COOKIE".to_string()
}

fn default_protocol_versions() -> Vec<u32> {
    vec![1]
}

fn default_service_name() -> String {
    "plugin".to_string()
}

fn default_true() -> bool {
    true
}

fn default_drain_grace_secs() -> u64 {
    5
}

fn default_orphan_poll_millis() -> u64 {
    2000
}

fn default_client_cert_var() -> String {
    crate::handshake::env::CLIENT_CERT.to_string()
}

fn default_protocol_versions_var() -> String {
    crate::handshake::env::PROTOCOL_VERSIONS.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = ServeConfig::default();
        assert_eq!(config.transport, TransportPreference::Auto);
        assert!(config.enable_controller);
        assert_eq!(config.protocol_versions, vec![1]);
        assert_eq!(config.client_cert_var, "PLUGIN_CLIENT_CERT");
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let config: ServeConfig = serde_json::from_str(
            r#"{"magic_cookie_key":"K","magic_cookie_value":"V","transport":"tcp"}"#,
        )
        .unwrap();
        assert_eq!(config.magic_cookie_key, "K");
        assert_eq!(config.transport, TransportPreference::Tcp);
        assert_eq!(config.drain_grace_secs, 5);
    }
}
