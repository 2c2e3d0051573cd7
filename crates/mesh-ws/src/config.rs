//! Connection parameters and the outcome of the opening handshake.
//!
//! [`ConnectionConfig`] can be built in code (`Default` + `with_*` setters)
//! or loaded from TOML, where durations are given in milliseconds:
//!
//! ```toml
//! max_frame_size = 65536
//! keepalive_interval = 15000
//! drop_on_keepalive_timeout = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::frame::{Role, MAX_CONTROL_PAYLOAD};

/// Immutable per-connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Largest payload a single received frame may declare.
    pub max_frame_size: usize,
    /// Largest reassembled message.
    pub max_message_size: usize,
    /// Split outgoing messages larger than `fragmentation_threshold`.
    pub fragment_outgoing: bool,
    pub fragmentation_threshold: usize,
    pub keepalive: bool,
    #[serde(with = "millis")]
    pub keepalive_interval: Duration,
    #[serde(with = "millis")]
    pub keepalive_grace_period: Duration,
    pub drop_on_keepalive_timeout: bool,
    /// Concatenate fragments into messages. When off, every data frame is
    /// raised as a frame event instead.
    pub assemble_fragments: bool,
    #[serde(with = "millis")]
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1024 * 1024,
            max_message_size: 8 * 1024 * 1024,
            fragment_outgoing: true,
            fragmentation_threshold: 16 * 1024,
            keepalive: true,
            keepalive_interval: Duration::from_secs(20),
            keepalive_grace_period: Duration::from_secs(10),
            drop_on_keepalive_timeout: true,
            assemble_fragments: true,
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ConnectionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_size < MAX_CONTROL_PAYLOAD {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size must be at least {} bytes",
                MAX_CONTROL_PAYLOAD
            )));
        }
        if self.fragment_outgoing && self.fragmentation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "fragmentation_threshold must be positive".to_string(),
            ));
        }
        if self.keepalive && self.keepalive_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "keepalive_interval must be positive".to_string(),
            ));
        }
        if self.keepalive && self.drop_on_keepalive_timeout && self.keepalive_grace_period.is_zero() {
            return Err(ConfigError::Invalid(
                "keepalive_grace_period must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Enable outgoing fragmentation with the given threshold.
    pub fn with_fragmentation(mut self, threshold: usize) -> Self {
        self.fragment_outgoing = true;
        self.fragmentation_threshold = threshold;
        self
    }

    pub fn without_fragmentation(mut self) -> Self {
        self.fragment_outgoing = false;
        self
    }

    pub fn with_keepalive(mut self, interval: Duration, grace_period: Duration, drop_on_timeout: bool) -> Self {
        self.keepalive = true;
        self.keepalive_interval = interval;
        self.keepalive_grace_period = grace_period;
        self.drop_on_keepalive_timeout = drop_on_timeout;
        self
    }

    pub fn without_keepalive(mut self) -> Self {
        self.keepalive = false;
        self
    }

    pub fn with_assemble_fragments(mut self, assemble: bool) -> Self {
        self.assemble_fragments = assemble;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// What the external HTTP upgrade handshake settled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub role: Role,
    /// Selected subprotocol, lowercase.
    pub protocol: Option<String>,
    pub extensions: Vec<String>,
    pub remote_address: String,
    /// `Sec-WebSocket-Version` reported by the client.
    pub version: u8,
}

impl Negotiated {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            protocol: None,
            extensions: Vec::new(),
            remote_address: String::new(),
            version: 13,
        }
    }

    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.protocol = Some(protocol.to_ascii_lowercase());
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = address.into();
        self
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext.eq_ignore_ascii_case(name))
    }

    /// Pick the address to report for a peer: the first entry of an
    /// `X-Forwarded-For` value when present, otherwise the socket address.
    pub fn remote_from(peer: &str, forwarded_for: Option<&str>) -> String {
        forwarded_for
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|first| !first.is_empty())
            .unwrap_or(peer)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_frame_size, 0x10_0000);
        assert_eq!(config.max_message_size, 0x80_0000);
        assert_eq!(config.fragmentation_threshold, 0x4000);
        assert_eq!(config.keepalive_interval, Duration::from_millis(20_000));
        assert_eq!(config.keepalive_grace_period, Duration::from_millis(10_000));
        assert_eq!(config.close_timeout, Duration::from_millis(5000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ConnectionConfig::from_toml_str(
            "max_frame_size = 65536\nkeepalive_interval = 15000\ndrop_on_keepalive_timeout = false\n",
        )
        .unwrap();
        assert_eq!(config.max_frame_size, 65536);
        assert_eq!(config.keepalive_interval, Duration::from_secs(15));
        assert!(!config.drop_on_keepalive_timeout);
        assert_eq!(config.close_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_toml_rejects_unknown_and_invalid() {
        assert!(matches!(
            ConnectionConfig::from_toml_str("max_frame_sise = 10"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ConnectionConfig::from_toml_str("fragmentation_threshold = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ConnectionConfig::from_toml_str("max_frame_size = 100"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "close_timeout = 250\nassemble_fragments = false").unwrap();
        let config = ConnectionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.close_timeout, Duration::from_millis(250));
        assert!(!config.assemble_fragments);

        assert!(matches!(
            ConnectionConfig::from_file(file.path().with_extension("missing")),
            Err(ConfigError::Read(_))
        ));
    }

    #[test]
    fn test_negotiated_builder() {
        let negotiated = Negotiated::new(Role::Server)
            .with_protocol("Chat.V2")
            .with_extensions(["x-test"])
            .with_remote_address("10.0.0.1:4000");
        assert_eq!(negotiated.protocol.as_deref(), Some("chat.v2"));
        assert!(negotiated.has_extension("X-Test"));
        assert_eq!(negotiated.version, 13);
    }

    #[test]
    fn test_remote_from_prefers_forwarded_for() {
        assert_eq!(
            Negotiated::remote_from("127.0.0.1:9000", Some("203.0.113.7, 10.0.0.2")),
            "203.0.113.7"
        );
        assert_eq!(Negotiated::remote_from("127.0.0.1:9000", Some("  ")), "127.0.0.1:9000");
        assert_eq!(Negotiated::remote_from("127.0.0.1:9000", None), "127.0.0.1:9000");
    }
}
