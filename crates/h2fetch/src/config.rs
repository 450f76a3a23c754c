//! Client configuration.
//!
//! ```toml
//! keep-alive-interval = "20s"
//! connect-timeout = "10s"
//! eviction = "when-idle"
//! user-agent = "my-service/1.0"
//! verify-certificates = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default cadence of keep-alive pings on pooled sessions.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Default bound on establishing a new transport session.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What happens to a shared session when a request opts out of keep-alive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Close the session as soon as the opted-out response ends, even if
    /// other requests are still using it.
    #[default]
    Always,
    /// Close the session only when no other stream is active on it.
    WhenIdle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClientConfig {
    /// Ping cadence used when a request leaves keep-alive at its default.
    #[serde(with = "duration_str")]
    pub keep_alive_interval: Duration,
    /// Bound on opening a new session. `None` waits for the transport.
    #[serde(with = "opt_duration_str")]
    pub connect_timeout: Option<Duration>,
    pub eviction: EvictionPolicy,
    /// Sent when the caller does not provide a `user-agent` header.
    pub user_agent: Option<String>,
    pub verify_certificates: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            eviction: EvictionPolicy::default(),
            user_agent: Some(concat!("h2fetch/", env!("CARGO_PKG_VERSION")).to_string()),
            verify_certificates: true,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: ClientConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Parse a duration string like "5s", "500ms", "1m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Render a duration in the same notation [`parse_duration`] accepts.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid duration '{raw}'")))
    }
}

mod opt_duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_str(&super::format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        raw.map(|raw| {
            super::parse_duration(&raw)
                .ok_or_else(|| D::Error::custom(format!("invalid duration '{raw}'")))
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.keep_alive_interval, Duration::from_secs(20));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.eviction, EvictionPolicy::Always);
        assert!(config.verify_certificates);
        assert!(config.user_agent.unwrap().starts_with("h2fetch/"));
    }

    #[test]
    fn config_from_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            keep-alive-interval = "500ms"
            connect-timeout = "3s"
            eviction = "when-idle"
            user-agent = "probe/2"
            verify-certificates = false
            "#,
        )
        .unwrap();

        assert_eq!(config.keep_alive_interval, Duration::from_millis(500));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.eviction, EvictionPolicy::WhenIdle);
        assert_eq!(config.user_agent.as_deref(), Some("probe/2"));
        assert!(!config.verify_certificates);
    }

    #[test]
    fn config_partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml_str(r#"keep-alive-interval = "1m""#).unwrap();
        assert_eq!(config.keep_alive_interval, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));
        assert_eq!(config.eviction, EvictionPolicy::Always);
    }

    #[test]
    fn config_rejects_bad_duration() {
        let err = ClientConfig::from_toml_str(r#"keep-alive-interval = "soon""#).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = ClientConfig {
            keep_alive_interval: Duration::from_millis(1500),
            ..ClientConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("keep-alive-interval = \"1500ms\""));
        assert_eq!(ClientConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("fast"), None);
    }

    #[test]
    fn parse_duration_rejects_overflowing_minutes() {
        assert_eq!(parse_duration(&format!("{}m", u64::MAX)), None);
        assert_eq!(
            parse_duration(&format!("{}m", u64::MAX / 60)),
            Some(Duration::from_secs(u64::MAX / 60 * 60))
        );
    }
}
