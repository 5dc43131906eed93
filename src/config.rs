//! Environment-driven configuration

use std::time::Duration;

/// Default backend API root
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Session behaviour
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Originator id stamped on locally echoed user steps
    pub user_originator: String,
    /// Separator between the conversation id and the instance suffix
    pub instance_separator: char,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_originator: "user".to_string(),
            instance_separator: '-',
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            user_originator: std::env::var("SUPEREGO_USER_ORIGINATOR")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.user_originator),
            instance_separator: std::env::var("SUPEREGO_INSTANCE_SEPARATOR")
                .ok()
                .and_then(|v| v.chars().next())
                .unwrap_or(defaults.instance_separator),
        }
    }
}

/// HTTP transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// API root, e.g. `http://localhost:8000/api`
    pub base_url: String,
    /// Flow used when the conversation id does not name one
    pub default_flow_id: Option<String>,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// First backoff delay; doubles each attempt
    pub reconnect_base_delay: Duration,
    /// Timeout for non-streaming requests
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            default_flow_id: None,
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("SUPEREGO_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            default_flow_id: std::env::var("SUPEREGO_FLOW_ID").ok(),
            max_reconnect_attempts: parse_env("SUPEREGO_MAX_RECONNECTS")
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_base_delay: parse_env("SUPEREGO_RECONNECT_DELAY_MS")
                .map_or(defaults.reconnect_base_delay, Duration::from_millis),
            request_timeout: parse_env("SUPEREGO_REQUEST_TIMEOUT_SECS")
                .map_or(defaults.request_timeout, Duration::from_secs),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let session = SessionConfig::default();
        assert_eq!(session.user_originator, "user");
        assert_eq!(session.instance_separator, '-');

        let transport = TransportConfig::default();
        assert_eq!(transport.base_url, DEFAULT_API_URL);
        assert_eq!(transport.max_reconnect_attempts, 3);
        assert_eq!(transport.reconnect_base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_parse_env_ignores_garbage() {
        assert_eq!(parse_env::<u32>("SUPEREGO_TEST_UNSET_VARIABLE"), None);
    }
}
