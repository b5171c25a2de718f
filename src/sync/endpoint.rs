//! Replication target: endpoint URL, credentials and engine settings.

use std::fmt;
use std::time::Duration;

use super::error::ReplicationError;
use crate::config::{ReplicatorType, SyncConfig};

/// A Sync Gateway database URL, normalized to HTTP(S).
///
/// `ws://` and `wss://` URLs (as handed out for websocket replication) are
/// accepted and mapped to `http://` and `https://`; a bare host gets `http://`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: String,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, ReplicationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ReplicationError::Configuration(
                "endpoint URL is empty".to_string(),
            ));
        }

        let http = to_http_url(raw);
        let url = reqwest::Url::parse(&http).map_err(|e| {
            ReplicationError::Configuration(format!("invalid endpoint URL '{}': {}", raw, e))
        })?;

        if url.host_str().is_none() {
            return Err(ReplicationError::Configuration(format!(
                "endpoint URL '{}' has no host",
                raw
            )));
        }
        if url.path().trim_matches('/').is_empty() {
            return Err(ReplicationError::Configuration(format!(
                "endpoint URL '{}' must name a database, e.g. https://host:4984/todos",
                raw
            )));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(ReplicationError::Configuration(format!(
                "endpoint URL '{}' must not carry a query or fragment",
                raw
            )));
        }

        Ok(Self {
            base: url.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// Database URL without trailing slash.
    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// URL of a path below the database, e.g. `_changes`.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    /// Key under which the pull checkpoint for this endpoint is stored.
    pub fn checkpoint_key(&self) -> String {
        format!("pull:{}", self.base)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)
    }
}

fn to_http_url(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = raw.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if !raw.starts_with("http://") && !raw.starts_with("https://") {
        format!("http://{}", raw)
    } else {
        raw.to_string()
    }
}

/// Basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ReplicationError> {
        let username = username.into();
        let password = password.into();
        if username.trim().is_empty() {
            return Err(ReplicationError::Configuration(
                "username is empty".to_string(),
            ));
        }
        if password.is_empty() {
            return Err(ReplicationError::Configuration(
                "password is empty".to_string(),
            ));
        }
        Ok(Self { username, password })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the replicator needs to know about a session.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    pub endpoint: Endpoint,
    pub credentials: Credentials,
    pub replicator_type: ReplicatorType,
    pub continuous: bool,
    pub accept_only_self_signed_certs: bool,
    /// Long-poll timeout for the remote changes feed.
    pub heartbeat: Duration,
    /// Consecutive failed attempts before giving up; 0 retries forever.
    pub max_attempts: u32,
    /// Cap for the wait between attempts.
    pub max_attempt_wait_time: Duration,
}

impl ReplicatorConfig {
    /// Continuous push-and-pull with default timings.
    pub fn new(endpoint: Endpoint, credentials: Credentials) -> Self {
        let defaults = SyncConfig::default();
        Self {
            endpoint,
            credentials,
            replicator_type: ReplicatorType::PushAndPull,
            continuous: true,
            accept_only_self_signed_certs: false,
            heartbeat: Duration::from_secs(defaults.heartbeat_secs),
            max_attempts: defaults.max_attempts,
            max_attempt_wait_time: Duration::from_secs(defaults.max_attempt_wait_secs),
        }
    }

    /// Validates the sync section of the app config. Never touches the network.
    pub fn from_sync_config(sync: &SyncConfig) -> Result<Self, ReplicationError> {
        let url = sync.url.as_deref().ok_or_else(|| {
            ReplicationError::Configuration(
                "missing endpoint URL (set sync.url or TODOS_SYNC_URL)".to_string(),
            )
        })?;
        let username = sync.username.as_deref().ok_or_else(|| {
            ReplicationError::Configuration(
                "missing username (set sync.username or TODOS_SYNC_USERNAME)".to_string(),
            )
        })?;
        let password = sync.password.as_deref().ok_or_else(|| {
            ReplicationError::Configuration(
                "missing password (set sync.password or TODOS_SYNC_PASSWORD)".to_string(),
            )
        })?;

        let endpoint = Endpoint::parse(url)?;
        let credentials = Credentials::new(username, password)?;

        if sync.heartbeat_secs == 0 {
            return Err(ReplicationError::Configuration(
                "heartbeat_secs must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            endpoint,
            credentials,
            replicator_type: sync.replicator_type,
            continuous: sync.continuous,
            accept_only_self_signed_certs: sync.accept_only_self_signed_certs,
            heartbeat: Duration::from_secs(sync.heartbeat_secs),
            max_attempts: sync.max_attempts,
            max_attempt_wait_time: Duration::from_secs(sync.max_attempt_wait_secs),
        })
    }

    pub fn one_shot(mut self) -> Self {
        self.continuous = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_config() -> SyncConfig {
        SyncConfig {
            url: Some("wss://gateway.example.com:4984/todos".to_string()),
            username: Some("sam".to_string()),
            password: Some("secret".to_string()),
            ..SyncConfig::default()
        }
    }

    #[test]
    fn test_endpoint_normalizes_scheme() {
        let cases = [
            ("ws://localhost:4984/todos", "http://localhost:4984/todos"),
            ("wss://sync.example.com/todos", "https://sync.example.com/todos"),
            ("http://localhost:4984/todos/", "http://localhost:4984/todos"),
            ("https://sync.example.com/todos", "https://sync.example.com/todos"),
            ("localhost:4984/todos", "http://localhost:4984/todos"),
        ];
        for (raw, expected) in cases {
            assert_eq!(Endpoint::parse(raw).unwrap().as_str(), expected, "{}", raw);
        }
    }

    #[test]
    fn test_endpoint_url_for() {
        let endpoint = Endpoint::parse("http://localhost:4984/todos").unwrap();
        assert_eq!(
            endpoint.url_for("_changes"),
            "http://localhost:4984/todos/_changes"
        );
        assert_eq!(
            endpoint.url_for("/_bulk_docs"),
            "http://localhost:4984/todos/_bulk_docs"
        );
    }

    #[test]
    fn test_endpoint_rejects_malformed() {
        for raw in ["", "   ", "http://", "http://localhost:4984", "http://host/db?x=1"] {
            let err = Endpoint::parse(raw).unwrap_err();
            assert!(
                matches!(err, ReplicationError::Configuration(_)),
                "{} gave {:?}",
                raw,
                err
            );
        }
    }

    #[test]
    fn test_credentials_validation_and_debug() {
        assert!(Credentials::new("", "pw").is_err());
        assert!(Credentials::new("sam", "").is_err());

        let creds = Credentials::new("sam", "hunter2").unwrap();
        assert_eq!(creds.username(), "sam");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("sam"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_from_sync_config() {
        let config = ReplicatorConfig::from_sync_config(&sync_config()).unwrap();
        assert_eq!(config.endpoint.as_str(), "https://gateway.example.com:4984/todos");
        assert!(config.continuous);
        assert_eq!(config.replicator_type, ReplicatorType::PushAndPull);
        assert_eq!(config.heartbeat, Duration::from_secs(150));
        assert!(!config.one_shot().continuous);
    }

    #[test]
    fn test_missing_values_are_configuration_errors() {
        let mut sync = sync_config();
        sync.url = None;
        let err = ReplicatorConfig::from_sync_config(&sync).unwrap_err();
        assert!(err.to_string().contains("TODOS_SYNC_URL"));

        let mut sync = sync_config();
        sync.username = None;
        assert!(matches!(
            ReplicatorConfig::from_sync_config(&sync),
            Err(ReplicationError::Configuration(_))
        ));

        let mut sync = sync_config();
        sync.password = None;
        assert!(matches!(
            ReplicatorConfig::from_sync_config(&sync),
            Err(ReplicationError::Configuration(_))
        ));
    }

    #[test]
    fn test_checkpoint_key_depends_on_endpoint() {
        let a = Endpoint::parse("http://a/todos").unwrap();
        let b = Endpoint::parse("http://b/todos").unwrap();
        assert_ne!(a.checkpoint_key(), b.checkpoint_key());
    }
}
