//! Linked broker account and connection state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted link between a user and an external broker account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLink {
    pub user_id: String,
    pub account_id: String,
    /// Fingerprint of the credentials, never the raw password
    pub credentials_ref: Option<String>,
    pub platform: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Identifies one supervised (user, account) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey {
    pub user_id: String,
    pub account_id: String,
}

impl AccountKey {
    pub fn new(user_id: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            account_id: account_id.into(),
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.account_id)
    }
}

/// Phase of a connection supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Streaming,
    Degraded,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionPhase::Disconnected => "disconnected",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Streaming => "streaming",
            ConnectionPhase::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// In-memory state published by a supervisor. Only the supervisor writes it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            reconnect_attempts: 0,
            last_error: None,
        }
    }
}

/// An account counts as connected when its heartbeat is recent or its
/// supervisor is currently streaming.
pub fn is_connected(
    last_heartbeat: Option<DateTime<Utc>>,
    phase: ConnectionPhase,
    now: DateTime<Utc>,
    freshness: Duration,
) -> bool {
    if phase == ConnectionPhase::Streaming {
        return true;
    }
    match last_heartbeat {
        Some(beat) => now - beat <= freshness,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_heartbeat_reports_disconnected() {
        let now = Utc::now();
        let stale = Some(now - Duration::minutes(6));
        assert!(!is_connected(
            stale,
            ConnectionPhase::Disconnected,
            now,
            Duration::minutes(5)
        ));
        assert!(!is_connected(
            stale,
            ConnectionPhase::Degraded,
            now,
            Duration::minutes(5)
        ));
    }

    #[test]
    fn test_fresh_heartbeat_or_streaming_reports_connected() {
        let now = Utc::now();
        assert!(is_connected(
            Some(now - Duration::minutes(1)),
            ConnectionPhase::Disconnected,
            now,
            Duration::minutes(5)
        ));
        assert!(is_connected(
            None,
            ConnectionPhase::Streaming,
            now,
            Duration::minutes(5)
        ));
    }

    #[test]
    fn test_account_key_display() {
        assert_eq!(AccountKey::new("u1", "a1").to_string(), "u1:a1");
    }
}
