use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of transition recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Opened,
    Closed,
    Modified,
    ScoreUpdate,
    BehavioralFlag,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Opened => "opened",
            AuditEventType::Closed => "closed",
            AuditEventType::Modified => "modified",
            AuditEventType::ScoreUpdate => "score_update",
            AuditEventType::BehavioralFlag => "behavioral_flag",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opened" => Ok(AuditEventType::Opened),
            "closed" => Ok(AuditEventType::Closed),
            "modified" => Ok(AuditEventType::Modified),
            "score_update" => Ok(AuditEventType::ScoreUpdate),
            "behavioral_flag" => Ok(AuditEventType::BehavioralFlag),
            other => Err(format!("Unknown audit event type: {}", other)),
        }
    }
}

/// Append-only audit row. Never updated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub trade_id: String,
    pub user_id: String,
    pub event_type: AuditEventType,
    pub payload: serde_json::Value,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit row about to be written
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub trade_id: String,
    pub user_id: String,
    pub event_type: AuditEventType,
    pub payload: serde_json::Value,
    pub note: Option<String>,
}

impl NewAuditEntry {
    pub fn new(
        trade_id: &str,
        user_id: &str,
        event_type: AuditEventType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            trade_id: trade_id.to_string(),
            user_id: user_id.to_string(),
            event_type,
            payload,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trips_through_str() {
        for kind in [
            AuditEventType::Opened,
            AuditEventType::Closed,
            AuditEventType::Modified,
            AuditEventType::ScoreUpdate,
            AuditEventType::BehavioralFlag,
        ] {
            assert_eq!(kind.as_str().parse::<AuditEventType>().unwrap(), kind);
        }
        assert!("deleted".parse::<AuditEventType>().is_err());
    }
}
