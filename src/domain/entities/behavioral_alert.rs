use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Behavioral flag raised against a trade at open time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralAlert {
    pub flag: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl BehavioralAlert {
    pub fn new(flag: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            flag: flag.to_string(),
            severity,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_alert_serializes_lowercase_severity() {
        let alert = BehavioralAlert::new("overtrading", Severity::High, "Too many trades")
            .with_details(serde_json::json!({ "today_count": 6 }));
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["severity"], "high");
        assert_eq!(json["details"]["today_count"], 6);
    }
}
