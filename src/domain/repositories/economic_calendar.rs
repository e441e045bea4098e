//! Economic calendar lookup used by the news-risk detector

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("Cannot read calendar file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed calendar: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventImpact {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicEvent {
    pub title: String,
    pub currency: String,
    pub impact: EventImpact,
    pub time: DateTime<Utc>,
}

#[async_trait]
pub trait EconomicCalendar: Send + Sync {
    /// Events scheduled within `window` of `around`, in either direction
    async fn events_near(&self, around: DateTime<Utc>, window: Duration) -> Vec<EconomicEvent>;
}

/// Fixed list of events, loaded at startup.
///
/// The list is read once from a JSON array of events
/// (`[{"title", "currency", "impact", "time"}]`). Without a file the
/// calendar is empty and news risk is never raised.
#[derive(Debug, Clone, Default)]
pub struct StaticCalendar {
    events: Vec<EconomicEvent>,
}

impl StaticCalendar {
    pub fn new(events: Vec<EconomicEvent>) -> Self {
        Self { events }
    }

    pub fn from_json(raw: &str) -> Result<Self, CalendarError> {
        Ok(Self::new(serde_json::from_str(raw)?))
    }

    pub fn load(path: &Path) -> Result<Self, CalendarError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CalendarError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EconomicCalendar for StaticCalendar {
    async fn events_near(&self, around: DateTime<Utc>, window: Duration) -> Vec<EconomicEvent> {
        self.events
            .iter()
            .filter(|e| (e.time - around).abs() <= window)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_calendar_window() {
        let now = Utc::now();
        let calendar = StaticCalendar::new(vec![
            EconomicEvent {
                title: "NFP".to_string(),
                currency: "USD".to_string(),
                impact: EventImpact::High,
                time: now + Duration::minutes(10),
            },
            EconomicEvent {
                title: "CPI".to_string(),
                currency: "EUR".to_string(),
                impact: EventImpact::High,
                time: now - Duration::hours(2),
            },
        ]);

        let events = calendar.events_near(now, Duration::minutes(15)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "NFP");
    }

    #[tokio::test]
    async fn test_calendar_loads_from_json() {
        let calendar = StaticCalendar::from_json(
            r#"[
                {"title": "FOMC", "currency": "USD", "impact": "critical", "time": "2026-03-18T18:00:00Z"},
                {"title": "PMI", "currency": "EUR", "impact": "medium", "time": "2026-03-18T09:00:00Z"}
            ]"#,
        )
        .unwrap();
        assert_eq!(calendar.len(), 2);

        let around = "2026-03-18T18:05:00Z".parse::<DateTime<Utc>>().unwrap();
        let events = calendar.events_near(around, Duration::minutes(15)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].impact, EventImpact::Critical);
    }

    #[test]
    fn test_calendar_rejects_bad_input() {
        assert!(matches!(
            StaticCalendar::from_json(r#"[{"title": "NFP"}]"#),
            Err(CalendarError::Parse(_))
        ));
        assert!(matches!(
            StaticCalendar::load(Path::new("/nonexistent/calendar.json")),
            Err(CalendarError::Io { .. })
        ));
    }
}
