use crate::domain::repositories::broker_client::BrokerError;
use crate::persistence::DatabaseError;
use thiserror::Error;

/// Errors surfaced by the trade processor to its immediate caller
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Invalid trade event: {0}")]
    InvalidInput(String),

    #[error("Trade not found: {0}")]
    TradeNotFound(String),

    #[error("Trade already closed: {0}")]
    AlreadyClosed(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] DatabaseError),
}

impl ProcessingError {
    /// Errors the caller can fix by changing its request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ProcessingError::InvalidInput(_)
                | ProcessingError::TradeNotFound(_)
                | ProcessingError::AlreadyClosed(_)
        )
    }
}

/// Errors from a scoring backend. Never reach the processor's callers.
#[derive(Debug, Clone, Error)]
pub enum ScoringError {
    #[error("Scorer unavailable: {0}")]
    Unavailable(String),

    #[error("Scorer timed out after {0}ms")]
    Timeout(u64),

    #[error("Invalid scorer response: {0}")]
    InvalidResponse(String),
}

/// Errors from account connection management
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Account {0} is not linked")]
    NotLinked(String),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] DatabaseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_display() {
        let err = ProcessingError::InvalidInput("missing external id".to_string());
        assert_eq!(err.to_string(), "Invalid trade event: missing external id");
        assert!(err.is_client_error());

        let err = ProcessingError::from(DatabaseError::QueryError("locked".to_string()));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_scoring_error_display() {
        assert_eq!(
            ScoringError::Timeout(1500).to_string(),
            "Scorer timed out after 1500ms"
        );
    }
}
