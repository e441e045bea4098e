//! Persistence Layer
//!
//! This module provides database persistence for trades, the per-trade audit
//! log, linked broker accounts and per-user trading rules.
//! Uses SQLite for local storage with async operations via sqlx.
//!
//! # Database Schema
//!
//! ## Trades Table
//! - id: UUID
//! - user_id / account_id: Owner and linked broker account (account may be null)
//! - external_id: Broker position id, or a `SIM-` id for simulated trades
//! - symbol, direction ("BUY" / "SELL"), entry_price, stop_loss, take_profit, size
//! - exit_price, pnl, pnl_r, duration_seconds, close_time: Set on close
//! - assessment / review / behavioral_flags: JSON
//! - status: "OPEN" or "CLOSED"
//!
//! ## Trade Logs Table
//! - id: Serial
//! - trade_id: Foreign key to trades
//! - event_type: opened, closed, modified, score_update, behavioral_flag
//! - payload: JSON details
//! - note: Optional free text
//!
//! ## Account Links Table
//! - (user_id, account_id): Primary key
//! - last_heartbeat: Liveness of the streaming connection
//!
//! ## Trading Rules Table
//! - user_id: Primary key
//! - limits used by the behavioral detectors

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Initialize the database connection pool with default pool settings
///
/// # Arguments
/// - `database_url`: Path to SQLite database file (e.g., "sqlite://data/trades.db")
///
/// # Errors
/// Returns error if database connection fails or migrations fail
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    init_database_with(&DatabaseConfig {
        url: database_url.to_string(),
        ..DatabaseConfig::default()
    })
    .await
}

/// Initialize the database connection pool from a [`DatabaseConfig`]
pub async fn init_database_with(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    let database_url = config.url.as_str();
    info!("Initializing database: {}", database_url);

    // Ensure data directory exists
    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let log_level = if config.log_queries {
        tracing::log::LevelFilter::Debug
    } else {
        tracing::log::LevelFilter::Off
    };
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .log_statements(log_level);

    // Every connection to an in-memory database sees its own empty database,
    // so the pool is pinned to one connection that never expires.
    let pool_options = if is_memory_url(database_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
    };

    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS account_links (
            user_id TEXT NOT NULL,
            account_id TEXT NOT NULL,
            credentials_ref TEXT,
            platform TEXT,
            last_heartbeat DATETIME,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (user_id, account_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create account_links table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            account_id TEXT,
            external_id TEXT,
            symbol TEXT NOT NULL,
            direction TEXT NOT NULL CHECK(direction IN ('BUY', 'SELL')),
            entry_price REAL NOT NULL,
            exit_price REAL,
            stop_loss REAL,
            take_profit REAL,
            size REAL NOT NULL,
            open_time DATETIME NOT NULL,
            close_time DATETIME,
            pnl REAL,
            pnl_r REAL,
            duration_seconds INTEGER,
            assessment TEXT,
            review TEXT,
            behavioral_flags TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL CHECK(status IN ('OPEN', 'CLOSED')),
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create trades table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trade_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trade_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            note TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (trade_id) REFERENCES trades(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create trade_logs table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trading_rules (
            user_id TEXT PRIMARY KEY,
            max_risk_percent REAL NOT NULL DEFAULT 2.0,
            min_risk_reward REAL NOT NULL DEFAULT 1.5,
            max_trades_per_day INTEGER NOT NULL DEFAULT 5,
            blocked_sessions TEXT NOT NULL DEFAULT '[]',
            min_minutes_between_trades INTEGER NOT NULL DEFAULT 10,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create trading_rules table: {}", e))
    })?;

    // Create indexes for better query performance
    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_trades_user_external ON trades(user_id, external_id)",
        "CREATE INDEX IF NOT EXISTS idx_trades_user_status ON trades(user_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_trades_user_open_time ON trades(user_id, open_time)",
        "CREATE INDEX IF NOT EXISTS idx_trades_account_status ON trades(account_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_trade_logs_trade ON trade_logs(trade_id, id)",
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/trades.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/trades.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://data/trades.db".to_string());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(cfg!(debug_assertions));

        Self {
            url,
            max_connections,
            log_queries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database("sqlite::memory:").await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations() {
        let pool = init_database("sqlite::memory:").await.unwrap();

        // Verify tables exist
        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('account_links', 'trades', 'trade_logs', 'trading_rules')"
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 4);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        assert!(run_migrations(&pool).await.is_ok());
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite://data/trades.db");
        assert_eq!(config.max_connections, 5);
        assert!(is_memory_url("sqlite::memory:"));
        assert!(!is_memory_url(&config.url));
    }
}
