//! Shared fixtures of the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use trade_copilot::application::services::broadcaster::EventBroadcaster;
use trade_copilot::application::services::scoring_service::ScoringService;
use trade_copilot::application::services::trade_processor::TradeProcessor;
use trade_copilot::config::{ProcessorConfig, SupervisorConfig};
use trade_copilot::domain::entities::position::Position;
use trade_copilot::domain::entities::trade::{Direction, Trade};
use trade_copilot::domain::repositories::economic_calendar::StaticCalendar;
use trade_copilot::domain::services::scoring::HeuristicScorer;
use trade_copilot::persistence::init_database;
use trade_copilot::task_runner::RetryPolicy;

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
    }
}

pub async fn processor() -> TradeProcessor {
    let pool = init_database("sqlite::memory:")
        .await
        .expect("in-memory database");
    let scoring = ScoringService::new(
        Arc::new(HeuristicScorer::new()),
        fast_retry(),
        Duration::from_secs(1),
    );
    TradeProcessor::new(
        pool,
        scoring,
        Arc::new(StaticCalendar::default()),
        Arc::new(EventBroadcaster::default()),
        ProcessorConfig::default(),
    )
}

pub fn fast_supervisor() -> SupervisorConfig {
    SupervisorConfig {
        poll_interval: Duration::from_millis(10),
        step_retry: fast_retry(),
        step_timeout: Duration::from_secs(1),
        heartbeat_every_cycles: 5,
        ..SupervisorConfig::default()
    }
}

pub fn eurusd_position(id: &str) -> Position {
    Position {
        id: id.to_string(),
        symbol: "EURUSD".to_string(),
        direction: Direction::Buy,
        open_price: 1.085,
        current_price: Some(1.086),
        stop_loss: Some(1.082),
        take_profit: Some(1.092),
        volume: 0.1,
        open_time: None,
        profit: Some(10.0),
    }
}

/// Poll the user's OPEN trades until one matches `external_id`
pub async fn wait_for_open(processor: &TradeProcessor, user_id: &str, external_id: &str) -> Trade {
    for _ in 0..300 {
        let open = processor.open_trades(user_id).await.expect("open trades");
        if let Some(trade) = open
            .into_iter()
            .find(|t| t.external_id.as_deref() == Some(external_id))
        {
            return trade;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("trade {} never opened", external_id);
}

/// Poll a trade row until `done` holds
pub async fn wait_for_trade<F>(processor: &TradeProcessor, trade_id: &str, done: F) -> Trade
where
    F: Fn(&Trade) -> bool,
{
    for _ in 0..300 {
        if let Some(trade) = processor.trades().get(trade_id).await.expect("trade lookup") {
            if done(&trade) {
                return trade;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("trade {} never reached the expected state", trade_id);
}
