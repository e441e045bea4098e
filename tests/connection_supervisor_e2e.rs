//! Connection supervisor end-to-end tests
//!
//! A simulated broker stands in for the provider. Positions are opened,
//! modified and closed on the broker side and the tests wait for the
//! supervisor to carry them into the trade store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use trade_copilot::application::actors::connection_supervisor::ConnectStatus;
use trade_copilot::application::services::connection_registry::{ConnectionManager, LinkDetails};
use trade_copilot::application::services::trade_processor::TradeProcessor;
use trade_copilot::config::{ReconciliationConfig, SupervisorConfig};
use trade_copilot::domain::entities::account_link::ConnectionPhase;
use trade_copilot::domain::entities::trade::TradeStatus;
use trade_copilot::domain::repositories::broker_client::BrokerError;
use trade_copilot::infrastructure::simulated_broker::{SimStep, SimulatedBroker};
use trade_copilot::persistence::repository::AccountLinkRepository;

async fn setup() -> (SimulatedBroker, TradeProcessor, ConnectionManager) {
    setup_with(common::fast_supervisor()).await
}

async fn setup_with(supervisor: SupervisorConfig) -> (SimulatedBroker, TradeProcessor, ConnectionManager) {
    let broker = SimulatedBroker::new();
    let processor = common::processor().await;
    let links = AccountLinkRepository::new(processor.trades().pool().clone());
    let manager = ConnectionManager::new(
        Arc::new(broker.clone()),
        processor.clone(),
        links,
        supervisor,
        ReconciliationConfig::default(),
    );
    (broker, processor, manager)
}

#[tokio::test]
async fn test_position_lifecycle_flows_into_trades() {
    let (broker, processor, manager) = setup().await;

    let response = manager
        .connect("u1", "acc-1", LinkDetails::default())
        .await
        .unwrap();
    assert_eq!(response.status, ConnectStatus::Streaming);

    broker.open_position("acc-1", common::eurusd_position("P1"));
    let trade = common::wait_for_open(&processor, "u1", "P1").await;
    assert_eq!(trade.account_id.as_deref(), Some("acc-1"));
    assert_eq!(trade.stop_loss, Some(1.082));

    assert!(broker.modify_position("acc-1", "P1", Some(1.084), Some(1.095)));
    let modified = common::wait_for_trade(&processor, &trade.id, |t| {
        t.stop_loss == Some(1.084)
    })
    .await;
    assert_eq!(modified.take_profit, Some(1.095));

    assert!(broker.close_position("acc-1", "P1", 1.0905, Some(55.0)));
    let closed = common::wait_for_trade(&processor, &trade.id, |t| {
        t.status == TradeStatus::Closed
    })
    .await;
    assert_eq!(closed.exit_price, Some(1.0905));
    assert_eq!(closed.pnl, Some(55.0));

    manager.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_close_without_deal_uses_last_known_state() {
    let (broker, processor, manager) = setup().await;
    manager
        .connect("u1", "acc-1", LinkDetails::default())
        .await
        .unwrap();

    broker.open_position("acc-1", common::eurusd_position("P2"));
    let trade = common::wait_for_open(&processor, "u1", "P2").await;

    assert!(broker.close_position("acc-1", "P2", 1.086, None));
    let closed = common::wait_for_trade(&processor, &trade.id, |t| {
        t.status == TradeStatus::Closed
    })
    .await;
    // last snapshot carried current_price 1.086 and profit 10.0
    assert_eq!(closed.exit_price, Some(1.086));
    assert_eq!(closed.pnl, Some(10.0));

    manager.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_lost_session_reconnects_and_keeps_streaming() {
    let (broker, processor, manager) = setup().await;
    manager
        .connect("u1", "acc-1", LinkDetails::default())
        .await
        .unwrap();
    assert_eq!(broker.sessions_opened(), 1);

    broker.drop_sessions("acc-1");
    for _ in 0..300 {
        if broker.sessions_opened() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(broker.sessions_opened() >= 2);

    broker.open_position("acc-1", common::eurusd_position("P3"));
    common::wait_for_open(&processor, "u1", "P3").await;

    manager.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_reconciliation_closes_rows_missing_on_connect() {
    let (broker, processor, manager) = setup().await;

    // left OPEN by an earlier run, position gone while nobody was watching
    let stale = processor
        .process_opened(
            "u1",
            trade_copilot::domain::entities::trade_event::OpenedTrade::from_position(
                "acc-1",
                &common::eurusd_position("P4"),
            ),
        )
        .await
        .unwrap();

    manager
        .connect("u1", "acc-1", LinkDetails::default())
        .await
        .unwrap();

    let closed = common::wait_for_trade(&processor, &stale.id, |t| {
        t.status == TradeStatus::Closed
    })
    .await;
    assert_eq!(closed.exit_price, Some(closed.entry_price));

    manager.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_disconnect_stops_streaming_and_unlinks() {
    let (broker, processor, manager) = setup().await;
    manager
        .connect("u1", "acc-1", LinkDetails::default())
        .await
        .unwrap();
    assert!(broker.is_deployed("acc-1"));

    assert!(manager.disconnect("u1", "acc-1").await.unwrap());
    assert!(!broker.is_deployed("acc-1"));
    assert_eq!(manager.active_count().await, 0);
    assert!(manager.status("u1", "acc-1").await.is_err());

    broker.open_position("acc-1", common::eurusd_position("P5"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(processor.open_trades("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_supervisor_gives_up_then_reconnects_on_request() {
    let (broker, processor, manager) = setup_with(SupervisorConfig {
        max_reconnect_attempts: 2,
        heartbeat_freshness: Duration::from_millis(1),
        ..common::fast_supervisor()
    })
    .await;
    manager
        .connect("u1", "acc-1", LinkDetails::default())
        .await
        .unwrap();

    broker.fail_next(
        SimStep::Deploy,
        1000,
        BrokerError::Unavailable("maintenance".to_string()),
    );
    broker.drop_sessions("acc-1");

    let mut status = manager.status("u1", "acc-1").await.unwrap();
    for _ in 0..300 {
        if status.phase == ConnectionPhase::Disconnected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = manager.status("u1", "acc-1").await.unwrap();
    }
    assert_eq!(status.phase, ConnectionPhase::Disconnected);
    assert_eq!(status.reconnect_attempts, 3);
    assert!(status.last_error.is_some());
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(!manager.status("u1", "acc-1").await.unwrap().connected);

    // no further attempts once given up
    let calls = broker.deploy_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.deploy_calls(), calls);

    broker.clear_failures();
    let response = manager
        .connect("u1", "acc-1", LinkDetails::default())
        .await
        .unwrap();
    assert_eq!(response.status, ConnectStatus::Streaming);

    broker.open_position("acc-1", common::eurusd_position("P6"));
    common::wait_for_open(&processor, "u1", "P6").await;

    manager.shutdown(Duration::from_secs(1)).await;
}
