//! HTTP and WebSocket surface tests
//!
//! Plain routes are driven in-process through `tower::ServiceExt`; the
//! WebSocket endpoint is served on a loopback port and reached with
//! tokio-tungstenite.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;
use zeroize::Zeroizing;

use trade_copilot::application::handlers::{router, AppState};
use trade_copilot::application::services::connection_registry::ConnectionManager;
use trade_copilot::application::services::trade_processor::TradeProcessor;
use trade_copilot::auth::{ApiKeys, AuthState, JwtAuth, USER_HEADER};
use trade_copilot::config::ReconciliationConfig;
use trade_copilot::domain::entities::trade::Direction;
use trade_copilot::domain::entities::trade_event::SimulatedOpen;
use trade_copilot::infrastructure::simulated_broker::SimulatedBroker;
use trade_copilot::persistence::repository::AccountLinkRepository;
use trade_copilot::rate_limit::create_rate_limiter;

const API_KEY: &str = "integration-test-key-0123456789abcdef";
const JWT_SECRET: &str = "integration-test-jwt-secret-0123456789abcdef";

struct TestApp {
    router: Router,
    processor: TradeProcessor,
    jwt: Arc<JwtAuth>,
}

async fn app() -> TestApp {
    let processor = common::processor().await;
    let connections = Arc::new(ConnectionManager::new(
        Arc::new(SimulatedBroker::new()),
        processor.clone(),
        AccountLinkRepository::new(processor.trades().pool().clone()),
        common::fast_supervisor(),
        ReconciliationConfig::default(),
    ));
    let jwt = Arc::new(JwtAuth::new(&Zeroizing::new(JWT_SECRET.to_string())));
    let auth = AuthState {
        api_keys: Arc::new(ApiKeys::new([API_KEY]).unwrap()),
        jwt: jwt.clone(),
    };
    let state = AppState {
        processor: processor.clone(),
        connections,
        jwt: jwt.clone(),
    };
    TestApp {
        router: router(state, auth, create_rate_limiter(1000), 64 * 1024),
        processor,
        jwt,
    }
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let app = app().await;
    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_connections"], 0);
}

#[tokio::test]
async fn test_api_requires_credentials() {
    let app = app().await;

    let anonymous = app
        .router
        .clone()
        .oneshot(Request::get("/api/trades/open").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let key_without_user = app
        .router
        .oneshot(
            Request::get("/api/trades/open")
                .header("Authorization", format!("Bearer {}", API_KEY))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(key_without_user.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_simulated_trade_over_http() {
    let app = app().await;
    let token = app.jwt.issue("u1", chrono::Duration::minutes(5)).unwrap();

    let opened = app
        .router
        .clone()
        .oneshot(
            Request::post("/api/trades/simulate/open")
                .header("Authorization", format!("Bearer {}", token))
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"symbol":"EURUSD","direction":"BUY","entry_price":1.1,"stop_loss":1.097,"size":0.1}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(opened.status(), StatusCode::CREATED);
    let trade = json_body(opened).await;
    let trade_id = trade["id"].as_str().unwrap().to_string();

    let closed = app
        .router
        .clone()
        .oneshot(
            Request::post(format!("/api/trades/{}/simulate/close", trade_id))
                .header("Authorization", format!("Bearer {}", API_KEY))
                .header(USER_HEADER, "u1")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"exit_price":1.103}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(closed.status(), StatusCode::OK);
    assert_eq!(json_body(closed).await["status"], "CLOSED");

    let foreign = app
        .router
        .oneshot(
            Request::get(format!("/api/trades/{}/history", trade_id))
                .header("Authorization", format!("Bearer {}", API_KEY))
                .header(USER_HEADER, "u2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

    app.processor.shutdown(Duration::from_secs(1)).await;
}

async fn serve(router: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn next_json<S>(stream: &mut S) -> serde_json::Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("frame before timeout")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_websocket_streams_user_events() {
    let app = app().await;
    let token = app.jwt.issue("u1", chrono::Duration::minutes(5)).unwrap();
    let addr = serve(app.router).await;

    let url = format!("ws://{}/ws/trades?token={}", addr, token);
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let greeting = next_json(&mut socket).await;
    assert_eq!(greeting["type"], "connected");
    assert_eq!(greeting["user_id"], "u1");

    socket.send(Message::Text("ping".to_string())).await.unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "pong");

    // events of another user never reach this socket
    app.processor
        .simulate_open(
            "u2",
            SimulatedOpen {
                symbol: "EURUSD".to_string(),
                direction: Direction::Buy,
                entry_price: 1.085,
                stop_loss: None,
                take_profit: None,
                size: 0.1,
                close_after_seconds: None,
            },
        )
        .await
        .unwrap();
    let mine = app
        .processor
        .simulate_open(
            "u1",
            SimulatedOpen {
                symbol: "XAUUSD".to_string(),
                direction: Direction::Sell,
                entry_price: 1850.0,
                stop_loss: Some(1860.0),
                take_profit: Some(1830.0),
                size: 1.0,
                close_after_seconds: None,
            },
        )
        .await
        .unwrap();

    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "trade_opened");
    assert_eq!(event["trade"]["id"], mine.id.as_str());
    assert_eq!(event["simulated"], true);

    socket.close(None).await.unwrap();
    app.processor.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_websocket_rejects_invalid_token() {
    let app = app().await;
    let addr = serve(app.router).await;

    let url = format!("ws://{}/ws/trades?token=not-a-jwt", addr);
    let result = tokio_tungstenite::connect_async(url).await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        other => panic!("expected an HTTP rejection, got {:?}", other.map(|_| ())),
    }
}
