use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trade_copilot::application::handlers::{router, AppState};
use trade_copilot::application::services::broadcaster::EventBroadcaster;
use trade_copilot::application::services::connection_registry::ConnectionManager;
use trade_copilot::application::services::scoring_service::ScoringService;
use trade_copilot::application::services::trade_processor::TradeProcessor;
use trade_copilot::auth::{ApiKeys, AuthState, JwtAuth};
use trade_copilot::config::{AppConfig, BrokerMode};
use trade_copilot::domain::repositories::broker_client::BrokerClient;
use trade_copilot::domain::repositories::economic_calendar::StaticCalendar;
use trade_copilot::domain::services::scoring::HeuristicScorer;
use trade_copilot::infrastructure::metaapi_client::MetaApiClient;
use trade_copilot::infrastructure::simulated_broker::SimulatedBroker;
use trade_copilot::persistence::init_database_with;
use trade_copilot::persistence::repository::AccountLinkRepository;
use trade_copilot::rate_limit::create_rate_limiter;
use trade_copilot::secrets::{load_jwt_secret, load_provider_token};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        // a missing .env is normal outside development
        eprintln!("No .env loaded: {}", e);
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trade_copilot=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Trade Copilot starting...");

    let config = AppConfig::from_env();
    config.validate()?;

    let pool = init_database_with(&config.database).await?;
    info!("Database ready at {}", config.database.url);

    let broker: Arc<dyn BrokerClient> = match config.broker.mode {
        BrokerMode::MetaApi => {
            let token = load_provider_token()?;
            Arc::new(MetaApiClient::new(&config.broker, token)?)
        }
        BrokerMode::Simulated => {
            warn!("Using the simulated broker; no real accounts will be streamed");
            Arc::new(SimulatedBroker::new())
        }
    };
    info!("Broker adapter: {}", broker.name());

    let scoring = ScoringService::new(
        Arc::new(HeuristicScorer::new()),
        config.scoring.retry.clone(),
        config.scoring.attempt_timeout,
    );
    let broadcaster = Arc::new(EventBroadcaster::new(config.processor.subscriber_capacity));
    let calendar = match &config.processor.calendar_file {
        Some(path) => StaticCalendar::load(path)?,
        None => {
            warn!("ECONOMIC_CALENDAR_FILE not set, news risk will not be flagged");
            StaticCalendar::default()
        }
    };
    info!("Economic calendar holds {} event(s)", calendar.len());
    let processor = TradeProcessor::new(
        pool.clone(),
        scoring,
        Arc::new(calendar),
        broadcaster,
        config.processor.clone(),
    );

    let connections = Arc::new(ConnectionManager::new(
        broker,
        processor.clone(),
        AccountLinkRepository::new(pool.clone()),
        config.supervisor.clone(),
        config.reconciliation.clone(),
    ));

    let jwt = Arc::new(JwtAuth::new(&load_jwt_secret()?));
    let auth = AuthState {
        api_keys: Arc::new(ApiKeys::from_env()?),
        jwt: jwt.clone(),
    };
    let limiter = create_rate_limiter(config.server.requests_per_minute);

    let state = AppState {
        processor: processor.clone(),
        connections: connections.clone(),
        jwt,
    };
    let app = router(state, auth, limiter, config.server.max_body_bytes);

    // Restart supervision for every stored link
    let resumer = connections.clone();
    tokio::spawn(async move {
        let resumed = resumer.resume_all().await;
        info!("Resumed {} linked account(s)", resumed);
    });

    let addr = config.server.bind_address();
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started. Press Ctrl+C to stop.");
    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Server shutting down gracefully...");

    let grace = processor.shutdown_grace();
    connections.shutdown(grace).await;
    processor.shutdown(grace).await;
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}
