use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use access::{
    AppState, Collaborators,
    config::{AppConfig, StorageBackend},
    create_router,
    identity::GoogleIdTokenVerifier,
    otp::{
        OtpSenders,
        sender::{HttpEmailSender, HttpSmsSender, LogSender, OtpSender},
    },
    payment::gateway::HttpPaymentGateway,
    store::{MemoryStore, PgStore, Store},
    sweeper,
};
use common::{
    cache::{RedisConfig, RedisPool},
    database::{DatabaseConfig, health_check, init_pool},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting access service");

    let config = AppConfig::from_env()?;

    let store: Arc<dyn Store> = match config.storage {
        StorageBackend::Postgres => {
            let db_config = DatabaseConfig::from_env()?;
            let pool = init_pool(&db_config).await?;

            if health_check(&pool).await? {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }

            let store = PgStore::new(pool);
            store.migrate().await?;
            Arc::new(store)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; all data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let redis = RedisPool::new(&RedisConfig::from_env())?;
    if !redis.health_check().await.unwrap_or(false) {
        warn!("Redis is not reachable; the Google redirect flow will fail until it is");
    }

    let email: Arc<dyn OtpSender> = match config.senders.email.clone() {
        Some(email) => Arc::new(HttpEmailSender::new(email)?),
        None => {
            warn!("No email API configured, OTP codes go to the debug log");
            Arc::new(LogSender)
        }
    };
    let sms: Arc<dyn OtpSender> = match config.senders.sms.clone() {
        Some(sms) => Arc::new(HttpSmsSender::new(sms)?),
        None => {
            warn!("No SMS API configured, OTP codes go to the debug log");
            Arc::new(LogSender)
        }
    };

    let collaborators = Collaborators {
        store: store.clone(),
        senders: OtpSenders { email, sms },
        gateway: Arc::new(HttpPaymentGateway::new(&config.payment)?),
        identity: Arc::new(GoogleIdTokenVerifier::new(&config.google)),
        redis,
    };

    let app_state = AppState::new(&config, collaborators)?;

    let _sweeper = sweeper::start(store, &config.sweep_schedule).await?;

    info!("Access service initialized successfully");

    // Start the web server
    let app = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Access service listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
