use anyhow::Result;
use clap::Parser;
use firewatch::api::{AppState, RestApi};
use firewatch::config;
use firewatch::db::repositories::{
    alerts::AlertsRepository, notifications::NotificationsRepository, sequences::SequencesRepository,
    webhooks::WebhooksRepository,
};
use firewatch::db::DatabaseService;
use firewatch::messaging::{self, SequenceEvents};
use firewatch::security::auth::AuthService;
use firewatch::security::SecurityService;
use firewatch::services::channels::{self, Channels};
use firewatch::services::{storage, AlertService, NotificationDispatcher, SequenceAggregator, WebhookNotifier};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Wildfire detection backend
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML or JSON configuration file
    #[arg(short, long, env = "FIREWATCH_CONFIG")]
    config: Option<PathBuf>,
}

async fn run_app() -> Result<()> {
    let args = Args::parse();
    let mut config = config::load_config(args.config.as_deref())?;
    config.apply_env();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.api.log_level.as_str()))
        .init();
    info!("Starting firewatch {}", env!("CARGO_PKG_VERSION"));

    let database = DatabaseService::new(&config.database).await?;
    let db_pool = database.pool.clone();

    let security = Arc::new(SecurityService::new(config.security.clone()));
    let auth_service = Arc::new(AuthService::new(db_pool.clone(), security.clone()));
    let superadmin_org = auth_service.bootstrap_superadmin().await?;

    let events = if config.message_broker.enabled {
        match messaging::broker::create_message_broker(config.message_broker.clone()).await {
            Ok(broker) => {
                info!("Message broker initialized");
                SequenceEvents::new(broker)
            }
            Err(e) => {
                warn!("Message broker unavailable, events are disabled: {}", e);
                SequenceEvents::disabled()
            }
        }
    } else {
        SequenceEvents::disabled()
    };
    events.system_startup().await;

    let send_timeout = Duration::from_secs(config.notifications.timeout_secs);
    let channels = Arc::new(Channels::from_config(&config.channels, send_timeout)?);
    let dispatcher = Arc::new(NotificationDispatcher::new(
        channels.clone(),
        Arc::new(NotificationsRepository::new(db_pool.clone())),
        &config.notifications,
        events.clone(),
    ));

    let sequences = Arc::new(SequencesRepository::new(db_pool.clone()));
    let aggregator = Arc::new(SequenceAggregator::new(sequences.clone(), &config.sequences, events.clone()));
    let alerts = Arc::new(AlertService::new(
        Arc::new(AlertsRepository::new(db_pool.clone())),
        sequences,
        dispatcher,
        &config.notifications,
        events.clone(),
    ));
    let sweeper = alerts.clone().start_sweeper();
    let webhooks = Arc::new(WebhookNotifier::new(
        channels::http_client(send_timeout)?,
        Arc::new(WebhooksRepository::new(db_pool.clone())),
    ));

    let bucket = storage::from_config(&config.storage, security.clone())?;

    let state = AppState {
        db_pool,
        security,
        auth_service,
        aggregator,
        alerts,
        webhooks,
        channels,
        bucket,
        overlap: config.overlap.clone(),
        unlabeled_lookback: chrono::Duration::hours(config.sequences.unlabeled_lookback_hours),
        media_url_ttl: chrono::Duration::seconds(config.storage.url_expiration_secs as i64),
        superadmin_org: Some(superadmin_org.id),
    };

    let http_server = RestApi::new(&config.api, state);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down...");
    };
    http_server.run(shutdown).await?;

    sweeper.abort();
    events.system_shutdown().await;

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("firewatch failed: {:#}", e);
        std::process::exit(1);
    }
}
