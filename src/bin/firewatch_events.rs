use anyhow::Result;
use clap::Parser;
use firewatch::config;
use firewatch::messaging::broker::create_message_broker;
use firewatch::messaging::EventMessage;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

/// Print platform events as they are published
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(short, long, env = "FIREWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Routing-key pattern, e.g. `sequence.*` or `alert.#`
    #[arg(default_value = "#")]
    pattern: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = config::load_config(args.config.as_deref())?;
    config.apply_env();

    info!("Connecting to RabbitMQ at {}", config.message_broker.uri);
    let broker = match create_message_broker(config.message_broker.clone()).await {
        Ok(broker) => broker,
        Err(e) => {
            error!("Failed to connect to RabbitMQ at {}: {}", config.message_broker.uri, e);
            return Err(e);
        }
    };

    let subscription = broker
        .subscribe_pattern(
            &args.pattern,
            Arc::new(|event: EventMessage| {
                println!("{}", serde_json::to_string(&event)?);
                Ok(())
            }),
        )
        .await?;
    info!("Listening on {} ({})", args.pattern, subscription);

    tokio::signal::ctrl_c().await?;
    broker.unsubscribe(&subscription).await?;

    Ok(())
}
