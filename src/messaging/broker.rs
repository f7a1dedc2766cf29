use crate::config::MessageBrokerConfig;
use crate::error::Error;
use crate::messaging::event::{EventMessage, EventType};
use anyhow::Result;
use async_trait::async_trait;
use deadpool_lapin::{Config, Manager, Pool};
use futures_util::stream::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ConnectionProperties, Consumer, ExchangeKind,
};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Callback function type for event handling
pub type EventCallback = Arc<dyn Fn(EventMessage) -> Result<()> + Send + Sync>;

/// Sink for platform events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EventMessage) -> Result<()>;
}

/// RabbitMQ message broker implementation
pub struct MessageBroker {
    pool: Pool,
    config: MessageBrokerConfig,
    subscriptions: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    /// Default channel
    channel: Arc<Mutex<Option<Channel>>>,
}

impl MessageBroker {
    /// Create a new message broker and declare its exchange
    pub async fn new(config: MessageBrokerConfig) -> Result<Self> {
        let pool_config = Config {
            url: Some(config.uri.clone()),
            pool: Some(deadpool_lapin::PoolConfig {
                max_size: config.pool_size as usize,
                queue_mode: deadpool::managed::QueueMode::Fifo,
                timeouts: deadpool::managed::Timeouts {
                    wait: Some(Duration::from_millis(config.timeout_ms)),
                    create: Some(Duration::from_millis(config.timeout_ms)),
                    recycle: Some(Duration::from_millis(config.timeout_ms)),
                },
            }),
            connection_properties: ConnectionProperties::default(),
        };
        let pool = pool_config
            .create_pool(Some(deadpool_lapin::Runtime::Tokio1))
            .map_err(|e| Error::Config(format!("Invalid RabbitMQ pool configuration: {}", e)))?;

        let broker = Self {
            pool,
            config,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            channel: Arc::new(Mutex::new(None)),
        };
        broker.init().await?;

        Ok(broker)
    }

    async fn init(&self) -> Result<()> {
        let channel = self.get_channel().await?;

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Service(format!("Failed to declare exchange: {}", e)))?;

        info!("RabbitMQ message broker initialized on exchange {}", self.config.exchange);
        Ok(())
    }

    /// Get a connection from the pool with retry
    async fn get_connection(&self) -> Result<deadpool::managed::Object<Manager>> {
        let mut attempts = 0;
        let max_attempts = self.config.retry_attempts.max(1);

        loop {
            attempts += 1;
            match self.pool.get().await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    if attempts >= max_attempts {
                        return Err(Error::Service(format!(
                            "Failed to get RabbitMQ connection after {} attempts: {}",
                            attempts, err
                        ))
                        .into());
                    }

                    warn!(
                        "Failed to get RabbitMQ connection (attempt {}/{}): {}",
                        attempts, max_attempts, err
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }
        }
    }

    /// Get the default channel or create a new one
    async fn get_channel(&self) -> Result<Channel> {
        let mut channel_guard = self.channel.lock().await;

        if let Some(channel) = &*channel_guard {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let conn = self.get_connection().await?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| Error::Service(format!("Failed to create RabbitMQ channel: {}", e)))?;

        *channel_guard = Some(channel.clone());
        Ok(channel)
    }

    async fn create_consumer_queue(&self, pattern: &str) -> Result<Consumer> {
        let channel = self.get_channel().await?;
        let queue_name = format!("firewatch.{}.{}", pattern.replace('.', "_"), Uuid::new_v4());

        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Service(format!("Failed to declare queue: {}", e)))?;

        channel
            .queue_bind(
                &queue_name,
                &self.config.exchange,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Service(format!("Failed to bind queue: {}", e)))?;

        debug!("Created queue: {} for pattern: {}", queue_name, pattern);

        let consumer = channel
            .basic_consume(
                &queue_name,
                &format!("consumer-{}", Uuid::new_v4()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Service(format!("Failed to create consumer: {}", e)))?;

        Ok(consumer)
    }

    /// Consume events of one type, e.g. to feed an external dashboard
    pub async fn subscribe(&self, event_type: EventType, callback: EventCallback) -> Result<String> {
        self.subscribe_pattern(&event_type.to_string(), callback).await
    }

    /// Consume events whose routing key matches a topic pattern
    pub async fn subscribe_pattern(&self, pattern: &str, callback: EventCallback) -> Result<String> {
        let mut consumer = self.create_consumer_queue(pattern).await?;
        let subscription_id = Uuid::new_v4().to_string();
        let subscription = subscription_id.clone();
        let pattern = pattern.to_string();

        let handle = tokio::spawn(async move {
            info!("Started consumer for pattern: {} (subscription: {})", pattern, subscription);

            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        error!("Error receiving message: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };

                match serde_json::from_slice::<EventMessage>(&delivery.data) {
                    Ok(event) => {
                        debug!("Received event: {} ({})", event.event_type, event.id);
                        if let Err(e) = callback(event) {
                            error!("Error processing event: {}", e);
                        }
                    }
                    Err(e) => error!("Failed to parse event message: {}", e),
                }

                // Always ack, a poison message must not block the queue
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!("Failed to acknowledge message: {}", e);
                }
            }

            info!("Consumer stopped for pattern: {} (subscription: {})", pattern, subscription);
        });

        self.subscriptions.write().await.insert(subscription_id.clone(), handle);
        Ok(subscription_id)
    }

    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        match self.subscriptions.write().await.remove(subscription_id) {
            Some(handle) => {
                handle.abort();
                info!("Unsubscribed: {}", subscription_id);
                Ok(())
            }
            None => Err(Error::NotFound(format!("Subscription not found: {}", subscription_id)).into()),
        }
    }
}

#[async_trait]
impl EventPublisher for MessageBroker {
    async fn publish(&self, event: EventMessage) -> Result<()> {
        let message = serde_json::to_vec(&event)
            .map_err(|e| Error::Serialization(format!("Failed to encode event: {}", e)))?;
        let channel = self.get_channel().await?;
        let routing_key = event.routing_key();

        channel
            .basic_publish(
                &self.config.exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &message,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| Error::Service(format!("Failed to publish message: {}", e)))?;

        debug!("Published event: {} with routing key: {}", event.id, routing_key);
        Ok(())
    }
}

/// Create a message broker service
pub async fn create_message_broker(config: MessageBrokerConfig) -> Result<Arc<MessageBroker>> {
    Ok(Arc::new(MessageBroker::new(config).await?))
}
