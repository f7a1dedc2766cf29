pub mod alerting;
pub mod channels;
pub mod cones;
pub mod notifications;
pub mod overlap;
pub mod sequences;
pub mod storage;
pub mod templates;
pub mod webhooks;

pub use alerting::AlertService;
pub use notifications::NotificationDispatcher;
pub use sequences::SequenceAggregator;
pub use webhooks::WebhookNotifier;
