pub mod alert_models;
pub mod camera_models;
pub mod detection_models;
pub mod notification_models;
pub mod organization_models;
pub mod recipient_models;
pub mod sequence_models;
pub mod user_models;
pub mod webhook_models;

pub use alert_models::{Alert, AlertReason};
pub use camera_models::{Camera, NewCamera};
pub use detection_models::{Detection, NewDetection};
pub use notification_models::{NewNotification, Notification, NotificationStatus};
pub use organization_models::Organization;
pub use recipient_models::{ChannelKind, NewRecipient, Recipient};
pub use sequence_models::{PositionedSequence, Sequence, SequenceLabel};
pub use user_models::{User, UserRole};
pub use webhook_models::{NewWebhook, Webhook};
