pub mod alerts;
pub mod cameras;
pub mod detections;
pub mod notifications;
pub mod organizations;
pub mod recipients;
pub mod sequences;
pub mod users;
pub mod webhooks;
