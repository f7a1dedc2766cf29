pub mod broker;
pub mod event;
pub mod sequence_events;

pub use broker::{EventPublisher, MessageBroker};
pub use event::{EventMessage, EventType};
pub use sequence_events::SequenceEvents;
