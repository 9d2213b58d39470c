//! In-process typed publish/subscribe

pub mod bus;
pub mod types;

pub use bus::{EventBus, Subscription, create_event_bus};
pub use types::{Event, EventPayload};
