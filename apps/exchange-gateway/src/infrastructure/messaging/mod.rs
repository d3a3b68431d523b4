//! Message bus adapters.

mod channel_publisher;

pub use channel_publisher::{BusMessage, SerializedChannelPublisher};
