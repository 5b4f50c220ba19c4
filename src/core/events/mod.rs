pub mod broadcaster;
pub mod hub;
pub mod log_buffer;

pub use broadcaster::{EventBroadcaster, Payload, StreamConnection, StreamMessage};
pub use hub::{Hub, Subscription};
pub use log_buffer::{LogBuffer, LogEvent, LOG_BUFFER_CAPACITY};
