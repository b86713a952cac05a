//! The `session` module manages one connection per configured broker.
//!
//! - [`Session`]: connect/reconnect, presence, subscriptions and inbound delivery.
//! - [`SessionConfig`]: the validated connection descriptor.
//! - [`Publisher`]: cloneable handle for acknowledged publishes.
//! - [`Message`]: the immutable inbound value handed to the dispatcher.

mod acks;
pub mod backoff;
pub mod config;
pub mod manager;
pub mod message;
pub mod publisher;
pub mod status;
mod tls;

pub use backoff::BackoffPolicy;
pub use config::{BrokerAddress, SessionConfig, TransportScheme};
pub use manager::{DISCONNECT_LINGER, Session};
pub use message::Message;
pub use publisher::{Publisher, effective_qos};
pub use status::{ConnectionState, Presence, StatusPayload, client_topic};

#[cfg(test)]
mod tests;
