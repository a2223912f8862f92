//! Channel state (§4.B), the subscription state machine (§4.C), the client
//! registry (§4.D), dispatch (§4.E), the expiration engine (§4.F), and the
//! recovery orchestrator (§4.G) for a persistent, at-least-once pub/sub
//! broker. This crate owns delivery and lifecycle state; it is deliberately
//! ignorant of the wire protocol that carries requests in and acks out —
//! that boundary is the [`Publisher`] trait.

pub mod broker;
pub mod channel;
pub mod client_registry;
pub mod config;
pub mod dispatch;
pub mod expiration;
pub mod recovery;
pub mod subscription;
pub mod transport;

pub use broker::Broker;
pub use channel::{ChannelDirectory, ChannelState, QueueGroupRuntime, SubHandle};
pub use client_registry::ClientRegistry;
pub use config::{BrokerOptions, SubscribeRequest};
pub use transport::Publisher;
