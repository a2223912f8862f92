//! Data model shared by every store back-end and by `stan-broker`.
//!
//! Types here carry no I/O: they are the rows/records the store persists
//! and the broker keeps in memory, plus the small set of constructors that
//! enforce the invariants the store and broker both rely on (e.g. a
//! `ClientId` cannot be empty or contain whitespace).

pub mod channel;
pub mod client;
pub mod limits;
pub mod message;
pub mod server_info;
pub mod subject;
pub mod subscription;

pub use channel::{Channel, ChannelId};
pub use client::{Client, ClientId};
pub use limits::Limits;
pub use message::Message;
pub use server_info::ServerInfo;
pub use subscription::{PendingAck, QueueGroup, StartPosition, Subscription, SubscriptionId, SubscriptionState};
