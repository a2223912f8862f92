//! The pluggable store contract (§4.A). Two back-ends implement these
//! traits: `stan-store-file` (append-only per-channel logs) and
//! `stan-store-sql` (a relational schema over `sqlx`). `stan-broker`
//! depends only on this crate, never on a concrete back-end.

pub mod message_store;
pub mod recovery;
pub mod server_store;
pub mod sub_store;

pub use message_store::MessageStore;
pub use recovery::{RecoveredChannel, RecoveredState};
pub use server_store::{ChannelStores, ServerStore};
pub use sub_store::SubStore;
