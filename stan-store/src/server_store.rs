use std::sync::Arc;

use async_trait::async_trait;
use stan_gax::StanError;
use stan_types::{Channel, Client, ClientId, Limits, ServerInfo};

use crate::message_store::MessageStore;
use crate::recovery::RecoveredState;
use crate::sub_store::SubStore;

/// The `MessageStore` and `SubStore` pair backing one channel, returned by
/// `create_channel` so callers never have to look the channel back up by
/// name to get at its stores.
#[derive(Clone)]
pub struct ChannelStores {
    pub channel: Channel,
    pub messages: Arc<dyn MessageStore>,
    pub subs: Arc<dyn SubStore>,
}

/// The top-level store: singleton server info, channel lifecycle, and
/// client persistence. Implemented by `stan-store-file::FileStore` and
/// `stan-store-sql::SqlStore`.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Persists `info` if the store is empty; otherwise compares it
    /// against the persisted row and fails on a `cluster_id` or
    /// unsupported-`version` mismatch.
    async fn init(&self, info: &ServerInfo) -> Result<(), StanError>;

    /// `None` iff the store has never been initialized.
    async fn recover(&self) -> Result<Option<RecoveredState>, StanError>;

    /// Idempotent: calling this twice with the same `name` returns the
    /// same `ChannelStores` rather than erroring. Enforces `MaxChannels`.
    async fn create_channel(&self, name: &str, limits: &Limits) -> Result<ChannelStores, StanError>;

    async fn add_client(&self, client: &Client) -> Result<(), StanError>;

    async fn delete_client(&self, id: &ClientId) -> Result<(), StanError>;

    async fn set_limits(&self, limits: &Limits) -> Result<(), StanError>;

    async fn close(&self) -> Result<(), StanError>;
}
