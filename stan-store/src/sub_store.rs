use async_trait::async_trait;
use stan_gax::StanError;
use stan_types::{Subscription, SubscriptionId};

/// Per-channel subscription and pending-ack persistence.
#[async_trait]
pub trait SubStore: Send + Sync {
    /// Assigns `sub.id` if it is zero, persists it, and enforces
    /// `MaxSubscriptions` (channel-specific overrides win over the
    /// store-wide limit).
    async fn create_sub(&self, sub: &mut Subscription) -> Result<(), StanError>;

    async fn update_sub(&self, sub: &Subscription) -> Result<(), StanError>;

    /// Soft-deletes the row (its id is never reassigned) and clears its
    /// pending-ack rows in the same atomic step.
    async fn delete_sub(&self, sub_id: SubscriptionId) -> Result<(), StanError>;

    async fn add_seq_pending(&self, sub_id: SubscriptionId, seq: u64) -> Result<(), StanError>;

    async fn ack_seq_pending(&self, sub_id: SubscriptionId, seq: u64) -> Result<(), StanError>;

    async fn flush(&self) -> Result<(), StanError>;
}
