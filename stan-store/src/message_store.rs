use async_trait::async_trait;
use stan_gax::StanError;
use stan_types::Message;

/// Per-channel durable message log. Every operation is scoped to the
/// channel the store was created for; there is no cross-channel method.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Assigns the next sequence, stamps `timestamp_ns = now`, sets
    /// `expiration_ns` when the channel has a `MaxAge`, and persists the
    /// record atomically before returning the assigned sequence.
    async fn store(&self, data: bytes::Bytes) -> Result<u64, StanError>;

    /// Returns `None` both when `seq` has never existed and when it has
    /// expired, even if the sweeper has not yet physically deleted it.
    async fn lookup(&self, seq: u64) -> Result<Option<Message>, StanError>;

    async fn first_msg(&self) -> Result<Option<Message>, StanError>;

    async fn last_msg(&self) -> Result<Option<Message>, StanError>;

    async fn first_sequence(&self) -> Result<u64, StanError>;

    async fn last_sequence(&self) -> Result<u64, StanError>;

    /// The smallest sequence whose `timestamp_ns >= ts_ns`, or
    /// `last_sequence() + 1` if none qualifies.
    async fn get_sequence_from_timestamp(&self, ts_ns: i64) -> Result<u64, StanError>;

    /// Deletes every message with `expiration_ns <= now_ns` and returns the
    /// new first sequence. Called by the expiration engine; back-ends may
    /// also use it to enforce `MaxMsgs`/`MaxBytes` by evicting the oldest
    /// messages regardless of age.
    async fn expire(&self, now_ns: i64) -> Result<u64, StanError>;

    /// Whether this channel has a `MaxMsgs`/`MaxBytes` cap configured.
    /// `MaxAge`-less channels with such a cap still need `expire()` called
    /// on every publish, since age-based scheduling alone would never
    /// trigger it (no message ever carries a nonzero `expiration_ns`).
    fn has_retention_caps(&self) -> bool;

    async fn flush(&self) -> Result<(), StanError>;
}
