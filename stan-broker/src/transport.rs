use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use stan_gax::StanError;

/// The outbound half of the RPC layer this crate stays deliberately
/// ignorant of (publish/subscribe/unsub/close requests arrive from outside
/// and are not this crate's concern): publishing a message body to an
/// arbitrary reply subject — a subscription's `inbox`, a client's
/// `heartbeat_inbox`, or an `ack_inbox` probe.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Delivers one message to a subscriber's `inbox`. `seq` and
    /// `redelivered` are carried alongside the raw payload so the wire
    /// layer can put them in the envelope the receiver needs to ack by
    /// seq (§4.C) and to tell a first delivery from a resend.
    async fn publish(&self, subject: &str, seq: u64, redelivered: bool, payload: Bytes) -> Result<(), StanError>;

    /// Publishes on `subject` and waits up to `timeout` for a reply.
    /// `Ok(None)` means the wait elapsed with no reply. Used for heartbeat
    /// probes and duplicate-CID arbitration.
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Option<Bytes>, StanError>;
}
