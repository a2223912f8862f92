//! Pure subscription-state-machine logic: start-position resolution and the
//! delivery/ack/redelivery bookkeeping transitions. None of this touches a
//! store or a transport directly, so it is unit-tested inline the way
//! `stan-types`' own modules are.

use std::time::Duration;

use stan_gax::StanError;
use stan_store::MessageStore;
use stan_types::{StartPosition, Subscription, SubscriptionState};

/// Resolves `start` against the channel's current first/last sequence into
/// the `last_sent` value a freshly-created subscription should start from.
///
/// Every start position reduces to "the first sequence to deliver, minus
/// one" (`target.saturating_sub(1)`), which is why `NewOnly` and empty-
/// channel `LastReceived` land on the same value without a special case.
pub async fn resolve_start_last_sent(
    start: StartPosition,
    messages: &dyn MessageStore,
    now_ns: i64,
) -> Result<u64, StanError> {
    let first_seq = messages.first_sequence().await?;
    let last_seq = messages.last_sequence().await?;
    let target = match start {
        StartPosition::NewOnly => last_seq + 1,
        StartPosition::LastReceived => last_seq,
        StartPosition::AllAvailable => first_seq,
        StartPosition::SequenceStart(n) => {
            if n > last_seq + 1 {
                return Err(StanError::start_sequence_out_of_range(format!(
                    "sequence {n} exceeds last_seq+1 ({})",
                    last_seq + 1
                )));
            }
            n.max(first_seq)
        }
        StartPosition::TimeDeltaStart(d) => {
            let ts_ns = now_ns.saturating_sub(d.as_nanos() as i64);
            messages.get_sequence_from_timestamp(ts_ns).await?
        }
    };
    Ok(target.saturating_sub(1))
}

/// Whether `sub` is in the Stalled state, i.e. its pending-ack window is
/// full and no further message may be sent until one is acked.
pub fn is_stalled(sub: &Subscription) -> bool {
    sub.acks_pending.len() as u32 >= sub.max_in_flight
}

/// Records a fresh delivery of `seq`, advancing `last_sent` and adding the
/// seq to the pending-ack set stamped with `now_ns`.
pub fn record_delivery(sub: &mut Subscription, seq: u64, now_ns: i64) {
    sub.last_sent = sub.last_sent.max(seq);
    sub.acks_pending.insert(seq, now_ns);
}

/// Records an ack for `seq`. Returns `true` if it was actually pending
/// (a duplicate or stale ack is a no-op, not an error).
pub fn record_ack(sub: &mut Subscription, seq: u64) -> bool {
    sub.acks_pending.remove(&seq).is_some()
}

/// Every seq whose `sent_ts + ack_wait <= now_ns`, in ascending order —
/// the tie-break the redelivery timer is required to honor within one
/// tick.
pub fn due_for_redelivery(sub: &Subscription, now_ns: i64) -> Vec<u64> {
    let ack_wait_ns = sub.ack_wait.as_nanos() as i64;
    sub.acks_pending
        .iter()
        .filter(|(_, &sent_ts)| sent_ts.saturating_add(ack_wait_ns) <= now_ns)
        .map(|(&seq, _)| seq)
        .collect()
}

/// Current lifecycle state, given whether a live client is attached.
pub fn state(sub: &Subscription, client_attached: bool) -> SubscriptionState {
    sub.state(client_attached)
}

/// The next `max_in_flight` worth of sequences (at most) a subscription
/// should attempt to send, starting just after `last_sent` and stopping at
/// `last_seq` or once the in-flight window would be exceeded.
pub fn next_sendable(sub: &Subscription, last_seq: u64) -> Vec<u64> {
    if is_stalled(sub) {
        return Vec::new();
    }
    let budget = sub.max_in_flight as u64 - sub.acks_pending.len() as u64;
    ((sub.last_sent + 1)..=last_seq).take(budget as usize).collect()
}

/// Builds a fresh, not-yet-persisted [`Subscription`] from a subscribe
/// request and an already-resolved `last_sent`.
#[allow(clippy::too_many_arguments)]
pub fn new_subscription(
    channel_id: stan_types::ChannelId,
    client_id: stan_types::ClientId,
    ack_inbox: String,
    inbox: String,
    durable_name: Option<String>,
    queue_group: Option<String>,
    ack_wait: Duration,
    max_in_flight: u32,
    start_position: StartPosition,
    last_sent: u64,
    manual_ack: bool,
) -> Subscription {
    Subscription {
        id: stan_types::SubscriptionId(0),
        channel_id,
        client_id,
        ack_inbox,
        inbox,
        durable_name,
        queue_group,
        ack_wait,
        max_in_flight,
        start_position,
        last_sent,
        acks_pending: Default::default(),
        manual_ack,
        deleted: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stan_types::{ChannelId, ClientId};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeMessages {
        first: u64,
        last: u64,
        ts_seq: AtomicU64,
    }

    #[async_trait]
    impl MessageStore for FakeMessages {
        async fn store(&self, _data: bytes::Bytes) -> Result<u64, StanError> {
            unimplemented!()
        }
        async fn lookup(&self, _seq: u64) -> Result<Option<stan_types::Message>, StanError> {
            unimplemented!()
        }
        async fn first_msg(&self) -> Result<Option<stan_types::Message>, StanError> {
            unimplemented!()
        }
        async fn last_msg(&self) -> Result<Option<stan_types::Message>, StanError> {
            unimplemented!()
        }
        async fn first_sequence(&self) -> Result<u64, StanError> {
            Ok(self.first)
        }
        async fn last_sequence(&self) -> Result<u64, StanError> {
            Ok(self.last)
        }
        async fn get_sequence_from_timestamp(&self, _ts_ns: i64) -> Result<u64, StanError> {
            Ok(self.ts_seq.load(Ordering::SeqCst))
        }
        async fn expire(&self, _now_ns: i64) -> Result<u64, StanError> {
            unimplemented!()
        }
        fn has_retention_caps(&self) -> bool {
            false
        }
        async fn flush(&self) -> Result<(), StanError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn new_only_starts_after_the_last_message() {
        let store = FakeMessages { first: 1, last: 5, ts_seq: AtomicU64::new(0) };
        let last_sent = resolve_start_last_sent(StartPosition::NewOnly, &store, 0).await.unwrap();
        assert_eq!(last_sent, 5);
    }

    #[tokio::test]
    async fn new_only_on_empty_channel_is_zero() {
        let store = FakeMessages { first: 0, last: 0, ts_seq: AtomicU64::new(0) };
        let last_sent = resolve_start_last_sent(StartPosition::NewOnly, &store, 0).await.unwrap();
        assert_eq!(last_sent, 0);
    }

    #[tokio::test]
    async fn last_received_on_empty_channel_matches_new_only() {
        let store = FakeMessages { first: 0, last: 0, ts_seq: AtomicU64::new(0) };
        let last_sent = resolve_start_last_sent(StartPosition::LastReceived, &store, 0).await.unwrap();
        assert_eq!(last_sent, 0);
    }

    #[tokio::test]
    async fn last_received_delivers_only_the_latest() {
        let store = FakeMessages { first: 1, last: 5, ts_seq: AtomicU64::new(0) };
        let last_sent = resolve_start_last_sent(StartPosition::LastReceived, &store, 0).await.unwrap();
        assert_eq!(last_sent, 4);
    }

    #[tokio::test]
    async fn all_available_starts_at_first_sequence() {
        let store = FakeMessages { first: 3, last: 10, ts_seq: AtomicU64::new(0) };
        let last_sent = resolve_start_last_sent(StartPosition::AllAvailable, &store, 0).await.unwrap();
        assert_eq!(last_sent, 2);
    }

    #[tokio::test]
    async fn sequence_start_rejects_past_last_plus_one() {
        let store = FakeMessages { first: 1, last: 5, ts_seq: AtomicU64::new(0) };
        let err = resolve_start_last_sent(StartPosition::SequenceStart(7), &store, 0).await.unwrap_err();
        assert_eq!(err.code(), stan_gax::Code::StartSequenceOutOfRange);
    }

    #[tokio::test]
    async fn sequence_start_clamps_to_first_sequence() {
        let store = FakeMessages { first: 4, last: 10, ts_seq: AtomicU64::new(0) };
        let last_sent = resolve_start_last_sent(StartPosition::SequenceStart(1), &store, 0).await.unwrap();
        assert_eq!(last_sent, 3);
    }

    fn sub(max_in_flight: u32) -> Subscription {
        Subscription {
            id: stan_types::SubscriptionId(1),
            channel_id: ChannelId(1),
            client_id: ClientId::parse("c1").unwrap(),
            ack_inbox: "ack".into(),
            inbox: "inbox".into(),
            durable_name: None,
            queue_group: None,
            ack_wait: Duration::from_secs(1),
            max_in_flight,
            start_position: StartPosition::NewOnly,
            last_sent: 0,
            acks_pending: Default::default(),
            manual_ack: true,
            deleted: false,
        }
    }

    #[test]
    fn delivery_then_ack_round_trips_pending_set() {
        let mut s = sub(2);
        record_delivery(&mut s, 1, 100);
        record_delivery(&mut s, 2, 100);
        assert!(is_stalled(&s));
        assert!(record_ack(&mut s, 1));
        assert!(!is_stalled(&s));
        assert!(!record_ack(&mut s, 1), "second ack of the same seq is a no-op");
    }

    #[test]
    fn redelivery_is_due_once_ack_wait_elapses() {
        let mut s = sub(5);
        record_delivery(&mut s, 1, 0);
        assert!(due_for_redelivery(&s, 500_000_000).is_empty());
        assert_eq!(due_for_redelivery(&s, 1_000_000_000), vec![1]);
    }

    #[test]
    fn next_sendable_respects_in_flight_budget() {
        let mut s = sub(2);
        s.last_sent = 0;
        assert_eq!(next_sendable(&s, 5), vec![1, 2]);
        record_delivery(&mut s, 1, 0);
        record_delivery(&mut s, 2, 0);
        assert!(next_sendable(&s, 5).is_empty(), "stalled subs get nothing further");
    }
}
