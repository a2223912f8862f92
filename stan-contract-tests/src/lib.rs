//! Backend-agnostic `ServerStore`/`MessageStore`/`SubStore` contract suite
//! (§8 testable properties): one set of assertions, run by each backend's
//! integration test against its own freshly-constructed store, so
//! `stan-store-file` and `stan-store-sql` are proven to satisfy the same
//! contract instead of drifting apart under independent test suites.
//!
//! Mirrors the teacher's split between a crate of reusable assertions and
//! a thin per-backend `tests/` entry point (`spanner/tests`,
//! `pubsub/tests`): this crate has no `src/` logic beyond the suite
//! functions below, and is only ever pulled in as a dev-dependency.

use std::time::Duration;

use bytes::Bytes;

use stan_store::ServerStore;
use stan_types::{ChannelId, ClientId, Limits, ServerInfo, StartPosition, Subscription, SubscriptionId};

pub fn server_info(cluster_id: &str) -> ServerInfo {
    ServerInfo {
        cluster_id: cluster_id.to_string(),
        discover_prefix: "_STAN.discover".into(),
        publish_prefix: "_STAN.pub".into(),
        subscribe_subj: "_STAN.sub".into(),
        unsub_subj: "_STAN.unsub".into(),
        close_subj: "_STAN.close".into(),
        version: 1,
    }
}

fn new_sub(channel_id: ChannelId, client_id: &str, durable_name: Option<&str>) -> Subscription {
    Subscription {
        id: SubscriptionId(0),
        channel_id,
        client_id: ClientId::parse(client_id).unwrap(),
        ack_inbox: "ack".into(),
        inbox: "inbox".into(),
        durable_name: durable_name.map(|s| s.to_string()),
        queue_group: None,
        ack_wait: Duration::from_secs(30),
        max_in_flight: 25,
        start_position: StartPosition::NewOnly,
        last_sent: 0,
        acks_pending: Default::default(),
        manual_ack: true,
        deleted: false,
    }
}

/// §8: "For all channels c and all publishes in order P1..Pk, assigned
/// sequences are 1,2,...,k on an empty store, and `firstSeq <= seq <=
/// lastSeq` always."
pub async fn assert_sequences_are_dense_and_ordered(store: &dyn ServerStore) {
    let limits = Limits::default();
    let chans = store.create_channel("orders", &limits).await.unwrap();

    for (i, payload) in ["a", "b", "c"].iter().enumerate() {
        let seq = chans.messages.store(Bytes::from_static(payload.as_bytes())).await.unwrap();
        assert_eq!(seq, i as u64 + 1, "sequence {i} should be dense and 1-based");
    }

    let first = chans.messages.first_sequence().await.unwrap();
    let last = chans.messages.last_sequence().await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(last, 3);

    let msg = chans.messages.lookup(2).await.unwrap().expect("seq 2 must exist");
    assert_eq!(&msg.data[..], b"b");
    assert!(chans.messages.lookup(99).await.unwrap().is_none());
}

/// §4.A: `CreateChannel` is idempotent and channel ids are stable once
/// assigned.
pub async fn assert_create_channel_is_idempotent(store: &dyn ServerStore) {
    let limits = Limits::default();
    let first = store.create_channel("idempotent", &limits).await.unwrap();
    let second = store.create_channel("idempotent", &limits).await.unwrap();
    assert_eq!(first.channel.id, second.channel.id);

    first.messages.store(Bytes::from_static(b"x")).await.unwrap();
    assert_eq!(second.messages.last_sequence().await.unwrap(), 1, "both handles see the same underlying log");
}

/// §4.A: `GetSequenceFromTimestamp` returns the smallest seq whose
/// `timestamp_ns >= ts_ns`, or `lastSeq+1` if none qualifies.
pub async fn assert_get_sequence_from_timestamp(store: &dyn ServerStore) {
    let limits = Limits::default();
    let chans = store.create_channel("by-time", &limits).await.unwrap();

    chans.messages.store(Bytes::from_static(b"1")).await.unwrap();
    let mid = chans.messages.lookup(1).await.unwrap().unwrap().timestamp_ns;
    chans.messages.store(Bytes::from_static(b"2")).await.unwrap();

    let seq = chans.messages.get_sequence_from_timestamp(mid).await.unwrap();
    assert_eq!(seq, 1);

    let future = i64::MAX;
    let none = chans.messages.get_sequence_from_timestamp(future).await.unwrap();
    assert_eq!(none, chans.messages.last_sequence().await.unwrap() + 1);
}

/// §7/§8: `Init` is idempotent under changing non-id fields, and fails when
/// `cluster_id` differs from what was already persisted.
pub async fn assert_init_idempotent_and_rejects_cluster_mismatch(store: &dyn ServerStore) {
    let info = server_info("cluster-a");
    store.init(&info).await.unwrap();

    let mut same_cluster_different_prefix = info.clone();
    same_cluster_different_prefix.publish_prefix = "_STAN.pub2".into();
    store.init(&same_cluster_different_prefix).await.unwrap();

    let mismatched = server_info("cluster-b");
    let err = store.init(&mismatched).await.unwrap_err();
    assert_eq!(err.code(), stan_gax::Code::ClusterIdMismatch);
}

/// §8 round-trip: persist -> recover of clients, channels, subscriptions,
/// and pending sets is the identity modulo `sent_ts` (reset to "now" by
/// the broker's recovery orchestrator, not by the store itself — the store
/// just hands back whatever was last persisted).
pub async fn assert_recover_round_trips_state(store: &dyn ServerStore) {
    let info = server_info("cluster-rt");
    store.init(&info).await.unwrap();

    let client = stan_types::Client::new(ClientId::parse("alice").unwrap(), "alice.hb".into());
    store.add_client(&client).await.unwrap();

    let limits = Limits::default();
    let chans = store.create_channel("durable-chan", &limits).await.unwrap();
    chans.messages.store(Bytes::from_static(b"m1")).await.unwrap();
    chans.messages.store(Bytes::from_static(b"m2")).await.unwrap();

    let mut sub = new_sub(chans.channel.id, "alice", Some("dur"));
    chans.subs.create_sub(&mut sub).await.unwrap();
    chans.subs.add_seq_pending(sub.id, 1).await.unwrap();

    let recovered = store.recover().await.unwrap().expect("non-empty store recovers Some");
    assert_eq!(recovered.server_info.cluster_id, "cluster-rt");
    assert_eq!(recovered.clients.len(), 1);
    assert_eq!(recovered.clients[0].id, client.id);

    let rc = recovered.channels.get("durable-chan").expect("channel recovered");
    assert_eq!(rc.first_seq, 1);
    assert_eq!(rc.last_seq, 2);
    assert_eq!(rc.subscriptions.len(), 1);
    let recovered_sub = &rc.subscriptions[0];
    assert_eq!(recovered_sub.id, sub.id);
    assert_eq!(recovered_sub.durable_name.as_deref(), Some("dur"));
    assert!(recovered_sub.acks_pending.contains_key(&1), "pending ack seq survives recovery");
}

/// §4.A `SubStore::DeleteSub`: a soft delete. The id is never reassigned
/// to a later `CreateSub`, and its pending rows are cleared.
pub async fn assert_delete_sub_is_soft_and_id_is_reserved(store: &dyn ServerStore) {
    let limits = Limits::default();
    let chans = store.create_channel("soft-delete", &limits).await.unwrap();

    let mut first = new_sub(chans.channel.id, "bob", None);
    chans.subs.create_sub(&mut first).await.unwrap();
    chans.subs.add_seq_pending(first.id, 1).await.unwrap();

    chans.subs.delete_sub(first.id).await.unwrap();

    let mut second = new_sub(chans.channel.id, "bob", None);
    chans.subs.create_sub(&mut second).await.unwrap();
    assert_ne!(first.id, second.id, "a soft-deleted sub_id must never be reassigned");
    assert!(second.id.0 > first.id.0);
}

/// §4.F/§8: `Lookup` returns `None` for any seq whose `expiration_ns <=
/// now`, even before `expire` has physically swept it.
pub async fn assert_lookup_filters_expired_before_sweep(store: &dyn ServerStore) {
    // Long enough that the immediate post-store lookup below reliably lands
    // before expiration even against a real `SystemClock` (the backends
    // under test are always constructed with one — see
    // `file_store_contract.rs`/`sql_store_contract.rs`), short enough that
    // the `tokio::time::sleep` past it keeps this test fast.
    let mut limits = Limits::default();
    limits.max_age = Duration::from_millis(50);
    let chans = store.create_channel("max-age", &limits).await.unwrap();

    let seq = chans.messages.store(Bytes::from_static(b"short-lived")).await.unwrap();
    let msg = chans.messages.lookup(seq).await.unwrap().expect("visible immediately after store");
    assert!(msg.expiration_ns > 0, "max_age must set a nonzero expiration");

    // The row has not been swept yet (`expire` was never called), but a
    // lookup after `expiration_ns` has passed must already hide it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        chans.messages.lookup(seq).await.unwrap().is_none(),
        "lookup must filter an expired row even before the sweeper deletes it"
    );

    let now_after_expiry = msg.expiration_ns + Duration::from_millis(100).as_nanos() as i64;
    let evicted = chans.messages.expire(now_after_expiry).await.unwrap();
    assert!(chans.messages.lookup(seq).await.unwrap().is_none());
    assert_eq!(evicted, chans.messages.last_sequence().await.unwrap() + 1, "channel is now empty");
}

/// §3 Channel invariant: `seq` is strictly increasing and never reset, even
/// after every message in the channel has expired and been swept. A
/// store that derives the next `seq` from `MAX(seq)` over live rows would
/// hand out `1` again here instead of continuing from `4`.
pub async fn assert_seq_never_resets_after_expire_then_store(store: &dyn ServerStore) {
    let mut limits = Limits::default();
    limits.max_age = Duration::from_millis(50);
    let chans = store.create_channel("expire-then-store", &limits).await.unwrap();

    for payload in ["a", "b", "c"] {
        chans.messages.store(Bytes::from_static(payload.as_bytes())).await.unwrap();
    }
    assert_eq!(chans.messages.last_sequence().await.unwrap(), 3);

    tokio::time::sleep(Duration::from_millis(100)).await;
    chans.messages.expire(i64::MAX).await.unwrap();
    assert!(chans.messages.first_msg().await.unwrap().is_none(), "channel must now be empty");

    let seq = chans.messages.store(Bytes::from_static(b"d")).await.unwrap();
    assert_eq!(seq, 4, "seq must continue from the last ever assigned, not reset to 1");
    assert_eq!(chans.messages.last_sequence().await.unwrap(), 4);
}

/// §4.A/§7: `SetLimits` and basic client add/delete round-trip.
pub async fn assert_client_lifecycle(store: &dyn ServerStore) {
    let client = stan_types::Client::new(ClientId::parse("carol").unwrap(), "carol.hb".into());
    store.add_client(&client).await.unwrap();
    store.delete_client(&client.id).await.unwrap();

    let mut limits = Limits::default();
    limits.max_channels = 5;
    store.set_limits(&limits).await.unwrap();
}

/// Runs every assertion above against one freshly-constructed, empty
/// store. Each backend's integration test calls this once per store
/// instance; `recover`-related assertions run against their own channel
/// names so the suite can run multiple times against the same store
/// without cross-contaminating sequence numbers.
pub async fn run_full_contract_suite(store: &dyn ServerStore) {
    assert_sequences_are_dense_and_ordered(store).await;
    assert_create_channel_is_idempotent(store).await;
    assert_get_sequence_from_timestamp(store).await;
    assert_init_idempotent_and_rejects_cluster_mismatch(store).await;
    assert_recover_round_trips_state(store).await;
    assert_delete_sub_is_soft_and_id_is_reserved(store).await;
    assert_lookup_filters_expired_before_sweep(store).await;
    assert_seq_never_resets_after_expire_then_store(store).await;
    assert_client_lifecycle(store).await;
}
