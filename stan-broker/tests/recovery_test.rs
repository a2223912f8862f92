mod support;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use stan_broker::{Broker, BrokerOptions, SubscribeRequest};
use stan_gax::{SharedClock, SystemClock};
use stan_store::ServerStore;
use stan_store_file::FileStore;
use stan_types::{ClientId, Limits, StartPosition};

use support::{server_info, FakePublisher, ReplyPolicy};

fn clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Simulates a broker restart: publishes, subscribes, partially acks, shuts
/// the broker down (but keeps the on-disk store), then rebuilds a fresh
/// `Broker` over the same directory and checks it picks up exactly where
/// the last one left off.
#[tokio::test(flavor = "multi_thread")]
async fn a_non_durable_subscription_survives_a_restart_while_its_client_is_still_known() {
    let dir = tempfile::tempdir().unwrap();
    let client_id = ClientId::parse("c1").unwrap();

    {
        let store: Arc<dyn ServerStore> = Arc::new(FileStore::open(dir.path(), clock(), Limits::default()).unwrap());
        let publisher = FakePublisher::new();
        let broker = Broker::new(
            store,
            publisher.clone(),
            clock(),
            BrokerOptions::default(),
            Limits::default(),
            server_info(),
        );
        broker.start().await.unwrap();
        broker.connect(client_id.clone(), "hb.c1".into()).await.unwrap();
        broker.publish("orders", Bytes::from_static(b"one")).await.unwrap();
        broker.publish("orders", Bytes::from_static(b"two")).await.unwrap();
        broker
            .subscribe(
                "orders",
                SubscribeRequest {
                    client_id: client_id.clone(),
                    ack_inbox: "ack.1".into(),
                    inbox: "inbox.1".into(),
                    durable_name: None,
                    queue_group: None,
                    ack_wait: Duration::from_secs(30),
                    max_in_flight: 10,
                    start_position: StartPosition::AllAvailable,
                    manual_ack: true,
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(publisher.count_to("inbox.1"), 2);
        broker.shutdown().await.unwrap();
    }

    // Reopen the same store directory in a fresh process-equivalent.
    let store: Arc<dyn ServerStore> = Arc::new(FileStore::open(dir.path(), clock(), Limits::default()).unwrap());
    let publisher = FakePublisher::new();
    let options = BrokerOptions {
        redelivery_tick: Duration::from_millis(10),
        ..Default::default()
    };
    let broker = Broker::new(store, publisher.clone(), clock(), options, Limits::default(), server_info());
    broker.start().await.unwrap();

    // The recovered subscription should resume delivery on its own — a
    // dispatch loop does not require the owning client to reconnect — and
    // should not redeliver "one"/"two" again from scratch (they are still
    // pending-ack, so they *will* be resent once ack_wait elapses, but not
    // re-delivered as new messages).
    broker.publish("orders", Bytes::from_static(b"three")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        publisher.count_to("inbox.1"),
        1,
        "recovery must resume the existing subscription, delivering only the new message first"
    );

    broker.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn a_durable_subscription_survives_a_restart_and_can_be_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let client_id = ClientId::parse("c1").unwrap();

    {
        let store: Arc<dyn ServerStore> = Arc::new(FileStore::open(dir.path(), clock(), Limits::default()).unwrap());
        let publisher = FakePublisher::new();
        let broker = Broker::new(
            store,
            publisher.clone(),
            clock(),
            BrokerOptions::default(),
            Limits::default(),
            server_info(),
        );
        broker.start().await.unwrap();
        broker.connect(client_id.clone(), "hb.c1".into()).await.unwrap();
        broker.publish("orders", Bytes::from_static(b"one")).await.unwrap();
        broker
            .subscribe(
                "orders",
                SubscribeRequest {
                    client_id: client_id.clone(),
                    ack_inbox: "ack.1".into(),
                    inbox: "inbox.1".into(),
                    durable_name: Some("durable-a".to_string()),
                    queue_group: None,
                    ack_wait: Duration::from_secs(30),
                    max_in_flight: 10,
                    start_position: StartPosition::AllAvailable,
                    manual_ack: true,
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.shutdown().await.unwrap();
    }

    let store: Arc<dyn ServerStore> = Arc::new(FileStore::open(dir.path(), clock(), Limits::default()).unwrap());
    let publisher = FakePublisher::new();
    let broker = Broker::new(
        store,
        publisher.clone(),
        clock(),
        BrokerOptions::default(),
        Limits::default(),
        server_info(),
    );
    broker.start().await.unwrap();

    // The pre-crash connection is gone; reconnecting with the same client
    // id must win duplicate-CID arbitration against the recovered offline
    // shell rather than be rejected as already connected.
    publisher.set_policy("hb.c1", ReplyPolicy::Timeout);
    broker.connect(client_id.clone(), "hb.c1".into()).await.unwrap();
    broker
        .subscribe(
            "orders",
            SubscribeRequest {
                client_id: client_id.clone(),
                ack_inbox: "ack.1".into(),
                inbox: "inbox.1".into(),
                durable_name: Some("durable-a".to_string()),
                queue_group: None,
                ack_wait: Duration::from_secs(30),
                max_in_flight: 10,
                start_position: StartPosition::AllAvailable,
                manual_ack: true,
            },
        )
        .await
        .unwrap();

    broker.shutdown().await.unwrap();
}
