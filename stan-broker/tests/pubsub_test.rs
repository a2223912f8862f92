mod support;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use stan_broker::{Broker, BrokerOptions, SubscribeRequest};
use stan_gax::{SharedClock, SystemClock};
use stan_store::ServerStore;
use stan_store_file::FileStore;
use stan_types::{ClientId, Limits, StartPosition};

use support::{server_info, FakePublisher};

fn clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[tokio::test(flavor = "multi_thread")]
async fn subscriber_with_all_available_receives_messages_published_before_it_subscribed() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ServerStore> = Arc::new(FileStore::open(dir.path(), clock(), Limits::default()).unwrap());
    let publisher = FakePublisher::new();
    let options = BrokerOptions {
        redelivery_tick: Duration::from_millis(10),
        ..Default::default()
    };
    let broker = Broker::new(store, publisher.clone(), clock(), options, Limits::default(), server_info());
    broker.start().await.unwrap();

    let client_id = ClientId::parse("c1").unwrap();
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

    tokio::time::sleep(Duration::from_millis(100)).await;

    let delivered = publisher.deliveries_to("inbox.1");
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0], Bytes::from_static(b"one"));
    assert_eq!(delivered[1], Bytes::from_static(b"two"));

    broker.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn new_only_subscriber_does_not_see_messages_published_earlier() {
    let dir = tempfile::tempdir().unwrap();
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

    let client_id = ClientId::parse("c1").unwrap();
    broker.connect(client_id.clone(), "hb.c1".into()).await.unwrap();
    broker.publish("orders", Bytes::from_static(b"before")).await.unwrap();

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
                start_position: StartPosition::NewOnly,
                manual_ack: true,
            },
        )
        .await
        .unwrap();
    broker.publish("orders", Bytes::from_static(b"after")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let delivered = publisher.deliveries_to("inbox.1");
    assert_eq!(delivered, vec![Bytes::from_static(b"after")]);

    broker.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn acking_a_message_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
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

    let client_id = ClientId::parse("c1").unwrap();
    broker.connect(client_id.clone(), "hb.c1".into()).await.unwrap();
    broker.publish("orders", Bytes::from_static(b"one")).await.unwrap();

    let sub_id = broker
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
    broker.ack("orders", sub_id, 1).await.unwrap();
    broker.ack("orders", sub_id, 1).await.unwrap();

    broker.shutdown().await.unwrap();
}
