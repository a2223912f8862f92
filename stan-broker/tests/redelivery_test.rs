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
async fn an_unacked_message_is_redelivered_after_ack_wait_elapses() {
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

    broker
        .subscribe(
            "orders",
            SubscribeRequest {
                client_id: client_id.clone(),
                ack_inbox: "ack.1".into(),
                inbox: "inbox.1".into(),
                durable_name: None,
                queue_group: None,
                ack_wait: Duration::from_millis(50),
                max_in_flight: 10,
                start_position: StartPosition::AllAvailable,
                manual_ack: true,
            },
        )
        .await
        .unwrap();

    // First delivery, quickly.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(publisher.count_to("inbox.1"), 1);

    // Never acked: it should be resent at least once more after ack_wait.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(publisher.count_to("inbox.1") >= 2, "unacked message must be redelivered");

    broker.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn acking_before_ack_wait_prevents_redelivery() {
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

    let sub_id = broker
        .subscribe(
            "orders",
            SubscribeRequest {
                client_id: client_id.clone(),
                ack_inbox: "ack.1".into(),
                inbox: "inbox.1".into(),
                durable_name: None,
                queue_group: None,
                ack_wait: Duration::from_millis(50),
                max_in_flight: 10,
                start_position: StartPosition::AllAvailable,
                manual_ack: true,
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    broker.ack("orders", sub_id, 1).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(publisher.count_to("inbox.1"), 1, "an acked message must not be redelivered");

    broker.shutdown().await.unwrap();
}
