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

fn sub_request(client_id: ClientId, durable: &str) -> SubscribeRequest {
    SubscribeRequest {
        client_id,
        ack_inbox: "ack.1".into(),
        inbox: "inbox.1".into(),
        durable_name: Some(durable.to_string()),
        queue_group: None,
        ack_wait: Duration::from_secs(30),
        max_in_flight: 10,
        start_position: StartPosition::AllAvailable,
        manual_ack: true,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn a_durable_resumes_from_where_it_left_off_after_the_client_reconnects() {
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

    let sub_id = broker.subscribe("orders", sub_request(client_id.clone(), "durable-a")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    broker.ack("orders", sub_id, 1).await.unwrap();

    // Client disconnects: the durable entry survives, offline.
    broker.close_client(&client_id).await.unwrap();

    broker.publish("orders", Bytes::from_static(b"two")).await.unwrap();

    // Reconnect and re-subscribe with the same durable name: resumes, does
    // not redeliver "one" (already acked) and gets "two".
    broker.connect(client_id.clone(), "hb.c1".into()).await.unwrap();
    let resumed_id = broker.subscribe("orders", sub_request(client_id.clone(), "durable-a")).await.unwrap();
    assert_eq!(resumed_id, sub_id, "resuming a durable must reuse its subscription id");

    tokio::time::sleep(Duration::from_millis(100)).await;

    let delivered = publisher.deliveries_to("inbox.1");
    assert_eq!(delivered, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);

    broker.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unsubscribe_deletes_a_durable_instead_of_just_offlining_it() {
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
    let sub_id = broker.subscribe("orders", sub_request(client_id.clone(), "durable-b")).await.unwrap();
    broker.unsubscribe("orders", sub_id).await.unwrap();
    broker.close_client(&client_id).await.unwrap();

    broker.connect(client_id.clone(), "hb.c1".into()).await.unwrap();
    let fresh_id = broker.subscribe("orders", sub_request(client_id.clone(), "durable-b")).await.unwrap();
    assert_ne!(fresh_id, sub_id, "an unsubscribed durable must not be found on resubscribe");

    broker.shutdown().await.unwrap();
}
