mod support;

use std::sync::Arc;
use std::time::Duration;

use stan_broker::{Broker, BrokerOptions};
use stan_gax::{SharedClock, SystemClock};
use stan_store::ServerStore;
use stan_store_file::FileStore;
use stan_types::{ClientId, Limits};

use support::{server_info, FakePublisher, ReplyPolicy};

fn clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnecting_with_the_same_id_is_rejected_while_the_old_client_is_still_alive() {
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
    // FakePublisher's default policy replies immediately: the old client
    // looks alive, so this second connect must be refused.
    let err = broker.connect(client_id.clone(), "hb.c1-new".into()).await.unwrap_err();
    assert_eq!(err.code(), stan_gax::Code::DuplicateClientId);

    broker.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnecting_with_the_same_id_succeeds_once_the_old_client_stops_answering() {
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
    publisher.set_policy("hb.c1", ReplyPolicy::Timeout);
    broker.connect(client_id.clone(), "hb.c1-new".into()).await.unwrap();

    broker.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn a_client_is_unregistered_after_enough_missed_heartbeats() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ServerStore> = Arc::new(FileStore::open(dir.path(), clock(), Limits::default()).unwrap());
    let publisher = FakePublisher::new();
    let options = BrokerOptions {
        hb_interval: Duration::from_millis(20),
        hb_timeout: Duration::from_millis(10),
        max_failed_hb: 2,
        ..Default::default()
    };
    let broker = Broker::new(store, publisher.clone(), clock(), options, Limits::default(), server_info());
    broker.start().await.unwrap();

    let client_id = ClientId::parse("c1").unwrap();
    broker.connect(client_id.clone(), "hb.c1".into()).await.unwrap();
    publisher.set_policy("hb.c1", ReplyPolicy::Timeout);

    // Two missed heartbeats at a 20ms interval: give it well over that.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // A fresh connect with the same id must now succeed immediately (no
    // dup-cid probe needed, since the client was already removed).
    broker.connect(client_id.clone(), "hb.c1-new".into()).await.unwrap();

    broker.shutdown().await.unwrap();
}
