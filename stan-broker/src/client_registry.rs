//! Client registry (§4.D): registration with duplicate-CID arbitration,
//! heartbeat timers, and the unified removal cascade that both heartbeat
//! failure and duplicate-CID eviction route through so the two lifecycle
//! paths in the data model can't drift apart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;

use stan_gax::{CancellationToken, StanError};
use stan_store::ServerStore;
use stan_types::{Client, ClientId, SubscriptionId};

use crate::channel::ChannelDirectory;
use crate::config::BrokerOptions;
use crate::transport::Publisher;

struct ClientHandle {
    id: ClientId,
    client: Mutex<Client>,
    failed_hb: AtomicU32,
    hb_cancel: CancellationToken,
}

impl ClientHandle {
    fn new(client: Client) -> Arc<Self> {
        Arc::new(Self {
            id: client.id.clone(),
            client: Mutex::new(client),
            failed_hb: AtomicU32::new(0),
            hb_cancel: CancellationToken::new(),
        })
    }

    fn heartbeat_inbox(&self) -> String {
        self.client.lock().heartbeat_inbox.clone()
    }

    fn subs(&self) -> Vec<SubscriptionId> {
        self.client.lock().subs.clone()
    }

    fn add_sub(&self, id: SubscriptionId) {
        self.client.lock().subs.push(id);
    }
}

pub struct ClientRegistry {
    store: Arc<dyn ServerStore>,
    channels: Arc<ChannelDirectory>,
    publisher: Arc<dyn Publisher>,
    options: BrokerOptions,
    clients: RwLock<HashMap<ClientId, Arc<ClientHandle>>>,
    dup_cid_semaphore: Arc<Semaphore>,
}

impl ClientRegistry {
    pub fn new(
        store: Arc<dyn ServerStore>,
        channels: Arc<ChannelDirectory>,
        publisher: Arc<dyn Publisher>,
        options: BrokerOptions,
    ) -> Arc<Self> {
        let dup_max = options.dup_max_cid_routines;
        Arc::new(Self {
            store,
            channels,
            publisher,
            options,
            clients: RwLock::new(HashMap::new()),
            dup_cid_semaphore: Arc::new(Semaphore::new(dup_max)),
        })
    }

    pub fn is_registered(&self, id: &ClientId) -> bool {
        self.clients.read().contains_key(id)
    }

    pub fn add_sub_to_client(&self, client_id: &ClientId, sub_id: SubscriptionId) -> Result<(), StanError> {
        let clients = self.clients.read();
        let handle = clients
            .get(client_id)
            .ok_or_else(|| StanError::unknown_client(format!("client {client_id} is not registered")))?;
        handle.add_sub(sub_id);
        Ok(())
    }

    /// Seeds a recovered client as an offline shell (§4.G step 2): present
    /// in the registry so orphan-vs-attached subscription checks can find
    /// it, but with no heartbeat timer running. A genuine reconnect with
    /// the same id goes through `register`, whose duplicate-CID probe
    /// against the stale `heartbeat_inbox` times out immediately and
    /// evicts the shell in favor of the live registration.
    pub fn seed_recovered_client(&self, client: Client) {
        let handle = ClientHandle::new(client);
        self.clients.write().insert(handle.id.clone(), handle);
    }

    /// `Register` (§4.D): validates nothing here (the caller already holds
    /// a parsed, validated `ClientId`), probes any existing registration
    /// under the same id, and installs the new one plus its heartbeat
    /// timer.
    pub async fn register(self: &Arc<Self>, client_id: ClientId, heartbeat_inbox: String) -> Result<(), StanError> {
        let existing = self.clients.read().get(&client_id).cloned();
        if let Some(old) = existing {
            let _permit = self
                .dup_cid_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| StanError::store_unavailable(format!("dup-cid semaphore closed: {e}")))?;
            let old_inbox = old.heartbeat_inbox();
            let reply = self
                .publisher
                .request(&old_inbox, Bytes::new(), self.options.dup_cid_timeout)
                .await?;
            match reply {
                Some(_) => {
                    return Err(StanError::duplicate_client_id(format!(
                        "client {client_id} is already connected"
                    )));
                }
                None => {
                    self.remove_client(&client_id).await?;
                }
            }
        }

        let client = Client::new(client_id.clone(), heartbeat_inbox);
        self.store.add_client(&client).await?;
        let handle = ClientHandle::new(client);
        self.clients.write().insert(client_id.clone(), handle.clone());
        self.spawn_heartbeat(client_id, handle);
        Ok(())
    }

    fn spawn_heartbeat(self: &Arc<Self>, client_id: ClientId, handle: Arc<ClientHandle>) {
        let registry = self.clone();
        let cancel = handle.hb_cancel.clone();
        let options = self.options.clone();
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(options.hb_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let inbox = handle.heartbeat_inbox();
                        match publisher.request(&inbox, Bytes::new(), options.hb_timeout).await {
                            Ok(Some(_)) => handle.failed_hb.store(0, Ordering::SeqCst),
                            Ok(None) => {
                                let failed = handle.failed_hb.fetch_add(1, Ordering::SeqCst) + 1;
                                if failed >= options.max_failed_hb {
                                    tracing::warn!(client = %client_id, failed, "unregistering client after missed heartbeats");
                                    let _ = registry.remove_client(&client_id).await;
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(client = %client_id, error = %e, "heartbeat probe failed");
                            }
                        }
                    }
                }
            }
        });
    }

    /// The unified removal cascade (§3 Client lifecycle, §4.D): drop the
    /// registration and its heartbeat timer, then for each subscription the
    /// client owned, delete it if non-durable or leave it in place
    /// (Offline, pending set retained) if durable — the durable stays
    /// findable via `ChannelState::find_durable` keyed by this `client_id`.
    pub async fn remove_client(&self, client_id: &ClientId) -> Result<(), StanError> {
        let removed = self.clients.write().remove(client_id);
        let Some(handle) = removed else {
            return Ok(());
        };
        handle.hb_cancel.cancel();

        for sub_id in handle.subs() {
            for channel in self.channels.all() {
                let Some(sub) = channel.find_sub(sub_id) else {
                    continue;
                };
                if sub.durable_name.is_none() {
                    channel.subs_store.delete_sub(sub_id).await?;
                    channel.remove_sub(sub_id).await;
                }
                break;
            }
        }

        self.store.delete_client(client_id).await
    }

    /// Cancels every heartbeat timer without touching persisted state, for
    /// broker shutdown.
    pub fn shutdown(&self) {
        for handle in self.clients.read().values() {
            handle.hb_cancel.cancel();
        }
    }
}
