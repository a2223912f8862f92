//! The top-level `Broker`: wires the channel directory, client registry,
//! store, transport, clock, and options together behind the public API
//! (`connect`/`publish`/`subscribe`/`ack`/`unsubscribe`/`close_client`) plus
//! the `start`/`shutdown` lifecycle that brings the dispatch and expiration
//! loops up and takes them back down.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use stan_gax::{CancellationToken, SharedClock, StanError};
use stan_store::ServerStore;
use stan_types::subject::validate_channel_name;
use stan_types::{ClientId, Limits, ServerInfo, SubscriptionId};

use crate::channel::{ChannelDirectory, ChannelState, SubHandle};
use crate::client_registry::ClientRegistry;
use crate::config::{BrokerOptions, SubscribeRequest};
use crate::dispatch;
use crate::expiration;
use crate::recovery;
use crate::subscription;
use crate::transport::Publisher;

pub struct Broker {
    store: Arc<dyn ServerStore>,
    channels: Arc<ChannelDirectory>,
    clients: Arc<ClientRegistry>,
    publisher: Arc<dyn Publisher>,
    clock: SharedClock,
    options: BrokerOptions,
    limits: Limits,
    server_info: ServerInfo,
    running: Mutex<HashMap<String, (CancellationToken, Vec<tokio::task::JoinHandle<()>>)>>,
}

impl Broker {
    pub fn new(
        store: Arc<dyn ServerStore>,
        publisher: Arc<dyn Publisher>,
        clock: SharedClock,
        options: BrokerOptions,
        limits: Limits,
        server_info: ServerInfo,
    ) -> Arc<Self> {
        let channels = ChannelDirectory::new();
        let clients = ClientRegistry::new(store.clone(), channels.clone(), publisher.clone(), options.clone());
        Arc::new(Self {
            store,
            channels,
            clients,
            publisher,
            clock,
            options,
            limits,
            server_info,
            running: Mutex::new(HashMap::new()),
        })
    }

    /// Recovers persisted state (§4.G) and activates the dispatch and
    /// expiration loops for every recovered channel. Must be called once
    /// before any of `publish`/`subscribe`/`connect` are served.
    pub async fn start(self: &Arc<Self>) -> Result<(), StanError> {
        recovery::bootstrap(&self.store, &self.channels, &self.clients, &self.server_info, &self.limits, &self.clock)
            .await?;
        for channel in self.channels.all() {
            self.activate_channel(channel);
        }
        Ok(())
    }

    fn activate_channel(self: &Arc<Self>, channel: Arc<ChannelState>) {
        let cancel = CancellationToken::new();
        let dispatch_handle = dispatch::spawn_channel_loop(
            channel.clone(),
            self.publisher.clone(),
            self.clock.clone(),
            self.options.clone(),
            cancel.child_token(),
            self.clients.clone(),
        );
        let expiration_handle =
            expiration::spawn_expiration_loop(channel.clone(), self.clock.clone(), self.options.clone(), cancel.child_token());
        self.running
            .lock()
            .insert(channel.name.clone(), (cancel, vec![dispatch_handle, expiration_handle]));
    }

    async fn get_or_create_channel(self: &Arc<Self>, name: &str) -> Result<Arc<ChannelState>, StanError> {
        if let Some(existing) = self.channels.get(name) {
            return Ok(existing);
        }
        let stores = self.store.create_channel(name, &self.limits).await?;
        let state = ChannelState::new(&stores.channel, stores.messages, stores.subs);
        let state = self.channels.get_or_insert(name, state);
        if !self.running.lock().contains_key(name) {
            self.activate_channel(state.clone());
        }
        Ok(state)
    }

    /// `Connect` (§4.D).
    pub async fn connect(self: &Arc<Self>, client_id: ClientId, heartbeat_inbox: String) -> Result<(), StanError> {
        self.clients.register(client_id, heartbeat_inbox).await
    }

    /// `Publish` (§4.E): auto-creates the channel if this is its first
    /// message, appends to the log, and wakes the dispatch loop.
    pub async fn publish(self: &Arc<Self>, channel_name: &str, data: Bytes) -> Result<u64, StanError> {
        validate_channel_name(channel_name)?;
        let channel = self.get_or_create_channel(channel_name).await?;
        let seq = channel.messages.store(data).await?;
        channel.notify.notify_waiters();
        Ok(seq)
    }

    /// `Subscribe` (§4.C): resolves a durable resume if `durable_name`
    /// matches an existing entry, otherwise resolves `start_position` and
    /// creates a fresh subscription. Queue membership is layered on top of
    /// either path.
    pub async fn subscribe(self: &Arc<Self>, channel_name: &str, req: SubscribeRequest) -> Result<SubscriptionId, StanError> {
        validate_channel_name(channel_name)?;
        if !self.clients.is_registered(&req.client_id) {
            return Err(StanError::unknown_client(format!("client {} is not registered", req.client_id)));
        }
        let channel = self.get_or_create_channel(channel_name).await?;

        if let Some(durable_name) = req.durable_name.as_deref() {
            if let Some(existing) = channel.find_durable(&req.client_id, durable_name) {
                return self.resume_durable(&channel, existing, req).await;
            }
        }

        let now_ns = self.clock.now_ns();
        let last_sent = subscription::resolve_start_last_sent(req.start_position, channel.messages.as_ref(), now_ns).await?;
        let mut sub = subscription::new_subscription(
            channel.id,
            req.client_id.clone(),
            req.ack_inbox.clone(),
            req.inbox.clone(),
            req.durable_name.clone(),
            req.queue_group.clone(),
            req.ack_wait,
            req.max_in_flight,
            req.start_position,
            last_sent,
            req.manual_ack,
        );
        channel.subs_store.create_sub(&mut sub).await?;
        let sub_id = sub.id;
        let handle = SubHandle::new(sub);
        channel.register(handle.clone());
        if let Some(group_name) = req.queue_group.as_deref() {
            channel.queue_group(group_name).add_member(handle.clone()).await;
        }
        self.clients.add_sub_to_client(&req.client_id, sub_id)?;
        channel.notify.notify_waiters();
        Ok(sub_id)
    }

    async fn resume_durable(
        &self,
        channel: &ChannelState,
        existing: Arc<SubHandle>,
        req: SubscribeRequest,
    ) -> Result<SubscriptionId, StanError> {
        existing
            .with_mut(|s| {
                s.ack_inbox = req.ack_inbox;
                s.inbox = req.inbox;
                s.manual_ack = req.manual_ack;
                s.max_in_flight = req.max_in_flight;
                s.ack_wait = req.ack_wait;
            })
            .await;
        let snapshot = existing.snapshot().await;
        channel.subs_store.update_sub(&snapshot).await?;
        self.clients.add_sub_to_client(&req.client_id, existing.id)?;
        if let Some(group_name) = req.queue_group.as_deref() {
            channel.queue_group(group_name).add_member(existing.clone()).await;
        }
        channel.notify.notify_waiters();
        Ok(existing.id)
    }

    /// `Ack` (§4.C).
    pub async fn ack(&self, channel_name: &str, sub_id: SubscriptionId, seq: u64) -> Result<(), StanError> {
        let channel = self
            .channels
            .get(channel_name)
            .ok_or_else(|| StanError::unknown_channel(format!("channel {channel_name} does not exist")))?;
        dispatch::ack(&channel, sub_id, seq).await
    }

    /// `Unsubscribe` (§4.C): always deletes the row, durable or not — this
    /// is the explicit-unsubscribe path, distinct from a client simply
    /// disconnecting (which offlines a durable instead, via `close_client`).
    pub async fn unsubscribe(&self, channel_name: &str, sub_id: SubscriptionId) -> Result<(), StanError> {
        let channel = self
            .channels
            .get(channel_name)
            .ok_or_else(|| StanError::unknown_channel(format!("channel {channel_name} does not exist")))?;
        channel.subs_store.delete_sub(sub_id).await?;
        channel.remove_sub(sub_id).await;
        Ok(())
    }

    /// `Close` (§4.D): removes the client via the unified cascade, deleting
    /// its non-durable subscriptions and offlining its durables.
    pub async fn close_client(&self, client_id: &ClientId) -> Result<(), StanError> {
        self.clients.remove_client(client_id).await
    }

    /// Cancels every channel loop and heartbeat timer, waits up to
    /// `grace_shutdown` for them to wind down, then closes the store.
    pub async fn shutdown(&self) -> Result<(), StanError> {
        self.clients.shutdown();
        let running = std::mem::take(&mut *self.running.lock());
        let grace = self.options.grace_shutdown;
        for (_, (cancel, handles)) in running {
            cancel.cancel();
            for handle in handles {
                let _ = tokio::time::timeout(grace, handle).await;
            }
        }
        self.store.close().await
    }
}
