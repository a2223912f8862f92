//! Channel state (§4.B): a channel's `MessageStore`/`SubStore` pair plus the
//! in-memory subscriber registry layered on top — plain subs, the durable
//! index, and queue groups. `ChannelDirectory` is the broker-wide map of
//! `name → ChannelState`, created once and shared by the dispatcher, the
//! client registry, and the expiration engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use stan_store::{MessageStore, SubStore};
use stan_types::{Channel, ChannelId, ClientId, Subscription, SubscriptionId};

/// One subscription's live, mutable state. The `Subscription` itself is
/// kept behind a `tokio::sync::Mutex` rather than `parking_lot` because the
/// delivery loop mutates it while awaiting store I/O (persisting the
/// pending-ack row).
pub struct SubHandle {
    pub id: SubscriptionId,
    pub channel_id: ChannelId,
    pub client_id: ClientId,
    pub durable_name: Option<String>,
    pub queue_group: Option<String>,
    state: tokio::sync::Mutex<Subscription>,
}

impl SubHandle {
    pub fn new(sub: Subscription) -> Arc<Self> {
        Arc::new(Self {
            id: sub.id,
            channel_id: sub.channel_id,
            client_id: sub.client_id.clone(),
            durable_name: sub.durable_name.clone(),
            queue_group: sub.queue_group.clone(),
            state: tokio::sync::Mutex::new(sub),
        })
    }

    pub async fn snapshot(&self) -> Subscription {
        self.state.lock().await.clone()
    }

    pub async fn with_mut<R>(&self, f: impl FnOnce(&mut Subscription) -> R) -> R {
        let mut guard = self.state.lock().await;
        f(&mut guard)
    }
}

struct QueueGroupInner {
    members: Vec<Arc<SubHandle>>,
    next_member: usize,
    last_sent: u64,
    /// seq → (owning member, sent_ts_ns), for redelivery steering, the
    /// ack-wait sweep, and per-member stall accounting
    /// (`next_sendable_member` counts how many entries here are owned by a
    /// candidate before picking it).
    acks_pending: BTreeMap<u64, (SubscriptionId, i64)>,
}

/// The runtime counterpart of [`stan_types::QueueGroup`]: members sharing
/// one delivery cursor and one pending-ack set, reconstructed from member
/// subscriptions at recovery time rather than persisted directly.
pub struct QueueGroupRuntime {
    pub name: String,
    inner: tokio::sync::Mutex<QueueGroupInner>,
}

impl QueueGroupRuntime {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            inner: tokio::sync::Mutex::new(QueueGroupInner {
                members: Vec::new(),
                next_member: 0,
                last_sent: 0,
                acks_pending: BTreeMap::new(),
            }),
        })
    }

    pub async fn add_member(&self, member: Arc<SubHandle>) {
        self.inner.lock().await.members.push(member);
    }

    /// Removes a member; any pending seqs it owned are left in the shared
    /// map so the redelivery sweep can steer them to a surviving member.
    pub async fn remove_member(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().await;
        inner.members.retain(|m| m.id != id);
        inner.next_member = 0;
        inner.members.is_empty()
    }

    pub async fn members(&self) -> Vec<Arc<SubHandle>> {
        self.inner.lock().await.members.clone()
    }

    pub async fn last_sent(&self) -> u64 {
        self.inner.lock().await.last_sent
    }

    /// Bumps the shared cursor past a seq the store no longer has (expired
    /// before any member caught up) without creating a pending-ack entry.
    pub async fn skip_seq(&self, seq: u64) {
        let mut inner = self.inner.lock().await;
        inner.last_sent = inner.last_sent.max(seq);
    }

    /// Picks the next member in round-robin order whose share of
    /// `acks_pending` is below `max_in_flight`, skipping stalled members.
    /// Returns `None` if every member is stalled or there are no members.
    pub async fn next_sendable_member(&self, max_in_flight: u32) -> Option<Arc<SubHandle>> {
        let mut inner = self.inner.lock().await;
        let n = inner.members.len();
        if n == 0 {
            return None;
        }
        for offset in 0..n {
            let idx = (inner.next_member + offset) % n;
            let candidate = inner.members[idx].clone();
            let owned = inner.acks_pending.values().filter(|(owner, _)| *owner == candidate.id).count() as u32;
            if owned < max_in_flight {
                inner.next_member = (idx + 1) % n;
                return Some(candidate);
            }
        }
        None
    }

    pub async fn record_delivery(&self, member: SubscriptionId, seq: u64, now_ns: i64) {
        let mut inner = self.inner.lock().await;
        inner.last_sent = inner.last_sent.max(seq);
        inner.acks_pending.insert(seq, (member, now_ns));
    }

    pub async fn record_ack(&self, seq: u64) -> Option<SubscriptionId> {
        self.inner.lock().await.acks_pending.remove(&seq).map(|(owner, _)| owner)
    }

    /// Every pending seq whose `sent_ts + ack_wait <= now_ns`, for the
    /// per-channel redelivery sweep. `ack_wait` is taken from whichever
    /// member is current at sweep time (§9: queue-group members are assumed
    /// to share one `ack_wait`, same as they share one cursor).
    pub async fn due_for_redelivery(&self, ack_wait: Duration, now_ns: i64) -> Vec<u64> {
        let ack_wait_ns = ack_wait.as_nanos() as i64;
        self.inner
            .lock()
            .await
            .acks_pending
            .iter()
            .filter(|(_, (_, sent_ts))| sent_ts.saturating_add(ack_wait_ns) <= now_ns)
            .map(|(&seq, _)| seq)
            .collect()
    }

    /// Reassigns `seq` to whichever member is next in rotation, for the
    /// redelivery pass (§9: "redeliveries may reorder"). Returns `None` if
    /// every member is currently stalled, leaving `seq` pending on its prior
    /// owner for the next sweep to retry.
    pub async fn redeliver(&self, seq: u64, now_ns: i64, max_in_flight: u32) -> Option<Arc<SubHandle>> {
        let next = self.next_sendable_member(max_in_flight).await?;
        self.inner.lock().await.acks_pending.insert(seq, (next.id, now_ns));
        Some(next)
    }
}

/// A channel's `MessageStore`/`SubStore` pair and the in-memory subscriber
/// registry layered on top (§4.B). Creation of a brand-new channel is
/// atomic at the [`ChannelDirectory`] level, under its writer lock.
pub struct ChannelState {
    pub id: ChannelId,
    pub name: String,
    pub messages: Arc<dyn MessageStore>,
    pub subs_store: Arc<dyn SubStore>,
    plain: RwLock<Vec<Arc<SubHandle>>>,
    durables: RwLock<HashMap<(ClientId, String), Arc<SubHandle>>>,
    queue_groups: RwLock<HashMap<String, Arc<QueueGroupRuntime>>>,
    all: RwLock<HashMap<SubscriptionId, Arc<SubHandle>>>,
    /// Signalled on every publish so the delivery loop wakes without
    /// polling; also signalled on subscribe so a fresh sub gets its first
    /// batch promptly.
    pub notify: tokio::sync::Notify,
}

impl ChannelState {
    pub fn new(channel: &Channel, messages: Arc<dyn MessageStore>, subs_store: Arc<dyn SubStore>) -> Arc<Self> {
        Arc::new(Self {
            id: channel.id,
            name: channel.name.clone(),
            messages,
            subs_store,
            plain: RwLock::new(Vec::new()),
            durables: RwLock::new(HashMap::new()),
            queue_groups: RwLock::new(HashMap::new()),
            all: RwLock::new(HashMap::new()),
            notify: tokio::sync::Notify::new(),
        })
    }

    /// Indexes a persisted, non-queue subscription as plain or durable.
    /// Queue members are indexed via [`Self::queue_group`] +
    /// `QueueGroupRuntime::add_member` instead, since their shared cursor
    /// lives on the group, not here.
    pub fn register(&self, handle: Arc<SubHandle>) {
        self.all.write().insert(handle.id, handle.clone());
        if let Some(durable) = handle.durable_name.clone() {
            self.durables.write().insert((handle.client_id.clone(), durable), handle);
        } else if handle.queue_group.is_none() {
            self.plain.write().push(handle);
        }
    }

    pub fn queue_group(&self, name: &str) -> Arc<QueueGroupRuntime> {
        self.queue_groups
            .write()
            .entry(name.to_string())
            .or_insert_with(|| QueueGroupRuntime::new(name))
            .clone()
    }

    pub fn find_queue_group(&self, name: &str) -> Option<Arc<QueueGroupRuntime>> {
        self.queue_groups.read().get(name).cloned()
    }

    pub fn find_durable(&self, client_id: &ClientId, durable_name: &str) -> Option<Arc<SubHandle>> {
        self.durables.read().get(&(client_id.clone(), durable_name.to_string())).cloned()
    }

    pub fn find_sub(&self, id: SubscriptionId) -> Option<Arc<SubHandle>> {
        self.all.read().get(&id).cloned()
    }

    pub fn plain_subs(&self) -> Vec<Arc<SubHandle>> {
        self.plain.read().clone()
    }

    pub fn durable_subs(&self) -> Vec<Arc<SubHandle>> {
        self.durables.read().values().cloned().collect()
    }

    pub fn all_subs(&self) -> Vec<Arc<SubHandle>> {
        self.all.read().values().cloned().collect()
    }

    pub fn queue_groups(&self) -> Vec<Arc<QueueGroupRuntime>> {
        self.queue_groups.read().values().cloned().collect()
    }

    /// Removes `id` from every index, including its queue group if any.
    /// Used for non-durable delete and for explicit durable unsubscribe;
    /// offlining a durable (client close, not unsubscribe) does *not* call
    /// this — the durable entry stays in `durables` so a reconnect finds it.
    pub async fn remove_sub(&self, id: SubscriptionId) {
        self.all.write().remove(&id);
        self.plain.write().retain(|s| s.id != id);
        self.durables.write().retain(|_, s| s.id != id);
        let groups: Vec<Arc<QueueGroupRuntime>> = self.queue_groups.read().values().cloned().collect();
        for group in groups {
            group.remove_member(id).await;
        }
    }
}

/// The broker-wide `name → ChannelState` map. Channel creation takes the
/// writer lock so name uniqueness is enforced atomically (§4.B).
pub struct ChannelDirectory {
    channels: RwLock<HashMap<String, Arc<ChannelState>>>,
}

impl ChannelDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<ChannelState>> {
        self.channels.read().get(name).cloned()
    }

    /// Returns the existing entry if `name` is already present (creation is
    /// idempotent at the store layer; this keeps the in-memory side
    /// idempotent too), otherwise inserts and returns `state`.
    pub fn get_or_insert(&self, name: &str, state: Arc<ChannelState>) -> Arc<ChannelState> {
        self.channels.write().entry(name.to_string()).or_insert(state).clone()
    }

    pub fn all(&self) -> Vec<Arc<ChannelState>> {
        self.channels.read().values().cloned().collect()
    }
}
