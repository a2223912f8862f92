//! Dispatch (§4.E): the per-channel delivery loop, the ack-wait redelivery
//! sweep, and the ack handler. One loop per [`ChannelState`] is the single
//! writer of that channel's subscriber cursors — publishing into a channel
//! only appends to the message log and signals `notify`; it never touches
//! subscriber state directly.

use std::sync::Arc;

use stan_gax::{CancellationToken, SharedClock, StanError};
use stan_store::SubStore;
use stan_types::{Subscription, SubscriptionId};

use crate::channel::{ChannelState, QueueGroupRuntime, SubHandle};
use crate::client_registry::ClientRegistry;
use crate::config::BrokerOptions;
use crate::subscription;
use crate::transport::Publisher;

/// A durable whose owning client isn't currently registered is Offline
/// (§4.C): it must keep accumulating undelivered messages for resume, but
/// must not be drained into or advance `last_sent` while nobody is
/// listening on its inbox.
fn durable_is_attached(sub: &SubHandle, clients: &ClientRegistry) -> bool {
    sub.durable_name.is_none() || clients.is_registered(&sub.client_id)
}

/// Persists the delivery (pending-ack row plus the subscription's bumped
/// `last_sent`) before publishing, so a crash between persist and publish is
/// indistinguishable from a dropped message — the redelivery sweep will
/// resend it, consistent with at-least-once delivery. Returns the
/// just-persisted snapshot so the caller can read `inbox` without a second
/// lock round-trip.
async fn persist_and_record_delivery(
    subs_store: &dyn SubStore,
    sub: &Arc<SubHandle>,
    seq: u64,
    now_ns: i64,
) -> Result<Subscription, StanError> {
    sub.with_mut(|s| subscription::record_delivery(s, seq, now_ns)).await;
    subs_store.add_seq_pending(sub.id, seq).await?;
    let snapshot = sub.snapshot().await;
    subs_store.update_sub(&snapshot).await?;
    Ok(snapshot)
}

/// Drains everything currently sendable to a single plain or durable
/// subscriber: while `last_sent < last_seq` and the sub isn't Stalled, look
/// up the next message and send it. A seq the store no longer has (expired
/// out from under a lagging subscriber) is skipped without redelivery.
async fn drain_plain_or_durable(
    channel: &ChannelState,
    sub: &Arc<SubHandle>,
    publisher: &dyn Publisher,
    clock: &SharedClock,
    clients: &ClientRegistry,
) -> Result<(), StanError> {
    if !durable_is_attached(sub, clients) {
        return Ok(());
    }
    loop {
        let last_seq = channel.messages.last_sequence().await?;
        let snapshot = sub.snapshot().await;
        if snapshot.deleted || subscription::is_stalled(&snapshot) {
            return Ok(());
        }
        let next = snapshot.last_sent + 1;
        if next > last_seq {
            return Ok(());
        }
        match channel.messages.lookup(next).await? {
            None => {
                sub.with_mut(|s| s.last_sent = next).await;
                let updated = sub.snapshot().await;
                channel.subs_store.update_sub(&updated).await?;
            }
            Some(msg) => {
                let now_ns = clock.now_ns();
                let updated = persist_and_record_delivery(channel.subs_store.as_ref(), sub, next, now_ns).await?;
                publisher.publish(&updated.inbox, next, false, msg.data).await?;
            }
        }
    }
}

/// Drains everything currently sendable to one queue group: the group
/// shares a single cursor, so a seq is only ever looked up once and handed
/// to whichever member `next_sendable_member` picks.
async fn drain_queue_group(
    channel: &ChannelState,
    group: &Arc<QueueGroupRuntime>,
    publisher: &dyn Publisher,
    clock: &SharedClock,
) -> Result<(), StanError> {
    loop {
        let last_seq = channel.messages.last_sequence().await?;
        let next = group.last_sent().await + 1;
        if next > last_seq {
            return Ok(());
        }
        let members = group.members().await;
        if members.is_empty() {
            return Ok(());
        }
        match channel.messages.lookup(next).await? {
            None => {
                group.skip_seq(next).await;
            }
            Some(msg) => {
                let max_in_flight = members[0].snapshot().await.max_in_flight;
                let Some(member) = group.next_sendable_member(max_in_flight).await else {
                    return Ok(());
                };
                let now_ns = clock.now_ns();
                let updated = persist_and_record_delivery(channel.subs_store.as_ref(), &member, next, now_ns).await?;
                group.record_delivery(member.id, next, now_ns).await;
                publisher.publish(&updated.inbox, next, false, msg.data).await?;
            }
        }
    }
}

/// One sweep of the ack-wait redelivery timer over every sub and queue
/// group in `channel`. Resends messages still in the pending-ack set past
/// their `ack_wait`; a seq that expired out of the store since delivery is
/// dropped from the pending set instead of resent.
pub async fn redeliver_tick(
    channel: &ChannelState,
    publisher: &dyn Publisher,
    clock: &SharedClock,
    clients: &ClientRegistry,
) -> Result<(), StanError> {
    let now_ns = clock.now_ns();

    for sub in channel.all_subs() {
        if sub.queue_group.is_some() {
            continue;
        }
        if !durable_is_attached(&sub, clients) {
            continue;
        }
        let snapshot = sub.snapshot().await;
        if snapshot.deleted {
            continue;
        }
        for seq in subscription::due_for_redelivery(&snapshot, now_ns) {
            match channel.messages.lookup(seq).await? {
                Some(msg) => {
                    sub.with_mut(|s| {
                        s.acks_pending.insert(seq, now_ns);
                    })
                    .await;
                    let updated = sub.snapshot().await;
                    channel.subs_store.update_sub(&updated).await?;
                    publisher.publish(&updated.inbox, seq, true, msg.data).await?;
                }
                None => {
                    sub.with_mut(|s| {
                        s.acks_pending.remove(&seq);
                    })
                    .await;
                    channel.subs_store.ack_seq_pending(sub.id, seq).await?;
                    let updated = sub.snapshot().await;
                    channel.subs_store.update_sub(&updated).await?;
                }
            }
        }
    }

    for group in channel.queue_groups() {
        let members = group.members().await;
        if members.is_empty() {
            continue;
        }
        let first = members[0].snapshot().await;
        for seq in group.due_for_redelivery(first.ack_wait, now_ns).await {
            match channel.messages.lookup(seq).await? {
                Some(msg) => {
                    if let Some(member) = group.redeliver(seq, now_ns, first.max_in_flight).await {
                        channel.subs_store.add_seq_pending(member.id, seq).await?;
                        let snapshot = member.snapshot().await;
                        publisher.publish(&snapshot.inbox, seq, true, msg.data).await?;
                    }
                }
                None => {
                    if let Some(owner) = group.record_ack(seq).await {
                        channel.subs_store.ack_seq_pending(owner, seq).await?;
                    }
                }
            }
        }
    }

    Ok(())
}

/// `Ack` (§4.C): resolves `ack_inbox` to the subscription that owns it,
/// records the ack, and persists it. A duplicate or stale ack is a no-op,
/// not an error — matching the "sub not found or seq not pending" edge case.
pub async fn ack(channel: &ChannelState, sub_id: SubscriptionId, seq: u64) -> Result<(), StanError> {
    let Some(sub) = channel.find_sub(sub_id) else {
        return Ok(());
    };
    let acked = sub.with_mut(|s| subscription::record_ack(s, seq)).await;
    if !acked {
        if let Some(group_name) = sub.queue_group.clone() {
            if let Some(group) = channel.find_queue_group(&group_name) {
                group.record_ack(seq).await;
            }
        }
        return Ok(());
    }
    channel.subs_store.ack_seq_pending(sub_id, seq).await?;
    if let Some(group_name) = sub.queue_group.clone() {
        if let Some(group) = channel.find_queue_group(&group_name) {
            group.record_ack(seq).await;
        }
    }
    channel.notify.notify_waiters();
    Ok(())
}

/// Spawns the single background task that owns delivery for one channel:
/// wakes on publish/subscribe (`notify`) or on the redelivery tick,
/// whichever comes first, and runs until `cancel` fires.
pub fn spawn_channel_loop(
    channel: Arc<ChannelState>,
    publisher: Arc<dyn Publisher>,
    clock: SharedClock,
    options: BrokerOptions,
    cancel: CancellationToken,
    clients: Arc<ClientRegistry>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(options.redelivery_tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = channel.notify.notified() => {}
                _ = tick.tick() => {}
            }

            for sub in channel.plain_subs() {
                if let Err(e) = drain_plain_or_durable(&channel, &sub, publisher.as_ref(), &clock, clients.as_ref()).await {
                    tracing::warn!(channel = %channel.name, sub = sub.id.0, error = %e, "delivery failed");
                }
            }
            for sub in channel.durable_subs() {
                if let Err(e) = drain_plain_or_durable(&channel, &sub, publisher.as_ref(), &clock, clients.as_ref()).await {
                    tracing::warn!(channel = %channel.name, sub = sub.id.0, error = %e, "delivery failed");
                }
            }
            for group in channel.queue_groups() {
                if let Err(e) = drain_queue_group(&channel, &group, publisher.as_ref(), &clock).await {
                    tracing::warn!(channel = %channel.name, group = %group.name, error = %e, "delivery failed");
                }
            }
            if let Err(e) = redeliver_tick(&channel, publisher.as_ref(), &clock, clients.as_ref()).await {
                tracing::warn!(channel = %channel.name, error = %e, "redelivery sweep failed");
            }
        }
    })
}
