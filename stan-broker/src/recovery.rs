//! Recovery orchestrator (§4.G): on startup, reconcile `ServerInfo`,
//! reconstruct every channel's in-memory subscriber indices from its
//! persisted subscriptions, and seed the client registry with offline
//! shells — all before the dispatcher or expiration engine see a single
//! channel.

use std::sync::Arc;

use stan_gax::{SharedClock, StanError};
use stan_store::ServerStore;
use stan_types::{Limits, ServerInfo, Subscription};

use crate::channel::{ChannelDirectory, ChannelState, SubHandle};
use crate::client_registry::ClientRegistry;

/// Runs the full bootstrap sequence and leaves `channels` populated with a
/// [`ChannelState`] per recovered channel, its subscriber indices already
/// rebuilt. The caller (`Broker::start`) is responsible for spawning the
/// dispatch and expiration loops once this returns — recovery only
/// reconstructs state, it does not start delivering.
pub async fn bootstrap(
    store: &Arc<dyn ServerStore>,
    channels: &Arc<ChannelDirectory>,
    client_registry: &Arc<ClientRegistry>,
    server_info: &ServerInfo,
    limits: &Limits,
    clock: &SharedClock,
) -> Result<(), StanError> {
    store.init(server_info).await?;
    let Some(recovered) = store.recover().await? else {
        return Ok(());
    };

    for client in &recovered.clients {
        client_registry.seed_recovered_client(client.clone());
    }

    for (name, rc) in recovered.channels {
        let stores = store.create_channel(&name, limits).await?;
        let state = ChannelState::new(&stores.channel, stores.messages, stores.subs);

        for mut sub in rc.subscriptions {
            if sub.deleted {
                continue;
            }
            let client_survived = recovered.clients.iter().any(|c| c.id == sub.client_id);
            if !client_survived && sub.durable_name.is_none() {
                state.subs_store.delete_sub(sub.id).await?;
                continue;
            }

            let now_ns = clock.now_ns();
            restamp_pending(&mut sub, now_ns);

            let sub_id = sub.id;
            let queue_group = sub.queue_group.clone();
            let handle = SubHandle::new(sub);
            state.register(handle.clone());
            if let Some(group_name) = queue_group {
                let group = state.queue_group(&group_name);
                group.add_member(handle.clone()).await;
                let snapshot = handle.snapshot().await;
                // The shared cursor is derived, not persisted: restore it from
                // the member's own `last_sent` before replaying its pending
                // acks, or a fully-acked member (no pending rows) would leave
                // the group cursor at 0 and its already-consumed messages
                // would be redelivered after restart.
                group.skip_seq(snapshot.last_sent).await;
                for (&seq, &sent_ts) in &snapshot.acks_pending {
                    group.record_delivery(sub_id, seq, sent_ts).await;
                }
            }
            if client_survived {
                client_registry.add_sub_to_client(&handle.client_id, sub_id)?;
            }
        }

        channels.get_or_insert(&name, state);
    }

    Ok(())
}

/// Restamps every pending-ack entry to `now_ns` so the ack-wait clock
/// restarts cleanly after a restart instead of firing every recovered
/// pending message for immediate redelivery against a stale timestamp.
fn restamp_pending(sub: &mut Subscription, now_ns: i64) {
    for sent_ts in sub.acks_pending.values_mut() {
        *sent_ts = now_ns;
    }
}
