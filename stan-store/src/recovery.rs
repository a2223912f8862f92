use std::collections::HashMap;

use stan_types::{Channel, Client, ServerInfo, Subscription};

/// One channel's recovered shape: its persisted record, its (not yet
/// reattached to any client) subscriptions, and the sequence bounds of the
/// messages still physically present in its `MessageStore`.
#[derive(Clone, Debug)]
pub struct RecoveredChannel {
    pub channel: Channel,
    pub subscriptions: Vec<Subscription>,
    pub first_seq: u64,
    pub last_seq: u64,
}

/// Everything `ServerStore::recover` hands back for the recovery
/// orchestrator (§4.G) to rebuild in-memory state from. `None` (not this
/// type) signals an empty store.
#[derive(Clone, Debug)]
pub struct RecoveredState {
    pub server_info: ServerInfo,
    pub clients: Vec<Client>,
    pub channels: HashMap<String, RecoveredChannel>,
}
