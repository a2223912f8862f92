use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::channel::ChannelId;
use crate::client::ClientId;

/// A subscription's globally unique identity. Soft-deleted rows keep their
/// id reserved so it is never reassigned; allocators derive the next id
/// from `MAX(sub_id)` over every row, deleted or not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The rule that determines a subscription's initial `last_sent`,
/// resolved once against the channel's `MessageStore` at subscribe time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StartPosition {
    NewOnly,
    LastReceived,
    AllAvailable,
    SequenceStart(u64),
    TimeDeltaStart(Duration),
}

/// A subscription's lifecycle state, derived from its pending-ack count
/// and client attachment rather than persisted directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Stalled,
    Offline,
    Deleted,
}

/// A subscription on one channel. Plain (non-durable, non-queue)
/// subscriptions, durables, and queue-group members are all represented by
/// this one record; `durable_name` and `queue_group` distinguish the
/// variants the way the source schema does rather than via separate types.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub channel_id: ChannelId,
    pub client_id: ClientId,
    pub ack_inbox: String,
    pub inbox: String,
    pub durable_name: Option<String>,
    pub queue_group: Option<String>,
    pub ack_wait: Duration,
    pub max_in_flight: u32,
    pub start_position: StartPosition,
    pub last_sent: u64,
    pub acks_pending: BTreeMap<u64, i64>,
    pub manual_ack: bool,
    pub deleted: bool,
}

impl Subscription {
    pub fn is_durable(&self) -> bool {
        self.durable_name.is_some()
    }

    pub fn is_queue(&self) -> bool {
        self.queue_group.is_some()
    }

    /// `len(acks_pending) >= max_in_flight` per the Stalled-state invariant.
    pub fn is_stalled(&self) -> bool {
        self.acks_pending.len() as u32 >= self.max_in_flight
    }

    pub fn state(&self, client_attached: bool) -> SubscriptionState {
        if self.deleted {
            SubscriptionState::Deleted
        } else if self.is_durable() && !client_attached {
            SubscriptionState::Offline
        } else if self.is_stalled() {
            SubscriptionState::Stalled
        } else {
            SubscriptionState::Active
        }
    }
}

/// The persisted `(sub_id, seq)` row: a message was sent to `sub_id` but
/// has not yet been acked. Removed on ack, cleared wholesale on delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PendingAck {
    pub sub_id: SubscriptionId,
    pub seq: u64,
}

/// A named set of subscriptions on one channel sharing one delivery
/// cursor and one pending-ack set. Derived at runtime from the
/// `queue_group` field shared by its member [`Subscription`] rows — it is
/// never itself persisted.
#[derive(Clone, Debug, Default)]
pub struct QueueGroup {
    pub name: String,
    pub members: Vec<SubscriptionId>,
    pub shared_last_sent: u64,
    pub shared_acks_pending: BTreeMap<u64, SubscriptionId>,
}

impl QueueGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            shared_last_sent: 0,
            shared_acks_pending: BTreeMap::new(),
        }
    }

    pub fn is_stalled(&self, max_in_flight: u32) -> bool {
        self.shared_acks_pending.len() as u32 >= max_in_flight
    }
}
