use std::time::Duration;

/// Broker-wide timing and concurrency knobs. Mirrors the shape of
/// `spanner::session_pool::SessionConfig`: a plain struct with a `Default`
/// impl, filled in by whatever embeds this crate (a CLI is a non-goal here).
#[derive(Clone, Debug)]
pub struct BrokerOptions {
    /// How often a registered client's heartbeat timer fires.
    pub hb_interval: Duration,
    /// How long a single heartbeat probe waits for a reply.
    pub hb_timeout: Duration,
    /// Consecutive heartbeat failures before a client is unregistered.
    pub max_failed_hb: u32,
    /// How long a duplicate-CID probe to the old client waits for a reply
    /// before the new connect is allowed to take over.
    pub dup_cid_timeout: Duration,
    /// Upper bound on duplicate-CID probes running concurrently; surplus
    /// connect attempts queue behind this semaphore.
    pub dup_max_cid_routines: usize,
    /// Period of the per-channel ack-wait redelivery sweep.
    pub redelivery_tick: Duration,
    /// Back-off applied by the expiration loop after a store error.
    pub expiration_error_backoff: Duration,
    /// Upper bound on how long any loop may keep running past a shutdown
    /// signal before being treated as stuck.
    pub grace_shutdown: Duration,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            hb_interval: Duration::from_secs(30),
            hb_timeout: Duration::from_secs(5),
            max_failed_hb: 3,
            dup_cid_timeout: Duration::from_millis(500),
            dup_max_cid_routines: 64,
            redelivery_tick: Duration::from_millis(100),
            expiration_error_backoff: Duration::from_secs(1),
            grace_shutdown: Duration::from_secs(1),
        }
    }
}

/// Parameters for a `Subscribe` call, collected into one struct rather than
/// threaded as loose arguments the way the delivery-loop and recovery paths
/// both need to build a [`stan_types::Subscription`].
#[derive(Clone, Debug)]
pub struct SubscribeRequest {
    pub client_id: stan_types::ClientId,
    pub ack_inbox: String,
    pub inbox: String,
    pub durable_name: Option<String>,
    pub queue_group: Option<String>,
    pub ack_wait: Duration,
    pub max_in_flight: u32,
    pub start_position: stan_types::StartPosition,
    pub manual_ack: bool,
}
