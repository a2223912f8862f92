use crate::dialect::Dialect;

/// Every SQL statement the store issues, rendered once at construction
/// time with this instance's placeholder dialect. Mirrors the source's
/// prepared-statement table, but owned by the `SqlStore` rather than a
/// process-wide global.
pub struct Queries {
    pub select_server_info: String,
    pub insert_server_info: String,

    pub select_clients: String,
    pub upsert_client: String,
    pub delete_client: String,

    pub select_channels: String,
    pub select_channel_by_name: String,
    pub select_max_channel_id: String,
    pub insert_channel: String,

    pub insert_message: String,
    pub select_message: String,
    pub select_first_message: String,
    pub select_last_message: String,
    pub select_seq_from_timestamp: String,
    pub select_message_count_and_bytes: String,
    pub delete_expired_messages: String,
    pub delete_oldest_message: String,
    pub select_min_seq: String,
    pub select_channel_maxseq: String,
    pub update_channel_maxseq: String,

    pub select_subscriptions_by_channel: String,
    pub select_max_subid: String,
    pub select_active_sub_count: String,
    pub insert_subscription: String,
    pub update_subscription: String,
    pub soft_delete_subscription: String,
    pub delete_pending_for_sub: String,
    pub select_pending_for_sub: String,
    pub insert_pending: String,
    pub delete_pending: String,
}

impl Queries {
    pub fn new(d: Dialect) -> Self {
        Self {
            select_server_info: "SELECT cluster_id, discover_prefix, publish_prefix, subscribe_subj, unsub_subj, close_subj, version FROM server_info WHERE uniquerow = 1".to_string(),
            insert_server_info: format!(
                "INSERT INTO server_info (uniquerow, cluster_id, discover_prefix, publish_prefix, subscribe_subj, unsub_subj, close_subj, version) VALUES (1, {}, {}, {}, {}, {}, {}, {})",
                d.placeholder(1), d.placeholder(2), d.placeholder(3), d.placeholder(4), d.placeholder(5), d.placeholder(6), d.placeholder(7)
            ),

            select_clients: "SELECT id, heartbeat_inbox FROM clients".to_string(),
            upsert_client: match d {
                Dialect::Sqlite => "INSERT OR REPLACE INTO clients (id, heartbeat_inbox) VALUES (?, ?)".to_string(),
                Dialect::Postgres => "INSERT INTO clients (id, heartbeat_inbox) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET heartbeat_inbox = EXCLUDED.heartbeat_inbox".to_string(),
            },
            delete_client: format!("DELETE FROM clients WHERE id = {}", d.placeholder(1)),

            select_channels: "SELECT id, name, maxseq, deleted FROM channels WHERE deleted = 0".to_string(),
            select_channel_by_name: format!(
                "SELECT id, name, maxseq, deleted FROM channels WHERE name = {}",
                d.placeholder(1)
            ),
            select_max_channel_id: "SELECT COALESCE(MAX(id), 0) FROM channels".to_string(),
            insert_channel: format!(
                "INSERT INTO channels (id, name, maxseq, deleted) VALUES ({}, {}, 0, 0)",
                d.placeholder(1),
                d.placeholder(2)
            ),

            insert_message: format!(
                "INSERT INTO messages (channel_id, seq, timestamp_ns, expiration_ns, data) VALUES ({}, {}, {}, {}, {})",
                d.placeholder(1), d.placeholder(2), d.placeholder(3), d.placeholder(4), d.placeholder(5)
            ),
            select_message: format!(
                "SELECT seq, timestamp_ns, expiration_ns, data FROM messages WHERE channel_id = {} AND seq = {}",
                d.placeholder(1), d.placeholder(2)
            ),
            select_first_message: format!(
                "SELECT seq, timestamp_ns, expiration_ns, data FROM messages WHERE channel_id = {} ORDER BY seq ASC LIMIT 1",
                d.placeholder(1)
            ),
            select_last_message: format!(
                "SELECT seq, timestamp_ns, expiration_ns, data FROM messages WHERE channel_id = {} ORDER BY seq DESC LIMIT 1",
                d.placeholder(1)
            ),
            select_seq_from_timestamp: format!(
                "SELECT seq FROM messages WHERE channel_id = {} AND timestamp_ns >= {} ORDER BY seq ASC LIMIT 1",
                d.placeholder(1), d.placeholder(2)
            ),
            select_message_count_and_bytes: format!(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(data)), 0) FROM messages WHERE channel_id = {}",
                d.placeholder(1)
            ),
            delete_expired_messages: format!(
                "DELETE FROM messages WHERE channel_id = {} AND expiration_ns != 0 AND expiration_ns <= {}",
                d.placeholder(1), d.placeholder(2)
            ),
            delete_oldest_message: format!(
                "DELETE FROM messages WHERE channel_id = {} AND seq = (SELECT MIN(seq) FROM messages WHERE channel_id = {})",
                d.placeholder(1), d.placeholder(2)
            ),
            select_min_seq: format!("SELECT COALESCE(MIN(seq), 0) FROM messages WHERE channel_id = {}", d.placeholder(1)),
            select_channel_maxseq: format!("SELECT maxseq FROM channels WHERE id = {}", d.placeholder(1)),
            update_channel_maxseq: format!(
                "UPDATE channels SET maxseq = {} WHERE id = {}",
                d.placeholder(1), d.placeholder(2)
            ),

            select_subscriptions_by_channel: format!(
                "SELECT proto FROM subscriptions WHERE channel_id = {} AND deleted = 0",
                d.placeholder(1)
            ),
            select_max_subid: "SELECT COALESCE(MAX(subid), 0) FROM subscriptions".to_string(),
            select_active_sub_count: format!(
                "SELECT COUNT(*) FROM subscriptions WHERE channel_id = {} AND deleted = 0",
                d.placeholder(1)
            ),
            insert_subscription: format!(
                "INSERT INTO subscriptions (subid, channel_id, proto, deleted) VALUES ({}, {}, {}, 0)",
                d.placeholder(1), d.placeholder(2), d.placeholder(3)
            ),
            update_subscription: format!(
                "UPDATE subscriptions SET proto = {} WHERE subid = {}",
                d.placeholder(1), d.placeholder(2)
            ),
            soft_delete_subscription: format!("UPDATE subscriptions SET deleted = 1 WHERE subid = {}", d.placeholder(1)),
            delete_pending_for_sub: format!("DELETE FROM subs_pending WHERE subid = {}", d.placeholder(1)),
            select_pending_for_sub: format!("SELECT seq FROM subs_pending WHERE subid = {}", d.placeholder(1)),
            insert_pending: match d {
                Dialect::Sqlite => "INSERT OR IGNORE INTO subs_pending (subid, seq) VALUES (?, ?)".to_string(),
                Dialect::Postgres => "INSERT INTO subs_pending (subid, seq) VALUES ($1, $2) ON CONFLICT DO NOTHING".to_string(),
            },
            delete_pending: format!(
                "DELETE FROM subs_pending WHERE subid = {} AND seq = {}",
                d.placeholder(1), d.placeholder(2)
            ),
        }
    }
}
