use crate::dialect::Dialect;

/// The six tables from the relational back-end design: `server_info`
/// (single row keyed by a constant `uniquerow` column), `clients`,
/// `channels`, `messages`, `subscriptions`, `subs_pending`.
pub fn create_tables_sql(dialect: Dialect) -> Vec<String> {
    let blob = dialect.blob_type();
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS server_info (
                uniquerow INTEGER PRIMARY KEY,
                cluster_id TEXT NOT NULL,
                discover_prefix TEXT NOT NULL,
                publish_prefix TEXT NOT NULL,
                subscribe_subj TEXT NOT NULL,
                unsub_subj TEXT NOT NULL,
                close_subj TEXT NOT NULL,
                version BIGINT NOT NULL
            )"
        ),
        "CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            heartbeat_inbox TEXT NOT NULL
        )"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS channels (
            id BIGINT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            maxseq BIGINT NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0
        )"
        .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS messages (
                channel_id BIGINT NOT NULL,
                seq BIGINT NOT NULL,
                timestamp_ns BIGINT NOT NULL,
                expiration_ns BIGINT NOT NULL,
                data {blob} NOT NULL,
                PRIMARY KEY (channel_id, seq)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                subid BIGINT PRIMARY KEY,
                channel_id BIGINT NOT NULL,
                proto {blob} NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0
            )"
        ),
        "CREATE TABLE IF NOT EXISTS subs_pending (
            subid BIGINT NOT NULL,
            seq BIGINT NOT NULL,
            PRIMARY KEY (subid, seq)
        )"
        .to_string(),
    ]
}
