use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sqlx::any::AnyPool;
use sqlx::Row;
use stan_gax::{CancellationToken, SharedClock, StanError};
use stan_store::{ChannelStores, RecoveredChannel, RecoveredState, ServerStore};
use stan_types::{Channel, ChannelId, Client, ClientId, Limits, ServerInfo};

use crate::dialect::Dialect;
use crate::message_store::SqlMessageStore;
use crate::pool;
use crate::queries::Queries;
use crate::schema;
use crate::sub_store::SqlSubStore;
use crate::ticker::TickingClock;

fn sql_err(e: sqlx::Error) -> StanError {
    StanError::store_unavailable(format!("sql error: {e}"))
}

/// How often the background ticker refreshes the "now" counter every
/// `SqlMessageStore` reads for `store`/`lookup` (§4.A "a background ticker
/// updates a monotonic 'now' counter used by expiration").
const TICKER_PERIOD: Duration = Duration::from_millis(200);

struct ChannelEntry {
    channel: Mutex<Channel>,
    messages: Arc<SqlMessageStore>,
    subs: Arc<SqlSubStore>,
}

/// The relational back-end: one shared connection pool serving every
/// channel, with per-channel views (`SqlMessageStore`/`SqlSubStore`)
/// scoped by `channel_id` rather than by a separate file handle.
pub struct SqlStore {
    pool: AnyPool,
    queries: Arc<Queries>,
    clock: SharedClock,
    limits: RwLock<Limits>,
    channels: RwLock<HashMap<String, ChannelEntry>>,
    ticker_cancel: CancellationToken,
    ticker_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SqlStore {
    /// Connects to `url`, creating the six tables if they do not already
    /// exist, caches a `SqlMessageStore`/`SqlSubStore` pair for every
    /// channel already present, and spawns the `TickingClock` every
    /// channel's store shares as its idea of "now" — seeded from `clock`
    /// (real wall time in production, a pinned clock in tests) and
    /// refreshed every `TICKER_PERIOD` off that same source.
    pub async fn connect(url: &str, clock: SharedClock, limits: Limits) -> Result<Self, StanError> {
        limits.validate()?;
        let dialect = pool::dialect_from_url(url);
        let sql_pool = pool::connect(url, 10).await?;
        for stmt in schema::create_tables_sql(dialect) {
            sqlx::query(&stmt).execute(&sql_pool).await.map_err(sql_err)?;
        }
        let queries = Arc::new(Queries::new(dialect));

        let ticker_cancel = CancellationToken::new();
        let (ticking_clock, ticker_handle) = TickingClock::spawn(clock, TICKER_PERIOD, ticker_cancel.child_token());
        let ticking_clock: SharedClock = Arc::new(ticking_clock);

        let store = Self {
            pool: sql_pool,
            queries,
            clock: ticking_clock,
            limits: RwLock::new(limits),
            channels: RwLock::new(HashMap::new()),
            ticker_cancel,
            ticker_handle: Mutex::new(Some(ticker_handle)),
        };
        store.load_channels().await?;
        Ok(store)
    }

    async fn load_channels(&self) -> Result<(), StanError> {
        let rows = sqlx::query(&self.queries.select_channels)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        let mut channels = self.channels.write();
        let limits = self.limits.read().clone();
        for row in rows {
            let id: i64 = row.try_get(0).map_err(sql_err)?;
            let name: String = row.try_get(1).map_err(sql_err)?;
            let maxseq: i64 = row.try_get(2).map_err(sql_err)?;
            let channel_id = ChannelId(id as u64);
            let resolved = limits.resolve(&name);
            channels.insert(
                name.clone(),
                ChannelEntry {
                    channel: Mutex::new(Channel {
                        id: channel_id,
                        name,
                        maxseq: maxseq as u64,
                        deleted: false,
                    }),
                    messages: Arc::new(SqlMessageStore::new(
                        self.pool.clone(),
                        self.queries.clone(),
                        channel_id,
                        self.clock.clone(),
                        resolved,
                    )),
                    subs: Arc::new(SqlSubStore::new(self.pool.clone(), self.queries.clone(), channel_id, resolved)),
                },
            );
        }
        Ok(())
    }

    fn to_channel_stores(entry: &ChannelEntry) -> ChannelStores {
        ChannelStores {
            channel: entry.channel.lock().clone(),
            messages: entry.messages.clone() as Arc<dyn stan_store::MessageStore>,
            subs: entry.subs.clone() as Arc<dyn stan_store::SubStore>,
        }
    }
}

#[async_trait]
impl ServerStore for SqlStore {
    async fn init(&self, info: &ServerInfo) -> Result<(), StanError> {
        let row = sqlx::query(&self.queries.select_server_info)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        match row {
            None => {
                sqlx::query(&self.queries.insert_server_info)
                    .bind(&info.cluster_id)
                    .bind(&info.discover_prefix)
                    .bind(&info.publish_prefix)
                    .bind(&info.subscribe_subj)
                    .bind(&info.unsub_subj)
                    .bind(&info.close_subj)
                    .bind(info.version as i64)
                    .execute(&self.pool)
                    .await
                    .map_err(sql_err)?;
                Ok(())
            }
            Some(row) => {
                let persisted = row_to_server_info(row)?;
                persisted.compatible_with(info).map_err(|e| match e {
                    stan_types::server_info::CompatibilityError::ClusterIdMismatch { .. } => {
                        StanError::cluster_id_mismatch(e.to_string())
                    }
                    stan_types::server_info::CompatibilityError::VersionMismatch { .. } => {
                        StanError::version_mismatch(e.to_string())
                    }
                })
            }
        }
    }

    async fn recover(&self) -> Result<Option<RecoveredState>, StanError> {
        let row = sqlx::query(&self.queries.select_server_info)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        let server_info = match row {
            None => return Ok(None),
            Some(row) => row_to_server_info(row)?,
        };

        let client_rows = sqlx::query(&self.queries.select_clients)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        let mut clients = Vec::with_capacity(client_rows.len());
        for row in client_rows {
            let id: String = row.try_get(0).map_err(sql_err)?;
            let heartbeat_inbox: String = row.try_get(1).map_err(sql_err)?;
            clients.push(Client::new(
                ClientId::parse(id).map_err(|e| StanError::store_corrupt(e.to_string()))?,
                heartbeat_inbox,
            ));
        }

        let mut channels = HashMap::new();
        for (name, entry) in self.channels.read().iter() {
            let first_seq = stan_store::MessageStore::first_sequence(entry.messages.as_ref()).await?;
            let last_seq = stan_store::MessageStore::last_sequence(entry.messages.as_ref()).await?;
            channels.insert(
                name.clone(),
                RecoveredChannel {
                    channel: entry.channel.lock().clone(),
                    subscriptions: entry.subs.recovered_subscriptions().await?,
                    first_seq,
                    last_seq,
                },
            );
        }

        for channel in channels.values() {
            for sub in &channel.subscriptions {
                if let Some(c) = clients.iter_mut().find(|c| c.id == sub.client_id) {
                    c.subs.push(sub.id);
                }
            }
        }

        Ok(Some(RecoveredState {
            server_info,
            clients,
            channels,
        }))
    }

    async fn create_channel(&self, name: &str, limits: &Limits) -> Result<ChannelStores, StanError> {
        stan_types::subject::validate_channel_name(name)?;
        {
            let channels = self.channels.read();
            if let Some(entry) = channels.get(name) {
                return Ok(Self::to_channel_stores(entry));
            }
            if channels.len() as u64 >= limits.max_channels {
                return Err(StanError::channel_limit_reached(format!(
                    "store already has {} channels",
                    channels.len()
                )));
            }
        }

        let max_id: i64 = sqlx::query(&self.queries.select_max_channel_id)
            .fetch_one(&self.pool)
            .await
            .map_err(sql_err)?
            .try_get(0)
            .map_err(sql_err)?;
        let id = ChannelId(max_id as u64 + 1);

        sqlx::query(&self.queries.insert_channel)
            .bind(id.0 as i64)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;

        let resolved = limits.resolve(name);
        let mut channels = self.channels.write();
        let entry = channels.entry(name.to_string()).or_insert_with(|| ChannelEntry {
            channel: Mutex::new(Channel::new(id, name)),
            messages: Arc::new(SqlMessageStore::new(
                self.pool.clone(),
                self.queries.clone(),
                id,
                self.clock.clone(),
                resolved,
            )),
            subs: Arc::new(SqlSubStore::new(self.pool.clone(), self.queries.clone(), id, resolved)),
        });
        Ok(Self::to_channel_stores(entry))
    }

    async fn add_client(&self, client: &Client) -> Result<(), StanError> {
        sqlx::query(&self.queries.upsert_client)
            .bind(client.id.as_str())
            .bind(&client.heartbeat_inbox)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn delete_client(&self, id: &ClientId) -> Result<(), StanError> {
        sqlx::query(&self.queries.delete_client)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn set_limits(&self, limits: &Limits) -> Result<(), StanError> {
        limits.validate()?;
        *self.limits.write() = limits.clone();
        for (name, entry) in self.channels.read().iter() {
            let resolved = limits.resolve(name);
            entry.messages.set_limits(resolved);
            entry.subs.set_limits(resolved);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StanError> {
        self.ticker_cancel.cancel();
        if let Some(handle) = self.ticker_handle.lock().take() {
            let _ = handle.await;
        }
        self.pool.close().await;
        Ok(())
    }
}

fn row_to_server_info(row: sqlx::any::AnyRow) -> Result<ServerInfo, StanError> {
    let version: i64 = row.try_get(6).map_err(sql_err)?;
    Ok(ServerInfo {
        cluster_id: row.try_get(0).map_err(sql_err)?,
        discover_prefix: row.try_get(1).map_err(sql_err)?,
        publish_prefix: row.try_get(2).map_err(sql_err)?,
        subscribe_subj: row.try_get(3).map_err(sql_err)?,
        unsub_subj: row.try_get(4).map_err(sql_err)?,
        close_subj: row.try_get(5).map_err(sql_err)?,
        version: version as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stan_gax::SystemClock;

    fn server_info() -> ServerInfo {
        ServerInfo {
            cluster_id: "test-cluster".into(),
            discover_prefix: "_STAN.discover".into(),
            publish_prefix: "_STAN.pub".into(),
            subscribe_subj: "_STAN.sub".into(),
            unsub_subj: "_STAN.unsub".into(),
            close_subj: "_STAN.close".into(),
            version: 1,
        }
    }

    #[tokio::test]
    async fn init_then_recover_round_trips_server_info() {
        let store = SqlStore::connect("sqlite::memory:", Arc::new(SystemClock), Limits::default())
            .await
            .unwrap();
        store.init(&server_info()).await.unwrap();
        let recovered = store.recover().await.unwrap().unwrap();
        assert_eq!(recovered.server_info, server_info());
    }

    #[tokio::test]
    async fn init_rejects_cluster_id_mismatch() {
        let store = SqlStore::connect("sqlite::memory:", Arc::new(SystemClock), Limits::default())
            .await
            .unwrap();
        store.init(&server_info()).await.unwrap();
        let mut other = server_info();
        other.cluster_id = "other".into();
        assert!(store.init(&other).await.is_err());
    }

    #[tokio::test]
    async fn create_channel_is_idempotent() {
        let store = SqlStore::connect("sqlite::memory:", Arc::new(SystemClock), Limits::default())
            .await
            .unwrap();
        let a = store.create_channel("orders", &Limits::default()).await.unwrap();
        let b = store.create_channel("orders", &Limits::default()).await.unwrap();
        assert_eq!(a.channel.id, b.channel.id);
    }

    #[tokio::test]
    async fn publish_and_recover_preserves_sequence() {
        let store = SqlStore::connect("sqlite::memory:", Arc::new(SystemClock), Limits::default())
            .await
            .unwrap();
        store.init(&server_info()).await.unwrap();
        let stores = store.create_channel("orders", &Limits::default()).await.unwrap();
        stores.messages.store(bytes::Bytes::from_static(b"a")).await.unwrap();
        stores.messages.store(bytes::Bytes::from_static(b"b")).await.unwrap();

        let recovered = store.recover().await.unwrap().unwrap();
        let orders = recovered.channels.get("orders").unwrap();
        assert_eq!(orders.last_seq, 2);
        assert_eq!(orders.first_seq, 1);
    }

    #[tokio::test]
    async fn stored_messages_are_timestamped_from_the_ticking_clock() {
        let manual = Arc::new(stan_gax::ManualClock::new(1_000_000_000));
        let store = SqlStore::connect("sqlite::memory:", manual.clone(), Limits::default())
            .await
            .unwrap();
        let stores = store.create_channel("orders", &Limits::default()).await.unwrap();
        let seq = stores.messages.store(bytes::Bytes::from_static(b"a")).await.unwrap();
        let msg = stores.messages.lookup(seq).await.unwrap().unwrap();
        assert_eq!(msg.timestamp_ns, 1_000_000_000, "ticking clock is seeded from the caller's clock");

        manual.advance(5_000_000_000);
        tokio::time::sleep(Duration::from_millis(250)).await;
        let seq2 = stores.messages.store(bytes::Bytes::from_static(b"b")).await.unwrap();
        let msg2 = stores.messages.lookup(seq2).await.unwrap().unwrap();
        assert_eq!(msg2.timestamp_ns, 6_000_000_000, "ticker refreshes from the same clock it was seeded from");

        store.close().await.unwrap();
    }
}
