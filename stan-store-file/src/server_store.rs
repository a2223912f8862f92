use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use stan_gax::{SharedClock, StanError};
use stan_store::{ChannelStores, RecoveredChannel, RecoveredState, ServerStore};
use stan_types::{Channel, ChannelId, Client, ClientId, Limits, ServerInfo};

use crate::{channel_log, client_log::FileClientLog, manifest, message_log::FileMessageStore, sub_log::FileSubStore};

struct ChannelEntry {
    channel: Mutex<Channel>,
    messages: Arc<FileMessageStore>,
    subs: Arc<FileSubStore>,
}

/// The append-only file back-end: one manifest for `ServerInfo`, one log
/// for clients, and one `c:<name>` subdirectory per channel holding that
/// channel's message log (`msgs.dat`) and subscription log (`subs.dat`).
/// Opening a store *is* recovering it — every log is scanned and folded
/// during `open`, so `recover()` just reports what construction already
/// found.
pub struct FileStore {
    root: PathBuf,
    server_info: RwLock<Option<ServerInfo>>,
    clients: FileClientLog,
    channels: RwLock<HashMap<String, ChannelEntry>>,
    next_channel_id: AtomicU64,
    limits: RwLock<Limits>,
    clock: SharedClock,
}

fn channel_dir(root: &Path, name: &str) -> PathBuf {
    root.join(format!("c:{name}"))
}

impl FileStore {
    /// Opens (creating if absent) the store rooted at `root`, replaying
    /// every existing channel's logs.
    pub fn open(root: impl Into<PathBuf>, clock: SharedClock, limits: Limits) -> Result<Self, StanError> {
        limits.validate()?;
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StanError::store_unavailable(format!("create {root:?}: {e}")))?;

        let server_info = manifest::read(root.join("server.dat"))?;
        let clients = FileClientLog::open(root.join("clients.dat"))?;

        let mut channels = HashMap::new();
        let mut max_id = 0u64;
        let entries = fs::read_dir(&root).map_err(|e| StanError::store_unavailable(format!("scan {root:?}: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| StanError::store_unavailable(e.to_string()))?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let Some(name) = file_name.strip_prefix("c:") else {
                continue;
            };
            let dir = entry.path();
            let Some(channel) = channel_log::read(dir.join("channel.dat"))? else {
                continue;
            };
            max_id = max_id.max(channel.id.0);
            let resolved = limits.resolve(name);
            let messages = Arc::new(FileMessageStore::open(dir.join("msgs.dat"), clock.clone(), resolved)?);
            let subs = Arc::new(FileSubStore::open(dir.join("subs.dat"), resolved)?);
            channels.insert(
                name.to_string(),
                ChannelEntry {
                    channel: Mutex::new(channel),
                    messages,
                    subs,
                },
            );
        }

        Ok(Self {
            root,
            server_info: RwLock::new(server_info),
            clients,
            channels: RwLock::new(channels),
            next_channel_id: AtomicU64::new(max_id + 1),
            limits: RwLock::new(limits),
            clock,
        })
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
impl ServerStore for FileStore {
    async fn init(&self, info: &ServerInfo) -> Result<(), StanError> {
        let mut persisted = self.server_info.write();
        match persisted.as_ref() {
            None => {
                manifest::write(self.root.join("server.dat"), info)?;
                *persisted = Some(info.clone());
                Ok(())
            }
            Some(existing) => existing
                .compatible_with(info)
                .map_err(|e| match e {
                    stan_types::server_info::CompatibilityError::ClusterIdMismatch { .. } => {
                        StanError::cluster_id_mismatch(e.to_string())
                    }
                    stan_types::server_info::CompatibilityError::VersionMismatch { .. } => {
                        StanError::version_mismatch(e.to_string())
                    }
                }),
        }
    }

    async fn recover(&self) -> Result<Option<RecoveredState>, StanError> {
        let server_info = match self.server_info.read().clone() {
            None => return Ok(None),
            Some(info) => info,
        };
        let mut channels = HashMap::new();
        for (name, entry) in self.channels.read().iter() {
            let first_seq = entry.messages.first_sequence().await?;
            let last_seq = entry.messages.last_sequence().await?;
            channels.insert(
                name.clone(),
                RecoveredChannel {
                    channel: entry.channel.lock().clone(),
                    subscriptions: entry.subs.recovered_subscriptions(),
                    first_seq,
                    last_seq,
                },
            );
        }
        Ok(Some(RecoveredState {
            server_info,
            clients: self.clients.clients(),
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

        let id = ChannelId(self.next_channel_id.fetch_add(1, Ordering::SeqCst));
        let dir = channel_dir(&self.root, name);
        fs::create_dir_all(&dir).map_err(|e| StanError::store_unavailable(format!("create {dir:?}: {e}")))?;

        let channel = Channel::new(id, name);
        channel_log::write(dir.join("channel.dat"), &channel)?;

        let resolved = limits.resolve(name);
        let messages = Arc::new(FileMessageStore::open(dir.join("msgs.dat"), self.clock.clone(), resolved)?);
        let subs = Arc::new(FileSubStore::open(dir.join("subs.dat"), resolved)?);

        let mut channels = self.channels.write();
        let entry = channels.entry(name.to_string()).or_insert_with(|| ChannelEntry {
            channel: Mutex::new(channel),
            messages,
            subs,
        });
        Ok(Self::to_channel_stores(entry))
    }

    async fn add_client(&self, client: &Client) -> Result<(), StanError> {
        self.clients.add(client)
    }

    async fn delete_client(&self, id: &ClientId) -> Result<(), StanError> {
        self.clients.delete(id.as_str())
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
        for entry in self.channels.read().values() {
            entry.messages.flush().await?;
            entry.subs.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stan_gax::SystemClock;

    fn clock() -> SharedClock {
        Arc::new(SystemClock)
    }

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
    async fn create_channel_is_idempotent_and_assigns_stable_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), clock(), Limits::default()).unwrap();
        let a = store.create_channel("orders", &Limits::default()).await.unwrap();
        let b = store.create_channel("orders", &Limits::default()).await.unwrap();
        assert_eq!(a.channel.id, b.channel.id);
    }

    #[tokio::test]
    async fn init_rejects_cluster_id_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), clock(), Limits::default()).unwrap();
        store.init(&server_info()).await.unwrap();
        let mut other = server_info();
        other.cluster_id = "other-cluster".into();
        assert!(store.init(&other).await.is_err());
    }

    #[tokio::test]
    async fn recover_reconstructs_channels_and_clients_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path(), clock(), Limits::default()).unwrap();
            store.init(&server_info()).await.unwrap();
            let stores = store.create_channel("orders", &Limits::default()).await.unwrap();
            stores.messages.store(bytes::Bytes::from_static(b"a")).await.unwrap();
            store
                .add_client(&Client::new(ClientId::parse("c1").unwrap(), "hb.c1"))
                .await
                .unwrap();
        }
        let store = FileStore::open(dir.path(), clock(), Limits::default()).unwrap();
        let recovered = store.recover().await.unwrap().unwrap();
        assert_eq!(recovered.clients.len(), 1);
        let orders = recovered.channels.get("orders").unwrap();
        assert_eq!(orders.last_seq, 1);
    }

    #[tokio::test]
    async fn channel_limit_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let limits = Limits {
            max_channels: 1,
            ..Default::default()
        };
        let store = FileStore::open(dir.path(), clock(), limits.clone()).unwrap();
        store.create_channel("a", &limits).await.unwrap();
        assert!(store.create_channel("b", &limits).await.is_err());
    }
}
