use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use stan_gax::StanError;
use stan_types::limits::ResolvedLimits;
use stan_types::{Subscription, SubscriptionId};
use stan_store::SubStore;

use crate::record::{read_record, write_record};

/// One entry in the append-only subscription log. Folding a full log in
/// order reconstructs the final state of every subscription on the
/// channel, deleted or not.
#[derive(Serialize, Deserialize, Clone)]
enum SubLogEntry {
    Create(Subscription),
    Update(Subscription),
    Delete(u64),
    AddPending { sub_id: u64, seq: u64 },
    AckPending { sub_id: u64, seq: u64 },
}

struct SubLogState {
    subs: HashMap<u64, Subscription>,
    next_id: u64,
}

/// One channel's subscription log (`subs.dat`).
pub struct FileSubStore {
    file: Mutex<File>,
    state: Mutex<SubLogState>,
    limits: RwLock<ResolvedLimits>,
}

impl FileSubStore {
    pub fn open(path: impl AsRef<Path>, limits: ResolvedLimits) -> Result<Self, StanError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| StanError::store_unavailable(format!("open {path:?}: {e}")))?;

        let (subs, next_id) = replay(&mut file)?;

        Ok(Self {
            file: Mutex::new(file),
            state: Mutex::new(SubLogState { subs, next_id }),
            limits: RwLock::new(limits),
        })
    }

    pub fn set_limits(&self, limits: ResolvedLimits) {
        *self.limits.write() = limits;
    }

    /// Every subscription on the channel that has not been soft-deleted,
    /// for the recovery orchestrator to reattach or offline.
    pub fn recovered_subscriptions(&self) -> Vec<Subscription> {
        self.state
            .lock()
            .subs
            .values()
            .filter(|s| !s.deleted)
            .cloned()
            .collect()
    }

    fn append(&self, entry: &SubLogEntry) -> Result<(), StanError> {
        let bytes =
            bincode::serialize(entry).map_err(|e| StanError::store_corrupt(format!("encode sub record: {e}")))?;
        let mut file = self.file.lock();
        write_record(&mut *file, &bytes).map_err(|e| StanError::store_unavailable(e.to_string()))?;
        file.flush().map_err(|e| StanError::store_unavailable(e.to_string()))
    }
}

fn replay(file: &mut File) -> Result<(HashMap<u64, Subscription>, u64), StanError> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| StanError::store_unavailable(e.to_string()))?;
    let mut reader = BufReader::new(&mut *file);
    let mut subs: HashMap<u64, Subscription> = HashMap::new();
    let mut next_id: u64 = 1;
    let mut consumed: u64 = 0;
    loop {
        let before = consumed;
        match read_record(&mut reader) {
            Ok(None) => break,
            Ok(Some(payload)) => {
                consumed += 8 + payload.len() as u64;
                let entry: SubLogEntry = bincode::deserialize(&payload)
                    .map_err(|e| StanError::store_corrupt(format!("bad sub record: {e}")))?;
                fold(&mut subs, &mut next_id, entry);
            }
            Err(crate::record::RecordError::Truncated) => {
                tracing::warn!(offset = before, "truncating partial trailing sub record");
                file.set_len(before)
                    .map_err(|e| StanError::store_unavailable(e.to_string()))?;
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok((subs, next_id))
}

fn fold(subs: &mut HashMap<u64, Subscription>, next_id: &mut u64, entry: SubLogEntry) {
    match entry {
        SubLogEntry::Create(sub) | SubLogEntry::Update(sub) => {
            *next_id = (*next_id).max(sub.id.0 + 1);
            subs.insert(sub.id.0, sub);
        }
        SubLogEntry::Delete(id) => {
            *next_id = (*next_id).max(id + 1);
            if let Some(sub) = subs.get_mut(&id) {
                sub.deleted = true;
                sub.acks_pending.clear();
            }
        }
        SubLogEntry::AddPending { sub_id, seq } => {
            if let Some(sub) = subs.get_mut(&sub_id) {
                sub.acks_pending.insert(seq, 0);
            }
        }
        SubLogEntry::AckPending { sub_id, seq } => {
            if let Some(sub) = subs.get_mut(&sub_id) {
                sub.acks_pending.remove(&seq);
            }
        }
    }
}

#[async_trait]
impl SubStore for FileSubStore {
    async fn create_sub(&self, sub: &mut Subscription) -> Result<(), StanError> {
        let limits = *self.limits.read();
        {
            let mut state = self.state.lock();
            if sub.id.0 == 0 {
                sub.id = SubscriptionId(state.next_id);
                state.next_id += 1;
            }
            let active = state.subs.values().filter(|s| !s.deleted).count() as u64;
            if active >= limits.max_subscriptions {
                return Err(StanError::subscription_limit_reached(format!(
                    "channel already has {active} active subscriptions"
                )));
            }
            state.subs.insert(sub.id.0, sub.clone());
        }
        self.append(&SubLogEntry::Create(sub.clone()))
    }

    async fn update_sub(&self, sub: &Subscription) -> Result<(), StanError> {
        self.state.lock().subs.insert(sub.id.0, sub.clone());
        self.append(&SubLogEntry::Update(sub.clone()))
    }

    async fn delete_sub(&self, sub_id: SubscriptionId) -> Result<(), StanError> {
        {
            let mut state = self.state.lock();
            if let Some(sub) = state.subs.get_mut(&sub_id.0) {
                sub.deleted = true;
                sub.acks_pending.clear();
            }
        }
        self.append(&SubLogEntry::Delete(sub_id.0))
    }

    async fn add_seq_pending(&self, sub_id: SubscriptionId, seq: u64) -> Result<(), StanError> {
        {
            let mut state = self.state.lock();
            if let Some(sub) = state.subs.get_mut(&sub_id.0) {
                sub.acks_pending.insert(seq, 0);
            }
        }
        self.append(&SubLogEntry::AddPending { sub_id: sub_id.0, seq })
    }

    async fn ack_seq_pending(&self, sub_id: SubscriptionId, seq: u64) -> Result<(), StanError> {
        {
            let mut state = self.state.lock();
            if let Some(sub) = state.subs.get_mut(&sub_id.0) {
                sub.acks_pending.remove(&seq);
            }
        }
        self.append(&SubLogEntry::AckPending { sub_id: sub_id.0, seq })
    }

    async fn flush(&self) -> Result<(), StanError> {
        self.file
            .lock()
            .sync_all()
            .map_err(|e| StanError::store_unavailable(e.to_string()))
    }
}
