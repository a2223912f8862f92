use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stan_gax::{SharedClock, StanError};
use stan_types::limits::ResolvedLimits;
use stan_types::Message;
use stan_store::MessageStore;

use crate::record::{read_record, write_record};

/// The on-disk payload for one message record, bincode-encoded and wrapped
/// in the shared `[len|crc32|payload]` framing by [`write_record`].
#[derive(Serialize, Deserialize)]
struct MessageRecord {
    seq: u64,
    timestamp_ns: i64,
    expiration_ns: i64,
    data: Vec<u8>,
}

struct MessageLogState {
    cache: BTreeMap<u64, Message>,
    first_seq: u64,
    last_seq: u64,
    total_bytes: u64,
}

/// One channel's append-only message log (spec's `msgs.<seq>.dat` segment,
/// simplified here to a single segment per channel that `expire` rewrites
/// in place once eviction drops its oldest records, rather than rotating
/// across multiple segment files). Recovery scans it once at construction
/// time.
pub struct FileMessageStore {
    path: PathBuf,
    file: Mutex<File>,
    state: Mutex<MessageLogState>,
    clock: SharedClock,
    max_age_ns: i64,
    limits: parking_lot::RwLock<ResolvedLimits>,
}

impl FileMessageStore {
    /// Opens (creating if absent) the log at `path`, replaying any
    /// existing records and truncating a partial trailing one.
    pub fn open(path: impl AsRef<Path>, clock: SharedClock, limits: ResolvedLimits) -> Result<Self, StanError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| StanError::store_unavailable(format!("open {path:?}: {e}")))?;

        let cache = replay(&mut file)?;
        let first_seq = cache.keys().next().copied().unwrap_or(0);
        let last_seq = cache.keys().next_back().copied().unwrap_or(0);
        let total_bytes = cache.values().map(|m| m.size() as u64).sum();

        Ok(Self {
            path,
            file: Mutex::new(file),
            state: Mutex::new(MessageLogState {
                cache,
                first_seq,
                last_seq,
                total_bytes,
            }),
            clock,
            max_age_ns: limits.max_age.as_nanos() as i64,
            limits: parking_lot::RwLock::new(limits),
        })
    }

    pub fn set_limits(&self, limits: ResolvedLimits) {
        *self.limits.write() = limits;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the log file to hold exactly the records still in
    /// `state.cache`, reclaiming the disk space of everything `expire`
    /// just evicted. Written to a sibling temp file and renamed into place
    /// so a crash mid-rewrite leaves the original file intact.
    fn compact(&self, state: &MessageLogState) -> Result<(), StanError> {
        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| StanError::store_unavailable(format!("open {tmp_path:?}: {e}")))?;
        for msg in state.cache.values() {
            let record = MessageRecord {
                seq: msg.seq,
                timestamp_ns: msg.timestamp_ns,
                expiration_ns: msg.expiration_ns,
                data: msg.data.to_vec(),
            };
            let bytes = bincode::serialize(&record)
                .map_err(|e| StanError::store_corrupt(format!("encode message record: {e}")))?;
            write_record(&mut tmp, &bytes).map_err(|e| StanError::store_unavailable(e.to_string()))?;
        }
        tmp.flush().map_err(|e| StanError::store_unavailable(e.to_string()))?;
        tmp.sync_all().map_err(|e| StanError::store_unavailable(e.to_string()))?;

        let mut file = self.file.lock();
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| StanError::store_unavailable(format!("rename {tmp_path:?} -> {:?}: {e}", self.path)))?;
        *file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StanError::store_unavailable(format!("reopen {:?}: {e}", self.path)))?;
        Ok(())
    }
}

/// Scans every record in `file`, folding them into the final
/// seq-to-message map and truncating a trailing partial write.
fn replay(file: &mut File) -> Result<BTreeMap<u64, Message>, StanError> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| StanError::store_unavailable(e.to_string()))?;
    let mut reader = BufReader::new(&mut *file);
    let mut cache = BTreeMap::new();
    let mut consumed: u64 = 0;
    loop {
        let before = consumed;
        match read_record(&mut reader) {
            Ok(None) => break,
            Ok(Some(payload)) => {
                consumed += 8 + payload.len() as u64;
                let record: MessageRecord = bincode::deserialize(&payload)
                    .map_err(|e| StanError::store_corrupt(format!("bad message record: {e}")))?;
                cache.insert(
                    record.seq,
                    Message {
                        channel_id: stan_types::ChannelId(0),
                        seq: record.seq,
                        timestamp_ns: record.timestamp_ns,
                        expiration_ns: record.expiration_ns,
                        data: record.data.into(),
                    },
                );
            }
            Err(crate::record::RecordError::Truncated) => {
                tracing::warn!(offset = before, "truncating partial trailing message record");
                file.set_len(before)
                    .map_err(|e| StanError::store_unavailable(e.to_string()))?;
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(cache)
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn store(&self, data: bytes::Bytes) -> Result<u64, StanError> {
        let now_ns = self.clock.now_ns();
        let max_age_ns = self.max_age_ns;
        let seq;
        let record_bytes;
        {
            let mut state = self.state.lock();
            seq = state.last_seq + 1;
            let expiration_ns = if max_age_ns > 0 { now_ns + max_age_ns } else { 0 };
            let record = MessageRecord {
                seq,
                timestamp_ns: now_ns,
                expiration_ns,
                data: data.to_vec(),
            };
            record_bytes = bincode::serialize(&record)
                .map_err(|e| StanError::store_corrupt(format!("encode message record: {e}")))?;

            let mut file = self.file.lock();
            write_record(&mut *file, &record_bytes).map_err(|e| StanError::store_unavailable(e.to_string()))?;
            file.flush().map_err(|e| StanError::store_unavailable(e.to_string()))?;

            state.last_seq = seq;
            if state.first_seq == 0 {
                state.first_seq = seq;
            }
            state.total_bytes += data.len() as u64;
            state.cache.insert(
                seq,
                Message {
                    channel_id: stan_types::ChannelId(0),
                    seq,
                    timestamp_ns: now_ns,
                    expiration_ns,
                    data,
                },
            );
        }
        Ok(seq)
    }

    async fn lookup(&self, seq: u64) -> Result<Option<Message>, StanError> {
        let now_ns = self.clock.now_ns();
        let state = self.state.lock();
        Ok(state
            .cache
            .get(&seq)
            .filter(|m| !m.is_expired(now_ns))
            .cloned())
    }

    async fn first_msg(&self) -> Result<Option<Message>, StanError> {
        let state = self.state.lock();
        Ok(state.cache.values().next().cloned())
    }

    async fn last_msg(&self) -> Result<Option<Message>, StanError> {
        let state = self.state.lock();
        Ok(state.cache.values().next_back().cloned())
    }

    async fn first_sequence(&self) -> Result<u64, StanError> {
        Ok(self.state.lock().first_seq)
    }

    async fn last_sequence(&self) -> Result<u64, StanError> {
        Ok(self.state.lock().last_seq)
    }

    async fn get_sequence_from_timestamp(&self, ts_ns: i64) -> Result<u64, StanError> {
        let state = self.state.lock();
        for msg in state.cache.values() {
            if msg.timestamp_ns >= ts_ns {
                return Ok(msg.seq);
            }
        }
        Ok(state.last_seq + 1)
    }

    async fn expire(&self, now_ns: i64) -> Result<u64, StanError> {
        let limits = *self.limits.read();
        let mut state = self.state.lock();

        let expired: Vec<u64> = state
            .cache
            .iter()
            .take_while(|(_, m)| m.is_expired(now_ns))
            .map(|(seq, _)| *seq)
            .collect();
        let mut evicted = false;
        for seq in &expired {
            if let Some(m) = state.cache.remove(seq) {
                state.total_bytes = state.total_bytes.saturating_sub(m.size() as u64);
                evicted = true;
            }
        }

        while limits.max_msgs > 0 && state.cache.len() as u64 > limits.max_msgs {
            if let Some((&seq, _)) = state.cache.iter().next() {
                if let Some(m) = state.cache.remove(&seq) {
                    state.total_bytes = state.total_bytes.saturating_sub(m.size() as u64);
                    evicted = true;
                }
            } else {
                break;
            }
        }
        while limits.max_bytes > 0 && state.total_bytes > limits.max_bytes {
            if let Some((&seq, _)) = state.cache.iter().next() {
                if let Some(m) = state.cache.remove(&seq) {
                    state.total_bytes = state.total_bytes.saturating_sub(m.size() as u64);
                    evicted = true;
                }
            } else {
                break;
            }
        }

        state.first_seq = state.cache.keys().next().copied().unwrap_or(state.last_seq + 1);
        if evicted {
            self.compact(&state)?;
        }
        Ok(state.first_seq)
    }

    fn has_retention_caps(&self) -> bool {
        let limits = *self.limits.read();
        limits.max_msgs > 0 || limits.max_bytes > 0
    }

    async fn flush(&self) -> Result<(), StanError> {
        self.file
            .lock()
            .sync_all()
            .map_err(|e| StanError::store_unavailable(e.to_string()))
    }
}
