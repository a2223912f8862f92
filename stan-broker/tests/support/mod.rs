use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use stan_gax::StanError;
use stan_broker::Publisher;

/// Whether a `request()` to a given subject should reply immediately or
/// time out, for simulating an unresponsive heartbeat or dup-CID peer.
#[derive(Clone)]
pub enum ReplyPolicy {
    Reply,
    Timeout,
}

/// An in-process `Publisher`: records every delivery so tests can assert on
/// what was sent where, and answers `request()` per a configurable
/// per-subject policy (default: reply immediately).
/// One recorded delivery. `seq`/`redelivered` are `0`/`false` for the
/// request/reply probes (heartbeat, dup-CID), which don't carry either.
#[derive(Clone)]
pub struct Delivery {
    pub subject: String,
    pub seq: u64,
    pub redelivered: bool,
    pub payload: Bytes,
}

#[derive(Default)]
pub struct FakePublisher {
    pub published: Mutex<Vec<Delivery>>,
    policy: Mutex<HashMap<String, ReplyPolicy>>,
}

impl FakePublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_policy(&self, subject: &str, policy: ReplyPolicy) {
        self.policy.lock().insert(subject.to_string(), policy);
    }

    pub fn deliveries_to(&self, subject: &str) -> Vec<Bytes> {
        self.published
            .lock()
            .iter()
            .filter(|d| d.subject == subject)
            .map(|d| d.payload.clone())
            .collect()
    }

    pub fn seqs_to(&self, subject: &str) -> Vec<u64> {
        self.published
            .lock()
            .iter()
            .filter(|d| d.subject == subject)
            .map(|d| d.seq)
            .collect()
    }

    pub fn count_to(&self, subject: &str) -> usize {
        self.deliveries_to(subject).len()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, subject: &str, seq: u64, redelivered: bool, payload: Bytes) -> Result<(), StanError> {
        self.published.lock().push(Delivery {
            subject: subject.to_string(),
            seq,
            redelivered,
            payload,
        });
        Ok(())
    }

    async fn request(&self, subject: &str, payload: Bytes, _timeout: Duration) -> Result<Option<Bytes>, StanError> {
        self.published.lock().push(Delivery {
            subject: subject.to_string(),
            seq: 0,
            redelivered: false,
            payload,
        });
        match self.policy.lock().get(subject).cloned() {
            Some(ReplyPolicy::Timeout) => Ok(None),
            _ => Ok(Some(Bytes::new())),
        }
    }
}

pub fn server_info() -> stan_types::ServerInfo {
    stan_types::ServerInfo {
        cluster_id: "test-cluster".into(),
        discover_prefix: "_STAN.discover".into(),
        publish_prefix: "_STAN.pub".into(),
        subscribe_subj: "_STAN.sub".into(),
        unsub_subj: "_STAN.unsub".into(),
        close_subj: "_STAN.close".into(),
        version: 1,
    }
}
