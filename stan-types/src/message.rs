use bytes::Bytes;

use crate::channel::ChannelId;

/// A single durable message. `seq` is 1-based and dense per channel;
/// `expiration_ns` is `0` when the channel has no `MaxAge`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub channel_id: ChannelId,
    pub seq: u64,
    pub timestamp_ns: i64,
    pub expiration_ns: i64,
    pub data: Bytes,
}

impl Message {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether this message has expired as of `now_ns`. A message with
    /// `expiration_ns == 0` never expires.
    pub fn is_expired(&self, now_ns: i64) -> bool {
        self.expiration_ns != 0 && self.expiration_ns <= now_ns
    }
}
