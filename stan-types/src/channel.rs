use std::fmt;

/// A channel's stable, monotonic identity. Ids are assigned once at
/// `CreateChannel` and never reused, including across restarts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The persisted record for a channel. `maxseq` is the highest sequence
/// ever assigned, independent of how many messages have since expired.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub maxseq: u64,
    pub deleted: bool,
}

impl Channel {
    pub fn new(id: ChannelId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            maxseq: 0,
            deleted: false,
        }
    }
}
