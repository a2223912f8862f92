use std::fmt;

use stan_gax::StanError;

use crate::subscription::SubscriptionId;

/// A validated client identifier: non-empty, ASCII, and restricted to
/// `[A-Za-z0-9_-]` per the client-registry `Register` contract.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, StanError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(StanError::invalid_client_id("client id must not be empty"));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(StanError::invalid_client_id(format!(
                "client id {raw:?} must match [A-Za-z0-9_-]+"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered client: its heartbeat reply address and the subscriptions
/// it currently owns. Removed on CLOSE, on heartbeat failure, or when a
/// reconnect with the same id wins duplicate-CID arbitration.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub heartbeat_inbox: String,
    pub subs: Vec<SubscriptionId>,
}

impl Client {
    pub fn new(id: ClientId, heartbeat_inbox: impl Into<String>) -> Self {
        Self {
            id,
            heartbeat_inbox: heartbeat_inbox.into(),
            subs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumeric_and_dash_underscore() {
        assert!(ClientId::parse("worker-1_a").is_ok());
    }

    #[test]
    fn rejects_empty_and_punctuation() {
        assert!(ClientId::parse("").is_err());
        assert!(ClientId::parse("has space").is_err());
        assert!(ClientId::parse("has,comma").is_err());
        assert!(ClientId::parse("has:colon").is_err());
    }
}
