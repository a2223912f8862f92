/// The single persisted row describing this broker instance. A store's
/// `Init` compares an incoming `ServerInfo` against whatever is already
/// persisted and fails if `cluster_id` differs or `version` regresses.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServerInfo {
    pub cluster_id: String,
    pub discover_prefix: String,
    pub publish_prefix: String,
    pub subscribe_subj: String,
    pub unsub_subj: String,
    pub close_subj: String,
    pub version: u32,
}

impl ServerInfo {
    /// Whether `incoming` is compatible with `self` as the already-persisted
    /// row, per the `Init` invariant: cluster id must match, and the
    /// persisted version may not be newer than what this binary supports.
    pub fn compatible_with(&self, incoming: &ServerInfo) -> Result<(), CompatibilityError> {
        if self.cluster_id != incoming.cluster_id {
            return Err(CompatibilityError::ClusterIdMismatch {
                persisted: self.cluster_id.clone(),
                requested: incoming.cluster_id.clone(),
            });
        }
        if self.version > incoming.version {
            return Err(CompatibilityError::VersionMismatch {
                persisted: self.version,
                supported: incoming.version,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CompatibilityError {
    #[error("persisted cluster_id {persisted:?} does not match requested {requested:?}")]
    ClusterIdMismatch { persisted: String, requested: String },
    #[error("persisted version {persisted} is newer than the supported version {supported}")]
    VersionMismatch { persisted: u32, supported: u32 },
}
