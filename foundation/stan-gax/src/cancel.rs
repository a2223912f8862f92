use tokio_util::sync::CancellationToken as InternalCancellationToken;

/// Wrapper around [`tokio_util::sync::CancellationToken`] so downstream
/// crates depend on one name instead of pinning a `tokio-util` version
/// themselves.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: InternalCancellationToken,
}

impl CancellationToken {
    /// Creates a new token in the non-cancelled state.
    pub fn new() -> Self {
        Self {
            inner: InternalCancellationToken::new(),
        }
    }

    /// Creates a token which cancels whenever `self` cancels.
    pub fn child_token(&self) -> CancellationToken {
        Self {
            inner: self.inner.child_token(),
        }
    }

    /// Cancels this token and every child token derived from it.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }
}
