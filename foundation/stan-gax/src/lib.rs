//! Shared error kinds, cancellation, and retry primitives.
//!
//! Every store back-end and the broker's background loops build on this
//! crate instead of inventing their own back-off or error taxonomy, the way
//! the teacher's `foundation/gax` underlies its `spanner`/`pubsub` crates.

pub mod cancel;
pub mod clock;
pub mod error;
pub mod retry;

pub use cancel::CancellationToken;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Code, StanError};
pub use retry::{invoke, ExponentialBackoff, RetrySetting};
