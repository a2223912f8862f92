//! Expiration engine (§4.F): one background task per channel that sleeps
//! until the oldest message's `expiration_ns`, evicts everything due, and
//! recomputes the next wakeup — woken early by a fresh publish (the new
//! message might expire sooner than whatever was already queued) rather
//! than polling on a fixed tick.

use std::sync::Arc;
use std::time::Duration;

use stan_gax::{CancellationToken, SharedClock};

use crate::channel::ChannelState;
use crate::config::BrokerOptions;

pub fn spawn_expiration_loop(
    channel: Arc<ChannelState>,
    clock: SharedClock,
    options: BrokerOptions,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match channel.messages.first_msg().await {
                Ok(Some(msg)) if msg.expiration_ns != 0 => {
                    let now = clock.now_ns();
                    if msg.expiration_ns <= now {
                        if let Err(e) = channel.messages.expire(now).await {
                            tracing::warn!(channel = %channel.name, error = %e, "expiration sweep failed");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(options.expiration_error_backoff) => {}
                            }
                        }
                        continue;
                    }
                    let wait = Duration::from_nanos((msg.expiration_ns - now) as u64);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = channel.notify.notified() => {}
                        _ = tokio::time::sleep(wait) => {
                            if let Err(e) = channel.messages.expire(clock.now_ns()).await {
                                tracing::warn!(channel = %channel.name, error = %e, "expiration sweep failed");
                                tokio::time::sleep(options.expiration_error_backoff).await;
                            }
                        }
                    }
                }
                Ok(_) => {
                    // Empty channel, or the oldest message has no MaxAge. A
                    // MaxMsgs/MaxBytes cap still needs enforcing even though
                    // nothing here ever carries a nonzero expiration_ns, so
                    // run the sweep (it no-ops if nothing is over the cap)
                    // before parking until the next publish.
                    if channel.messages.has_retention_caps() {
                        if let Err(e) = channel.messages.expire(clock.now_ns()).await {
                            tracing::warn!(channel = %channel.name, error = %e, "expiration sweep failed");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(options.expiration_error_backoff) => {}
                            }
                            continue;
                        }
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = channel.notify.notified() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(channel = %channel.name, error = %e, "failed to read oldest message");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(options.expiration_error_backoff) => {}
                    }
                }
            }
        }
    })
}
