//! Polling wait for channel readiness.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::channel::MessageChannel;
use crate::error::LoadError;

/// Polls `channel` every `poll_interval` until it reports ready.
///
/// The first check happens immediately.
///
/// # Errors
///
/// Returns [`LoadError::Cancelled`] if `cancel` fires first, or
/// [`LoadError::ChannelNotReady`] once `max_wait` has elapsed.
pub async fn wait_until_ready(
    channel: &dyn MessageChannel,
    poll_interval: Duration,
    max_wait: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<(), LoadError> {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LoadError::Cancelled),
            _ = ticker.tick() => {}
        }

        if channel.is_ready() {
            return Ok(());
        }
        if let Some(max_wait) = max_wait {
            let waited = started.elapsed();
            if waited >= max_wait {
                return Err(LoadError::ChannelNotReady {
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
    }
}
