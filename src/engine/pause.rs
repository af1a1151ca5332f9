//! Cancellable waits.

use std::time::Duration;

use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Sleep for `delay` unless `cancel` fires first.
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_when_not_cancelled() {
        let token = CancellationToken::new();
        pause(Duration::from_millis(5), &token).await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_interrupts_long_sleep() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let result = pause(Duration::from_secs(3600), &token).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn already_cancelled_skips_zero_delay() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            pause(Duration::ZERO, &token).await,
            Err(Error::Cancelled)
        ));
    }
}
