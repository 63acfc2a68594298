use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::Error;

/// Tracks whether a ping is outstanding and wakes up `is_alive` once a Pong
/// arrives. Correlation is permissive, per spec §4.10 Open Question 1: any
/// Pong received while a ping is outstanding counts, regardless of its
/// payload — this crate never echoes a nonce through the ping/pong
/// round-trip, so there's nothing more specific to match against.
pub(crate) struct PongWaiter {
    notify: Notify,
    awaiting: AtomicBool,
}

impl PongWaiter {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
            awaiting: AtomicBool::new(false),
        }
    }

    /// Called by the read pump when a Pong frame arrives.
    pub fn on_pong(&self) {
        if self.awaiting.swap(false, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Arms the waiter, runs `send_ping` to put the frame on the wire, then
    /// waits up to `timeout` for a matching Pong. The waiter is armed and
    /// registered with `Notify` *before* `send_ping` runs, so a Pong that
    /// the read pump processes concurrently with (or immediately after) the
    /// write can never be missed the way it would be if we only started
    /// waiting after the write had already completed.
    pub async fn ping_and_wait<F, Fut>(&self, timeout: Duration, send_ping: F) -> Result<bool, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        self.awaiting.store(true, Ordering::SeqCst);

        if let Err(err) = send_ping().await {
            self.awaiting.store(false, Ordering::SeqCst);
            return Err(err);
        }

        let result = tokio::time::timeout(timeout, notified).await;
        self.awaiting.store(false, Ordering::SeqCst);
        Ok(result.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pong_before_timeout_is_observed() {
        let waiter = std::sync::Arc::new(PongWaiter::new());
        let waiter_clone = waiter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            waiter_clone.on_pong();
        });
        let result = waiter
            .ping_and_wait(Duration::from_millis(200), || async { Ok(()) })
            .await
            .unwrap();
        assert!(result);
    }

    #[tokio::test]
    async fn no_pong_times_out() {
        let waiter = PongWaiter::new();
        let result = waiter
            .ping_and_wait(Duration::from_millis(20), || async { Ok(()) })
            .await
            .unwrap();
        assert!(!result);
    }

    #[tokio::test]
    async fn stray_pong_with_nothing_awaiting_is_a_noop() {
        let waiter = PongWaiter::new();
        waiter.on_pong();
        let result = waiter
            .ping_and_wait(Duration::from_millis(20), || async { Ok(()) })
            .await
            .unwrap();
        assert!(!result);
    }

    /// A pong processed the instant the ping write completes — before the
    /// caller ever reaches the `.await` on the notified future — must still
    /// be observed, since `ping_and_wait` arms the waiter before running
    /// `send_ping`.
    #[tokio::test]
    async fn pong_racing_immediately_after_send_is_not_missed() {
        let waiter = std::sync::Arc::new(PongWaiter::new());
        let result = waiter
            .ping_and_wait(Duration::from_millis(200), {
                let waiter = waiter.clone();
                || async move {
                    waiter.on_pong();
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert!(result);
    }
}
