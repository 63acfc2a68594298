use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Error;

/// The authoritative connection lifecycle, per spec §4.5.
///
/// `ReadyState` only ever advances: `New < Connecting < Open < Closing <
/// Closed`. [`ConnectionState`] is the `forState` mutex from spec §5 —
/// every transition site acquires it, so two racing callers (e.g. a local
/// `close()` and a peer Close frame observed by the pump) never both
/// believe they drove the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReadyState {
    New = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::New,
            1 => ReadyState::Connecting,
            2 => ReadyState::Open,
            3 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Wraps the atomic ready-state plus the async mutex guarding transitions.
///
/// The atomic lets cheap reads (`is_open`, gating a send) skip locking; the
/// mutex serializes the handful of call sites that actually change state,
/// matching the "`forState` acquired first, `forSend` second" lock order
/// from spec §5.
#[derive(Clone)]
pub struct ConnectionState {
    state: Arc<AtomicU8>,
    transition_lock: Arc<AsyncMutex<()>>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ReadyState::New as u8)),
            transition_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.get() == ReadyState::Open
    }

    /// One-shot, idempotent transition. Returns `Ok(true)` if this call
    /// performed the transition, `Ok(false)` if another caller already
    /// moved past `from` (so the caller should skip its side effects), and
    /// an error if the current state isn't `from` at all.
    pub async fn transition(&self, from: ReadyState, to: ReadyState) -> Result<bool, Error> {
        let _guard = self.transition_lock.lock().await;
        let current = self.get();
        if current == to || current > from {
            return Ok(false);
        }
        if current != from {
            return Err(Error::InvalidStateTransition { from: current });
        }
        self.state.store(to as u8, Ordering::SeqCst);
        Ok(true)
    }

    /// Forces a transition regardless of the current state, used only by
    /// the close coordinator's fatal paths where we must reach `Closed`
    /// even from `New`/`Connecting`.
    pub async fn force(&self, to: ReadyState) -> bool {
        let _guard = self.transition_lock.lock().await;
        let current = self.get();
        if current >= to {
            return false;
        }
        self.state.store(to as u8, Ordering::SeqCst);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn monotonic_advance() {
        let state = ConnectionState::new();
        assert_eq!(state.get(), ReadyState::New);
        assert!(state
            .transition(ReadyState::New, ReadyState::Connecting)
            .await
            .unwrap());
        assert!(state
            .transition(ReadyState::Connecting, ReadyState::Open)
            .await
            .unwrap());
        assert_eq!(state.get(), ReadyState::Open);
    }

    #[tokio::test]
    async fn second_caller_is_a_noop() {
        let state = ConnectionState::new();
        state
            .transition(ReadyState::New, ReadyState::Connecting)
            .await
            .unwrap();
        state
            .transition(ReadyState::Connecting, ReadyState::Open)
            .await
            .unwrap();
        // A caller still thinking we're Open racing the Closing transition
        // observes `false`, not an error, and must not redo side effects.
        state
            .transition(ReadyState::Open, ReadyState::Closing)
            .await
            .unwrap();
        let result = state
            .transition(ReadyState::Open, ReadyState::Closing)
            .await
            .unwrap();
        assert!(!result);
    }

    #[tokio::test]
    async fn stale_from_is_an_error() {
        let state = ConnectionState::new();
        let result = state.transition(ReadyState::Open, ReadyState::Closing).await;
        assert!(result.is_err());
    }
}
