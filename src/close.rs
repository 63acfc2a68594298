use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::mpsc::Sender;
use tokio::sync::{Mutex, Notify};

use crate::error::{CloseCode, Error};
use crate::frame::{Frame, OpCode};
use crate::message::Message;
use crate::payload;
use crate::state::{ConnectionState, ReadyState};
use crate::write::Writer;

/// Who drove a call into [`CloseCoordinator::initiate`], per spec §4.8 step
/// 3 — this decides whether we wait for the peer's echo at all, which in
/// turn decides whether the close can be reported as clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Initiator {
    /// The user called `close_connection[_with]` while `Open`.
    Local,
    /// The pump is tearing the connection down after a protocol/transport
    /// error; per spec §4.8, this path never waits for an echo.
    Fatal,
}

/// Drives the closing handshake of spec §4.8: whichever side notices the
/// peer's Close frame first echoes it back (with the same code, per RFC
/// 6455 §5.5.1), and whoever initiated the close waits — bounded by
/// `close_timeout` — for that echo before tearing the transport down.
///
/// `received` latches the first Close frame seen, so a peer that somehow
/// sends two Close frames doesn't double-echo or double-notify.
pub(crate) struct CloseCoordinator {
    state: ConnectionState,
    notify: Notify,
    received: AtomicBool,
}

impl CloseCoordinator {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state,
            notify: Notify::new(),
            received: AtomicBool::new(false),
        }
    }

    /// Called by the read pump when a Close frame arrives. Returns the
    /// status code/reason view of the frame, plus whether the echo this
    /// side sent back actually made it onto the wire. Also delivers the
    /// `Message::Close` to `read_tx` itself — guarded by `state.force`'s
    /// one-shot return so a racing local close (see [`Self::initiate`])
    /// never produces a second, conflicting close event for the same
    /// connection.
    pub async fn on_close_frame_received<S: AsyncWrite + Unpin>(
        &self,
        payload_bytes: &[u8],
        writer: &Mutex<Writer<S>>,
        read_tx: &Sender<Result<Message, Error>>,
    ) -> Result<(u16, String, bool), Error> {
        let (code, reason) = payload::close_code_view(payload_bytes)?;
        let already_closing = self.state.get() == ReadyState::Closing;
        self.received.store(true, Ordering::SeqCst);

        // Per spec §4.8 step 3: `received = true` (this is the
        // `PeerCloseReceived` path) makes the close clean as long as our
        // echo actually reaches the peer.
        let mut was_clean = true;
        if !already_closing {
            // We're the callee: echo the close and move Open -> Closing.
            let _ = self.state.transition(ReadyState::Open, ReadyState::Closing).await;
            let echo_code = CloseCode::from_u16(code).unwrap_or(CloseCode::Normal);
            let echo_payload =
                payload::append_close_code(echo_code.to_wire(), &reason).unwrap_or_default();
            let echo = Frame::new(true, OpCode::Close, echo_payload, false);
            was_clean = writer.lock().await.write_frame(echo, false).await.is_ok();
        }

        if self.state.force(ReadyState::Closed).await {
            let _ = read_tx
                .send(Ok(Message::Close { code, reason: reason.clone(), was_clean }))
                .await;
        }
        self.notify.notify_waiters();
        Ok((code, reason, was_clean))
    }

    /// Performs the active side of the close handshake: sends a Close
    /// frame, then — only for [`Initiator::Local`] — waits up to
    /// `close_timeout` for the peer's echo (which the read pump reports via
    /// [`Self::on_close_frame_received`]) before forcing the connection
    /// closed regardless. Returns whether the close completed cleanly:
    /// always `false` for [`Initiator::Fatal`] (spec §4.8 never waits on
    /// that path), and for `Local`, `true` iff the echo arrived before
    /// `close_timeout`. Delivers the `Message::Close` to `read_tx` itself,
    /// guarded by `state.force`'s one-shot return — see
    /// [`Self::on_close_frame_received`] for why that matters.
    pub async fn initiate<S: AsyncWrite + Unpin>(
        &self,
        code: CloseCode,
        reason: &str,
        writer: &Mutex<Writer<S>>,
        close_timeout: Duration,
        initiator: Initiator,
        read_tx: &Sender<Result<Message, Error>>,
    ) -> Result<bool, Error> {
        let moved = self
            .state
            .transition(ReadyState::Open, ReadyState::Closing)
            .await?;
        if !moved {
            return Ok(false);
        }

        let payload_bytes = payload::append_close_code(code.to_wire(), reason)?;
        let frame = Frame::new(true, OpCode::Close, payload_bytes, false);
        writer.lock().await.write_frame(frame, false).await?;

        let was_clean = if initiator == Initiator::Local {
            // Register with `Notify` *before* checking `received`: otherwise
            // a peer echo that the pump processes between the check and the
            // `.await` below would call `notify_waiters()` with nothing yet
            // registered, and this call would wait out the full timeout
            // despite the echo having already arrived.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.received.load(Ordering::SeqCst) {
                true
            } else {
                tokio::time::timeout(close_timeout, notified).await.is_ok()
            }
        } else {
            false
        };

        if self.state.force(ReadyState::Closed).await {
            let _ = read_tx
                .send(Ok(Message::Close {
                    code: code.to_wire(),
                    reason: reason.to_string(),
                    was_clean,
                }))
                .await;
        }
        Ok(was_clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::Role;
    use tokio::io::duplex;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn initiator_times_out_waiting_for_echo_and_still_closes() {
        let (client, _server) = duplex(1024);
        let (_read_half, write_half) = tokio::io::split(client);
        let writer = Mutex::new(Writer::new(write_half, Role::Client));

        let state = ConnectionState::new();
        state.transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        state.transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        let coordinator = CloseCoordinator::new(state.clone());
        let (tx, mut rx) = mpsc::channel(4);
        let was_clean = coordinator
            .initiate(
                CloseCode::Normal,
                "bye",
                &writer,
                Duration::from_millis(20),
                Initiator::Local,
                &tx,
            )
            .await
            .unwrap();

        assert!(!was_clean);
        assert_eq!(state.get(), ReadyState::Closed);

        match rx.recv().await.unwrap().unwrap() {
            Message::Close { code, reason, was_clean } => {
                assert_eq!(code, CloseCode::Normal.to_wire());
                assert_eq!(reason, "bye");
                assert!(!was_clean);
            }
            other => panic!("expected Message::Close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fatal_initiator_never_waits_and_reports_unclean() {
        let (client, _server) = duplex(1024);
        let (_read_half, write_half) = tokio::io::split(client);
        let writer = Mutex::new(Writer::new(write_half, Role::Server));

        let state = ConnectionState::new();
        state.transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        state.transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        let coordinator = CloseCoordinator::new(state.clone());
        let (tx, mut rx) = mpsc::channel(4);
        let was_clean = coordinator
            .initiate(
                CloseCode::ProtocolError,
                "bad frame",
                &writer,
                Duration::from_secs(5),
                Initiator::Fatal,
                &tx,
            )
            .await
            .unwrap();

        assert!(!was_clean);
        assert_eq!(state.get(), ReadyState::Closed);

        match rx.recv().await.unwrap().unwrap() {
            Message::Close { code, reason, was_clean } => {
                assert_eq!(code, CloseCode::ProtocolError.to_wire());
                assert_eq!(reason, "bad frame");
                assert!(!was_clean);
            }
            other => panic!("expected Message::Close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn callee_echoes_and_closes_immediately() {
        let (client, _server) = duplex(1024);
        let (_read_half, write_half) = tokio::io::split(client);
        let writer = Mutex::new(Writer::new(write_half, Role::Server));

        let state = ConnectionState::new();
        state.transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        state.transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        let coordinator = CloseCoordinator::new(state.clone());
        let (tx, mut rx) = mpsc::channel(4);
        let close_payload = payload::append_close_code(1000, "done").unwrap();
        let (code, reason, was_clean) = coordinator
            .on_close_frame_received(&close_payload, &writer, &tx)
            .await
            .unwrap();

        assert_eq!(code, 1000);
        assert_eq!(reason, "done");
        assert!(was_clean);
        assert_eq!(state.get(), ReadyState::Closed);

        match rx.recv().await.unwrap().unwrap() {
            Message::Close { code, reason, was_clean } => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "done");
                assert!(was_clean);
            }
            other => panic!("expected Message::Close, got {:?}", other),
        }
    }
}
