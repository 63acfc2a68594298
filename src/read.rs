use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadHalf};
use tokio::sync::mpsc::Sender;
use tokio::sync::Mutex;

use crate::close::{CloseCoordinator, Initiator};
use crate::compression::Compressor;
use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{self, Frame, OpCode};
use crate::keepalive::PongWaiter;
use crate::message::Message;
use crate::state::{ConnectionState, ReadyState};
use crate::write::{Role, Writer};

#[derive(Clone)]
struct FragmentedMessage {
    fragments: Vec<u8>,
    op_code: OpCode,
    compressed: bool,
}

/// The receive pump, spec §4.6/C7. Runs in its own spawned task for the
/// lifetime of the connection, feeding reassembled messages to `read_tx`
/// and handling control frames (ping/pong/close) inline without involving
/// the consumer.
pub struct ReadStream<S> {
    buf_reader: BufReader<ReadHalf<S>>,
    fragmented_message: Option<FragmentedMessage>,
    read_tx: Sender<Result<Message, Error>>,
    writer: Arc<Mutex<Writer<S>>>,
    config: WebSocketConfig,
    compressor: Option<Compressor>,
    state: ConnectionState,
    close_coordinator: Arc<CloseCoordinator>,
    pong_waiter: Arc<PongWaiter>,
    role: Role,
}

impl<S: AsyncRead + Unpin> ReadStream<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        read: BufReader<ReadHalf<S>>,
        read_tx: Sender<Result<Message, Error>>,
        writer: Arc<Mutex<Writer<S>>>,
        config: WebSocketConfig,
        compressor: Option<Compressor>,
        state: ConnectionState,
        close_coordinator: Arc<CloseCoordinator>,
        pong_waiter: Arc<PongWaiter>,
        role: Role,
    ) -> Self {
        Self {
            buf_reader: read,
            fragmented_message: None,
            read_tx,
            writer,
            config,
            compressor,
            state,
            close_coordinator,
            pong_waiter,
            role,
        }
    }

    /// Drives the pump until the connection closes (cleanly or otherwise).
    /// Never surfaces a raw `Err` for an internal pump failure: per spec
    /// §7's recovery policy, protocol/transport errors are reported to the
    /// consumer only as a `Message::Close`, through whichever teardown path
    /// actually won the race to close the connection (see
    /// [`CloseCoordinator::initiate`]).
    pub async fn poll_messages(&mut self) {
        loop {
            match self.read_frame().await {
                Ok(Some(frame)) => match self.handle_frame(frame).await {
                    Ok(stop) => {
                        if stop {
                            break;
                        }
                    }
                    Err(err) => {
                        self.abort_with_protocol_error(err).await;
                        break;
                    }
                },
                Ok(None) => {
                    self.report_eof().await;
                    break;
                }
                Err(err) => {
                    self.abort_with_protocol_error(err).await;
                    break;
                }
            }
        }
    }

    /// Tears the connection down after a pump-detected error, per spec
    /// §4.8's "code selection on fatal paths": sends a Close frame carrying
    /// the mapped wire code (best-effort — a write failure here just means
    /// the peer won't see it), then lets [`CloseCoordinator::initiate`]
    /// deliver the resulting `Message::Close` to the consumer.
    async fn abort_with_protocol_error(&mut self, err: Error) {
        let close_code = err.close_code();
        let reason = err.to_string();
        let _ = self
            .close_coordinator
            .initiate(
                close_code,
                &reason,
                &self.writer,
                self.config.close_timeout,
                Initiator::Fatal,
                &self.read_tx,
            )
            .await;
    }

    /// Handles a clean EOF on the transport, spec §4.6 step 1: if the
    /// connection was still `Open`, the peer vanished without a close
    /// handshake — an abnormal closure, code 1006. If a close was already
    /// under way (we or the peer had started one), this EOF is the
    /// transport simply going away right after the close frame, so it's
    /// reported as clean. `state.force`'s one-shot return keeps this from
    /// double-reporting if another teardown path already closed first.
    async fn report_eof(&mut self) {
        let was_closing = self.state.get() == ReadyState::Closing;
        let (code, reason, was_clean) = if was_closing {
            (1000u16, String::new(), true)
        } else {
            (1006u16, "connection closed abnormally".to_string(), false)
        };
        if self.state.force(ReadyState::Closed).await {
            let _ = self
                .read_tx
                .send(Ok(Message::Close { code, reason, was_clean }))
                .await;
        }
    }

    /// Returns `Ok(true)` when the pump should stop after this frame (a
    /// Close was handled and already reported), `Ok(false)` to keep
    /// reading, or `Err` for a protocol violation the caller reports and
    /// tears the connection down for.
    async fn handle_frame(&mut self, frame: Frame) -> Result<bool, Error> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary if !frame.final_fragment => {
                if self.fragmented_message.is_some() {
                    return Err(Error::FragmentedInProgress);
                }
                self.fragmented_message = Some(FragmentedMessage {
                    op_code: frame.opcode,
                    fragments: frame.payload,
                    compressed: frame.compressed,
                });
                Ok(false)
            }
            OpCode::Continue => {
                let Some(ref mut fragmented) = self.fragmented_message else {
                    return Err(Error::InvalidContinuationFrame);
                };
                fragmented.fragments.extend_from_slice(&frame.payload);

                if let Some(max_message_size) = self.config.max_message_size {
                    if fragmented.fragments.len() > max_message_size {
                        return Err(Error::MaxMessageSize);
                    }
                }

                if frame.final_fragment {
                    let mut completed = self.fragmented_message.take().unwrap();
                    if completed.compressed {
                        let compressor = self
                            .compressor
                            .as_mut()
                            .ok_or_else(|| Error::ExtensionNegotiationFailed("no compressor configured".into()))?;
                        completed.fragments = compressor.decompress(&completed.fragments)?;
                    }
                    self.transmit_message(Frame::new(
                        true,
                        completed.op_code,
                        completed.fragments,
                        false,
                    ))
                    .await?;
                }
                Ok(false)
            }
            OpCode::Text | OpCode::Binary => {
                if self.fragmented_message.is_some() {
                    return Err(Error::InvalidFrameFragmentation);
                }
                let mut frame = frame;
                if frame.compressed {
                    let compressor = self
                        .compressor
                        .as_mut()
                        .ok_or_else(|| Error::ExtensionNegotiationFailed("no compressor configured".into()))?;
                    frame.payload = compressor.decompress(&frame.payload)?;
                }
                self.transmit_message(frame).await?;
                Ok(false)
            }
            OpCode::Close => {
                self.close_coordinator
                    .on_close_frame_received(&frame.payload, &self.writer, &self.read_tx)
                    .await?;
                Ok(true)
            }
            OpCode::Ping => {
                self.send_pong_frame(frame.payload.clone()).await?;
                if self.config.emit_on_ping {
                    let _ = self.read_tx.send(Ok(Message::Binary(frame.payload))).await;
                }
                Ok(false)
            }
            OpCode::Pong => {
                self.pong_waiter.on_pong();
                Ok(false)
            }
        }
    }

    async fn send_pong_frame(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        self.writer
            .lock()
            .await
            .write_frame(Frame::new(true, OpCode::Pong, payload, false), false)
            .await
    }

    /// Reads one frame off the wire, applying unmasking per spec §3 and
    /// leaving decompression to the caller (which knows the fragmentation
    /// context). Returns `Ok(None)` on a clean EOF with no bytes read yet
    /// (the peer simply went away between messages).
    async fn read_frame(&mut self) -> Result<Option<Frame>, Error> {
        let mut header = [0u8; 2];
        let n = self.buf_reader.read(&mut header[..1]).await?;
        if n == 0 {
            return Ok(None);
        }
        self.buf_reader.read_exact(&mut header[1..]).await?;

        let deflate_negotiated = self
            .config
            .extensions
            .as_ref()
            .map(|e| e.permessage_deflate)
            .unwrap_or(false);

        let draft = frame::decode_header(header, deflate_negotiated)?;
        // Per spec §4.6 step 3: a server only ever receives masked frames
        // from its client, and a client only ever receives unmasked frames
        // from its server. Either violation is a protocol error, not a
        // silent accept-anyway.
        match self.role {
            Role::Server if !draft.masked => return Err(Error::MaskingViolation),
            Role::Client if draft.masked => return Err(Error::MaskingViolation),
            _ => {}
        }
        let max_frame_size = self.config.max_frame_size.unwrap_or(usize::MAX);
        let (mut decoded, mask) = frame::decode_tail(draft, &mut self.buf_reader, max_frame_size).await?;

        if let Some(mask) = mask {
            frame::unmask(&mut decoded, mask);
        }

        Ok(Some(decoded))
    }

    pub async fn transmit_message(&mut self, frame: Frame) -> Result<(), Error> {
        self.read_tx
            .send(Ok(Message::from_frame(frame)?))
            .await
            .map_err(|_| Error::CommunicationError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    /// Wires up a pump as the server side of a duplex pair, driven by
    /// hand-crafted masked frames written on the `remote` half — the
    /// counterpart a real client would be. Mirrors how
    /// `connection::WSConnection::new` wires the real thing, minus the
    /// handshake.
    fn server_pump_harness() -> (
        ReadStream<tokio::io::DuplexStream>,
        tokio::io::DuplexStream,
        Arc<Mutex<Writer<tokio::io::DuplexStream>>>,
        ConnectionState,
        mpsc::Receiver<Result<Message, Error>>,
    ) {
        let (local, remote) = duplex(8192);
        let (read_half, write_half) = tokio::io::split(local);
        let buf_reader = BufReader::new(read_half);
        let writer = Arc::new(Mutex::new(Writer::new(write_half, Role::Server)));

        let state = ConnectionState::new();
        let close_coordinator = Arc::new(CloseCoordinator::new(state.clone()));
        let pong_waiter = Arc::new(PongWaiter::new());
        let (tx, rx) = mpsc::channel(16);

        let pump = ReadStream::new(
            buf_reader,
            tx,
            writer.clone(),
            WebSocketConfig::default(),
            None,
            state.clone(),
            close_coordinator,
            pong_waiter,
            Role::Server,
        );

        (pump, remote, writer, state, rx)
    }

    #[tokio::test]
    async fn pump_delivers_single_masked_text_message() {
        let (mut pump, mut remote, _writer, state, mut rx) = server_pump_harness();
        state.transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        state.transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        let wire = frame::encode(
            &Frame::new(true, OpCode::Text, b"Hello".to_vec(), false),
            Some([0x37, 0xFA, 0x21, 0x3D]),
            false,
        );
        remote.write_all(&wire).await.unwrap();

        tokio::spawn(async move {
            pump.poll_messages().await;
        });

        let message = rx.recv().await.unwrap().unwrap();
        assert_eq!(message, Message::Text("Hello".to_string()));
    }

    #[tokio::test]
    async fn pump_reassembles_a_fragmented_message() {
        let (mut pump, mut remote, _writer, state, mut rx) = server_pump_harness();
        state.transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        state.transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        let mask = [1, 2, 3, 4];
        let first = frame::encode(&Frame::new(false, OpCode::Binary, vec![1, 2, 3], false), Some(mask), false);
        let last = frame::encode(&Frame::new(true, OpCode::Continue, vec![4, 5], false), Some(mask), false);
        remote.write_all(&first).await.unwrap();
        remote.write_all(&last).await.unwrap();

        tokio::spawn(async move {
            pump.poll_messages().await;
        });

        let message = rx.recv().await.unwrap().unwrap();
        assert_eq!(message, Message::Binary(vec![1, 2, 3, 4, 5]));
    }

    #[tokio::test]
    async fn pump_replies_pong_with_identical_payload() {
        let (mut pump, mut remote, _writer, state, _rx) = server_pump_harness();
        state.transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        state.transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        // S6 from the spec: ping payload DE AD BE EF.
        let ping_payload = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let wire = frame::encode(
            &Frame::new(true, OpCode::Ping, ping_payload.clone(), false),
            Some([9, 9, 9, 9]),
            false,
        );
        remote.write_all(&wire).await.unwrap();

        tokio::spawn(async move {
            pump.poll_messages().await;
        });

        let mut header = [0u8; 2];
        remote.read_exact(&mut header).await.unwrap();
        let draft = frame::decode_header(header, false).unwrap();
        assert_eq!(draft.opcode, OpCode::Pong);
        let (frame, mask) = frame::decode_tail(draft, &mut remote, 1 << 20).await.unwrap();
        assert!(mask.is_none(), "server replies are never masked");
        assert_eq!(frame.payload, ping_payload);
    }

    #[tokio::test]
    async fn pump_echoes_close_and_reports_clean_s4() {
        let (mut pump, mut remote, _writer, state, mut rx) = server_pump_harness();
        state.transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        state.transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        // S4 from the spec: client sends Close(1000, "bye").
        let close_payload = crate::payload::append_close_code(1000, "bye").unwrap();
        let wire = frame::encode(
            &Frame::new(true, OpCode::Close, close_payload, false),
            Some([5, 5, 5, 5]),
            false,
        );
        remote.write_all(&wire).await.unwrap();

        tokio::spawn(async move {
            pump.poll_messages().await;
        });

        let message = rx.recv().await.unwrap().unwrap();
        match message {
            Message::Close { code, reason, was_clean } => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "bye");
                assert!(was_clean);
            }
            other => panic!("expected Message::Close, got {:?}", other),
        }

        let mut header = [0u8; 2];
        remote.read_exact(&mut header).await.unwrap();
        let draft = frame::decode_header(header, false).unwrap();
        assert_eq!(draft.opcode, OpCode::Close);
        let (echoed, mask) = frame::decode_tail(draft, &mut remote, 1 << 20).await.unwrap();
        assert!(mask.is_none(), "server replies are never masked");
        let (echoed_code, echoed_reason) = crate::payload::close_code_view(&echoed.payload).unwrap();
        assert_eq!(echoed_code, 1000);
        assert_eq!(echoed_reason, "bye");

        // Give the pump a beat to finish tearing down after echoing.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(state.get(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn dropped_transport_while_open_reports_abnormal_closure() {
        let (mut pump, remote, _writer, state, mut rx) = server_pump_harness();
        state.transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        state.transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        // The peer vanishes without ever sending a Close frame.
        drop(remote);

        tokio::spawn(async move {
            pump.poll_messages().await;
        });

        let message = rx.recv().await.unwrap().unwrap();
        match message {
            Message::Close { code, was_clean, .. } => {
                assert_eq!(code, 1006);
                assert!(!was_clean);
            }
            other => panic!("expected Message::Close, got {:?}", other),
        }
        assert_eq!(state.get(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn masking_violation_reports_protocol_error_not_a_raw_err() {
        let (mut pump, mut remote, _writer, state, mut rx) = server_pump_harness();
        state.transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        state.transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        // A server must only ever see masked frames from its client; an
        // unmasked frame is a protocol violation, spec §4.6 step 3.
        let wire = frame::encode(&Frame::new(true, OpCode::Text, b"hi".to_vec(), false), None, false);
        remote.write_all(&wire).await.unwrap();

        tokio::spawn(async move {
            pump.poll_messages().await;
        });

        let message = rx.recv().await.unwrap().unwrap();
        match message {
            Message::Close { code, was_clean, .. } => {
                assert_eq!(code, Error::MaskingViolation.close_code().to_wire());
                assert!(!was_clean);
            }
            other => panic!("expected Message::Close, got {:?}", other),
        }
        assert_eq!(state.get(), ReadyState::Closed);
    }
}
