use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::Sender;
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

use std::collections::HashMap;

use crate::close::{CloseCoordinator, Initiator};
use crate::compression::Compressor;
use crate::config::WebSocketConfig;
use crate::error::{CloseCode, Error};
use crate::frame::{self, Frame, OpCode};
use crate::keepalive::PongWaiter;
use crate::message::Message;
use crate::state::{ConnectionState, ReadyState};
use crate::write::Writer;

/// Below this size, an outgoing message is not worth compressing — the
/// deflate framing overhead would outweigh the savings. Only meaningful
/// when permessage-deflate is negotiated.
const MIN_COMPRESSION_PAYLOAD_SIZE: usize = 32;

/// The read half of a split connection: a `Stream` of reassembled
/// messages, fed by the background pump in [`crate::read::ReadStream`].
pub struct WSReader {
    read_rx: ReceiverStream<Result<Message, Error>>,
}

impl WSReader {
    pub fn new(read_rx: ReceiverStream<Result<Message, Error>>) -> Self {
        Self { read_rx }
    }
}

impl Stream for WSReader {
    type Item = Result<Message, Error>;
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.read_rx).poll_next(cx)
    }
}

/// The write half of a split connection (spec §4.7/C8's coordinator):
/// turns a [`Message`] into one or more frames — fragmenting per
/// `fragment_threshold`, compressing per the negotiated extensions — and
/// serializes writes against [`crate::read::ReadStream`]'s own control-frame
/// replies through the shared `writer` mutex.
pub struct WSWriter<S> {
    writer: Arc<Mutex<Writer<S>>>,
    config: WebSocketConfig,
    compressor: Option<Arc<Mutex<Compressor>>>,
    close_coordinator: Arc<CloseCoordinator>,
    pong_waiter: Arc<PongWaiter>,
    state: ConnectionState,
    read_tx: Sender<Result<Message, Error>>,
}

impl<S> Clone for WSWriter<S> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            config: self.config.clone(),
            compressor: self.compressor.clone(),
            close_coordinator: self.close_coordinator.clone(),
            pong_waiter: self.pong_waiter.clone(),
            state: self.state.clone(),
            read_tx: self.read_tx.clone(),
        }
    }
}

impl<S: AsyncWrite + Unpin> WSWriter<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        writer: Arc<Mutex<Writer<S>>>,
        config: WebSocketConfig,
        compressor: Option<Compressor>,
        close_coordinator: Arc<CloseCoordinator>,
        pong_waiter: Arc<PongWaiter>,
        state: ConnectionState,
        read_tx: Sender<Result<Message, Error>>,
    ) -> Self {
        Self {
            writer,
            config,
            compressor: compressor.map(|c| Arc::new(Mutex::new(c))),
            close_coordinator,
            pong_waiter,
            state,
            read_tx,
        }
    }

    pub(crate) fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Per spec §4.7: `send_*` is gated on `Open`. A caller racing a local
    /// or peer-initiated close observes this explicitly rather than
    /// silently writing into a connection that's already tearing down.
    fn ensure_open(&self) -> Result<(), Error> {
        if self.state.get() == ReadyState::Open {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    pub async fn send_message(&self, message: Message) -> Result<(), Error> {
        self.write_message(message).await
    }

    /// Sends `data` as a Text frame, matching the teacher crate's
    /// convenience `send`.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), Error> {
        self.write_message(Message::Text(String::from_utf8(data)?))
            .await
    }

    pub async fn send_as_binary(&self, data: Vec<u8>) -> Result<(), Error> {
        self.write_message(Message::Binary(data)).await
    }

    pub async fn send_as_text(&self, data: String) -> Result<(), Error> {
        self.write_message(Message::Text(data)).await
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.ensure_open()?;
        self.write_frames(vec![Frame::new(true, OpCode::Ping, Vec::new(), false)])
            .await
    }

    /// Sends a ping and blocks (within this async call) until a matching
    /// Pong arrives or `config.ping_timeout` elapses. The waiter is armed
    /// before the ping frame is written (see [`PongWaiter::ping_and_wait`]),
    /// so a Pong the read pump processes concurrently with the write is
    /// never missed.
    pub async fn is_alive(&self) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        let writer = self.writer.clone();
        self.pong_waiter
            .ping_and_wait(self.config.ping_timeout, || async move {
                writer
                    .lock()
                    .await
                    .write_frame(Frame::new(true, OpCode::Ping, Vec::new(), false), false)
                    .await
            })
            .await
            .unwrap_or(false)
    }

    /// Sends a large payload split into fragments of at most
    /// `fragment_size` bytes each, bypassing the configured
    /// `fragment_threshold`. Returns `CustomFragmentSizeExceeded` if the
    /// requested size is larger than `max_frame_size`.
    pub async fn send_large_data_fragmented(
        &self,
        mut data: Vec<u8>,
        fragment_size: usize,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        let max_frame_size = self.config.max_frame_size.unwrap_or(usize::MAX);
        if fragment_size > max_frame_size {
            return Err(Error::CustomFragmentSizeExceeded(fragment_size, max_frame_size));
        }
        if let Some(max_message_size) = self.config.max_message_size {
            if data.len() > max_message_size {
                return Err(Error::MaxMessageSize);
            }
        }

        let compressed = self.maybe_compress(&mut data).await?;
        let chunks = data.chunks(fragment_size.max(1));
        let total_chunks = chunks.len();

        let mut frames = Vec::with_capacity(total_chunks.max(1));
        for (i, chunk) in chunks.enumerate() {
            frames.push(Frame::new(
                i == total_chunks - 1,
                if i == 0 { OpCode::Text } else { OpCode::Continue },
                chunk.to_vec(),
                compressed,
            ));
        }
        self.write_frames(frames).await
    }

    /// Closes the connection with `CloseCode::Normal`, spec §4.8.
    pub async fn close_connection(&self) -> Result<(), Error> {
        self.close_connection_with(CloseCode::Normal, "").await
    }

    /// Initiates a local close, spec §4.8. The resulting `Message::Close`
    /// (carrying whether the peer's echo actually arrived) is delivered to
    /// the consumer through `read_tx` by [`CloseCoordinator::initiate`]
    /// itself, not returned here.
    pub async fn close_connection_with(&self, code: CloseCode, reason: &str) -> Result<(), Error> {
        self.close_coordinator
            .initiate(
                code,
                reason,
                &self.writer,
                self.config.close_timeout,
                Initiator::Local,
                &self.read_tx,
            )
            .await
            .map(|_| ())
    }

    async fn maybe_compress(&self, data: &mut Vec<u8>) -> Result<bool, Error> {
        let Some(compressor) = &self.compressor else {
            return Ok(false);
        };
        if data.len() < MIN_COMPRESSION_PAYLOAD_SIZE {
            return Ok(false);
        }
        let mut compressor = compressor.lock().await;
        *data = compressor.compress(data)?;
        Ok(true)
    }

    async fn convert_to_frames(&self, message: Message) -> Result<Vec<Frame>, Error> {
        let opcode = match &message {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
            Message::Close { .. } => OpCode::Close,
        };

        let mut payload = message.as_binary();
        if payload.is_empty() {
            return Ok(vec![Frame::new(true, opcode, payload, false)]);
        }

        let compressed = self.maybe_compress(&mut payload).await?;

        let fragment_threshold = self.config.fragment_threshold.unwrap_or(usize::MAX);
        let mut frames = Vec::new();
        for chunk in payload.chunks(fragment_threshold) {
            frames.push(Frame::new(
                false,
                if frames.is_empty() { opcode } else { OpCode::Continue },
                chunk.to_vec(),
                compressed,
            ));
        }
        if let Some(last) = frames.last_mut() {
            last.final_fragment = true;
        }
        Ok(frames)
    }

    async fn write_message(&self, message: Message) -> Result<(), Error> {
        self.ensure_open()?;
        if let Some(max_message_size) = self.config.max_message_size {
            if message.as_binary().len() > max_message_size {
                return Err(Error::MaxMessageSize);
            }
        }
        let frames = self.convert_to_frames(message).await?;
        self.write_frames(frames).await
    }

    async fn write_frames(&self, frames: Vec<Frame>) -> Result<(), Error> {
        // RSV1 is only ever set on the first frame of a compressed message.
        let mut set_rsv1 = frames.first().map(|f| f.compressed).unwrap_or(false);
        for frame in frames {
            self.writer.lock().await.write_frame(frame, set_rsv1).await?;
            set_rsv1 = false;
        }
        Ok(())
    }

    /// Sends `message` to this writer, reusing `cache`'s encoded bytes for
    /// connections that negotiated the same compression instead of
    /// re-encoding (and re-compressing) per recipient. See [`broadcast`].
    async fn send_via_cache(&self, message: &Message, cache: &mut BroadcastCache) -> Result<(), Error> {
        self.ensure_open()?;
        let compressed = self.compressor.is_some();
        if let Some(bytes) = cache.encoded.get(&compressed) {
            let bytes = bytes.clone();
            return self.writer.lock().await.write_raw(&bytes).await;
        }

        let frames = self.convert_to_frames(message.clone()).await?;
        let mut bytes = Vec::new();
        let mut set_rsv1 = frames.first().map(|f| f.compressed).unwrap_or(false);
        for frame in &frames {
            bytes.extend(frame::encode(frame, None, set_rsv1));
            set_rsv1 = false;
        }

        cache.encoded.insert(compressed, bytes.clone());
        self.writer.lock().await.write_raw(&bytes).await
    }
}

/// Per-call cache of already-encoded frame bytes, resolving the broadcast
/// question of spec §4.7: a server never masks outgoing frames, so the
/// same encoded bytes serve every recipient that negotiated the same
/// compression. Construct one per [`broadcast`] call; reusing it across
/// distinct messages would fan out stale bytes.
#[derive(Default)]
pub struct BroadcastCache {
    encoded: HashMap<bool, Vec<u8>>,
}

impl BroadcastCache {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Sends `message` to every writer in `writers`, encoding each distinct
/// frame layout (plain vs. compressed) at most once for the whole call
/// rather than once per recipient. A writer's own error doesn't stop the
/// others; the result for each writer is returned in the same order.
pub async fn broadcast<S: AsyncWrite + Unpin>(
    writers: &[WSWriter<S>],
    message: Message,
    cache: &mut BroadcastCache,
) -> Vec<Result<(), Error>> {
    let mut results = Vec::with_capacity(writers.len());
    for writer in writers {
        results.push(writer.send_via_cache(&message, cache).await);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::Role;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};
    use tokio::sync::mpsc;

    /// Wires up a `WSWriter` as the server side of a duplex pair, writing
    /// into `remote`'s other end — mirrors `read::tests::server_pump_harness`
    /// minus the receive pump, which these tests don't exercise.
    fn server_writer_harness(
        config: WebSocketConfig,
    ) -> (WSWriter<tokio::io::DuplexStream>, tokio::io::DuplexStream, mpsc::Receiver<Result<Message, Error>>) {
        let (local, remote) = duplex(8192);
        let (_read_half, write_half) = tokio::io::split(local);
        let writer = Arc::new(Mutex::new(Writer::new(write_half, Role::Server)));

        let state = ConnectionState::new();
        let close_coordinator = Arc::new(CloseCoordinator::new(state.clone()));
        let pong_waiter = Arc::new(PongWaiter::new());
        let (tx, rx) = mpsc::channel(16);

        let ws_writer = WSWriter::new(writer, config, None, close_coordinator, pong_waiter, state, tx);
        (ws_writer, remote, rx)
    }

    async fn read_one_frame(remote: &mut tokio::io::DuplexStream) -> (Frame, Option<[u8; 4]>) {
        let mut header = [0u8; 2];
        remote.read_exact(&mut header).await.unwrap();
        let draft = frame::decode_header(header, false).unwrap();
        frame::decode_tail(draft, remote, 1 << 20).await.unwrap()
    }

    #[tokio::test]
    async fn large_message_fragments_at_threshold_with_rsv1_on_first_frame_only() {
        let mut config = WebSocketConfig::default();
        config.fragment_threshold = Some(10);
        let (writer, mut remote, _rx) = server_writer_harness(config);
        writer.state().transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        writer.state().transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        let payload: Vec<u8> = (0u8..25).collect();
        writer.send_as_binary(payload.clone()).await.unwrap();

        let (first, _) = read_one_frame(&mut remote).await;
        assert_eq!(first.opcode, OpCode::Binary);
        assert!(!first.final_fragment);
        assert_eq!(first.payload, payload[0..10]);

        let (second, _) = read_one_frame(&mut remote).await;
        assert_eq!(second.opcode, OpCode::Continue);
        assert!(!second.final_fragment);
        assert_eq!(second.payload, payload[10..20]);

        let (third, _) = read_one_frame(&mut remote).await;
        assert_eq!(third.opcode, OpCode::Continue);
        assert!(third.final_fragment);
        assert_eq!(third.payload, payload[20..25]);
    }

    #[tokio::test]
    async fn send_below_threshold_is_a_single_unfragmented_frame() {
        let (writer, mut remote, _rx) = server_writer_harness(WebSocketConfig::default());
        writer.state().transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        writer.state().transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        writer.send_as_text("hi".to_string()).await.unwrap();

        let (frame, _) = read_one_frame(&mut remote).await;
        assert_eq!(frame.opcode, OpCode::Text);
        assert!(frame.final_fragment);
        assert_eq!(frame.payload, b"hi");
    }

    #[tokio::test]
    async fn close_connection_with_reports_timeout_as_unclean_via_read_tx() {
        let mut config = WebSocketConfig::default();
        config.close_timeout = Duration::from_millis(20);
        let (writer, _remote, mut rx) = server_writer_harness(config);
        writer.state().transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        writer.state().transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();

        writer.close_connection_with(CloseCode::Normal, "done").await.unwrap();

        match rx.recv().await.unwrap().unwrap() {
            Message::Close { code, reason, was_clean } => {
                assert_eq!(code, CloseCode::Normal.to_wire());
                assert_eq!(reason, "done");
                assert!(!was_clean);
            }
            other => panic!("expected Message::Close, got {:?}", other),
        }
        assert_eq!(writer.state().get(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn ensure_open_rejects_send_after_close() {
        let (writer, _remote, _rx) = server_writer_harness(WebSocketConfig::default());
        writer.state().transition(ReadyState::New, ReadyState::Connecting).await.unwrap();
        writer.state().transition(ReadyState::Connecting, ReadyState::Open).await.unwrap();
        writer.state().force(ReadyState::Closed).await;

        let result = writer.send_as_text("too late".to_string()).await;
        assert!(matches!(result, Err(Error::Closed)));
    }
}

