use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use crate::close::CloseCoordinator;
use crate::compression::Compressor;
use crate::config::WebSocketConfig;
use crate::error::{CloseCode, Error};
use crate::extensions::Extensions;
use crate::keepalive::PongWaiter;
use crate::message::Message;
use crate::read::ReadStream;
use crate::split::{WSReader, WSWriter};
use crate::state::{ConnectionState, ReadyState};
use crate::write::{Role, Writer};

/// How many reassembled messages the background pump may buffer before a
/// slow consumer applies backpressure to it.
const MESSAGE_CHANNEL_CAPACITY: usize = 256;

/// A single established WebSocket endpoint (spec §4.6-§4.9's glue): the
/// generic core that `connect_async`/`accept_async` hand back once the
/// opening handshake has succeeded. Owns the transport, drives the receive
/// pump in a background task, and forwards `Stream`/send calls to its
/// [`WSReader`]/[`WSWriter`] halves so most callers never need to `split()`
/// at all — `socket-flow`'s server glue (spec §4.9) is the one place that
/// actually wants the two halves apart.
pub struct WSConnection<S> {
    reader: WSReader,
    writer: WSWriter<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send + 'static> WSConnection<S> {
    /// Wraps an already-upgraded transport, as the two halves the
    /// handshake layer already split the stream into to exchange the HTTP
    /// upgrade request/response. `role` determines masking direction (spec
    /// §3); `extensions` is the already-negotiated result (spec §4.4), not
    /// what either side merely offered.
    pub(crate) fn new(
        buf_reader: BufReader<ReadHalf<S>>,
        write_half: WriteHalf<S>,
        role: Role,
        config: WebSocketConfig,
        extensions: Option<Extensions>,
    ) -> Self {
        let writer = Arc::new(Mutex::new(Writer::new(write_half, role)));

        let state = ConnectionState::new();
        let close_coordinator = Arc::new(CloseCoordinator::new(state.clone()));
        let pong_waiter = Arc::new(PongWaiter::new());

        // Per spec §4.3's window-bits simplification (see DESIGN.md): both
        // directions share one negotiated window size rather than the two
        // independent ones RFC 7692 technically allows.
        let window_bits = extensions.as_ref().and_then(|ext| {
            ext.client_max_window_bits.or(ext.server_max_window_bits)
        });
        let deflate_negotiated = extensions.as_ref().map(|e| e.permessage_deflate).unwrap_or(false);
        let read_compressor = deflate_negotiated.then(|| Compressor::new(true, window_bits));
        let write_compressor = deflate_negotiated.then(|| Compressor::new(true, window_bits));

        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);

        let mut pump = ReadStream::new(
            buf_reader,
            message_tx.clone(),
            writer.clone(),
            config.clone(),
            read_compressor,
            state.clone(),
            close_coordinator.clone(),
            pong_waiter.clone(),
            role,
        );
        tokio::spawn(async move {
            pump.poll_messages().await;
        });

        let reader = WSReader::new(ReceiverStream::new(message_rx));
        let writer = WSWriter::new(
            writer,
            config,
            write_compressor,
            close_coordinator,
            pong_waiter,
            state,
            message_tx,
        );

        Self { reader, writer }
    }

    /// Marks the connection `Open`, spec §4.5's final handshake transition.
    /// Called once by `connect_async`/`accept_async` right after
    /// constructing the connection, since `new` itself doesn't know when
    /// the opening handshake bytes finished.
    pub(crate) async fn mark_open(&self) -> Result<(), Error> {
        self.writer.state().transition(ReadyState::New, ReadyState::Connecting).await?;
        self.writer.state().transition(ReadyState::Connecting, ReadyState::Open).await?;
        Ok(())
    }

    /// Splits the connection into independently ownable read/write halves,
    /// spec §4.9 — the server glue hands `WSWriter` to the application
    /// while keeping `WSReader` in its own forwarding task.
    pub fn split(self) -> (WSReader, WSWriter<S>) {
        (self.reader, self.writer)
    }

    pub async fn send_message(&self, message: Message) -> Result<(), Error> {
        self.writer.send_message(message).await
    }

    pub async fn send(&self, data: Vec<u8>) -> Result<(), Error> {
        self.writer.send(data).await
    }

    pub async fn send_as_binary(&self, data: Vec<u8>) -> Result<(), Error> {
        self.writer.send_as_binary(data).await
    }

    pub async fn send_as_text(&self, data: String) -> Result<(), Error> {
        self.writer.send_as_text(data).await
    }

    pub async fn send_large_data_fragmented(
        &self,
        data: Vec<u8>,
        fragment_size: usize,
    ) -> Result<(), Error> {
        self.writer.send_large_data_fragmented(data, fragment_size).await
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.writer.ping().await
    }

    pub async fn is_alive(&self) -> bool {
        self.writer.is_alive().await
    }

    pub async fn close_connection(&self) -> Result<(), Error> {
        self.writer.close_connection().await
    }

    pub async fn close_connection_with(&self, code: CloseCode, reason: &str) -> Result<(), Error> {
        self.writer.close_connection_with(code, reason).await
    }
}

impl<S> Stream for WSConnection<S> {
    type Item = Result<Message, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.reader).poll_next(cx)
    }
}
