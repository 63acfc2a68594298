use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

/// The concrete transport used by the convenience client/server entry
/// points (`connect_async`, `start_server_with_config`). The generic core
/// (`WSConnection<S>`, `read.rs`, `write.rs`) never names this type — it
/// only requires `S: AsyncRead + AsyncWrite + Unpin + Send`, of which this
/// enum is one implementor among many (a plain `TcpStream` being another).
///
/// Dispatch between the two variants is a manual `Pin`-projected match,
/// since `tokio_rustls::TlsStream` doesn't implement `AsyncRead`/`AsyncWrite`
/// through a blanket impl over an arbitrary inner stream type union.
pub enum SocketFlowStream {
    Plain(TcpStream),
    Secure(TlsStream<TcpStream>),
}

impl SocketFlowStream {
    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        match self {
            SocketFlowStream::Plain(stream) => stream.peer_addr(),
            SocketFlowStream::Secure(stream) => stream.get_ref().0.peer_addr(),
        }
    }
}

impl AsyncRead for SocketFlowStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketFlowStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketFlowStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SocketFlowStream::Secure(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
