use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig as RustlsConfig;

use crate::auth::Credentials;
use crate::extensions::Extensions;

/// Tunables shared by client and server endpoints, spec §4/§7.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Hard cap on a single frame's payload. Exceeding it aborts the
    /// connection with `MaxFrameSize` (wire code 1009).
    pub max_frame_size: Option<usize>,
    /// Hard cap on a fully reassembled message (after decompression).
    /// Exceeding it aborts the connection with `MaxMessageSize`.
    pub max_message_size: Option<usize>,
    /// Outgoing messages larger than this are split into multiple
    /// fragments when sent. `None` disables fragmentation (one frame per
    /// message, subject to `max_frame_size`).
    pub fragment_threshold: Option<usize>,
    /// How long the opening handshake (request + response, or accept +
    /// reply) may take before the attempt fails with `Timeout`.
    pub handshake_timeout: Duration,
    /// How long a ping waits for its matching pong before `is_alive`
    /// reports the peer as unresponsive.
    pub ping_timeout: Duration,
    /// How long the close coordinator waits for the peer's echoing Close
    /// frame before giving up and tearing the transport down anyway.
    pub close_timeout: Duration,
    /// When true, a received Ping is surfaced to the caller as an event in
    /// addition to the automatic Pong reply; spec §4.10 Open Question 2.
    pub emit_on_ping: bool,
    /// Extensions this endpoint offers (client) or accepts (server).
    /// `None` disables permessage-deflate entirely.
    pub extensions: Option<Extensions>,
    /// Application subprotocols offered/accepted, in preference order.
    pub subprotocols: Vec<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            fragment_threshold: Some(1016),
            handshake_timeout: Duration::from_secs(90),
            ping_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(5),
            emit_on_ping: false,
            extensions: None,
            subprotocols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub web_socket_config: Option<WebSocketConfig>,
    pub tls_config: Option<Arc<RustlsConfig>>,
    /// Credentials the server will challenge for if set; absent means the
    /// endpoint accepts the handshake unauthenticated.
    pub auth: Option<Credentials>,
}

/// How to reach an HTTP `CONNECT` proxy before the WebSocket handshake
/// begins, spec §4.12.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    pub ca_file: Option<String>,
    /// Credentials to present if the server challenges with 401.
    pub auth: Option<Credentials>,
    /// An HTTP proxy to `CONNECT` through before the handshake.
    pub proxy: Option<ProxyConfig>,
    /// Maximum number of 3xx redirects to follow before giving up with
    /// `TooManyRedirects`.
    pub max_redirects: usize,
}

const DEFAULT_MAX_REDIRECTS: usize = 10;

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            web_socket_config: WebSocketConfig::default(),
            ca_file: None,
            auth: None,
            proxy: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl ClientConfig {
    pub fn new(web_socket_config: WebSocketConfig) -> Self {
        ClientConfig {
            web_socket_config,
            ..Default::default()
        }
    }
}
