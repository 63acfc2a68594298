use httparse::Error as HttpParseError;
use pki_types::InvalidDnsNameError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

use crate::state::ReadyState;

/// Close codes that may appear on the wire, per RFC 6455 §7.4.
///
/// `NoStatusReceived`, `Abnormal` and `TlsHandshakeFailure` are report-only:
/// they describe how a connection ended but must never be sent as the
/// payload of a Close frame. [`CloseCode::to_wire`] substitutes `Normal`
/// for these when asked to serialize one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    ProtocolError,
    UnsupportedData,
    NoStatusReceived,
    Abnormal,
    InvalidPayload,
    PolicyViolation,
    MessageTooBig,
    MandatoryExtension,
    InternalError,
    TlsHandshakeFailure,
    Application(u16),
}

impl CloseCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatusReceived,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            1015 => CloseCode::TlsHandshakeFailure,
            3000..=4999 => CloseCode::Application(value),
            _ => return None,
        })
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::TlsHandshakeFailure => 1015,
            CloseCode::Application(code) => *code,
        }
    }

    /// Whether this code is legal as the payload of a Close frame that goes
    /// out on the wire. 1005/1006/1015 are report-only.
    pub fn is_sendable(&self) -> bool {
        !matches!(
            self,
            CloseCode::NoStatusReceived | CloseCode::Abnormal | CloseCode::TlsHandshakeFailure
        )
    }

    /// The code to actually put on the wire, substituting `Normal` for the
    /// three report-only codes per spec §4.8.
    pub fn to_wire(&self) -> u16 {
        if self.is_sendable() {
            self.as_u16()
        } else {
            CloseCode::Normal.as_u16()
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("channel communication error")]
    CommunicationError,

    // General Errors
    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Handshake Errors
    #[error("Invalid handshake request method and version")]
    InvalidHTTPHandshake,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Server didn't upgrade the connection")]
    NoUpgrade,

    #[error("Sever didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("Sec-WebSocket-Version must be 13")]
    UnsupportedVersion,

    #[error("handshake failed: {reason}")]
    HandshakeFailed { reason: String, status: Option<u16> },

    #[error("authentication required")]
    AuthRequired,

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    #[error("too many redirects (max {0})")]
    TooManyRedirects(usize),

    #[error("connection is closed")]
    Closed,

    #[error("invalid connection state transition from {from:?}")]
    InvalidStateTransition { from: ReadyState },

    // Framing Errors
    #[error("RSV bit set without a matching extension")]
    RSVNotZero,

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, can be greater than 125")]
    ControlFramePayloadSize,

    #[error("received a frame with the wrong masking state for this role")]
    MaskingViolation,

    #[error("fragment_size: `{0}` can't be greater than max_frame_size: `{1}`")]
    CustomFragmentSizeExceeded(usize, usize),

    #[error("Max frame size reached")]
    MaxFrameSize,

    #[error("Max message size reached")]
    MaxMessageSize,

    #[error("Invalid close frame payload")]
    InvalidCloseFrame,

    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    // Fragmentation Errors
    #[error("Invalid frame while there is a fragmented message in progress")]
    InvalidFrameFragmentation,

    #[error("Incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    #[error("Invalid Opcode")]
    InvalidOpcode,

    // HTTP Errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("Invalid scheme in WebSocket URL")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("URL has no port")]
    URLNoPort,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    #[error("Incomplete HTTP request")]
    IncompleteHTTPRequest,

    #[error("Invalid HTTP request line")]
    InvalidHTTPRequestLine,

    #[error("missing HTTP method")]
    MissingHTTPMethod,

    #[error("missing request URI")]
    MissingHTTPUri,

    #[error("missing HTTP version")]
    MissingHTTPVersion,

    #[error("invalid Content-Length header")]
    InvalidContentLength,

    // Domain addr parsing error
    #[error("{source}")]
    DomainError {
        #[from]
        source: InvalidDnsNameError,
    },

    #[error("use_tls = `{0}` argument does not match the passed URL scheme: `{1}`")]
    SchemeAgainstTlsConfig(bool, String),


    // Compression / Decompression Errors
    #[error("max_window_bits should be a value between 8 and 15")]
    InvalidMaxWindowBits,

    #[error("deflate compression error: {0}")]
    CompressionError(String),

    #[error("deflate decompression error: {0}")]
    DecompressionError(String),

    #[error("unsupported or malformed permessage-deflate negotiation: {0}")]
    ExtensionNegotiationFailed(String),

    // Authentication helper errors
    #[error("unsupported authentication scheme: {0}")]
    UnsupportedAuthScheme(String),

    #[error("malformed WWW-Authenticate header")]
    MalformedChallenge,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Maps a pump-visible error to the wire close code the close
    /// coordinator should use when tearing down the connection, per
    /// spec §4.8 / §7.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::RSVNotZero
            | Error::ControlFramesFragmented
            | Error::ControlFramePayloadSize
            | Error::InvalidFrameFragmentation
            | Error::FragmentedInProgress
            | Error::InvalidContinuationFrame
            | Error::InvalidOpcode
            | Error::InvalidCloseFrame
            | Error::InvalidCloseCode(_)
            | Error::MaskingViolation => CloseCode::ProtocolError,
            Error::MaxFrameSize | Error::MaxMessageSize => CloseCode::MessageTooBig,
            Error::FromUtf8Error { .. } => CloseCode::InvalidPayload,
            Error::DecompressionError(_) => CloseCode::InvalidPayload,
            Error::Internal(_) => CloseCode::InternalError,
            _ => CloseCode::InternalError,
        }
    }
}
