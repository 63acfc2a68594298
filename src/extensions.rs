use crate::error::Error;

const PERMESSAGE_DEFLATE: &str = "permessage-deflate";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";

/// It's important to enhance that some compression extensions,
/// in some cases affects compression and
/// decompression(client_no_context_takeover, server_no_context_takeover),
/// while another one affects only compression(client_max_window_bits, server_max_window_bits).
/// Keeping the context between compression and decompression,
/// improves performance but adds more overhead, consuming more memory.
/// Larger window sizes (closer to 15)
/// result in better compression ratios but are slower and use more memory.
/// Smaller window sizes (closer to 8) offer faster performance but with worse compression.
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    /// Dictates if compression is enabled
    pub permessage_deflate: bool,
    /// Asks that the client should reset its compression context after compressing a message,
    /// if accepted by the server,
    /// the server must reset the compression context when decompressing each message.
    /// Bear in mind
    /// that this option is related to resetting the context when the client compresses,
    /// and when the server decompresses.
    /// The opposite is not valid.
    pub client_no_context_takeover: Option<bool>,
    /// Asks that the server should reset its compression context after compressing a message,
    /// if a client asks this, and the server accepts,
    /// the client must reset the compression context when decompressing each message.
    /// Bear in mind
    /// that this option is related to resetting the context when the server compresses,
    /// and when the client decompresses.
    /// The opposite is not valid.
    pub server_no_context_takeover: Option<bool>,
    /// Asks that the client sets its compression window to a specific number.
    pub client_max_window_bits: Option<u8>,
    /// Asks that the server sets its compression window to a specific number.
    pub server_max_window_bits: Option<u8>,
}

// In first stage server will accept all the client extension configs, and
// will reply the handshake request with everything that came from client
// on a second stage, the end-user will set the default extension settings when calling
// accept_async_with_config, and the server will read the client settings from the handshake
// and will merge with the default settings, prioritizing what is default
//
// Per spec §4.4, any parameter attached to `permessage-deflate` that this
// crate doesn't recognize fails negotiation outright rather than being
// silently ignored - returning `Ok(None)` would make the caller think the
// peer simply didn't offer compression at all.
pub fn parse_extensions(extensions_header_value: String) -> Result<Option<Extensions>, Error> {
    let extensions_str = extensions_header_value.split(';');
    let mut extensions = Extensions::default();
    let mut saw_deflate = false;

    for extension_str in extensions_str.into_iter() {
        let token = extension_str.trim();
        if token.is_empty() {
            continue;
        }
        if token == PERMESSAGE_DEFLATE {
            saw_deflate = true;
            extensions.permessage_deflate = true;
        } else if token.starts_with(CLIENT_NO_CONTEXT_TAKEOVER) {
            extensions.client_no_context_takeover = Some(true);
        } else if token.starts_with(SERVER_NO_CONTEXT_TAKEOVER) {
            extensions.server_no_context_takeover = Some(true);
        } else if token.starts_with(CLIENT_MAX_WINDOW_BITS) {
            extensions.client_max_window_bits = Some(if !token.contains('=') {
                15
            } else {
                token
                    .split('=')
                    .last()
                    .and_then(|v| v.parse::<u8>().ok())
                    .ok_or_else(|| {
                        Error::ExtensionNegotiationFailed(format!("malformed {}", token))
                    })?
            });
        } else if token.starts_with(SERVER_MAX_WINDOW_BITS) {
            extensions.server_max_window_bits = Some(if !token.contains('=') {
                15
            } else {
                token
                    .split('=')
                    .last()
                    .and_then(|v| v.parse::<u8>().ok())
                    .ok_or_else(|| {
                        Error::ExtensionNegotiationFailed(format!("malformed {}", token))
                    })?
            });
        } else {
            return Err(Error::ExtensionNegotiationFailed(format!(
                "unknown permessage-deflate parameter: {}",
                token
            )));
        }
    }
    if !saw_deflate {
        return Ok(None);
    }

    Ok(Some(extensions))
}

/// Per spec §4.3: a client that negotiated permessage-deflate must see both
/// `server_no_context_takeover` and `client_no_context_takeover` in the
/// server's response, since this crate never implements context takeover.
/// Their absence is a fatal `ProtocolError` for the client, not a silent
/// fallback to a mode this crate doesn't support.
pub fn validate_no_context_takeover(extensions: &Extensions) -> Result<(), Error> {
    if !extensions.permessage_deflate {
        return Ok(());
    }
    if extensions.client_no_context_takeover != Some(true)
        || extensions.server_no_context_takeover != Some(true)
    {
        return Err(Error::ExtensionNegotiationFailed(
            "server response missing client_no_context_takeover/server_no_context_takeover".to_string(),
        ));
    }
    Ok(())
}

pub fn merge_extensions(
    server_extensions: Option<Extensions>,
    client_extensions: Option<Extensions>,
) -> Option<Extensions> {
    let server_ext = match server_extensions {
        Some(ext) => ext,
        None => return None,
    };
    let client_ext = match client_extensions {
        Some(ext) => ext,
        None => return None,
    };
    let permessage_deflate = client_ext.permessage_deflate && server_ext.permessage_deflate;
    let merged_extensions = Extensions {
        permessage_deflate,
        // This crate never implements context takeover (spec §4.3), so
        // whenever deflate is negotiated at all, both no-context-takeover
        // parameters are asserted regardless of whether either side's
        // offer bothered to state them.
        client_no_context_takeover: permessage_deflate.then_some(true),
        server_no_context_takeover: permessage_deflate.then_some(true),
        client_max_window_bits: match (
            server_ext.client_max_window_bits,
            client_ext.client_max_window_bits,
        ) {
            (Some(server_bits), Some(client_bits)) => Some(std::cmp::min(server_bits, client_bits)),
            (Some(server_bits), None) => Some(server_bits),
            (None, Some(client_bits)) => Some(client_bits),
            (None, None) => None,
        },
        server_max_window_bits: match (
            server_ext.server_max_window_bits,
            client_ext.server_max_window_bits,
        ) {
            (Some(server_bits), Some(client_bits)) => Some(std::cmp::min(server_bits, client_bits)),
            (Some(server_bits), None) => Some(server_bits),
            (None, Some(client_bits)) => Some(client_bits),
            (None, None) => None,
        },
    };
    Some(merged_extensions)
}

pub fn add_extension_headers(request: &mut String, extensions: Option<Extensions>) {
    match extensions {
        None => {
            request.push_str("\r\n");
        }
        Some(extensions) => {
            if extensions.permessage_deflate {
                request.push_str(&format!("Sec-WebSocket-Extensions: {}", PERMESSAGE_DEFLATE));
                if let Some(true) = extensions.client_no_context_takeover {
                    request.push_str(&format!("; {}", CLIENT_NO_CONTEXT_TAKEOVER))
                }
                if let Some(true) = extensions.server_no_context_takeover {
                    request.push_str(&format!("; {}", SERVER_NO_CONTEXT_TAKEOVER))
                }
                if let Some(bits) = extensions.client_max_window_bits {
                    request.push_str(&format!("; {}={}", CLIENT_MAX_WINDOW_BITS, bits))
                }
                if let Some(bits) = extensions.server_max_window_bits {
                    request.push_str(&format!("; {}={}", SERVER_MAX_WINDOW_BITS, bits))
                }
            }
            request.push_str("\r\n\r\n");
        }
    }
}
