use std::sync::Arc;

use pki_types::ServerName;
use rustls::{ClientConfig as RustlsClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{TlsConnector, TlsStream};
use url::Url;

use crate::auth::{basic_credentials, digest_credentials, Challenge};
use crate::config::{ClientConfig, ServerConfig};
use crate::connection::WSConnection;
use crate::error::Error;
use crate::extensions::{merge_extensions, parse_extensions, validate_no_context_takeover};
use crate::request::{construct_connect_request, construct_http_request, HttpRequest, HttpResponse};
use crate::stream::SocketFlowStream;
use crate::utils::{generate_websocket_accept_value, generate_websocket_key};
use crate::write::Role;

/// Opens a WebSocket connection with default tuning, spec §4.4/§4.12.
pub async fn connect_async(ws_url: &str) -> Result<WSConnection<SocketFlowStream>, Error> {
    connect_async_with_config(ws_url, None).await
}

/// Opens a WebSocket connection, following redirects and retrying once
/// against a 401/407 challenge when `config.auth`/`proxy.credentials` is
/// set. Each loop iteration counts against `max_redirects`, whether it was
/// spent on a redirect or an auth retry, to bound the number of attempts
/// regardless of which kind of response keeps coming back.
pub async fn connect_async_with_config(
    ws_url: &str,
    config: Option<ClientConfig>,
) -> Result<WSConnection<SocketFlowStream>, Error> {
    let config = config.unwrap_or_default();
    let mut url = ws_url.to_string();
    let mut extra_headers: Vec<(String, String)> = Vec::new();
    let mut auth_attempted = false;

    for _ in 0..=config.max_redirects {
        let key = generate_websocket_key();
        let (request, host_with_port, host, use_tls) = construct_http_request(
            &url,
            &key,
            config.web_socket_config.extensions.clone(),
            &config.web_socket_config.subprotocols,
            &extra_headers,
        )?;

        let tcp = connect_tcp(&host_with_port, config.proxy.as_ref()).await?;
        let stream = if use_tls {
            SocketFlowStream::Secure(connect_tls(tcp, &host, config.ca_file.as_deref()).await?)
        } else {
            SocketFlowStream::Plain(tcp)
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let mut buf_reader = BufReader::new(read_half);
        let mut buf_writer = write_half;

        let handshake_timeout = config.web_socket_config.handshake_timeout;
        timeout(handshake_timeout, buf_writer.write_all(request.as_bytes())).await??;
        let response = timeout(handshake_timeout, HttpResponse::parse_http_response(&mut buf_reader)).await??;

        match response.status {
            101 => {
                validate_upgrade_response(&response, &key)?;
                let server_extensions = response
                    .get_header_value("sec-websocket-extensions")
                    .map(parse_extensions)
                    .transpose()?
                    .flatten();
                if let Some(ext) = &server_extensions {
                    validate_no_context_takeover(ext)?;
                }
                let negotiated = merge_extensions(config.web_socket_config.extensions.clone(), server_extensions);

                let mut ws_config = config.web_socket_config.clone();
                ws_config.extensions = negotiated.clone();

                let connection = WSConnection::new(buf_reader, buf_writer, Role::Client, ws_config, negotiated);
                connection.mark_open().await?;
                return Ok(connection);
            }
            401 if !auth_attempted && config.auth.is_some() => {
                auth_attempted = true;
                let header_value = build_auth_header(&response, config.auth.as_ref().unwrap(), &url)?;
                extra_headers.retain(|(name, _)| !name.eq_ignore_ascii_case("Authorization"));
                extra_headers.push(("Authorization".to_string(), header_value));
            }
            300..=399 => {
                let location = response.get_header_value("location").ok_or_else(|| Error::HandshakeFailed {
                    reason: "redirect response with no Location header".to_string(),
                    status: Some(response.status),
                })?;
                url = location;
            }
            status => {
                return Err(Error::HandshakeFailed {
                    reason: response.reason,
                    status: Some(status),
                });
            }
        }
    }

    Err(Error::TooManyRedirects(config.max_redirects))
}

fn build_auth_header(response: &HttpResponse, creds: &crate::auth::Credentials, url: &str) -> Result<String, Error> {
    let header = response.get_header_value("www-authenticate").ok_or(Error::AuthRequired)?;
    let challenge = Challenge::parse(&header)?;
    match &challenge {
        Challenge::Basic { .. } => Ok(basic_credentials(creds)),
        Challenge::Digest { .. } => {
            let parsed = Url::parse(url)?;
            digest_credentials(creds, &challenge, "GET", parsed.path(), "Authorization")
        }
    }
}

fn validate_upgrade_response(response: &HttpResponse, key: &str) -> Result<(), Error> {
    let upgrade = response.get_header_value("upgrade").ok_or(Error::NoUpgrade)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::NoUpgrade);
    }
    let connection = response
        .get_header_value("connection")
        .ok_or(Error::NoConnectionHeaderPresent)?;
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }
    let accept = response
        .get_header_value("sec-websocket-accept")
        .ok_or(Error::InvalidAcceptKey)?;
    if accept != generate_websocket_accept_value(key) {
        return Err(Error::InvalidAcceptKey);
    }
    Ok(())
}

/// Connects to `host_with_port`, tunnelling through `proxy`'s `CONNECT`
/// method first if one is configured, spec §4.12.
async fn connect_tcp(host_with_port: &str, proxy: Option<&crate::config::ProxyConfig>) -> Result<TcpStream, Error> {
    let Some(proxy) = proxy else {
        return Ok(TcpStream::connect(host_with_port).await?);
    };

    let proxy_addr = format!("{}:{}", proxy.host, proxy.port);
    let stream = TcpStream::connect(proxy_addr).await?;
    let proxy_auth = proxy.credentials.as_ref().map(basic_credentials);
    let connect_request = construct_connect_request(host_with_port, proxy_auth.as_deref());

    let (read_half, mut write_half) = tokio::io::split(stream);
    write_half.write_all(connect_request.as_bytes()).await?;
    let mut buf_reader = BufReader::new(read_half);
    let response = HttpResponse::parse_http_response(&mut buf_reader).await?;
    if response.status != 200 {
        return Err(Error::HandshakeFailed {
            reason: format!("proxy CONNECT failed: {}", response.reason),
            status: Some(response.status),
        });
    }

    Ok(buf_reader.into_inner().unsplit(write_half))
}

async fn connect_tls(tcp: TcpStream, host: &str, ca_file: Option<&str>) -> Result<TlsStream<TcpStream>, Error> {
    let mut roots = RootCertStore::empty();
    if let Some(path) = ca_file {
        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(file);
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|e| Error::TlsHandshakeFailed(e.to_string()))?;
            roots
                .add(cert)
                .map_err(|e| Error::TlsHandshakeFailed(e.to_string()))?;
        }
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let tls_config = RustlsClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(host.to_string())?;
    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::TlsHandshakeFailed(e.to_string()))?;

    Ok(TlsStream::Client(tls_stream))
}

/// Accepts a WebSocket connection with default tuning, spec §4.4.
pub async fn accept_async<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static>(
    stream: S,
) -> Result<WSConnection<S>, Error> {
    accept_async_with_config(stream, None).await
}

/// Reads the opening HTTP request off `stream`, validates it per spec
/// §4.4, optionally challenges for credentials (Basic only — this crate
/// has no server-side Digest verification, since that needs a nonce store
/// this crate doesn't keep), negotiates extensions/subprotocols, and
/// replies with `101 Switching Protocols` before handing back an open
/// [`WSConnection`].
pub async fn accept_async_with_config<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static>(
    stream: S,
    config: Option<ServerConfig>,
) -> Result<WSConnection<S>, Error> {
    let config = config.unwrap_or_default();
    let web_socket_config = config.web_socket_config.clone().unwrap_or_default();

    let (read_half, write_half) = tokio::io::split(stream);
    let mut buf_reader = BufReader::new(read_half);
    let mut buf_writer = write_half;

    let request = timeout(
        web_socket_config.handshake_timeout,
        HttpRequest::parse_http_request(&mut buf_reader),
    )
    .await??;

    if let Err(err) = validate_handshake_request(&request) {
        let response =
            "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        buf_writer.write_all(response.as_bytes()).await?;
        return Err(err);
    }

    if let Some(required) = &config.auth {
        if !request
            .get_header_value("authorization")
            .map(|provided| provided == basic_credentials(required))
            .unwrap_or(false)
        {
            let response =
                "HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Basic realm=\"socket-flow\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
            buf_writer.write_all(response.as_bytes()).await?;
            return Err(Error::AuthRequired);
        }
    }

    let key = request.get_header_value("sec-websocket-key").ok_or(Error::NoSecWebsocketKey)?;
    let client_extensions = request
        .get_header_value("sec-websocket-extensions")
        .map(parse_extensions)
        .transpose()?
        .flatten();
    let negotiated = merge_extensions(web_socket_config.extensions.clone(), client_extensions);

    let response = build_accept_response(&key, &negotiated, &request, &web_socket_config.subprotocols);
    buf_writer.write_all(response.as_bytes()).await?;

    let mut ws_config = web_socket_config;
    ws_config.extensions = negotiated.clone();

    let connection = WSConnection::new(buf_reader, buf_writer, Role::Server, ws_config, negotiated);
    connection.mark_open().await?;
    Ok(connection)
}

fn validate_handshake_request(request: &HttpRequest) -> Result<(), Error> {
    if !request.method.eq_ignore_ascii_case("GET") {
        return Err(Error::InvalidHTTPHandshake);
    }
    let upgrade = request.get_header_value("upgrade").ok_or(Error::NoUpgradeHeaderPresent)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }
    let connection = request
        .get_header_value("connection")
        .ok_or(Error::NoConnectionHeaderPresent)?;
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }
    request.get_header_value("host").ok_or(Error::NoHostHeaderPresent)?;
    let version = request
        .get_header_value("sec-websocket-version")
        .ok_or(Error::UnsupportedVersion)?;
    if version != "13" {
        return Err(Error::UnsupportedVersion);
    }
    request.get_header_value("sec-websocket-key").ok_or(Error::NoSecWebsocketKey)?;
    Ok(())
}

fn build_accept_response(
    key: &str,
    negotiated: &Option<crate::extensions::Extensions>,
    request: &HttpRequest,
    offered_subprotocols: &[String],
) -> String {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n",
        generate_websocket_accept_value(key)
    );

    if let Some(ext) = negotiated {
        if ext.permessage_deflate {
            response.push_str("Sec-WebSocket-Extensions: permessage-deflate");
            if let Some(true) = ext.client_no_context_takeover {
                response.push_str("; client_no_context_takeover");
            }
            if let Some(true) = ext.server_no_context_takeover {
                response.push_str("; server_no_context_takeover");
            }
            if let Some(bits) = ext.client_max_window_bits {
                response.push_str(&format!("; client_max_window_bits={}", bits));
            }
            if let Some(bits) = ext.server_max_window_bits {
                response.push_str(&format!("; server_max_window_bits={}", bits));
            }
            response.push_str("\r\n");
        }
    }

    if !offered_subprotocols.is_empty() {
        if let Some(requested) = request.get_header_value("sec-websocket-protocol") {
            let agreed = requested
                .split(',')
                .map(|p| p.trim())
                .find(|p| offered_subprotocols.iter().any(|sp| sp == p));
            if let Some(agreed) = agreed {
                response.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", agreed));
            }
        }
    }

    response.push_str("\r\n");
    response
}
