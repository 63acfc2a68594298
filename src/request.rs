use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf};
use tokio::time::{timeout, Duration};
use url::Url;

use crate::error::Error;
use crate::extensions::{add_extension_headers, Extensions};

const HTTP_REQUEST_DELIMITER: &[u8] = b"\r\n\r\n";
const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_HEADERS: usize = 64;

/// Parses a `ws://`/`wss://` URL and builds the opening-handshake request
/// line, returning `(request, host:port, host, use_tls)`. `extra_headers`
/// lets the handshake layer inject `Authorization`/`Proxy-Authorization`
/// on a retried attempt without duplicating this whole function.
pub fn construct_http_request(
    ws_url: &str,
    key: &str,
    extensions: Option<Extensions>,
    subprotocols: &[String],
    extra_headers: &[(String, String)],
) -> Result<(String, String, String, bool), Error> {
    let parsed_url = Url::parse(ws_url)?;
    let mut use_tls = false;

    let http_port: u16 = match parsed_url.scheme() {
        "ws" => 80,
        "wss" => {
            use_tls = true;
            443
        }
        _ => return Err(Error::InvalidSchemeURL),
    };

    let host = parsed_url.host_str().ok_or(Error::URLNoHost)?;
    let port = parsed_url.port().unwrap_or(http_port);

    let request_host_field = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => String::from(host),
    };

    let host_with_port = format!("{}:{}", host, port);

    let request_path = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n",
        request_path,
        request_host_field,
        key,
    );

    if !subprotocols.is_empty() {
        request.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            subprotocols.join(", ")
        ));
    }

    for (name, value) in extra_headers {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }

    add_extension_headers(&mut request, extensions);

    Ok((request, host_with_port, String::from(host), use_tls))
}

/// Builds the `CONNECT host:port HTTP/1.1` request used to tunnel through
/// an HTTP proxy before the WebSocket handshake begins, spec §4.12.
pub fn construct_connect_request(target: &str, proxy_auth: Option<&str>) -> String {
    let mut request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\nProxy-Connection: Keep-Alive\r\n"
    );
    if let Some(auth) = proxy_auth {
        request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
    }
    request.push_str("\r\n");
    request
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Reads and parses an HTTP request off the wire, used on the server
    /// side of the opening handshake. A peer that never completes its
    /// headers is dropped after 5 seconds rather than held open
    /// indefinitely.
    pub async fn parse_http_request<T: AsyncReadExt + Unpin>(
        reader: &mut BufReader<ReadHalf<T>>,
    ) -> Result<HttpRequest, Error> {
        let buffer = read_until_headers_end(reader).await?;

        let mut headers_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut headers_buf);
        let header_end = match parsed.parse(&buffer)? {
            httparse::Status::Complete(n) => n,
            httparse::Status::Partial => return Err(Error::IncompleteHTTPRequest),
        };

        let method = parsed.method.ok_or(Error::MissingHTTPMethod)?.to_string();
        let uri = parsed.path.ok_or(Error::MissingHTTPUri)?.to_string();
        let version = format!("HTTP/1.{}", parsed.version.ok_or(Error::MissingHTTPVersion)?);

        let mut headers = HashMap::new();
        for header in parsed.headers.iter() {
            headers.insert(
                header.name.to_ascii_lowercase(),
                String::from_utf8_lossy(header.value).trim().to_string(),
            );
        }

        let body = if let Some(content_length) = headers.get("content-length") {
            let length: usize = content_length
                .parse()
                .map_err(|_| Error::InvalidContentLength)?;
            let mut body_buf = vec![0; length];
            reader.read_exact(&mut body_buf).await?;
            body_buf
        } else {
            buffer[header_end..].to_vec()
        };

        Ok(HttpRequest {
            method,
            uri,
            version,
            headers,
            body,
        })
    }

    pub fn get_header_value(&self, key: &str) -> Option<String> {
        self.headers.get(&key.to_ascii_lowercase()).cloned()
    }

    pub async fn write<W: AsyncWriteExt + Unpin>(raw: &str, writer: &mut W) -> Result<(), Error> {
        writer.write_all(raw.as_bytes()).await?;
        Ok(())
    }
}

/// A parsed HTTP response, used on the client side of the opening
/// handshake (101 Switching Protocols, or a 401/407/3xx that needs
/// further handling).
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    pub async fn parse_http_response<T: AsyncReadExt + Unpin>(
        reader: &mut BufReader<ReadHalf<T>>,
    ) -> Result<HttpResponse, Error> {
        let buffer = read_until_headers_end(reader).await?;

        let mut headers_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut headers_buf);
        match parsed.parse(&buffer)? {
            httparse::Status::Complete(_) => {}
            httparse::Status::Partial => return Err(Error::IncompleteHTTPRequest),
        };

        let status = parsed.code.ok_or(Error::MissingHTTPVersion)?;
        let reason = parsed.reason.unwrap_or_default().to_string();

        let mut headers = HashMap::new();
        for header in parsed.headers.iter() {
            headers.insert(
                header.name.to_ascii_lowercase(),
                String::from_utf8_lossy(header.value).trim().to_string(),
            );
        }

        Ok(HttpResponse {
            status,
            reason,
            headers,
        })
    }

    pub fn get_header_value(&self, key: &str) -> Option<String> {
        self.headers.get(&key.to_ascii_lowercase()).cloned()
    }
}

async fn read_until_headers_end<T: AsyncReadExt + Unpin>(
    reader: &mut BufReader<ReadHalf<T>>,
) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    let mut byte = [0u8; 1];

    timeout(Duration::from_secs(5), async {
        loop {
            let n = reader.read(&mut byte).await?;
            if n == 0 {
                break;
            }
            buffer.push(byte[0]);
            if buffer.len() >= HTTP_REQUEST_DELIMITER.len()
                && buffer[buffer.len() - HTTP_REQUEST_DELIMITER.len()..] == *HTTP_REQUEST_DELIMITER
            {
                break;
            }
            if buffer.len() > MAX_HEADER_BYTES {
                break;
            }
        }
        Ok::<(), Error>(())
    })
    .await??;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_request_with_subprotocols_and_extra_headers() {
        let (request, host_with_port, host, use_tls) = construct_http_request(
            "wss://example.com/chat?x=1",
            "dGhlIHNhbXBsZSBub25jZQ==",
            None,
            &["chat.v2".to_string()],
            &[("Authorization".to_string(), "Basic xyz".to_string())],
        )
        .unwrap();

        assert!(use_tls);
        assert_eq!(host, "example.com");
        assert_eq!(host_with_port, "example.com:443");
        assert!(request.contains("GET /chat?x=1 HTTP/1.1"));
        assert!(request.contains("Sec-WebSocket-Protocol: chat.v2"));
        assert!(request.contains("Authorization: Basic xyz"));
    }

    #[test]
    fn rejects_non_ws_scheme() {
        let err = construct_http_request("http://example.com", "key", None, &[], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidSchemeURL));
    }

    #[test]
    fn connect_request_includes_proxy_auth() {
        let request = construct_connect_request("example.com:443", Some("Basic abc"));
        assert!(request.starts_with("CONNECT example.com:443 HTTP/1.1"));
        assert!(request.contains("Proxy-Authorization: Basic abc"));
    }
}
