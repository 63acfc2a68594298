use std::fmt;

use rand::random;

use crate::error::Error;

/// Credentials presented at either the WebSocket endpoint (a 401 challenge
/// per spec §4.11) or an HTTP proxy (a 407 challenge per spec §4.12).
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A parsed `WWW-Authenticate`/`Proxy-Authenticate` challenge header.
#[derive(Debug, Clone)]
pub enum Challenge {
    Basic { realm: String },
    Digest {
        realm: String,
        nonce: String,
        qop: Option<String>,
        opaque: Option<String>,
        algorithm: Option<String>,
    },
}

impl Challenge {
    /// Parses a single `Basic ...` or `Digest ...` challenge value. Per
    /// spec §4.11, a header advertising an unsupported scheme (anything
    /// other than `Basic`/`Digest`) surfaces as `UnsupportedAuthScheme`
    /// rather than being silently skipped.
    pub fn parse(header_value: &str) -> Result<Self, Error> {
        let value = header_value.trim();
        let (scheme, rest) = value
            .split_once(' ')
            .ok_or(Error::MalformedChallenge)?;

        match scheme.to_ascii_lowercase().as_str() {
            "basic" => {
                let params = parse_params(rest);
                let realm = params.get("realm").cloned().unwrap_or_default();
                Ok(Challenge::Basic { realm })
            }
            "digest" => {
                let params = parse_params(rest);
                let realm = params
                    .get("realm")
                    .cloned()
                    .ok_or(Error::MalformedChallenge)?;
                let nonce = params
                    .get("nonce")
                    .cloned()
                    .ok_or(Error::MalformedChallenge)?;
                Ok(Challenge::Digest {
                    realm,
                    nonce,
                    qop: params.get("qop").cloned(),
                    opaque: params.get("opaque").cloned(),
                    algorithm: params.get("algorithm").cloned(),
                })
            }
            other => Err(Error::UnsupportedAuthScheme(other.to_string())),
        }
    }
}

/// Splits a comma-separated `key=value` / `key="value"` parameter list,
/// the format both `Basic` and `Digest` challenges use after the scheme
/// token, per RFC 2617 §1.2.
fn parse_params(rest: &str) -> std::collections::HashMap<String, String> {
    let mut params = std::collections::HashMap::new();
    for part in split_respecting_quotes(rest) {
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().trim_matches('"').to_string();
            params.insert(key, value);
        }
    }
    params
}

fn split_respecting_quotes(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Builds a `Basic` credentials header value, per RFC 7617.
pub fn basic_credentials(creds: &Credentials) -> String {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;
    let raw = format!("{}:{}", creds.username, creds.password);
    format!("Basic {}", BASE64_STANDARD.encode(raw))
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Computes an RFC 2617 Digest `Authorization`/`Proxy-Authorization` header
/// value in response to a parsed [`Challenge::Digest`]. A fresh client
/// nonce (`cnonce`) is generated per call and a `nc` (nonce count) of
/// `00000001` is always used, since this crate never caches a digest
/// context across requests to retry it.
pub fn digest_credentials(
    creds: &Credentials,
    challenge: &Challenge,
    method: &str,
    uri: &str,
    header_name: &str,
) -> Result<String, Error> {
    let (realm, nonce, qop, opaque, algorithm) = match challenge {
        Challenge::Digest {
            realm,
            nonce,
            qop,
            opaque,
            algorithm,
        } => (realm, nonce, qop, opaque, algorithm),
        Challenge::Basic { .. } => {
            return Err(Error::UnsupportedAuthScheme("basic".to_string()))
        }
    };

    if let Some(algo) = algorithm {
        if !algo.eq_ignore_ascii_case("MD5") {
            return Err(Error::UnsupportedAuthScheme(format!("digest algorithm {algo}")));
        }
    }

    let ha1 = md5_hex(&format!("{}:{}:{}", creds.username, realm, creds.password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    let cnonce = generate_cnonce();
    let nc = "00000001";

    let (response, qop_value) = if let Some(qop) = qop {
        let qop_value = qop.split(',').next().unwrap_or("auth").trim().to_string();
        let response = md5_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, nonce, nc, cnonce, qop_value, ha2
        ));
        (response, Some(qop_value))
    } else {
        let response = md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2));
        (response, None)
    };

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
        creds.username, realm, nonce, uri, response
    );
    if let Some(qop_value) = &qop_value {
        header.push_str(&format!(", qop={}, nc={}, cnonce=\"{}\"", qop_value, nc, cnonce));
    }
    if let Some(opaque) = opaque {
        header.push_str(&format!(", opaque=\"{}\"", opaque));
    }

    // header_name is informational only; callers set the actual header
    // name (`Authorization` vs `Proxy-Authorization`) when inserting this
    // value, since this function doesn't have access to the request map.
    let _ = header_name;

    Ok(header)
}

fn generate_cnonce() -> String {
    let bytes: [u8; 8] = random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:***", self.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_challenge() {
        let challenge = Challenge::parse(r#"Basic realm="restricted""#).unwrap();
        assert!(matches!(challenge, Challenge::Basic { realm } if realm == "restricted"));
    }

    #[test]
    fn parses_digest_challenge_with_qop() {
        let header = r#"Digest realm="test", qop="auth", nonce="abc123", opaque="xyz""#;
        let challenge = Challenge::parse(header).unwrap();
        match challenge {
            Challenge::Digest {
                realm,
                nonce,
                qop,
                opaque,
                ..
            } => {
                assert_eq!(realm, "test");
                assert_eq!(nonce, "abc123");
                assert_eq!(qop.as_deref(), Some("auth"));
                assert_eq!(opaque.as_deref(), Some("xyz"));
            }
            _ => panic!("expected digest challenge"),
        }
    }

    #[test]
    fn unsupported_scheme_is_reported() {
        let err = Challenge::parse("Negotiate abc").unwrap_err();
        assert!(matches!(err, Error::UnsupportedAuthScheme(scheme) if scheme == "negotiate"));
    }

    #[test]
    fn digest_response_matches_rfc2617_example() {
        // The worked example from RFC 2617 §3.5, using its fixed cnonce.
        let creds = Credentials::new("Mufasa", "Circle Of Life");
        let ha1 = md5_hex(&format!(
            "{}:{}:{}",
            creds.username, "testrealm@host.com", creds.password
        ));
        assert_eq!(ha1, "939e7578ed9e3c518a452acee763bce9");
        let ha2 = md5_hex("GET:/dir/index.html");
        assert_eq!(ha2, "39aff3a2bab6126f332b942af96d3366");
        let response = md5_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, "dcd98b7102dd2f0e8b11d0f600bfb0c093", "00000001", "0a4f113b", "auth", ha2
        ));
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn basic_credentials_header_matches_rfc7617_example() {
        let creds = Credentials::new("Aladdin", "open sesame");
        assert_eq!(basic_credentials(&creds), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }
}
