use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rand::random;
use sha1::{Digest, Sha1};

/// The GUID from RFC 6455 §1.3, concatenated onto the client's key before
/// hashing to derive `Sec-WebSocket-Accept`.
pub(crate) const UUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `accept(k) == base64(sha1(k ++ GUID))` — spec §8 invariant 8 / §6.
pub(crate) fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(UUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

pub(crate) fn generate_websocket_key() -> String {
    let random_bytes: [u8; 16] = random();
    BASE64_STANDARD.encode(random_bytes)
}

/// Generates a fresh 4-byte client masking key.
pub(crate) fn generate_masking_key() -> [u8; 4] {
    random()
}

/// In-place XOR of `payload` against `mask`, repeating the mask every 4
/// bytes. This is its own inverse: applying it twice with the same key
/// restores the original bytes (spec §8 invariant 2).
pub(crate) fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_example() {
        // S1 from the spec: the literal RFC 6455 §1.2 handshake example.
        let accept = generate_websocket_accept_value("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn masking_is_an_involution() {
        let key = [0x37, 0xFA, 0x21, 0x3D];
        let original = b"Hello, WebSocket!".to_vec();
        let mut payload = original.clone();
        apply_mask(&mut payload, key);
        assert_ne!(payload, original);
        apply_mask(&mut payload, key);
        assert_eq!(payload, original);
    }
}
