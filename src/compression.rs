use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::Error;

/// The four bytes RFC 7692 §7.2.1 requires every permessage-deflate
/// message to end with before compression, and that senders must strip
/// afterwards. [`Compressor::compress`] strips them; [`Compressor::decompress`]
/// re-appends them before inflating.
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

fn buffer_size_for(payload_size: usize) -> usize {
    if payload_size <= 4096 {
        4096
    } else if payload_size <= 65536 {
        16384
    } else {
        65536
    }
}

/// Per-message raw DEFLATE compressor/decompressor, spec §4.3.
///
/// Context takeover is disabled on both directions (the negotiator only
/// ever advertises `server_no_context_takeover`/`client_no_context_takeover`),
/// so each message is compressed/decompressed independently: `reset_context`
/// is always `true` in this crate's usage, but the flag is threaded through
/// in case a future negotiation ever omits it.
pub(crate) struct Compressor {
    compress: Compress,
    decompress: Decompress,
    reset_context: bool,
}

impl Compressor {
    pub fn new(reset_context: bool, window_bits: Option<u8>) -> Self {
        let (compress, decompress) = if let Some(bits) = window_bits {
            (
                Compress::new_with_window_bits(Compression::default(), false, bits),
                Decompress::new_with_window_bits(false, bits),
            )
        } else {
            (
                Compress::new(Compression::default(), false),
                Decompress::new(false),
            )
        };
        Self {
            compress,
            decompress,
            reset_context,
        }
    }

    /// Compresses `payload` and strips the trailing empty-deflate-block
    /// marker, per RFC 7692. Resets the compressor state first when
    /// context takeover is disabled.
    pub fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if self.reset_context {
            self.compress.reset();
        }

        let buffer_size = buffer_size_for(payload.len());
        let mut out = Vec::with_capacity(buffer_size);
        let mut chunk = vec![0u8; buffer_size];

        let before_in = self.compress.total_in();
        loop {
            let consumed = (self.compress.total_in() - before_in) as usize;
            let input = &payload[consumed..];
            let before_out = self.compress.total_out();

            let status = self
                .compress
                .compress(input, &mut chunk, FlushCompress::Sync)
                .map_err(|e| Error::CompressionError(e.to_string()))?;

            let produced = (self.compress.total_out() - before_out) as usize;
            out.extend_from_slice(&chunk[..produced]);

            if status == Status::StreamEnd
                || (self.compress.total_in() - before_in) as usize >= payload.len()
            {
                break;
            }
        }

        if out.ends_with(&DEFLATE_TRAILER) {
            out.truncate(out.len() - DEFLATE_TRAILER.len());
        }

        Ok(out)
    }

    /// Appends the deflate trailer then inflates, per RFC 7692.
    pub fn decompress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let mut input = Vec::with_capacity(payload.len() + DEFLATE_TRAILER.len());
        input.extend_from_slice(payload);
        input.extend_from_slice(&DEFLATE_TRAILER);

        if self.reset_context {
            self.decompress.reset(false);
        }

        let buffer_size = buffer_size_for(input.len());
        let mut out = Vec::with_capacity(buffer_size);
        let mut chunk = vec![0u8; buffer_size];

        let before_in = self.decompress.total_in();
        loop {
            let consumed = (self.decompress.total_in() - before_in) as usize;
            if consumed >= input.len() {
                break;
            }
            let slice = &input[consumed..];
            let before_out = self.decompress.total_out();

            let status = self
                .decompress
                .decompress(slice, &mut chunk, FlushDecompress::Sync)
                .map_err(|e| Error::DecompressionError(e.to_string()))?;

            let produced = (self.decompress.total_out() - before_out) as usize;
            out.extend_from_slice(&chunk[..produced]);

            if status == Status::StreamEnd {
                break;
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_decompress_round_trips() {
        let mut compressor = Compressor::new(true, None);
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = compressor.compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());
        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn empty_payload_round_trips() {
        let mut compressor = Compressor::new(true, None);
        let compressed = compressor.compress(&[]).unwrap();
        let decompressed = compressor.decompress(&compressed).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn independent_messages_with_context_reset() {
        let mut compressor = Compressor::new(true, None);
        for payload in [&b"first message"[..], &b"second, unrelated message"[..]] {
            let compressed = compressor.compress(payload).unwrap();
            let decompressed = compressor.decompress(&compressed).unwrap();
            assert_eq!(decompressed, payload);
        }
    }
}
