use crate::error::Error;
use crate::utils::apply_mask;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Per spec §3: any payload length above this is rejected outright,
/// regardless of configured caps, because it would carry the reserved top
/// bit of the 64-bit extended length field.
const ABSOLUTE_MAX_PAYLOAD_LEN: u64 = (1u64 << 63) - 1;

/// Control frames (Close/Ping/Pong) may never carry more than 125 bytes of
/// payload, per spec §3/§4.1.
const MAX_CONTROL_PAYLOAD_LEN: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn is_data(&self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }
}

/// A single WebSocket frame, after unmasking (if it came off a masked
/// wire) and, when `final_fragment && compressed`, after decompression —
/// the pump applies those transforms while it still has the header
/// context (masked/rsv1) available. See spec §3/§4.1.
#[derive(Debug, Clone)]
pub struct Frame {
    pub final_fragment: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
    /// True iff RSV1 was set on the first frame of this message, i.e. the
    /// message (once fully reassembled) was compressed with
    /// permessage-deflate.
    pub compressed: bool,
}

impl Frame {
    pub fn new(final_fragment: bool, opcode: OpCode, payload: Vec<u8>, compressed: bool) -> Self {
        Self {
            final_fragment,
            opcode,
            payload,
            compressed,
        }
    }
}

/// The result of parsing the fixed 2-byte frame prefix, before the
/// extended length, mask and payload (which may not all be available yet
/// on the wire) are read. Produced by [`decode_header`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderDraft {
    pub fin: bool,
    pub rsv1: bool,
    pub opcode: OpCode,
    pub masked: bool,
    /// The raw 7-bit length field: 0-125 is the literal length, 126/127
    /// mean "read an extra u16/u64".
    pub len_tag: u8,
}

/// Parses the first two bytes of a frame and validates the structural
/// invariants that don't require the payload length or body: RSV2/RSV3
/// must be zero, RSV1 may only be set when deflate is negotiated, control
/// frames must be final and (if their length tag is already >125) are
/// rejected before ever reading an extended length. Spec §4.1.
pub(crate) fn decode_header(header: [u8; 2], deflate_negotiated: bool) -> Result<HeaderDraft, Error> {
    let fin = (header[0] & 0b1000_0000) != 0;
    let rsv1 = (header[0] & 0b0100_0000) != 0;
    let rsv2 = (header[0] & 0b0010_0000) != 0;
    let rsv3 = (header[0] & 0b0001_0000) != 0;
    let opcode = OpCode::from(header[0] & 0b0000_1111)?;

    if rsv2 || rsv3 || (rsv1 && !deflate_negotiated) {
        return Err(Error::RSVNotZero);
    }
    if rsv1 && opcode.is_control() {
        return Err(Error::RSVNotZero);
    }
    if !fin && opcode.is_control() {
        return Err(Error::ControlFramesFragmented);
    }

    let masked = (header[1] & 0b1000_0000) != 0;
    let len_tag = header[1] & 0b0111_1111;

    if opcode.is_control() && len_tag as usize > MAX_CONTROL_PAYLOAD_LEN {
        return Err(Error::ControlFramePayloadSize);
    }

    Ok(HeaderDraft {
        fin,
        rsv1,
        opcode,
        masked,
        len_tag,
    })
}

/// Reads the extended payload length (if any), the masking key (if any)
/// and exactly `payload_length` bytes of payload, enforcing
/// `max_frame_size`. Leaves the payload masked; the caller (the receive
/// pump) applies [`apply_mask`]/decompression once it knows the full
/// fragmentation context. Short reads on any sub-step surface as the
/// underlying `io::Error` via `?` — spec's `TransportTruncated`.
pub(crate) async fn decode_tail<R: AsyncReadExt + Unpin>(
    header: HeaderDraft,
    reader: &mut R,
    max_frame_size: usize,
) -> Result<(Frame, Option<[u8; 4]>), Error> {
    let mut length = header.len_tag as u64;
    if header.len_tag == 126 {
        let mut be_bytes = [0u8; 2];
        reader.read_exact(&mut be_bytes).await?;
        length = u16::from_be_bytes(be_bytes) as u64;
    } else if header.len_tag == 127 {
        let mut be_bytes = [0u8; 8];
        reader.read_exact(&mut be_bytes).await?;
        length = u64::from_be_bytes(be_bytes);
        if length > ABSOLUTE_MAX_PAYLOAD_LEN {
            return Err(Error::MaxFrameSize);
        }
    }

    if length as usize > max_frame_size {
        return Err(Error::MaxFrameSize);
    }

    let mask = if header.masked {
        let mut mask = [0u8; 4];
        reader.read_exact(&mut mask).await?;
        Some(mask)
    } else {
        None
    };

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;

    Ok((
        Frame::new(header.fin, header.opcode, payload, header.rsv1),
        mask,
    ))
}

/// Unmasks a frame's payload in place. Idempotent on an already-unmasked
/// frame only if called with the same key it was masked with — masking is
/// an involution (spec §8 invariant 2), so callers must unmask exactly
/// once per received masked frame.
pub(crate) fn unmask(frame: &mut Frame, mask: [u8; 4]) {
    apply_mask(&mut frame.payload, mask);
}

/// Serializes one frame to wire bytes. If `mask` is `Some`, the payload is
/// masked and the MASK bit is set (client role); if `None`, the frame is
/// written unmasked (server role). `set_rsv1` lets the caller flag this as
/// the first frame of a compressed message.
pub(crate) fn encode(frame: &Frame, mask: Option<[u8; 4]>, set_rsv1: bool) -> Vec<u8> {
    let mut first_byte = (frame.final_fragment as u8) << 7 | frame.opcode.as_u8();
    if set_rsv1 {
        first_byte |= 0b0100_0000;
    }

    let payload_len = frame.payload.len();
    let mask_bit = if mask.is_some() { 0b1000_0000 } else { 0 };

    let mut out = Vec::with_capacity(payload_len + 14);
    out.push(first_byte);

    if payload_len <= 125 {
        out.push(mask_bit | payload_len as u8);
    } else if payload_len <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(payload_len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(&frame.payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(&frame.payload),
    }

    out
}

/// Writes an encoded frame directly to an async writer, used by
/// [`crate::write::Writer`].
pub(crate) async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame: &Frame,
    mask: Option<[u8; 4]>,
    set_rsv1: bool,
) -> Result<(), Error> {
    let bytes = encode(frame, mask, set_rsv1);
    writer.write_all(&bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn opcode_round_trips() {
        for (byte, op) in [
            (0x0, OpCode::Continue),
            (0x1, OpCode::Text),
            (0x2, OpCode::Binary),
            (0x8, OpCode::Close),
            (0x9, OpCode::Ping),
            (0xA, OpCode::Pong),
        ] {
            assert_eq!(OpCode::from(byte).unwrap(), op);
            assert_eq!(op.as_u8(), byte);
        }
        assert!(OpCode::from(0x3).is_err());
    }

    #[tokio::test]
    async fn s2_single_masked_text_wire_bytes() {
        // S2 from the spec: "Hello" masked with 37 FA 21 3D.
        let wire = [0x81, 0x85, 0x37, 0xFA, 0x21, 0x3D, 0x7F, 0x9F, 0x4D, 0x51, 0x58];
        let mut cursor = Cursor::new(wire);
        let mut header = [0u8; 2];
        cursor.read_exact(&mut header).await.unwrap();
        let draft = decode_header(header, false).unwrap();
        assert_eq!(draft.opcode, OpCode::Text);
        assert!(draft.fin);
        assert!(draft.masked);

        let (mut frame, mask) = decode_tail(draft, &mut cursor, 1 << 20).await.unwrap();
        let mask = mask.unwrap();
        unmask(&mut frame, mask);
        assert_eq!(frame.payload, b"Hello");
        assert!(frame.final_fragment);
    }

    #[tokio::test]
    async fn encode_then_decode_round_trips() {
        let frame = Frame::new(true, OpCode::Binary, vec![1, 2, 3, 4, 250], false);
        let mask = [9, 8, 7, 6];
        let wire = encode(&frame, Some(mask), false);

        let mut cursor = Cursor::new(wire);
        let mut header = [0u8; 2];
        cursor.read_exact(&mut header).await.unwrap();
        let draft = decode_header(header, false).unwrap();
        let (mut decoded, decoded_mask) = decode_tail(draft, &mut cursor, 1 << 20).await.unwrap();
        unmask(&mut decoded, decoded_mask.unwrap());

        assert_eq!(decoded.payload, frame.payload);
        assert_eq!(decoded.opcode, frame.opcode);
        assert_eq!(decoded.final_fragment, frame.final_fragment);
    }

    #[test]
    fn control_frame_over_125_bytes_rejected() {
        let header_byte0 = 0b1000_1001u8; // fin=1, opcode=Ping
        let header_byte1 = 126u8; // claims extended length
        let err = decode_header([header_byte0, header_byte1], false).unwrap_err();
        assert!(matches!(err, Error::ControlFramePayloadSize));
    }

    #[test]
    fn fragmented_control_frame_rejected() {
        let header_byte0 = 0b0000_1000u8; // fin=0, opcode=Close
        let err = decode_header([header_byte0, 0], false).unwrap_err();
        assert!(matches!(err, Error::ControlFramesFragmented));
    }

    #[test]
    fn rsv1_without_deflate_rejected() {
        let header_byte0 = 0b1100_0001u8; // fin=1, rsv1=1, opcode=Text
        let err = decode_header([header_byte0, 0], false).unwrap_err();
        assert!(matches!(err, Error::RSVNotZero));
    }
}
