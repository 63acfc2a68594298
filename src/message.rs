use crate::error::Error;
use crate::frame::{Frame, OpCode};
use crate::payload;

/// The payload of a fully reassembled WebSocket message, handed to callers
/// through [`crate::split::WSReader`]/[`crate::event::Event::NewMessage`].
/// Fragmentation and compression have already been resolved by the time a
/// `Message` exists — see spec §4.6/§4.7.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    /// A Close frame the peer sent (or that this endpoint echoed), carrying
    /// the status code view of spec §4.2 plus whether the closing handshake
    /// completed cleanly (spec §3/§4.8 — an echo exchanged within
    /// `close_timeout`, as opposed to a timeout or a fatal teardown).
    /// Delivered once per connection, always as the last item before the
    /// stream ends.
    Close {
        code: u16,
        reason: String,
        was_clean: bool,
    },
}

impl Message {
    /// Converts a reassembled [`Frame`] into a `Message`. Only `Text` and
    /// `Binary` opcodes are valid inputs here; anything else is a pump bug,
    /// not a protocol error, since control/continuation frames never reach
    /// this far. Close frames carry a `was_clean` flag the coordinator
    /// derives, not the raw frame, so they're built directly by the pump
    /// instead of through this constructor.
    pub fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame.opcode {
            OpCode::Text => Ok(Message::Text(String::from_utf8(frame.payload)?)),
            OpCode::Binary => Ok(Message::Binary(frame.payload)),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_binary(&self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(data) => data.clone(),
            Message::Close { reason, .. } => reason.as_bytes().to_vec(),
        }
    }

    pub fn as_text(&self) -> Result<String, Error> {
        match self {
            Message::Text(text) => Ok(text.clone()),
            Message::Binary(data) => Ok(String::from_utf8(data.clone())?),
            Message::Close { reason, .. } => Ok(reason.clone()),
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Message::Close { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_round_trips_through_message() {
        let frame = Frame::new(true, OpCode::Text, b"hi".to_vec(), false);
        let message = Message::from_frame(frame).unwrap();
        assert_eq!(message, Message::Text("hi".to_string()));
    }

    #[test]
    fn close_message_carries_code_reason_and_clean_flag() {
        let message = Message::Close {
            code: 1000,
            reason: "bye".to_string(),
            was_clean: true,
        };
        assert_eq!(message.as_text().unwrap(), "bye");
        assert!(message.is_close());
    }

    #[test]
    fn invalid_utf8_text_is_rejected() {
        let frame = Frame::new(true, OpCode::Text, vec![0xFF, 0xFE], false);
        assert!(Message::from_frame(frame).is_err());
    }
}
