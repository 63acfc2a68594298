use tokio::io::{AsyncWrite, AsyncWriteExt, WriteHalf};

use crate::error::Error;
use crate::frame::{self, Frame};
use crate::utils::generate_masking_key;

/// Which side of the connection this writer serves. Per spec §3, only a
/// client masks outgoing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The low-level per-frame writer (spec §4.7's C8 write path, the half that
/// actually touches the socket). [`crate::split::WSWriter`] is the
/// higher-level coordinator that turns a [`crate::message::Message`] into
/// one or more frames and serializes concurrent callers through a mutex
/// around this type.
pub struct Writer<S> {
    write_half: WriteHalf<S>,
    role: Role,
}

impl<S: AsyncWrite + Unpin> Writer<S> {
    pub fn new(write_half: WriteHalf<S>, role: Role) -> Self {
        Self { write_half, role }
    }

    /// Writes one frame, masking it first if this writer is a client.
    /// `set_rsv1` flags this as the first frame of a compressed message.
    pub async fn write_frame(&mut self, frame: Frame, set_rsv1: bool) -> Result<(), Error> {
        let mask = match self.role {
            Role::Client => Some(generate_masking_key()),
            Role::Server => None,
        };
        frame::write_frame(&mut self.write_half, &frame, mask, set_rsv1).await
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        self.write_half.flush().await?;
        Ok(())
    }

    /// Writes already-encoded frame bytes verbatim. Used by the broadcast
    /// path (spec §4.7's cache): since server frames are never masked,
    /// one encoded byte sequence is valid on every recipient's wire, so
    /// there's nothing for a client-role writer to apply here. Only
    /// meaningful for [`Role::Server`]; calling it on a client writer
    /// would skip masking and is rejected.
    pub(crate) async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.role != Role::Server {
            return Err(Error::Internal(
                "write_raw is only valid for server-role writers".to_string(),
            ));
        }
        self.write_half.write_all(bytes).await?;
        Ok(())
    }
}
