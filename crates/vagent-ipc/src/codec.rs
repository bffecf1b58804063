//! `Encoder`/`Decoder` pair wrapping a `LengthDelimitedCodec` frame around
//! a `serde_json`-encoded `IpcMessage`, so a `Framed<T, IpcCodec>` is a
//! self-delimited, streaming-reader-safe duplex channel per spec §6.1's
//! requirement ("Each message MUST be self-delimited and consumable by a
//! streaming reader").

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::IpcMessage;

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct IpcCodec {
    inner: LengthDelimitedCodec,
}

impl IpcCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::new(),
        }
    }
}

impl Default for IpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for IpcCodec {
    type Item = IpcMessage;
    type Error = IpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.inner.decode(src)? else {
            return Ok(None);
        };
        let message = serde_json::from_slice(&frame)?;
        Ok(Some(message))
    }
}

impl Encoder<IpcMessage> for IpcCodec {
    type Error = IpcError;

    fn encode(&mut self, item: IpcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        self.inner.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}
