//! Framing lanes over a duplex byte transport.
//!
//! A lane turns the read and write halves of a transport into typed
//! envelope operations. Envelopes are bincode-encoded and carried in
//! length-delimited frames (4-byte big-endian prefix, `tokio_util`'s
//! `LengthDelimitedCodec`). Raw byte access is kept for stream-mode
//! connections, which copy transport bytes without framing.
//!
//! # Error Handling
//!
//! [`LaneError`] distinguishes framing, serialization, I/O and EOF
//! conditions. A peer closing at a frame boundary surfaces as
//! [`EofError::CleanClose`]; closing part way through a frame yields
//! [`EofError::MidHeader`] or [`EofError::MidFrame`].

use bytes::{Buf, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::{envelope::Envelope, message::Message, metrics};

pub mod error;

pub use error::{EofError, LaneError};

/// Minimum frame length in bytes.
///
/// Configured lengths are clamped to at least this value.
pub const MIN_FRAME_LENGTH: usize = 64;

/// Maximum frame length in bytes (16 MiB).
///
/// Configured lengths are clamped to at most this value to prevent unbounded
/// memory allocation.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Frame length used when no [`LaneConfig`] is supplied (4 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

/// Length prefix header size (4 bytes for big-endian u32).
pub const LENGTH_HEADER_SIZE: usize = 4;

pub(crate) fn clamp_frame_length(value: usize) -> usize {
    value.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH)
}

/// Framing configuration shared by the read and write halves of a lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaneConfig {
    max_frame_length: usize,
}

impl LaneConfig {
    /// Construct a configuration with a maximum frame length.
    ///
    /// The value is clamped to [`MIN_FRAME_LENGTH`]..=[`MAX_FRAME_LENGTH`].
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: clamp_frame_length(max_frame_length),
        }
    }

    /// Return the maximum frame length accepted by this lane.
    #[must_use]
    pub const fn max_frame_length(&self) -> usize { self.max_frame_length }

    /// Create a decoder for inbound frames.
    #[must_use]
    pub fn decoder(self) -> LaneDecoder {
        LaneDecoder {
            max_frame_length: self.max_frame_length,
        }
    }

    /// Create an encoder for outbound frames.
    #[must_use]
    pub fn encoder(self) -> LaneEncoder {
        LaneEncoder {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(self.max_frame_length)
                .new_codec(),
            max_frame_length: self.max_frame_length,
        }
    }
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

/// Length-delimited decoder reporting structured EOF errors.
///
/// The length prefix is only consumed once the whole frame is buffered, so a
/// close part way through a frame can still report the announced length.
pub struct LaneDecoder {
    max_frame_length: usize,
}

fn announced_length(src: &[u8]) -> Option<usize> {
    let header = src.get(..LENGTH_HEADER_SIZE)?;
    let header = <[u8; LENGTH_HEADER_SIZE]>::try_from(header).ok()?;
    Some(u32::from_be_bytes(header) as usize)
}

impl Decoder for LaneDecoder {
    type Item = Bytes;
    type Error = LaneError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(length) = announced_length(src) else {
            return Ok(None);
        };
        if length > self.max_frame_length {
            return Err(LaneError::OversizedFrame {
                size: length,
                max: self.max_frame_length,
            });
        }
        let total = LENGTH_HEADER_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_HEADER_SIZE);
        Ok(Some(src.split_to(length).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            // Clean close: no data remaining at frame boundary
            None if src.is_empty() => Ok(None),
            None => {
                let error = build_eof_error(src);
                tracing::debug!(%error, "transport closed with a partial frame buffered");
                Err(error.into())
            }
        }
    }
}

/// Decide whether the peer closed mid-header or mid-frame.
fn build_eof_error(src: &BytesMut) -> EofError {
    match announced_length(src) {
        Some(expected) => EofError::MidFrame {
            bytes_received: src.len().saturating_sub(LENGTH_HEADER_SIZE),
            expected,
        },
        None => EofError::MidHeader {
            bytes_received: src.len(),
            header_size: LENGTH_HEADER_SIZE,
        },
    }
}

/// Length-delimited encoder rejecting frames above the configured maximum.
pub struct LaneEncoder {
    inner: LengthDelimitedCodec,
    max_frame_length: usize,
}

impl Encoder<Bytes> for LaneEncoder {
    type Error = LaneError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_length {
            return Err(LaneError::OversizedFrame {
                size: item.len(),
                max: self.max_frame_length,
            });
        }
        Ok(self.inner.encode(item, dst)?)
    }
}

/// Read half of a lane.
///
/// Only one task may own a `LaneReader`; interleaved reads from two call
/// sites would split frames between them.
pub struct LaneReader<R> {
    framed: FramedRead<R, LaneDecoder>,
}

impl<R> LaneReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap the read half of a transport.
    #[must_use]
    pub fn new(reader: R, config: LaneConfig) -> Self {
        Self {
            framed: FramedRead::new(reader, config.decoder()),
        }
    }

    /// Read and decode the next envelope.
    ///
    /// # Errors
    ///
    /// Returns [`LaneError::Eof`] when the peer closes the transport, or a
    /// framing, decode or I/O error.
    pub async fn read_envelope(&mut self) -> Result<Envelope, LaneError> {
        let Some(frame) = self.framed.next().await else {
            return Err(EofError::CleanClose.into());
        };
        let frame = frame?;
        let (envelope, _) = Envelope::from_bytes(&frame).map_err(LaneError::Decode)?;
        metrics::inc_frames(metrics::Direction::Inbound);
        Ok(envelope)
    }

    /// Read raw bytes, draining any bytes already buffered by the decoder.
    ///
    /// # Errors
    ///
    /// Returns [`LaneError::Io`] if the transport read fails.
    pub async fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize, LaneError> {
        let buffered = self.framed.read_buffer_mut();
        if !buffered.is_empty() {
            let n = buf.len().min(buffered.len());
            buf[..n].copy_from_slice(&buffered[..n]);
            buffered.advance(n);
            return Ok(n);
        }
        Ok(self.framed.get_mut().read(buf).await?)
    }

    /// Release the underlying reader.
    ///
    /// Bytes still held in the decoder buffer are discarded.
    pub fn into_inner(self) -> R { self.framed.into_inner() }
}

/// Write half of a lane.
pub struct LaneWriter<W> {
    framed: FramedWrite<W, LaneEncoder>,
}

impl<W> LaneWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap the write half of a transport.
    #[must_use]
    pub fn new(writer: W, config: LaneConfig) -> Self {
        Self {
            framed: FramedWrite::new(writer, config.encoder()),
        }
    }

    /// Encode `envelope` and write it as one frame.
    ///
    /// # Errors
    ///
    /// Returns [`LaneError::Encode`], [`LaneError::OversizedFrame`] or an
    /// I/O error.
    pub async fn write_envelope(&mut self, envelope: &Envelope) -> Result<(), LaneError> {
        let bytes = envelope.to_bytes().map_err(LaneError::Encode)?;
        self.framed.send(Bytes::from(bytes)).await?;
        metrics::inc_frames(metrics::Direction::Outbound);
        Ok(())
    }

    /// Write raw bytes after any pending frames.
    ///
    /// # Errors
    ///
    /// Returns [`LaneError::Io`] if the transport write fails.
    pub async fn write_raw(&mut self, buf: &[u8]) -> Result<usize, LaneError> {
        SinkExt::<Bytes>::flush(&mut self.framed).await?;
        let writer = self.framed.get_mut();
        writer.write_all(buf).await?;
        writer.flush().await?;
        Ok(buf.len())
    }

    /// Flush pending frames and shut down the write direction.
    ///
    /// # Errors
    ///
    /// Returns [`LaneError::Io`] if flushing or shutdown fails.
    pub async fn shutdown(&mut self) -> Result<(), LaneError> {
        SinkExt::<Bytes>::flush(&mut self.framed).await?;
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
