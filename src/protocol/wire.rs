//! Message framing.
//!
//! Every message is a big-endian `u32` byte count followed by that many
//! bytes of JSON. Empty frames are invalid.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::LimitsConfig;
use crate::error::{DaemonError, ProtocolErrorKind};

/// Default cap on a single message (`limits.max_message_size`).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_048_576;

const PREFIX_LEN: usize = 4;

fn protocol(kind: ProtocolErrorKind) -> DaemonError {
    DaemonError::Protocol { kind }
}

/// Size cap and per-message deadline for one connection.
#[derive(Debug, Clone, Copy)]
pub struct Framing {
    pub max_message_size: usize,
    pub io_timeout: Duration,
}

impl Framing {
    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self {
            max_message_size: limits.max_message_size,
            io_timeout: Duration::from_secs(limits.socket_timeout_seconds),
        }
    }

    /// Read one frame. An idle peer yields `ConnectionTimeout`.
    pub async fn read<R>(&self, reader: &mut R) -> Result<Vec<u8>, DaemonError>
    where
        R: AsyncRead + Unpin,
    {
        timeout(self.io_timeout, read_message(reader, self.max_message_size))
            .await
            .map_err(|_| protocol(ProtocolErrorKind::ConnectionTimeout))?
    }

    /// Write one frame, flushing it before returning.
    pub async fn write<W>(&self, writer: &mut W, payload: &[u8]) -> Result<(), DaemonError>
    where
        W: AsyncWrite + Unpin,
    {
        timeout(self.io_timeout, write_message(writer, payload))
            .await
            .map_err(|_| protocol(ProtocolErrorKind::ConnectionTimeout))?
    }
}

/// Read one frame of at most `max_size` bytes.
///
/// A peer that hangs up between frames or inside one yields
/// `ConnectionClosed`; the oversized payload is never read.
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, DaemonError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREFIX_LEN];
    read_full(reader, &mut prefix).await?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 {
        return Err(protocol(ProtocolErrorKind::InvalidMessageFormat {
            message: "empty frame".to_string(),
        }));
    }
    if len > max_size {
        return Err(protocol(ProtocolErrorKind::MessageTooLarge {
            size: len,
            max: max_size,
        }));
    }

    let mut payload = vec![0u8; len];
    read_full(reader, &mut payload).await?;
    Ok(payload)
}

/// Write one frame. Payloads that do not fit the prefix are refused.
pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> Result<(), DaemonError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| {
        protocol(ProtocolErrorKind::MessageTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })
    })?;

    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), DaemonError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(protocol(ProtocolErrorKind::ConnectionClosed))
        }
        Err(e) => Err(DaemonError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framing(timeout: Duration) -> Framing {
        Framing {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            io_timeout: timeout,
        }
    }

    #[tokio::test]
    async fn test_frame_layout() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, b"{\"command\":\"system.ping\"}")
            .await
            .unwrap();

        assert_eq!(&buffer[..4], &[0, 0, 0, 25]);
        let mut cursor = Cursor::new(buffer);
        let payload = read_message(&mut cursor, 64).await.unwrap();
        assert_eq!(payload, b"{\"command\":\"system.ping\"}");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut bytes = 2_000_000u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);

        let result = read_message(&mut Cursor::new(bytes), DEFAULT_MAX_MESSAGE_SIZE).await;
        assert!(matches!(
            result,
            Err(DaemonError::Protocol {
                kind: ProtocolErrorKind::MessageTooLarge { size: 2_000_000, .. }
            })
        ));
    }

    #[tokio::test]
    async fn test_empty_frame_rejected() {
        let result = read_message(&mut Cursor::new(vec![0, 0, 0, 0]), 64).await;
        assert_eq!(result.unwrap_err().code(), "PROTOCOL_ERROR");
    }

    #[tokio::test]
    async fn test_hangup_is_connection_closed() {
        for bytes in [Vec::new(), vec![0, 0, 0, 9, b'{']] {
            let result = read_message(&mut Cursor::new(bytes), 64).await;
            assert!(matches!(
                result,
                Err(DaemonError::Protocol {
                    kind: ProtocolErrorKind::ConnectionClosed
                })
            ));
        }
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (mut client, _server) = tokio::io::duplex(64);
        let result = framing(Duration::from_millis(50)).read(&mut client).await;
        assert!(matches!(
            result,
            Err(DaemonError::Protocol {
                kind: ProtocolErrorKind::ConnectionTimeout
            })
        ));
    }

    #[tokio::test]
    async fn test_framing_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let framing = framing(Duration::from_secs(1));

        framing.write(&mut client, b"{}").await.unwrap();
        assert_eq!(framing.read(&mut server).await.unwrap(), b"{}");
    }
}
