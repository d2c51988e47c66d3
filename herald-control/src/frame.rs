//! Length-prefixed bincode frames
//!
//! Each frame is a big-endian `u32` length followed by that many bytes of
//! bincode (legacy configuration, serde encoding).

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ControlError, Result};

/// Largest request a server accepts
pub const MAX_REQUEST_SIZE: u32 = 1_000_000;

/// Largest response a client accepts
pub const MAX_RESPONSE_SIZE: u32 = 10_000_000;

/// Read one frame, rejecting anything larger than `max` bytes
pub async fn read_frame<T, R>(stream: &mut R, max: u32) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ControlError::ConnectionClosed
        } else {
            ControlError::Io(e)
        }
    })?;

    let size = u32::from_be_bytes(len_buf);
    if size > max {
        return Err(ControlError::FrameTooLarge { size, max });
    }

    let mut bytes = vec![0u8; size as usize];
    stream.read_exact(&mut bytes).await?;

    let (value, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())?;
    Ok(value)
}

/// Write one frame and flush
pub async fn write_frame<T, W>(stream: &mut W, value: &T) -> Result<()>
where
    T: Serialize + Sync,
    W: AsyncWrite + Unpin + Send,
{
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::legacy())?;
    let size = u32::try_from(bytes.len())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    stream.write_all(&size.to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;

    Ok(())
}
