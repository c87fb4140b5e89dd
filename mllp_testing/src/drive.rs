//! Helpers for writing and reading raw wire bytes on the peer side of a
//! pipe.

use std::{io, time::Duration};

use mllp::protocol::{END_OF_BLOCK, END_OF_DATA};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write `bytes` in chunks of at most `chunk` bytes, sleeping `pause`
/// between chunks so each lands in a separate read.
///
/// # Errors
///
/// Returns any write error.
pub async fn drip_feed<W>(writer: &mut W, bytes: &[u8], chunk: usize, pause: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for piece in bytes.chunks(chunk.max(1)) {
        writer.write_all(piece).await?;
        writer.flush().await?;
        tokio::time::sleep(pause).await;
    }
    Ok(())
}

/// Read raw bytes up to and including the next `END_OF_BLOCK END_OF_DATA`
/// pair. Returns `None` on end of stream before a terminator.
///
/// # Errors
///
/// Returns any read error.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut wire = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte).await? == 0 {
            return Ok(None);
        }
        wire.push(byte[0]);
        if wire.ends_with(&[END_OF_BLOCK, END_OF_DATA]) {
            return Ok(Some(wire));
        }
    }
}
